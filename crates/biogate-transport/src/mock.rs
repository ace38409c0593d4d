//! Scripted panel link for tests.

use crate::session::PanelLink;
use biogate_core::{DeviceAddr, Error, Result};
use biogate_protocol::{CaptureReply, ReplyCode, ZkFrame, ZkRequest};
use bytes::BufMut;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory [`PanelLink`] that replays scripted replies.
///
/// Each `request` pops the next scripted reply and records the request for
/// later assertions. An empty script answers `DeviceUnreachable`, which
/// doubles as the way to simulate a dead panel.
///
/// # Examples
///
/// ```
/// use biogate_transport::mock::MockPanelLink;
/// use biogate_transport::PanelLink;
/// use biogate_protocol::ZkRequest;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let link = MockPanelLink::new("192.168.0.50:4370".parse().unwrap());
/// link.queue_ok(vec![]);
///
/// let reply = link
///     .request(ZkRequest::EnrollBegin { user_id: 7, finger_index: 0 }, Duration::from_secs(1))
///     .await
///     .unwrap();
/// assert_eq!(reply.command, 2000);
/// assert_eq!(link.requests().len(), 1);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MockPanelLink {
    addr: DeviceAddr,
    replies: Arc<Mutex<VecDeque<Result<ZkFrame>>>>,
    requests: Arc<Mutex<Vec<ZkRequest>>>,
}

impl MockPanelLink {
    #[must_use]
    pub fn new(addr: DeviceAddr) -> Self {
        MockPanelLink {
            addr,
            replies: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a raw reply frame.
    pub fn queue_reply(&self, reply: Result<ZkFrame>) {
        self.replies
            .lock()
            .expect("mock reply lock poisoned")
            .push_back(reply);
    }

    /// Queue an `Ok` reply with the given payload.
    pub fn queue_ok(&self, payload: Vec<u8>) {
        self.queue_reply(Ok(ZkFrame::new(ReplyCode::Ok.to_u16(), 0, 0, payload)));
    }

    /// Queue an `Error` reply.
    pub fn queue_panel_error(&self) {
        self.queue_reply(Ok(ZkFrame::new(ReplyCode::Error.to_u16(), 0, 0, vec![])));
    }

    /// Queue a transport-level failure.
    pub fn queue_unreachable(&self) {
        let addr = self.addr;
        self.queue_reply(Err(Error::unreachable(addr)));
    }

    /// Queue a successful `EnrollCapture` reply.
    pub fn queue_capture(&self, template_id: u32, quality: u8, template: &[u8]) {
        let mut payload = Vec::with_capacity(8 + template.len());
        payload.put_u32_le(template_id);
        payload.put_u32_le(u32::from(quality));
        payload.extend_from_slice(template);
        self.queue_ok(payload);
    }

    /// Requests issued so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<ZkRequest> {
        self.requests
            .lock()
            .expect("mock request lock poisoned")
            .clone()
    }

    /// Parse a queued capture reply back, for test assertions.
    pub fn parse_capture(frame: &ZkFrame) -> Result<CaptureReply> {
        CaptureReply::parse(frame)
    }
}

impl PanelLink for MockPanelLink {
    fn addr(&self) -> DeviceAddr {
        self.addr
    }

    async fn request(&self, request: ZkRequest, _timeout: Duration) -> Result<ZkFrame> {
        self.requests
            .lock()
            .expect("mock request lock poisoned")
            .push(request);
        let next = self
            .replies
            .lock()
            .expect("mock reply lock poisoned")
            .pop_front();
        next.unwrap_or_else(|| Err(Error::unreachable(self.addr)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_replays_in_order() {
        let link = MockPanelLink::new("192.168.0.50:4370".parse().unwrap());
        link.queue_ok(vec![1]);
        link.queue_panel_error();

        let first = link
            .request(ZkRequest::Connect, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(first.payload, vec![1]);

        let second = link
            .request(ZkRequest::Exit, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(second.command, 2001);

        assert_eq!(
            link.requests(),
            vec![ZkRequest::Connect, ZkRequest::Exit]
        );
    }

    #[tokio::test]
    async fn test_mock_empty_script_is_unreachable() {
        let link = MockPanelLink::new("192.168.0.50:4370".parse().unwrap());
        let result = link
            .request(ZkRequest::Connect, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(Error::DeviceUnreachable { .. })));
    }
}
