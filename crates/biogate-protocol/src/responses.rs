//! Reply payload parsing.

use crate::commands::{FrameClass, ReplyCode, classify};
use crate::frame::ZkFrame;
use biogate_core::{Error, Result};
use bytes::Buf;
use chrono::{DateTime, Utc};

/// Check that `frame` is an `Ok` reply and pass it through.
///
/// # Errors
/// `Unauth` replies become `Error::Protocol` with the panel's wording for
/// an unknown identity; `Error` replies and non-reply frames become
/// `Error::Protocol` as well.
pub fn ensure_ok(frame: &ZkFrame) -> Result<&ZkFrame> {
    match classify(frame.command) {
        FrameClass::Reply(ReplyCode::Ok) => Ok(frame),
        FrameClass::Reply(ReplyCode::Unauth) => {
            Err(Error::protocol("Panel rejected request: unknown identity"))
        }
        FrameClass::Reply(ReplyCode::Error) => Err(Error::protocol("Panel reported an error")),
        other => Err(Error::protocol(format!(
            "Expected a reply frame, got {other:?}"
        ))),
    }
}

/// Extract the session id from a `Connect` reply.
///
/// The id lives in the reply's header session field; the payload is empty.
///
/// # Errors
/// Returns `Error::Protocol` when the reply is not `Ok`.
pub fn session_id(frame: &ZkFrame) -> Result<u32> {
    ensure_ok(frame)?;
    Ok(frame.session_id)
}

/// Parsed `EnrollCapture` reply: the capture the panel just took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReply {
    /// Identifier the panel assigned in its local store.
    pub template_id: u32,
    /// Capture quality 0-100.
    pub quality: u8,
    /// Opaque template bytes.
    pub template: Vec<u8>,
}

impl CaptureReply {
    /// Parse the payload `[template_id: u32][quality: u32][template...]`.
    ///
    /// # Errors
    /// Returns `Error::Protocol` when the reply is not `Ok`, the payload is
    /// shorter than the fixed fields, or the quality is out of range.
    pub fn parse(frame: &ZkFrame) -> Result<Self> {
        ensure_ok(frame)?;
        let mut payload = frame.payload.as_slice();
        if payload.len() < 8 {
            return Err(Error::protocol(format!(
                "Capture reply payload too short: {} bytes",
                payload.len()
            )));
        }
        let template_id = payload.get_u32_le();
        let quality_raw = payload.get_u32_le();
        let quality = u8::try_from(quality_raw)
            .ok()
            .filter(|q| *q <= 100)
            .ok_or_else(|| Error::protocol(format!("Quality out of range: {quality_raw}")))?;
        Ok(CaptureReply {
            template_id,
            quality,
            template: payload.to_vec(),
        })
    }
}

/// Outcome of a `Verify` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The sensor matched a stored template.
    Match { template_id: u32, score: u8 },
    /// No on-device template matched.
    NoMatch,
}

/// Parse a `Verify` reply.
///
/// An `Ok` reply carries `[template_id: u32][score: u32]`; an `Unauth`
/// reply means the finger matched nothing on-device.
///
/// # Errors
/// Returns `Error::Protocol` for `Error` replies, non-reply frames, or a
/// short `Ok` payload.
pub fn parse_verify(frame: &ZkFrame) -> Result<VerifyOutcome> {
    if let FrameClass::Reply(ReplyCode::Unauth) = classify(frame.command) {
        return Ok(VerifyOutcome::NoMatch);
    }
    ensure_ok(frame)?;
    let mut payload = frame.payload.as_slice();
    if payload.len() < 8 {
        return Err(Error::protocol(format!(
            "Verify reply payload too short: {} bytes",
            payload.len()
        )));
    }
    let template_id = payload.get_u32_le();
    let score_raw = payload.get_u32_le();
    let score = u8::try_from(score_raw.min(100)).unwrap_or(100);
    Ok(VerifyOutcome::Match { template_id, score })
}

/// One entry from a panel's attendance log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub user_id: u32,
    pub timestamp: DateTime<Utc>,
}

/// Parse a `GetAttendance` reply.
///
/// Payload: `[count: u32]` then `count` entries of
/// `[user_id: u32][epoch_secs: u32]`.
///
/// # Errors
/// Returns `Error::Protocol` on short payloads or counts that disagree
/// with the payload size.
pub fn parse_attendance(frame: &ZkFrame) -> Result<Vec<AttendanceRecord>> {
    ensure_ok(frame)?;
    let mut payload = frame.payload.as_slice();
    if payload.len() < 4 {
        return Err(Error::protocol("Attendance reply missing count"));
    }
    let count = payload.get_u32_le() as usize;
    if payload.len() != count * 8 {
        return Err(Error::protocol(format!(
            "Attendance payload size {} does not match count {count}",
            payload.len()
        )));
    }
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        let user_id = payload.get_u32_le();
        let epoch = payload.get_u32_le();
        let timestamp = DateTime::<Utc>::from_timestamp(i64::from(epoch), 0)
            .ok_or_else(|| Error::protocol(format!("Invalid attendance timestamp: {epoch}")))?;
        records.push(AttendanceRecord { user_id, timestamp });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn ok_reply(payload: Vec<u8>) -> ZkFrame {
        ZkFrame::new(ReplyCode::Ok.to_u16(), 1, 7, payload)
    }

    #[test]
    fn test_ensure_ok_variants() {
        assert!(ensure_ok(&ok_reply(vec![])).is_ok());
        assert!(ensure_ok(&ZkFrame::new(2001, 1, 7, vec![])).is_err());
        assert!(ensure_ok(&ZkFrame::new(2002, 1, 7, vec![])).is_err());
        // An event frame is not a reply
        assert!(ensure_ok(&ZkFrame::new(501, 0, 7, vec![])).is_err());
    }

    #[test]
    fn test_session_id_from_connect_reply() {
        let frame = ZkFrame::new(2000, 0, 0x1234, vec![]);
        assert_eq!(session_id(&frame).unwrap(), 0x1234);
    }

    #[test]
    fn test_capture_reply_parse() {
        let mut payload = Vec::new();
        payload.put_u32_le(17);
        payload.put_u32_le(82);
        payload.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

        let reply = CaptureReply::parse(&ok_reply(payload)).unwrap();
        assert_eq!(reply.template_id, 17);
        assert_eq!(reply.quality, 82);
        assert_eq!(reply.template, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_capture_reply_rejects_bad_quality() {
        let mut payload = Vec::new();
        payload.put_u32_le(17);
        payload.put_u32_le(300);
        assert!(CaptureReply::parse(&ok_reply(payload)).is_err());
    }

    #[test]
    fn test_capture_reply_rejects_short_payload() {
        assert!(CaptureReply::parse(&ok_reply(vec![1, 2, 3])).is_err());
    }

    #[test]
    fn test_attendance_parse() {
        let mut payload = Vec::new();
        payload.put_u32_le(2);
        payload.put_u32_le(42);
        payload.put_u32_le(1_700_000_000);
        payload.put_u32_le(43);
        payload.put_u32_le(1_700_000_060);

        let records = parse_attendance(&ok_reply(payload)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].user_id, 42);
        assert_eq!(records[1].user_id, 43);
        assert_eq!(
            (records[1].timestamp - records[0].timestamp).num_seconds(),
            60
        );
    }

    #[test]
    fn test_verify_parse() {
        let mut payload = Vec::new();
        payload.put_u32_le(17);
        payload.put_u32_le(88);
        assert_eq!(
            parse_verify(&ok_reply(payload)).unwrap(),
            VerifyOutcome::Match {
                template_id: 17,
                score: 88
            }
        );

        let unauth = ZkFrame::new(ReplyCode::Unauth.to_u16(), 1, 7, vec![]);
        assert_eq!(parse_verify(&unauth).unwrap(), VerifyOutcome::NoMatch);

        let error = ZkFrame::new(ReplyCode::Error.to_u16(), 1, 7, vec![]);
        assert!(parse_verify(&error).is_err());
    }

    #[test]
    fn test_attendance_count_mismatch() {
        let mut payload = Vec::new();
        payload.put_u32_le(3);
        payload.put_u32_le(42);
        payload.put_u32_le(1_700_000_000);
        assert!(parse_attendance(&ok_reply(payload)).is_err());
    }
}
