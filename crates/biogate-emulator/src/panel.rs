use biogate_core::{Error, Result};
use biogate_protocol::{
    CommandCode, InboundEvent, ReplyCode, ZkCodec, ZkFrame,
};
use bytes::{Buf, BufMut};
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, broadcast};
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

/// A scripted enrollment capture.
#[derive(Debug, Clone)]
struct ScriptedCapture {
    template_id: u32,
    quality: u8,
    template: Vec<u8>,
}

#[derive(Debug, Default)]
struct EmulatorState {
    /// Captures returned by successive `EnrollCapture` commands.
    captures: Mutex<VecDeque<ScriptedCapture>>,
    /// Replies to `Verify`: a matched template id and score, or `None` for
    /// no match.
    verifications: Mutex<VecDeque<Option<(u32, u8)>>>,
    /// `(user_id, epoch_secs)` entries served by `GetAttendance`.
    attendance: Mutex<Vec<(u32, u32)>>,
    /// Template ids the panel claims to hold, served by `GetTemplates`.
    stored_templates: Mutex<Vec<u32>>,
    /// Relay pulses the panel performed: `(relay_port, duration_secs)`.
    door_opens: Mutex<Vec<(u32, u32)>>,
    fail_open_door: AtomicBool,
    fail_delete: AtomicBool,
    session_counter: AtomicU32,
}

/// TCP server that emulates one biometric panel.
pub struct PanelEmulator {
    listener: TcpListener,
    state: Arc<EmulatorState>,
    event_tx: broadcast::Sender<InboundEvent>,
    kick: Arc<Notify>,
}

impl PanelEmulator {
    /// Bind the emulator on `addr` (use port 0 for an ephemeral port).
    ///
    /// # Errors
    /// Returns `Error::Io` when the listener cannot bind.
    pub async fn bind(addr: &str) -> Result<(Self, EmulatorHandle)> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let state = Arc::new(EmulatorState {
            session_counter: AtomicU32::new(0x1000),
            ..EmulatorState::default()
        });
        let (event_tx, _) = broadcast::channel(64);
        let kick = Arc::new(Notify::new());

        let handle = EmulatorHandle {
            local_addr,
            state: Arc::clone(&state),
            event_tx: event_tx.clone(),
            kick: Arc::clone(&kick),
        };
        let emulator = PanelEmulator {
            listener,
            state,
            event_tx,
            kick,
        };
        Ok((emulator, handle))
    }

    /// Run the accept loop until aborted.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(%peer, "Emulator accepted connection");
                        let state = Arc::clone(&self.state);
                        let event_rx = self.event_tx.subscribe();
                        let kick = Arc::clone(&self.kick);
                        tokio::spawn(serve_connection(stream, state, event_rx, kick));
                    }
                    Err(e) => {
                        warn!(error = %e, "Emulator accept failed");
                        return;
                    }
                }
            }
        })
    }
}

/// Test-side controls for a running emulator.
#[derive(Clone)]
pub struct EmulatorHandle {
    local_addr: SocketAddr,
    state: Arc<EmulatorState>,
    event_tx: broadcast::Sender<InboundEvent>,
    kick: Arc<Notify>,
}

impl EmulatorHandle {
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue the reply for the next `EnrollCapture` command.
    pub fn push_capture(&self, template_id: u32, quality: u8, template: Vec<u8>) {
        self.state
            .captures
            .lock()
            .expect("emulator lock poisoned")
            .push_back(ScriptedCapture {
                template_id,
                quality,
                template,
            });
    }

    /// Queue the reply for the next `Verify` command.
    pub fn push_verification(&self, matched: Option<(u32, u8)>) {
        self.state
            .verifications
            .lock()
            .expect("emulator lock poisoned")
            .push_back(matched);
    }

    /// Add an attendance log entry.
    pub fn push_attendance(&self, user_id: u32, epoch_secs: u32) {
        self.state
            .attendance
            .lock()
            .expect("emulator lock poisoned")
            .push((user_id, epoch_secs));
    }

    /// Set the template ids reported by `GetTemplates`.
    pub fn set_stored_templates(&self, ids: Vec<u32>) {
        *self
            .state
            .stored_templates
            .lock()
            .expect("emulator lock poisoned") = ids;
    }

    /// Make `OpenDoor` fail with an error reply.
    pub fn set_fail_open_door(&self, fail: bool) {
        self.state.fail_open_door.store(fail, Ordering::SeqCst);
    }

    /// Make `DeleteTemplate` fail with an error reply.
    pub fn set_fail_delete(&self, fail: bool) {
        self.state.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Relay pulses performed so far: `(relay_port, duration_secs)`.
    #[must_use]
    pub fn door_opens(&self) -> Vec<(u32, u32)> {
        self.state
            .door_opens
            .lock()
            .expect("emulator lock poisoned")
            .clone()
    }

    /// Push a match notification to every connected client.
    pub fn emit_match(&self, template_id: u32, score: u8) {
        let _ = self.event_tx.send(InboundEvent::Match {
            template_id: biogate_core::TemplateId::new(template_id),
            score,
        });
    }

    /// Push a no-match notification.
    pub fn emit_no_match(&self) {
        let _ = self.event_tx.send(InboundEvent::NoMatch);
    }

    /// Push a heartbeat.
    pub fn emit_heartbeat(&self) {
        let _ = self.event_tx.send(InboundEvent::Heartbeat);
    }

    /// Sever every open connection, simulating a network fault.
    pub fn drop_connections(&self) {
        self.kick.notify_waiters();
    }
}

async fn serve_connection(
    stream: TcpStream,
    state: Arc<EmulatorState>,
    mut event_rx: broadcast::Receiver<InboundEvent>,
    kick: Arc<Notify>,
) {
    let mut framed = Framed::new(stream, ZkCodec::new());
    let mut session_id: u32 = 0;

    loop {
        tokio::select! {
            _ = kick.notified() => {
                debug!("Emulator dropping connection on request");
                return;
            }
            event = event_rx.recv() => {
                if let Ok(event) = event {
                    if framed.send(event.to_frame(session_id)).await.is_err() {
                        return;
                    }
                }
            }
            maybe_frame = framed.next() => {
                let frame = match maybe_frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        warn!(error = %e, "Emulator decode error");
                        return;
                    }
                    None => return,
                };
                match respond(&state, &frame, &mut session_id) {
                    Ok(Some(reply)) => {
                        if framed.send(reply).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => return, // Exit command
                    Err(e) => {
                        warn!(error = %e, "Emulator cannot answer frame");
                        let reply = ZkFrame::new(
                            ReplyCode::Error.to_u16(),
                            frame.reply_id,
                            session_id,
                            vec![],
                        );
                        if framed.send(reply).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn reply_frame(code: ReplyCode, reply_id: u16, session_id: u32, payload: Vec<u8>) -> Option<ZkFrame> {
    Some(ZkFrame::new(code.to_u16(), reply_id, session_id, payload))
}

fn respond(
    state: &EmulatorState,
    frame: &ZkFrame,
    session_id: &mut u32,
) -> Result<Option<ZkFrame>> {
    let command = CommandCode::from_u16(frame.command)?;
    if command == CommandCode::Connect {
        *session_id = state.session_counter.fetch_add(1, Ordering::SeqCst);
    }
    let sid = *session_id;
    let ok = |payload: Vec<u8>| reply_frame(ReplyCode::Ok, frame.reply_id, sid, payload);
    let err = |code: ReplyCode| reply_frame(code, frame.reply_id, sid, vec![]);

    trace!(?command, reply_id = frame.reply_id, "Emulator handling command");
    let reply = match command {
        CommandCode::Connect => ok(vec![]),
        CommandCode::Exit => return Ok(None),
        CommandCode::EnrollBegin | CommandCode::EnrollCancel => ok(vec![]),
        CommandCode::EnrollCapture => {
            let next = state
                .captures
                .lock()
                .expect("emulator lock poisoned")
                .pop_front();
            match next {
                Some(capture) => {
                    let mut payload = Vec::with_capacity(8 + capture.template.len());
                    payload.put_u32_le(capture.template_id);
                    payload.put_u32_le(u32::from(capture.quality));
                    payload.extend_from_slice(&capture.template);
                    ok(payload)
                }
                None => err(ReplyCode::Error),
            }
        }
        CommandCode::Verify => {
            let next = state
                .verifications
                .lock()
                .expect("emulator lock poisoned")
                .pop_front();
            match next {
                Some(Some((template_id, score))) => {
                    let mut payload = Vec::with_capacity(8);
                    payload.put_u32_le(template_id);
                    payload.put_u32_le(u32::from(score));
                    ok(payload)
                }
                Some(None) => err(ReplyCode::Unauth),
                None => err(ReplyCode::Error),
            }
        }
        CommandCode::DeleteTemplate => {
            if state.fail_delete.load(Ordering::SeqCst) {
                err(ReplyCode::Error)
            } else {
                ok(vec![])
            }
        }
        CommandCode::OpenDoor => {
            if state.fail_open_door.load(Ordering::SeqCst) {
                err(ReplyCode::Error)
            } else {
                let mut payload = frame.payload.as_slice();
                if payload.len() < 8 {
                    return Err(Error::protocol("OpenDoor payload too short"));
                }
                let relay_port = payload.get_u32_le();
                let duration = payload.get_u32_le();
                state
                    .door_opens
                    .lock()
                    .expect("emulator lock poisoned")
                    .push((relay_port, duration));
                ok(vec![])
            }
        }
        CommandCode::GetAttendance => {
            let records = state
                .attendance
                .lock()
                .expect("emulator lock poisoned")
                .clone();
            let mut payload = Vec::with_capacity(4 + records.len() * 8);
            payload.put_u32_le(records.len() as u32);
            for (user_id, epoch) in records {
                payload.put_u32_le(user_id);
                payload.put_u32_le(epoch);
            }
            ok(payload)
        }
        CommandCode::GetTemplates => {
            let ids = state
                .stored_templates
                .lock()
                .expect("emulator lock poisoned")
                .clone();
            let mut payload = Vec::with_capacity(4 + ids.len() * 4);
            payload.put_u32_le(ids.len() as u32);
            for id in ids {
                payload.put_u32_le(id);
            }
            ok(payload)
        }
    };
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use biogate_protocol::ZkRequest;

    async fn client(addr: SocketAddr) -> Framed<TcpStream, ZkCodec> {
        let stream = TcpStream::connect(addr).await.unwrap();
        Framed::new(stream, ZkCodec::new())
    }

    #[tokio::test]
    async fn test_connect_assigns_session() {
        let (emulator, handle) = PanelEmulator::bind("127.0.0.1:0").await.unwrap();
        emulator.spawn();

        let mut framed = client(handle.local_addr()).await;
        framed
            .send(ZkRequest::Connect.into_frame(0, 0))
            .await
            .unwrap();
        let reply = framed.next().await.unwrap().unwrap();
        assert_eq!(reply.command, ReplyCode::Ok.to_u16());
        assert!(reply.session_id >= 0x1000);
    }

    #[tokio::test]
    async fn test_scripted_capture_and_exhaustion() {
        let (emulator, handle) = PanelEmulator::bind("127.0.0.1:0").await.unwrap();
        emulator.spawn();
        handle.push_capture(17, 82, vec![1, 2, 3]);

        let mut framed = client(handle.local_addr()).await;
        framed
            .send(ZkRequest::EnrollCapture.into_frame(1, 0))
            .await
            .unwrap();
        let reply = framed.next().await.unwrap().unwrap();
        assert_eq!(reply.command, ReplyCode::Ok.to_u16());
        assert_eq!(&reply.payload[0..4], &17u32.to_le_bytes());

        // Script exhausted: next capture fails
        framed
            .send(ZkRequest::EnrollCapture.into_frame(2, 0))
            .await
            .unwrap();
        let reply = framed.next().await.unwrap().unwrap();
        assert_eq!(reply.command, ReplyCode::Error.to_u16());
    }

    #[tokio::test]
    async fn test_open_door_recorded() {
        let (emulator, handle) = PanelEmulator::bind("127.0.0.1:0").await.unwrap();
        emulator.spawn();

        let mut framed = client(handle.local_addr()).await;
        framed
            .send(
                ZkRequest::OpenDoor {
                    relay_port: 1,
                    duration_secs: 5,
                }
                .into_frame(1, 0),
            )
            .await
            .unwrap();
        let reply = framed.next().await.unwrap().unwrap();
        assert_eq!(reply.command, ReplyCode::Ok.to_u16());
        assert_eq!(handle.door_opens(), vec![(1, 5)]);
    }

    #[tokio::test]
    async fn test_emitted_events_reach_client() {
        let (emulator, handle) = PanelEmulator::bind("127.0.0.1:0").await.unwrap();
        emulator.spawn();

        let mut framed = client(handle.local_addr()).await;
        // Give the connection task a beat to subscribe
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.emit_match(42, 90);

        let frame = framed.next().await.unwrap().unwrap();
        let event = InboundEvent::from_frame(&frame).unwrap();
        assert_eq!(
            event,
            InboundEvent::Match {
                template_id: biogate_core::TemplateId::new(42),
                score: 90,
            }
        );
    }
}
