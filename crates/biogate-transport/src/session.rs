//! Per-device session actor.
//!
//! Each panel gets exactly one actor task that owns the TCP socket for the
//! whole life of the process. The actor serves two flows over the same
//! framed stream: request/response commands arriving on an mpsc queue, and
//! unsolicited notifications fanned out on a broadcast channel. Replies are
//! matched to callers by the reply id the panel echoes back, so commands
//! and notifications can interleave freely on the wire.
//!
//! On transport failure the actor reconnects with exponential backoff and
//! marks the device faulted after too many consecutive failures; from then
//! on it waits for a watchdog nudge (or the probe interval) instead of
//! hammering a dead address.

use crate::backoff::Backoff;
use biogate_core::config::BackoffConfig;
use biogate_core::{ConnectionState, DeviceAddr, Error, Result};
use biogate_protocol::{FrameClass, InboundEvent, ZkCodec, ZkFrame, ZkRequest, classify};
use biogate_registry::DeviceRegistry;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Notify, broadcast, mpsc, oneshot, watch};
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

/// Capacity of the per-device command queue.
const COMMAND_QUEUE_DEPTH: usize = 32;

/// Capacity of the notification broadcast channel.
const EVENT_CHANNEL_DEPTH: usize = 64;

/// Commands cross from handles to the actor as a request plus a reply slot.
struct SessionCommand {
    request: ZkRequest,
    reply: oneshot::Sender<Result<ZkFrame>>,
}

/// Capability of sending commands to one panel.
///
/// The decision engine and the fingerprint directory depend on this seam
/// rather than on a concrete session, so tests drive them with a scripted
/// mock instead of a socket.
#[allow(async_fn_in_trait)]
pub trait PanelLink: Send + Sync {
    /// Address of the panel this link talks to.
    fn addr(&self) -> DeviceAddr;

    /// Send one command and wait for its reply.
    ///
    /// # Errors
    /// `Timeout` when no reply arrives inside `timeout`; `DeviceUnreachable`
    /// when the session is down.
    async fn request(&self, request: ZkRequest, timeout: Duration) -> Result<ZkFrame>;
}

/// Cheap, cloneable handle onto a device session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    addr: DeviceAddr,
    cmd_tx: mpsc::Sender<SessionCommand>,
    event_tx: broadcast::Sender<InboundEvent>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl std::fmt::Debug for SessionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCommand")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    /// Subscribe to this device's notification stream.
    ///
    /// Subscriptions are restartable: a receiver obtained after a
    /// disconnect resumes receiving once the actor reconnects, because the
    /// broadcast channel outlives individual connections.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.event_tx.subscribe()
    }

    /// Current connection state as last published by the actor.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Wait until the session reports `Connected`.
    ///
    /// # Errors
    /// `DeviceUnreachable` when the deadline passes or the actor is gone.
    pub async fn wait_connected(&self, deadline: Duration) -> Result<()> {
        let mut state_rx = self.state_rx.clone();
        let wait = async {
            loop {
                if state_rx.borrow_and_update().is_connected() {
                    return Ok(());
                }
                if state_rx.changed().await.is_err() {
                    return Err(Error::unreachable(self.addr));
                }
            }
        };
        tokio::time::timeout(deadline, wait)
            .await
            .map_err(|_| Error::unreachable(self.addr))?
    }
}

impl PanelLink for SessionHandle {
    fn addr(&self) -> DeviceAddr {
        self.addr
    }

    async fn request(&self, request: ZkRequest, timeout: Duration) -> Result<ZkFrame> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::unreachable(self.addr))?;

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            // Actor dropped the reply slot: session died mid-command.
            Ok(Err(_)) => Err(Error::unreachable(self.addr)),
            Err(_) => Err(Error::Timeout {
                duration_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

/// Why the serve loop returned.
enum ServeExit {
    /// All handles dropped; the process is shutting down.
    Shutdown,
    /// The connection failed; the actor should reconnect.
    Disconnected,
}

pub(crate) struct DeviceActor {
    addr: DeviceAddr,
    registry: Arc<DeviceRegistry>,
    backoff_config: BackoffConfig,
    connect_timeout: Duration,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    event_tx: broadcast::Sender<InboundEvent>,
    state_tx: watch::Sender<ConnectionState>,
    retry_nudge: Arc<Notify>,
}

/// Spawn the session actor for one panel.
///
/// Returns the handle plus the nudge used by the watchdog to wake a
/// faulted device for an immediate retry.
pub(crate) fn spawn_session(
    addr: DeviceAddr,
    registry: Arc<DeviceRegistry>,
    backoff_config: BackoffConfig,
    connect_timeout: Duration,
) -> (SessionHandle, Arc<Notify>, tokio::task::JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_DEPTH);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let retry_nudge = Arc::new(Notify::new());

    let actor = DeviceActor {
        addr,
        registry,
        backoff_config,
        connect_timeout,
        cmd_rx,
        event_tx: event_tx.clone(),
        state_tx,
        retry_nudge: Arc::clone(&retry_nudge),
    };
    let task = tokio::spawn(actor.run());

    let handle = SessionHandle {
        addr,
        cmd_tx,
        event_tx,
        state_rx,
    };
    (handle, retry_nudge, task)
}

impl DeviceActor {
    fn publish_state(&self, state: ConnectionState) {
        self.registry.set_connection_state(self.addr, state);
        let _ = self.state_tx.send(state);
    }

    async fn run(mut self) {
        let mut backoff = Backoff::new(&self.backoff_config);
        let mut consecutive_failures: u32 = 0;

        loop {
            self.publish_state(ConnectionState::Connecting);
            match self.establish().await {
                Ok((framed, session_id)) => {
                    info!(device = %self.addr, session_id, "Session established");
                    consecutive_failures = 0;
                    backoff.reset();
                    self.publish_state(ConnectionState::Connected);

                    match self.serve(framed, session_id).await {
                        ServeExit::Shutdown => {
                            self.publish_state(ConnectionState::Disconnected);
                            return;
                        }
                        ServeExit::Disconnected => {
                            self.publish_state(ConnectionState::Disconnected);
                        }
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    debug!(
                        device = %self.addr,
                        consecutive_failures,
                        error = %e,
                        "Connection attempt failed"
                    );

                    if consecutive_failures >= self.backoff_config.fault_threshold {
                        if consecutive_failures == self.backoff_config.fault_threshold {
                            warn!(device = %self.addr, "Device marked faulted");
                        }
                        self.publish_state(ConnectionState::Faulted);
                        if !self.wait_for_probe().await {
                            return;
                        }
                    } else if !self.wait_rejecting_commands(backoff.next()).await {
                        return;
                    }
                }
            }
        }
    }

    /// Open the TCP connection and run the session handshake.
    async fn establish(&self) -> Result<(Framed<TcpStream, ZkCodec>, u32)> {
        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect(self.addr.socket_addr()),
        )
        .await
        .map_err(|_| Error::unreachable(self.addr))?
        .map_err(|_| Error::unreachable(self.addr))?;

        // Access decisions ride on this socket; never batch small writes.
        if let Err(e) = stream.set_nodelay(true) {
            warn!(device = %self.addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let mut framed = Framed::new(stream, ZkCodec::new());
        framed.send(ZkRequest::Connect.into_frame(0, 0)).await?;

        let handshake = async {
            loop {
                match framed.next().await {
                    Some(Ok(frame)) => {
                        if let FrameClass::Reply(_) = classify(frame.command) {
                            return biogate_protocol::session_id(&frame);
                        }
                        // Panels may flush queued notifications first.
                        trace!(device = %self.addr, command = frame.command, "Skipping pre-handshake frame");
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Err(Error::unreachable(self.addr)),
                }
            }
        };
        let session_id = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| Error::Timeout {
                duration_ms: self.connect_timeout.as_millis() as u64,
            })??;

        Ok((framed, session_id))
    }

    /// Serve one live connection until it fails or the handles go away.
    async fn serve(
        &mut self,
        mut framed: Framed<TcpStream, ZkCodec>,
        session_id: u32,
    ) -> ServeExit {
        let mut next_reply_id: u16 = 1;
        let mut pending: HashMap<u16, oneshot::Sender<Result<ZkFrame>>> = HashMap::new();

        loop {
            tokio::select! {
                maybe_cmd = self.cmd_rx.recv() => match maybe_cmd {
                    None => {
                        // Last handle dropped; leave the session politely.
                        let _ = framed.send(ZkRequest::Exit.into_frame(0, session_id)).await;
                        return ServeExit::Shutdown;
                    }
                    Some(SessionCommand { request, reply }) => {
                        let reply_id = next_reply_id;
                        next_reply_id = next_reply_id.checked_add(1).unwrap_or(1);

                        trace!(device = %self.addr, ?request, reply_id, "Sending command");
                        if let Err(e) = framed.send(request.into_frame(reply_id, session_id)).await {
                            warn!(device = %self.addr, error = %e, "Send failed; resetting session");
                            let _ = reply.send(Err(Error::unreachable(self.addr)));
                            Self::fail_pending(&mut pending, self.addr);
                            return ServeExit::Disconnected;
                        }
                        pending.insert(reply_id, reply);
                    }
                },
                maybe_frame = framed.next() => match maybe_frame {
                    Some(Ok(frame)) => self.dispatch_frame(frame, &mut pending),
                    Some(Err(e)) => {
                        // Malformed bytes poison the framing; reset the session.
                        warn!(device = %self.addr, error = %e, "Protocol error; resetting session");
                        Self::fail_pending(&mut pending, self.addr);
                        return ServeExit::Disconnected;
                    }
                    None => {
                        debug!(device = %self.addr, "Peer closed connection");
                        Self::fail_pending(&mut pending, self.addr);
                        return ServeExit::Disconnected;
                    }
                },
            }
        }
    }

    fn dispatch_frame(
        &self,
        frame: ZkFrame,
        pending: &mut HashMap<u16, oneshot::Sender<Result<ZkFrame>>>,
    ) {
        match classify(frame.command) {
            FrameClass::Reply(_) => {
                if let Some(reply) = pending.remove(&frame.reply_id) {
                    // Caller may have timed out and dropped the receiver.
                    let _ = reply.send(Ok(frame));
                } else {
                    debug!(device = %self.addr, reply_id = frame.reply_id, "Reply with no waiting caller");
                }
            }
            FrameClass::Event(_) => {
                self.registry.mark_seen(self.addr);
                match InboundEvent::from_frame(&frame) {
                    Ok(event) => {
                        trace!(device = %self.addr, ?event, "Notification");
                        let _ = self.event_tx.send(event);
                    }
                    Err(e) => warn!(device = %self.addr, error = %e, "Bad notification payload"),
                }
            }
            FrameClass::Command(_) | FrameClass::Unknown(_) => {
                warn!(device = %self.addr, command = frame.command, "Unexpected frame from panel");
            }
        }
    }

    fn fail_pending(
        pending: &mut HashMap<u16, oneshot::Sender<Result<ZkFrame>>>,
        addr: DeviceAddr,
    ) {
        for (_, reply) in pending.drain() {
            let _ = reply.send(Err(Error::unreachable(addr)));
        }
    }

    /// Sleep out a backoff delay, failing queued commands immediately
    /// instead of letting them ride the queue into their own timeouts.
    ///
    /// Returns `false` when all handles are gone and the actor should exit.
    async fn wait_rejecting_commands(&mut self, delay: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return true,
                maybe_cmd = self.cmd_rx.recv() => match maybe_cmd {
                    None => return false,
                    Some(SessionCommand { reply, .. }) => {
                        let _ = reply.send(Err(Error::unreachable(self.addr)));
                    }
                },
            }
        }
    }

    /// Faulted: wait for the watchdog's nudge or the probe interval.
    ///
    /// Returns `false` when all handles are gone and the actor should exit.
    async fn wait_for_probe(&mut self) -> bool {
        let probe_interval = self.backoff_config.probe_interval();
        let deadline = tokio::time::Instant::now() + probe_interval;
        loop {
            tokio::select! {
                _ = self.retry_nudge.notified() => {
                    debug!(device = %self.addr, "Watchdog nudge; retrying faulted device");
                    return true;
                }
                _ = tokio::time::sleep_until(deadline) => return true,
                maybe_cmd = self.cmd_rx.recv() => match maybe_cmd {
                    None => return false,
                    Some(SessionCommand { reply, .. }) => {
                        let _ = reply.send(Err(Error::unreachable(self.addr)));
                    }
                },
            }
        }
    }
}
