//! Device transport: one supervised session per configured panel.
//!
//! This crate owns every live socket in the system. Each panel gets a
//! dedicated actor task ([`session`]) that maintains the connection,
//! translates notifications into typed events, and serves command calls.
//! [`DeviceTransport`] is the entry point that spawns and indexes those
//! actors; the [`watchdog`] restores faulted devices without operator
//! intervention.
//!
//! The transport writes connection state into the device registry and
//! nothing else: fingerprint records and access events are other crates'
//! business.

pub mod backoff;
pub mod mock;
pub mod session;
pub mod watchdog;

pub use session::{PanelLink, SessionHandle};
pub use watchdog::Watchdog;

use biogate_core::config::BackoffConfig;
use biogate_core::{DeviceAddr, DeviceKind, Error, Result};
use biogate_protocol::{InboundEvent, ZkFrame, ZkRequest};
use biogate_registry::DeviceRegistry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tracing::info;

struct DeviceRuntime {
    handle: SessionHandle,
    retry_nudge: Arc<Notify>,
    task: tokio::task::JoinHandle<()>,
}

/// Manager of all device sessions.
///
/// Shared via `Arc`; `connect` is idempotent, so callers can race to
/// connect the same panel and end up sharing one session.
pub struct DeviceTransport {
    registry: Arc<DeviceRegistry>,
    backoff: BackoffConfig,
    connect_timeout: Duration,
    sessions: Mutex<HashMap<DeviceAddr, DeviceRuntime>>,
}

impl DeviceTransport {
    #[must_use]
    pub fn new(
        registry: Arc<DeviceRegistry>,
        backoff: BackoffConfig,
        connect_timeout: Duration,
    ) -> Self {
        DeviceTransport {
            registry,
            backoff,
            connect_timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Open (or return the existing) session for a registered panel.
    ///
    /// The session is supervised: it reconnects with backoff on failure for
    /// the life of the process, so a handle stays valid across device
    /// restarts.
    ///
    /// # Errors
    /// `UnknownDevice` when the address is not registered as a panel;
    /// `DeviceUnreachable` when the first connection does not come up
    /// within the connect timeout (the background session keeps retrying).
    pub async fn connect(&self, addr: DeviceAddr) -> Result<SessionHandle> {
        let entry = self.registry.get(addr).ok_or_else(|| Error::UnknownDevice {
            device: addr.to_string(),
        })?;
        if entry.kind != DeviceKind::Panel {
            return Err(Error::Config(format!("{addr} is not a panel")));
        }

        let handle = {
            let mut sessions = self.sessions.lock().expect("session map lock poisoned");
            if let Some(runtime) = sessions.get(&addr) {
                // Idempotent: same session for everyone.
                return Ok(runtime.handle.clone());
            }
            let (handle, retry_nudge, task) = session::spawn_session(
                addr,
                Arc::clone(&self.registry),
                self.backoff,
                self.connect_timeout,
            );
            info!(device = %addr, "Spawned device session");
            sessions.insert(
                addr,
                DeviceRuntime {
                    handle: handle.clone(),
                    retry_nudge,
                    task,
                },
            );
            handle
        };

        handle.wait_connected(self.connect_timeout).await?;
        Ok(handle)
    }

    /// Handle for an already-spawned session.
    ///
    /// # Errors
    /// `UnknownDevice` when no session exists for the address.
    pub fn handle(&self, addr: DeviceAddr) -> Result<SessionHandle> {
        let sessions = self.sessions.lock().expect("session map lock poisoned");
        sessions
            .get(&addr)
            .map(|runtime| runtime.handle.clone())
            .ok_or_else(|| Error::UnknownDevice {
                device: addr.to_string(),
            })
    }

    /// Send one command over a device's session.
    ///
    /// # Errors
    /// Propagates `UnknownDevice`, `Timeout` and `DeviceUnreachable`.
    pub async fn request(
        &self,
        addr: DeviceAddr,
        request: ZkRequest,
        timeout: Duration,
    ) -> Result<ZkFrame> {
        self.handle(addr)?.request(request, timeout).await
    }

    /// Subscribe to a device's notification stream.
    ///
    /// # Errors
    /// `UnknownDevice` when no session exists for the address.
    pub fn subscribe(&self, addr: DeviceAddr) -> Result<broadcast::Receiver<InboundEvent>> {
        Ok(self.handle(addr)?.subscribe())
    }

    /// Wake a faulted device for an immediate reconnect attempt.
    pub(crate) fn nudge(&self, addr: DeviceAddr) {
        let sessions = self.sessions.lock().expect("session map lock poisoned");
        if let Some(runtime) = sessions.get(&addr) {
            runtime.retry_nudge.notify_one();
        }
    }

    /// Tear down all sessions.
    ///
    /// Dropping the handles closes each actor's command queue; actors send
    /// the session-exit command and stop on their own. Tasks that do not
    /// finish within the grace period are aborted.
    pub async fn shutdown(&self) {
        let runtimes: Vec<DeviceRuntime> = {
            let mut sessions = self.sessions.lock().expect("session map lock poisoned");
            sessions.drain().map(|(_, runtime)| runtime).collect()
        };
        for runtime in runtimes {
            let DeviceRuntime {
                handle, mut task, ..
            } = runtime;
            drop(handle);
            if tokio::time::timeout(Duration::from_millis(500), &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }
    }
}
