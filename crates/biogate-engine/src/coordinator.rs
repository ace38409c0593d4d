//! Coordinator facade: wiring and the exposed application surface.

use crate::engine::{AccessDecision, AccessEngine};
use crate::external::MembershipValidity;
use crate::log::{EventFilter, EventLog};
use biogate_actuator::ActuatorPool;
use biogate_core::{
    AccessEvent, AdminConfig, DeviceAddr, DeviceStatus, FingerIndex, FingerprintRecord, Result,
    UserId,
};
use biogate_directory::{FingerprintDirectory, PanelAudit};
use biogate_protocol::InboundEvent;
use biogate_registry::DeviceRegistry;
use biogate_transport::{DeviceTransport, SessionHandle, Watchdog};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Owner of the whole subsystem: registry, transport, directory, actuators
/// and engine, plus the per-panel consumer tasks.
///
/// The registry and engine are explicit, passed-down context rather than
/// globals, so tests assemble the same pieces around mock devices.
pub struct Coordinator<M: MembershipValidity + 'static> {
    registry: Arc<DeviceRegistry>,
    transport: Arc<DeviceTransport>,
    directory: Arc<FingerprintDirectory>,
    engine: Arc<AccessEngine<M, Arc<EventLog>>>,
    event_log: Arc<EventLog>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl<M: MembershipValidity + 'static> Coordinator<M> {
    /// Bring the subsystem up from configuration.
    ///
    /// Sessions for unreachable panels keep retrying in the background;
    /// startup only fails on configuration errors.
    ///
    /// # Errors
    /// Configuration errors: bad addresses, duplicate devices, bindings
    /// referencing unknown devices, malformed relay entries.
    pub async fn start(config: AdminConfig, membership: M) -> Result<Self> {
        let registry = Arc::new(DeviceRegistry::from_config(&config)?);
        let directory = Arc::new(FingerprintDirectory::new(
            config.enrollment,
            config.timeouts.command(),
        ));
        let actuators = Arc::new(ActuatorPool::from_config(
            &config.relays,
            config.timeouts.actuation_ack(),
        )?);
        let transport = Arc::new(DeviceTransport::new(
            Arc::clone(&registry),
            config.backoff,
            config.timeouts.command(),
        ));
        let event_log = Arc::new(EventLog::new());
        let engine = Arc::new(AccessEngine::new(
            Arc::clone(&directory),
            Arc::clone(&registry),
            actuators,
            membership,
            Arc::clone(&event_log),
            config.timeouts,
        ));

        let coordinator = Coordinator {
            registry,
            transport,
            directory,
            engine,
            event_log,
            tasks: Mutex::new(Vec::new()),
        };

        for addr in coordinator.registry.panels() {
            coordinator.attach_panel(addr).await;
        }

        let watchdog = Watchdog::new(
            Arc::clone(&coordinator.transport),
            config.backoff.probe_interval(),
        );
        coordinator.push_task(watchdog.spawn());

        info!(
            panels = coordinator.registry.panels().len(),
            "Access coordinator started"
        );
        Ok(coordinator)
    }

    /// Spawn the session and the event consumer for one panel.
    async fn attach_panel(&self, addr: DeviceAddr) {
        // A panel that is down at startup is not fatal: the session
        // supervises itself and the consumer starts receiving after the
        // first successful connect.
        if let Err(e) = self.transport.connect(addr).await {
            warn!(device = %addr, error = %e, "Panel not reachable at startup; will keep retrying");
        }
        let Ok(handle) = self.transport.handle(addr) else {
            return;
        };

        let engine = Arc::clone(&self.engine);
        let registry = Arc::clone(&self.registry);
        self.push_task(tokio::spawn(consume_panel(addr, handle, engine, registry)));
    }

    fn push_task(&self, task: tokio::task::JoinHandle<()>) {
        self.tasks.lock().expect("task list lock poisoned").push(task);
    }

    // ------------------------------------------------------------------
    // Exposed surface
    // ------------------------------------------------------------------

    /// Enroll a user's fingerprint on a panel.
    ///
    /// # Errors
    /// `UnknownDevice`, `DeviceUnreachable`, `QualityTooLow`,
    /// `DuplicateFinger` with actionable messages for the admin caller.
    pub async fn enroll_fingerprint(
        &self,
        user_id: UserId,
        device: DeviceAddr,
        finger_index: FingerIndex,
    ) -> Result<FingerprintRecord> {
        let link = self.transport.handle(device)?;
        self.directory.enroll(&link, user_id, finger_index).await
    }

    /// Manual access check against a panel, distinct from the live path.
    ///
    /// # Errors
    /// Transport errors talking to the panel.
    pub async fn verify_access(&self, device: DeviceAddr) -> Result<AccessDecision> {
        let link = self.transport.handle(device)?;
        self.engine.verify_access(&link).await
    }

    /// Connection state and last-seen for a device.
    ///
    /// # Errors
    /// `UnknownDevice` for unregistered addresses.
    pub fn device_status(&self, device: DeviceAddr) -> Result<DeviceStatus> {
        self.registry.status(device)
    }

    /// Query recorded access events.
    #[must_use]
    pub fn list_access_events(&self, filter: EventFilter) -> Vec<AccessEvent> {
        self.event_log.list(filter)
    }

    /// Directory-level deactivation of a fingerprint.
    ///
    /// # Errors
    /// `RecordNotFound` for unknown ids.
    pub fn deactivate_fingerprint(&self, id: Uuid) -> Result<()> {
        self.directory.deactivate(id)
    }

    /// Revoke a fingerprint: delete from its panel, then close the record.
    ///
    /// # Errors
    /// `RecordNotFound`, `DeviceUnreachable`; safe to retry.
    pub async fn revoke_fingerprint(&self, device: DeviceAddr, id: Uuid) -> Result<()> {
        let link = self.transport.handle(device)?;
        self.directory.revoke(&link, id).await
    }

    /// All fingerprint records for a user.
    #[must_use]
    pub fn fingerprints_for_user(&self, user_id: UserId) -> Vec<FingerprintRecord> {
        self.directory.records_for_user(user_id)
    }

    /// Compare a panel's template store against the directory.
    ///
    /// # Errors
    /// Transport errors talking to the panel.
    pub async fn audit_panel(&self, device: DeviceAddr) -> Result<PanelAudit> {
        let link = self.transport.handle(device)?;
        self.directory.audit_panel(&link).await
    }

    /// Import panel-recorded matches from the attendance log. Returns how
    /// many new events were recorded; already-imported entries are skipped.
    ///
    /// # Errors
    /// Transport errors talking to the panel.
    pub async fn sync_attendance(&self, device: DeviceAddr, limit: u32) -> Result<usize> {
        let link = self.transport.handle(device)?;
        let entries = self.directory.fetch_attendance(&link, limit).await?;
        let mut imported = 0;
        for (user_id, timestamp) in entries {
            if self.event_log.has_match(user_id, timestamp) {
                continue;
            }
            self.engine
                .record_imported_match(device, user_id, timestamp)
                .await;
            imported += 1;
        }
        info!(device = %device, imported, "Attendance sync complete");
        Ok(imported)
    }

    /// The registry, for admin registration and binding operations.
    #[must_use]
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Stop consumers, the watchdog and every device session.
    pub async fn shutdown(&self) {
        let tasks: Vec<_> = {
            let mut tasks = self.tasks.lock().expect("task list lock poisoned");
            tasks.drain(..).collect()
        };
        for task in tasks {
            task.abort();
        }
        self.transport.shutdown().await;
        info!("Access coordinator stopped");
    }
}

/// Consume one panel's notification stream.
///
/// Attempts for this panel run to completion before the next notification
/// is taken, which is what preserves per-device event order; concurrency
/// comes from every panel having its own consumer task.
async fn consume_panel<M: MembershipValidity>(
    addr: DeviceAddr,
    handle: SessionHandle,
    engine: Arc<AccessEngine<M, Arc<EventLog>>>,
    registry: Arc<DeviceRegistry>,
) {
    let mut events = handle.subscribe();
    loop {
        match events.recv().await {
            Ok(InboundEvent::Match { template_id, score }) => {
                debug!(device = %addr, %template_id, score, "Match notification");
                engine.handle_match(addr, template_id).await;
            }
            Ok(InboundEvent::NoMatch) => {
                engine.handle_no_match(addr).await;
            }
            Ok(InboundEvent::Heartbeat) => {
                registry.mark_seen(addr);
            }
            Ok(InboundEvent::FingerDown) => {
                trace!(device = %addr, "Finger down");
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                // Missed notifications are gone; anyone they concerned
                // will present their finger again.
                warn!(device = %addr, missed, "Consumer lagged behind notifications");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                debug!(device = %addr, "Session gone; consumer exiting");
                return;
            }
        }
    }
}
