//! The access decision engine.

use crate::attempt::{Attempt, MembershipOutcome, Terminal};
use crate::external::{EventSink, MembershipValidity};
use biogate_core::config::TimeoutConfig;
use biogate_core::{
    AccessEvent, AccessEventKind, DenialReason, DeviceAddr, Result, TemplateId, TurnstileCommand,
    UserId,
};
use biogate_actuator::ActuatorPool;
use biogate_directory::FingerprintDirectory;
use biogate_protocol::{VerifyOutcome, ZkRequest, parse_verify};
use biogate_registry::DeviceRegistry;
use biogate_transport::PanelLink;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

/// Definite outcome of one access attempt.
///
/// Every attempt completes with a grant or a denial plus reason, never an
/// "unknown"; transport and collaborator failures are folded into denials
/// before this value is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessDecision {
    pub granted: bool,
    pub user_id: Option<UserId>,
    pub reason: Option<DenialReason>,
    /// Sequence of the access event this decision emitted.
    pub sequence: u64,
}

/// Converts match notifications into grant/deny decisions and actuation.
///
/// One engine serves all panels; each call to [`handle_match`] runs one
/// ephemeral instance of the attempt state machine, so attempts from
/// different devices proceed concurrently with no global lock. The engine
/// reads the registry and directory and drives the actuator pool; it never
/// mutates registry state.
///
/// [`handle_match`]: AccessEngine::handle_match
pub struct AccessEngine<M, S> {
    directory: Arc<FingerprintDirectory>,
    registry: Arc<DeviceRegistry>,
    actuators: Arc<ActuatorPool>,
    membership: M,
    sink: S,
    timeouts: TimeoutConfig,
    sequence: AtomicU64,
}

impl<M: MembershipValidity, S: EventSink> AccessEngine<M, S> {
    #[must_use]
    pub fn new(
        directory: Arc<FingerprintDirectory>,
        registry: Arc<DeviceRegistry>,
        actuators: Arc<ActuatorPool>,
        membership: M,
        sink: S,
        timeouts: TimeoutConfig,
    ) -> Self {
        AccessEngine {
            directory,
            registry,
            actuators,
            membership,
            sink,
            timeouts,
            sequence: AtomicU64::new(0),
        }
    }

    /// Run the full attempt state machine for one match notification.
    ///
    /// Emits exactly one access event whatever path the attempt takes.
    pub async fn handle_match(
        &self,
        device: DeviceAddr,
        template_id: TemplateId,
    ) -> AccessDecision {
        let mut attempt = Attempt::Received { template_id };

        let terminal = loop {
            attempt = match attempt {
                Attempt::Received { template_id } => Attempt::Resolving { template_id },

                Attempt::Resolving { template_id } => {
                    match self.directory.lookup(device, template_id) {
                        Ok(record) => Attempt::ResolvedUser { record },
                        Err(_) => Attempt::UnresolvedTemplate,
                    }
                }

                Attempt::UnresolvedTemplate => Attempt::Completed(Terminal::deny(
                    None,
                    DenialReason::UnknownFingerprint,
                )),

                Attempt::ResolvedUser { record } => Attempt::ValidatingMembership { record },

                Attempt::ValidatingMembership { record } => {
                    let membership = self.check_membership(record.user_id).await;
                    Attempt::Deciding { record, membership }
                }

                Attempt::Deciding { record, membership } => {
                    crate::attempt::decide(record, membership, Utc::now())
                }

                Attempt::Denied { user_id, reason } => {
                    Attempt::Completed(Terminal::deny(user_id, reason))
                }

                Attempt::Granted { record } => {
                    self.directory.touch_last_used(record.id, Utc::now());
                    match self.registry.resolve(device) {
                        Ok(binding) => Attempt::Actuating { record, binding },
                        Err(_) => {
                            // Log-only access point: the grant stands with
                            // no physical action.
                            debug!(device = %device, user_id = %record.user_id, "Grant on unbound panel");
                            Attempt::Completed(Terminal::grant(record.user_id))
                        }
                    }
                }

                Attempt::Actuating { record, binding } => {
                    let command = TurnstileCommand {
                        binding,
                        open_secs: binding.duration_secs,
                    };
                    if let Err(e) = self.actuators.open(command).await {
                        // The person was authorized; a relay fault is a
                        // separate incident and never flips the decision.
                        error!(
                            device = %device,
                            relay = %binding.relay,
                            error = %e,
                            "Actuation failed after grant"
                        );
                    }
                    Attempt::Completed(Terminal::grant(record.user_id))
                }

                Attempt::Completed(terminal) => break terminal,
            };
        };

        self.complete(device, terminal).await
    }

    /// Record a panel-reported no-match.
    pub async fn handle_no_match(&self, device: DeviceAddr) -> AccessDecision {
        self.complete(device, Terminal::no_match()).await
    }

    /// Manual trigger: ask the panel to identify a finger now and run the
    /// decision on the result. Used for admin testing, distinct from the
    /// live notification path.
    ///
    /// # Errors
    /// Transport errors talking to the panel; the decision itself never
    /// errors.
    pub async fn verify_access<L: PanelLink>(&self, link: &L) -> Result<AccessDecision> {
        let reply = link
            .request(
                ZkRequest::Verify { user_id: 0 },
                self.timeouts.command(),
            )
            .await?;
        match parse_verify(&reply)? {
            VerifyOutcome::Match { template_id, score } => {
                debug!(device = %link.addr(), template_id, score, "Manual verification matched");
                Ok(self
                    .handle_match(link.addr(), TemplateId::new(template_id))
                    .await)
            }
            VerifyOutcome::NoMatch => Ok(self.handle_no_match(link.addr()).await),
        }
    }

    /// Record a match imported from a panel's attendance log.
    ///
    /// Deduplication against already-imported entries is the caller's
    /// business; this always appends.
    pub async fn record_imported_match(
        &self,
        device: DeviceAddr,
        user_id: UserId,
        timestamp: DateTime<Utc>,
    ) -> AccessEvent {
        let event = AccessEvent {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            user_id: Some(user_id),
            device,
            kind: AccessEventKind::Match,
            denial_reason: None,
            timestamp,
        };
        self.append(&event).await;
        event
    }

    async fn check_membership(&self, user_id: UserId) -> MembershipOutcome {
        let budget = self.timeouts.membership();
        match tokio::time::timeout(budget, self.membership.check(user_id)).await {
            Ok(Ok(state)) => MembershipOutcome::State(state),
            Ok(Err(e)) => {
                warn!(user_id = %user_id, error = %e, "Membership query failed");
                MembershipOutcome::Unreachable
            }
            Err(_) => {
                warn!(
                    user_id = %user_id,
                    budget_ms = budget.as_millis() as u64,
                    "Membership query timed out"
                );
                MembershipOutcome::Unreachable
            }
        }
    }

    /// Emit the single terminal event and fold it into a decision.
    async fn complete(&self, device: DeviceAddr, terminal: Terminal) -> AccessDecision {
        let event = AccessEvent {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            user_id: terminal.user_id,
            device,
            kind: terminal.kind,
            denial_reason: terminal.reason,
            timestamp: Utc::now(),
        };

        match event.kind {
            AccessEventKind::Grant => {
                info!(device = %device, user_id = ?event.user_id, "Access granted");
            }
            AccessEventKind::Deny => {
                info!(
                    device = %device,
                    user_id = ?event.user_id,
                    reason = ?event.denial_reason,
                    "Access denied"
                );
            }
            AccessEventKind::NoMatch => {
                debug!(device = %device, "No-match reported");
            }
            AccessEventKind::Match => {}
        }

        self.append(&event).await;

        AccessDecision {
            granted: event.kind == AccessEventKind::Grant,
            user_id: event.user_id,
            reason: event.denial_reason,
            sequence: event.sequence,
        }
    }

    /// Append with a bounded budget; a slow or failing sink drops the
    /// event with a warning rather than holding the attempt open.
    async fn append(&self, event: &AccessEvent) {
        match tokio::time::timeout(self.timeouts.sink(), self.sink.append(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(sequence = event.sequence, error = %e, "Event sink rejected event");
            }
            Err(_) => {
                warn!(sequence = event.sequence, "Event sink timed out; event dropped");
            }
        }
    }
}
