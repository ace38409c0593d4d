//! Per-attempt state machine.
//!
//! One [`Attempt`] value exists per match notification and lives only for
//! the duration of the decision; nothing is persisted. Transitions are
//! driven by the engine, but the decision itself ([`decide`]) is a pure
//! function over the resolved record and the membership outcome, so the
//! grant rules are testable without any I/O.
//!
//! Every path through the machine ends in exactly one [`Terminal`], and the
//! engine emits exactly one access event per terminal. The `match` in the
//! engine's drive loop is exhaustive, so adding a state without wiring its
//! transitions fails the build instead of dropping events.

use biogate_core::{
    AccessEventKind, DenialReason, FingerprintRecord, MembershipState, RelayBinding, TemplateId,
    UserId,
};
use chrono::{DateTime, Utc};

/// Result of the membership validity query, including failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipOutcome {
    State(MembershipState),
    /// The query failed or timed out. Fails closed: always a denial.
    Unreachable,
}

/// States of one access attempt.
#[derive(Debug)]
pub enum Attempt {
    /// A match notification arrived from a panel.
    Received { template_id: TemplateId },
    /// Looking the template up in the directory.
    Resolving { template_id: TemplateId },
    /// The directory knows this template.
    ResolvedUser { record: FingerprintRecord },
    /// The directory does not know this template.
    UnresolvedTemplate,
    /// Waiting on the external membership query.
    ValidatingMembership { record: FingerprintRecord },
    /// All inputs gathered; applying the grant rules.
    Deciding {
        record: FingerprintRecord,
        membership: MembershipOutcome,
    },
    /// Access is authorized; actuation may follow.
    Granted { record: FingerprintRecord },
    /// Access is refused.
    Denied {
        user_id: Option<UserId>,
        reason: DenialReason,
    },
    /// Pulsing the bound relay.
    Actuating {
        record: FingerprintRecord,
        binding: RelayBinding,
    },
    /// Finished; exactly one event is emitted from the terminal.
    Completed(Terminal),
}

/// Terminal outcome of an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminal {
    pub kind: AccessEventKind,
    pub user_id: Option<UserId>,
    pub reason: Option<DenialReason>,
}

impl Terminal {
    #[must_use]
    pub fn grant(user_id: UserId) -> Self {
        Terminal {
            kind: AccessEventKind::Grant,
            user_id: Some(user_id),
            reason: None,
        }
    }

    #[must_use]
    pub fn deny(user_id: Option<UserId>, reason: DenialReason) -> Self {
        Terminal {
            kind: AccessEventKind::Deny,
            user_id,
            reason: Some(reason),
        }
    }

    #[must_use]
    pub fn no_match() -> Self {
        Terminal {
            kind: AccessEventKind::NoMatch,
            user_id: None,
            reason: None,
        }
    }
}

/// Apply the grant rules to a resolved attempt.
///
/// Grant requires an Active membership AND a usable fingerprint record: a
/// directory-level deactivation blocks access independently of membership.
/// An unreachable membership check always denies.
#[must_use]
pub fn decide(record: FingerprintRecord, membership: MembershipOutcome, now: DateTime<Utc>) -> Attempt {
    let user_id = record.user_id;
    match membership {
        MembershipOutcome::Unreachable => Attempt::Denied {
            user_id: Some(user_id),
            reason: DenialReason::MembershipCheckFailed,
        },
        MembershipOutcome::State(MembershipState::Expired) => Attempt::Denied {
            user_id: Some(user_id),
            reason: DenialReason::MembershipExpired,
        },
        MembershipOutcome::State(MembershipState::Inactive) => Attempt::Denied {
            user_id: Some(user_id),
            reason: DenialReason::MembershipInactive,
        },
        MembershipOutcome::State(MembershipState::Active) => {
            if record.is_usable_at(now) {
                Attempt::Granted { record }
            } else {
                Attempt::Denied {
                    user_id: Some(user_id),
                    reason: DenialReason::FingerprintInactive,
                }
            }
        }
    }
}
