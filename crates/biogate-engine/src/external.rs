//! Traits for the external collaborators this core consumes.

use biogate_core::{AccessEvent, MembershipState, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;

/// The membership query failed; the engine treats this as fail-closed.
#[derive(Debug, Error)]
#[error("Membership query unavailable: {reason}")]
pub struct MembershipError {
    pub reason: String,
}

impl MembershipError {
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        MembershipError {
            reason: reason.into(),
        }
    }
}

/// External membership-validity query.
///
/// Implemented outside this core against the application's data store. The
/// engine wraps every call in its own timeout, so implementations need not
/// bound their own latency.
///
/// Declared with an explicit `Send` future (rather than `async fn` sugar)
/// because the coordinator awaits it inside spawned consumer tasks;
/// implementations still just write `async fn check`.
pub trait MembershipValidity: Send + Sync {
    /// Is this user's membership currently active?
    ///
    /// # Errors
    /// [`MembershipError`] when the answer cannot be produced; the engine
    /// denies access in that case, never grants.
    fn check(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<MembershipState, MembershipError>> + Send;
}

/// External append-only event store.
///
/// At-least-once delivery is acceptable. The engine bounds every append
/// with a timeout and drops the event with a warning when the sink is
/// slow, so a struggling store can never hold a turnstile closed.
#[allow(async_fn_in_trait)]
pub trait EventSink: Send + Sync {
    /// Persist one access event.
    ///
    /// # Errors
    /// Any error is logged and swallowed by the engine.
    async fn append(&self, event: &AccessEvent) -> biogate_core::Result<()>;
}

impl<S: EventSink> EventSink for Arc<S> {
    async fn append(&self, event: &AccessEvent) -> biogate_core::Result<()> {
        S::append(self, event).await
    }
}

/// Scriptable membership source for tests.
///
/// Unlisted users answer `Expired`. The unavailable flag makes every query
/// fail, and an optional delay simulates a slow backend for timeout tests.
#[derive(Debug, Default)]
pub struct MockMembership {
    states: Mutex<HashMap<UserId, MembershipState>>,
    unavailable: AtomicBool,
    delay: Mutex<Option<Duration>>,
    queries: AtomicU32,
}

impl MockMembership {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_state(&self, user_id: UserId, state: MembershipState) {
        self.states
            .lock()
            .expect("mock membership lock poisoned")
            .insert(user_id, state);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("mock membership lock poisoned") = Some(delay);
    }

    /// Number of queries served, for asserting short-circuit behavior.
    #[must_use]
    pub fn query_count(&self) -> u32 {
        self.queries.load(Ordering::SeqCst)
    }
}

impl MembershipValidity for Arc<MockMembership> {
    async fn check(&self, user_id: UserId) -> Result<MembershipState, MembershipError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().expect("mock membership lock poisoned");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MembershipError::unavailable("mock set unavailable"));
        }
        Ok(self
            .states
            .lock()
            .expect("mock membership lock poisoned")
            .get(&user_id)
            .copied()
            .unwrap_or(MembershipState::Expired))
    }
}
