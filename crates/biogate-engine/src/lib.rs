//! Access decision engine and coordinator facade.
//!
//! This crate turns raw panel notifications into audited grant/deny
//! decisions. The [`engine`] module runs one ephemeral state machine per
//! match event; the [`coordinator`] wires configuration, transport,
//! directory, actuators and the engine into the surface the surrounding
//! application calls.
//!
//! External collaborators stay external: membership validity and durable
//! event storage are consumed through the traits in [`external`], never
//! implemented here beyond the in-memory [`log::EventLog`] default sink.

pub mod attempt;
pub mod coordinator;
pub mod engine;
pub mod external;
pub mod log;

pub use coordinator::Coordinator;
pub use engine::{AccessDecision, AccessEngine};
pub use external::{EventSink, MembershipError, MembershipValidity, MockMembership};
pub use log::{EventFilter, EventLog};

/// Install a `tracing` subscriber honoring `RUST_LOG`.
///
/// Convenience for binaries and examples; safe to call more than once
/// (later calls are no-ops).
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
