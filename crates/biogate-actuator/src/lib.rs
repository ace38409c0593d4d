//! Turnstile actuation over interchangeable physical transports.
//!
//! A relay is driven over one of three transports, selected per device in
//! configuration: an IP relay board answering HTTP commands, a relay on a
//! serial line, or a bare controller on a raw TCP socket. All three satisfy
//! the same [`RelayActuator`] capability, so the decision engine never
//! knows which wire the pulse went out on.
//!
//! `open` blocks up to a short acknowledgment timeout where the transport
//! has an acknowledgment at all. The open duration is enforced by the relay
//! hardware itself; this crate never schedules a close to end a pulse.

pub mod devices;
pub mod http;
pub mod mock;
pub mod pool;
pub mod serial;
pub mod tcp;

pub use devices::AnyActuator;
pub use http::HttpRelay;
pub use mock::{MockActuator, MockActuatorHandle};
pub use pool::ActuatorPool;
pub use serial::SerialRelay;
pub use tcp::TcpRelay;

use biogate_core::Result;
use std::time::Duration;

/// Capability of pulsing one relay open.
#[allow(async_fn_in_trait)]
pub trait RelayActuator: Send {
    /// Open the relay for `duration`.
    ///
    /// Blocks until the transport acknowledges, up to the configured
    /// acknowledgment timeout. Transports without acknowledgment return as
    /// soon as the command is sent; the relay hardware times the pulse.
    ///
    /// # Errors
    /// `Actuation` when the relay refuses or the acknowledgment times out.
    async fn open(&mut self, duration: Duration) -> Result<()>;

    /// Force the relay closed ahead of its timed pulse.
    ///
    /// # Errors
    /// `Actuation` on refusal or timeout.
    async fn close(&mut self) -> Result<()>;
}
