//! Background watchdog for faulted devices.

use crate::DeviceTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Probe timeout; a faulted device that cannot accept a TCP connection
/// this fast is still down.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Periodically probes faulted devices and wakes their session actors.
///
/// A faulted session actor stops hammering its address and waits. The
/// watchdog owns the cheap part of recovery: a bare TCP connect probe at
/// the probe interval. When a probe succeeds, the actor is nudged and runs
/// its full handshake; on success the registry flips back to `Connected`
/// with no operator involved.
pub struct Watchdog {
    transport: Arc<DeviceTransport>,
    interval: Duration,
}

impl Watchdog {
    #[must_use]
    pub fn new(transport: Arc<DeviceTransport>, interval: Duration) -> Self {
        Watchdog {
            transport,
            interval,
        }
    }

    /// Spawn the watchdog loop. Runs until the returned task is aborted.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }

    /// Probe every faulted device once.
    async fn sweep(&self) {
        for addr in self.transport.registry().faulted() {
            debug!(device = %addr, "Probing faulted device");
            let reachable = tokio::time::timeout(
                PROBE_TIMEOUT,
                TcpStream::connect(addr.socket_addr()),
            )
            .await
            .is_ok_and(|result| result.is_ok());

            if reachable {
                info!(device = %addr, "Faulted device reachable again; nudging session");
                self.transport.nudge(addr);
            }
        }
    }
}
