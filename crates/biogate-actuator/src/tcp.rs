//! Relay controller on a raw TCP socket.

use crate::RelayActuator;
use biogate_core::{DeviceAddr, Error, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

/// Relay speaking the `OPEN:<secs>` / `CLOSE` line protocol over TCP,
/// answering `OK` on success.
///
/// Connects per command; these controllers drop idle connections after a
/// few seconds anyway.
#[derive(Debug, Clone)]
pub struct TcpRelay {
    addr: DeviceAddr,
    ack_timeout: Duration,
}

impl TcpRelay {
    #[must_use]
    pub fn new(addr: DeviceAddr, ack_timeout: Duration) -> Self {
        TcpRelay { addr, ack_timeout }
    }

    async fn exchange(&self, command: String) -> Result<()> {
        let exchange = async {
            let stream = TcpStream::connect(self.addr.socket_addr())
                .await
                .map_err(|e| Error::actuation(format!("Relay connect {}: {e}", self.addr)))?;
            let mut stream = BufReader::new(stream);
            stream
                .get_mut()
                .write_all(command.as_bytes())
                .await
                .map_err(|e| Error::actuation(format!("Relay write {}: {e}", self.addr)))?;

            let mut line = String::new();
            stream
                .read_line(&mut line)
                .await
                .map_err(|e| Error::actuation(format!("Relay read {}: {e}", self.addr)))?;
            if line.contains("OK") {
                Ok(())
            } else {
                Err(Error::actuation(format!(
                    "Relay {} answered {:?} instead of OK",
                    self.addr,
                    line.trim()
                )))
            }
        };

        tokio::time::timeout(self.ack_timeout, exchange)
            .await
            .map_err(|_| {
                Error::actuation(format!(
                    "Relay acknowledgment timeout after {}ms",
                    self.ack_timeout.as_millis()
                ))
            })?
    }
}

impl RelayActuator for TcpRelay {
    async fn open(&mut self, duration: Duration) -> Result<()> {
        debug!(
            relay = %self.addr,
            duration_secs = duration.as_secs(),
            "Opening relay over TCP"
        );
        self.exchange(format!("OPEN:{}\n", duration.as_secs())).await
    }

    async fn close(&mut self) -> Result<()> {
        self.exchange("CLOSE\n".to_string()).await
    }
}
