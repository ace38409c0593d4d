//! Relay on a serial line.

use crate::RelayActuator;
use biogate_core::{Error, Result};
use std::io::{BufRead, BufReader, Write};
use std::time::Duration;
use tracing::debug;

/// Relay controller on a serial line speaking the `OPEN:<secs>` /
/// `CLOSE` line protocol, answering `OK` on success.
///
/// The port is opened per command: pulses are rare (one per granted
/// access), and a held file descriptor would go stale whenever the USB
/// adapter re-enumerates.
#[derive(Debug, Clone)]
pub struct SerialRelay {
    path: String,
    baud_rate: u32,
    ack_timeout: Duration,
}

impl SerialRelay {
    #[must_use]
    pub fn new(path: impl Into<String>, baud_rate: u32, ack_timeout: Duration) -> Self {
        SerialRelay {
            path: path.into(),
            baud_rate,
            ack_timeout,
        }
    }

    /// Run one command/response exchange on the blocking pool.
    async fn exchange(&self, command: String) -> Result<()> {
        let path = self.path.clone();
        let baud_rate = self.baud_rate;
        let ack_timeout = self.ack_timeout;

        let outcome = tokio::task::spawn_blocking(move || -> Result<()> {
            let port = serialport::new(&path, baud_rate)
                .timeout(ack_timeout)
                .open()
                .map_err(|e| Error::actuation(format!("Serial open {path}: {e}")))?;

            let mut writer = port
                .try_clone()
                .map_err(|e| Error::actuation(format!("Serial clone {path}: {e}")))?;
            writer
                .write_all(command.as_bytes())
                .map_err(|e| Error::actuation(format!("Serial write {path}: {e}")))?;

            let mut reader = BufReader::new(port);
            let mut line = String::new();
            reader
                .read_line(&mut line)
                .map_err(|e| Error::actuation(format!("Serial read {path}: {e}")))?;
            if line.contains("OK") {
                Ok(())
            } else {
                Err(Error::actuation(format!(
                    "Relay answered {:?} instead of OK",
                    line.trim()
                )))
            }
        })
        .await;

        outcome.map_err(|e| Error::actuation(format!("Serial task failed: {e}")))?
    }
}

impl RelayActuator for SerialRelay {
    async fn open(&mut self, duration: Duration) -> Result<()> {
        debug!(
            path = %self.path,
            duration_secs = duration.as_secs(),
            "Opening relay over serial"
        );
        self.exchange(format!("OPEN:{}\n", duration.as_secs())).await
    }

    async fn close(&mut self) -> Result<()> {
        self.exchange("CLOSE\n".to_string()).await
    }
}
