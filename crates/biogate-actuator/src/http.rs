//! IP relay boards driven by HTTP commands.

use crate::RelayActuator;
use biogate_core::{DeviceAddr, Error, Result};
use std::time::Duration;
use tracing::{debug, warn};

/// Relay board reachable at `http://<addr>/relay/<port>/{on,off}`.
///
/// These boards time the pulse themselves: the `on` command arms the
/// configured hardware duration, so no follow-up `off` is issued on the
/// grant path.
#[derive(Debug)]
pub struct HttpRelay {
    client: reqwest::Client,
    base: String,
    relay_port: u8,
}

impl HttpRelay {
    /// Build a relay client with the acknowledgment timeout applied to
    /// every request.
    ///
    /// # Errors
    /// `Config` when the underlying HTTP client cannot be constructed.
    pub fn new(addr: DeviceAddr, relay_port: u8, ack_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(ack_timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP relay client: {e}")))?;
        Ok(HttpRelay {
            client,
            base: format!("http://{addr}/relay/{relay_port}"),
            relay_port,
        })
    }

    async fn command(&self, action: &str) -> Result<()> {
        let url = format!("{}/{action}", self.base);
        debug!(%url, "Relay command");
        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::actuation(format!("Relay acknowledgment timeout: {url}"))
            } else {
                Error::actuation(format!("Relay request failed: {e}"))
            }
        })?;
        if !response.status().is_success() {
            warn!(status = %response.status(), %url, "Relay rejected command");
            return Err(Error::actuation(format!(
                "Relay returned {} for {url}",
                response.status()
            )));
        }
        Ok(())
    }
}

impl RelayActuator for HttpRelay {
    async fn open(&mut self, duration: Duration) -> Result<()> {
        debug!(
            relay_port = self.relay_port,
            duration_secs = duration.as_secs(),
            "Opening relay over HTTP"
        );
        // The board's own timer ends the pulse; `duration` is configured
        // on the board and logged here for the audit trail only.
        self.command("on").await
    }

    async fn close(&mut self) -> Result<()> {
        self.command("off").await
    }
}
