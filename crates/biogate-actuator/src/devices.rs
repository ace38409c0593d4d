//! Enum dispatch over actuator implementations.
//!
//! Native `async fn` trait methods are not object-safe, so relay transports
//! are dispatched through an enum instead of `Box<dyn RelayActuator>`. The
//! selection comes from configuration, never from an inheritance hierarchy.

use crate::{HttpRelay, MockActuator, RelayActuator, SerialRelay, TcpRelay};
use biogate_core::config::{RelayConfig, RelayDialect};
use biogate_core::{DeviceAddr, Error, Result};
use std::time::Duration;

/// Any configured relay transport.
#[derive(Debug)]
pub enum AnyActuator {
    Http(HttpRelay),
    Serial(SerialRelay),
    Tcp(TcpRelay),
    Mock(MockActuator),
}

impl AnyActuator {
    /// Build the transport a relay's configuration selects.
    ///
    /// # Errors
    /// `Config` for malformed addresses or a serial relay without a path.
    pub fn from_config(config: &RelayConfig, ack_timeout: Duration) -> Result<Self> {
        let addr: DeviceAddr = config.addr.parse()?;
        match config.dialect {
            RelayDialect::Http => Ok(AnyActuator::Http(HttpRelay::new(
                addr,
                config.relay_port,
                ack_timeout,
            )?)),
            RelayDialect::Serial => {
                let path = config.serial_path.as_ref().ok_or_else(|| {
                    Error::Config(format!("Serial relay {addr} has no serial_path"))
                })?;
                Ok(AnyActuator::Serial(SerialRelay::new(
                    path.clone(),
                    config.baud_rate,
                    ack_timeout,
                )))
            }
            RelayDialect::Tcp => Ok(AnyActuator::Tcp(TcpRelay::new(addr, ack_timeout))),
        }
    }
}

impl RelayActuator for AnyActuator {
    async fn open(&mut self, duration: Duration) -> Result<()> {
        match self {
            AnyActuator::Http(relay) => relay.open(duration).await,
            AnyActuator::Serial(relay) => relay.open(duration).await,
            AnyActuator::Tcp(relay) => relay.open(duration).await,
            AnyActuator::Mock(relay) => relay.open(duration).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            AnyActuator::Http(relay) => relay.close().await,
            AnyActuator::Serial(relay) => relay.close().await,
            AnyActuator::Tcp(relay) => relay.close().await,
            AnyActuator::Mock(relay) => relay.close().await,
        }
    }
}
