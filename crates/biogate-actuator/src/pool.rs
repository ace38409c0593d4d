//! Shared pool of configured actuators.

use crate::{AnyActuator, RelayActuator};
use biogate_core::config::RelayConfig;
use biogate_core::{DeviceAddr, Error, RelayBinding, Result, TurnstileCommand};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// One actuator per configured relay, shared behind per-relay locks.
///
/// The engine resolves a panel's binding and calls [`open`](Self::open);
/// pulses to different relays run concurrently, pulses to the same relay
/// serialize on its lock so a board never sees interleaved commands.
pub struct ActuatorPool {
    actuators: HashMap<DeviceAddr, Mutex<AnyActuator>>,
}

impl ActuatorPool {
    /// Build the pool from relay configuration.
    ///
    /// # Errors
    /// Propagates construction errors for any relay entry.
    pub fn from_config(relays: &[RelayConfig], ack_timeout: Duration) -> Result<Self> {
        let mut actuators = HashMap::new();
        for config in relays {
            let addr: DeviceAddr = config.addr.parse()?;
            actuators.insert(addr, Mutex::new(AnyActuator::from_config(config, ack_timeout)?));
        }
        Ok(ActuatorPool { actuators })
    }

    /// Pool with explicit actuators, used by tests.
    #[must_use]
    pub fn from_actuators(entries: Vec<(DeviceAddr, AnyActuator)>) -> Self {
        ActuatorPool {
            actuators: entries
                .into_iter()
                .map(|(addr, actuator)| (addr, Mutex::new(actuator)))
                .collect(),
        }
    }

    /// Execute one turnstile command against its bound relay.
    ///
    /// # Errors
    /// `UnknownDevice` when the binding names an unconfigured relay;
    /// `Actuation` from the transport.
    pub async fn open(&self, command: TurnstileCommand) -> Result<()> {
        let TurnstileCommand { binding, open_secs } = command;
        let actuator = self.get(binding)?;
        debug!(relay = %binding.relay, open_secs, "Actuating relay");
        let mut actuator = actuator.lock().await;
        actuator.open(Duration::from_secs(u64::from(open_secs))).await
    }

    /// Force a bound relay closed.
    ///
    /// # Errors
    /// `UnknownDevice` when the binding names an unconfigured relay;
    /// `Actuation` from the transport.
    pub async fn close(&self, binding: RelayBinding) -> Result<()> {
        let actuator = self.get(binding)?;
        let mut actuator = actuator.lock().await;
        actuator.close().await
    }

    fn get(&self, binding: RelayBinding) -> Result<&Mutex<AnyActuator>> {
        self.actuators
            .get(&binding.relay)
            .ok_or_else(|| Error::UnknownDevice {
                device: binding.relay.to_string(),
            })
    }
}
