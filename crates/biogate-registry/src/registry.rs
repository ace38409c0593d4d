use biogate_core::{
    AdminConfig, ConnectionState, DeviceAddr, DeviceKind, DeviceStatus, Error, ProtocolDialect,
    RelayBinding, Result,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info};

/// One registered device.
#[derive(Debug, Clone)]
pub struct DeviceEntry {
    pub addr: DeviceAddr,
    pub kind: DeviceKind,
    pub dialect: ProtocolDialect,
    pub state: ConnectionState,
    pub last_seen: Option<DateTime<Utc>>,
    /// Output channel on multi-channel relay boards; 1 for panels.
    pub relay_port: u8,
}

impl DeviceEntry {
    fn new(addr: DeviceAddr, kind: DeviceKind, dialect: ProtocolDialect, relay_port: u8) -> Self {
        DeviceEntry {
            addr,
            kind,
            dialect,
            state: ConnectionState::Disconnected,
            last_seen: None,
            relay_port,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    devices: HashMap<DeviceAddr, DeviceEntry>,
    bindings: HashMap<DeviceAddr, RelayBinding>,
}

/// Registry of configured devices and panel-to-relay bindings.
///
/// Cheap to share: wrap in `Arc` and hand clones to the transport, the
/// engine and the admin surface. Interior locking uses a plain `RwLock`
/// because no critical section ever awaits.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    inner: RwLock<Inner>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from startup configuration.
    ///
    /// # Errors
    /// Returns the first registration or binding error, so a config typo
    /// fails startup instead of silently dropping a device.
    pub fn from_config(config: &AdminConfig) -> Result<Self> {
        let registry = Self::new();
        for panel in &config.panels {
            let addr: DeviceAddr = panel.addr.parse()?;
            registry.register(addr, DeviceKind::Panel, ProtocolDialect::Zk)?;
        }
        for relay in &config.relays {
            let addr: DeviceAddr = relay.addr.parse()?;
            registry.register_relay(addr, relay.dialect.into(), relay.relay_port)?;
        }
        for binding in &config.bindings {
            let panel: DeviceAddr = binding.panel.parse()?;
            let relay: DeviceAddr = binding.relay.parse()?;
            registry.bind(panel, relay, binding.duration_secs)?;
        }
        Ok(registry)
    }

    /// Register a device.
    ///
    /// # Errors
    /// Fails with `DuplicateAddress` when the address is already taken.
    pub fn register(
        &self,
        addr: DeviceAddr,
        kind: DeviceKind,
        dialect: ProtocolDialect,
    ) -> Result<()> {
        self.register_entry(DeviceEntry::new(addr, kind, dialect, 1))
    }

    /// Register a relay with its output channel.
    ///
    /// # Errors
    /// Fails with `DuplicateAddress` when the address is already taken.
    pub fn register_relay(
        &self,
        addr: DeviceAddr,
        dialect: ProtocolDialect,
        relay_port: u8,
    ) -> Result<()> {
        self.register_entry(DeviceEntry::new(addr, DeviceKind::Relay, dialect, relay_port))
    }

    fn register_entry(&self, entry: DeviceEntry) -> Result<()> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if inner.devices.contains_key(&entry.addr) {
            return Err(Error::DuplicateAddress {
                device: entry.addr.to_string(),
            });
        }
        info!(device = %entry.addr, kind = %entry.kind, "Registered device");
        inner.devices.insert(entry.addr, entry);
        Ok(())
    }

    /// Remove a device and any binding that references it.
    ///
    /// # Errors
    /// Fails with `UnknownDevice` when the address is not registered.
    pub fn deregister(&self, addr: DeviceAddr) -> Result<()> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if inner.devices.remove(&addr).is_none() {
            return Err(Error::UnknownDevice {
                device: addr.to_string(),
            });
        }
        inner
            .bindings
            .retain(|panel, binding| *panel != addr && binding.relay != addr);
        info!(device = %addr, "Deregistered device");
        Ok(())
    }

    /// Bind a panel to the relay its grants actuate.
    ///
    /// Rebinding an already-bound panel replaces the old binding.
    ///
    /// # Errors
    /// Fails with `UnknownDevice` when either end is not registered.
    pub fn bind(&self, panel: DeviceAddr, relay: DeviceAddr, duration_secs: u32) -> Result<()> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        let relay_entry = inner.devices.get(&relay).ok_or_else(|| Error::UnknownDevice {
            device: relay.to_string(),
        })?;
        let relay_port = match relay_entry.kind {
            DeviceKind::Relay => relay_entry.relay_port,
            DeviceKind::Panel => {
                return Err(Error::Config(format!("{relay} is a panel, not a relay")));
            }
        };
        if !inner.devices.contains_key(&panel) {
            return Err(Error::UnknownDevice {
                device: panel.to_string(),
            });
        }
        inner.bindings.insert(
            panel,
            RelayBinding {
                relay,
                relay_port,
                duration_secs,
            },
        );
        info!(panel = %panel, relay = %relay, duration_secs, "Bound panel to relay");
        Ok(())
    }

    /// Remove a panel's relay binding, making it a log-only access point.
    ///
    /// # Errors
    /// Fails with `NoBindingConfigured` when the panel has no binding.
    pub fn unbind(&self, panel: DeviceAddr) -> Result<()> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if inner.bindings.remove(&panel).is_none() {
            return Err(Error::NoBindingConfigured {
                device: panel.to_string(),
            });
        }
        info!(panel = %panel, "Unbound panel");
        Ok(())
    }

    /// Resolve the relay binding for a panel. Hot path.
    ///
    /// # Errors
    /// Fails with `NoBindingConfigured` for log-only panels.
    pub fn resolve(&self, panel: DeviceAddr) -> Result<RelayBinding> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .bindings
            .get(&panel)
            .copied()
            .ok_or_else(|| Error::NoBindingConfigured {
                device: panel.to_string(),
            })
    }

    /// Update a device's connection state. Called only by the transport.
    pub fn set_connection_state(&self, addr: DeviceAddr, state: ConnectionState) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if let Some(entry) = inner.devices.get_mut(&addr) {
            if entry.state != state {
                debug!(device = %addr, from = %entry.state, to = %state, "Connection state changed");
            }
            entry.state = state;
            if state.is_connected() {
                entry.last_seen = Some(Utc::now());
            }
        }
    }

    /// Refresh a device's last-seen timestamp (heartbeats, traffic).
    pub fn mark_seen(&self, addr: DeviceAddr) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if let Some(entry) = inner.devices.get_mut(&addr) {
            entry.last_seen = Some(Utc::now());
        }
    }

    /// Reachability snapshot for one device.
    ///
    /// # Errors
    /// Fails with `UnknownDevice` when the address is not registered.
    pub fn status(&self, addr: DeviceAddr) -> Result<DeviceStatus> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .devices
            .get(&addr)
            .map(|entry| DeviceStatus {
                state: entry.state,
                last_seen: entry.last_seen,
            })
            .ok_or_else(|| Error::UnknownDevice {
                device: addr.to_string(),
            })
    }

    /// Snapshot of one device entry.
    pub fn get(&self, addr: DeviceAddr) -> Option<DeviceEntry> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.devices.get(&addr).cloned()
    }

    /// Addresses of all registered panels.
    #[must_use]
    pub fn panels(&self) -> Vec<DeviceAddr> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .devices
            .values()
            .filter(|entry| entry.kind == DeviceKind::Panel)
            .map(|entry| entry.addr)
            .collect()
    }

    /// Addresses of devices currently marked faulted, for the watchdog.
    #[must_use]
    pub fn faulted(&self) -> Vec<DeviceAddr> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .devices
            .values()
            .filter(|entry| entry.state == ConnectionState::Faulted)
            .map(|entry| entry.addr)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panel_addr() -> DeviceAddr {
        "192.168.0.50:4370".parse().unwrap()
    }

    fn relay_addr() -> DeviceAddr {
        "192.168.0.60:80".parse().unwrap()
    }

    fn registry_with_pair() -> DeviceRegistry {
        let registry = DeviceRegistry::new();
        registry
            .register(panel_addr(), DeviceKind::Panel, ProtocolDialect::Zk)
            .unwrap();
        registry
            .register(relay_addr(), DeviceKind::Relay, ProtocolDialect::HttpRelay)
            .unwrap();
        registry
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = registry_with_pair();
        let result = registry.register(panel_addr(), DeviceKind::Panel, ProtocolDialect::Zk);
        assert!(matches!(result, Err(Error::DuplicateAddress { .. })));
    }

    #[test]
    fn test_bind_and_resolve() {
        let registry = registry_with_pair();
        registry.bind(panel_addr(), relay_addr(), 5).unwrap();

        let binding = registry.resolve(panel_addr()).unwrap();
        assert_eq!(binding.relay, relay_addr());
        assert_eq!(binding.duration_secs, 5);
    }

    #[test]
    fn test_resolve_unbound_panel() {
        let registry = registry_with_pair();
        let result = registry.resolve(panel_addr());
        assert!(matches!(result, Err(Error::NoBindingConfigured { .. })));
    }

    #[test]
    fn test_bind_unknown_device() {
        let registry = DeviceRegistry::new();
        let result = registry.bind(panel_addr(), relay_addr(), 5);
        assert!(matches!(result, Err(Error::UnknownDevice { .. })));
    }

    #[test]
    fn test_bind_to_panel_rejected() {
        let registry = DeviceRegistry::new();
        let other_panel: DeviceAddr = "192.168.0.51:4370".parse().unwrap();
        registry
            .register(panel_addr(), DeviceKind::Panel, ProtocolDialect::Zk)
            .unwrap();
        registry
            .register(other_panel, DeviceKind::Panel, ProtocolDialect::Zk)
            .unwrap();

        let result = registry.bind(panel_addr(), other_panel, 5);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_independent_bindings_per_panel() {
        let registry = registry_with_pair();
        let second_panel: DeviceAddr = "192.168.0.51:4370".parse().unwrap();
        let second_relay: DeviceAddr = "192.168.0.61:80".parse().unwrap();
        registry
            .register(second_panel, DeviceKind::Panel, ProtocolDialect::Zk)
            .unwrap();
        registry
            .register(second_relay, DeviceKind::Relay, ProtocolDialect::TcpRelay)
            .unwrap();

        registry.bind(panel_addr(), relay_addr(), 5).unwrap();
        registry.bind(second_panel, second_relay, 8).unwrap();

        assert_eq!(registry.resolve(panel_addr()).unwrap().relay, relay_addr());
        assert_eq!(registry.resolve(second_panel).unwrap().relay, second_relay);
    }

    #[test]
    fn test_deregister_clears_bindings() {
        let registry = registry_with_pair();
        registry.bind(panel_addr(), relay_addr(), 5).unwrap();

        registry.deregister(relay_addr()).unwrap();
        assert!(registry.resolve(panel_addr()).is_err());
        assert!(registry.get(relay_addr()).is_none());
    }

    #[test]
    fn test_connection_state_tracking() {
        let registry = registry_with_pair();
        assert_eq!(
            registry.status(panel_addr()).unwrap().state,
            ConnectionState::Disconnected
        );

        registry.set_connection_state(panel_addr(), ConnectionState::Connected);
        let status = registry.status(panel_addr()).unwrap();
        assert_eq!(status.state, ConnectionState::Connected);
        assert!(status.last_seen.is_some());

        registry.set_connection_state(panel_addr(), ConnectionState::Faulted);
        assert_eq!(registry.faulted(), vec![panel_addr()]);
    }

    #[test]
    fn test_status_unknown_device() {
        let registry = DeviceRegistry::new();
        assert!(matches!(
            registry.status(panel_addr()),
            Err(Error::UnknownDevice { .. })
        ));
    }

    #[test]
    fn test_from_config() {
        let config = AdminConfig::from_toml_str(
            r#"
            [[panels]]
            addr = "192.168.0.50:4370"

            [[relays]]
            addr = "192.168.0.60:80"
            dialect = "http"

            [[bindings]]
            panel = "192.168.0.50:4370"
            relay = "192.168.0.60:80"
            duration_secs = 7
            "#,
        )
        .unwrap();

        let registry = DeviceRegistry::from_config(&config).unwrap();
        assert_eq!(registry.panels(), vec![panel_addr()]);
        assert_eq!(registry.resolve(panel_addr()).unwrap().duration_secs, 7);
    }
}
