//! Startup configuration for the coordinator.
//!
//! `AdminConfig` is supplied by the surrounding application at startup,
//! usually loaded from a TOML file. It lists the devices to bring up, the
//! panel-to-relay bindings, and the timing/quality knobs. Hot reload is not
//! supported; restart to apply changes.

use crate::{
    Result,
    constants::{
        BACKOFF_CAP_MS, BACKOFF_INITIAL_MS, DEFAULT_ACTUATION_ACK_TIMEOUT_MS,
        DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_ENROLL_ATTEMPTS, DEFAULT_FAULT_THRESHOLD,
        DEFAULT_MEMBERSHIP_TIMEOUT_MS, DEFAULT_OPEN_SECONDS, DEFAULT_PROBE_INTERVAL_MS,
        DEFAULT_QUALITY_THRESHOLD, DEFAULT_SINK_TIMEOUT_MS,
    },
    error::Error,
    types::{DeviceAddr, ProtocolDialect},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// One configured biometric panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Network address, `ip:port` or bare `ip` (default port 4370).
    pub addr: String,
    /// Optional human-readable label used in logs.
    #[serde(default)]
    pub name: Option<String>,
}

/// One configured relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub addr: String,
    /// Which physical transport drives this relay.
    pub dialect: RelayDialect,
    /// Output channel on multi-channel boards.
    #[serde(default = "default_relay_port")]
    pub relay_port: u8,
    /// Serial device path, only for `dialect = "serial"`.
    #[serde(default)]
    pub serial_path: Option<String>,
    /// Serial baud rate, only for `dialect = "serial"`.
    #[serde(default = "default_baud")]
    pub baud_rate: u32,
}

fn default_relay_port() -> u8 {
    1
}

fn default_baud() -> u32 {
    9600
}

/// Relay transport selection in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayDialect {
    Http,
    Serial,
    Tcp,
}

impl From<RelayDialect> for ProtocolDialect {
    fn from(dialect: RelayDialect) -> Self {
        match dialect {
            RelayDialect::Http => ProtocolDialect::HttpRelay,
            RelayDialect::Serial => ProtocolDialect::SerialRelay,
            RelayDialect::Tcp => ProtocolDialect::TcpRelay,
        }
    }
}

/// Panel-to-relay binding entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingConfig {
    pub panel: String,
    pub relay: String,
    #[serde(default = "default_open_seconds")]
    pub duration_secs: u32,
}

fn default_open_seconds() -> u32 {
    DEFAULT_OPEN_SECONDS
}

/// Reconnection policy knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_initial")]
    pub initial_ms: u64,
    #[serde(default = "default_backoff_cap")]
    pub cap_ms: u64,
    /// Consecutive failures before the device is marked faulted.
    #[serde(default = "default_fault_threshold")]
    pub fault_threshold: u32,
    /// Watchdog probe interval for faulted devices.
    #[serde(default = "default_probe_interval")]
    pub probe_interval_ms: u64,
}

fn default_backoff_initial() -> u64 {
    BACKOFF_INITIAL_MS
}

fn default_backoff_cap() -> u64 {
    BACKOFF_CAP_MS
}

fn default_fault_threshold() -> u32 {
    DEFAULT_FAULT_THRESHOLD
}

fn default_probe_interval() -> u64 {
    DEFAULT_PROBE_INTERVAL_MS
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            initial_ms: BACKOFF_INITIAL_MS,
            cap_ms: BACKOFF_CAP_MS,
            fault_threshold: DEFAULT_FAULT_THRESHOLD,
            probe_interval_ms: DEFAULT_PROBE_INTERVAL_MS,
        }
    }
}

impl BackoffConfig {
    #[must_use]
    pub fn initial(&self) -> Duration {
        Duration::from_millis(self.initial_ms)
    }

    #[must_use]
    pub fn cap(&self) -> Duration {
        Duration::from_millis(self.cap_ms)
    }

    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

/// Timeout budgets for the blocking operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_command_timeout")]
    pub command_ms: u64,
    #[serde(default = "default_ack_timeout")]
    pub actuation_ack_ms: u64,
    #[serde(default = "default_membership_timeout")]
    pub membership_ms: u64,
    #[serde(default = "default_sink_timeout")]
    pub sink_ms: u64,
}

fn default_command_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_MS
}

fn default_ack_timeout() -> u64 {
    DEFAULT_ACTUATION_ACK_TIMEOUT_MS
}

fn default_membership_timeout() -> u64 {
    DEFAULT_MEMBERSHIP_TIMEOUT_MS
}

fn default_sink_timeout() -> u64 {
    DEFAULT_SINK_TIMEOUT_MS
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            command_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            actuation_ack_ms: DEFAULT_ACTUATION_ACK_TIMEOUT_MS,
            membership_ms: DEFAULT_MEMBERSHIP_TIMEOUT_MS,
            sink_ms: DEFAULT_SINK_TIMEOUT_MS,
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub fn command(&self) -> Duration {
        Duration::from_millis(self.command_ms)
    }

    #[must_use]
    pub fn actuation_ack(&self) -> Duration {
        Duration::from_millis(self.actuation_ack_ms)
    }

    #[must_use]
    pub fn membership(&self) -> Duration {
        Duration::from_millis(self.membership_ms)
    }

    #[must_use]
    pub fn sink(&self) -> Duration {
        Duration::from_millis(self.sink_ms)
    }
}

/// Enrollment policy knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EnrollmentConfig {
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: u8,
    #[serde(default = "default_enroll_attempts")]
    pub capture_attempts: u8,
}

fn default_quality_threshold() -> u8 {
    DEFAULT_QUALITY_THRESHOLD
}

fn default_enroll_attempts() -> u8 {
    DEFAULT_ENROLL_ATTEMPTS
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        EnrollmentConfig {
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            capture_attempts: DEFAULT_ENROLL_ATTEMPTS,
        }
    }
}

/// Complete startup configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub panels: Vec<PanelConfig>,
    #[serde(default)]
    pub relays: Vec<RelayConfig>,
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub enrollment: EnrollmentConfig,
}

impl AdminConfig {
    /// Parse a TOML document.
    ///
    /// # Errors
    /// Returns `Error::Config` on syntax errors or invalid addresses.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: AdminConfig =
            toml::from_str(raw).map_err(|e| Error::Config(format!("Invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file from disk.
    ///
    /// # Errors
    /// Returns `Error::Io` when the file cannot be read, or `Error::Config`
    /// when the content does not parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Check address syntax and cross-references between sections.
    fn validate(&self) -> Result<()> {
        for panel in &self.panels {
            panel.addr.parse::<DeviceAddr>()?;
        }
        for relay in &self.relays {
            relay.addr.parse::<DeviceAddr>()?;
            if relay.dialect == RelayDialect::Serial && relay.serial_path.is_none() {
                return Err(Error::Config(format!(
                    "Relay {} uses the serial dialect but has no serial_path",
                    relay.addr
                )));
            }
        }
        for binding in &self.bindings {
            let panel: DeviceAddr = binding.panel.parse()?;
            let relay: DeviceAddr = binding.relay.parse()?;
            if !self
                .panels
                .iter()
                .any(|p| p.addr.parse::<DeviceAddr>().is_ok_and(|a| a == panel))
            {
                return Err(Error::Config(format!(
                    "Binding references unknown panel {panel}"
                )));
            }
            if !self
                .relays
                .iter()
                .any(|r| r.addr.parse::<DeviceAddr>().is_ok_and(|a| a == relay))
            {
                return Err(Error::Config(format!(
                    "Binding references unknown relay {relay}"
                )));
            }
        }
        Ok(())
    }
}
