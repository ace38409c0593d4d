use crate::{
    Result,
    constants::{DEFAULT_PANEL_PORT, MAX_FINGER_INDEX, MAX_QUALITY_SCORE},
    error::Error,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// User identifier as known to the surrounding application.
///
/// Panels carry user ids as unsigned 32-bit values on the wire; the wider
/// type here matches the application's keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(u64);

impl UserId {
    #[must_use]
    pub fn new(id: u64) -> Self {
        UserId(id)
    }

    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        UserId(id)
    }
}

/// Finger index (0-9).
///
/// Panels address each of a person's ten fingers by index; 0 is the right
/// thumb by vendor convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FingerIndex(u8);

impl FingerIndex {
    /// Create a finger index with validation.
    ///
    /// # Errors
    /// Returns `Error::Config` if the index is outside 0-9.
    pub fn new(index: u8) -> Result<Self> {
        if index > MAX_FINGER_INDEX {
            return Err(Error::Config(format!(
                "Finger index must be 0-{MAX_FINGER_INDEX}, got {index}"
            )));
        }
        Ok(FingerIndex(index))
    }

    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for FingerIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// On-device template identifier.
///
/// Assigned by a panel when a template lands in its local store. The value
/// is only meaningful for the panel that issued it; directory lookups must
/// pair it with the device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(u32);

impl TemplateId {
    #[must_use]
    pub fn new(id: u32) -> Self {
        TemplateId(id)
    }

    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network identity of a device: IP address plus TCP port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddr {
    ip: IpAddr,
    port: u16,
}

impl DeviceAddr {
    #[must_use]
    pub fn new(ip: IpAddr, port: u16) -> Self {
        DeviceAddr { ip, port }
    }

    #[must_use]
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for DeviceAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl From<SocketAddr> for DeviceAddr {
    fn from(addr: SocketAddr) -> Self {
        DeviceAddr {
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

impl std::str::FromStr for DeviceAddr {
    type Err = Error;

    /// Parse `ip:port`, or a bare `ip` which gets the default panel port.
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(sock) = s.parse::<SocketAddr>() {
            return Ok(sock.into());
        }
        let ip: IpAddr = s
            .parse()
            .map_err(|_| Error::Config(format!("Invalid device address: {s}")))?;
        Ok(DeviceAddr::new(ip, DEFAULT_PANEL_PORT))
    }
}

/// Kind of configured device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Biometric panel with a fingerprint sensor.
    Panel,
    /// Physical actuator that unlocks a turnstile or door.
    Relay,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeviceKind::Panel => write!(f, "panel"),
            DeviceKind::Relay => write!(f, "relay"),
        }
    }
}

/// Protocol dialect a device speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolDialect {
    /// Binary command/response framing over a persistent TCP session.
    Zk,
    /// IP relay driven by HTTP commands.
    HttpRelay,
    /// Relay on a serial line at a fixed baud rate.
    SerialRelay,
    /// Relay on a raw TCP socket.
    TcpRelay,
}

/// Connection lifecycle of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Too many consecutive failures; only the watchdog probes it now.
    Faulted,
}

impl ConnectionState {
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Faulted => "faulted",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle status of a fingerprint record.
///
/// Records are never hard-deleted; they move to `Inactive` or `Expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintStatus {
    /// Captured but not yet confirmed against the quality threshold.
    Pending,
    Active,
    /// Directory-level deactivation; the on-device template may still exist.
    Inactive,
    /// Revoked: deleted from the panel store and closed in the directory.
    Expired,
}

impl fmt::Display for FingerprintStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            FingerprintStatus::Pending => "pending",
            FingerprintStatus::Active => "active",
            FingerprintStatus::Inactive => "inactive",
            FingerprintStatus::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// Result of the external membership-validity query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipState {
    Active,
    Inactive,
    Expired,
}

/// Reason attached to a denied access attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// The panel reported a template the directory does not know.
    UnknownFingerprint,
    MembershipExpired,
    MembershipInactive,
    /// The fingerprint record is deactivated or past its expiry.
    FingerprintInactive,
    /// The validity query failed or timed out; access fails closed.
    MembershipCheckFailed,
}

impl DenialReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DenialReason::UnknownFingerprint => "unknown_fingerprint",
            DenialReason::MembershipExpired => "membership_expired",
            DenialReason::MembershipInactive => "membership_inactive",
            DenialReason::FingerprintInactive => "fingerprint_inactive",
            DenialReason::MembershipCheckFailed => "membership_check_failed",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of recorded access event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessEventKind {
    /// A panel-recorded match imported from the device's attendance log.
    Match,
    /// The panel matched no on-device template for the presented finger.
    NoMatch,
    Grant,
    Deny,
}

/// Immutable record of one access attempt outcome.
///
/// Produced exclusively by the decision engine; `sequence` is assigned
/// monotonically at emission so consumers can rely on append order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEvent {
    pub sequence: u64,
    /// Resolved user, or `None` when the template matched nobody.
    pub user_id: Option<UserId>,
    pub device: DeviceAddr,
    pub kind: AccessEventKind,
    pub denial_reason: Option<DenialReason>,
    pub timestamp: DateTime<Utc>,
}

impl AccessEvent {
    #[must_use]
    pub fn was_granted(&self) -> bool {
        matches!(self.kind, AccessEventKind::Grant)
    }
}

/// Opaque fingerprint template bytes.
///
/// # Security
/// Equality is constant-time so template comparison leaks nothing about
/// where two templates first differ.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct TemplateBytes(Vec<u8>);

impl TemplateBytes {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        TemplateBytes(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for TemplateBytes {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_slice().ct_eq(other.0.as_slice()).into()
    }
}

impl From<Vec<u8>> for TemplateBytes {
    fn from(bytes: Vec<u8>) -> Self {
        TemplateBytes(bytes)
    }
}

/// Authoritative record of one enrolled fingerprint.
///
/// Identity is (user, finger index) scoped to the enrolling panel. The
/// panel's local store is a cache of this record, never the other way
/// around.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub finger_index: FingerIndex,
    /// Panel that captured and stores the template.
    pub device: DeviceAddr,
    pub template: TemplateBytes,
    /// Identifier the panel assigned in its local store.
    pub template_id: TemplateId,
    /// Capture quality 0-100.
    pub quality: u8,
    pub status: FingerprintStatus,
    pub enrolled_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl FingerprintRecord {
    /// Whether this record authorizes access at `now`.
    ///
    /// Active status with a lapsed expiry does not authorize; the record
    /// resolves as if expired.
    #[must_use]
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == FingerprintStatus::Active
            && self.expires_at.is_none_or(|expiry| now < expiry)
    }

    /// Validate a quality score reported by a panel.
    ///
    /// # Errors
    /// Returns `Error::Protocol` for scores above 100.
    pub fn validate_quality(quality: u8) -> Result<u8> {
        if quality > MAX_QUALITY_SCORE {
            return Err(Error::protocol(format!(
                "Quality must be 0-{MAX_QUALITY_SCORE}, got {quality}"
            )));
        }
        Ok(quality)
    }
}

/// Configured association between a panel and the relay it actuates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayBinding {
    pub relay: DeviceAddr,
    /// Relay output channel on multi-channel relay boards.
    pub relay_port: u8,
    /// Seconds the turnstile stays open per grant.
    pub duration_secs: u32,
}

impl RelayBinding {
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.duration_secs))
    }
}

/// Ephemeral actuation request; exists only for the duration of one call.
#[derive(Debug, Clone, Copy)]
pub struct TurnstileCommand {
    pub binding: RelayBinding,
    pub open_secs: u32,
}

/// Reachability snapshot for a device, as reported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub state: ConnectionState,
    pub last_seen: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("192.168.0.50:4370", 4370)]
    #[case("192.168.0.50", 4370)]
    #[case("10.0.0.1:8000", 8000)]
    fn test_device_addr_parse(#[case] input: &str, #[case] port: u16) {
        let addr: DeviceAddr = input.parse().unwrap();
        assert_eq!(addr.port(), port);
    }

    #[rstest]
    #[case("not-an-ip")]
    #[case("300.1.1.1")]
    #[case("")]
    fn test_device_addr_invalid(#[case] input: &str) {
        let result: Result<DeviceAddr> = input.parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_device_addr_display_roundtrip() {
        let addr: DeviceAddr = "192.168.0.50:4370".parse().unwrap();
        assert_eq!(addr.to_string(), "192.168.0.50:4370");
        let again: DeviceAddr = addr.to_string().parse().unwrap();
        assert_eq!(addr, again);
    }

    #[rstest]
    #[case(0)]
    #[case(5)]
    #[case(9)]
    fn test_finger_index_valid(#[case] index: u8) {
        assert_eq!(FingerIndex::new(index).unwrap().as_u8(), index);
    }

    #[test]
    fn test_finger_index_invalid() {
        assert!(FingerIndex::new(10).is_err());
        assert!(FingerIndex::new(255).is_err());
    }

    #[test]
    fn test_template_bytes_constant_time_eq() {
        let a = TemplateBytes::new(vec![1, 2, 3]);
        let b = TemplateBytes::new(vec![1, 2, 3]);
        let c = TemplateBytes::new(vec![1, 2, 4]);
        let d = TemplateBytes::new(vec![1, 2]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_record_usability() {
        let mut record = FingerprintRecord {
            id: Uuid::new_v4(),
            user_id: UserId::new(7),
            finger_index: FingerIndex::new(0).unwrap(),
            device: "192.168.0.50:4370".parse().unwrap(),
            template: TemplateBytes::new(vec![0u8; 512]),
            template_id: TemplateId::new(42),
            quality: 80,
            status: FingerprintStatus::Active,
            enrolled_at: Utc::now(),
            last_used: None,
            expires_at: None,
        };

        let now = Utc::now();
        assert!(record.is_usable_at(now));

        record.expires_at = Some(now - chrono::Duration::days(1));
        assert!(!record.is_usable_at(now));

        record.expires_at = Some(now + chrono::Duration::days(1));
        assert!(record.is_usable_at(now));

        record.status = FingerprintStatus::Inactive;
        assert!(!record.is_usable_at(now));
    }

    #[test]
    fn test_quality_validation() {
        assert_eq!(FingerprintRecord::validate_quality(0).unwrap(), 0);
        assert_eq!(FingerprintRecord::validate_quality(100).unwrap(), 100);
        assert!(FingerprintRecord::validate_quality(101).is_err());
    }

    #[test]
    fn test_denial_reason_str() {
        assert_eq!(
            DenialReason::MembershipExpired.as_str(),
            "membership_expired"
        );
        assert_eq!(
            DenialReason::MembershipCheckFailed.to_string(),
            "membership_check_failed"
        );
    }

    #[test]
    fn test_binding_duration() {
        let binding = RelayBinding {
            relay: "192.168.0.60:80".parse().unwrap(),
            relay_port: 1,
            duration_secs: 5,
        };
        assert_eq!(binding.duration(), Duration::from_secs(5));
    }
}
