//! Core constants for the access-control coordinator.
//!
//! These values centralize protocol defaults, timing budgets and enrollment
//! policy so the transport, directory and engine crates agree on them.
//! Per-deployment overrides come from [`crate::config::AdminConfig`]; the
//! constants here are the fallbacks applied when a config omits a field.

// ============================================================================
// Panel Protocol
// ============================================================================

/// Default TCP port for biometric panels.
///
/// Panels listen on 4370 unless the device configuration says otherwise.
pub const DEFAULT_PANEL_PORT: u16 = 4370;

/// Wire header length in bytes.
///
/// Every frame starts with `[command: u16][reply_id: u16][session_id: u32]
/// [length: u32]`, little-endian, followed by the payload.
pub const FRAME_HEADER_LEN: usize = 12;

/// Bias applied to the header `length` field.
///
/// The panel dialect counts the payload plus eight header bytes in `length`,
/// so `payload_len = length - FRAME_LENGTH_BIAS`.
pub const FRAME_LENGTH_BIAS: u32 = 8;

/// Maximum accepted frame size in bytes (64 KB).
///
/// Frames larger than this are rejected by the codec before allocation to
/// bound memory consumed by a misbehaving or hostile peer.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

// ============================================================================
// Timing Budgets
// ============================================================================

/// Default timeout for a single panel command round-trip (milliseconds).
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 3000;

/// Default timeout waiting for a relay acknowledgment (milliseconds).
pub const DEFAULT_ACTUATION_ACK_TIMEOUT_MS: u64 = 2000;

/// Default timeout for the external membership-validity query (milliseconds).
pub const DEFAULT_MEMBERSHIP_TIMEOUT_MS: u64 = 2000;

/// Default timeout for appending to the external event sink (milliseconds).
///
/// A slow sink must never hold an access attempt open; past this budget the
/// event is dropped with a warning and the attempt completes.
pub const DEFAULT_SINK_TIMEOUT_MS: u64 = 1000;

/// Upper bound on a complete access attempt, end to end (milliseconds).
///
/// Individual command, membership and actuation timeouts are sized so their
/// sum stays under this budget. No decision may remain open longer.
pub const MAX_ATTEMPT_BUDGET_MS: u64 = 5000;

// ============================================================================
// Reconnection Policy
// ============================================================================

/// Initial reconnect backoff delay (milliseconds).
pub const BACKOFF_INITIAL_MS: u64 = 1000;

/// Reconnect backoff cap (milliseconds).
pub const BACKOFF_CAP_MS: u64 = 30_000;

/// Consecutive connection failures before a device is marked faulted.
pub const DEFAULT_FAULT_THRESHOLD: u32 = 5;

/// Interval at which the watchdog probes faulted devices (milliseconds).
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 30_000;

// ============================================================================
// Enrollment Policy
// ============================================================================

/// Minimum capture quality accepted during enrollment (0-100).
pub const DEFAULT_QUALITY_THRESHOLD: u8 = 50;

/// Maximum quality score a panel can report.
pub const MAX_QUALITY_SCORE: u8 = 100;

/// Capture attempts per enrollment before giving up on quality.
pub const DEFAULT_ENROLL_ATTEMPTS: u8 = 3;

/// Highest valid finger index (0 = right thumb .. 9 = left little).
pub const MAX_FINGER_INDEX: u8 = 9;

// ============================================================================
// Actuation
// ============================================================================

/// Default turnstile open duration in seconds.
pub const DEFAULT_OPEN_SECONDS: u32 = 5;
