use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Transport errors
    #[error("Device unreachable: {device}")]
    DeviceUnreachable { device: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Command timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Frame too large: {size} bytes exceeds maximum of {max_size}")]
    FrameTooLarge { size: usize, max_size: usize },

    // Directory errors
    #[error("Unknown template {template_id} on device {device}")]
    UnknownTemplate { device: String, template_id: u32 },

    #[error("Capture quality {quality} below threshold {threshold}")]
    QualityTooLow { quality: u8, threshold: u8 },

    #[error("Fingerprint already enrolled for user {user_id}, finger {finger_index}")]
    DuplicateFinger { user_id: u64, finger_index: u8 },

    #[error("Fingerprint record not found: {id}")]
    RecordNotFound { id: String },

    // Engine errors
    #[error("Membership validity check failed")]
    MembershipCheckFailed,

    #[error("Actuation failed: {message}")]
    Actuation { message: String },

    // Registry errors
    #[error("Device already registered at {device}")]
    DuplicateAddress { device: String },

    #[error("Unknown device: {device}")]
    UnknownDevice { device: String },

    #[error("No relay binding configured for panel {device}")]
    NoBindingConfigured { device: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a `DeviceUnreachable` error for the given device.
    pub fn unreachable(device: impl std::fmt::Display) -> Self {
        Error::DeviceUnreachable {
            device: device.to_string(),
        }
    }

    /// Build a `Protocol` error with a message.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    /// Build an `Actuation` error with a message.
    pub fn actuation(message: impl Into<String>) -> Self {
        Error::Actuation {
            message: message.into(),
        }
    }

    /// True for failures that the transport retries with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::DeviceUnreachable { .. } | Error::Timeout { .. } | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::unreachable("192.168.0.50:4370");
        assert_eq!(e.to_string(), "Device unreachable: 192.168.0.50:4370");

        let e = Error::UnknownTemplate {
            device: "192.168.0.50:4370".to_string(),
            template_id: 9999,
        };
        assert_eq!(
            e.to_string(),
            "Unknown template 9999 on device 192.168.0.50:4370"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::unreachable("panel").is_retryable());
        assert!(Error::Timeout { duration_ms: 3000 }.is_retryable());
        assert!(!Error::MembershipCheckFailed.is_retryable());
        assert!(
            !Error::QualityTooLow {
                quality: 30,
                threshold: 50
            }
            .is_retryable()
        );
    }
}
