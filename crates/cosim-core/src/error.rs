//! Error types for the co-simulation protocol

use thiserror::Error;

/// Core cosim errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CosimError {
    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Unsupported wire version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown message kind: {0:#04x}")]
    UnknownMessageKind(u8),

    #[error("Unknown participant kind: {0:#04x}")]
    UnknownParticipantKind(u8),

    #[error("Malformed {kind} envelope: {reason}")]
    MalformedEnvelope { kind: &'static str, reason: String },

    // Broker errors
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Exchange not found: {0}")]
    ExchangeNotFound(String),

    #[error("Queue already has a consumer: {0}")]
    QueueAlreadyConsumed(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    // Configuration errors
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Config I/O error: {0}")]
    ConfigIo(String),
}

/// Result type for cosim operations
pub type CosimResult<T> = Result<T, CosimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_envelope_display() {
        let e = CosimError::MalformedEnvelope {
            kind: "STEP-RELEASE",
            reason: "3 trailing bytes".into(),
        };
        assert_eq!(e.to_string(), "Malformed STEP-RELEASE envelope: 3 trailing bytes");
    }

    #[test]
    fn test_unknown_kind_is_hex() {
        assert_eq!(
            CosimError::UnknownMessageKind(0x7f).to_string(),
            "Unknown message kind: 0x7f"
        );
    }
}
