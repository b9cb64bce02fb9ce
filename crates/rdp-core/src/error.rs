//! Error types for the protocol's foundational layer.
//!
//! These are the two error kinds the spec places below the protocol-behavior
//! layer: invalid configuration, and a clock rewind observed by the ID
//! generator. Everything else in the error taxonomy (checksum mismatch,
//! reassembly abandonment, codec unavailability) is a silent or logged
//! outcome handled above this crate, not a `Result` error.

use thiserror::Error;

/// Errors produced by `rdp-core`.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Raised at `configure` when an option value is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The system clock moved backwards relative to the last observed
    /// timestamp. Fatal to the generator instance that observed it.
    #[error("clock moved backwards: last_timestamp_ms={last_timestamp_ms}, observed_ms={observed_ms}")]
    ClockBackwards {
        last_timestamp_ms: u64,
        observed_ms: u64,
    },

    /// `worker_id` was outside `[0, 1023]` at construction.
    #[error("invalid worker_id {0}: must be in [0, 1023]")]
    InvalidWorkerId(u16),
}

/// Result type alias for `rdp-core` operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl ProtocolError {
    /// Whether this error is fatal to the whole engine, as opposed to a
    /// single in-flight request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::ClockBackwards { .. } | ProtocolError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_is_fatal() {
        assert!(ProtocolError::Config("bad".into()).is_fatal());
    }

    #[test]
    fn clock_backwards_is_fatal() {
        let err = ProtocolError::ClockBackwards {
            last_timestamp_ms: 10,
            observed_ms: 5,
        };
        assert!(err.is_fatal());
    }
}
