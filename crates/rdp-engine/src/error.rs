//! Errors the protocol engine can surface to a caller.
//!
//! Most of the wider error taxonomy (checksum mismatch, reassembly
//! abandonment, codec unavailability, passthrough datagrams, and datagram
//! send failures — `SendFailed` in spec.md §7 is explicitly "swallowed at
//! the Engine but influences retries") is silent or logged, not a
//! caller-visible `Result`. What remains here is genuinely fatal to either
//! a single in-flight request (`RequestTimeout`) or to the engine itself
//! (`Protocol`, `Closed`).

use thiserror::Error;

use rdp_core::ProtocolError;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Propagated from `rdp-core` (`ConfigError`, `ClockBackwards`).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A registered request did not resolve before its `request_timeout_ms`
    /// deadline: for a single send, no RES arrived; for a chunked send, not
    /// every chunk was ACKed.
    #[error("request {0} timed out")]
    RequestTimeout(String),

    /// The engine was closed while the call was in flight.
    #[error("engine closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, EngineError>;
