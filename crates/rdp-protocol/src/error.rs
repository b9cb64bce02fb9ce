//! Errors produced by the wire codec and compression codecs.
//!
//! Most of the behavior this crate implements (checksum mismatch, codec
//! unavailability, malformed envelopes) is defined by the spec as a silent
//! or logged outcome rather than a `Result` error — those paths return
//! `Option`/`bool` instead. This error type exists for the handful of
//! genuinely exceptional conditions below that: a compression backend
//! raising an I/O-shaped failure.

use thiserror::Error;

/// Errors raised by an individual [`crate::compression::Codec`] implementation.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("{codec} compression failed: {reason}")]
    CompressFailed { codec: &'static str, reason: String },

    #[error("{codec} decompression failed: {reason}")]
    DecompressFailed { codec: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, CodecError>;
