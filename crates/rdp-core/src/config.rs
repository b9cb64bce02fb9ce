//! Socket and compression configuration.

use serde::{Deserialize, Serialize};

use crate::envelope::CodecTag;
use crate::error::{ProtocolError, Result};

const MIN_MESSAGE_SIZE: usize = 100;
const MAX_MESSAGE_SIZE: usize = 65_000;

/// Configuration applied to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    /// The threshold above which a payload is chunked; must lie in
    /// `[100, 65000]`.
    pub max_message_size: usize,
    /// Size of each chunk's pre-base64 byte slice.
    pub chunk_size: usize,
    /// Maximum number of retries before the retry scheduler stops
    /// (the request_timeout, not this counter, is the final deadline).
    pub max_retries: u32,
    /// Interval between retries, in milliseconds.
    pub retry_interval_ms: u64,
    /// Deadline for an outstanding request, in milliseconds.
    pub request_timeout_ms: u64,
    /// Deadline for a partial chunk assembly, in milliseconds.
    pub reassembly_timeout_ms: u64,
    /// Whether to compute and verify SHA-256 checksums on envelope bodies.
    pub enable_checksum: bool,
    /// Compression pipeline configuration.
    pub compression: CompressionConfig,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 1400,
            chunk_size: 1200,
            max_retries: 5,
            retry_interval_ms: 500,
            request_timeout_ms: 5000,
            reassembly_timeout_ms: 30_000,
            enable_checksum: true,
            compression: CompressionConfig::default(),
        }
    }
}

impl SocketConfig {
    /// A configuration tuned for fast local tests: short timeouts, no
    /// checksum overhead.
    pub fn insecure_fast() -> Self {
        Self {
            max_retries: 3,
            retry_interval_ms: 20,
            request_timeout_ms: 200,
            reassembly_timeout_ms: 500,
            enable_checksum: false,
            ..Self::default()
        }
    }

    /// Validate option values, as invoked by `configure`.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_MESSAGE_SIZE..=MAX_MESSAGE_SIZE).contains(&self.max_message_size) {
            return Err(ProtocolError::Config(format!(
                "max_message_size {} must be in [{}, {}]",
                self.max_message_size, MIN_MESSAGE_SIZE, MAX_MESSAGE_SIZE
            )));
        }
        if self.chunk_size == 0 {
            return Err(ProtocolError::Config(
                "chunk_size must be greater than zero".into(),
            ));
        }
        self.compression.validate()?;
        Ok(())
    }
}

/// Compression pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub codec: CompressionCodecKind,
    /// Codec-specific compression level; interpretation depends on `codec`.
    pub level: i32,
    /// Minimum payload size, in bytes, before compression is attempted.
    pub min_size: usize,
    /// Minimum required size reduction, as a percentage, for a compression
    /// result to be accepted.
    pub min_reduction_pct: f64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            codec: CompressionCodecKind::None,
            level: 6,
            min_size: 256,
            min_reduction_pct: 10.0,
        }
    }
}

impl CompressionConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.min_reduction_pct) {
            return Err(ProtocolError::Config(format!(
                "min_reduction_pct {} must be in [0, 100]",
                self.min_reduction_pct
            )));
        }
        Ok(())
    }
}

/// Serializable mirror of [`CodecTag`] for configuration purposes (`CodecTag`
/// itself carries no `None`-as-disabled distinction needed here, but the two
/// are otherwise identical; kept separate so the wire flag-bit type does not
/// need `Serialize`/`Deserialize` derives it otherwise wouldn't need).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionCodecKind {
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

impl From<CompressionCodecKind> for CodecTag {
    fn from(kind: CompressionCodecKind) -> Self {
        match kind {
            CompressionCodecKind::None => CodecTag::None,
            CompressionCodecKind::Gzip => CodecTag::Gzip,
            CompressionCodecKind::Snappy => CodecTag::Snappy,
            CompressionCodecKind::Lz4 => CodecTag::Lz4,
            CompressionCodecKind::Zstd => CodecTag::Zstd,
        }
    }
}
