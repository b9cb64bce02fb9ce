//! Codec implementations: a uniform compress/decompress capability per
//! compression algorithm, each gated by `is_available`.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rdp_core::CodecTag;

use crate::error::{CodecError, Result};

/// A pluggable compression algorithm, looked up by [`CodecTag`] in the
/// [`super::CodecRegistry`].
pub trait Codec: Send + Sync {
    fn tag(&self) -> CodecTag;
    fn name(&self) -> &'static str;
    fn compress(&self, level: i32, data: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
    /// Whether this codec is usable in the current build. All codecs here
    /// are pure-Rust and statically linked, so they are always available;
    /// the hook exists so a registry built against a reduced feature set
    /// can report an entry as unavailable without removing it.
    fn is_available(&self) -> bool {
        true
    }
}

pub struct NoneCodec;

impl Codec for NoneCodec {
    fn tag(&self) -> CodecTag {
        CodecTag::None
    }

    fn name(&self) -> &'static str {
        "none"
    }

    fn compress(&self, _level: i32, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

pub struct GzipCodec;

impl Codec for GzipCodec {
    fn tag(&self) -> CodecTag {
        CodecTag::Gzip
    }

    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, level: i32, data: &[u8]) -> Result<Vec<u8>> {
        let level = level.clamp(0, 9) as u32;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
        encoder
            .write_all(data)
            .map_err(|e| CodecError::CompressFailed {
                codec: "gzip",
                reason: e.to_string(),
            })?;
        encoder.finish().map_err(|e| CodecError::CompressFailed {
            codec: "gzip",
            reason: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| CodecError::DecompressFailed {
                codec: "gzip",
                reason: e.to_string(),
            })?;
        Ok(out)
    }
}

pub struct SnappyCodec;

impl Codec for SnappyCodec {
    fn tag(&self) -> CodecTag {
        CodecTag::Snappy
    }

    fn name(&self) -> &'static str {
        "snappy"
    }

    fn compress(&self, _level: i32, data: &[u8]) -> Result<Vec<u8>> {
        snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| CodecError::CompressFailed {
                codec: "snappy",
                reason: e.to_string(),
            })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| CodecError::DecompressFailed {
                codec: "snappy",
                reason: e.to_string(),
            })
    }
}

pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn tag(&self) -> CodecTag {
        CodecTag::Lz4
    }

    fn name(&self) -> &'static str {
        "lz4"
    }

    fn compress(&self, _level: i32, data: &[u8]) -> Result<Vec<u8>> {
        Ok(lz4_flex::compress_prepend_size(data))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4_flex::decompress_size_prepended(data).map_err(|e| CodecError::DecompressFailed {
            codec: "lz4",
            reason: e.to_string(),
        })
    }
}

pub struct ZstdCodec;

impl Codec for ZstdCodec {
    fn tag(&self) -> CodecTag {
        CodecTag::Zstd
    }

    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compress(&self, level: i32, data: &[u8]) -> Result<Vec<u8>> {
        zstd::stream::encode_all(data, level).map_err(|e| CodecError::CompressFailed {
            codec: "zstd",
            reason: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::stream::decode_all(data).map_err(|e| CodecError::DecompressFailed {
            codec: "zstd",
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(codec: &dyn Codec, level: i32) {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let compressed = codec.compress(level, &data).unwrap();
        let decompressed = codec.decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn none_round_trips() {
        round_trip(&NoneCodec, 6);
    }

    #[test]
    fn gzip_round_trips() {
        round_trip(&GzipCodec, 6);
    }

    #[test]
    fn snappy_round_trips() {
        round_trip(&SnappyCodec, 6);
    }

    #[test]
    fn lz4_round_trips() {
        round_trip(&Lz4Codec, 6);
    }

    #[test]
    fn zstd_round_trips() {
        round_trip(&ZstdCodec, 6);
    }
}
