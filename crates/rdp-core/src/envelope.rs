//! The message envelope (C2 data model) and its bit-packed flags byte.
//!
//! Wire-format encoding/decoding (`serialize`/`parse`) lives in
//! `rdp-protocol`, which is the behavioral layer above this crate; this
//! module owns only the `Envelope` type itself and the flag bit layout,
//! since both the protocol and engine crates need to construct and inspect
//! them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The three message kinds carried by `flags` bits 5-6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Req,
    Ack,
    Res,
}

/// Compression codec tag, carried by `flags` bits 0-2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecTag {
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

impl CodecTag {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(CodecTag::None),
            1 => Some(CodecTag::Gzip),
            2 => Some(CodecTag::Snappy),
            3 => Some(CodecTag::Lz4),
            4 => Some(CodecTag::Zstd),
            _ => None,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            CodecTag::None => 0,
            CodecTag::Gzip => 1,
            CodecTag::Snappy => 2,
            CodecTag::Lz4 => 3,
            CodecTag::Zstd => 4,
        }
    }
}

/// The decoded form of a flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFlags {
    pub kind: MessageKind,
    pub codec: CodecTag,
    pub compressed: bool,
    pub chunked: bool,
}

/// Pack `(kind, codec, compressed, chunked)` into a single flags byte.
/// Bit 7 (reserved) is always emitted as zero.
pub fn encode_flags(kind: MessageKind, codec: CodecTag, compressed: bool, chunked: bool) -> u8 {
    let kind_bits = match kind {
        MessageKind::Req => 0u8,
        MessageKind::Ack => 1u8,
        MessageKind::Res => 2u8,
    };
    let mut byte = codec.to_bits() & 0b111;
    if compressed {
        byte |= 1 << 3;
    }
    if chunked {
        byte |= 1 << 4;
    }
    byte |= kind_bits << 5;
    byte
}

/// Unpack a flags byte. Returns `None` for byte values `encode_flags` never
/// produces: an undefined codec index (5-7) or the undefined type
/// combination (bits 5-6 == 3). Bit 7 is always ignored, per the wire
/// format's reserved-bit rule.
pub fn decode_flags(byte: u8) -> Option<DecodedFlags> {
    let codec = CodecTag::from_bits(byte & 0b111)?;
    let compressed = byte & (1 << 3) != 0;
    let chunked = byte & (1 << 4) != 0;
    let kind = match (byte >> 5) & 0b11 {
        0 => MessageKind::Req,
        1 => MessageKind::Ack,
        2 => MessageKind::Res,
        _ => return None,
    };
    Some(DecodedFlags {
        kind,
        codec,
        compressed,
        chunked,
    })
}

/// The unit exchanged on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub body: Value,
    pub flags: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Chunk index, present iff the chunked bit is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci: Option<u32>,
    /// Chunk total, present iff the chunked bit is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ct: Option<u32>,
    /// Original (pre-compression) size, present iff the compressed bit is
    /// set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<u64>,
    /// Compressed size, present iff the compressed bit is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cs: Option<u64>,
}
