//! Wire behavior for the Reliable Datagram Protocol: envelope
//! serialization, checksumming, pluggable compression, and
//! chunking/reassembly.
//!
//! This crate has no networking or `tokio` dependency — everything here is
//! synchronous and is exercised directly in `#[test]`s without a runtime.
//! `rdp-engine` is the layer that drives these behaviors from an actor.

pub mod checksum;
pub mod chunk;
pub mod codec;
pub mod compression;
pub mod error;

pub use chunk::{chunk_id, create_chunks, split_chunk_id, Reassembler};
pub use compression::{CodecRegistry, CompressionPipeline, CompressionResult};
pub use error::{CodecError, Result};
