//! Pluggable compression: codec implementations and the pipeline that
//! decides when and how to apply them.

mod codec;
mod pipeline;
mod registry;

pub use codec::{Codec, GzipCodec, Lz4Codec, NoneCodec, SnappyCodec, ZstdCodec};
pub use pipeline::{CompressionPipeline, CompressionResult};
pub use registry::CodecRegistry;
