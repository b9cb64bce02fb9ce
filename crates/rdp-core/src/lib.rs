//! Foundational data model for the Reliable Datagram Protocol.
//!
//! This crate provides the types shared by `rdp-protocol` (wire codec,
//! compression, chunking) and `rdp-engine` (the actor-based protocol
//! engine): the snowflake ID generator, the message envelope and its
//! bit-packed flags byte, socket/compression configuration, the remote
//! endpoint type, and the error taxonomy below the protocol-behavior layer.
//!
//! # Example
//!
//! ```rust
//! use rdp_core::ids::SnowflakeGenerator;
//! use rdp_core::envelope::{encode_flags, decode_flags, MessageKind, CodecTag};
//!
//! let gen = SnowflakeGenerator::new(1).unwrap();
//! let id = gen.generate().unwrap();
//!
//! let flags = encode_flags(MessageKind::Req, CodecTag::None, false, false);
//! assert_eq!(decode_flags(flags).unwrap().kind, MessageKind::Req);
//! println!("generated id: {id}");
//! ```

pub mod config;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod ids;

pub use config::{CompressionConfig, SocketConfig};
pub use endpoint::RemoteEndpoint;
pub use envelope::{decode_flags, encode_flags, CodecTag, DecodedFlags, Envelope, MessageKind};
pub use error::{ProtocolError, Result};
pub use ids::SnowflakeGenerator;

/// Crate version, for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
