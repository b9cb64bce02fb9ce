//! The actor-based protocol engine and request tracker.
//!
//! This crate owns the tokio task that drives the single-threaded event
//! loop: the datagram transport, the outstanding request tracker, and the
//! garbage-collection loop. `rdp-core` and `rdp-protocol` are synchronous
//! and runtime-agnostic; this is the layer that actually runs them.

pub mod engine;
pub mod error;
pub mod tracker;
pub mod transport;

pub use engine::{DeliveredMessage, EngineHandle, ProtocolEngine};
pub use error::{EngineError, Result};
pub use transport::{ChannelDatagramSocket, DatagramSocket, UdpDatagramSocket};
