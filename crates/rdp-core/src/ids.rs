//! Snowflake-style message ID generator.
//!
//! Produces 64-bit IDs packed as `((ts - epoch) << 22) | (worker_id << 12) |
//! sequence`, rendered to the wire as decimal strings. A single generator is
//! safe for concurrent callers; the internal state is guarded by a
//! `parking_lot::Mutex` since, unlike the rest of the engine, callers of
//! `generate()` are not necessarily confined to the single-threaded protocol
//! event loop (e.g. a caller minting a request ID before handing it to the
//! engine).

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::error::{ProtocolError, Result};

/// 2024-01-01T00:00:00Z, in milliseconds since the Unix epoch.
pub const DEFAULT_EPOCH_MS: u64 = 1_704_067_200_000;

const WORKER_ID_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_WORKER_ID: u16 = (1 << WORKER_ID_BITS) - 1;
const MAX_SEQUENCE: u16 = (1 << SEQUENCE_BITS) - 1;

struct State {
    last_timestamp_ms: u64,
    sequence: u16,
}

/// Generates monotonically-increasing, globally-unique message IDs.
pub struct SnowflakeGenerator {
    worker_id: u16,
    epoch_ms: u64,
    state: Mutex<State>,
}

/// The decomposed fields of a generated ID, as returned by `parse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedId {
    pub timestamp_ms: u64,
    pub worker_id: u16,
    pub sequence: u16,
}

impl SnowflakeGenerator {
    /// Construct a generator for `worker_id`, using the default epoch.
    pub fn new(worker_id: u16) -> Result<Self> {
        Self::with_epoch(worker_id, DEFAULT_EPOCH_MS)
    }

    /// Construct a generator for `worker_id` with an explicit epoch.
    pub fn with_epoch(worker_id: u16, epoch_ms: u64) -> Result<Self> {
        if worker_id > MAX_WORKER_ID {
            return Err(ProtocolError::InvalidWorkerId(worker_id));
        }
        Ok(Self {
            worker_id,
            epoch_ms,
            state: Mutex::new(State {
                last_timestamp_ms: 0,
                sequence: 0,
            }),
        })
    }

    /// Produce the next ID as a decimal string.
    ///
    /// Busy-waits to the next millisecond if the per-ms sequence space is
    /// exhausted within the same tick. Fails with `ClockBackwards` if the
    /// system clock is observed to move backwards relative to the last
    /// generated ID.
    pub fn generate(&self) -> Result<String> {
        let mut state = self.state.lock();
        let mut now = now_ms();

        if now < state.last_timestamp_ms {
            return Err(ProtocolError::ClockBackwards {
                last_timestamp_ms: state.last_timestamp_ms,
                observed_ms: now,
            });
        }

        if now == state.last_timestamp_ms {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                // Sequence space exhausted within this millisecond; busy-wait
                // for the clock to advance.
                while now <= state.last_timestamp_ms {
                    now = now_ms();
                }
            }
        } else {
            state.sequence = 0;
        }

        state.last_timestamp_ms = now;
        let id = ((now - self.epoch_ms) << (WORKER_ID_BITS + SEQUENCE_BITS))
            | ((self.worker_id as u64) << SEQUENCE_BITS)
            | state.sequence as u64;
        Ok(id.to_string())
    }

    /// Decompose a previously-generated ID into timestamp/worker/sequence,
    /// for diagnostics.
    pub fn parse(&self, id: &str) -> Option<ParsedId> {
        parse_id(id, self.epoch_ms)
    }
}

/// Decompose an ID string using an explicit epoch, without needing a live
/// generator instance.
pub fn parse_id(id: &str, epoch_ms: u64) -> Option<ParsedId> {
    let raw: u64 = id.parse().ok()?;
    let sequence = (raw & MAX_SEQUENCE as u64) as u16;
    let worker_id = ((raw >> SEQUENCE_BITS) & MAX_WORKER_ID as u64) as u16;
    let timestamp_ms = (raw >> (WORKER_ID_BITS + SEQUENCE_BITS)) + epoch_ms;
    Some(ParsedId {
        timestamp_ms,
        worker_id,
        sequence,
    })
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}
