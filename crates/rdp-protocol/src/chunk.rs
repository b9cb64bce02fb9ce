//! Chunker / Reassembler: splits an oversized payload into base64
//! chunk strings on send, and reassembles them on receive — tolerating
//! reordering, duplicates, and abandoning assemblies that never complete.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rdp_core::{CodecTag, RemoteEndpoint};
use tracing::debug;

/// The wire suffix joining a base id to a chunk index. Receivers recover
/// the base id by stripping this suffix.
const CHUNK_SUFFIX: &str = "-chunk-";

/// Build the id of chunk `index` of the logical message `base_id`.
pub fn chunk_id(base_id: &str, index: u32) -> String {
    format!("{base_id}{CHUNK_SUFFIX}{index}")
}

/// Recover `(base_id, index)` from a chunk id, or `None` if `id` does not
/// match the `base_id-chunk-<index>` pattern.
pub fn split_chunk_id(id: &str) -> Option<(&str, u32)> {
    let pos = id.rfind(CHUNK_SUFFIX)?;
    let (base, rest) = id.split_at(pos);
    let index = rest[CHUNK_SUFFIX.len()..].parse().ok()?;
    Some((base, index))
}

/// Split `data` into `ceil(len / chunk_size)` base64-encoded pieces, in
/// order.
pub fn create_chunks(data: &[u8], chunk_size: usize) -> Vec<String> {
    if data.is_empty() {
        return vec![BASE64.encode(data)];
    }
    data.chunks(chunk_size.max(1))
        .map(|chunk| BASE64.encode(chunk))
        .collect()
}

struct Assembly {
    slots: Vec<Option<Vec<u8>>>,
    received_count: usize,
    created_at: Instant,
    #[allow(dead_code)]
    remote: RemoteEndpoint,
    codec: Option<CodecTag>,
}

/// Receiver-side collector of in-flight chunked messages, keyed by base id.
#[derive(Default)]
pub struct Reassembler {
    assemblies: HashMap<String, Assembly>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin collecting chunks for `base_id`, if not already in progress.
    /// Idempotent: a second `init_assembly` for a base id already being
    /// assembled is a no-op, since the codec and remote were already
    /// recorded from whichever chunk arrived first.
    pub fn init_assembly(
        &mut self,
        base_id: &str,
        total: u32,
        remote: RemoteEndpoint,
        codec: Option<CodecTag>,
    ) {
        self.assemblies.entry(base_id.to_string()).or_insert_with(|| Assembly {
            slots: vec![None; total as usize],
            received_count: 0,
            created_at: Instant::now(),
            remote,
            codec,
        });
    }

    /// Record chunk `index` of `base_id`. Duplicates (a slot already filled)
    /// are silently ignored. Returns `true` exactly when this call completes
    /// the assembly (`received_count == total` for the first time).
    pub fn add_chunk(&mut self, base_id: &str, index: u32, data: Vec<u8>) -> bool {
        let Some(assembly) = self.assemblies.get_mut(base_id) else {
            debug!(base_id, "add_chunk for unknown assembly, dropping");
            return false;
        };
        let Some(slot) = assembly.slots.get_mut(index as usize) else {
            debug!(base_id, index, "chunk index out of bounds, dropping");
            return false;
        };
        if slot.is_some() {
            debug!(base_id, index, "duplicate chunk ignored");
            return false;
        }
        *slot = Some(data);
        assembly.received_count += 1;
        assembly.received_count == assembly.slots.len()
    }

    /// If `base_id`'s assembly is complete, concatenate its chunks in index
    /// order and remove it. Returns `None` if incomplete or unknown.
    pub fn get_assembled_data(&mut self, base_id: &str) -> Option<(Vec<u8>, Option<CodecTag>)> {
        let assembly = self.assemblies.get(base_id)?;
        if assembly.received_count != assembly.slots.len() {
            return None;
        }
        if assembly.slots.iter().any(|slot| slot.is_none()) {
            return None;
        }
        let assembly = self.assemblies.remove(base_id)?;
        let mut data = Vec::new();
        for slot in assembly.slots {
            data.extend(slot.expect("checked non-empty above"));
        }
        Some((data, assembly.codec))
    }

    /// Remove assemblies whose age exceeds `timeout`, returning how many
    /// were discarded. No negative acknowledgement is sent; the sender's own
    /// retry/timeout path observes the stall.
    pub fn cleanup_stale(&mut self, now: Instant, timeout: Duration) -> usize {
        let before = self.assemblies.len();
        self.assemblies
            .retain(|_, assembly| now.saturating_duration_since(assembly.created_at) <= timeout);
        before - self.assemblies.len()
    }

    pub fn in_progress_count(&self) -> usize {
        self.assemblies.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> RemoteEndpoint {
        RemoteEndpoint::new("127.0.0.1", 9000)
    }

    #[test]
    fn chunk_id_round_trips() {
        let id = chunk_id("abc123", 7);
        assert_eq!(id, "abc123-chunk-7");
        assert_eq!(split_chunk_id(&id), Some(("abc123", 7)));
    }

    #[test]
    fn create_chunks_splits_by_ceil_division() {
        let data = vec![0u8; 2500];
        let chunks = create_chunks(&data, 1200);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn exact_multiple_does_not_create_empty_trailing_chunk() {
        let data = vec![0u8; 2400];
        let chunks = create_chunks(&data, 1200);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn reassembles_out_of_order_chunks() {
        let mut reassembler = Reassembler::new();
        reassembler.init_assembly("m1", 3, endpoint(), None);
        assert!(!reassembler.add_chunk("m1", 2, b"ghi".to_vec()));
        assert!(!reassembler.add_chunk("m1", 0, b"abc".to_vec()));
        assert!(reassembler.add_chunk("m1", 1, b"def".to_vec()));

        let (data, codec) = reassembler.get_assembled_data("m1").unwrap();
        assert_eq!(data, b"abcdefghi".to_vec());
        assert_eq!(codec, None);
    }

    #[test]
    fn duplicate_chunk_is_ignored_and_does_not_recount() {
        let mut reassembler = Reassembler::new();
        reassembler.init_assembly("m2", 2, endpoint(), None);
        assert!(!reassembler.add_chunk("m2", 0, b"ab".to_vec()));
        assert!(!reassembler.add_chunk("m2", 0, b"zz".to_vec()), "duplicate must not re-signal completion");
        assert!(reassembler.add_chunk("m2", 1, b"cd".to_vec()));
        let (data, _) = reassembler.get_assembled_data("m2").unwrap();
        assert_eq!(data, b"abcd".to_vec());
    }

    #[test]
    fn incomplete_assembly_returns_none() {
        let mut reassembler = Reassembler::new();
        reassembler.init_assembly("m3", 2, endpoint(), None);
        reassembler.add_chunk("m3", 0, b"a".to_vec());
        assert!(reassembler.get_assembled_data("m3").is_none());
    }

    #[test]
    fn records_codec_from_first_arriving_chunk() {
        let mut reassembler = Reassembler::new();
        reassembler.init_assembly("m4", 1, endpoint(), Some(CodecTag::Zstd));
        reassembler.add_chunk("m4", 0, b"x".to_vec());
        let (_, codec) = reassembler.get_assembled_data("m4").unwrap();
        assert_eq!(codec, Some(CodecTag::Zstd));
    }

    #[test]
    fn cleanup_stale_removes_old_assemblies_only() {
        let mut reassembler = Reassembler::new();
        reassembler.init_assembly("old", 2, endpoint(), None);
        let now = Instant::now();
        let removed = reassembler.cleanup_stale(now + Duration::from_secs(60), Duration::from_secs(30));
        assert_eq!(removed, 1);
        assert_eq!(reassembler.in_progress_count(), 0);
    }
}
