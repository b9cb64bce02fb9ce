//! Request Tracker: sender-side bookkeeping for outstanding REQs, their
//! ACK correlation, and their retry/timeout timers.
//!
//! The Tracker's map is mutated only from the engine's own event loop, so
//! it carries no internal lock — `rdp-engine::engine` is the sole owner
//! and driver. Timers are realized as spawned `tokio::time::sleep` tasks
//! that report back into the engine's own command channel: `tokio::spawn`
//! plays the role of scheduling a one-shot timer, `JoinHandle::abort` the
//! role of cancelling it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// How a request handle is resolved, delivered once to its `on_resolve`
/// channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// An ACK resolved the handle directly (chunked sends: a chunk REQ has
    /// no RES of its own, so its ACK is terminal).
    Acked,
    /// A RES carrying `body` resolved the handle (single sends).
    Resolved(Value),
    /// `request_timeout_ms` elapsed with no resolution.
    TimedOut,
}

/// One outstanding REQ (a whole single send, or one chunk of a chunked
/// send).
struct RequestHandle {
    /// Whether the matching ACK has already been observed. Chunk handles
    /// are removed immediately on ACK (see [`Tracker::handle_ack`]), so
    /// this only stays `true`-without-removal for single-send handles
    /// awaiting their RES.
    ack_received: bool,
    /// If `true`, an ACK alone resolves (and removes) the handle. If
    /// `false`, an ACK only stops retries; the handle waits for a RES.
    complete_on_ack: bool,
    retry_count: u32,
    created_at: Instant,
    resolve_tx: Option<oneshot::Sender<Resolution>>,
    retry_timer: Option<JoinHandle<()>>,
    timeout_timer: Option<JoinHandle<()>>,
}

impl RequestHandle {
    fn cancel_timers(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.timeout_timer.take() {
            timer.abort();
        }
    }
}

/// Sender-side tracker of outstanding requests, keyed by envelope id (a
/// whole id for a single send, or `base_id-chunk-i` for one chunk).
#[derive(Default)]
pub struct Tracker {
    handles: HashMap<String, RequestHandle>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly-sent REQ. `timeout_timer` is a task already spawned
    /// by the caller to fire the request's deadline; it is cancelled if the
    /// handle resolves first.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        complete_on_ack: bool,
        resolve_tx: oneshot::Sender<Resolution>,
        timeout_timer: JoinHandle<()>,
    ) {
        self.handles.insert(
            id.into(),
            RequestHandle {
                ack_received: false,
                complete_on_ack,
                retry_count: 0,
                created_at: Instant::now(),
                resolve_tx: Some(resolve_tx),
                retry_timer: None,
                timeout_timer: Some(timeout_timer),
            },
        );
    }

    pub fn contains(&self, id: &str) -> bool {
        self.handles.contains_key(id)
    }

    /// Replace any previous retry timer for `id`. Returns `false` if `id`
    /// is unknown (it may have already resolved or been cleaned up).
    pub fn set_retry_timer(&mut self, id: &str, timer: JoinHandle<()>) -> bool {
        match self.handles.get_mut(id) {
            Some(handle) => {
                if let Some(previous) = handle.retry_timer.replace(timer) {
                    previous.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Record that a retry fired, returning the new retry count, or `None`
    /// if `id` is unknown.
    pub fn increment_retry(&mut self, id: &str) -> Option<u32> {
        let handle = self.handles.get_mut(id)?;
        handle.retry_count += 1;
        Some(handle.retry_count)
    }

    pub fn retry_count(&self, id: &str) -> Option<u32> {
        self.handles.get(id).map(|h| h.retry_count)
    }

    pub fn is_acked(&self, id: &str) -> Option<bool> {
        self.handles.get(id).map(|h| h.ack_received)
    }

    /// Apply an ACK for `id`. For a chunk handle (`complete_on_ack`), this
    /// resolves and removes it outright. For a single-send handle, this
    /// only flips `ack_received` and cancels the retry timer — the handle
    /// still waits for its RES. Returns `true` iff the handle was found.
    pub fn handle_ack(&mut self, id: &str) -> bool {
        let Some(handle) = self.handles.get_mut(id) else {
            return false;
        };
        handle.ack_received = true;
        if let Some(retry_timer) = handle.retry_timer.take() {
            retry_timer.abort();
        }
        if handle.complete_on_ack {
            self.invoke_and_remove(id, Resolution::Acked);
        }
        true
    }

    /// Clear both timers and resolve the handle's callback exactly once,
    /// removing it. Returns `true` iff a handle was found.
    pub fn invoke_and_remove(&mut self, id: &str, outcome: Resolution) -> bool {
        let Some(mut handle) = self.handles.remove(id) else {
            return false;
        };
        handle.cancel_timers();
        if let Some(tx) = handle.resolve_tx.take() {
            // A dropped receiver means the caller stopped waiting (e.g. it
            // already observed a prior timeout via a different path); that
            // is not itself an error the tracker needs to report.
            let _ = tx.send(outcome);
        }
        true
    }

    /// Remove handles older than `max_age`, without invoking their
    /// callbacks — used by the periodic GC sweep, independent of each
    /// handle's own request_timeout.
    pub fn cleanup_old(&mut self, now: Instant, max_age: Duration) -> usize {
        let stale: Vec<String> = self
            .handles
            .iter()
            .filter(|(_, h)| now.saturating_duration_since(h.created_at) > max_age)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            if let Some(mut handle) = self.handles.remove(id) {
                handle.cancel_timers();
            }
        }
        debug!(count = stale.len(), "tracker GC swept stale handles");
        stale.len()
    }

    /// Remove every handle without invoking callbacks, as part of engine
    /// teardown.
    pub fn clear(&mut self) {
        for (_, mut handle) in self.handles.drain() {
            handle.cancel_timers();
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_timer() -> JoinHandle<()> {
        tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        })
    }

    #[tokio::test]
    async fn single_send_ack_does_not_resolve_but_res_does() {
        let mut tracker = Tracker::new();
        let (tx, rx) = oneshot::channel();
        tracker.register("m1", false, tx, noop_timer());

        assert!(tracker.handle_ack("m1"));
        assert_eq!(tracker.is_acked("m1"), Some(true));
        assert!(tracker.contains("m1"), "single send waits for RES after ACK");

        tracker.invoke_and_remove("m1", Resolution::Resolved(serde_json::json!("hi")));
        assert!(!tracker.contains("m1"));
        assert_eq!(
            rx.await.unwrap(),
            Resolution::Resolved(serde_json::json!("hi"))
        );
    }

    #[tokio::test]
    async fn chunk_send_resolves_on_ack_alone() {
        let mut tracker = Tracker::new();
        let (tx, rx) = oneshot::channel();
        tracker.register("base-chunk-0", true, tx, noop_timer());

        assert!(tracker.handle_ack("base-chunk-0"));
        assert!(!tracker.contains("base-chunk-0"));
        assert_eq!(rx.await.unwrap(), Resolution::Acked);
    }

    #[tokio::test]
    async fn unknown_id_operations_return_false_or_none() {
        let mut tracker = Tracker::new();
        assert!(!tracker.handle_ack("missing"));
        assert_eq!(tracker.increment_retry("missing"), None);
        assert!(!tracker.set_retry_timer("missing", noop_timer()));
        assert!(!tracker.invoke_and_remove("missing", Resolution::Acked));
    }

    #[tokio::test]
    async fn cleanup_old_removes_without_resolving_callback() {
        let mut tracker = Tracker::new();
        let (tx, rx) = oneshot::channel();
        tracker.register("stale", false, tx, noop_timer());

        let removed = tracker.cleanup_old(Instant::now() + Duration::from_secs(120), Duration::from_secs(60));
        assert_eq!(removed, 1);
        assert!(tracker.is_empty());
        // The handle was dropped, not resolved: the receiver observes a
        // closed channel rather than a `Resolution`.
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn increment_retry_tracks_count() {
        let mut tracker = Tracker::new();
        let (tx, _rx) = oneshot::channel();
        tracker.register("r1", false, tx, noop_timer());
        assert_eq!(tracker.increment_retry("r1"), Some(1));
        assert_eq!(tracker.increment_retry("r1"), Some(2));
        assert_eq!(tracker.retry_count("r1"), Some(2));
    }

    #[tokio::test]
    async fn clear_drops_all_handles_without_resolving() {
        let mut tracker = Tracker::new();
        let (tx, rx) = oneshot::channel();
        tracker.register("c1", false, tx, noop_timer());
        tracker.clear();
        assert!(tracker.is_empty());
        assert!(rx.await.is_err());
    }
}
