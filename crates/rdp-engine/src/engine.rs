//! The protocol engine: orchestrates the send path (compress → chunk →
//! retry) and the receive path (parse → ACK → route → decompress), and owns
//! the garbage-collection loop.
//!
//! Exposed as a tokio actor: `ProtocolEngine::new` returns the engine
//! together with a cloneable `EngineHandle` and a channel of delivered
//! application messages; `ProtocolEngine::run` drives a single-threaded
//! event loop so the Tracker and Reassembler maps never need a lock of
//! their own.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rdp_core::envelope::{decode_flags, encode_flags, CodecTag, DecodedFlags, MessageKind};
use rdp_core::{Envelope, RemoteEndpoint, SnowflakeGenerator, SocketConfig};
use rdp_protocol::chunk::{chunk_id, create_chunks, split_chunk_id, Reassembler};
use rdp_protocol::compression::{CompressionPipeline, CompressionResult};
use rdp_protocol::{checksum, codec};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result as EngineResult};
use crate::tracker::{Resolution, Tracker};
use crate::transport::DatagramSocket;

/// How often the GC sweep runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(10);
/// Age, independent of any single request's own timeout, after which the
/// Tracker's periodic sweep removes a handle.
const REQUEST_CLEANUP_AGE: Duration = Duration::from_secs(60);

/// A fully reassembled (and decompressed) logical message delivered to the
/// application, paired with who sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredMessage {
    /// The id of the originating REQ (the whole id for a single send, or the
    /// base id for a chunked one) — what [`EngineHandle::reply`] expects as
    /// `request_id` so the RES lands on the sender's matching tracker entry.
    pub id: String,
    pub body: Value,
    pub remote: RemoteEndpoint,
}

/// Commands accepted by the engine's event loop.
enum EngineCommand {
    Send {
        message: Value,
        remote: RemoteEndpoint,
        respond_to: oneshot::Sender<EngineResult<()>>,
    },
    Reply {
        request_id: String,
        body: Value,
        remote: RemoteEndpoint,
        respond_to: oneshot::Sender<EngineResult<()>>,
    },
    Configure {
        config: SocketConfig,
        respond_to: oneshot::Sender<EngineResult<()>>,
    },
    Close {
        respond_to: oneshot::Sender<()>,
    },
}

/// Events fed back into the event loop by timers spawned for retry and
/// request-timeout deadlines. `tokio::spawn` plays the role of
/// `schedule_once`; `JoinHandle::abort` (called from [`Tracker`]) plays
/// `cancel`.
enum InternalEvent {
    Timeout { id: String },
    Retry {
        id: String,
        envelope: Box<Envelope>,
        remote: RemoteEndpoint,
    },
}

/// Aggregates the per-chunk ACK resolutions of one chunked send into a
/// single completion for the caller: the send-side callback completes only
/// when all chunks are ACKed, and any chunk timeout aborts the logical send
/// with failure.
struct ChunkAggregate {
    remaining: usize,
    failed: bool,
    respond_to: Option<oneshot::Sender<EngineResult<()>>>,
}

/// Cloneable handle for interacting with a running [`ProtocolEngine`].
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    /// Send `message` to `remote`. Resolves once every envelope the message
    /// was split into (one, or a chunk sequence) has been ACKed, or fails
    /// with [`EngineError::RequestTimeout`] if any of them never is.
    pub async fn send(&self, message: Value, remote: RemoteEndpoint) -> EngineResult<()> {
        let (respond_to, rx) = oneshot::channel();
        self.command_tx
            .send(EngineCommand::Send {
                message,
                remote,
                respond_to,
            })
            .await
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    /// Send `body` back as the RES for a previously-received `request_id`.
    /// Fire-and-forget on the wire (no retry: the original sender's own
    /// `request_timeout_ms` is the backstop if this RES is lost).
    pub async fn reply(
        &self,
        request_id: String,
        body: Value,
        remote: RemoteEndpoint,
    ) -> EngineResult<()> {
        let (respond_to, rx) = oneshot::channel();
        self.command_tx
            .send(EngineCommand::Reply {
                request_id,
                body,
                remote,
                respond_to,
            })
            .await
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    /// Re-key the engine with new socket/compression parameters. Validated
    /// before being applied.
    pub async fn configure(&self, config: SocketConfig) -> EngineResult<()> {
        let (respond_to, rx) = oneshot::channel();
        self.command_tx
            .send(EngineCommand::Configure { config, respond_to })
            .await
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    /// Full teardown: stop the cleanup tick, drop all tracker/assembly
    /// state without invoking callbacks, close the socket.
    pub async fn close(&self) -> EngineResult<()> {
        let (respond_to, rx) = oneshot::channel();
        let _ = self.command_tx.send(EngineCommand::Close { respond_to }).await;
        let _ = rx.await;
        Ok(())
    }
}

/// The actor driving the protocol: owns the Tracker, the Reassembler, the
/// ID generator, the compression pipeline, and the datagram socket.
pub struct ProtocolEngine {
    socket: Arc<dyn DatagramSocket>,
    config: SocketConfig,
    id_gen: SnowflakeGenerator,
    compression: CompressionPipeline,
    tracker: Tracker,
    reassembler: Reassembler,
    command_rx: mpsc::Receiver<EngineCommand>,
    message_tx: mpsc::UnboundedSender<DeliveredMessage>,
    passthrough_tx: Option<mpsc::UnboundedSender<(Vec<u8>, RemoteEndpoint)>>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
}

impl ProtocolEngine {
    /// Build a new engine atop `socket`, identified by `worker_id` for
    /// snowflake ID generation. Returns the engine (to be driven by
    /// [`Self::run`]), a handle, and the channel of reassembled/decompressed
    /// application messages.
    pub fn new(
        socket: Arc<dyn DatagramSocket>,
        config: SocketConfig,
        worker_id: u16,
    ) -> EngineResult<(Self, EngineHandle, mpsc::UnboundedReceiver<DeliveredMessage>)> {
        config.validate()?;
        let id_gen = SnowflakeGenerator::new(worker_id)?;
        let (command_tx, command_rx) = mpsc::channel(256);
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let engine = Self {
            compression: CompressionPipeline::new(config.compression.clone()),
            socket,
            config,
            id_gen,
            tracker: Tracker::new(),
            reassembler: Reassembler::new(),
            command_rx,
            message_tx,
            passthrough_tx: None,
            internal_tx,
            internal_rx,
        };
        let handle = EngineHandle { command_tx };
        Ok((engine, handle, message_rx))
    }

    /// Opt into receiving non-envelope datagrams instead of having them
    /// silently logged and dropped.
    pub fn with_passthrough(mut self) -> (Self, mpsc::UnboundedReceiver<(Vec<u8>, RemoteEndpoint)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.passthrough_tx = Some(tx);
        (self, rx)
    }

    /// Drive the engine's single-threaded event loop until
    /// [`EngineHandle::close`] is called or the underlying socket stops
    /// yielding datagrams.
    pub async fn run(mut self) {
        info!("protocol engine started");
        let mut cleanup_interval = tokio::time::interval(CLEANUP_INTERVAL);
        cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if !self.handle_command(cmd).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                datagram = self.socket.recv_from() => {
                    match datagram {
                        Some((bytes, remote)) => self.handle_datagram(bytes, remote).await,
                        None => break,
                    }
                }
                Some(event) = self.internal_rx.recv() => {
                    self.handle_internal_event(event).await;
                }
                _ = cleanup_interval.tick() => {
                    self.run_gc();
                }
            }
        }

        self.teardown().await;
        info!("protocol engine stopped");
    }

    // ---- command handling ----

    async fn handle_command(&mut self, cmd: EngineCommand) -> bool {
        match cmd {
            EngineCommand::Send {
                message,
                remote,
                respond_to,
            } => {
                self.handle_send(message, remote, respond_to).await;
                true
            }
            EngineCommand::Reply {
                request_id,
                body,
                remote,
                respond_to,
            } => {
                self.handle_reply(request_id, body, remote).await;
                let _ = respond_to.send(Ok(()));
                true
            }
            EngineCommand::Configure { config, respond_to } => {
                let result = config.validate().map_err(EngineError::from);
                if result.is_ok() {
                    self.compression.set_config(config.compression.clone());
                    self.config = config;
                    info!("configuration applied");
                }
                let _ = respond_to.send(result);
                true
            }
            EngineCommand::Close { respond_to } => {
                let _ = respond_to.send(());
                false
            }
        }
    }

    async fn handle_reply(&self, request_id: String, body: Value, remote: RemoteEndpoint) {
        let checksum = self.checksum_for(&body);
        let envelope = Envelope {
            id: request_id,
            body,
            flags: encode_flags(MessageKind::Res, CodecTag::None, false, false),
            checksum,
            ci: None,
            ct: None,
            os: None,
            cs: None,
        };
        let bytes = codec::serialize(&envelope);
        if let Err(e) = self.socket.send_to(&bytes, &remote).await {
            warn!(id = %envelope.id, error = %e, "failed to send RES");
        }
    }

    // ---- send path ----

    async fn handle_send(
        &mut self,
        message: Value,
        remote: RemoteEndpoint,
        respond_to: oneshot::Sender<EngineResult<()>>,
    ) {
        let original_bytes =
            serde_json::to_vec(&message).expect("serde_json::Value serialization is infallible");

        let compression = if self.compression.should_compress(original_bytes.len()) {
            self.compression.try_compress(&original_bytes)
        } else {
            None
        };

        let wire_bytes: Vec<u8> = match &compression {
            Some(result) => result.compressed.clone(),
            None => original_bytes,
        };

        if wire_bytes.len() <= self.config.max_message_size {
            let body = match &compression {
                Some(result) => Value::String(result.to_base64()),
                None => message,
            };
            self.single_send(body, compression, remote, respond_to).await;
        } else {
            self.chunked_send(wire_bytes, compression, remote, respond_to)
                .await;
        }
    }

    async fn single_send(
        &mut self,
        body: Value,
        compression: Option<CompressionResult>,
        remote: RemoteEndpoint,
        respond_to: oneshot::Sender<EngineResult<()>>,
    ) {
        let id = match self.id_gen.generate() {
            Ok(id) => id,
            Err(e) => {
                let _ = respond_to.send(Err(EngineError::Protocol(e)));
                return;
            }
        };

        let codec_tag = compression.as_ref().map(|c| c.codec).unwrap_or(CodecTag::None);
        let flags = encode_flags(MessageKind::Req, codec_tag, compression.is_some(), false);
        let checksum = self.checksum_for(&body);

        let envelope = Envelope {
            id: id.clone(),
            body,
            flags,
            checksum,
            ci: None,
            ct: None,
            os: compression.as_ref().map(|c| c.original_size),
            cs: compression.as_ref().map(|c| c.compressed_size),
        };

        let (resolve_tx, resolve_rx) = oneshot::channel();
        let timeout_timer = self.spawn_timeout_timer(id.clone());
        self.tracker.register(id.clone(), false, resolve_tx, timeout_timer);

        let id_for_task = id.clone();
        tokio::spawn(async move {
            let result = match resolve_rx.await {
                Ok(Resolution::Resolved(_)) | Ok(Resolution::Acked) => Ok(()),
                Ok(Resolution::TimedOut) => Err(EngineError::RequestTimeout(id_for_task)),
                Err(_) => Err(EngineError::Closed),
            };
            let _ = respond_to.send(result);
        });

        self.send_with_retry(id, envelope, remote).await;
    }

    async fn chunked_send(
        &mut self,
        wire_bytes: Vec<u8>,
        compression: Option<CompressionResult>,
        remote: RemoteEndpoint,
        respond_to: oneshot::Sender<EngineResult<()>>,
    ) {
        let base_id = match self.id_gen.generate() {
            Ok(id) => id,
            Err(e) => {
                let _ = respond_to.send(Err(EngineError::Protocol(e)));
                return;
            }
        };

        let chunks = create_chunks(&wire_bytes, self.config.chunk_size);
        let total = chunks.len() as u32;
        let codec_tag = compression.as_ref().map(|c| c.codec).unwrap_or(CodecTag::None);
        let compressed = compression.is_some();

        let aggregate = Arc::new(Mutex::new(ChunkAggregate {
            remaining: chunks.len(),
            failed: false,
            respond_to: Some(respond_to),
        }));

        for (index, chunk_b64) in chunks.into_iter().enumerate() {
            let index = index as u32;
            let id = chunk_id(&base_id, index);
            let flags = encode_flags(MessageKind::Req, codec_tag, compressed, true);
            let body = Value::String(chunk_b64);
            let checksum = self.checksum_for(&body);

            let envelope = Envelope {
                id: id.clone(),
                body,
                flags,
                checksum,
                ci: Some(index),
                ct: Some(total),
                os: if index == 0 {
                    compression.as_ref().map(|c| c.original_size)
                } else {
                    None
                },
                cs: if index == 0 {
                    compression.as_ref().map(|c| c.compressed_size)
                } else {
                    None
                },
            };

            let (resolve_tx, resolve_rx) = oneshot::channel();
            let timeout_timer = self.spawn_timeout_timer(id.clone());
            self.tracker.register(id.clone(), true, resolve_tx, timeout_timer);

            let agg = aggregate.clone();
            let base_id_for_task = base_id.clone();
            tokio::spawn(async move {
                let outcome = resolve_rx.await;
                let failed = !matches!(outcome, Ok(Resolution::Acked));
                let mut guard = agg.lock();
                guard.remaining = guard.remaining.saturating_sub(1);
                if failed {
                    guard.failed = true;
                    if let Some(tx) = guard.respond_to.take() {
                        let _ = tx.send(Err(EngineError::RequestTimeout(base_id_for_task)));
                    }
                } else if guard.remaining == 0 && !guard.failed {
                    if let Some(tx) = guard.respond_to.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
            });

            self.send_with_retry(id, envelope, remote.clone()).await;
        }
    }

    /// Emit `envelope` and, unless it is already ACKed or out of retries,
    /// arm the next retry timer.
    async fn send_with_retry(&mut self, id: String, envelope: Envelope, remote: RemoteEndpoint) {
        let bytes = codec::serialize(&envelope);
        if let Err(e) = self.socket.send_to(&bytes, &remote).await {
            warn!(id = %id, error = %e, "datagram send failed");
        }
        self.maybe_schedule_retry(id, envelope, remote);
    }

    fn maybe_schedule_retry(&mut self, id: String, envelope: Envelope, remote: RemoteEndpoint) {
        match self.tracker.is_acked(&id) {
            Some(false) => {}
            _ => return,
        }
        if self.tracker.retry_count(&id).unwrap_or(0) >= self.config.max_retries {
            return;
        }

        let internal_tx = self.internal_tx.clone();
        let interval = Duration::from_millis(self.config.retry_interval_ms);
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = internal_tx.send(InternalEvent::Retry {
                id: timer_id,
                envelope: Box::new(envelope),
                remote,
            });
        });
        self.tracker.set_retry_timer(&id, timer);
    }

    fn spawn_timeout_timer(&self, id: String) -> tokio::task::JoinHandle<()> {
        let internal_tx = self.internal_tx.clone();
        let duration = Duration::from_millis(self.config.request_timeout_ms);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = internal_tx.send(InternalEvent::Timeout { id });
        })
    }

    async fn handle_internal_event(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::Timeout { id } => {
                if self.tracker.invoke_and_remove(&id, Resolution::TimedOut) {
                    debug!(id = %id, "request timed out");
                }
            }
            InternalEvent::Retry { id, envelope, remote } => {
                if let Some(count) = self.tracker.increment_retry(&id) {
                    debug!(id = %id, retry_count = count, "retrying send");
                    self.send_with_retry(id, *envelope, remote).await;
                }
            }
        }
    }

    // ---- receive path ----

    async fn handle_datagram(&mut self, bytes: Vec<u8>, remote: RemoteEndpoint) {
        let Some(envelope) = codec::parse(&bytes) else {
            debug!(remote = %remote, "non-envelope datagram, passthrough");
            self.passthrough(bytes, remote);
            return;
        };
        let Some(decoded) = decode_flags(envelope.flags) else {
            debug!(id = %envelope.id, "envelope with undefined flag bits, passthrough");
            self.passthrough(bytes, remote);
            return;
        };

        match decoded.kind {
            MessageKind::Req => self.handle_req(envelope, decoded, remote).await,
            MessageKind::Ack => self.handle_ack(envelope),
            MessageKind::Res => self.handle_res(envelope),
        }
    }

    fn passthrough(&self, bytes: Vec<u8>, remote: RemoteEndpoint) {
        if let Some(tx) = &self.passthrough_tx {
            let _ = tx.send((bytes, remote));
        }
    }

    async fn handle_req(&mut self, envelope: Envelope, decoded: DecodedFlags, remote: RemoteEndpoint) {
        if !self.checksum_ok(&envelope) {
            warn!(id = %envelope.id, "checksum mismatch on REQ, dropping silently");
            return;
        }

        // ACK before any application-visible work, so the sender can stop
        // retrying even if reassembly/decompression/delivery is slow.
        self.send_ack(&envelope.id, &remote).await;

        if decoded.chunked {
            self.handle_chunk(envelope, decoded, remote).await;
        } else {
            self.deliver_single(envelope, decoded, remote);
        }
    }

    fn handle_ack(&mut self, envelope: Envelope) {
        if self.tracker.handle_ack(&envelope.id) {
            debug!(id = %envelope.id, "ack received");
        }
    }

    fn handle_res(&mut self, envelope: Envelope) {
        if !self.checksum_ok(&envelope) {
            warn!(id = %envelope.id, "checksum mismatch on RES, dropping silently");
            return;
        }
        self.tracker
            .invoke_and_remove(&envelope.id, Resolution::Resolved(envelope.body));
    }

    async fn send_ack(&self, id: &str, remote: &RemoteEndpoint) {
        let envelope = Envelope {
            id: id.to_string(),
            body: Value::Null,
            flags: encode_flags(MessageKind::Ack, CodecTag::None, false, false),
            checksum: None,
            ci: None,
            ct: None,
            os: None,
            cs: None,
        };
        let bytes = codec::serialize(&envelope);
        if let Err(e) = self.socket.send_to(&bytes, remote).await {
            warn!(id = %id, error = %e, "failed to send ACK");
        }
    }

    fn deliver_single(&mut self, envelope: Envelope, decoded: DecodedFlags, remote: RemoteEndpoint) {
        let id = envelope.id;
        let body = if decoded.compressed {
            let Value::String(b64) = &envelope.body else {
                warn!(id = %id, "compressed envelope body is not a string, dropping");
                return;
            };
            let Some(raw) = self.compression.try_decompress(b64, decoded.codec) else {
                warn!(id = %id, codec = ?decoded.codec, "decompression failed, delivery dropped");
                return;
            };
            match serde_json::from_slice(&raw) {
                Ok(value) => value,
                Err(_) => {
                    warn!(id = %id, "decompressed bytes are not valid json, dropping");
                    return;
                }
            }
        } else {
            envelope.body
        };
        let _ = self.message_tx.send(DeliveredMessage { id, body, remote });
    }

    async fn handle_chunk(&mut self, envelope: Envelope, decoded: DecodedFlags, remote: RemoteEndpoint) {
        let Some((base_id, index)) = split_chunk_id(&envelope.id) else {
            warn!(id = %envelope.id, "chunked envelope id missing chunk suffix, dropping");
            return;
        };
        let Some(total) = envelope.ct else {
            warn!(id = %envelope.id, "chunked envelope missing ct, dropping");
            return;
        };
        let base_id = base_id.to_string();
        let codec = decoded.compressed.then_some(decoded.codec);
        self.reassembler
            .init_assembly(&base_id, total, remote.clone(), codec);

        let Value::String(chunk_b64) = &envelope.body else {
            warn!(id = %envelope.id, "chunk body is not a base64 string, dropping");
            return;
        };
        let Ok(chunk_bytes) = base64_decode(chunk_b64) else {
            warn!(id = %envelope.id, "chunk body is not valid base64, dropping");
            return;
        };

        if !self.reassembler.add_chunk(&base_id, index, chunk_bytes) {
            return;
        }
        let Some((assembled, codec)) = self.reassembler.get_assembled_data(&base_id) else {
            return;
        };

        let final_bytes = match codec {
            Some(tag) if tag != CodecTag::None => {
                match self.compression.decompress_bytes(&assembled, tag) {
                    Some(bytes) => bytes,
                    None => {
                        warn!(base_id = %base_id, ?tag, "decompression failed, delivery dropped");
                        return;
                    }
                }
            }
            _ => assembled,
        };

        match serde_json::from_slice(&final_bytes) {
            Ok(body) => {
                let _ = self.message_tx.send(DeliveredMessage {
                    id: base_id,
                    body,
                    remote,
                });
            }
            Err(_) => warn!(base_id = %base_id, "reassembled bytes are not valid json, dropping"),
        }
    }

    // ---- garbage collection ----

    fn run_gc(&mut self) {
        let now = Instant::now();
        let stale_assemblies = self
            .reassembler
            .cleanup_stale(now, Duration::from_millis(self.config.reassembly_timeout_ms));
        let stale_requests = self.tracker.cleanup_old(now, REQUEST_CLEANUP_AGE);
        if stale_assemblies > 0 || stale_requests > 0 {
            debug!(stale_assemblies, stale_requests, "gc sweep");
        }
    }

    async fn teardown(&mut self) {
        self.tracker.clear();
        self.reassembler = Reassembler::new();
        self.socket.close().await;
    }

    // ---- checksum helpers ----

    /// Compute a checksum over whatever bytes end up in `body` on the wire,
    /// or `None` if checksumming is disabled. See the module-level note on
    /// checksum scope: a string body (base64, used by compressed/chunked
    /// sends) is hashed as raw text, matching what the receiver sees.
    fn checksum_for(&self, body: &Value) -> Option<String> {
        self.config.enable_checksum.then(|| checksum::compute(&body_bytes(body)))
    }

    fn checksum_ok(&self, envelope: &Envelope) -> bool {
        if !self.config.enable_checksum {
            return true;
        }
        match &envelope.checksum {
            Some(expected) => checksum::verify(&body_bytes(&envelope.body), expected),
            None => true,
        }
    }
}

fn body_bytes(body: &Value) -> Vec<u8> {
    match body {
        Value::String(s) => s.as_bytes().to_vec(),
        other => serde_json::to_vec(other).expect("serde_json::Value serialization is infallible"),
    }
}

fn base64_decode(s: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.decode(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelDatagramSocket, DropFirstSocket, DuplicateFirstSocket};
    use rdp_core::config::CompressionCodecKind;
    use rdp_core::CompressionConfig;
    use serde_json::json;

    fn fast_config() -> SocketConfig {
        SocketConfig::insecure_fast()
    }

    async fn wire_up(
        config: SocketConfig,
    ) -> (
        EngineHandle,
        mpsc::UnboundedReceiver<DeliveredMessage>,
        EngineHandle,
        mpsc::UnboundedReceiver<DeliveredMessage>,
        RemoteEndpoint,
        RemoteEndpoint,
    ) {
        wire_up_over(config, |a_socket, _b_socket| a_socket).await
    }

    /// Like [`wire_up`], but lets the caller wrap `a`'s outbound socket (e.g.
    /// in [`DropFirstSocket`] or [`DuplicateFirstSocket`]) before the engines
    /// start running, to simulate loss or duplication on the wire.
    async fn wire_up_over(
        config: SocketConfig,
        wrap_a: impl FnOnce(Arc<dyn DatagramSocket>, Arc<dyn DatagramSocket>) -> Arc<dyn DatagramSocket>,
    ) -> (
        EngineHandle,
        mpsc::UnboundedReceiver<DeliveredMessage>,
        EngineHandle,
        mpsc::UnboundedReceiver<DeliveredMessage>,
        RemoteEndpoint,
        RemoteEndpoint,
    ) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("rdp_engine=debug")
            .try_init();

        let a_endpoint = RemoteEndpoint::new("a", 1);
        let b_endpoint = RemoteEndpoint::new("b", 2);
        let (a_socket, b_socket) = ChannelDatagramSocket::pair(a_endpoint.clone(), b_endpoint.clone());
        let a_socket: Arc<dyn DatagramSocket> = wrap_a(a_socket, b_socket.clone());

        let (engine_a, handle_a, rx_a) = ProtocolEngine::new(a_socket, config.clone(), 1).unwrap();
        let (engine_b, handle_b, rx_b) = ProtocolEngine::new(b_socket, config, 2).unwrap();
        tokio::spawn(engine_a.run());
        tokio::spawn(engine_b.run());

        (handle_a, rx_a, handle_b, rx_b, a_endpoint, b_endpoint)
    }

    /// Drives a full REQ -> ACK -> RES round trip for a single (non-chunked)
    /// `message` sent from `a` to `b`: the send is spawned so it can run
    /// concurrently with `b`'s echo, which is what single sends need to
    /// resolve (see the state-machine note on `single_send`). Returns the
    /// message `b` observed, once `a`'s send has confirmed success.
    async fn send_and_echo(
        handle_a: &EngineHandle,
        handle_b: &EngineHandle,
        message: Value,
        a: RemoteEndpoint,
        b: RemoteEndpoint,
        rx_b: &mut mpsc::UnboundedReceiver<DeliveredMessage>,
    ) -> DeliveredMessage {
        let send_task = tokio::spawn({
            let handle_a = handle_a.clone();
            let message = message.clone();
            async move { handle_a.send(message, b).await }
        });

        let delivered = rx_b.recv().await.expect("message delivered");
        handle_b
            .reply(delivered.id.clone(), delivered.body.clone(), a)
            .await
            .expect("reply should send");

        send_task
            .await
            .expect("send task should not panic")
            .expect("send should succeed once echoed");

        delivered
    }

    #[tokio::test]
    async fn small_echo_round_trips_exact_value() {
        let (handle_a, _rx_a, handle_b, mut rx_b, a, b) = wire_up(fast_config()).await;

        let message = json!({"message": "Hello ReliableUDP"});
        let delivered = send_and_echo(&handle_a, &handle_b, message.clone(), a, b, &mut rx_b).await;
        assert_eq!(delivered.body, message);
    }

    #[tokio::test]
    async fn large_payload_is_chunked_and_reassembled() {
        let (handle_a, _rx_a, _handle_b, mut rx_b, _a, b) = wire_up(fast_config()).await;

        // A chunked send completes once every chunk is ACKed (state machine:
        // "ok now for chunks on all-ACK"), so unlike a single send it needs
        // no reply from b.
        let payload = "x".repeat(2000);
        let message = json!({"payload": payload});
        handle_a.send(message.clone(), b).await.expect("send should succeed");

        let delivered = rx_b.recv().await.expect("message delivered");
        assert_eq!(delivered.body["payload"].as_str().unwrap().len(), 2000);
    }

    #[tokio::test]
    async fn compressible_payload_round_trips_through_compression() {
        let mut config = fast_config();
        config.compression = CompressionConfig {
            enabled: true,
            codec: CompressionCodecKind::Gzip,
            level: 6,
            min_size: 256,
            min_reduction_pct: 10.0,
        };
        let (handle_a, _rx_a, handle_b, mut rx_b, a, b) = wire_up(config).await;

        let message = json!({"payload": "x".repeat(1000)});
        let delivered = send_and_echo(&handle_a, &handle_b, message.clone(), a, b, &mut rx_b).await;
        assert_eq!(delivered.body, message);
    }

    #[tokio::test]
    async fn utf8_bodies_round_trip_byte_exact() {
        let (handle_a, _rx_a, handle_b, mut rx_b, a, b) = wire_up(fast_config()).await;

        let message = json!({"message": "Hello 世界 🌍 مرحبا"});
        let delivered = send_and_echo(&handle_a, &handle_b, message.clone(), a, b, &mut rx_b).await;
        assert_eq!(delivered.body, message);
    }

    #[tokio::test]
    async fn reply_resolves_the_matching_send_by_delivered_id() {
        let (handle_a, mut rx_a, handle_b, mut rx_b, a, b) = wire_up(fast_config()).await;

        let request = json!({"op": "ping"});
        let send_task = tokio::spawn({
            let handle_a = handle_a.clone();
            let request = request.clone();
            async move { handle_a.send(request, b).await }
        });

        let delivered = rx_b.recv().await.expect("request delivered to b");
        assert_eq!(delivered.body, request);

        handle_b
            .reply(delivered.id.clone(), json!({"ok": true}), a)
            .await
            .unwrap();

        send_task
            .await
            .expect("send task should not panic")
            .expect("reply should resolve the original send");

        // A RES is not itself delivered through on_message (only REQ bodies
        // are); it only resolves the sender's tracker entry, so rx_a stays
        // empty.
        assert!(tokio::time::timeout(Duration::from_millis(50), rx_a.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn lost_single_req_is_retried_and_delivered_exactly_once() {
        let (handle_a, _rx_a, handle_b, mut rx_b, a, b) =
            wire_up_over(fast_config(), |a_socket, _b_socket| DropFirstSocket::wrapping(a_socket, 1))
                .await;

        let message = json!({"message": "Hello ReliableUDP"});
        let delivered = send_and_echo(&handle_a, &handle_b, message.clone(), a, b, &mut rx_b).await;
        assert_eq!(delivered.body, message);

        // only the retried transmission ever reached b; no second delivery.
        assert!(tokio::time::timeout(Duration::from_millis(50), rx_b.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn duplicate_chunk_delivers_the_logical_message_exactly_once() {
        let (handle_a, _rx_a, _handle_b, mut rx_b, _a, b) = wire_up_over(fast_config(), |a_socket, _b_socket| {
            DuplicateFirstSocket::wrapping(a_socket, 1)
        })
        .await;

        let payload = "x".repeat(2000);
        let message = json!({"payload": payload});
        handle_a.send(message.clone(), b).await.expect("send should succeed");

        let delivered = rx_b.recv().await.expect("message delivered");
        assert_eq!(delivered.body["payload"].as_str().unwrap().len(), 2000);

        // the duplicated chunk-0 transmission must not cause a second delivery.
        assert!(tokio::time::timeout(Duration::from_millis(50), rx_b.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn configure_rejects_invalid_max_message_size() {
        let (handle_a, _rx_a, _handle_b, _rx_b, _a, _b) = wire_up(fast_config()).await;
        let mut bad = SocketConfig::default();
        bad.max_message_size = 42;
        assert!(handle_a.configure(bad).await.is_err());
    }

    #[tokio::test]
    async fn close_stops_the_engine() {
        let (handle_a, _rx_a, _handle_b, _rx_b, _a, _b) = wire_up(fast_config()).await;
        handle_a.close().await.unwrap();
    }
}
