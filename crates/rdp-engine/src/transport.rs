//! The datagram transport the engine sits on top of. This crate ships a
//! concrete UDP implementation so it is runnable standalone, plus an
//! in-memory pair (and lossy/duplicating wrappers around it) used by the
//! engine's own loopback tests.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rdp_core::RemoteEndpoint;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// The upstream datagram channel the engine sends on and receives from.
#[async_trait]
pub trait DatagramSocket: Send + Sync {
    async fn send_to(&self, buf: &[u8], remote: &RemoteEndpoint) -> io::Result<()>;

    /// Receive the next datagram. Returns `None` once the socket is closed
    /// and will never yield another datagram.
    async fn recv_from(&self) -> Option<(Vec<u8>, RemoteEndpoint)>;

    async fn close(&self);
}

/// A real UDP socket, bound once at construction.
pub struct UdpDatagramSocket {
    socket: UdpSocket,
}

impl UdpDatagramSocket {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self {
            socket: UdpSocket::bind(addr).await?,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl DatagramSocket for UdpDatagramSocket {
    async fn send_to(&self, buf: &[u8], remote: &RemoteEndpoint) -> io::Result<()> {
        let addr: SocketAddr = format!("{}:{}", remote.host, remote.port)
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.socket.send_to(buf, addr).await?;
        Ok(())
    }

    async fn recv_from(&self) -> Option<(Vec<u8>, RemoteEndpoint)> {
        let mut buf = vec![0u8; 65_535];
        match self.socket.recv_from(&mut buf).await {
            Ok((n, addr)) => {
                buf.truncate(n);
                Some((buf, RemoteEndpoint::new(addr.ip().to_string(), addr.port())))
            }
            Err(_) => None,
        }
    }

    async fn close(&self) {}
}

/// An in-memory datagram socket backed by `mpsc` channels, standing in for
/// loopback UDP in tests: two engine instances are wired back to back in
/// one process for integration-style tests without binding real ports.
pub struct ChannelDatagramSocket {
    self_endpoint: RemoteEndpoint,
    peer_endpoint: RemoteEndpoint,
    outbound: mpsc::UnboundedSender<(Vec<u8>, RemoteEndpoint)>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, RemoteEndpoint)>>,
}

impl ChannelDatagramSocket {
    /// Build a pair of sockets wired back to back: datagrams sent on one
    /// arrive, tagged with the sender's endpoint, on the other.
    pub fn pair(
        a_endpoint: RemoteEndpoint,
        b_endpoint: RemoteEndpoint,
    ) -> (Arc<Self>, Arc<Self>) {
        let (a_to_b_tx, a_to_b_rx) = mpsc::unbounded_channel();
        let (b_to_a_tx, b_to_a_rx) = mpsc::unbounded_channel();

        let a = Arc::new(Self {
            self_endpoint: a_endpoint,
            peer_endpoint: b_endpoint.clone(),
            outbound: a_to_b_tx,
            inbound: tokio::sync::Mutex::new(b_to_a_rx),
        });
        let b = Arc::new(Self {
            self_endpoint: b_endpoint,
            peer_endpoint: a.self_endpoint.clone(),
            outbound: b_to_a_tx,
            inbound: tokio::sync::Mutex::new(a_to_b_rx),
        });
        (a, b)
    }
}

#[async_trait]
impl DatagramSocket for ChannelDatagramSocket {
    async fn send_to(&self, buf: &[u8], remote: &RemoteEndpoint) -> io::Result<()> {
        debug_assert_eq!(remote, &self.peer_endpoint, "loopback pair has one peer");
        self.outbound
            .send((buf.to_vec(), self.self_endpoint.clone()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer socket closed"))
    }

    async fn recv_from(&self) -> Option<(Vec<u8>, RemoteEndpoint)> {
        self.inbound.lock().await.recv().await
    }

    async fn close(&self) {
        self.inbound.lock().await.close();
    }
}

/// Wraps another [`DatagramSocket`] and silently swallows its first
/// `drop_count` outbound sends instead of forwarding them, standing in for
/// datagram loss on the wire. Used to exercise the retry path: the sender
/// observes no ACK for a dropped transmission and retries on schedule.
pub struct DropFirstSocket {
    inner: Arc<dyn DatagramSocket>,
    remaining_drops: AtomicUsize,
}

impl DropFirstSocket {
    pub fn wrapping(inner: Arc<dyn DatagramSocket>, drop_count: usize) -> Arc<Self> {
        Arc::new(Self {
            inner,
            remaining_drops: AtomicUsize::new(drop_count),
        })
    }
}

#[async_trait]
impl DatagramSocket for DropFirstSocket {
    async fn send_to(&self, buf: &[u8], remote: &RemoteEndpoint) -> io::Result<()> {
        let mut current = self.remaining_drops.load(Ordering::SeqCst);
        loop {
            if current == 0 {
                return self.inner.send_to(buf, remote).await;
            }
            match self.remaining_drops.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    async fn recv_from(&self) -> Option<(Vec<u8>, RemoteEndpoint)> {
        self.inner.recv_from().await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

/// Wraps another [`DatagramSocket`] and sends its first `duplicate_count`
/// outbound datagrams twice each, standing in for duplicate delivery on the
/// wire. Used to exercise the reassembler/tracker's duplicate-tolerance at
/// full engine granularity, not just in the pure `Reassembler` unit tests.
pub struct DuplicateFirstSocket {
    inner: Arc<dyn DatagramSocket>,
    remaining_duplicates: AtomicUsize,
}

impl DuplicateFirstSocket {
    pub fn wrapping(inner: Arc<dyn DatagramSocket>, duplicate_count: usize) -> Arc<Self> {
        Arc::new(Self {
            inner,
            remaining_duplicates: AtomicUsize::new(duplicate_count),
        })
    }
}

#[async_trait]
impl DatagramSocket for DuplicateFirstSocket {
    async fn send_to(&self, buf: &[u8], remote: &RemoteEndpoint) -> io::Result<()> {
        let mut current = self.remaining_duplicates.load(Ordering::SeqCst);
        loop {
            if current == 0 {
                return self.inner.send_to(buf, remote).await;
            }
            match self.remaining_duplicates.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    self.inner.send_to(buf, remote).await?;
                    return self.inner.send_to(buf, remote).await;
                }
                Err(actual) => current = actual,
            }
        }
    }

    async fn recv_from(&self) -> Option<(Vec<u8>, RemoteEndpoint)> {
        self.inner.recv_from().await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}
