//! Async UDP transport implementation.
//!
//! This module provides the tokio-backed UDP socket used for NAT probing.
//! It implements the `Transport` trait.

use crate::transport::{Transport, TransportError, TransportResult, TransportStats};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::net::UdpSocket;

/// Receive buffer requested from the kernel. Reflector replies are small.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 2048;

/// Socket options applied at bind time.
#[derive(Debug, Clone)]
pub struct UdpOptions {
    /// Set `SO_REUSEADDR` before binding
    pub reuse_address: bool,
    /// Kernel receive buffer size in bytes
    pub recv_buffer_size: usize,
}

impl Default for UdpOptions {
    fn default() -> Self {
        Self {
            reuse_address: true,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
        }
    }
}

/// Async UDP transport using Tokio.
///
/// # Examples
///
/// ```no_run
/// use natprobe_transport::udp_async::AsyncUdpTransport;
/// use natprobe_transport::transport::Transport;
/// use std::net::SocketAddr;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let addr: SocketAddr = "0.0.0.0:0".parse()?;
/// let transport = AsyncUdpTransport::bind(addr).await?;
/// println!("Probing from {}", transport.local_addr()?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AsyncUdpTransport {
    socket: Arc<UdpSocket>,
    closed: Arc<AtomicBool>,
    bytes_sent: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
    packets_sent: Arc<AtomicU64>,
    packets_received: Arc<AtomicU64>,
    send_errors: Arc<AtomicU64>,
    recv_errors: Arc<AtomicU64>,
}

impl AsyncUdpTransport {
    /// Bind an IPv4 UDP socket with default options.
    ///
    /// Use "0.0.0.0:0" for an ephemeral port on all interfaces.
    ///
    /// # Errors
    /// Returns `TransportError::BindFailed` if the address is IPv6 or binding fails
    pub async fn bind<A: Into<SocketAddr>>(addr: A) -> TransportResult<Self> {
        Self::bind_with(addr, &UdpOptions::default()).await
    }

    /// Bind an IPv4 UDP socket with explicit options.
    ///
    /// # Errors
    /// Returns `TransportError::BindFailed` if the address is IPv6 or binding fails
    pub async fn bind_with<A: Into<SocketAddr>>(
        addr: A,
        options: &UdpOptions,
    ) -> TransportResult<Self> {
        let addr = addr.into();
        if !addr.is_ipv4() {
            return Err(TransportError::BindFailed(format!(
                "{addr}: only IPv4 is supported"
            )));
        }

        let socket2 = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )
        .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        socket2
            .set_reuse_address(options.reuse_address)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        socket2
            .set_recv_buffer_size(options.recv_buffer_size)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        socket2
            .bind(&addr.into())
            .map_err(|e| TransportError::BindFailed(format!("{addr}: {e}")))?;

        socket2
            .set_nonblocking(true)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        let std_socket: std::net::UdpSocket = socket2.into();
        let socket = UdpSocket::from_std(std_socket)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        tracing::debug!(local = ?socket.local_addr().ok(), "probe socket bound");

        Ok(Self::from_socket(socket))
    }

    /// Create from an existing Tokio UdpSocket.
    #[must_use]
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket: Arc::new(socket),
            closed: Arc::new(AtomicBool::new(false)),
            bytes_sent: Arc::new(AtomicU64::new(0)),
            bytes_received: Arc::new(AtomicU64::new(0)),
            packets_sent: Arc::new(AtomicU64::new(0)),
            packets_received: Arc::new(AtomicU64::new(0)),
            send_errors: Arc::new(AtomicU64::new(0)),
            recv_errors: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[async_trait]
impl Transport for AsyncUdpTransport {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }

        match self.socket.send_to(buf, addr).await {
            Ok(sent) => {
                self.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
                self.packets_sent.fetch_add(1, Ordering::Relaxed);
                Ok(sent)
            }
            Err(e) => {
                self.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Io(e))
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }

        match self.socket.recv_from(buf).await {
            Ok((size, addr)) => {
                self.bytes_received
                    .fetch_add(size as u64, Ordering::Relaxed);
                self.packets_received.fetch_add(1, Ordering::Relaxed);
                Ok((size, addr))
            }
            Err(e) => {
                self.recv_errors.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Io(e))
            }
        }
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.socket.local_addr().map_err(TransportError::Io)
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            recv_errors: self.recv_errors.load(Ordering::Relaxed),
        }
    }
}
