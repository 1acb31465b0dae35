//! Transport module for Sockchain
//!
//! This module provides the outbound connection abstraction: how a proxy hop
//! opens its socket (plain TCP or TLS) and the composed stream type the
//! handler relays over.

mod stream;
mod tcp;
#[cfg(feature = "rustls-tls")]
mod tls;

pub use stream::ProxyStream;
pub use tcp::{dial, TcpConnector};
#[cfg(feature = "rustls-tls")]
pub use tls::TlsConnector;

use crate::error::ConnectError;
use crate::socks::TargetAddr;
use async_trait::async_trait;
use std::fmt::Debug;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// Socket options for configuring connections
#[derive(Debug, Clone)]
pub struct SocketOpts {
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// TCP keepalive timeout
    pub keepalive_secs: Option<u64>,
    /// TCP keepalive interval
    pub keepalive_interval: Option<u64>,
}

impl Default for SocketOpts {
    fn default() -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(20),
            keepalive_interval: Some(8),
        }
    }
}

impl SocketOpts {
    /// Socket options for accepted client connections
    pub fn for_client() -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(30),
            keepalive_interval: Some(10),
        }
    }

    /// Apply socket options to a TCP stream
    pub fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;

        if let (Some(timeout), Some(interval)) = (self.keepalive_secs, self.keepalive_interval) {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(timeout))
                .with_interval(Duration::from_secs(interval));
            socket.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }
}

/// Dynamic stream trait for boxed streams
pub trait StreamDyn: AsyncRead + AsyncWrite + Unpin + Send + Sync + Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync + Debug> StreamDyn for T {}

/// Boxed duplex stream
pub type BoxedStream = Box<dyn StreamDyn>;

/// A connected stream to a proxy hop
///
/// Keeps the addresses of the underlying socket, which stay the same however
/// many tunnels and TLS layers end up stacked on top of it.
#[derive(Debug)]
pub struct HopStream {
    /// The (possibly wrapped) byte stream
    pub stream: BoxedStream,
    /// Local address of the underlying socket
    pub local_addr: SocketAddr,
    /// Peer address of the underlying socket (the first hop)
    pub peer_addr: SocketAddr,
}

impl HopStream {
    /// Wrap a freshly dialed TCP stream
    pub fn from_tcp(stream: TcpStream) -> io::Result<Self> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        Ok(HopStream {
            stream: Box::new(stream),
            local_addr,
            peer_addr,
        })
    }

    /// Replace the byte stream, keeping the socket addresses
    pub fn map<F>(self, f: F) -> Self
    where
        F: FnOnce(BoxedStream) -> BoxedStream,
    {
        HopStream {
            stream: f(self.stream),
            local_addr: self.local_addr,
            peer_addr: self.peer_addr,
        }
    }
}

impl AsyncRead for HopStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for HopStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// How a proxy hop's connection is established
///
/// `connect` opens a fresh socket to a hop reached directly. `wrap` is used
/// for hops reached through a tunnel: the stream already reaches the hop and
/// only this connector's own layer (TLS, say) still needs to be added.
#[async_trait]
pub trait Connector: Debug + Send + Sync {
    /// Open a new connection to `addr`
    async fn connect(
        &self,
        addr: &TargetAddr,
        timeout: Option<Duration>,
    ) -> Result<HopStream, ConnectError>;

    /// Layer this connector over a stream that already reaches `addr`
    async fn wrap(&self, stream: HopStream, addr: &TargetAddr) -> Result<HopStream, ConnectError>;
}
