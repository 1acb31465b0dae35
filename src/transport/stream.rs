//! Outbound stream returned by CONNECT
//!
//! Either a direct TCP connection to the target or a stream tunneled through
//! a proxy chain. Callers only see read/write/shutdown and the two addresses.

use super::HopStream;
use crate::socks::TargetAddr;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// A connected outbound stream
#[derive(Debug)]
pub enum ProxyStream {
    /// Direct connection to the target
    Direct(TcpStream),
    /// Connection tunneled through one or more proxy hops
    Tunneled {
        /// The stream, nested through every hop
        stream: HopStream,
        /// Final destination of the tunnel
        target: TargetAddr,
    },
}

impl ProxyStream {
    /// Local address of the socket that carries the data
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            ProxyStream::Direct(stream) => stream.local_addr(),
            ProxyStream::Tunneled { stream, .. } => Ok(stream.local_addr),
        }
    }

    /// The far end of the stream as the client asked for it
    pub fn peer_addr(&self) -> io::Result<TargetAddr> {
        match self {
            ProxyStream::Direct(stream) => stream.peer_addr().map(TargetAddr::from),
            ProxyStream::Tunneled { target, .. } => Ok(target.clone()),
        }
    }

    /// Whether the stream goes through a proxy chain
    pub fn is_tunneled(&self) -> bool {
        matches!(self, ProxyStream::Tunneled { .. })
    }
}

impl AsyncRead for ProxyStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ProxyStream::Direct(s) => Pin::new(s).poll_read(cx, buf),
            ProxyStream::Tunneled { stream, .. } => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ProxyStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ProxyStream::Direct(s) => Pin::new(s).poll_write(cx, buf),
            ProxyStream::Tunneled { stream, .. } => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ProxyStream::Direct(s) => Pin::new(s).poll_flush(cx),
            ProxyStream::Tunneled { stream, .. } => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ProxyStream::Direct(s) => Pin::new(s).poll_shutdown(cx),
            ProxyStream::Tunneled { stream, .. } => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_direct_stream_addrs_and_io() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });

        let mut stream = ProxyStream::Direct(TcpStream::connect(addr).await.unwrap());
        let mut server = accept.await.unwrap();

        assert!(!stream.is_tunneled());
        assert_eq!(stream.peer_addr().unwrap(), TargetAddr::from(addr));
        assert!(stream.local_addr().unwrap().ip().is_loopback());

        stream.write_all(b"abc").await.unwrap();
        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abc");
    }

    #[tokio::test]
    async fn test_tunneled_stream_reports_target() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });

        let hop = HopStream::from_tcp(TcpStream::connect(addr).await.unwrap()).unwrap();
        let local = hop.local_addr;
        let _server = accept.await.unwrap();

        let target = TargetAddr::domain("example.com".to_string(), 443);
        let stream = ProxyStream::Tunneled {
            stream: hop,
            target: target.clone(),
        };

        assert!(stream.is_tunneled());
        assert_eq!(stream.peer_addr().unwrap(), target);
        assert_eq!(stream.local_addr().unwrap(), local);
    }
}
