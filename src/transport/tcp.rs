//! TCP transport implementation
//!
//! Provides plain TCP connections, used for direct CONNECT and for the first
//! hop of a proxy chain.

use super::{Connector, HopStream, SocketOpts};
use crate::error::{ConnectError, ConnectErrorKind};
use crate::helper::with_timeout;
use crate::socks::TargetAddr;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// Resolve and dial `addr`, classifying failures for the reply code
///
/// # Arguments
///
/// * `addr` - Destination, resolved here if it is a domain name
/// * `timeout` - Deadline covering resolution and the TCP handshake
/// * `opts` - Socket options applied once connected
pub async fn dial(
    addr: &TargetAddr,
    timeout: Option<Duration>,
    opts: &SocketOpts,
) -> Result<TcpStream, ConnectError> {
    let connect = async {
        let resolved = addr
            .resolve_all()
            .await
            .map_err(|e| ConnectError::from_anyhow(&e))?;
        connect_any(&resolved, addr).await
    };

    let stream = with_timeout(timeout, connect)
        .await
        .map_err(|_| ConnectError::timed_out(addr))??;

    // Apply socket options
    if let Err(e) = opts.apply(&stream) {
        tracing::warn!("Failed to apply socket options: {}", e);
    }

    tracing::debug!("TCP connection established to {}", addr);

    Ok(stream)
}

/// Connect to the first of `addrs` that accepts
///
/// Failures move on to the next address; the last one is reported.
async fn connect_any(
    addrs: &[SocketAddr],
    target: &TargetAddr,
) -> Result<TcpStream, ConnectError> {
    let mut last_err = None;

    for resolved in addrs {
        match TcpStream::connect(resolved).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!("Connect to {} via {} failed: {}", target, resolved, e);
                last_err = Some(ConnectError::from_io(&e, target));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        ConnectError::new(
            ConnectErrorKind::Other,
            format!("{}: no addresses to connect to", target),
        )
    }))
}

/// TCP connector for plain connections
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    /// Socket options to apply to connections
    socket_opts: SocketOpts,
}

impl TcpConnector {
    /// Create a new TCP connector with default options
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Set socket options
    pub fn with_socket_opts(mut self, opts: SocketOpts) -> Self {
        self.socket_opts = opts;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        addr: &TargetAddr,
        timeout: Option<Duration>,
    ) -> Result<HopStream, ConnectError> {
        let stream = dial(addr, timeout, &self.socket_opts).await?;
        HopStream::from_tcp(stream).map_err(|e| ConnectError::from_io(&e, addr))
    }

    async fn wrap(&self, stream: HopStream, _addr: &TargetAddr) -> Result<HopStream, ConnectError> {
        // Nothing to add on top of the tunnel
        Ok(stream)
    }
}
