//! Per-attempt connection state of one proxy hop

use super::{http, socks5, ProxyDescriptor, ProxyKind};
use crate::error::ConnectError;
use crate::helper::with_timeout;
use crate::socks::TargetAddr;
use crate::transport::HopStream;
use anyhow::{bail, Result};

#[derive(Debug)]
enum ConnectionState {
    /// Nothing dialed yet
    Idle,
    /// A tunneled stream that already reaches the hop, not yet wrapped
    Handed(HopStream),
    /// Connected and ready for `request_connect`
    Ready(HopStream),
}

/// The live side of a [`ProxyDescriptor`] during one connection attempt
///
/// Owns the hop's transient stream; the descriptor itself is never mutated.
#[derive(Debug)]
pub struct ProxyConnection {
    descriptor: ProxyDescriptor,
    state: ConnectionState,
}

impl ProxyConnection {
    /// Start an attempt that dials the hop directly
    pub fn new(descriptor: &ProxyDescriptor) -> Self {
        ProxyConnection {
            descriptor: descriptor.copy_without_chain(),
            state: ConnectionState::Idle,
        }
    }

    /// Start an attempt over a stream that already reaches the hop
    pub fn with_stream(descriptor: &ProxyDescriptor, stream: HopStream) -> Self {
        ProxyConnection {
            descriptor: descriptor.copy_without_chain(),
            state: ConnectionState::Handed(stream),
        }
    }

    /// The hop this connection talks to
    pub fn descriptor(&self) -> &ProxyDescriptor {
        &self.descriptor
    }

    /// Whether `build_connection` has completed
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Ready(_))
    }

    /// Ensure the transient stream is connected
    ///
    /// Dials when nothing is connected yet, adds the connector's layer to a
    /// handed-over stream, and does nothing once connected. On failure the
    /// stream is dropped and the connection is back to idle.
    pub async fn build_connection(&mut self) -> Result<(), ConnectError> {
        let descriptor = &self.descriptor;
        let timeout = descriptor.connect_timeout;

        self.state = match std::mem::replace(&mut self.state, ConnectionState::Idle) {
            ConnectionState::Idle => {
                tracing::debug!("Dialing {}", descriptor);
                let stream = with_timeout(
                    timeout,
                    descriptor.connector.connect(&descriptor.server, timeout),
                )
                .await
                .map_err(|_| ConnectError::timed_out(&descriptor.server))??;
                ConnectionState::Ready(stream)
            }
            ConnectionState::Handed(stream) => {
                let stream = with_timeout(
                    timeout,
                    descriptor.connector.wrap(stream, &descriptor.server),
                )
                .await
                .map_err(|_| ConnectError::timed_out(&descriptor.server))??;
                ConnectionState::Ready(stream)
            }
            ready @ ConnectionState::Ready(_) => ready,
        };

        Ok(())
    }

    /// Ask the hop to open a tunnel to `target`
    ///
    /// Returns whether the hop accepted. Must follow `build_connection`.
    pub async fn request_connect(&mut self, target: &TargetAddr) -> Result<bool> {
        let descriptor = &self.descriptor;
        let stream = match &mut self.state {
            ConnectionState::Ready(stream) => stream,
            _ => bail!("{} is not connected", descriptor),
        };

        let negotiate = async {
            match descriptor.kind {
                ProxyKind::Socks5 => socks5::request_connect(stream, descriptor, target).await,
                ProxyKind::HttpConnect => http::request_connect(stream, descriptor, target).await,
            }
        };

        let accepted = with_timeout(descriptor.connect_timeout, negotiate)
            .await
            .map_err(|_| ConnectError::timed_out(format!("{} negotiating with {}", target, descriptor)))??;

        tracing::debug!(
            "{} {} CONNECT to {}",
            descriptor,
            if accepted { "accepted" } else { "refused" },
            target
        );

        Ok(accepted)
    }

    /// Give up ownership of the connected stream
    pub fn into_stream(self) -> Option<HopStream> {
        match self.state {
            ConnectionState::Ready(stream) | ConnectionState::Handed(stream) => Some(stream),
            ConnectionState::Idle => None,
        }
    }
}
