//! SOCKS5 method negotiation messages
//!
//! ```text
//! request:  +----+----------+----------+     reply:  +----+--------+
//!           |VER | NMETHODS | METHODS  |             |VER | METHOD |
//!           +----+----------+----------+             +----+--------+
//!           | 1  |    1     | 1 to 255 |             | 1  |   1    |
//!           +----+----------+----------+             +----+--------+
//! ```

use super::consts::*;
use crate::error::Socks5Error;
use anyhow::Result;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A client's method selection request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    /// Protocol version, always 5 once decoded
    pub version: u8,
    /// Offered authentication method ids
    pub methods: Vec<u8>,
}

impl HandshakeMessage {
    /// Create a handshake offering `methods`
    pub fn new(methods: Vec<u8>) -> Self {
        HandshakeMessage {
            version: SOCKS5_VERSION,
            methods,
        }
    }

    /// Encode to wire format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(2 + self.methods.len());
        bytes.push(self.version);
        bytes.push(self.methods.len() as u8);
        bytes.extend_from_slice(&self.methods);
        bytes
    }
}

/// Read a method selection request.
///
/// Fails with [`Socks5Error::UnsupportedVersion`] before reading the method
/// list when the version byte is not 5.
pub async fn read_handshake<S>(stream: &mut S) -> Result<HandshakeMessage>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;

    let version = buf[0];
    if version != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version).into());
    }

    let mut methods = vec![0u8; buf[1] as usize];
    stream.read_exact(&mut methods).await?;

    Ok(HandshakeMessage { version, methods })
}

/// Write the selected method, or `0xFF` when nothing was acceptable
pub async fn write_handshake_response<S>(stream: &mut S, method: Option<u8>) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&[
            SOCKS5_VERSION,
            method.unwrap_or(SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE),
        ])
        .await?;
    stream.flush().await?;
    Ok(())
}

/// Read the server's method selection (client side of a SOCKS5 hop)
pub async fn read_handshake_response<S>(stream: &mut S) -> Result<u8>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;

    if buf[0] != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(buf[0]).into());
    }
    if buf[1] == SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE {
        return Err(Socks5Error::NoAcceptableMethod.into());
    }

    Ok(buf[1])
}
