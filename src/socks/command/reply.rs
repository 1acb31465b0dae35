//! SOCKS5 reply builder
//!
//! Constructs SOCKS5 reply messages on the server side and decodes them on
//! the client side of an upstream SOCKS5 hop.

use super::parser::read_address;
use crate::error::{Socks5Error, Socks5ReplyCode};
use crate::socks::consts::*;
use crate::socks::types::TargetAddr;
use anyhow::Result;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A decoded SOCKS5 reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    /// Raw REP byte
    pub reply: u8,
    /// BND.ADDR / BND.PORT
    pub bound: TargetAddr,
}

impl CommandResponse {
    /// Whether the server reported success
    pub fn is_success(&self) -> bool {
        self.reply == u8::from(Socks5ReplyCode::Succeeded)
    }

    /// The reply code, if it is one this crate knows
    pub fn code(&self) -> Option<Socks5ReplyCode> {
        Socks5ReplyCode::try_from(self.reply).ok()
    }
}

/// Encode a reply without sending it
pub fn reply_bytes(reply_code: Socks5ReplyCode, bind_addr: Option<SocketAddr>) -> Vec<u8> {
    let bind_addr =
        bind_addr.unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0));

    let mut reply = vec![SOCKS5_VERSION, reply_code.into(), SOCKS5_RESERVED];
    reply.extend_from_slice(&TargetAddr::Ip(bind_addr).to_bytes());
    reply
}

/// Build and send a SOCKS5 reply
///
/// # SOCKS5 Reply Format
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
///
/// # Arguments
///
/// * `stream` - The stream to write to
/// * `reply_code` - The reply status code
/// * `bind_addr` - The bound address (optional, defaults to 0.0.0.0:0)
pub async fn write_command_response<S>(
    stream: &mut S,
    reply_code: Socks5ReplyCode,
    bind_addr: Option<SocketAddr>,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&reply_bytes(reply_code, bind_addr))
        .await?;
    stream.flush().await?;

    Ok(())
}

/// Build a success reply
pub async fn send_success<S>(stream: &mut S, bind_addr: SocketAddr) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    write_command_response(stream, Socks5ReplyCode::Succeeded, Some(bind_addr)).await
}

/// Build a failure reply carrying `0.0.0.0:0`
pub async fn send_failure<S>(stream: &mut S, reply_code: Socks5ReplyCode) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    write_command_response(stream, reply_code, None).await
}

/// Read a SOCKS5 reply (client side of a SOCKS5 hop)
pub async fn read_command_response<S>(stream: &mut S) -> Result<CommandResponse>
where
    S: AsyncRead + Unpin,
{
    // Read: VER REP RSV ATYP
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;

    if header[0] != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(header[0]).into());
    }

    let bound = read_address(stream, header[3]).await?;

    Ok(CommandResponse {
        reply: header[1],
        bound,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::Ipv6Addr;

    #[test]
    fn test_reply_bytes_ipv4() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)), 8080);
        let reply = reply_bytes(Socks5ReplyCode::Succeeded, Some(addr));

        assert_eq!(reply[0], SOCKS5_VERSION);
        assert_eq!(reply[1], 0x00);
        assert_eq!(reply[2], SOCKS5_RESERVED);
        assert_eq!(reply[3], SOCKS5_ADDR_TYPE_IPV4);
        assert_eq!(&reply[4..8], &[192, 168, 1, 1]);
        assert_eq!(&reply[8..10], &8080u16.to_be_bytes());
    }

    #[test]
    fn test_reply_bytes_ipv6() {
        let addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 443);
        let reply = reply_bytes(Socks5ReplyCode::Succeeded, Some(addr));

        assert_eq!(reply[3], SOCKS5_ADDR_TYPE_IPV6);
        assert_eq!(reply.len(), 3 + 1 + 16 + 2); // header + atyp + ipv6 + port
    }

    #[test]
    fn test_reply_bytes_default_addr() {
        let reply = reply_bytes(Socks5ReplyCode::GeneralFailure, None);

        assert_eq!(reply[1], 0x01);
        assert_eq!(reply[3], SOCKS5_ADDR_TYPE_IPV4);
        assert_eq!(&reply[4..8], &[0, 0, 0, 0]); // 0.0.0.0
        assert_eq!(&reply[8..10], &[0, 0]); // port 0
    }

    #[tokio::test]
    async fn test_send_failure() {
        let mut buffer = Vec::new();
        send_failure(&mut buffer, Socks5ReplyCode::ConnectionRefused)
            .await
            .unwrap();

        assert_eq!(buffer, vec![5, 0x05, 0, 1, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_read_command_response() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 9090);
        let mut buffer = Vec::new();
        send_success(&mut buffer, addr).await.unwrap();

        let response = read_command_response(&mut Cursor::new(buffer))
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.bound, TargetAddr::Ip(addr));
    }

    #[tokio::test]
    async fn test_read_command_response_domain_and_unknown_code() {
        let mut bytes = vec![SOCKS5_VERSION, 0x42, SOCKS5_RESERVED, SOCKS5_ADDR_TYPE_DOMAIN, 4];
        bytes.extend_from_slice(b"host");
        bytes.extend_from_slice(&1080u16.to_be_bytes());

        let response = read_command_response(&mut Cursor::new(bytes))
            .await
            .unwrap();
        assert!(!response.is_success());
        assert_eq!(response.code(), None);
        assert_eq!(response.bound, TargetAddr::domain("host".to_string(), 1080));
    }

    #[tokio::test]
    async fn test_read_command_response_truncated() {
        let mut cursor = Cursor::new(vec![SOCKS5_VERSION, 0x00, SOCKS5_RESERVED]);
        assert!(read_command_response(&mut cursor).await.is_err());
    }
}
