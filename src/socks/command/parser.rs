//! SOCKS5 command parser
//!
//! Parses SOCKS5 command requests from the client. Decode failures do not
//! escape as errors: they are carried inside the returned [`CommandMessage`]
//! so the handler can answer with the matching reply code before closing.

use crate::error::{Socks5Error, Socks5ReplyCode};
use crate::socks::consts::*;
use crate::socks::types::{SocksCommand, TargetAddr};
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A decode failure tagged with the reply code the client should receive
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} ({reply})")]
pub struct CommandError {
    /// Reply code to send back
    pub reply: Socks5ReplyCode,
    /// Detail for logs
    pub message: String,
}

impl CommandError {
    /// Create a new command error
    pub fn new(reply: Socks5ReplyCode, message: impl Into<String>) -> Self {
        CommandError {
            reply,
            message: message.into(),
        }
    }

    fn truncated(err: std::io::Error) -> Self {
        CommandError::new(
            Socks5ReplyCode::GeneralFailure,
            format!("truncated command: {}", err),
        )
    }
}

impl From<Socks5Error> for CommandError {
    fn from(err: Socks5Error) -> Self {
        let reply = match err {
            Socks5Error::CommandNotSupported(_) => Socks5ReplyCode::CommandNotSupported,
            Socks5Error::AddressTypeNotSupported(_) => Socks5ReplyCode::AddressTypeNotSupported,
            _ => Socks5ReplyCode::GeneralFailure,
        };
        CommandError::new(reply, err.to_string())
    }
}

/// A decoded SOCKS5 request
///
/// # SOCKS5 Request Format
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMessage {
    /// Protocol version byte as received
    pub version: u8,
    /// Raw command byte as received
    pub command_byte: u8,
    /// Destination address and port
    pub target: TargetAddr,
    /// Embedded decode failure, if any
    pub error: Option<CommandError>,
}

impl CommandMessage {
    /// Create a well-formed request
    pub fn new(command: SocksCommand, target: TargetAddr) -> Self {
        CommandMessage {
            version: SOCKS5_VERSION,
            command_byte: command.to_byte(),
            target,
            error: None,
        }
    }

    /// The decoded command, `None` for unknown command bytes
    pub fn command(&self) -> Option<SocksCommand> {
        SocksCommand::from_byte(self.command_byte)
    }

    /// Whether a decode failure is embedded in this message
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Encode to wire format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![self.version, self.command_byte, SOCKS5_RESERVED];
        bytes.extend_from_slice(&self.target.to_bytes());
        bytes
    }

    fn failed(version: u8, command_byte: u8, error: CommandError) -> Self {
        CommandMessage {
            version,
            command_byte,
            target: TargetAddr::default(),
            error: Some(error),
        }
    }
}

/// Read a SOCKS5 command from the stream
///
/// Never fails: malformed or truncated input yields a message whose
/// [`CommandMessage::error`] carries the most specific reply code.
pub async fn read_command<S>(stream: &mut S) -> CommandMessage
where
    S: AsyncRead + Unpin,
{
    // Read: VER CMD RSV ATYP
    let mut header = [0u8; 4];
    if let Err(e) = stream.read_exact(&mut header).await {
        return CommandMessage::failed(0, 0, CommandError::truncated(e));
    }

    let version = header[0];
    let command_byte = header[1];
    let addr_type = header[3];

    let target = match read_address(stream, addr_type).await {
        Ok(target) => target,
        Err(e) => return CommandMessage::failed(version, command_byte, e),
    };

    let error = if version != SOCKS5_VERSION {
        Some(Socks5Error::UnsupportedVersion(version).into())
    } else if SocksCommand::from_byte(command_byte).is_none() {
        Some(Socks5Error::CommandNotSupported(command_byte).into())
    } else {
        None
    };

    tracing::debug!("Parsed SOCKS5 command 0x{:02x} to {}", command_byte, target);

    CommandMessage {
        version,
        command_byte,
        target,
        error,
    }
}

/// Read `DST.ADDR | DST.PORT` for the given address type
///
/// Shared by the server-side request parser and the client-side reply
/// parser of upstream SOCKS5 hops.
pub async fn read_address<S>(stream: &mut S, addr_type: u8) -> Result<TargetAddr, CommandError>
where
    S: AsyncRead + Unpin,
{
    match addr_type {
        SOCKS5_ADDR_TYPE_IPV4 => {
            let mut addr = [0u8; 4];
            stream
                .read_exact(&mut addr)
                .await
                .map_err(CommandError::truncated)?;
            let port = read_port(stream).await?;

            Ok(TargetAddr::ipv4(Ipv4Addr::from(addr), port))
        }

        SOCKS5_ADDR_TYPE_DOMAIN => {
            let len = stream.read_u8().await.map_err(CommandError::truncated)? as usize;
            if len == 0 || len > MAX_DOMAIN_LEN {
                return Err(Socks5Error::InvalidDomain(format!("length {}", len)).into());
            }

            let mut domain_buf = vec![0u8; len];
            stream
                .read_exact(&mut domain_buf)
                .await
                .map_err(CommandError::truncated)?;
            let port = read_port(stream).await?;

            let domain = String::from_utf8(domain_buf)
                .map_err(|_| Socks5Error::InvalidDomain("invalid UTF-8".to_string()))?;

            Ok(TargetAddr::domain(domain, port))
        }

        SOCKS5_ADDR_TYPE_IPV6 => {
            let mut addr = [0u8; 16];
            stream
                .read_exact(&mut addr)
                .await
                .map_err(CommandError::truncated)?;
            let port = read_port(stream).await?;

            Ok(TargetAddr::ipv6(Ipv6Addr::from(addr), port))
        }

        _ => Err(Socks5Error::AddressTypeNotSupported(addr_type).into()),
    }
}

async fn read_port<S>(stream: &mut S) -> Result<u16, CommandError>
where
    S: AsyncRead + Unpin,
{
    stream.read_u16().await.map_err(CommandError::truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn request(command: u8, addr: &[u8]) -> Vec<u8> {
        let mut request = vec![SOCKS5_VERSION, command, SOCKS5_RESERVED];
        request.extend_from_slice(addr);
        request
    }

    #[tokio::test]
    async fn test_read_command_ipv4() {
        let bytes = request(
            SOCKS5_CMD_TCP_CONNECT,
            &[SOCKS5_ADDR_TYPE_IPV4, 192, 168, 1, 1, 0x1F, 0x90],
        );
        let msg = read_command(&mut Cursor::new(bytes.clone())).await;

        assert!(!msg.has_error());
        assert_eq!(msg.command(), Some(SocksCommand::Connect));
        assert_eq!(msg.target, TargetAddr::ipv4(Ipv4Addr::new(192, 168, 1, 1), 8080));
        assert_eq!(msg.to_bytes(), bytes);
    }

    #[tokio::test]
    async fn test_read_command_domain() {
        let mut addr = vec![SOCKS5_ADDR_TYPE_DOMAIN, 11];
        addr.extend_from_slice(b"example.com");
        addr.extend_from_slice(&443u16.to_be_bytes());
        let bytes = request(SOCKS5_CMD_TCP_BIND, &addr);

        let msg = read_command(&mut Cursor::new(bytes.clone())).await;

        assert!(!msg.has_error());
        assert_eq!(msg.command(), Some(SocksCommand::Bind));
        assert_eq!(msg.target, TargetAddr::domain("example.com".to_string(), 443));
        assert_eq!(msg.to_bytes(), bytes);
    }

    #[tokio::test]
    async fn test_read_command_ipv6() {
        let mut addr = vec![SOCKS5_ADDR_TYPE_IPV6];
        addr.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        addr.extend_from_slice(&65535u16.to_be_bytes());
        let bytes = request(SOCKS5_CMD_UDP_ASSOCIATE, &addr);

        let msg = read_command(&mut Cursor::new(bytes.clone())).await;

        assert!(!msg.has_error());
        assert_eq!(msg.command(), Some(SocksCommand::UdpAssociate));
        assert_eq!(msg.target, TargetAddr::ipv6(Ipv6Addr::LOCALHOST, 65535));
        assert_eq!(msg.to_bytes(), bytes);
    }

    #[tokio::test]
    async fn test_read_command_bad_address_type() {
        let bytes = request(SOCKS5_CMD_TCP_CONNECT, &[0x09, 1, 2, 3, 4, 0, 80]);
        let msg = read_command(&mut Cursor::new(bytes)).await;

        let err = msg.error.expect("embedded error");
        assert_eq!(err.reply, Socks5ReplyCode::AddressTypeNotSupported);
    }

    #[tokio::test]
    async fn test_read_command_unknown_command() {
        let bytes = request(0x99, &[SOCKS5_ADDR_TYPE_IPV4, 127, 0, 0, 1, 0, 80]);
        let msg = read_command(&mut Cursor::new(bytes)).await;

        assert_eq!(msg.command(), None);
        assert_eq!(
            msg.error.map(|e| e.reply),
            Some(Socks5ReplyCode::CommandNotSupported)
        );
        // The address is still consumed and decoded
        assert_eq!(msg.target, TargetAddr::ipv4(Ipv4Addr::LOCALHOST, 80));
    }

    #[tokio::test]
    async fn test_read_command_invalid_version() {
        let mut bytes = request(SOCKS5_CMD_TCP_CONNECT, &[SOCKS5_ADDR_TYPE_IPV4, 127, 0, 0, 1, 0, 80]);
        bytes[0] = 4;
        let msg = read_command(&mut Cursor::new(bytes)).await;

        assert_eq!(
            msg.error.map(|e| e.reply),
            Some(Socks5ReplyCode::GeneralFailure)
        );
    }

    #[tokio::test]
    async fn test_read_command_truncated() {
        let msg = read_command(&mut Cursor::new(vec![SOCKS5_VERSION, 1])).await;
        assert_eq!(
            msg.error.as_ref().map(|e| e.reply),
            Some(Socks5ReplyCode::GeneralFailure)
        );

        let bytes = request(SOCKS5_CMD_TCP_CONNECT, &[SOCKS5_ADDR_TYPE_IPV4, 127, 0]);
        let msg = read_command(&mut Cursor::new(bytes)).await;
        assert!(msg.error.unwrap().message.contains("truncated"));
    }

    #[tokio::test]
    async fn test_read_command_empty_domain() {
        let bytes = request(SOCKS5_CMD_TCP_CONNECT, &[SOCKS5_ADDR_TYPE_DOMAIN, 0, 0, 80]);
        let msg = read_command(&mut Cursor::new(bytes)).await;
        assert_eq!(
            msg.error.map(|e| e.reply),
            Some(Socks5ReplyCode::GeneralFailure)
        );
    }

    #[test]
    fn test_command_error_from_socks5_error() {
        let err: CommandError = Socks5Error::AddressTypeNotSupported(7).into();
        assert_eq!(err.reply, Socks5ReplyCode::AddressTypeNotSupported);
        assert!(err.to_string().contains("Address type not supported: 7"));
    }
}
