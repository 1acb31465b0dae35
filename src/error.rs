//! Error types for Sockchain
//!
//! This module defines all custom error types used throughout the application.

use std::fmt;
use std::io;
use thiserror::Error;

/// Main error type for Sockchain operations
#[derive(Error, Debug)]
pub enum SockchainError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Outbound connection error
    #[error("Connection error: {0}")]
    Connect(#[from] ConnectError),

    /// Proxy chain negotiation error
    #[error("Proxy chain error: {0}")]
    Chain(String),

    /// SOCKS5 protocol error
    #[error("SOCKS5 error: {0}")]
    Socks5(#[from] Socks5Error),

    /// Relay error
    #[error("Relay error: {0}")]
    Relay(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),
}

/// SOCKS5 specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Socks5Error {
    /// Unsupported SOCKS version
    #[error("Unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// No acceptable authentication method
    #[error("No acceptable authentication method")]
    NoAcceptableMethod,

    /// Authentication failed
    #[error("Authentication failed")]
    AuthFailed,

    /// Command not supported
    #[error("Command not supported: {0}")]
    CommandNotSupported(u8),

    /// Address type not supported
    #[error("Address type not supported: {0}")]
    AddressTypeNotSupported(u8),

    /// General SOCKS server failure
    #[error("General SOCKS server failure")]
    GeneralFailure,

    /// Invalid domain name
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),
}

/// Reply codes for SOCKS5 protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Socks5ReplyCode {
    /// Command succeeded
    Succeeded = 0x00,
    /// General SOCKS server failure
    GeneralFailure = 0x01,
    /// Connection not allowed by ruleset
    ConnectionNotAllowed = 0x02,
    /// Network unreachable
    NetworkUnreachable = 0x03,
    /// Host unreachable
    HostUnreachable = 0x04,
    /// Connection refused
    ConnectionRefused = 0x05,
    /// TTL expired
    TtlExpired = 0x06,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddressTypeNotSupported = 0x08,
}

impl From<Socks5ReplyCode> for u8 {
    fn from(code: Socks5ReplyCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for Socks5ReplyCode {
    type Error = Socks5Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Socks5ReplyCode::Succeeded),
            0x01 => Ok(Socks5ReplyCode::GeneralFailure),
            0x02 => Ok(Socks5ReplyCode::ConnectionNotAllowed),
            0x03 => Ok(Socks5ReplyCode::NetworkUnreachable),
            0x04 => Ok(Socks5ReplyCode::HostUnreachable),
            0x05 => Ok(Socks5ReplyCode::ConnectionRefused),
            0x06 => Ok(Socks5ReplyCode::TtlExpired),
            0x07 => Ok(Socks5ReplyCode::CommandNotSupported),
            0x08 => Ok(Socks5ReplyCode::AddressTypeNotSupported),
            _ => Err(Socks5Error::GeneralFailure),
        }
    }
}

impl fmt::Display for Socks5ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Socks5ReplyCode::Succeeded => "SUCCEEDED",
            Socks5ReplyCode::GeneralFailure => "GENERAL_FAILURE",
            Socks5ReplyCode::ConnectionNotAllowed => "CONNECTION_NOT_ALLOWED",
            Socks5ReplyCode::NetworkUnreachable => "NETWORK_UNREACHABLE",
            Socks5ReplyCode::HostUnreachable => "HOST_UNREACHABLE",
            Socks5ReplyCode::ConnectionRefused => "CONNECTION_REFUSED",
            Socks5ReplyCode::TtlExpired => "TTL_EXPIRED",
            Socks5ReplyCode::CommandNotSupported => "COMMAND_NOT_SUPPORTED",
            Socks5ReplyCode::AddressTypeNotSupported => "ADDRESS_TYPE_NOT_SUPPORTED",
        };
        f.write_str(name)
    }
}

/// Classification of a failed outbound dial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    /// The remote end actively refused the connection
    Refused,
    /// The dial (or a hop negotiation) did not finish in time
    TimedOut,
    /// No route to the target network
    NetworkUnreachable,
    /// Anything else, including proxy chain negotiation failures
    Other,
}

impl ConnectErrorKind {
    /// Classify an IO error by its kind
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ConnectErrorKind::Refused,
            io::ErrorKind::TimedOut => ConnectErrorKind::TimedOut,
            io::ErrorKind::NetworkUnreachable => ConnectErrorKind::NetworkUnreachable,
            _ => ConnectErrorKind::Other,
        }
    }
}

impl fmt::Display for ConnectErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectErrorKind::Refused => write!(f, "connection refused"),
            ConnectErrorKind::TimedOut => write!(f, "timed out"),
            ConnectErrorKind::NetworkUnreachable => write!(f, "network unreachable"),
            ConnectErrorKind::Other => write!(f, "connect failed"),
        }
    }
}

impl From<ConnectErrorKind> for Socks5ReplyCode {
    fn from(kind: ConnectErrorKind) -> Self {
        match kind {
            ConnectErrorKind::Refused => Socks5ReplyCode::ConnectionRefused,
            ConnectErrorKind::TimedOut => Socks5ReplyCode::TtlExpired,
            ConnectErrorKind::NetworkUnreachable => Socks5ReplyCode::NetworkUnreachable,
            ConnectErrorKind::Other => Socks5ReplyCode::GeneralFailure,
        }
    }
}

/// Failure to open an outbound stream, directly or through a proxy chain
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ConnectError {
    /// What went wrong, used to pick the SOCKS5 reply code
    pub kind: ConnectErrorKind,
    /// Human readable detail for logs
    pub message: String,
}

impl ConnectError {
    /// Create a new connect error
    pub fn new(kind: ConnectErrorKind, message: impl Into<String>) -> Self {
        ConnectError {
            kind,
            message: message.into(),
        }
    }

    /// Build from an IO error raised while dialing `target`
    pub fn from_io(err: &io::Error, target: impl fmt::Display) -> Self {
        ConnectError::new(ConnectErrorKind::from_io(err), format!("{}: {}", target, err))
    }

    /// Dial or negotiation deadline elapsed
    pub fn timed_out(target: impl fmt::Display) -> Self {
        ConnectError::new(ConnectErrorKind::TimedOut, format!("{}: deadline elapsed", target))
    }

    /// A hop in the proxy chain refused or broke the negotiation
    pub fn chain(message: impl Into<String>) -> Self {
        ConnectError::new(ConnectErrorKind::Other, message)
    }

    /// Recover a connect error from an `anyhow` chain.
    ///
    /// A `ConnectError` or `io::Error` anywhere in the chain keeps its
    /// classification; everything else becomes a chain failure.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(connect) = cause.downcast_ref::<ConnectError>() {
                return connect.clone();
            }
            if let Some(io_err) = cause.downcast_ref::<io::Error>() {
                return ConnectError::new(ConnectErrorKind::from_io(io_err), format!("{:#}", err));
            }
        }
        ConnectError::chain(format!("{:#}", err))
    }

    /// SOCKS5 reply code for this failure
    pub fn reply_code(&self) -> Socks5ReplyCode {
        self.kind.into()
    }
}
