//! Username/password authentication handler
//!
//! Implements RFC 1929 username/password authentication for SOCKS5, both the
//! server side and the client side used when dialing an upstream hop.

use crate::error::Socks5Error;
use crate::socks::consts::{SOCKS5_AUTH_STATUS_FAILURE, SOCKS5_AUTH_STATUS_SUCCESS, SOCKS5_AUTH_VERSION};
use anyhow::{bail, Result};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Checks a username/password pair
pub trait CredentialVerifier: Send + Sync + fmt::Debug {
    /// Return whether the pair is accepted
    fn verify(&self, username: &str, password: &str) -> bool;
}

/// A single configured username/password pair
#[derive(Clone)]
pub struct StaticCredentials {
    username: String,
    password: String,
}

impl StaticCredentials {
    /// Create a verifier accepting exactly this pair
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        StaticCredentials {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl CredentialVerifier for StaticCredentials {
    fn verify(&self, username: &str, password: &str) -> bool {
        username == self.username && password == self.password
    }
}

/// Username/password authentication handler
pub struct PasswordAuth;

impl PasswordAuth {
    /// Perform username/password authentication
    ///
    /// # Protocol
    ///
    /// Client sends:
    /// ```text
    /// +----+------+----------+------+----------+
    /// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
    /// +----+------+----------+------+----------+
    /// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
    /// +----+------+----------+------+----------+
    /// ```
    ///
    /// Server responds:
    /// ```text
    /// +----+--------+
    /// |VER | STATUS |
    /// +----+--------+
    /// | 1  |   1    |
    /// +----+--------+
    /// ```
    pub async fn authenticate<S>(stream: &mut S, verifier: &dyn CredentialVerifier) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // Read version and username length
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await?;

        let version = buf[0];
        let username_len = buf[1] as usize;

        if version != SOCKS5_AUTH_VERSION {
            send_auth_result(stream, SOCKS5_AUTH_STATUS_FAILURE).await?;
            bail!("Invalid auth version: {}", version);
        }

        if username_len == 0 {
            send_auth_result(stream, SOCKS5_AUTH_STATUS_FAILURE).await?;
            bail!("Invalid username length: {}", username_len);
        }

        let mut username = vec![0u8; username_len];
        stream.read_exact(&mut username).await?;

        let password_len = stream.read_u8().await? as usize;
        if password_len == 0 {
            send_auth_result(stream, SOCKS5_AUTH_STATUS_FAILURE).await?;
            bail!("Invalid password length: {}", password_len);
        }

        let mut password = vec![0u8; password_len];
        stream.read_exact(&mut password).await?;

        let username = String::from_utf8_lossy(&username);
        let password = String::from_utf8_lossy(&password);

        if verifier.verify(&username, &password) {
            send_auth_result(stream, SOCKS5_AUTH_STATUS_SUCCESS).await?;
            tracing::debug!("Authentication successful for user: {}", username);
            Ok(())
        } else {
            send_auth_result(stream, SOCKS5_AUTH_STATUS_FAILURE).await?;
            tracing::debug!("Authentication failed for user: {}", username);
            Err(Socks5Error::AuthFailed.into())
        }
    }
}

/// Send authentication result to client
async fn send_auth_result<S: AsyncWrite + Unpin>(stream: &mut S, status: u8) -> Result<()> {
    stream.write_all(&[SOCKS5_AUTH_VERSION, status]).await?;
    stream.flush().await?;
    Ok(())
}

/// Run the client side of RFC 1929 against an upstream SOCKS5 server
pub async fn send_credentials<S>(stream: &mut S, username: &str, password: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if username.is_empty() || username.len() > 255 {
        bail!("Invalid username length: {}", username.len());
    }
    if password.is_empty() || password.len() > 255 {
        bail!("Invalid password length: {}", password.len());
    }

    let mut request = Vec::with_capacity(3 + username.len() + password.len());
    request.push(SOCKS5_AUTH_VERSION);
    request.push(username.len() as u8);
    request.extend_from_slice(username.as_bytes());
    request.push(password.len() as u8);
    request.extend_from_slice(password.as_bytes());

    stream.write_all(&request).await?;
    stream.flush().await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    if reply[1] != SOCKS5_AUTH_STATUS_SUCCESS {
        return Err(Socks5Error::AuthFailed.into());
    }

    Ok(())
}
