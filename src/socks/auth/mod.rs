//! SOCKS5 authentication module
//!
//! Handles authentication method selection and the per-method
//! sub-negotiation that follows it.

mod password;

pub use password::{send_credentials, CredentialVerifier, PasswordAuth, StaticCredentials};

use super::consts::*;
use super::handshake::{read_handshake, write_handshake_response};
use crate::error::Socks5Error;
use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Authentication method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// No authentication required
    None,
    /// Username/password authentication
    Password,
}

impl AuthMethod {
    /// Convert to SOCKS5 method byte
    pub fn to_byte(self) -> u8 {
        match self {
            AuthMethod::None => SOCKS5_AUTH_METHOD_NONE,
            AuthMethod::Password => SOCKS5_AUTH_METHOD_PASSWORD,
        }
    }

    /// Parse from SOCKS5 method byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            SOCKS5_AUTH_METHOD_NONE => Some(AuthMethod::None),
            SOCKS5_AUTH_METHOD_PASSWORD => Some(AuthMethod::Password),
            _ => None,
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::None => write!(f, "NO_AUTH"),
            AuthMethod::Password => write!(f, "USERNAME_PASSWORD"),
        }
    }
}

/// Picks one of the methods a client offered
pub trait MethodSelector: Send + Sync + fmt::Debug {
    /// Return the chosen method, or `None` when nothing offered is acceptable
    fn select(&self, offered: &[u8]) -> Option<AuthMethod>;
}

/// Method selector driven by the server configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfiguredMethodSelector {
    auth_required: bool,
    has_credentials: bool,
}

impl ConfiguredMethodSelector {
    /// Create a selector
    ///
    /// # Arguments
    ///
    /// * `auth_required` - Only USERNAME/PASSWORD is acceptable
    /// * `has_credentials` - Credentials are configured, so USERNAME/PASSWORD
    ///   can be offered even when not required
    pub fn new(auth_required: bool, has_credentials: bool) -> Self {
        ConfiguredMethodSelector {
            auth_required,
            has_credentials,
        }
    }
}

impl MethodSelector for ConfiguredMethodSelector {
    fn select(&self, offered: &[u8]) -> Option<AuthMethod> {
        if self.auth_required {
            // Must use password authentication
            if offered.contains(&SOCKS5_AUTH_METHOD_PASSWORD) {
                return Some(AuthMethod::Password);
            }
        } else {
            // Prefer no authentication, but allow password if configured
            if offered.contains(&SOCKS5_AUTH_METHOD_NONE) {
                return Some(AuthMethod::None);
            }
            if offered.contains(&SOCKS5_AUTH_METHOD_PASSWORD) && self.has_credentials {
                return Some(AuthMethod::Password);
            }
        }

        None
    }
}

/// Perform method negotiation and the selected method's sub-protocol
///
/// This function handles the complete SOCKS5 authentication flow:
/// 1. Read client's supported methods
/// 2. Select a method with `selector`
/// 3. Perform authentication if required
///
/// # Returns
///
/// The selected authentication method if successful
pub async fn authenticate<S>(
    stream: &mut S,
    selector: &dyn MethodSelector,
    verifier: Option<&Arc<dyn CredentialVerifier>>,
) -> Result<AuthMethod>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handshake = read_handshake(stream).await?;

    let selected = selector.select(&handshake.methods);
    write_handshake_response(stream, selected.map(AuthMethod::to_byte)).await?;

    let method = selected.ok_or(Socks5Error::NoAcceptableMethod)?;
    tracing::debug!("Selected authentication method {}", method);

    if method == AuthMethod::Password {
        let verifier = verifier.context("Password authentication selected without a verifier")?;
        PasswordAuth::authenticate(stream, &**verifier).await?;
    }

    Ok(method)
}
