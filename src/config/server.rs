//! Server configuration types

use super::TcpConfig;
use crate::helper::DEFAULT_CONNECT_TIMEOUT_SECS;
use crate::socks::consts::DEFAULT_BUFFER_SIZE;
use serde::{Deserialize, Serialize};

/// Default listen address
fn default_bind_addr() -> String {
    "127.0.0.1:1080".to_string()
}

/// Default for the command switches
fn default_true() -> bool {
    true
}

/// Default request timeout in seconds
fn default_request_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

/// Default relay buffer size
fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

/// Default idle-check interval in milliseconds
fn default_idle_time() -> u64 {
    2000
}

/// SOCKS5 server configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Listen address (e.g., "127.0.0.1:1080")
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Require username/password authentication
    #[serde(default)]
    pub auth_required: bool,

    /// Username for SOCKS5 auth
    #[serde(default)]
    pub username: Option<String>,

    /// Password for SOCKS5 auth
    #[serde(default)]
    pub password: Option<String>,

    /// Allow UDP ASSOCIATE
    #[serde(default = "default_true")]
    pub allow_udp: bool,

    /// Allow BIND
    #[serde(default = "default_true")]
    pub allow_bind: bool,

    /// Connect timeout for outbound dials in seconds, 0 for none
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// How long BIND waits for the inbound connection in seconds, 0 for forever
    #[serde(default)]
    pub bind_timeout: u64,

    /// Relay buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Idle-check interval in milliseconds
    ///
    /// Accepted for compatibility. Relays finish on a completion signal, so
    /// the value is not used.
    #[serde(default = "default_idle_time")]
    pub idle_time: u64,

    /// Socket options for accepted and dialed connections
    #[serde(default)]
    pub tcp: TcpConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: default_bind_addr(),
            auth_required: false,
            username: None,
            password: None,
            allow_udp: true,
            allow_bind: true,
            request_timeout: default_request_timeout(),
            bind_timeout: 0,
            buffer_size: default_buffer_size(),
            idle_time: default_idle_time(),
            tcp: TcpConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Check if authentication credentials are configured
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.auth_required && !self.has_credentials() {
            return Err("Authentication required but no credentials configured".to_string());
        }
        if self.buffer_size == 0 {
            return Err("buffer_size must be greater than zero".to_string());
        }
        Ok(())
    }
}
