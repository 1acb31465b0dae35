//! Transport configuration types
//!
//! TCP socket options for accepted and dialed connections, and TLS settings
//! for TLS-wrapped proxy hops.

use crate::transport::SocketOpts;
use serde::{Deserialize, Serialize};

/// Default keepalive seconds
fn default_keepalive_secs() -> u64 {
    20
}

/// Default keepalive interval
fn default_keepalive_interval() -> u64 {
    8
}

/// Default TCP_NODELAY setting
fn default_nodelay() -> bool {
    true
}

/// TCP socket configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TcpConfig {
    /// Enable TCP_NODELAY
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,

    /// TCP keepalive timeout in seconds, 0 to disable keepalive
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// TCP keepalive interval in seconds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            nodelay: default_nodelay(),
            keepalive_secs: default_keepalive_secs(),
            keepalive_interval: default_keepalive_interval(),
        }
    }
}

impl TcpConfig {
    /// Socket options described by this configuration
    pub fn socket_opts(&self) -> SocketOpts {
        let keepalive = self.keepalive_secs > 0;
        SocketOpts {
            nodelay: self.nodelay,
            keepalive_secs: keepalive.then_some(self.keepalive_secs),
            keepalive_interval: keepalive.then_some(self.keepalive_interval),
        }
    }
}

/// TLS configuration for a proxy hop
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// Server name to verify, defaults to the hop's host
    #[serde(default)]
    pub hostname: Option<String>,

    /// PEM file with an additional trusted root certificate
    #[serde(default)]
    pub trusted_root: Option<String>,

    /// Accept any certificate
    #[serde(default)]
    pub skip_verify: bool,
}
