//! Configuration module for Sockchain
//!
//! This module provides configuration types and parsing for the server and
//! its upstream proxy chain.

mod proxy;
mod server;
mod transport;

pub use proxy::{build_chain, ProxyConfig, ProxyType};
pub use server::ServerConfig;
pub use transport::{TcpConfig, TlsConfig};

use crate::error::SockchainError;
use crate::proxy::ProxyDescriptor;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// SOCKS5 server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream hops in dial order, outermost first
    #[serde(default)]
    pub chain: Vec<ProxyConfig>,
}

impl Config {
    /// Validate the server and every hop
    pub fn validate(&self) -> Result<()> {
        self.server.validate().map_err(SockchainError::Config)?;
        for hop in &self.chain {
            hop.validate().map_err(SockchainError::Config)?;
        }
        Ok(())
    }

    /// The configured proxy chain, `None` when connecting directly
    pub fn proxy_chain(&self) -> Result<Option<ProxyDescriptor>> {
        build_chain(
            &self.chain,
            self.server.request_timeout,
            &self.server.tcp.socket_opts(),
        )
    }
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse configuration")
}
