//! # Sockchain - SOCKS5 server with upstream proxy chaining
//!
//! Sockchain accepts SOCKS5 clients, executes CONNECT, BIND and UDP ASSOCIATE
//! requests, and can send CONNECT traffic through a chain of upstream SOCKS5
//! or HTTP CONNECT proxies, each optionally wrapped in TLS.
//!
//! ## Features
//!
//! - **SOCKS5 server**: no-auth and username/password (RFC 1929) methods
//! - **Proxy chaining**: nested tunnels through any mix of SOCKS5 and HTTP hops
//! - **UDP ASSOCIATE**: datagram relay tied to the controlling TCP session
//! - **BIND**: single inbound connection per request
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sockchain::config::load_config;
//! use sockchain::server::run_server;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("config.toml")?;
//!     let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//!     run_server(config, shutdown_rx).await
//! }
//! ```
//!
//! The chain can also be used on its own:
//!
//! ```rust,ignore
//! use sockchain::proxy::ProxyDescriptor;
//! use sockchain::socks::TargetAddr;
//!
//! let chain = ProxyDescriptor::chained(vec![
//!     ProxyDescriptor::socks5(TargetAddr::from_host("10.0.0.1", 1080)),
//!     ProxyDescriptor::http(TargetAddr::from_host("proxy.example.com", 3128)),
//! ])
//! .unwrap();
//! let stream = chain.connect(&TargetAddr::from_host("example.com", 443)).await?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! SOCKS5 Client -> Sockchain -> [hop 1 -> ... -> hop N] -> Target
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod helper;
pub mod proxy;
pub mod server;
pub mod socks;
pub mod transport;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use error::{ConnectError, SockchainError, Socks5Error};
pub use proxy::ProxyDescriptor;
pub use server::{run_server, SocksServer};

/// Version of the Sockchain library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
