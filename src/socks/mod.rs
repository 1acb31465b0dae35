//! SOCKS5 protocol
//!
//! Wire codec for the handshake, command and UDP messages, the server-side
//! method negotiation, the relay pipe, and the per-session handler.

pub mod auth;
pub mod command;
pub mod consts;
mod handler;
pub mod handshake;
pub mod pipe;
mod types;
pub mod udp;

pub use handler::{SessionState, Socks5Handler};
pub use pipe::{Direction, Pipe, PipeInspector, PipeStats};
pub use types::{SocksCommand, TargetAddr};
pub use udp::UdpRelay;
