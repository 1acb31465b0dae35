//! Upstream proxy hops and chains
//!
//! A [`ProxyDescriptor`] describes one upstream hop and, optionally, the next
//! hop reached through it. Descriptors are immutable configuration; the live
//! state of a connection attempt lives in a [`ProxyConnection`] created per
//! attempt, so copies of one descriptor can be used concurrently.
//!
//! ```text
//! client -> [hop 1] -> [hop 2] -> ... -> [hop N] -> target
//!            dialed    CONNECT            CONNECT
//!            directly  over hop 1         to target
//! ```

mod chain;
mod connection;
mod http;
mod socks5;

pub use chain::connect_through;
pub use connection::ProxyConnection;

use crate::error::ConnectError;
use crate::helper::DEFAULT_CONNECT_TIMEOUT_SECS;
use crate::socks::TargetAddr;
use crate::transport::{Connector, ProxyStream, TcpConnector};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Protocol spoken by a hop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    /// SOCKS5 CONNECT
    Socks5,
    /// HTTP `CONNECT host:port HTTP/1.1`
    HttpConnect,
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyKind::Socks5 => write!(f, "socks5"),
            ProxyKind::HttpConnect => write!(f, "http"),
        }
    }
}

/// Credentials presented to a hop
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Credentials {
    /// No credentials
    #[default]
    Anonymous,
    /// RFC 1929 for SOCKS5, `Proxy-Authorization: Basic` for HTTP
    UsernamePassword {
        /// Username
        username: String,
        /// Password
        password: String,
    },
}

impl Credentials {
    /// Username/password credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::UsernamePassword {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Anonymous => write!(f, "Anonymous"),
            Credentials::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// One upstream proxy hop
#[derive(Debug, Clone)]
pub struct ProxyDescriptor {
    /// Hop protocol
    pub kind: ProxyKind,
    /// Address of the hop itself
    pub server: TargetAddr,
    /// Credentials presented to the hop
    pub credentials: Credentials,
    /// Deadline for dialing the hop and for each negotiation step
    pub connect_timeout: Option<Duration>,
    /// How the hop's connection is opened (plain or TLS)
    pub connector: Arc<dyn Connector>,
    /// Resolve domain targets locally instead of sending the name to the hop
    pub resolve_locally: bool,
    /// `User-Agent` header for HTTP hops
    pub user_agent: Option<String>,
    /// Hop reached through this one
    next: Option<Arc<ProxyDescriptor>>,
}

impl ProxyDescriptor {
    /// Create an anonymous plain-TCP hop with the default timeout
    pub fn new(kind: ProxyKind, server: TargetAddr) -> Self {
        ProxyDescriptor {
            kind,
            server,
            credentials: Credentials::Anonymous,
            connect_timeout: Some(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS)),
            connector: Arc::new(TcpConnector::with_defaults()),
            resolve_locally: false,
            user_agent: None,
            next: None,
        }
    }

    /// Shorthand for a SOCKS5 hop
    pub fn socks5(server: TargetAddr) -> Self {
        Self::new(ProxyKind::Socks5, server)
    }

    /// Shorthand for an HTTP CONNECT hop
    pub fn http(server: TargetAddr) -> Self {
        Self::new(ProxyKind::HttpConnect, server)
    }

    /// Set credentials
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the connect timeout, `None` to wait forever
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the transport-connect strategy
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Set the address-resolution mode
    pub fn with_resolve_locally(mut self, resolve_locally: bool) -> Self {
        self.resolve_locally = resolve_locally;
        self
    }

    /// Set the `User-Agent` sent to HTTP hops
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set the hop reached through this one
    pub fn with_next(mut self, next: ProxyDescriptor) -> Self {
        self.next = Some(Arc::new(next));
        self
    }

    /// Build a chain from hops in dial order, outermost first
    pub fn chained(hops: Vec<ProxyDescriptor>) -> Option<ProxyDescriptor> {
        hops.into_iter().rev().fold(None, |next, mut hop| {
            hop.next = next.map(Arc::new);
            Some(hop)
        })
    }

    /// The hop reached through this one
    pub fn next(&self) -> Option<&ProxyDescriptor> {
        self.next.as_deref()
    }

    /// An independent descriptor with the same configuration
    ///
    /// The chain is shared: it is configuration, not connection state.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// A copy with the next hop cleared
    pub fn copy_without_chain(&self) -> Self {
        ProxyDescriptor {
            next: None,
            ..self.clone()
        }
    }

    /// Every hop in dial order, starting with this one
    pub fn chain(&self) -> Vec<&ProxyDescriptor> {
        let mut hops = vec![self];
        let mut current = self;
        while let Some(next) = current.next() {
            hops.push(next);
            current = next;
        }
        hops
    }

    /// Open a stream to `target` through this hop and its chain
    pub async fn connect(&self, target: &TargetAddr) -> Result<ProxyStream, ConnectError> {
        connect_through(self, target).await
    }
}

impl fmt::Display for ProxyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.kind, self.server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn hop(kind: ProxyKind, port: u16) -> ProxyDescriptor {
        ProxyDescriptor::new(kind, TargetAddr::ipv4(Ipv4Addr::LOCALHOST, port))
    }

    #[test]
    fn test_chained_keeps_dial_order() {
        let chain = ProxyDescriptor::chained(vec![
            hop(ProxyKind::Socks5, 1),
            hop(ProxyKind::HttpConnect, 2),
            hop(ProxyKind::Socks5, 3),
        ])
        .unwrap();

        let ports: Vec<u16> = chain.chain().iter().map(|h| h.server.port()).collect();
        assert_eq!(ports, vec![1, 2, 3]);
        assert_eq!(chain.next().unwrap().kind, ProxyKind::HttpConnect);
    }

    #[test]
    fn test_chained_empty() {
        assert!(ProxyDescriptor::chained(Vec::new()).is_none());
    }

    #[test]
    fn test_copy_shares_chain() {
        let original = hop(ProxyKind::Socks5, 1).with_next(hop(ProxyKind::HttpConnect, 2));
        let copy = original.copy();

        assert_eq!(copy.chain().len(), 2);
        assert!(std::ptr::eq(
            original.next().unwrap(),
            copy.next().unwrap()
        ));
    }

    #[test]
    fn test_copy_without_chain() {
        let original = hop(ProxyKind::Socks5, 1)
            .with_credentials(Credentials::new("u", "p"))
            .with_next(hop(ProxyKind::HttpConnect, 2));
        let copy = original.copy_without_chain();

        assert!(copy.next().is_none());
        assert_eq!(copy.credentials, original.credentials);
        assert_eq!(original.chain().len(), 2);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("alice", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_display() {
        let descriptor = ProxyDescriptor::http(TargetAddr::domain("proxy.local".to_string(), 3128));
        assert_eq!(descriptor.to_string(), "http://proxy.local:3128");
    }
}
