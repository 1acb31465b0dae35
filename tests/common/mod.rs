//! Test utilities and mocks for Sockchain
//!
//! This module provides common test utilities used across integration tests.

#![allow(dead_code)]

use sockchain::config::{Config, ProxyConfig, ProxyType, TlsConfig};
use sockchain::server::{build_handler, SessionManager, SocksServer};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot};

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// A closed local port: connecting to it is refused
pub async fn closed_port() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    drop(listener);
    addr
}

/// Spawn a TCP echo server that serves any number of connections
pub async fn spawn_echo_server() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = stream.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

/// A running server and the means to stop it
pub struct TestServer {
    /// Address the server listens on
    pub addr: SocketAddr,
    /// Active session set
    pub manager: Arc<SessionManager>,
    shutdown_tx: broadcast::Sender<bool>,
}

impl TestServer {
    /// Stop accepting and close every session
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start a server for `config` on an ephemeral port
pub async fn start_server(mut config: Config) -> TestServer {
    config.server.bind_addr = "127.0.0.1:0".to_string();

    let manager = Arc::new(SessionManager::new());
    let handler = build_handler(&config, manager.clone()).unwrap();
    let (listener, addr) = create_test_listener().await;
    let server = SocksServer::from_listener(listener, handler, manager.clone());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(server.run(shutdown_rx));

    TestServer {
        addr,
        manager,
        shutdown_tx,
    }
}

/// Test configuration builder
#[derive(Default)]
pub struct TestConfigBuilder {
    auth: Option<(String, String)>,
    allow_udp: bool,
    allow_bind: bool,
    request_timeout: Option<u64>,
    chain: Vec<ProxyConfig>,
}

impl TestConfigBuilder {
    /// Create a new test config builder with every command enabled
    pub fn new() -> Self {
        TestConfigBuilder {
            allow_udp: true,
            allow_bind: true,
            ..Default::default()
        }
    }

    /// Require username/password authentication
    pub fn auth(mut self, username: &str, password: &str) -> Self {
        self.auth = Some((username.to_string(), password.to_string()));
        self
    }

    /// Allow UDP
    pub fn allow_udp(mut self, allow: bool) -> Self {
        self.allow_udp = allow;
        self
    }

    /// Outbound dial timeout in seconds
    pub fn request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout = Some(secs);
        self
    }

    /// Append an upstream hop
    pub fn hop(mut self, kind: ProxyType, addr: SocketAddr) -> Self {
        self.chain.push(ProxyConfig {
            kind,
            address: addr.ip().to_string(),
            port: addr.port(),
            username: None,
            password: None,
            resolve_locally: false,
            connect_timeout: None,
            user_agent: None,
            tls: None,
        });
        self
    }

    /// Append an upstream hop wrapped in TLS, accepting any certificate
    pub fn tls_hop(mut self, kind: ProxyType, addr: SocketAddr) -> Self {
        self = self.hop(kind, addr);
        if let Some(hop) = self.chain.last_mut() {
            hop.tls = Some(TlsConfig {
                hostname: Some("localhost".to_string()),
                trusted_root: None,
                skip_verify: true,
            });
        }
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        let mut config = Config::default();
        config.server.allow_udp = self.allow_udp;
        config.server.allow_bind = self.allow_bind;
        if let Some(secs) = self.request_timeout {
            config.server.request_timeout = secs;
        }
        if let Some((username, password)) = self.auth {
            config.server.auth_required = true;
            config.server.username = Some(username);
            config.server.password = Some(password);
        }
        config.chain = self.chain;
        config
    }
}

/// Spawn a one-shot HTTP CONNECT proxy
///
/// Answers the first request with `status`. On 200 it dials the requested
/// authority and relays. The request line is sent on the returned channel.
pub async fn spawn_http_hop(status: u16) -> (SocketAddr, oneshot::Receiver<String>) {
    let (listener, addr) = create_test_listener().await;
    let (line_tx, line_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);

        let mut request_line = String::new();
        reader.read_line(&mut request_line).await.unwrap();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap() == 0 || line == "\r\n" {
                break;
            }
        }
        let _ = line_tx.send(request_line.clone());

        let mut client = reader.into_inner();
        if status != 200 {
            let _ = client
                .write_all(format!("HTTP/1.1 {} Forbidden\r\n\r\n", status).as_bytes())
                .await;
            return;
        }

        let authority = request_line.split(' ').nth(1).unwrap().to_string();
        let mut upstream = TcpStream::connect(authority).await.unwrap();
        client
            .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
            .await
            .unwrap();
        let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
    });

    (addr, line_rx)
}

/// Spawn a TLS terminator in front of `upstream`
///
/// Every accepted connection completes a TLS handshake with the self-signed
/// `localhost` certificate under `tests/fixtures`, then is relayed in the
/// clear to `upstream`.
#[cfg(feature = "rustls-tls")]
pub async fn spawn_tls_terminator(upstream: SocketAddr) -> SocketAddr {
    use tokio_rustls::rustls::ServerConfig;
    use tokio_rustls::TlsAcceptor;

    let cert_pem = include_bytes!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/cert.pem"
    ));
    let key_pem = include_bytes!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/key.pem"
    ));
    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .unwrap()
        .unwrap();
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let (listener, addr) = create_test_listener().await;
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(mut tls) = acceptor.accept(stream).await else {
                    return;
                };
                let Ok(mut plain) = TcpStream::connect(upstream).await else {
                    return;
                };
                let _ = tokio::io::copy_bidirectional(&mut tls, &mut plain).await;
            });
        }
    });
    addr
}

/// Read a full SOCKS5 reply with an IPv4 or IPv6 bound address
pub async fn read_reply(stream: &mut TcpStream) -> (u8, SocketAddr) {
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.unwrap();
    assert_eq!(head[0], 0x05);

    let ip: std::net::IpAddr = match head[3] {
        0x01 => {
            let mut ip = [0u8; 4];
            stream.read_exact(&mut ip).await.unwrap();
            ip.into()
        }
        0x04 => {
            let mut ip = [0u8; 16];
            stream.read_exact(&mut ip).await.unwrap();
            ip.into()
        }
        other => panic!("unexpected address type {}", other),
    };
    let port = stream.read_u16().await.unwrap();
    (head[1], SocketAddr::new(ip, port))
}

/// Mock SOCKS5 handshake data
pub mod socks5_mock {
    use sockchain::socks::consts::*;
    use std::net::SocketAddr;

    /// Create a no-auth method selection request
    pub fn create_auth_request_no_auth() -> Vec<u8> {
        vec![SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_NONE]
    }

    /// Create a command request to a socket address
    pub fn create_command(cmd: u8, addr: SocketAddr) -> Vec<u8> {
        let mut bytes = vec![SOCKS5_VERSION, cmd, SOCKS5_RESERVED];
        match addr {
            SocketAddr::V4(v4) => {
                bytes.push(SOCKS5_ADDR_TYPE_IPV4);
                bytes.extend_from_slice(&v4.ip().octets());
            }
            SocketAddr::V6(v6) => {
                bytes.push(SOCKS5_ADDR_TYPE_IPV6);
                bytes.extend_from_slice(&v6.ip().octets());
            }
        }
        bytes.extend_from_slice(&addr.port().to_be_bytes());
        bytes
    }

    /// Create a connect command to domain
    pub fn create_connect_domain(domain: &str, port: u16) -> Vec<u8> {
        let mut cmd = vec![
            SOCKS5_VERSION,
            SOCKS5_CMD_TCP_CONNECT,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_DOMAIN,
            domain.len() as u8,
        ];
        cmd.extend_from_slice(domain.as_bytes());
        cmd.extend_from_slice(&port.to_be_bytes());
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_test_listener() {
        let (listener, addr) = create_test_listener().await;
        assert!(addr.port() > 0);
        drop(listener);
    }

    #[test]
    fn test_config_builder() {
        let config = TestConfigBuilder::new()
            .auth("user", "pass")
            .allow_udp(false)
            .build();

        assert!(config.server.auth_required);
        assert!(!config.server.allow_udp);
        assert!(config.server.allow_bind);
        assert!(config.validate().is_ok());
    }
}
