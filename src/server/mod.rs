//! SOCKS5 server
//!
//! Accepts client connections, wraps each one in a [`Session`] and runs the
//! shared [`Socks5Handler`] on it in its own task.

mod manager;
mod session;

pub use manager::{SessionListener, SessionManager};
pub use session::{Session, SessionHandle};

use crate::config::Config;
use crate::helper::{timeout_from_secs, RetryConfig};
use crate::socks::auth::{ConfiguredMethodSelector, StaticCredentials};
use crate::socks::Socks5Handler;
use crate::transport::SocketOpts;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Build the session handler described by `config`
///
/// Session hooks go to `manager`.
pub fn build_handler(config: &Config, manager: Arc<SessionManager>) -> Result<Socks5Handler> {
    config.validate()?;
    let server = &config.server;

    let mut handler = Socks5Handler::new()
        .with_method_selector(Arc::new(ConfiguredMethodSelector::new(
            server.auth_required,
            server.has_credentials(),
        )))
        .with_listener(manager)
        .with_buffer_size(server.buffer_size)
        .with_connect_timeout(timeout_from_secs(server.request_timeout))
        .with_bind_timeout(timeout_from_secs(server.bind_timeout))
        .with_allow_udp(server.allow_udp)
        .with_allow_bind(server.allow_bind);

    if let (Some(username), Some(password)) = (&server.username, &server.password) {
        handler = handler.with_verifier(Arc::new(StaticCredentials::new(username, password)));
    }

    if let Some(chain) = config.proxy_chain()? {
        info!(
            "Proxy chain: {}",
            chain
                .chain()
                .iter()
                .map(|hop| hop.to_string())
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        handler = handler.with_proxy(chain);
    }

    Ok(handler)
}

/// A bound SOCKS5 server
#[derive(Debug)]
pub struct SocksServer {
    listener: TcpListener,
    handler: Socks5Handler,
    manager: Arc<SessionManager>,
    socket_opts: SocketOpts,
    next_id: AtomicU64,
}

impl SocksServer {
    /// Bind the configured address
    pub async fn bind(config: &Config) -> Result<Self> {
        let manager = Arc::new(SessionManager::new());
        let handler = build_handler(config, manager.clone())?;

        let listener = TcpListener::bind(&config.server.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;

        let mut server = Self::from_listener(listener, handler, manager);
        server.socket_opts = config.server.tcp.socket_opts();
        Ok(server)
    }

    /// Serve on an already bound listener
    ///
    /// `manager` should be the listener registered on `handler` so shutdown
    /// can reach every session.
    pub fn from_listener(
        listener: TcpListener,
        handler: Socks5Handler,
        manager: Arc<SessionManager>,
    ) -> Self {
        SocksServer {
            listener,
            handler,
            manager,
            socket_opts: SocketOpts::for_client(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Active sessions
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Accept connections until shutdown
    ///
    /// On shutdown the listener is dropped and every active session is closed.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
        info!("SOCKS5 server listening on {}", self.local_addr()?);

        let retry = RetryConfig::default();
        let mut accept_failures = 0u32;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => {
                            accept_failures = 0;
                            accepted
                        }
                        Err(e) => {
                            // Back off while errors such as EMFILE persist
                            accept_failures = accept_failures.saturating_add(1);
                            let delay = retry.delay_for_failures(accept_failures);
                            error!("Accept failed: {}, retrying in {:?}", e, delay);
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    };

                    if let Err(e) = self.socket_opts.apply(&stream) {
                        warn!("Failed to apply socket options for {}: {}", addr, e);
                    }

                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let session = match Session::from_tcp(id, stream) {
                        Ok(session) => session,
                        Err(e) => {
                            debug!("Dropping connection from {}: {}", addr, e);
                            continue;
                        }
                    };

                    self.manager.on_create(&session);
                    let handler = self.handler.clone();
                    tokio::spawn(async move { handler.run(session).await });
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        let closed = self.manager.close_all();
        info!("Server stopped, closed {} active session(s)", closed);
        Ok(())
    }
}

/// Bind and run a server until shutdown
pub async fn run_server(config: Config, shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
    SocksServer::bind(&config).await?.run(shutdown_rx).await
}
