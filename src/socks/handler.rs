//! SOCKS5 session handler
//!
//! Drives one session through the protocol:
//!
//! ```text
//! AwaitHandshake -> MethodSelected -> AwaitCommand -> Dispatched -> Relaying -> Closed
//! ```
//!
//! Any state may jump to `Closed` on error or completion. Failures after the
//! handshake are answered with a reply code before the session closes.

use crate::error::{ConnectError, Socks5ReplyCode};
use crate::helper::with_timeout;
use crate::proxy::ProxyDescriptor;
use crate::server::{Session, SessionListener};
use crate::socks::auth::{
    authenticate, ConfiguredMethodSelector, CredentialVerifier, MethodSelector,
};
use crate::socks::command::{read_command, send_failure, send_success};
use crate::socks::consts::DEFAULT_BUFFER_SIZE;
use crate::socks::pipe::{Pipe, PipeInspector};
use crate::socks::udp::UdpRelay;
use crate::socks::{SocksCommand, TargetAddr};
use crate::transport::{dial, BoxedStream, ProxyStream, SocketOpts, StreamDyn};
use anyhow::{Context, Result};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tracing::{debug, info, trace, warn};

/// Position of a session in the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the method negotiation request
    AwaitHandshake,
    /// A method was chosen and its sub-negotiation finished
    MethodSelected,
    /// Waiting for the command request
    AwaitCommand,
    /// Executing a command
    Dispatched(SocksCommand),
    /// Relaying traffic
    Relaying,
    /// Done
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::AwaitHandshake => write!(f, "AWAIT_HANDSHAKE"),
            SessionState::MethodSelected => write!(f, "METHOD_SELECTED"),
            SessionState::AwaitCommand => write!(f, "AWAIT_COMMAND"),
            SessionState::Dispatched(cmd) => write!(f, "DISPATCHED({})", cmd),
            SessionState::Relaying => write!(f, "RELAYING"),
            SessionState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Tracks and traces the state of one session
struct StateTracker {
    session: u64,
    state: SessionState,
}

impl StateTracker {
    fn new(session: u64) -> Self {
        StateTracker {
            session,
            state: SessionState::AwaitHandshake,
        }
    }

    fn advance(&mut self, next: SessionState) {
        trace!("SESSION[{}] {} -> {}", self.session, self.state, next);
        self.state = next;
    }
}

/// Serves SOCKS5 sessions
///
/// Cheap to clone; the server shares one handler between all sessions.
#[derive(Debug, Clone)]
pub struct Socks5Handler {
    method_selector: Arc<dyn MethodSelector>,
    verifier: Option<Arc<dyn CredentialVerifier>>,
    proxy: Option<Arc<ProxyDescriptor>>,
    inspector: Option<Arc<dyn PipeInspector>>,
    listener: Option<Arc<dyn SessionListener>>,
    buffer_size: usize,
    connect_timeout: Option<Duration>,
    bind_timeout: Option<Duration>,
    allow_udp: bool,
    allow_bind: bool,
}

impl Default for Socks5Handler {
    fn default() -> Self {
        Self::new()
    }
}

impl Socks5Handler {
    /// Anonymous, direct-connecting handler with every command enabled
    pub fn new() -> Self {
        Socks5Handler {
            method_selector: Arc::new(ConfiguredMethodSelector::default()),
            verifier: None,
            proxy: None,
            inspector: None,
            listener: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            connect_timeout: Some(Duration::from_secs(
                crate::helper::DEFAULT_CONNECT_TIMEOUT_SECS,
            )),
            bind_timeout: None,
            allow_udp: true,
            allow_bind: true,
        }
    }

    /// Set the authentication method selector
    pub fn with_method_selector(mut self, selector: Arc<dyn MethodSelector>) -> Self {
        self.method_selector = selector;
        self
    }

    /// Set the username/password verifier
    pub fn with_verifier(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Route CONNECT through a proxy chain
    pub fn with_proxy(mut self, proxy: ProxyDescriptor) -> Self {
        self.proxy = Some(Arc::new(proxy));
        self
    }

    /// Inspect relayed traffic
    pub fn with_inspector(mut self, inspector: Arc<dyn PipeInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    /// Receive session lifecycle hooks
    pub fn with_listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Set the relay buffer size
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Set the deadline for direct dials, `None` to wait forever
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set how long BIND waits for its inbound connection, `None` to wait forever
    pub fn with_bind_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.bind_timeout = timeout;
        self
    }

    /// Enable or disable UDP ASSOCIATE
    pub fn with_allow_udp(mut self, allow: bool) -> Self {
        self.allow_udp = allow;
        self
    }

    /// Enable or disable BIND
    pub fn with_allow_bind(mut self, allow: bool) -> Self {
        self.allow_bind = allow;
        self
    }

    /// Run a session to completion
    ///
    /// The session is always closed on return and `on_close` fires exactly
    /// once. Closing the session from elsewhere aborts whatever state it is in.
    pub async fn run(&self, mut session: Session) {
        let mut tracker = StateTracker::new(session.id());

        let mut aborted = false;
        let result = match session.take_stream() {
            Some(stream) => {
                let close = session.close_signal();
                tokio::select! {
                    result = self.drive(&session, stream, &mut tracker) => result,
                    _ = close.wait() => {
                        aborted = true;
                        Ok(())
                    }
                }
            }
            None => Err(anyhow::anyhow!("Session stream is not available")),
        };

        if aborted {
            debug!("SESSION[{}] closed while {}", session.id(), tracker.state);
        }

        if let Err(e) = &result {
            debug!("SESSION[{}] failed in {}: {:#}", session.id(), tracker.state, e);
            if let Some(listener) = &self.listener {
                listener.on_exception(&session, e);
            }
        }

        session.close();
        tracker.advance(SessionState::Closed);
        if let Some(listener) = &self.listener {
            listener.on_close(&session);
        }
    }

    async fn drive(
        &self,
        session: &Session,
        mut stream: BoxedStream,
        tracker: &mut StateTracker,
    ) -> Result<()> {
        let method = authenticate(
            &mut stream,
            &*self.method_selector,
            self.verifier.as_ref(),
        )
        .await
        .with_context(|| "Authentication negotiation failed")?;
        debug!("SESSION[{}] authenticated with {}", session.id(), method);
        tracker.advance(SessionState::MethodSelected);

        tracker.advance(SessionState::AwaitCommand);
        let command = read_command(&mut stream).await;
        if let Some(error) = &command.error {
            warn!("SESSION[{}] bad request: {}", session.id(), error);
            if let Err(e) = send_failure(&mut stream, error.reply).await {
                debug!("SESSION[{}] could not send failure reply: {}", session.id(), e);
            }
            return Ok(());
        }

        if let Some(listener) = &self.listener {
            listener.on_command(session, &command);
        }

        let cmd = match command.command() {
            Some(cmd) => cmd,
            None => {
                send_failure(&mut stream, Socks5ReplyCode::CommandNotSupported).await?;
                return Ok(());
            }
        };
        tracker.advance(SessionState::Dispatched(cmd));

        match cmd {
            SocksCommand::Connect => self.connect(session, stream, command.target, tracker).await,
            SocksCommand::Bind if self.allow_bind => {
                self.bind(session, stream, command.target, tracker).await
            }
            SocksCommand::UdpAssociate if self.allow_udp => {
                self.udp_associate(session, stream, tracker).await
            }
            _ => {
                warn!("SESSION[{}] {} disabled by configuration", session.id(), cmd);
                send_failure(&mut stream, Socks5ReplyCode::CommandNotSupported).await
            }
        }
    }

    async fn open_outbound(&self, target: &TargetAddr) -> Result<ProxyStream, ConnectError> {
        match &self.proxy {
            Some(proxy) => proxy.connect(target).await,
            None => dial(target, self.connect_timeout, &SocketOpts::for_client())
                .await
                .map(ProxyStream::Direct),
        }
    }

    async fn connect(
        &self,
        session: &Session,
        mut stream: BoxedStream,
        target: TargetAddr,
        tracker: &mut StateTracker,
    ) -> Result<()> {
        let outbound = match self.open_outbound(&target).await {
            Ok(outbound) => outbound,
            Err(e) => {
                warn!("SESSION[{}] CONNECT {} failed: {}", session.id(), target, e);
                return send_failure(&mut stream, e.reply_code()).await;
            }
        };

        let bound = outbound.local_addr()?;
        send_success(&mut stream, bound).await?;
        info!(
            "SESSION[{}] connected to {}{}",
            session.id(),
            target,
            if outbound.is_tunneled() { " through proxy chain" } else { "" }
        );

        self.relay(session, stream, outbound, tracker).await
    }

    async fn bind(
        &self,
        session: &Session,
        mut stream: BoxedStream,
        target: TargetAddr,
        tracker: &mut StateTracker,
    ) -> Result<()> {
        let bind_addr = SocketAddr::new(session.server_addr().ip(), target.port());
        let listener = match TcpListener::bind(bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!("SESSION[{}] BIND on {} failed: {}", session.id(), bind_addr, e);
                return send_failure(&mut stream, ConnectError::from_io(&e, bind_addr).reply_code())
                    .await;
            }
        };

        let local_addr = listener.local_addr()?;
        send_success(&mut stream, local_addr).await?;
        debug!("SESSION[{}] BIND listening on {}", session.id(), local_addr);

        let (inbound, peer) = match with_timeout(self.bind_timeout, listener.accept()).await {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                warn!("SESSION[{}] BIND accept failed: {}", session.id(), e);
                return send_failure(&mut stream, Socks5ReplyCode::GeneralFailure).await;
            }
            Err(_) => {
                warn!("SESSION[{}] BIND timed out waiting for a peer", session.id());
                return send_failure(&mut stream, Socks5ReplyCode::TtlExpired).await;
            }
        };
        drop(listener);

        send_success(&mut stream, peer).await?;
        info!("SESSION[{}] BIND accepted {}", session.id(), peer);

        self.relay(session, stream, inbound, tracker).await
    }

    async fn udp_associate(
        &self,
        session: &Session,
        mut stream: BoxedStream,
        tracker: &mut StateTracker,
    ) -> Result<()> {
        let mut relay = UdpRelay::new(session.server_addr().ip(), session.client_addr().ip());
        let relay_addr = match relay.start().await {
            Ok(addr) => addr,
            Err(e) => {
                warn!("SESSION[{}] UDP relay failed to start: {:#}", session.id(), e);
                return send_failure(&mut stream, Socks5ReplyCode::GeneralFailure).await;
            }
        };

        send_success(&mut stream, relay_addr).await?;
        info!("SESSION[{}] UDP relay on {}", session.id(), relay_addr);
        tracker.advance(SessionState::Relaying);

        // The association lives as long as the control connection
        let mut buf = [0u8; 256];
        loop {
            tokio::select! {
                _ = relay.wait() => break,
                read = stream.read(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("SESSION[{}] control stream error: {}", session.id(), e);
                        break;
                    }
                },
            }
        }

        relay.stop();
        debug!("SESSION[{}] UDP relay stopped", session.id());
        Ok(())
    }

    async fn relay<S>(
        &self,
        session: &Session,
        client: BoxedStream,
        outbound: S,
        tracker: &mut StateTracker,
    ) -> Result<()>
    where
        S: StreamDyn + 'static,
    {
        let mut pipe = Pipe::new(format!("SESSION[{}]", session.id()), client, outbound)
            .with_buffer_size(self.buffer_size);
        if let Some(inspector) = &self.inspector {
            pipe = pipe.with_inspector(inspector.clone());
        }

        pipe.start()?;
        tracker.advance(SessionState::Relaying);

        let stats = pipe.wait().await;
        info!(
            "SESSION[{}] relay finished ({} bytes up, {} bytes down)",
            session.id(),
            stats.left_to_right,
            stats.right_to_left
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socks::auth::StaticCredentials;
    use crate::socks::command::{read_command_response, CommandMessage};
    use crate::socks::consts::*;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};
    use tokio::net::{TcpStream, UdpSocket};

    #[derive(Debug, Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl SessionListener for Recorder {
        fn on_command(&self, _session: &Session, command: &CommandMessage) {
            self.events
                .lock()
                .unwrap()
                .push(format!("command {}", command.command_byte));
        }

        fn on_exception(&self, _session: &Session, _error: &anyhow::Error) {
            self.events.lock().unwrap().push("exception".to_string());
        }

        fn on_close(&self, _session: &Session) {
            self.events.lock().unwrap().push("close".to_string());
        }
    }

    fn session_pair() -> (DuplexStream, Session) {
        let (client, server) = duplex(8192);
        let session = Session::new(
            1,
            "127.0.0.1:40000".parse().unwrap(),
            "127.0.0.1:1080".parse().unwrap(),
            server,
        );
        (client, session)
    }

    async fn greet(client: &mut DuplexStream) {
        client
            .write_all(&[SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_NONE])
            .await
            .unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NONE]);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::AwaitHandshake.to_string(), "AWAIT_HANDSHAKE");
        assert_eq!(
            SessionState::Dispatched(SocksCommand::Connect).to_string(),
            "DISPATCHED(CONNECT)"
        );
    }

    #[tokio::test]
    async fn test_connect_direct_relays() {
        let echo = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = echo.accept().await.unwrap();
            let (mut r, mut w) = stream.split();
            let _ = tokio::io::copy(&mut r, &mut w).await;
        });

        let recorder = Arc::new(Recorder::default());
        let handler = Socks5Handler::new().with_listener(recorder.clone());
        let (mut client, session) = session_pair();
        let task = tokio::spawn(async move { handler.run(session).await });

        greet(&mut client).await;
        client
            .write_all(&CommandMessage::new(SocksCommand::Connect, echo_addr.into()).to_bytes())
            .await
            .unwrap();
        let response = read_command_response(&mut client).await.unwrap();
        assert!(response.is_success());
        assert_ne!(response.bound.port(), 0);

        client.write_all(b"round trip").await.unwrap();
        let mut buf = [0u8; 10];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"round trip");

        drop(client);
        task.await.unwrap();
        assert_eq!(recorder.events(), vec!["command 1", "close"]);
    }

    #[tokio::test]
    async fn test_connect_refused_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_addr = listener.local_addr().unwrap();
        drop(listener);

        let (mut client, session) = session_pair();
        let task = tokio::spawn(async move { Socks5Handler::new().run(session).await });

        greet(&mut client).await;
        client
            .write_all(&CommandMessage::new(SocksCommand::Connect, closed_addr.into()).to_bytes())
            .await
            .unwrap();
        let response = read_command_response(&mut client).await.unwrap();
        assert_eq!(response.code(), Some(Socks5ReplyCode::ConnectionRefused));
        assert_eq!(response.bound, TargetAddr::default());

        task.await.unwrap();
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_bad_handshake_version_closes() {
        let recorder = Arc::new(Recorder::default());
        let handler = Socks5Handler::new().with_listener(recorder.clone());
        let (mut client, session) = session_pair();
        let task = tokio::spawn(async move { handler.run(session).await });

        client
            .write_all(&[0x04, 1, SOCKS5_AUTH_METHOD_NONE])
            .await
            .unwrap();
        task.await.unwrap();

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert_eq!(recorder.events(), vec!["exception", "close"]);
    }

    #[tokio::test]
    async fn test_bad_address_type_reply() {
        let recorder = Arc::new(Recorder::default());
        let handler = Socks5Handler::new().with_listener(recorder.clone());
        let (mut client, session) = session_pair();
        let task = tokio::spawn(async move { handler.run(session).await });

        greet(&mut client).await;
        client
            .write_all(&[SOCKS5_VERSION, SOCKS5_CMD_TCP_CONNECT, SOCKS5_RESERVED, 0x09])
            .await
            .unwrap();
        let response = read_command_response(&mut client).await.unwrap();
        assert_eq!(
            response.code(),
            Some(Socks5ReplyCode::AddressTypeNotSupported)
        );
        task.await.unwrap();

        // A request that failed to decode never reaches the command hook
        assert_eq!(recorder.events(), vec!["close"]);
    }

    #[tokio::test]
    async fn test_disabled_udp_not_supported() {
        let handler = Socks5Handler::new().with_allow_udp(false);
        let (mut client, session) = session_pair();
        let task = tokio::spawn(async move { handler.run(session).await });

        greet(&mut client).await;
        client
            .write_all(
                &CommandMessage::new(SocksCommand::UdpAssociate, TargetAddr::default()).to_bytes(),
            )
            .await
            .unwrap();
        let response = read_command_response(&mut client).await.unwrap();
        assert_eq!(response.code(), Some(Socks5ReplyCode::CommandNotSupported));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_password_required() {
        let handler = Socks5Handler::new()
            .with_method_selector(Arc::new(ConfiguredMethodSelector::new(true, true)))
            .with_verifier(Arc::new(StaticCredentials::new("alice", "secret")));
        let (mut client, session) = session_pair();
        let task = tokio::spawn(async move { handler.run(session).await });

        client
            .write_all(&[SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_NONE])
            .await
            .unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE]);

        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_two_replies() {
        let (mut client, session) = session_pair();
        let task = tokio::spawn(async move { Socks5Handler::new().run(session).await });

        greet(&mut client).await;
        client
            .write_all(
                &CommandMessage::new(SocksCommand::Bind, TargetAddr::ipv4(Ipv4Addr::UNSPECIFIED, 0))
                    .to_bytes(),
            )
            .await
            .unwrap();

        let first = read_command_response(&mut client).await.unwrap();
        assert!(first.is_success());
        let listen_addr = first.bound.resolve().await.unwrap();

        let mut peer = TcpStream::connect(listen_addr).await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let second = read_command_response(&mut client).await.unwrap();
        assert!(second.is_success());
        assert_eq!(second.bound, TargetAddr::from(peer_addr));

        peer.write_all(b"inbound").await.unwrap();
        let mut buf = [0u8; 7];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"inbound");

        drop(client);
        drop(peer);
        task.await.unwrap();
    }

    async fn request_bind(client: &mut DuplexStream) -> SocketAddr {
        greet(client).await;
        client
            .write_all(
                &CommandMessage::new(SocksCommand::Bind, TargetAddr::ipv4(Ipv4Addr::UNSPECIFIED, 0))
                    .to_bytes(),
            )
            .await
            .unwrap();
        let first = read_command_response(client).await.unwrap();
        assert!(first.is_success());
        first.bound.resolve().await.unwrap()
    }

    #[tokio::test]
    async fn test_bind_waits_past_connect_timeout() {
        let handler =
            Socks5Handler::new().with_connect_timeout(Some(Duration::from_millis(50)));
        let (mut client, session) = session_pair();
        let task = tokio::spawn(async move { handler.run(session).await });

        let listen_addr = request_bind(&mut client).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        let peer = TcpStream::connect(listen_addr).await.unwrap();

        let second = read_command_response(&mut client).await.unwrap();
        assert!(second.is_success());
        assert_eq!(second.bound, TargetAddr::from(peer.local_addr().unwrap()));

        drop(client);
        drop(peer);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_timeout_expires() {
        let handler = Socks5Handler::new().with_bind_timeout(Some(Duration::from_millis(50)));
        let (mut client, session) = session_pair();
        let task = tokio::spawn(async move { handler.run(session).await });

        request_bind(&mut client).await;
        let second = read_command_response(&mut client).await.unwrap();
        assert_eq!(second.code(), Some(Socks5ReplyCode::TtlExpired));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_udp_associate_lives_with_control_stream() {
        let (mut client, session) = session_pair();
        let task = tokio::spawn(async move { Socks5Handler::new().run(session).await });

        greet(&mut client).await;
        client
            .write_all(
                &CommandMessage::new(SocksCommand::UdpAssociate, TargetAddr::default()).to_bytes(),
            )
            .await
            .unwrap();
        let response = read_command_response(&mut client).await.unwrap();
        assert!(response.is_success());
        let relay_addr = response.bound.resolve().await.unwrap();

        let target = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let udp_client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let packet = crate::socks::udp::UdpPacket::new(
            target.local_addr().unwrap().into(),
            bytes::Bytes::from_static(b"dns?"),
        );
        udp_client
            .send_to(&crate::socks::udp::encode_udp_packet(&packet), relay_addr)
            .await
            .unwrap();
        let mut buf = [0u8; 64];
        let (n, _) = target.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"dns?");

        drop(client);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_external_close_aborts_session() {
        let recorder = Arc::new(Recorder::default());
        let handler = Socks5Handler::new().with_listener(recorder.clone());
        let (_client, session) = session_pair();
        let handle = session.handle();
        let task = tokio::spawn(async move { handler.run(session).await });

        // Stuck waiting for the handshake
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.close();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(recorder.events(), vec!["close"]);
    }
}
