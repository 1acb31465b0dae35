//! One accepted client connection

use crate::helper::CloseSignal;
use crate::transport::{BoxedStream, StreamDyn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;

/// An accepted client connection and its identity
///
/// The stream is handed to exactly one handler through [`Session::take_stream`].
/// Closing is idempotent; a closed session never hands out its stream.
#[derive(Debug)]
pub struct Session {
    id: u64,
    client_addr: SocketAddr,
    server_addr: SocketAddr,
    stream: Option<BoxedStream>,
    closed: Arc<CloseSignal>,
}

impl Session {
    /// Wrap an already accepted stream
    pub fn new<S>(id: u64, client_addr: SocketAddr, server_addr: SocketAddr, stream: S) -> Self
    where
        S: StreamDyn + 'static,
    {
        Session {
            id,
            client_addr,
            server_addr,
            stream: Some(Box::new(stream)),
            closed: Arc::new(CloseSignal::new()),
        }
    }

    /// Wrap an accepted TCP connection, taking both addresses from the socket
    pub fn from_tcp(id: u64, stream: TcpStream) -> io::Result<Self> {
        let client_addr = stream.peer_addr()?;
        let server_addr = stream.local_addr()?;
        Ok(Self::new(id, client_addr, server_addr, stream))
    }

    /// Session id, unique for the server's lifetime
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Address of the SOCKS client
    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Local address the client connected to
    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Take the client stream; `None` once taken or closed
    pub fn take_stream(&mut self) -> Option<BoxedStream> {
        if self.is_closed() {
            return None;
        }
        self.stream.take()
    }

    /// A cloneable handle that can close this session from elsewhere
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            client_addr: self.client_addr,
            closed: self.closed.clone(),
        }
    }

    /// Close the session, returning `true` on the first call
    pub fn close(&mut self) -> bool {
        self.stream = None;
        self.closed.trigger()
    }

    /// Whether the session has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.is_triggered()
    }

    /// Wait until the session is closed
    pub async fn closed(&self) {
        self.closed.wait().await
    }

    pub(crate) fn close_signal(&self) -> Arc<CloseSignal> {
        self.closed.clone()
    }
}

/// Remote control for a [`Session`]
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: u64,
    client_addr: SocketAddr,
    closed: Arc<CloseSignal>,
}

impl SessionHandle {
    /// Id of the session
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Address of the SOCKS client
    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Ask the session to close; the handler tears it down
    pub fn close(&self) -> bool {
        self.closed.trigger()
    }

    /// Whether the session has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.is_triggered()
    }
}
