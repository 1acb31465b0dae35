//! Session lifecycle hooks and the active-session set

use super::session::{Session, SessionHandle};
use crate::socks::command::CommandMessage;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Observer of session lifecycle events
///
/// Every hook has an empty default. `on_close` is called exactly once per
/// session that reached a handler.
pub trait SessionListener: Send + Sync + fmt::Debug {
    /// A connection was accepted
    fn on_create(&self, _session: &Session) {}

    /// A command was read from the client
    fn on_command(&self, _session: &Session, _command: &CommandMessage) {}

    /// The handler failed
    fn on_exception(&self, _session: &Session, _error: &anyhow::Error) {}

    /// The session was closed
    fn on_close(&self, _session: &Session) {}
}

/// Logs every hook and tracks active sessions so they can be closed together
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<u64, SessionHandle>>,
}

impl SessionManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions created and not yet closed
    pub fn active_count(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Close every active session, returning how many were signalled
    pub fn close_all(&self) -> usize {
        let handles: Vec<SessionHandle> = match self.sessions.lock() {
            Ok(sessions) => sessions.values().cloned().collect(),
            Err(_) => return 0,
        };

        handles.iter().filter(|handle| handle.close()).count()
    }
}

impl SessionListener for SessionManager {
    fn on_create(&self, session: &Session) {
        info!(
            "SESSION[{}] created for {}",
            session.id(),
            session.client_addr()
        );
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(session.id(), session.handle());
        }
    }

    fn on_command(&self, session: &Session, command: &CommandMessage) {
        match command.command() {
            Some(cmd) => info!("SESSION[{}] {} {}", session.id(), cmd, command.target),
            None => debug!(
                "SESSION[{}] unknown command 0x{:02x}",
                session.id(),
                command.command_byte
            ),
        }
    }

    fn on_exception(&self, session: &Session, error: &anyhow::Error) {
        warn!("SESSION[{}] error: {:#}", session.id(), error);
    }

    fn on_close(&self, session: &Session) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&session.id());
        }
        debug!("SESSION[{}] closed", session.id());
    }
}
