//! Registry of the live sessions of one WebSocket service.

use super::codec::Message;
use super::error::{WebSocketError, WebSocketResult};
use super::frame::CloseCode;
use super::session::{SessionHandle, SessionState};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Tracks sessions by id.
///
/// Adds and removes may race with broadcasts and with [`stop`](Self::stop);
/// the map is sharded and every operation works on a snapshot of handles.
#[derive(Debug)]
pub struct SessionManager {
    sessions: DashMap<String, SessionHandle>,
    wait_time: Duration,
    stopped: AtomicBool,
}

impl SessionManager {
    /// Create a manager whose sessions time out after `wait_time` idle.
    #[must_use]
    pub fn new(wait_time: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            wait_time,
            stopped: AtomicBool::new(false),
        }
    }

    /// Idle timeout applied to each session's reads.
    #[must_use]
    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    /// Register a session and assign it a fresh id.
    ///
    /// Returns `None` once the manager is stopped; the caller must then
    /// close the session with [`CloseCode::GoingAway`].
    pub fn add(&self, session: &SessionHandle) -> Option<String> {
        if self.is_stopped() {
            return None;
        }

        let id = Uuid::new_v4().simple().to_string();
        if !session.assign_id(id.clone()) {
            return None;
        }
        self.sessions.insert(id.clone(), session.clone());

        // A stop that ran between the check and the insert missed this one.
        if self.is_stopped() {
            self.sessions.remove(&id);
            return None;
        }

        debug!(session = %id, path = %session.path(), "Session registered");
        Some(id)
    }

    /// Forget a session. Removing an unknown id is a no-op.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            debug!(session = %id, "Session removed");
        }
        removed
    }

    /// Look up a session.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Ids of the registered sessions.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Handles of the registered sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Send a message to every open session. Returns how many accepted it.
    pub fn broadcast(&self, message: &Message) -> usize {
        self.sessions()
            .iter()
            .filter(|session| session.state() == SessionState::Open)
            .filter(|session| session.send(message).is_ok())
            .count()
    }

    /// Broadcast a text message.
    pub fn broadcast_text(&self, text: impl Into<String>) -> usize {
        self.broadcast(&Message::Text(text.into()))
    }

    /// Broadcast a binary message.
    pub fn broadcast_binary(&self, data: impl Into<Bytes>) -> usize {
        self.broadcast(&Message::Binary(data.into()))
    }

    /// Close one session.
    ///
    /// # Errors
    ///
    /// Returns [`WebSocketError::ConnectionClosed`] for an unknown id, or
    /// the close error for an invalid code or reason.
    pub fn close_session(&self, id: &str, code: CloseCode, reason: &str) -> WebSocketResult<()> {
        self.get(id)
            .ok_or(WebSocketError::ConnectionClosed)?
            .close(code, reason)
    }

    /// Refuse further sessions and close every registered one.
    pub fn stop(&self, code: CloseCode, reason: &str) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let sessions = self.sessions();
        info!(sessions = sessions.len(), code = %code, "Stopping session manager");
        for session in sessions {
            if session.close(code, reason).is_err() {
                session.fail(CloseCode::GoingAway);
            }
        }
    }

    /// Returns `true` after [`stop`](Self::stop).
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::websocket_handler::codec::EncodeOptions;
    use crate::modules::websocket_handler::session::Outbound;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn open_session() -> (SessionHandle, UnboundedReceiver<Outbound>) {
        let (session, rx) = SessionHandle::new(
            "/chat",
            "127.0.0.1:9000".parse().unwrap(),
            None,
            EncodeOptions::default(),
        );
        session.set_state(SessionState::Open);
        (session, rx)
    }

    #[test]
    fn test_add_assigns_id() {
        let manager = SessionManager::new(Duration::from_secs(5));
        let (session, _rx) = open_session();

        let id = manager.add(&session).unwrap();
        assert_eq!(session.id(), id);
        assert_eq!(id.len(), 32);
        assert_eq!(manager.count(), 1);
        assert_eq!(manager.ids(), vec![id.clone()]);
        assert!(manager.get(&id).is_some());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let manager = SessionManager::new(Duration::from_secs(5));
        let (session, _rx) = open_session();
        let id = manager.add(&session).unwrap();

        assert!(manager.remove(&id));
        assert!(!manager.remove(&id));
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn test_add_after_stop() {
        let manager = SessionManager::new(Duration::from_secs(5));
        manager.stop(CloseCode::GoingAway, "");

        let (session, _rx) = open_session();
        assert!(manager.add(&session).is_none());
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn test_stop_closes_sessions() {
        let manager = SessionManager::new(Duration::from_secs(5));
        let (first, mut first_rx) = open_session();
        let (second, _second_rx) = open_session();
        manager.add(&first).unwrap();
        manager.add(&second).unwrap();

        manager.stop(CloseCode::GoingAway, "bye");
        assert!(manager.is_stopped());
        assert_eq!(first.state(), SessionState::Closing);
        assert_eq!(second.state(), SessionState::Closing);
        assert!(matches!(first_rx.try_recv(), Ok(Outbound::Frames(_))));
    }

    #[test]
    fn test_broadcast_skips_closing() {
        let manager = SessionManager::new(Duration::from_secs(5));
        let (open, mut open_rx) = open_session();
        let (closing, _closing_rx) = open_session();
        manager.add(&open).unwrap();
        manager.add(&closing).unwrap();
        closing.close(CloseCode::Normal, "").unwrap();

        assert_eq!(manager.broadcast_text("hi"), 1);
        assert!(matches!(open_rx.try_recv(), Ok(Outbound::Frames(_))));
    }

    #[test]
    fn test_close_session_unknown() {
        let manager = SessionManager::new(Duration::from_secs(5));
        assert!(matches!(
            manager.close_session("missing", CloseCode::Normal, ""),
            Err(WebSocketError::ConnectionClosed)
        ));
    }
}
