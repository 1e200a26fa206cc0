//! Session lifecycle and per-session state.
//!
//! A session is born Uninitialized on first contact, moves to Initializing
//! when a well-formed `initialize` arrives, to Ready on
//! `notifications/initialized`, and to Closed exactly once. Capabilities and
//! protocol version are recorded during the handshake and immutable
//! afterwards. Each session also carries its own pending-request table for
//! server-initiated calls (sampling, roots), so teardown can fail them all.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use conduit_json_rpc::PendingRequests;
use conduit_protocol::{ClientCapabilities, Implementation, McpError, ProtocolVersion};
use conduit_transport::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// Everything the server tracks about one connection.
pub struct Session {
    pub id: SessionId,
    pub state: SessionState,
    pub client_info: Option<Implementation>,
    pub client_capabilities: Option<ClientCapabilities>,
    pub protocol_version: Option<ProtocolVersion>,
    /// Resource URIs this session asked to watch.
    pub subscriptions: HashSet<String>,
    /// Outstanding server-to-client calls on this session.
    pub pending: Arc<PendingRequests>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: SessionState::Uninitialized,
            client_info: None,
            client_capabilities: None,
            protocol_version: None,
            subscriptions: HashSet::new(),
            pending: Arc::new(PendingRequests::new()),
            created_at: now,
            last_activity: now,
        }
    }
}

/// Shared session table. Critical sections are short and never span an
/// await; the pending table is handed out as an Arc instead.
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a session, creating it Uninitialized on first contact.
    pub fn ensure(&self, session_id: &SessionId) {
        let mut sessions = self.sessions.write();
        if !sessions.contains_key(session_id) {
            debug!(session_id = %session_id, "new session");
            sessions.insert(session_id.clone(), Session::new(session_id.clone()));
        } else if let Some(session) = sessions.get_mut(session_id) {
            session.last_activity = Utc::now();
        }
    }

    pub fn state(&self, session_id: &SessionId) -> Option<SessionState> {
        self.sessions.read().get(session_id).map(|s| s.state)
    }

    /// Record the handshake parameters and move to Initializing. Valid only
    /// from Uninitialized; a second `initialize` is a session error.
    pub fn begin_initializing(
        &self,
        session_id: &SessionId,
        version: ProtocolVersion,
        capabilities: ClientCapabilities,
        client_info: Implementation,
    ) -> Result<(), McpError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| McpError::Session(format!("unknown session {}", session_id)))?;
        if session.state != SessionState::Uninitialized {
            return Err(McpError::Session("session already initialized".to_string()));
        }
        session.state = SessionState::Initializing;
        session.protocol_version = Some(version);
        session.client_capabilities = Some(capabilities);
        session.client_info = Some(client_info);
        session.last_activity = Utc::now();
        Ok(())
    }

    /// Move Initializing to Ready. Returns false when the notification
    /// arrived out of order; the caller logs and ignores it.
    pub fn mark_ready(&self, session_id: &SessionId) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(session_id) {
            Some(session) if session.state == SessionState::Initializing => {
                session.state = SessionState::Ready;
                session.last_activity = Utc::now();
                info!(
                    session_id = %session_id,
                    client = session.client_info.as_ref().map(|c| c.name.as_str()).unwrap_or("?"),
                    "session ready"
                );
                true
            }
            _ => false,
        }
    }

    pub fn client_capabilities(&self, session_id: &SessionId) -> Option<ClientCapabilities> {
        self.sessions
            .read()
            .get(session_id)
            .and_then(|s| s.client_capabilities.clone())
    }

    pub fn subscribe(&self, session_id: &SessionId, uri: &str) -> bool {
        self.sessions
            .write()
            .get_mut(session_id)
            .map(|s| s.subscriptions.insert(uri.to_string()))
            .unwrap_or(false)
    }

    pub fn unsubscribe(&self, session_id: &SessionId, uri: &str) -> bool {
        self.sessions
            .write()
            .get_mut(session_id)
            .map(|s| s.subscriptions.remove(uri))
            .unwrap_or(false)
    }

    /// Ready sessions currently subscribed to `uri`.
    pub fn subscribers_of(&self, uri: &str) -> Vec<SessionId> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.state == SessionState::Ready && s.subscriptions.contains(uri))
            .map(|s| s.id.clone())
            .collect()
    }

    /// All sessions eligible for broadcast notifications.
    pub fn ready_sessions(&self) -> Vec<SessionId> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.state == SessionState::Ready)
            .map(|s| s.id.clone())
            .collect()
    }

    /// The per-session table for server-initiated calls.
    pub fn pending_for(&self, session_id: &SessionId) -> Option<Arc<PendingRequests>> {
        self.sessions
            .read()
            .get(session_id)
            .map(|s| s.pending.clone())
    }

    /// Tear one session down: fail its outstanding server-to-client calls,
    /// drop its subscriptions, forget it. Idempotent.
    pub fn close(&self, session_id: &SessionId) {
        let removed = self.sessions.write().remove(session_id);
        if let Some(session) = removed {
            session.pending.close();
            info!(
                session_id = %session_id,
                subscriptions = session.subscriptions.len(),
                "session closed"
            );
        }
    }

    /// Tear every session down (server shutdown).
    pub fn close_all(&self) {
        let drained: Vec<Session> = {
            let mut sessions = self.sessions.write();
            sessions.drain().map(|(_, s)| s).collect()
        };
        for session in &drained {
            session.pending.close();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "all sessions closed");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake(manager: &SessionManager, id: &SessionId) {
        manager.ensure(id);
        manager
            .begin_initializing(
                id,
                ProtocolVersion::CURRENT,
                ClientCapabilities::default(),
                Implementation::new("c", "1"),
            )
            .unwrap();
        assert!(manager.mark_ready(id));
    }

    #[test]
    fn test_lifecycle_order_is_enforced() {
        let manager = SessionManager::new();
        let id = "s1".to_string();

        // initialized before initialize is ignored.
        manager.ensure(&id);
        assert!(!manager.mark_ready(&id));
        assert_eq!(manager.state(&id), Some(SessionState::Uninitialized));

        handshake(&manager, &id);
        assert_eq!(manager.state(&id), Some(SessionState::Ready));

        // A second initialize on the same session is rejected.
        let err = manager.begin_initializing(
            &id,
            ProtocolVersion::CURRENT,
            ClientCapabilities::default(),
            Implementation::new("c", "1"),
        );
        assert!(matches!(err, Err(McpError::Session(_))));
    }

    #[test]
    fn test_subscriptions_are_per_session() {
        let manager = SessionManager::new();
        let a = "a".to_string();
        let b = "b".to_string();
        handshake(&manager, &a);
        handshake(&manager, &b);

        assert!(manager.subscribe(&a, "file:///x"));
        let subs = manager.subscribers_of("file:///x");
        assert_eq!(subs, vec![a.clone()]);

        assert!(manager.unsubscribe(&a, "file:///x"));
        assert!(manager.subscribers_of("file:///x").is_empty());
        assert_eq!(manager.ready_sessions().len(), 2);
    }

    #[tokio::test]
    async fn test_close_fails_server_initiated_calls() {
        let manager = SessionManager::new();
        let id = "s1".to_string();
        handshake(&manager, &id);

        let pending = manager.pending_for(&id).unwrap();
        let (_call_id, rx) = pending.register();

        manager.close(&id);
        manager.close(&id); // idempotent

        assert!(rx.await.is_err());
        assert!(manager.state(&id).is_none());
    }
}
