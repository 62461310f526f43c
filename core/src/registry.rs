//! Process-wide registry of tracked forwarding sessions.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::session::{PortForwardSession, SessionState};

/// Tracks forwarding sessions by backend-assigned id.
///
/// Sessions are appended on a successful start and removed on close.
/// Invariant: no two Active sessions share the same local port.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, PortForwardSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a session, refusing an Active session whose local port is
    /// already held by another tracked Active session.
    pub fn insert(&self, session: PortForwardSession) -> Result<()> {
        let mut sessions = self.sessions.write();

        if session.state == SessionState::Active {
            let collision = sessions.values().any(|s| {
                s.id != session.id
                    && s.state == SessionState::Active
                    && s.local_port == session.local_port
            });
            if collision {
                return Err(Error::Validation(format!(
                    "local port {} is already forwarded by another active session",
                    session.local_port
                )));
            }
        }

        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    /// Removes a session by id, returning it if it was tracked.
    pub fn remove(&self, id: &str) -> Option<PortForwardSession> {
        self.sessions.write().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<PortForwardSession> {
        self.sessions.read().get(id).cloned()
    }

    /// All tracked sessions, oldest first.
    pub fn all(&self) -> Vec<PortForwardSession> {
        let mut sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// True when an Active session already holds `port` locally.
    pub fn active_local_port_in_use(&self, port: u16) -> bool {
        self.sessions
            .read()
            .values()
            .any(|s| s.state == SessionState::Active && s.local_port == port)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn session(id: &str, local_port: u16, state: SessionState) -> PortForwardSession {
        PortForwardSession {
            id: id.to_string(),
            cluster: "prod".to_string(),
            namespace: "default".to_string(),
            pod_name: "p1".to_string(),
            service_name: "web".to_string(),
            target_port: "8080".to_string(),
            local_port,
            state,
            created_at: Utc::now(),
            error_message: None,
        }
    }

    #[test]
    fn test_insert_and_remove() {
        let registry = SessionRegistry::new();
        assert!(registry.is_empty());

        registry
            .insert(session("a", 3000, SessionState::Active))
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").unwrap().local_port, 3000);

        let removed = registry.remove("a").unwrap();
        assert_eq!(removed.id, "a");
        assert!(registry.is_empty());
        assert!(registry.remove("a").is_none());
    }

    #[test]
    fn test_no_two_active_sessions_share_a_local_port() {
        let registry = SessionRegistry::new();
        registry
            .insert(session("a", 3000, SessionState::Active))
            .unwrap();

        let result = registry.insert(session("b", 3000, SessionState::Active));
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(registry.len(), 1);

        // A closed session on the same port does not collide.
        registry
            .insert(session("c", 3000, SessionState::Closed))
            .unwrap();
        // Nor does an active session on a different port.
        registry
            .insert(session("d", 3001, SessionState::Active))
            .unwrap();
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_reinserting_same_id_updates_in_place() {
        let registry = SessionRegistry::new();
        registry
            .insert(session("a", 3000, SessionState::Active))
            .unwrap();

        // Same id, same port: an update, not a collision.
        registry
            .insert(session("a", 3000, SessionState::Active))
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_active_local_port_in_use() {
        let registry = SessionRegistry::new();
        registry
            .insert(session("a", 3000, SessionState::Active))
            .unwrap();
        registry
            .insert(session("b", 3001, SessionState::Closed))
            .unwrap();

        assert!(registry.active_local_port_in_use(3000));
        assert!(!registry.active_local_port_in_use(3001));
        assert!(!registry.active_local_port_in_use(4000));
    }
}
