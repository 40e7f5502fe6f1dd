//! The session registry.
//!
//! A mutex-guarded map from session ID to [`Session`]. Lookups hand out
//! clones; mutations go through named operations so the lock is never held
//! across an await point.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};

use hermes_core::SessionSnapshot;

use crate::session::{Session, SessionStatus};

/// Registry of live sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a session by ID.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.lock().get(session_id).cloned()
    }

    /// Returns an existing session or creates a fresh one.
    ///
    /// A request naming an unknown session ID gets a new session under a
    /// generated ID; callers must tolerate that after an idle eviction.
    pub fn get_or_create(
        &self,
        session_id: Option<&str>,
        conversation_id: Option<&str>,
        model: Option<&str>,
    ) -> Session {
        let mut sessions = self.sessions.lock();

        if let Some(id) = session_id.filter(|id| !id.is_empty()) {
            if let Some(session) = sessions.get(id) {
                return session.clone();
            }
        }

        let session = Session::new(session_id, conversation_id, model);
        debug!(session_id = %session.session_id, "session created");
        sessions.insert(session.session_id.clone(), session.clone());
        session
    }

    /// Merges string context values into a session.
    pub fn merge_context(&self, session_id: &str, entries: &HashMap<String, serde_json::Value>) {
        if entries.is_empty() {
            return;
        }
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(session_id) {
            for (key, value) in entries {
                if let Some(text) = value.as_str() {
                    session.context.insert(key.clone(), text.to_string());
                }
            }
        }
    }

    /// Records a successful forward: refreshes activity and mirrors the
    /// backend's status.
    pub fn record_forward(&self, session_id: &str, backend_status: &str) {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(session_id) {
            session.touch();
            if let Some(status) = SessionStatus::parse(backend_status) {
                session.status = status;
            }
        }
    }

    /// Removes a session. Returns whether it existed; deleting twice is a
    /// no-op.
    pub fn delete(&self, session_id: &str) -> bool {
        self.sessions.lock().remove(session_id).is_some()
    }

    /// Evicts sessions idle longer than the threshold, judged at the
    /// moment of the decision. Returns how many were removed.
    pub fn evict_idle(&self, threshold: std::time::Duration) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_idle(threshold, now));
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(count = evicted, "evicted idle sessions");
        }
        evicted
    }

    /// Returns the number of live sessions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Produces the context snapshot for a session, if it exists.
    #[must_use]
    pub fn snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.sessions.lock().get(session_id).map(Session::snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    #[test]
    fn get_or_create_reuses_existing() {
        let registry = SessionRegistry::new();
        let first = registry.get_or_create(Some("s-1"), None, None);
        let second = registry.get_or_create(Some("s-1"), None, None);

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn unknown_id_creates_fresh_session() {
        let registry = SessionRegistry::new();
        let session = registry.get_or_create(Some("never-seen"), None, None);
        // The requested ID is honored for creation.
        assert_eq!(session.session_id, "never-seen");
        assert!(registry.get("never-seen").is_some());
    }

    #[test]
    fn omitted_id_generates_one() {
        let registry = SessionRegistry::new();
        let session = registry.get_or_create(None, None, None);
        assert!(session.session_id.starts_with("sess_"));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn merge_context_keeps_string_values_only() {
        let registry = SessionRegistry::new();
        let session = registry.get_or_create(Some("s-1"), None, None);

        let mut entries = HashMap::new();
        entries.insert("cwd".to_string(), serde_json::json!("/srv"));
        entries.insert("depth".to_string(), serde_json::json!(3));
        registry.merge_context(&session.session_id, &entries);

        let session = registry.get("s-1").unwrap();
        assert_eq!(session.context.get("cwd").map(String::as_str), Some("/srv"));
        assert!(!session.context.contains_key("depth"));
    }

    #[test]
    fn record_forward_touches_and_mirrors_status() {
        let registry = SessionRegistry::new();
        let session = registry.get_or_create(Some("s-1"), None, None);
        let before = session.last_activity;

        registry.record_forward("s-1", "ended");

        let session = registry.get("s-1").unwrap();
        assert!(session.last_activity >= before);
        assert_eq!(session.status, SessionStatus::Ended);

        // Unknown backend statuses leave the stored status alone.
        registry.record_forward("s-1", "strange");
        assert_eq!(registry.get("s-1").unwrap().status, SessionStatus::Ended);
    }

    #[test]
    fn delete_is_idempotent() {
        let registry = SessionRegistry::new();
        registry.get_or_create(Some("s-1"), None, None);

        assert!(registry.delete("s-1"));
        assert!(!registry.delete("s-1"));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn evict_idle_spares_recent_sessions() {
        let registry = SessionRegistry::new();
        registry.get_or_create(Some("fresh"), None, None);
        registry.get_or_create(Some("stale"), None, None);

        {
            let mut sessions = registry.sessions.lock();
            sessions.get_mut("stale").unwrap().last_activity =
                Utc::now() - ChronoDuration::seconds(3600);
        }

        let evicted = registry.evict_idle(Duration::from_secs(1800));
        assert_eq!(evicted, 1);
        assert!(registry.get("fresh").is_some());
        assert!(registry.get("stale").is_none());
    }

    #[test]
    fn snapshot_for_unknown_session_is_none() {
        let registry = SessionRegistry::new();
        assert!(registry.snapshot("ghost").is_none());

        registry.get_or_create(Some("s-1"), None, Some("claude-3-opus"));
        let snapshot = registry.snapshot("s-1").unwrap();
        assert_eq!(snapshot.model, "claude-3-opus");
    }
}
