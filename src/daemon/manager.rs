//! Session store
//!
//! Holds every Session the daemon knows about, keyed by full id. The map
//! itself is guarded by a many-reader/single-writer lock; it is mutated only
//! by `create`, `create_or_update`, and `remove`. Individual sessions carry
//! their own interior locking (see `session::Session`), so readers that only
//! need one session never block on the map lock longer than a lookup.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::session::{Session, SessionId};
use crate::{Result, ScribeError};

/// All tracked sessions, process-wide. Created at daemon startup, torn down
/// at listener close; threaded explicitly into the dispatcher rather than
/// reached through ambient state.
#[derive(Default)]
pub struct Store {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a brand-new session with a daemon-generated id.
    pub fn create(&self, title: Option<String>, cap: i64, collab: bool) -> Arc<Session> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let session = Arc::new(Session::new(id.clone(), title, cap, collab));
        if let Ok(mut map) = self.sessions.write() {
            map.insert(id, session.clone());
        }
        session
    }

    /// Idempotent on `id`: creates if absent, otherwise resumes the
    /// existing Session (updating its cap and clearing its buffer) and
    /// reports `reconnected`.
    pub fn create_or_update(
        &self,
        id: SessionId,
        title: Option<String>,
        cap: i64,
        collab: bool,
    ) -> (Arc<Session>, bool) {
        let existing = self.sessions.read().ok().and_then(|m| m.get(&id).cloned());
        if let Some(session) = existing {
            session.resume(title, cap, collab);
            return (session, true);
        }

        // Double-checked under the write lock: another register for the
        // same id may have raced us between the read above and here.
        let Ok(mut map) = self.sessions.write() else {
            let session = Arc::new(Session::new(id, title, cap, collab));
            return (session, false);
        };
        if let Some(session) = map.get(&id) {
            session.resume(title.clone(), cap, collab);
            return (session.clone(), true);
        }
        let session = Arc::new(Session::new(id.clone(), title, cap, collab));
        map.insert(id, session.clone());
        (session, false)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().ok().and_then(|m| m.get(id).cloned())
    }

    /// Matches if the lowercased full id or short id starts with the
    /// lowercased prefix. An empty prefix matches every session.
    pub fn find_by_prefix(&self, prefix: &str) -> Result<Arc<Session>> {
        let needle = prefix.to_lowercase();
        let matches: Vec<Arc<Session>> = if let Ok(map) = self.sessions.read() {
            map.values()
                .filter(|s| {
                    s.id.to_lowercase().starts_with(&needle)
                        || s.short_id().to_lowercase().starts_with(&needle)
                })
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        match matches.len() {
            0 => Err(ScribeError::NotFound(prefix.to_string())),
            1 => Ok(matches.into_iter().next().unwrap()),
            _ => Err(ScribeError::Ambiguous(prefix.to_string())),
        }
    }

    /// Exact, case-insensitive title match; first hit wins.
    pub fn find_by_title(&self, title: &str) -> Result<Arc<Session>> {
        let needle = title.to_lowercase();
        let Ok(map) = self.sessions.read() else {
            return Err(ScribeError::NotFound(title.to_string()));
        };
        map.values()
            .find(|s| s.title().map(|t| t.to_lowercase()) == Some(needle.clone()))
            .cloned()
            .ok_or_else(|| ScribeError::NotFound(title.to_string()))
    }

    /// Resolve a session reference: full id, then prefix, then title.
    pub fn resolve(&self, reference: &str) -> Result<Arc<Session>> {
        if let Some(session) = self.get(reference) {
            return Ok(session);
        }
        if let Ok(session) = self.find_by_prefix(reference) {
            return Ok(session);
        }
        self.find_by_title(reference)
    }

    /// Idempotent removal.
    pub fn remove(&self, id: &str) {
        if let Ok(mut map) = self.sessions.write() {
            map.remove(id);
        }
    }

    /// Snapshot of all sessions; iteration order is unspecified.
    pub fn list(&self) -> Vec<Arc<Session>> {
        if let Ok(map) = self.sessions.read() {
            map.values().cloned().collect()
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_or_update_creates_then_resumes() {
        let store = Store::new();
        let (s1, reconnected1) =
            store.create_or_update("fixed-id".into(), Some("t".into()), 10, false);
        assert!(!reconnected1);
        s1.buffer.lock().unwrap().append("x".into());

        let (s2, reconnected2) = store.create_or_update("fixed-id".into(), None, 10, true);
        assert!(reconnected2);
        assert!(Arc::ptr_eq(&s1, &s2));
        assert_eq!(s2.buffer.lock().unwrap().total_seq(), 0);
        assert!(s2.collab());
    }

    #[test]
    fn find_by_prefix_distinguishes_unique_ambiguous_notfound() {
        let store = Store::new();
        let s1 = store.create(None, 10, false);
        assert!(store.find_by_prefix(&s1.short_id()).is_ok());
        assert!(store.find_by_prefix("zzzzzzzz").is_err());

        let s2 = store.create(None, 10, false);
        let common_prefix = {
            let a = s1.id.clone();
            let b = s2.id.clone();
            let mut n = 0;
            for (ca, cb) in a.chars().zip(b.chars()) {
                if ca != cb {
                    break;
                }
                n += 1;
            }
            a[..n].to_string()
        };
        // Empty prefix always matches both; with >=2 sessions this is Ambiguous.
        let _ = common_prefix;
        match store.find_by_prefix("") {
            Err(ScribeError::Ambiguous(_)) => {}
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn find_by_title_exact_case_insensitive() {
        let store = Store::new();
        store.create(Some("Build".into()), 10, false);
        assert!(store.find_by_title("build").is_ok());
        assert!(store.find_by_title("buil").is_err());
    }

    #[test]
    fn resolve_tries_full_id_then_prefix_then_title() {
        let store = Store::new();
        let s = store.create(Some("demo".into()), 10, false);
        assert!(Arc::ptr_eq(&store.resolve(&s.id).unwrap(), &s));
        assert!(Arc::ptr_eq(&store.resolve(&s.short_id()).unwrap(), &s));
        assert!(Arc::ptr_eq(&store.resolve("demo").unwrap(), &s));
        assert!(store.resolve("nope").is_err());
    }

    #[test]
    fn remove_is_idempotent() {
        let store = Store::new();
        let s = store.create(None, 10, false);
        store.remove(&s.id);
        store.remove(&s.id);
        assert!(store.get(&s.id).is_none());
    }
}
