//! Holding area for disconnected sessions that may be resumed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lumen_settings::RuntimeSettings;
use parking_lot::Mutex;
use tracing::debug;

use crate::session::AppSession;

/// Keeps sessions whose client went away so a reconnecting client can pick
/// them up again.
pub trait SessionStorage: Send + Sync {
    /// Look up a stored session without removing it.
    fn get(&self, session_id: &str) -> Option<Arc<AppSession>>;

    /// Store a session, replacing one with the same ID.
    fn save(&self, session: Arc<AppSession>);

    /// Remove and return a stored session.
    fn delete(&self, session_id: &str) -> Option<Arc<AppSession>>;

    /// Every stored session.
    fn list(&self) -> Vec<Arc<AppSession>>;
}

struct StoredSession {
    session: Arc<AppSession>,
    stored_at: Instant,
}

/// In-memory storage bounded by age and count.
///
/// Sessions older than the TTL, or pushed out by the capacity bound (oldest
/// first), are shut down as they are dropped.
pub struct MemorySessionStorage {
    ttl: Duration,
    capacity: usize,
    sessions: Mutex<HashMap<String, StoredSession>>,
}

impl MemorySessionStorage {
    /// Create storage with the given bounds.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Bounds taken from runtime settings.
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self::new(
            Duration::from_secs(settings.session_storage_ttl_secs),
            settings.session_storage_capacity,
        )
    }

    /// Number of stored sessions, expired ones included until the next
    /// access purges them.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(&self, sessions: &mut HashMap<String, StoredSession>) {
        let now = Instant::now();
        sessions.retain(|id, stored| {
            let keep = now.duration_since(stored.stored_at) < self.ttl;
            if !keep {
                debug!(session_id = %id, "stored session expired");
                stored.session.shutdown();
            }
            keep
        });
    }
}

impl Default for MemorySessionStorage {
    fn default() -> Self {
        Self::from_settings(&RuntimeSettings::default())
    }
}

impl SessionStorage for MemorySessionStorage {
    fn get(&self, session_id: &str) -> Option<Arc<AppSession>> {
        let mut sessions = self.sessions.lock();
        self.purge_expired(&mut sessions);
        sessions.get(session_id).map(|s| Arc::clone(&s.session))
    }

    fn save(&self, session: Arc<AppSession>) {
        let mut sessions = self.sessions.lock();
        self.purge_expired(&mut sessions);
        let id = session.id().to_string();
        let _ = sessions.insert(
            id.clone(),
            StoredSession {
                session,
                stored_at: Instant::now(),
            },
        );

        while sessions.len() > self.capacity {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, s)| s.stored_at)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            if let Some(evicted) = sessions.remove(&oldest) {
                debug!(session_id = %oldest, "stored session evicted");
                evicted.session.shutdown();
            }
        }
        debug!(session_id = %id, stored = sessions.len(), "session stored");
    }

    fn delete(&self, session_id: &str) -> Option<Arc<AppSession>> {
        let mut sessions = self.sessions.lock();
        self.purge_expired(&mut sessions);
        sessions.remove(session_id).map(|s| s.session)
    }

    fn list(&self) -> Vec<Arc<AppSession>> {
        let mut sessions = self.sessions.lock();
        self.purge_expired(&mut sessions);
        sessions.values().map(|s| Arc::clone(&s.session)).collect()
    }
}

#[cfg(test)]
mod tests {
    use lumen_core::SessionId;

    use super::*;
    use crate::engine::{IdleScriptEngine, ScriptData, UserInfo};
    use crate::session::SessionServices;

    fn session() -> Arc<AppSession> {
        AppSession::new(
            SessionId::new(),
            ScriptData::new("app.py"),
            UserInfo::new(),
            SessionServices::in_memory(Arc::new(IdleScriptEngine)),
        )
    }

    #[test]
    fn save_get_delete() {
        let storage = MemorySessionStorage::new(Duration::from_secs(60), 10);
        let s = session();
        let id = s.id().to_string();
        storage.save(Arc::clone(&s));
        assert!(storage.get(&id).is_some());
        assert_eq!(storage.list().len(), 1);
        assert!(storage.delete(&id).is_some());
        assert!(storage.delete(&id).is_none());
        assert!(storage.is_empty());
        assert!(!s.is_shutdown());
    }

    #[test]
    fn expired_sessions_are_shut_down() {
        let storage = MemorySessionStorage::new(Duration::ZERO, 10);
        let s = session();
        storage.save(Arc::clone(&s));
        assert!(storage.get(s.id().as_str()).is_none());
        assert!(s.is_shutdown());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let storage = MemorySessionStorage::new(Duration::from_secs(60), 2);
        let a = session();
        let b = session();
        let c = session();
        storage.save(Arc::clone(&a));
        std::thread::sleep(Duration::from_millis(2));
        storage.save(Arc::clone(&b));
        std::thread::sleep(Duration::from_millis(2));
        storage.save(Arc::clone(&c));

        assert_eq!(storage.len(), 2);
        assert!(storage.get(a.id().as_str()).is_none());
        assert!(a.is_shutdown());
        assert!(storage.get(b.id().as_str()).is_some());
        assert!(storage.get(c.id().as_str()).is_some());
    }

    #[test]
    fn default_uses_runtime_settings() {
        let storage = MemorySessionStorage::default();
        assert_eq!(storage.capacity, 128);
        assert_eq!(storage.ttl, Duration::from_secs(120));
    }
}
