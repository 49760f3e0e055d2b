use crate::acquisition::CollectionSession;
use crate::error::{CollectorError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

struct SessionEntry {
    session: CollectionSession,
    last_seen: Instant,
}

/// Open collection sessions keyed by id.
///
/// The lock is only held for in-memory edits, never across an await point.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, SessionEntry>>,
    max_idle: Duration,
}

impl SessionRegistry {
    pub fn new(max_idle: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_idle,
        }
    }

    /// Open a new session, evicting idle ones first
    pub fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        let mut sessions = self.sessions.lock();

        let before = sessions.len();
        let max_idle = self.max_idle;
        sessions.retain(|_, entry| entry.last_seen.elapsed() <= max_idle);
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted = evicted, "Evicted idle sessions");
            metrics::counter!("collector.sessions.evicted").increment(evicted as u64);
        }

        sessions.insert(
            id,
            SessionEntry {
                session: CollectionSession::new(),
                last_seen: Instant::now(),
            },
        );
        metrics::gauge!("collector.sessions.open").set(sessions.len() as f64);

        id
    }

    /// Run `f` against a session, refreshing its idle timer
    pub fn with_session<R>(&self, id: Uuid, f: impl FnOnce(&mut CollectionSession) -> R) -> Result<R> {
        let mut sessions = self.sessions.lock();
        let entry = sessions
            .get_mut(&id)
            .ok_or(CollectorError::SessionNotFound(id))?;
        entry.last_seen = Instant::now();
        Ok(f(&mut entry.session))
    }

    pub fn remove(&self, id: Uuid) -> Result<()> {
        let mut sessions = self.sessions.lock();
        sessions
            .remove(&id)
            .map(|_| ())
            .ok_or(CollectorError::SessionNotFound(id))?;
        metrics::gauge!("collector.sessions.open").set(sessions.len() as f64);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
