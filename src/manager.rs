//! Registry of live sessions and the capacity policy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::{info, warn};

use crate::error::SessionError;
use crate::protocol::SessionConfig;
use crate::session::SessionId;

#[derive(Debug, Default)]
struct SessionRecord {
    config: SessionConfig,
}

/// Session registry. Sessions are addressed by opaque id, never by direct
/// reference, so teardown during in-flight inference reduces to "id no
/// longer present".
pub struct SessionManager {
    limit: usize,
    next_id: AtomicU64,
    sessions: Mutex<HashMap<SessionId, SessionRecord>>,
}

impl SessionManager {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            next_id: AtomicU64::new(0),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Admit a new session, or reject explicitly when at capacity.
    pub fn register(&self) -> Result<SessionId, SessionError> {
        let mut sessions = self.sessions.lock().unwrap();
        let active = sessions.len();
        if active >= self.limit {
            warn!("rejecting connection: {} of {} sessions in use", active, self.limit);
            return Err(SessionError::AtCapacity {
                active,
                limit: self.limit,
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        sessions.insert(id, SessionRecord::default());
        info!("session {} registered ({} active)", id, sessions.len());
        Ok(id)
    }

    /// Remove a session from the registry. Returns whether it was present.
    /// Call this before canceling dispatcher state so late results find the
    /// session already gone.
    pub fn deregister(&self, id: SessionId) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        let removed = sessions.remove(&id).is_some();
        if removed {
            info!("session {} deregistered ({} active)", id, sessions.len());
        }
        removed
    }

    /// Store passthrough session metadata. Repeated configs overwrite.
    pub fn set_config(&self, id: SessionId, config: SessionConfig) {
        if let Some(record) = self.sessions.lock().unwrap().get_mut(&id) {
            info!(
                "session {} config: language={:?} use_itn={:?}",
                id, config.language, config.use_itn
            );
            record.config = config;
        }
    }

    pub fn config(&self, id: SessionId) -> Option<SessionConfig> {
        self.sessions
            .lock()
            .unwrap()
            .get(&id)
            .map(|r| r.config.clone())
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().unwrap().contains_key(&id)
    }

    pub fn active(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}
