use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use super::{SessionResult, SessionStore};

/// In-process session store.
///
/// Sessions expire after `ttl` without access. Values of one session live in
/// a `DashMap` so concurrent requests of the same session do not clobber
/// each other's keys.
pub struct MemorySessionStore {
    sessions: Cache<String, Arc<DashMap<String, String>>>,
}

impl MemorySessionStore {
    pub fn new(max_sessions: u64, ttl: Duration) -> Self {
        let sessions = Cache::builder()
            .max_capacity(max_sessions)
            .time_to_idle(ttl)
            .build();

        Self { sessions }
    }

    /// Number of live sessions (approximate, pending maintenance tasks).
    pub fn len(&self) -> u64 {
        self.sessions.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str, key: &str) -> SessionResult<Option<String>> {
        Ok(self
            .sessions
            .get(session_id)
            .await
            .and_then(|values| values.get(key).map(|entry| entry.value().clone())))
    }

    async fn put(&self, session_id: &str, key: &str, value: String) -> SessionResult<()> {
        let values = self
            .sessions
            .get_with(session_id.to_string(), async { Arc::new(DashMap::new()) })
            .await;
        values.insert(key.to_string(), value);
        Ok(())
    }
}
