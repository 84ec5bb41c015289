//! Session-scoped state for visit tracking
//!
//! Only the visitor's row id is kept in the session. The visitor itself is
//! always re-read from storage, so a session never holds a stale copy.

pub mod memory;

pub use memory::MemorySessionStore;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Session key holding the current visitor id.
pub const VISITOR_KEY: &str = "visitor";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session value for '{key}' is malformed: {value}")]
    Malformed { key: String, value: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Key/value storage partitioned by session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str, key: &str) -> SessionResult<Option<String>>;

    async fn put(&self, session_id: &str, key: &str, value: String) -> SessionResult<()>;
}

/// Handle to one client session.
#[derive(Clone)]
pub struct SessionContext {
    store: Arc<dyn SessionStore>,
    session_id: String,
}

impl SessionContext {
    pub fn new(store: Arc<dyn SessionStore>, session_id: impl Into<String>) -> Self {
        Self {
            store,
            session_id: session_id.into(),
        }
    }

    /// Start a session under a freshly generated id.
    pub fn generate(store: Arc<dyn SessionStore>) -> Self {
        Self::new(store, new_session_id())
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    /// Row id of the visitor bound to this session, if any.
    pub async fn visitor_id(&self) -> SessionResult<Option<i64>> {
        let Some(value) = self.store.get(&self.session_id, VISITOR_KEY).await? else {
            return Ok(None);
        };

        value
            .parse::<i64>()
            .map(Some)
            .map_err(|_| SessionError::Malformed {
                key: VISITOR_KEY.to_string(),
                value,
            })
    }

    pub async fn set_visitor_id(&self, visitor_id: i64) -> SessionResult<()> {
        self.store
            .put(&self.session_id, VISITOR_KEY, visitor_id.to_string())
            .await
    }
}

/// Opaque, unguessable session id.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
