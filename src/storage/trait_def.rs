use crate::models::{NewVisit, VisitRecord, Visitor, VisitorUpsert};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("visitor {0} does not exist")]
    VisitorNotFound(i64),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Get a visitor by row id
    async fn find_visitor(&self, id: i64) -> StorageResult<Option<Visitor>>;

    /// Get a visitor by its session-scoped unique id
    async fn find_visitor_by_unique_id(&self, unique_id: &str) -> StorageResult<Option<Visitor>>;

    /// Insert or update the visitor and append one visit record owned by it.
    ///
    /// Both writes happen in a single transaction: on error neither is kept.
    /// Updating a visitor whose row no longer exists fails with
    /// [`StorageError::VisitorNotFound`].
    async fn record_visit(
        &self,
        visitor: &VisitorUpsert,
        visit: &NewVisit,
    ) -> StorageResult<(Visitor, VisitRecord)>;

    /// Most recent visit records of a visitor, newest first
    async fn list_visits(&self, visitor_id: i64, limit: i64) -> StorageResult<Vec<VisitRecord>>;

    async fn count_visitors(&self) -> StorageResult<i64>;

    async fn count_visits(&self) -> StorageResult<i64>;
}
