use crate::models::{NewVisit, VisitRecord, Visitor, VisitorUpsert};
use crate::storage::{Storage, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Storage wrapper with a read cache of visitors by row id.
///
/// Sessions only carry the visitor id, so every tracked request starts with
/// a visitor lookup. The cache serves those lookups and is refreshed with the
/// row returned by each successful `record_visit`.
pub struct CachedStorage {
    inner: Arc<dyn Storage>,
    visitors: Cache<i64, Visitor>,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn Storage>, max_entries: u64, ttl: Duration) -> Self {
        let visitors = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { inner, visitors }
    }

    /// Drop a cached visitor, e.g. after it was changed out of band
    pub async fn invalidate(&self, visitor_id: i64) {
        self.visitors.invalidate(&visitor_id).await;
    }
}

#[async_trait]
impl Storage for CachedStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn find_visitor(&self, id: i64) -> StorageResult<Option<Visitor>> {
        if let Some(cached) = self.visitors.get(&id).await {
            return Ok(Some(cached));
        }

        // Misses are not cached so a visitor created elsewhere shows up at once
        let result = self.inner.find_visitor(id).await?;
        if let Some(ref visitor) = result {
            self.visitors.insert(id, visitor.clone()).await;
        }

        Ok(result)
    }

    async fn find_visitor_by_unique_id(&self, unique_id: &str) -> StorageResult<Option<Visitor>> {
        self.inner.find_visitor_by_unique_id(unique_id).await
    }

    async fn record_visit(
        &self,
        visitor: &VisitorUpsert,
        visit: &NewVisit,
    ) -> StorageResult<(Visitor, VisitRecord)> {
        let result = self.inner.record_visit(visitor, visit).await;

        match result {
            Ok((stored, record)) => {
                self.visitors.insert(stored.id, stored.clone()).await;
                Ok((stored, record))
            }
            Err(err) => {
                if let Some(id) = visitor.id {
                    self.visitors.invalidate(&id).await;
                }
                Err(err)
            }
        }
    }

    async fn list_visits(&self, visitor_id: i64, limit: i64) -> StorageResult<Vec<VisitRecord>> {
        self.inner.list_visits(visitor_id, limit).await
    }

    async fn count_visitors(&self) -> StorageResult<i64> {
        self.inner.count_visitors().await
    }

    async fn count_visits(&self) -> StorageResult<i64> {
        self.inner.count_visits().await
    }
}
