pub mod cached;
pub mod postgres;
pub mod sqlite;
pub mod trait_def;

pub use cached::CachedStorage;
pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;
pub use trait_def::{Storage, StorageError, StorageResult};

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{DatabaseBackend, DatabaseConfig};
use crate::models::{NewVisit, VisitRecord};

const VISITOR_CACHE_TTL: Duration = Duration::from_secs(300);

/// Column list shared by visitor queries on every backend.
pub(crate) const VISITOR_COLUMNS: &str = "id, unique_id, user_id, ip, user_agent, \
     is_desktop, is_mobile, is_bot, bot, os, browser_version, browser, \
     country, country_code, city, lat, long, \
     browser_language_family, browser_language, created_at, updated_at";

pub(crate) const VISIT_COLUMNS: &str =
    "id, visitor_id, domain, method, route, referer, is_secure, is_ajax, path, created_at";

pub(crate) fn visit_record(id: i64, visitor_id: i64, visit: &NewVisit, created_at: i64) -> VisitRecord {
    VisitRecord {
        id,
        visitor_id,
        domain: visit.domain.clone(),
        method: visit.method.clone(),
        route: visit.route.clone(),
        referer: visit.referer.clone(),
        is_secure: visit.is_secure,
        is_ajax: visit.is_ajax,
        path: visit.path.clone(),
        created_at,
    }
}

/// Connect to the configured backend, wrapped in the visitor cache unless
/// it is disabled.
pub async fn open(config: &DatabaseConfig) -> Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match config.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.url);
            Arc::new(SqliteStorage::new(&config.url, config.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            Arc::new(PostgresStorage::new(&config.url, config.max_connections).await?)
        }
    };

    if config.visitor_cache_entries == 0 {
        return Ok(storage);
    }

    Ok(Arc::new(CachedStorage::new(
        storage,
        config.visitor_cache_entries,
        VISITOR_CACHE_TTL,
    )))
}
