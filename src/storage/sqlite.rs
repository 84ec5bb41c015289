use crate::models::{NewVisit, VisitRecord, Visitor, VisitorUpsert};
use crate::storage::{
    visit_record, Storage, StorageError, StorageResult, VISITOR_COLUMNS, VISIT_COLUMNS,
};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        self.pool.as_ref()
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS visitors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                unique_id TEXT NOT NULL,
                user_id INTEGER,
                ip VARCHAR(40) NOT NULL,
                user_agent TEXT,
                is_desktop BOOLEAN NOT NULL DEFAULT 0,
                is_mobile BOOLEAN NOT NULL DEFAULT 0,
                is_bot BOOLEAN NOT NULL DEFAULT 0,
                bot TEXT,
                os TEXT NOT NULL DEFAULT '',
                browser_version TEXT NOT NULL DEFAULT '',
                browser TEXT NOT NULL DEFAULT '',
                country TEXT NOT NULL DEFAULT '',
                country_code TEXT NOT NULL DEFAULT '',
                city TEXT NOT NULL DEFAULT '',
                lat REAL,
                long REAL,
                browser_language_family VARCHAR(4) NOT NULL DEFAULT '',
                browser_language VARCHAR(7) NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_visitors_unique_id ON visitors(unique_id)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS visitor_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                visitor_id INTEGER NOT NULL REFERENCES visitors(id),
                domain TEXT NOT NULL,
                method TEXT NOT NULL,
                route TEXT,
                referer TEXT,
                is_secure BOOLEAN NOT NULL DEFAULT 0,
                is_ajax BOOLEAN NOT NULL DEFAULT 0,
                path TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_visitor_requests_visitor_id ON visitor_requests(visitor_id)",
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn find_visitor(&self, id: i64) -> StorageResult<Option<Visitor>> {
        let query = format!("SELECT {VISITOR_COLUMNS} FROM visitors WHERE id = ?");
        let visitor = sqlx::query_as::<_, Visitor>(&query)
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(visitor)
    }

    async fn find_visitor_by_unique_id(&self, unique_id: &str) -> StorageResult<Option<Visitor>> {
        let query = format!(
            "SELECT {VISITOR_COLUMNS} FROM visitors WHERE unique_id = ? ORDER BY id DESC LIMIT 1"
        );
        let visitor = sqlx::query_as::<_, Visitor>(&query)
            .bind(unique_id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(visitor)
    }

    async fn record_visit(
        &self,
        visitor: &VisitorUpsert,
        visit: &NewVisit,
    ) -> StorageResult<(Visitor, VisitRecord)> {
        let now = chrono::Utc::now().timestamp();
        let attrs = &visitor.attributes;

        // Dropping the transaction on an early return rolls it back
        let mut tx = self.pool.begin().await?;

        let visitor_id = match visitor.id {
            Some(id) => {
                let result = sqlx::query(
                    r#"
                    UPDATE visitors
                    SET user_id = ?, ip = ?, user_agent = ?,
                        is_desktop = ?, is_mobile = ?, is_bot = ?, bot = ?,
                        os = ?, browser_version = ?, browser = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(attrs.user_id)
                .bind(&attrs.ip)
                .bind(&attrs.user_agent)
                .bind(attrs.is_desktop)
                .bind(attrs.is_mobile)
                .bind(attrs.is_bot)
                .bind(&attrs.bot)
                .bind(&attrs.os)
                .bind(&attrs.browser_version)
                .bind(&attrs.browser)
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(StorageError::VisitorNotFound(id));
                }

                id
            }
            None => {
                sqlx::query_scalar::<_, i64>(
                    r#"
                    INSERT INTO visitors (
                        unique_id, user_id, ip, user_agent,
                        is_desktop, is_mobile, is_bot, bot,
                        os, browser_version, browser, created_at, updated_at
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    RETURNING id
                    "#,
                )
                .bind(&visitor.unique_id)
                .bind(attrs.user_id)
                .bind(&attrs.ip)
                .bind(&attrs.user_agent)
                .bind(attrs.is_desktop)
                .bind(attrs.is_mobile)
                .bind(attrs.is_bot)
                .bind(&attrs.bot)
                .bind(&attrs.os)
                .bind(&attrs.browser_version)
                .bind(&attrs.browser)
                .bind(now)
                .bind(now)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        if let Some(geo) = &attrs.geo {
            sqlx::query(
                r#"
                UPDATE visitors
                SET country = ?, country_code = ?, city = ?, lat = ?, long = ?
                WHERE id = ?
                "#,
            )
            .bind(&geo.country)
            .bind(&geo.country_code)
            .bind(&geo.city)
            .bind(geo.lat)
            .bind(geo.long)
            .bind(visitor_id)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(language) = &attrs.language {
            sqlx::query(
                r#"
                UPDATE visitors
                SET browser_language_family = ?, browser_language = ?
                WHERE id = ?
                "#,
            )
            .bind(&language.family)
            .bind(&language.language)
            .bind(visitor_id)
            .execute(&mut *tx)
            .await?;
        }

        let visit_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO visitor_requests (
                visitor_id, domain, method, route, referer, is_secure, is_ajax, path, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(visitor_id)
        .bind(&visit.domain)
        .bind(&visit.method)
        .bind(&visit.route)
        .bind(&visit.referer)
        .bind(visit.is_secure)
        .bind(visit.is_ajax)
        .bind(&visit.path)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let query = format!("SELECT {VISITOR_COLUMNS} FROM visitors WHERE id = ?");
        let stored = sqlx::query_as::<_, Visitor>(&query)
            .bind(visitor_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok((stored, visit_record(visit_id, visitor_id, visit, now)))
    }

    async fn list_visits(&self, visitor_id: i64, limit: i64) -> StorageResult<Vec<VisitRecord>> {
        let query = format!(
            "SELECT {VISIT_COLUMNS} FROM visitor_requests WHERE visitor_id = ? ORDER BY id DESC LIMIT ?"
        );
        let visits = sqlx::query_as::<_, VisitRecord>(&query)
            .bind(visitor_id)
            .bind(limit)
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(visits)
    }

    async fn count_visitors(&self) -> StorageResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM visitors")
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(count)
    }

    async fn count_visits(&self) -> StorageResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM visitor_requests")
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(count)
    }
}
