use crate::models::{NewVisit, VisitRecord, Visitor, VisitorUpsert};
use crate::storage::{
    visit_record, Storage, StorageError, StorageResult, VISITOR_COLUMNS, VISIT_COLUMNS,
};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn pool(&self) -> &PgPool {
        self.pool.as_ref()
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS visitors (
                id BIGSERIAL PRIMARY KEY,
                unique_id TEXT NOT NULL,
                user_id BIGINT,
                ip VARCHAR(40) NOT NULL,
                user_agent TEXT,
                is_desktop BOOLEAN NOT NULL DEFAULT FALSE,
                is_mobile BOOLEAN NOT NULL DEFAULT FALSE,
                is_bot BOOLEAN NOT NULL DEFAULT FALSE,
                bot TEXT,
                os TEXT NOT NULL DEFAULT '',
                browser_version TEXT NOT NULL DEFAULT '',
                browser TEXT NOT NULL DEFAULT '',
                country TEXT NOT NULL DEFAULT '',
                country_code TEXT NOT NULL DEFAULT '',
                city TEXT NOT NULL DEFAULT '',
                lat DOUBLE PRECISION,
                long DOUBLE PRECISION,
                browser_language_family VARCHAR(4) NOT NULL DEFAULT '',
                browser_language VARCHAR(7) NOT NULL DEFAULT '',
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
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
                id BIGSERIAL PRIMARY KEY,
                visitor_id BIGINT NOT NULL REFERENCES visitors(id),
                domain TEXT NOT NULL,
                method TEXT NOT NULL,
                route TEXT,
                referer TEXT,
                is_secure BOOLEAN NOT NULL DEFAULT FALSE,
                is_ajax BOOLEAN NOT NULL DEFAULT FALSE,
                path TEXT NOT NULL,
                created_at BIGINT NOT NULL
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
        let query = format!("SELECT {VISITOR_COLUMNS} FROM visitors WHERE id = $1");
        let visitor = sqlx::query_as::<_, Visitor>(&query)
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(visitor)
    }

    async fn find_visitor_by_unique_id(&self, unique_id: &str) -> StorageResult<Option<Visitor>> {
        let query = format!(
            "SELECT {VISITOR_COLUMNS} FROM visitors WHERE unique_id = $1 ORDER BY id DESC LIMIT 1"
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
                    SET user_id = $1, ip = $2, user_agent = $3,
                        is_desktop = $4, is_mobile = $5, is_bot = $6, bot = $7,
                        os = $8, browser_version = $9, browser = $10, updated_at = $11
                    WHERE id = $12
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
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
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
                SET country = $1, country_code = $2, city = $3, lat = $4, long = $5
                WHERE id = $6
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
                SET browser_language_family = $1, browser_language = $2
                WHERE id = $3
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
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

        let query = format!("SELECT {VISITOR_COLUMNS} FROM visitors WHERE id = $1");
        let stored = sqlx::query_as::<_, Visitor>(&query)
            .bind(visitor_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok((stored, visit_record(visit_id, visitor_id, visit, now)))
    }

    async fn list_visits(&self, visitor_id: i64, limit: i64) -> StorageResult<Vec<VisitRecord>> {
        let query = format!(
            "SELECT {VISIT_COLUMNS} FROM visitor_requests WHERE visitor_id = $1 ORDER BY id DESC LIMIT $2"
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
