//! Article storage.
//!
//! The pipeline needs exactly two things from storage: a filtered, ordered,
//! bounded read of records still missing content, and a point write of
//! content keyed by id. [`ArticleStore`] captures that contract;
//! [`SqliteArticleStore`] implements it over `sqlx`.

use crate::errors::BackfillError;
use crate::models::{ArticleRecord, ArticleSummary};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::{debug, info, instrument};

/// Storage collaborator used by the batch selector and the driver.
pub trait ArticleStore {
    /// Records with null content, newest first, at most `limit` rows.
    ///
    /// When `published_after` is set only records with a strictly greater
    /// `publish_time` are returned.
    async fn select_pending(
        &self,
        limit: u32,
        published_after: Option<i64>,
    ) -> Result<Vec<ArticleSummary>, BackfillError>;

    /// Set the content of record `id`. Each call is its own atomic write.
    async fn write_content(&self, id: &str, content: &str) -> Result<(), BackfillError>;
}

impl<S: ArticleStore> ArticleStore for &S {
    async fn select_pending(
        &self,
        limit: u32,
        published_after: Option<i64>,
    ) -> Result<Vec<ArticleSummary>, BackfillError> {
        (**self).select_pending(limit, published_after).await
    }

    async fn write_content(&self, id: &str, content: &str) -> Result<(), BackfillError> {
        (**self).write_content(id, content).await
    }
}

/// SQLite-backed article store.
#[derive(Debug, Clone)]
pub struct SqliteArticleStore {
    pool: SqlitePool,
}

impl SqliteArticleStore {
    /// Open a pool against `url` (e.g. `sqlite:articles.db?mode=rwc`).
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, BackfillError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await?;
        info!(max_connections, "Connected to article store");
        Ok(Self { pool })
    }

    /// Create the `articles` table and its publish-time index if missing.
    pub async fn ensure_schema(&self) -> Result<(), BackfillError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY NOT NULL,
                mp_id TEXT NOT NULL,
                title TEXT NOT NULL,
                pic_url TEXT NOT NULL DEFAULT '',
                publish_time INTEGER NOT NULL,
                content TEXT,
                updated_at INTEGER
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_publish_time ON articles(publish_time)",
        )
        .execute(&self.pool)
        .await?;

        debug!("Article schema ensured");
        Ok(())
    }

    /// Insert or replace a full record.
    pub async fn insert_article(&self, record: &ArticleRecord) -> Result<(), BackfillError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO articles (id, mp_id, title, pic_url, publish_time, content)
            VALUES (?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&record.id)
        .bind(&record.mp_id)
        .bind(&record.title)
        .bind(&record.pic_url)
        .bind(record.publish_time)
        .bind(&record.content)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert `records`, replacing any with the same id.
    pub async fn seed(&self, records: &[ArticleRecord]) -> Result<usize, BackfillError> {
        for record in records {
            self.insert_article(record).await?;
            debug!(article = ?ArticleSummary::from(record), "Seeded article");
        }
        info!(count = records.len(), "Seeded articles");
        Ok(records.len())
    }

    #[cfg(test)]
    pub async fn get_article(&self, id: &str) -> Result<Option<ArticleRecord>, BackfillError> {
        let record = sqlx::query_as::<_, ArticleRecord>(
            "SELECT id, mp_id, title, pic_url, publish_time, content FROM articles WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Release all pooled connections.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Closed article store");
    }
}

impl ArticleStore for SqliteArticleStore {
    #[instrument(level = "info", skip(self))]
    async fn select_pending(
        &self,
        limit: u32,
        published_after: Option<i64>,
    ) -> Result<Vec<ArticleSummary>, BackfillError> {
        let rows = match published_after {
            Some(cutoff) => {
                sqlx::query_as::<_, ArticleSummary>(
                    r#"
                    SELECT id, title, publish_time FROM articles
                    WHERE content IS NULL AND publish_time > ?
                    ORDER BY publish_time DESC
                    LIMIT ?
                "#,
                )
                .bind(cutoff)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ArticleSummary>(
                    r#"
                    SELECT id, title, publish_time FROM articles
                    WHERE content IS NULL
                    ORDER BY publish_time DESC
                    LIMIT ?
                "#,
                )
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };
        debug!(count = rows.len(), "Selected pending articles");
        Ok(rows)
    }

    #[instrument(level = "debug", skip(self, content), fields(bytes = content.len()))]
    async fn write_content(&self, id: &str, content: &str) -> Result<(), BackfillError> {
        let result = sqlx::query("UPDATE articles SET content = ?, updated_at = ? WHERE id = ?")
            .bind(content)
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(BackfillError::RecordMissing(id.to_string()));
        }
        Ok(())
    }
}
