use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::QueryBuilder;
use std::str::FromStr;
use tracing::info;

use super::{CompositionLog, FeedbackRecord, MemoryRecord, Storage};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) the database file and run migrations
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());
        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        Self::connect(options, config.max_connections).await
    }

    /// In-memory database for tests and one-shot CLI runs.
    ///
    /// Uses a single connection so every query sees the same database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;
        Self::connect(options, 1).await
    }

    async fn connect(options: SqliteConnectOptions, max_connections: u32) -> StorageResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn store_memory(&self, memory: &MemoryRecord) -> StorageResult<()> {
        let tags = serde_json::to_string(&memory.tags).unwrap_or_else(|_| "[]".to_string());

        sqlx::query(
            r#"
            INSERT INTO memories (id, content, location, tags, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&memory.id)
        .bind(&memory.content)
        .bind(&memory.location)
        .bind(&tags)
        .bind(memory.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_memory(&self, id: &str) -> StorageResult<Option<MemoryRecord>> {
        let row: Option<MemoryRow> = sqlx::query_as(
            r#"
            SELECT id, content, location, tags, created_at
            FROM memories
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn search_memories(
        &self,
        keywords: &[String],
        limit: usize,
    ) -> StorageResult<Vec<MemoryRecord>> {
        if keywords.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, content, location, tags, created_at FROM memories WHERE ",
        );
        for (i, keyword) in keywords.iter().enumerate() {
            if i > 0 {
                builder.push(" OR ");
            }
            let pattern = format!("%{}%", escape_like(&keyword.to_lowercase()));
            builder
                .push("(lower(content) LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR lower(COALESCE(location, '')) LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR lower(tags) LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
        builder
            .push(" ORDER BY created_at DESC, id ASC LIMIT ")
            .push_bind(limit as i64);

        let rows: Vec<MemoryRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count_memories(&self) -> StorageResult<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM memories")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    async fn record_feedback(&self, feedback: &FeedbackRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO feedback (id, query_id, query_type, recommended, outcome, actual_choice, explanation, submitter, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&feedback.id)
        .bind(&feedback.query_id)
        .bind(&feedback.query_type)
        .bind(&feedback.recommended)
        .bind(&feedback.outcome)
        .bind(&feedback.actual_choice)
        .bind(&feedback.explanation)
        .bind(&feedback.submitter)
        .bind(feedback.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn feedback_for_query(&self, query_id: &str) -> StorageResult<Vec<FeedbackRecord>> {
        let rows: Vec<FeedbackRow> = sqlx::query_as(
            r#"
            SELECT id, query_id, query_type, recommended, outcome, actual_choice, explanation, submitter, created_at
            FROM feedback
            WHERE query_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(query_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn log_composition(&self, log: &CompositionLog) -> StorageResult<()> {
        let unavailable =
            serde_json::to_string(&log.unavailable_sources).unwrap_or_else(|_| "[]".to_string());

        sqlx::query(
            r#"
            INSERT INTO compositions (id, query_id, query_type, query_text, recommendation, confidence, evidence_count, alternative_count, unavailable_sources, latency_ms, success, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&log.id)
        .bind(&log.query_id)
        .bind(&log.query_type)
        .bind(&log.query_text)
        .bind(&log.recommendation)
        .bind(log.confidence)
        .bind(log.evidence_count)
        .bind(log.alternative_count)
        .bind(&unavailable)
        .bind(log.latency_ms)
        .bind(log.success)
        .bind(&log.error)
        .bind(log.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_compositions(&self, limit: usize) -> StorageResult<Vec<CompositionLog>> {
        let rows: Vec<CompositionRow> = sqlx::query_as(
            r#"
            SELECT id, query_id, query_type, query_text, recommendation, confidence, evidence_count, alternative_count, unavailable_sources, latency_ms, success, error, created_at
            FROM compositions
            ORDER BY created_at DESC, id ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// Make `%`, `_` and the escape character itself match literally under `ESCAPE '\'`.
fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct MemoryRow {
    id: String,
    content: String,
    location: Option<String>,
    tags: String,
    created_at: String,
}

impl From<MemoryRow> for MemoryRecord {
    fn from(row: MemoryRow) -> Self {
        Self {
            id: row.id,
            content: row.content,
            location: row.location,
            tags: serde_json::from_str(&row.tags).unwrap_or_default(),
            created_at: parse_timestamp(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct FeedbackRow {
    id: String,
    query_id: String,
    query_type: String,
    recommended: String,
    outcome: String,
    actual_choice: Option<String>,
    explanation: Option<String>,
    submitter: Option<String>,
    created_at: String,
}

impl From<FeedbackRow> for FeedbackRecord {
    fn from(row: FeedbackRow) -> Self {
        Self {
            id: row.id,
            query_id: row.query_id,
            query_type: row.query_type,
            recommended: row.recommended,
            outcome: row.outcome,
            actual_choice: row.actual_choice,
            explanation: row.explanation,
            submitter: row.submitter,
            created_at: parse_timestamp(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct CompositionRow {
    id: String,
    query_id: String,
    query_type: String,
    query_text: String,
    recommendation: Option<String>,
    confidence: Option<f64>,
    evidence_count: i64,
    alternative_count: i64,
    unavailable_sources: String,
    latency_ms: i64,
    success: bool,
    error: Option<String>,
    created_at: String,
}

impl From<CompositionRow> for CompositionLog {
    fn from(row: CompositionRow) -> Self {
        Self {
            id: row.id,
            query_id: row.query_id,
            query_type: row.query_type,
            query_text: row.query_text,
            recommendation: row.recommendation,
            confidence: row.confidence,
            evidence_count: row.evidence_count,
            alternative_count: row.alternative_count,
            unavailable_sources: serde_json::from_str(&row.unavailable_sources).unwrap_or_default(),
            latency_ms: row.latency_ms,
            success: row.success,
            error: row.error,
            created_at: parse_timestamp(&row.created_at),
        }
    }
}
