//! SQLite implementation of the persistence gateway.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use super::{JobUpdate, Store};
use crate::config::CrawlConfig;
use crate::content_type::ContentType;
use crate::error::{StoreError, StoreResult};
use crate::models::{Job, JobStatus, Record, RecordMetadata};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connects to `database_url` and creates the tables if needed.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - in-memory database, lost when the store is dropped
    /// - `sqlite://scraper.db?mode=rwc` - file database, created if missing
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let in_memory = database_url.contains(":memory:");
        // Every connection to an in-memory database sees a different database.
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = options.connect(database_url).await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub async fn in_memory() -> StoreResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                content_type TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                items_scraped INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                config TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL REFERENCES jobs(id),
                title TEXT NOT NULL,
                content TEXT,
                url TEXT NOT NULL,
                content_type TEXT NOT NULL,
                scraped_at TEXT NOT NULL,
                raw_html TEXT,
                metadata TEXT,
                UNIQUE (job_id, url)
            );

            CREATE INDEX IF NOT EXISTS idx_records_content_type ON records(content_type);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &'static str, value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| StoreError::Decode {
            column,
            reason: error.to_string(),
        })
}

fn decode<T: std::str::FromStr>(column: &'static str, value: &str) -> StoreResult<T>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|error: T::Err| StoreError::Decode {
        column,
        reason: error.to_string(),
    })
}

/// `,a,b,` form matched with `instr` so status sets bind as one parameter.
fn status_set(statuses: &[JobStatus]) -> String {
    if statuses.is_empty() {
        return String::new();
    }
    let joined: Vec<&str> = statuses.iter().map(|status| status.as_str()).collect();
    format!(",{},", joined.join(","))
}

fn job_from_row(row: &SqliteRow) -> StoreResult<Job> {
    let started_at: Option<String> = row.try_get("started_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;
    let items_scraped: i64 = row.try_get("items_scraped")?;
    let config: String = row.try_get("config")?;

    Ok(Job {
        id: decode("id", &row.try_get::<String, _>("id")?)?,
        content_type: decode::<ContentType>("content_type", &row.try_get::<String, _>("content_type")?)?,
        status: decode::<JobStatus>("status", &row.try_get::<String, _>("status")?)?,
        created_at: parse_timestamp("created_at", &row.try_get::<String, _>("created_at")?)?,
        started_at: started_at
            .map(|value| parse_timestamp("started_at", &value))
            .transpose()?,
        completed_at: completed_at
            .map(|value| parse_timestamp("completed_at", &value))
            .transpose()?,
        items_scraped: items_scraped.max(0) as u64,
        error_message: row.try_get("error_message")?,
        config: serde_json::from_str::<CrawlConfig>(&config)?,
    })
}

fn record_from_row(row: &SqliteRow) -> StoreResult<Record> {
    let metadata: Option<String> = row.try_get("metadata")?;
    Ok(Record {
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        url: row.try_get("url")?,
        content_type: decode::<ContentType>("content_type", &row.try_get::<String, _>("content_type")?)?,
        scraped_at: parse_timestamp("scraped_at", &row.try_get::<String, _>("scraped_at")?)?,
        raw_html: row.try_get("raw_html")?,
        metadata: metadata
            .map(|value| serde_json::from_str::<RecordMetadata>(&value))
            .transpose()?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_job(&self, job: &Job) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, content_type, status, created_at, started_at, completed_at,
                              items_scraped, error_message, config)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.content_type.singular())
        .bind(job.status.as_str())
        .bind(timestamp(job.created_at))
        .bind(job.started_at.map(timestamp))
        .bind(job.completed_at.map(timestamp))
        .bind(job.items_scraped as i64)
        .bind(job.error_message.as_deref())
        .bind(serde_json::to_string(&job.config)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_records(&self, job_id: Uuid, records: &[Record]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            let metadata = record
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            sqlx::query(
                r#"
                INSERT INTO records (job_id, title, content, url, content_type, scraped_at, raw_html, metadata)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (job_id, url) DO UPDATE SET
                    title = excluded.title,
                    content = excluded.content,
                    scraped_at = excluded.scraped_at,
                    raw_html = COALESCE(excluded.raw_html, records.raw_html),
                    metadata = excluded.metadata
                "#,
            )
            .bind(job_id.to_string())
            .bind(&record.title)
            .bind(record.content.as_deref())
            .bind(&record.url)
            .bind(record.content_type.singular())
            .bind(timestamp(record.scraped_at))
            .bind(record.raw_html.as_deref())
            .bind(metadata)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_job(&self, id: Uuid, update: &JobUpdate) -> StoreResult<bool> {
        let only_if = status_set(&update.only_if);
        let config = update.config.as_ref().map(serde_json::to_string).transpose()?;
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = COALESCE(?1, status),
                started_at = COALESCE(?2, started_at),
                completed_at = COALESCE(?3, completed_at),
                items_scraped = MAX(items_scraped, COALESCE(?4, items_scraped)),
                error_message = COALESCE(?5, error_message),
                config = COALESCE(?8, config)
            WHERE id = ?6 AND (?7 = '' OR instr(?7, ',' || status || ',') > 0)
            "#,
        )
        .bind(update.status.map(JobStatus::as_str))
        .bind(update.started_at.map(timestamp))
        .bind(update.completed_at.map(timestamp))
        .bind(update.items_scraped.map(|items| items as i64))
        .bind(update.error_message.as_deref())
        .bind(id.to_string())
        .bind(only_if)
        .bind(config)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn select_job(&self, id: Uuid) -> StoreResult<Option<Job>> {
        sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(job_from_row)
            .transpose()
    }

    async fn select_jobs_by_status(&self, statuses: &[JobStatus]) -> StoreResult<Vec<Job>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query(
            "SELECT * FROM jobs WHERE instr(?, ',' || status || ',') > 0 ORDER BY created_at DESC",
        )
        .bind(status_set(statuses))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(job_from_row)
        .collect()
    }

    async fn select_records(&self, job_id: Uuid) -> StoreResult<Vec<Record>> {
        sqlx::query("SELECT * FROM records WHERE job_id = ? ORDER BY id")
            .bind(job_id.to_string())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(record_from_row)
            .collect()
    }
}
