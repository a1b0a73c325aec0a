//! Persistence gateway: the only way jobs and records reach storage.

mod memory;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::CrawlConfig;
use crate::error::StoreResult;
use crate::models::{Job, JobStatus, Record};

/// Field changes for one job row.
///
/// Unset fields are left as they are. `items_scraped` never decreases: the
/// stored counter becomes the larger of the old and new values. When
/// `only_if` is non-empty the update applies only while the job's current
/// status is one of those listed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub items_scraped: Option<u64>,
    pub error_message: Option<String>,
    /// Replaces the stored crawl config.
    pub config: Option<CrawlConfig>,
    pub only_if: Vec<JobStatus>,
}

impl JobUpdate {
    /// Moves the job to `status`, guarded by the lifecycle's predecessors.
    pub fn transition(status: JobStatus) -> Self {
        let now = Utc::now();
        Self {
            status: Some(status),
            started_at: (status == JobStatus::Running).then_some(now),
            completed_at: status.is_terminal().then_some(now),
            only_if: status.predecessors().to_vec(),
            ..Self::default()
        }
    }

    /// Counter update, applied only while the job is running.
    pub fn progress(items_scraped: u64) -> Self {
        Self {
            items_scraped: Some(items_scraped),
            only_if: vec![JobStatus::Running],
            ..Self::default()
        }
    }

    pub fn with_items(mut self, items_scraped: u64) -> Self {
        self.items_scraped = Some(items_scraped);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_config(mut self, config: CrawlConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub(crate) fn permits(&self, current: JobStatus) -> bool {
        self.only_if.is_empty() || self.only_if.contains(&current)
    }

    pub(crate) fn apply(&self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(started_at) = self.started_at {
            job.started_at = Some(started_at);
        }
        if let Some(completed_at) = self.completed_at {
            job.completed_at = Some(completed_at);
        }
        if let Some(items) = self.items_scraped {
            job.items_scraped = job.items_scraped.max(items);
        }
        if let Some(message) = &self.error_message {
            job.error_message = Some(message.clone());
        }
        if let Some(config) = &self.config {
            job.config = config.clone();
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_job(&self, job: &Job) -> StoreResult<()>;

    /// Writes a batch of records for `job_id`. A record whose URL was already
    /// stored for the job replaces the earlier row.
    async fn insert_records(&self, job_id: Uuid, records: &[Record]) -> StoreResult<()>;

    /// Returns whether the update was applied.
    async fn update_job(&self, id: Uuid, update: &JobUpdate) -> StoreResult<bool>;

    async fn select_job(&self, id: Uuid) -> StoreResult<Option<Job>>;

    /// Jobs in any of `statuses`, newest first.
    async fn select_jobs_by_status(&self, statuses: &[JobStatus]) -> StoreResult<Vec<Job>>;

    async fn select_records(&self, job_id: Uuid) -> StoreResult<Vec<Record>>;
}

pub type SharedStore = Arc<dyn Store>;
