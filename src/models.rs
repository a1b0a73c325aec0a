use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::CrawlConfig;
use crate::content_type::ContentType;

/// Lifecycle of a job: `pending -> running -> {completed | failed | stopped}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    pub const ACTIVE: [JobStatus; 2] = [JobStatus::Pending, JobStatus::Running];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Stopped
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Statuses a job may be in immediately before entering `self`.
    pub fn predecessors(self) -> &'static [JobStatus] {
        match self {
            JobStatus::Pending => &[],
            JobStatus::Running => &[JobStatus::Pending],
            // A job may fail or be stopped before it ever starts running.
            JobStatus::Failed | JobStatus::Stopped => &JobStatus::ACTIVE,
            JobStatus::Completed => &[JobStatus::Running],
        }
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        next.predecessors().contains(&self)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0}")]
pub struct UnknownJobStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownJobStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "stopped" => Ok(JobStatus::Stopped),
            other => Err(UnknownJobStatus(other.to_string())),
        }
    }
}

/// One crawl execution request and its progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub content_type: ContentType,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub items_scraped: u64,
    pub error_message: Option<String>,
    pub config: CrawlConfig,
}

impl Job {
    pub fn new(content_type: ContentType, config: CrawlConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            content_type,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            items_scraped: 0,
            error_message: None,
            config,
        }
    }
}

/// Person-specific fields gathered from the member list and profile pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constituency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub social_links: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
}

/// A scraped item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub title: String,
    pub content: Option<String>,
    pub url: String,
    pub content_type: ContentType,
    pub scraped_at: DateTime<Utc>,
    pub raw_html: Option<String>,
    pub metadata: Option<RecordMetadata>,
}

impl Record {
    pub fn new(content_type: ContentType, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: None,
            url: url.into(),
            content_type,
            scraped_at: Utc::now(),
            raw_html: None,
            metadata: None,
        }
    }

    /// Records are only persisted with a non-empty absolute URL.
    pub fn has_absolute_url(&self) -> bool {
        reqwest::Url::parse(&self.url).is_ok()
    }

    pub fn metadata_mut(&mut self) -> &mut RecordMetadata {
        self.metadata.get_or_insert_with(RecordMetadata::default)
    }
}
