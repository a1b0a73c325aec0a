//! Typed errors for the scraper library.

use thiserror::Error;
use uuid::Uuid;

use crate::models::JobStatus;

/// Errors raised while fetching a single URL.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The request did not complete within the configured timeout.
    #[error("timeout fetching: {url}")]
    Timeout { url: String },

    /// Connection, TLS or body read failure.
    #[error("HTTP error fetching {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered, but not with a 2xx status.
    #[error("HTTP {status} fetching {url}")]
    Status { url: String, status: u16 },

    /// The body was fetched but cannot be handed to the extractor.
    #[error("unparseable content at {url}: {reason}")]
    Unparseable { url: String, reason: String },
}

/// Errors raised by the persistence gateway.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid stored value in column {column}: {reason}")]
    Decode { column: &'static str, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the job controller.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("job {0} is already running")]
    AlreadyRunning(Uuid),

    #[error("crawl failed: {0}")]
    Crawl(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("invalid crawl config: {0}")]
    InvalidCrawlConfig(String),
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type JobResult<T> = std::result::Result<T, JobError>;
