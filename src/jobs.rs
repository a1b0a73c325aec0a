//! Job lifecycle: creation, state transitions, progress and execution.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{CrawlConfig, ServiceConfig};
use crate::content_type::ContentType;
use crate::crawly::{CrawlOutcome, CrawlerBuilder, JobSink};
use crate::error::{JobError, JobResult, StoreError};
use crate::models::{Job, JobStatus, Record};
use crate::store::{JobUpdate, SharedStore};

const ORPHAN_MESSAGE: &str = "abandoned: server restarted before completion";
/// How long an abandoned crawl gets to flush its pending batch.
const ABANDON_GRACE: Duration = Duration::from_secs(5);

/// What the invocation boundary reports once a job has run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub success: bool,
    pub items_scraped: u64,
    pub failed_url_count: u64,
    pub stopped: bool,
    /// The execution ceiling was hit; whatever was flushed stands.
    pub partial_success: bool,
    pub message: Option<String>,
}

#[derive(Clone)]
pub struct JobController {
    store: SharedStore,
    /// Jobs executing in this process. Cancelling a handle abandons the crawl.
    running: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    execution_limit: Duration,
    batch_size: usize,
}

impl JobController {
    pub fn new(store: SharedStore, config: &ServiceConfig) -> Self {
        Self {
            store,
            running: Arc::new(RwLock::new(HashMap::new())),
            execution_limit: config.execution_limit,
            batch_size: config.batch_size,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Inserts a `pending` job.
    #[tracing::instrument(skip(self, config))]
    pub async fn create(&self, content_type: ContentType, config: CrawlConfig) -> JobResult<Job> {
        config
            .validate()
            .map_err(|error| JobError::InvalidRequest(error.to_string()))?;
        let job = Job::new(content_type, config);
        self.store.insert_job(&job).await?;
        tracing::info!("Created job {{ id: {}, content_type: {content_type} }}", job.id);
        Ok(job)
    }

    pub async fn get(&self, id: Uuid) -> JobResult<Job> {
        self.store
            .select_job(id)
            .await?
            .ok_or(JobError::NotFound(id))
    }

    pub async fn list(&self, statuses: &[JobStatus]) -> JobResult<Vec<Job>> {
        Ok(self.store.select_jobs_by_status(statuses).await?)
    }

    /// The newest pending or running job of `content_type`.
    pub async fn latest_active(&self, content_type: ContentType) -> JobResult<Option<Job>> {
        Ok(self
            .list(&JobStatus::ACTIVE)
            .await?
            .into_iter()
            .find(|job| job.content_type == content_type))
    }

    pub async fn is_active(&self, id: Uuid) -> JobResult<bool> {
        Ok(self.get(id).await?.status.is_active())
    }

    async fn transition(&self, id: Uuid, update: JobUpdate) -> JobResult<()> {
        if self.store.update_job(id, &update).await? {
            return Ok(());
        }
        let job = self.get(id).await?;
        Err(JobError::InvalidTransition {
            id,
            from: job.status,
            to: update.status.unwrap_or(job.status),
        })
    }

    pub async fn mark_running(&self, id: Uuid) -> JobResult<()> {
        self.transition(id, JobUpdate::transition(JobStatus::Running))
            .await
    }

    /// Moves the job to `running` and records the settings it runs with.
    async fn start_run(&self, id: Uuid, config: &CrawlConfig) -> JobResult<()> {
        self.transition(
            id,
            JobUpdate::transition(JobStatus::Running).with_config(config.clone()),
        )
        .await
    }

    /// Returns whether the counter was written; it is not once the job has
    /// left `running`.
    pub async fn update_progress(&self, id: Uuid, items_scraped: u64) -> JobResult<bool> {
        Ok(self
            .store
            .update_job(id, &JobUpdate::progress(items_scraped))
            .await?)
    }

    pub async fn complete(
        &self,
        id: Uuid,
        items_scraped: u64,
        error_summary: Option<String>,
    ) -> JobResult<()> {
        let mut update = JobUpdate::transition(JobStatus::Completed).with_items(items_scraped);
        update.error_message = error_summary;
        self.transition(id, update).await?;
        tracing::info!("Completed job {{ id: {id}, items: {items_scraped} }}");
        Ok(())
    }

    pub async fn fail(&self, id: Uuid, message: impl Into<String>) -> JobResult<()> {
        let message = message.into();
        self.transition(
            id,
            JobUpdate::transition(JobStatus::Failed).with_error(message.clone()),
        )
        .await?;
        tracing::warn!("Failed job {{ id: {id}, message: {message} }}");
        Ok(())
    }

    /// Stops a pending or running job. Returns `false`, changing nothing, when
    /// the job is already terminal.
    ///
    /// A running crawl sees the new status at its next liveness check, so the
    /// page in flight finishes and is kept.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self, id: Uuid) -> JobResult<bool> {
        let applied = self
            .store
            .update_job(id, &JobUpdate::transition(JobStatus::Stopped))
            .await?;
        if !applied {
            // Distinguish an unknown job from a terminal one.
            self.get(id).await?;
            tracing::info!("Job is not active, nothing to stop {{ id: {id} }}");
            return Ok(false);
        }
        tracing::info!("Stopped job {{ id: {id} }}");
        Ok(true)
    }

    /// Fails every active job with no execution in this process.
    pub async fn reap_orphans(&self) -> JobResult<usize> {
        let running = self.running.read().await.clone();
        let orphans: Vec<Job> = self
            .list(&JobStatus::ACTIVE)
            .await?
            .into_iter()
            .filter(|job| !running.contains_key(&job.id))
            .collect();

        let results = join_all(orphans.iter().map(|job| self.fail(job.id, ORPHAN_MESSAGE))).await;
        let reaped = results.iter().filter(|result| result.is_ok()).count();
        if reaped > 0 {
            tracing::info!("Reaped orphaned jobs {{ count: {reaped} }}");
        }
        Ok(reaped)
    }

    /// Runs a created job to a terminal state.
    ///
    /// The crawl races the execution ceiling. When the ceiling wins the crawl is
    /// abandoned, its pending batch flushed, and the job completes with the
    /// records that reached the store.
    #[tracing::instrument(skip(self, config))]
    pub async fn run(
        &self,
        id: Uuid,
        content_type: ContentType,
        config: CrawlConfig,
    ) -> JobResult<JobReport> {
        config
            .validate()
            .map_err(|error| JobError::InvalidRequest(error.to_string()))?;
        let job = self.get(id).await?;
        if job.content_type != content_type {
            return Err(JobError::InvalidRequest(format!(
                "job {id} was created for {}, not {content_type}",
                job.content_type.plural()
            )));
        }

        let token = CancellationToken::new();
        match self.running.write().await.entry(id) {
            Entry::Occupied(_) => return Err(JobError::AlreadyRunning(id)),
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }
        let result = self.execute(id, content_type, config, token).await;
        self.running.write().await.remove(&id);

        match result {
            Ok(report) => Ok(report),
            // Never started; the job row is untouched.
            Err(error @ JobError::InvalidTransition { .. }) => Err(error),
            Err(error) => {
                let message = error.to_string();
                if let Err(fail_error) = self.fail(id, message.clone()).await {
                    tracing::error!("Could not mark job failed {{ id: {id}, error: {fail_error} }}");
                }
                Ok(JobReport {
                    message: Some(message),
                    ..JobReport::default()
                })
            }
        }
    }

    async fn execute(
        &self,
        id: Uuid,
        content_type: ContentType,
        config: CrawlConfig,
        token: CancellationToken,
    ) -> JobResult<JobReport> {
        self.start_run(id, &config).await?;

        let crawler = CrawlerBuilder::from_crawl_config(content_type, &config)
            .with_batch_size(self.batch_size)
            .build()
            .map_err(|error| JobError::Crawl(error.to_string()))?;
        let seeds = config.seeds(content_type);
        let sink = RunningJob {
            id,
            controller: self.clone(),
            cancel: token.clone(),
        };

        let mut crawl = tokio::spawn(async move { crawler.start(&seeds, &sink).await });

        match tokio::time::timeout(self.execution_limit, &mut crawl).await {
            Ok(Ok(outcome)) => self.finish(id, outcome).await,
            Ok(Err(join_error)) => Err(JobError::Crawl(format!("crawl task aborted: {join_error}"))),
            Err(_) => {
                token.cancel();
                match tokio::time::timeout(ABANDON_GRACE, &mut crawl).await {
                    Ok(Ok(outcome)) => tracing::debug!(
                        "Abandoned crawl flushed {{ id: {id}, pages: {} }}",
                        outcome.pages_fetched
                    ),
                    Ok(Err(join_error)) => {
                        tracing::error!("Abandoned crawl failed {{ id: {id}, error: {join_error} }}")
                    }
                    Err(_) => {
                        tracing::error!("Abandoned crawl did not flush in time {{ id: {id} }}");
                        crawl.abort();
                    }
                }
                let items_scraped = self.store.select_records(id).await?.len() as u64;
                let note = format!(
                    "Execution time limit of {}s reached; partial results saved",
                    self.execution_limit.as_secs()
                );
                tracing::warn!("Job hit the execution limit {{ id: {id}, items: {items_scraped} }}");
                match self.complete(id, items_scraped, Some(note.clone())).await {
                    Ok(()) => Ok(JobReport {
                        success: true,
                        items_scraped,
                        partial_success: true,
                        message: Some(note),
                        ..JobReport::default()
                    }),
                    Err(JobError::InvalidTransition { .. }) => Ok(self.stopped_report(items_scraped, 0)),
                    Err(error) => Err(error),
                }
            }
        }
    }

    async fn finish(&self, id: Uuid, outcome: CrawlOutcome) -> JobResult<JobReport> {
        let items_scraped = outcome.records.len() as u64;
        let failed_url_count = outcome.failures.len() as u64;

        if outcome.stopped {
            return Ok(self.stopped_report(items_scraped, failed_url_count));
        }

        let summary = (failed_url_count > 0).then(|| {
            format!(
                "{failed_url_count} URL(s) failed, first: {}",
                outcome.failures[0].url
            )
        });
        match self.complete(id, items_scraped, summary.clone()).await {
            Ok(()) => Ok(JobReport {
                success: true,
                items_scraped,
                failed_url_count,
                message: summary,
                ..JobReport::default()
            }),
            // Stopped between the last liveness check and completion.
            Err(JobError::InvalidTransition { .. }) => {
                Ok(self.stopped_report(items_scraped, failed_url_count))
            }
            Err(error) => Err(error),
        }
    }

    fn stopped_report(&self, items_scraped: u64, failed_url_count: u64) -> JobReport {
        JobReport {
            success: true,
            items_scraped,
            failed_url_count,
            stopped: true,
            message: Some("Job was stopped before completion".into()),
            ..JobReport::default()
        }
    }
}

/// The crawl's view of the job it runs for.
struct RunningJob {
    id: Uuid,
    controller: JobController,
    cancel: CancellationToken,
}

#[async_trait]
impl JobSink for RunningJob {
    async fn is_active(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        match self.controller.is_active(self.id).await {
            Ok(active) => active,
            Err(JobError::NotFound(_)) => false,
            Err(error) => {
                // A flaky read must not end the crawl.
                tracing::warn!("Liveness check failed {{ id: {}, error: {error} }}", self.id);
                true
            }
        }
    }

    async fn flush(&self, records: &[Record]) -> Result<(), StoreError> {
        self.controller.store.insert_records(self.id, records).await
    }

    async fn progress(&self, items_scraped: u64) {
        if let Err(error) = self.controller.update_progress(self.id, items_scraped).await {
            tracing::warn!("Progress update failed {{ id: {}, error: {error} }}", self.id);
        }
    }

    async fn abandoned(&self) {
        self.cancel.cancelled().await
    }
}
