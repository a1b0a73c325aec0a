//! gRPC surface over the [`JobController`].

use std::str::FromStr;

use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::config::CrawlConfig;
use crate::content_type::ContentType;
use crate::error::JobError;
use crate::jobs::{JobController, JobReport};
use crate::models::{Job, JobStatus};
use crate::proto::scraper_server::Scraper;
use crate::proto::{
    self, CrawlSettings, CreateJobRequest, JobId, JobReply, ListJobsRequest, ListJobsResponse,
    ResponseStatus, RunJobRequest, RunJobResponse, StopJobResponse,
};

pub use crate::proto::scraper_server::ScraperServer;

pub struct ScraperService {
    jobs: JobController,
}

impl ScraperService {
    pub fn new(jobs: JobController) -> Self {
        Self { jobs }
    }

    pub fn into_server(self) -> ScraperServer<Self> {
        ScraperServer::new(self)
    }
}

impl From<JobError> for Status {
    fn from(error: JobError) -> Self {
        match error {
            JobError::NotFound(_) => Status::not_found(error.to_string()),
            JobError::InvalidRequest(_) => Status::invalid_argument(error.to_string()),
            other => Status::aborted(other.to_string()),
        }
    }
}

fn parse_job_id(value: &str) -> Result<Uuid, Status> {
    if value.trim().is_empty() {
        return Err(Status::invalid_argument("job_id is required"));
    }
    Uuid::parse_str(value.trim())
        .map_err(|error| Status::invalid_argument(format!("invalid job_id {value:?}: {error}")))
}

fn parse_content_type(value: &str) -> Result<ContentType, Status> {
    if value.trim().is_empty() {
        return Err(Status::invalid_argument("content_type is required"));
    }
    ContentType::from_str(value).map_err(|error| Status::invalid_argument(error.to_string()))
}

/// Overlays the fields present in `settings` on `base`.
pub fn apply_settings(mut base: CrawlConfig, settings: Option<CrawlSettings>) -> CrawlConfig {
    let Some(settings) = settings else {
        return base;
    };
    if let Some(url) = settings.url {
        base.url = Some(url);
    }
    if let Some(depth) = settings.depth {
        base.depth = depth;
    }
    if let Some(throttle_ms) = settings.throttle_ms {
        base.throttle_ms = throttle_ms;
    }
    if let Some(timeout_seconds) = settings.timeout_seconds {
        base.timeout_seconds = timeout_seconds;
    }
    if let Some(save_raw_html) = settings.save_raw_html {
        base.save_raw_html = save_raw_html;
    }
    if let Some(max_items) = settings.max_items {
        base.max_items = max_items;
    }
    if let Some(respect_robots) = settings.respect_robots {
        base.respect_robots = respect_robots;
    }
    base
}

impl From<&Job> for proto::Job {
    fn from(job: &Job) -> Self {
        proto::Job {
            id: job.id.to_string(),
            content_type: job.content_type.plural().into(),
            status: job.status.as_str().into(),
            created_at: job.created_at.to_rfc3339(),
            started_at: job.started_at.map(|at| at.to_rfc3339()),
            completed_at: job.completed_at.map(|at| at.to_rfc3339()),
            items_scraped: job.items_scraped,
            error_message: job.error_message.clone(),
            config_json: serde_json::to_string(&job.config).unwrap_or_default(),
        }
    }
}

impl From<JobReport> for RunJobResponse {
    fn from(report: JobReport) -> Self {
        let status = if report.success {
            ResponseStatus::Ok
        } else {
            ResponseStatus::Error
        };
        RunJobResponse {
            status: status.into(),
            message: report.message,
            success: report.success,
            items_scraped: report.items_scraped,
            failed_url_count: report.failed_url_count,
            stopped: report.stopped,
            partial_success: report.partial_success,
        }
    }
}

fn job_reply(job: &Job) -> JobReply {
    JobReply {
        status: ResponseStatus::Ok.into(),
        message: None,
        job: Some(job.into()),
    }
}

#[tonic::async_trait]
impl Scraper for ScraperService {
    async fn create_job(
        &self,
        request: Request<CreateJobRequest>,
    ) -> Result<Response<JobReply>, Status> {
        let request = request.into_inner();
        let content_type = parse_content_type(&request.content_type)?;
        let config = apply_settings(CrawlConfig::default(), request.config);
        let job = self.jobs.create(content_type, config).await?;
        Ok(Response::new(job_reply(&job)))
    }

    async fn run_job(
        &self,
        request: Request<RunJobRequest>,
    ) -> Result<Response<RunJobResponse>, Status> {
        let request = request.into_inner();
        let content_type = parse_content_type(&request.content_type)?;
        let id = parse_job_id(&request.job_id)?;
        let stored = self.jobs.get(id).await?;
        let config = apply_settings(stored.config, request.config);

        // Detached so a dropped connection cannot leave the job half finished.
        let jobs = self.jobs.clone();
        let report = tokio::spawn(async move { jobs.run(id, content_type, config).await })
            .await
            .map_err(|error| Status::internal(format!("job task failed: {error}")))??;
        Ok(Response::new(report.into()))
    }

    async fn stop_job(&self, request: Request<JobId>) -> Result<Response<StopJobResponse>, Status> {
        let id = parse_job_id(&request.get_ref().job_id)?;
        let stopped = self.jobs.stop(id).await?;
        Ok(Response::new(StopJobResponse {
            status: ResponseStatus::Ok.into(),
            message: (!stopped).then(|| format!("job {id} is not active")),
            stopped,
        }))
    }

    async fn get_job(&self, request: Request<JobId>) -> Result<Response<JobReply>, Status> {
        let id = parse_job_id(&request.get_ref().job_id)?;
        let job = self.jobs.get(id).await?;
        Ok(Response::new(job_reply(&job)))
    }

    async fn list_jobs(
        &self,
        request: Request<ListJobsRequest>,
    ) -> Result<Response<ListJobsResponse>, Status> {
        let requested = &request.get_ref().statuses;
        let statuses = if requested.is_empty() {
            JobStatus::ACTIVE.to_vec()
        } else {
            requested
                .iter()
                .map(|status| JobStatus::from_str(status.trim()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|error| Status::invalid_argument(error.to_string()))?
        };
        let jobs = self.jobs.list(&statuses).await?;
        Ok(Response::new(ListJobsResponse {
            status: ResponseStatus::Ok.into(),
            message: None,
            jobs: jobs.iter().map(proto::Job::from).collect(),
        }))
    }
}
