use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tonic::transport::Channel;
use tonic::Request;
use uuid::Uuid;

use parliament_scraper::logging;
use parliament_scraper::monitor::{
    JobSnapshot, JobSource, MonitorEvent, MonitorSettings, ProgressMonitor,
};
use parliament_scraper::proto::scraper_client::ScraperClient;
use parliament_scraper::proto::{
    self, CrawlSettings, CreateJobRequest, JobId, ListJobsRequest, ResponseStatus, RunJobRequest,
    RunJobResponse,
};
use parliament_scraper::{ContentType, JobStatus};

#[derive(Parser)]
#[command(about = "Drive scraping jobs on a running scraper service")]
struct Args {
    #[arg(long, default_value = "http://[::1]:50051")]
    endpoint: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a job, run it and follow its progress. Ctrl-C stops it.
    Scrape {
        /// bills, votes, speeches, mps, committees or issues
        content_type: String,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        depth: Option<u32>,
        #[arg(long)]
        throttle_ms: Option<u64>,
        #[arg(long)]
        max_items: Option<u32>,
        #[arg(long)]
        save_raw_html: bool,
        #[arg(long)]
        respect_robots: bool,
    },
    Stop { job_id: String },
    Status { job_id: String },
    /// Jobs in the given statuses; active jobs when none are given.
    List { statuses: Vec<String> },
}

/// Reads job state over gRPC for the progress monitor.
struct RemoteJobs {
    client: ScraperClient<Channel>,
}

#[async_trait]
impl JobSource for RemoteJobs {
    async fn snapshot(&self, id: Uuid) -> anyhow::Result<JobSnapshot> {
        let job = fetch_job(&mut self.client.clone(), id).await?;
        Ok(JobSnapshot {
            status: JobStatus::from_str(&job.status)?,
            items_scraped: job.items_scraped,
            error_message: job.error_message,
        })
    }

    async fn request_stop(&self, id: Uuid) -> anyhow::Result<bool> {
        let reply = self
            .client
            .clone()
            .stop_job(Request::new(JobId { job_id: id.to_string() }))
            .await?;
        Ok(reply.get_ref().stopped)
    }
}

async fn fetch_job(client: &mut ScraperClient<Channel>, id: Uuid) -> anyhow::Result<proto::Job> {
    client
        .get_job(Request::new(JobId { job_id: id.to_string() }))
        .await?
        .into_inner()
        .job
        .ok_or_else(|| anyhow!("job {id} missing from reply"))
}

fn print_job(job: &proto::Job) {
    println!(
        "{} {} {} items: {}{}",
        job.id,
        job.content_type,
        job.status,
        job.items_scraped,
        job.error_message
            .as_deref()
            .map(|message| format!(" ({message})"))
            .unwrap_or_default()
    );
}

fn print_event(event: &MonitorEvent) {
    match event {
        MonitorEvent::Progress { items_scraped } => println!("{items_scraped} items scraped"),
        MonitorEvent::Stagnant { idle } => {
            println!("No new items for {}s, still waiting", idle.as_secs())
        }
        MonitorEvent::TimedOut { elapsed } => {
            println!("Still running after {}s, stopping the job", elapsed.as_secs())
        }
        MonitorEvent::Finished { status, items_scraped, error_message } => {
            println!("Job {status} with {items_scraped} items");
            if let Some(message) = error_message {
                println!("  {message}");
            }
        }
    }
}

fn handle_run_result(response: &RunJobResponse) -> anyhow::Result<()> {
    match response.status() {
        ResponseStatus::Ok => {
            let outcome = if response.stopped {
                "stopped"
            } else if response.partial_success {
                "partially completed"
            } else {
                "completed"
            };
            println!(
                "Run {outcome}: {} items, {} failed URLs",
                response.items_scraped, response.failed_url_count
            );
            Ok(())
        }
        ResponseStatus::Error => bail!("Run failed. Error {}", response.message()),
    }
}

async fn scrape(
    client: ScraperClient<Channel>,
    content_type: ContentType,
    settings: CrawlSettings,
) -> anyhow::Result<()> {
    let job = client
        .clone()
        .create_job(Request::new(CreateJobRequest {
            content_type: content_type.plural().into(),
            config: Some(settings),
        }))
        .await?
        .into_inner()
        .job
        .ok_or_else(|| anyhow!("create reply carried no job"))?;
    let id = Uuid::parse_str(&job.id)?;
    println!("Created job {id}");

    let mut runner = client.clone();
    let run = tokio::spawn(async move {
        runner
            .run_job(Request::new(RunJobRequest {
                content_type: content_type.plural().into(),
                job_id: id.to_string(),
                config: None,
            }))
            .await
    });

    let source = Arc::new(RemoteJobs { client: client.clone() });
    let monitor = ProgressMonitor::new(Arc::clone(&source), MonitorSettings::default());
    let mut handle = monitor.spawn(id);

    loop {
        tokio::select! {
            event = handle.events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping job {id}");
                if !source.request_stop(id).await? {
                    println!("Job {id} had already finished");
                }
            }
        }
    }
    handle.cancel.cancel();

    let response = run.await?.context("run request failed")?;
    handle_run_result(response.get_ref())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init("warn");
    let mut client = ScraperClient::connect(args.endpoint.clone())
        .await
        .with_context(|| format!("could not connect to {}", args.endpoint))?;

    match args.command {
        Command::Scrape {
            content_type,
            url,
            depth,
            throttle_ms,
            max_items,
            save_raw_html,
            respect_robots,
        } => {
            let content_type = ContentType::from_str(&content_type)?;
            let settings = CrawlSettings {
                url,
                depth,
                throttle_ms,
                timeout_seconds: None,
                save_raw_html: Some(save_raw_html),
                max_items,
                respect_robots: Some(respect_robots),
            };
            scrape(client, content_type, settings).await?;
        }
        Command::Stop { job_id } => {
            let reply = client.stop_job(Request::new(JobId { job_id: job_id.clone() })).await?;
            if reply.get_ref().stopped {
                println!("Stopped job {job_id}");
            } else {
                println!("Job {job_id} is not active");
            }
        }
        Command::Status { job_id } => {
            let job = fetch_job(&mut client, Uuid::parse_str(&job_id)?).await?;
            print_job(&job);
        }
        Command::List { statuses } => {
            let reply = client.list_jobs(Request::new(ListJobsRequest { statuses })).await?;
            for job in &reply.get_ref().jobs {
                print_job(job);
            }
        }
    }
    Ok(())
}
