mod common;

use std::sync::Arc;
use std::time::Duration;

use wiremock::MockServer;

use common::{local_config, page, serve};
use parliament_scraper::config::{CrawlConfig, ServiceConfig};
use parliament_scraper::jobs::JobController;
use parliament_scraper::monitor::{MonitorEvent, MonitorSettings, ProgressMonitor};
use parliament_scraper::store::{MemoryStore, SharedStore, SqliteStore};
use parliament_scraper::{ContentType, JobStatus};

fn service_config() -> ServiceConfig {
    ServiceConfig {
        execution_limit: Duration::from_secs(30),
        ..ServiceConfig::default()
    }
}

fn controller(store: SharedStore, config: &ServiceConfig) -> JobController {
    JobController::new(store, config)
}

/// A seed page linking to `count` leaf pages.
async fn site(server: &MockServer, count: usize) -> String {
    let links: Vec<String> = (1..=count).map(|n| format!("/mal/{n}")).collect();
    let refs: Vec<&str> = links.iter().map(String::as_str).collect();
    serve(server, "/", page("Þingmál", "Yfirlit", &refs), 1).await;
    for link in &links {
        serve(server, link, page(link, "Efni máls", &[]), 1).await;
    }
    format!("{}/", server.uri())
}

#[tokio::test]
async fn job_runs_to_completion() {
    let server = MockServer::start().await;
    let seed = site(&server, 3).await;
    let store: SharedStore = Arc::new(MemoryStore::new());
    let jobs = controller(Arc::clone(&store), &service_config());

    let config = local_config(&seed);
    let job = jobs.create(ContentType::Issue, config.clone()).await.unwrap();
    let report = jobs.run(job.id, ContentType::Issue, config).await.unwrap();

    assert!(report.success);
    assert!(!report.stopped);
    assert_eq!(report.items_scraped, 4);
    assert_eq!(report.failed_url_count, 0);

    let job = jobs.get(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.items_scraped, 4);
    assert!(job.started_at.is_some() && job.completed_at.is_some());
    assert_eq!(store.select_records(job.id).await.unwrap().len(), 4);
}

#[tokio::test]
async fn run_settings_are_stored_on_the_job() {
    let server = MockServer::start().await;
    let seed = site(&server, 1).await;
    let jobs = controller(Arc::new(MemoryStore::new()), &service_config());

    let job = jobs.create(ContentType::Issue, CrawlConfig::default()).await.unwrap();
    let config = CrawlConfig {
        max_items: 50,
        ..local_config(&seed)
    };
    jobs.run(job.id, ContentType::Issue, config.clone()).await.unwrap();

    let stored = jobs.get(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.config, config);
}

#[tokio::test]
async fn failed_urls_are_summarised_on_the_job() {
    let server = MockServer::start().await;
    serve(&server, "/", page("Atkvæði", "", &["/vantar"]), 1).await;

    let seed = format!("{}/", server.uri());
    let jobs = controller(Arc::new(MemoryStore::new()), &service_config());
    let config = local_config(&seed);
    let job = jobs.create(ContentType::Vote, config.clone()).await.unwrap();
    let report = jobs.run(job.id, ContentType::Vote, config).await.unwrap();

    assert!(report.success);
    assert_eq!(report.failed_url_count, 1);
    let job = jobs.get(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(
        job.error_message,
        Some(format!("1 URL(s) failed, first: {}/vantar", server.uri()))
    );
}

#[tokio::test]
async fn stopping_a_running_job_ends_the_crawl() {
    let server = MockServer::start().await;
    let links: Vec<String> = (1..=20).map(|n| format!("/r/{n}")).collect();
    let refs: Vec<&str> = links.iter().map(String::as_str).collect();
    serve(&server, "/", page("Ræður", "", &refs), 1).await;
    for link in &links {
        wiremock::Mock::given(wiremock::matchers::path(link.as_str()))
            .respond_with(common::html(page(link, "", &[])))
            .mount(&server)
            .await;
    }

    let seed = format!("{}/", server.uri());
    let store: SharedStore = Arc::new(MemoryStore::new());
    let jobs = controller(Arc::clone(&store), &service_config());
    let config = CrawlConfig {
        throttle_ms: 50,
        ..local_config(&seed)
    };
    let job = jobs.create(ContentType::Speech, config.clone()).await.unwrap();

    let runner = jobs.clone();
    let run = tokio::spawn(async move { runner.run(job.id, ContentType::Speech, config).await });
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(jobs.stop(job.id).await.unwrap());

    let report = run.await.unwrap().unwrap();
    assert!(report.stopped);
    assert!(report.items_scraped < 21);

    let stored = jobs.get(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Stopped);
    assert!(stored.completed_at.is_some());
    // Counter writes after the stop are ignored.
    assert!(stored.items_scraped <= report.items_scraped);
}

#[tokio::test]
async fn execution_limit_completes_with_partial_results() {
    let server = MockServer::start().await;
    let links: Vec<String> = (1..=30).map(|n| format!("/mal/{n}")).collect();
    let refs: Vec<&str> = links.iter().map(String::as_str).collect();
    serve(&server, "/", page("Mál", "", &refs), 1).await;
    for link in &links {
        wiremock::Mock::given(wiremock::matchers::path(link.as_str()))
            .respond_with(common::html(page("Mál", "", &[])))
            .mount(&server)
            .await;
    }

    let store: SharedStore = Arc::new(MemoryStore::new());
    let config = ServiceConfig {
        execution_limit: Duration::from_millis(600),
        batch_size: 1,
        ..ServiceConfig::default()
    };
    let jobs = controller(Arc::clone(&store), &config);
    let crawl = CrawlConfig {
        throttle_ms: 100,
        ..local_config(&format!("{}/", server.uri()))
    };
    let job = jobs.create(ContentType::Bill, crawl.clone()).await.unwrap();
    let report = jobs.run(job.id, ContentType::Bill, crawl).await.unwrap();

    assert!(report.success);
    assert!(report.partial_success);
    assert!(!report.stopped);
    assert!(report.items_scraped >= 1);

    let stored = jobs.get(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert!(stored
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("partial results saved"));
    // Batches are flushed before the counter moves.
    assert!(store.select_records(job.id).await.unwrap().len() as u64 >= stored.items_scraped);
}

#[tokio::test]
async fn execution_limit_reports_only_persisted_records() {
    let server = MockServer::start().await;
    let links: Vec<String> = (1..=30).map(|n| format!("/mal/{n}")).collect();
    let refs: Vec<&str> = links.iter().map(String::as_str).collect();
    serve(&server, "/", page("Mál", "", &refs), 1).await;
    for link in &links {
        wiremock::Mock::given(wiremock::matchers::path(link.as_str()))
            .respond_with(common::html(page("Mál", "", &[])))
            .mount(&server)
            .await;
    }

    let store: SharedStore = Arc::new(MemoryStore::new());
    // Nothing reaches a full batch before the limit.
    let config = ServiceConfig {
        execution_limit: Duration::from_millis(450),
        batch_size: 10,
        ..ServiceConfig::default()
    };
    let jobs = controller(Arc::clone(&store), &config);
    let crawl = CrawlConfig {
        throttle_ms: 100,
        ..local_config(&format!("{}/", server.uri()))
    };
    let job = jobs.create(ContentType::Bill, crawl.clone()).await.unwrap();
    let report = jobs.run(job.id, ContentType::Bill, crawl).await.unwrap();

    assert!(report.partial_success);
    let persisted = store.select_records(job.id).await.unwrap().len() as u64;
    assert!(persisted >= 1);
    assert_eq!(report.items_scraped, persisted);
    assert_eq!(jobs.get(job.id).await.unwrap().items_scraped, persisted);
}

#[tokio::test]
async fn jobs_survive_a_restart_and_orphans_are_reaped() {
    let server = MockServer::start().await;
    let seed = site(&server, 1).await;
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("jobs.db").display());

    let (done, orphan) = {
        let store: SharedStore = Arc::new(SqliteStore::connect(&url).await.unwrap());
        let jobs = controller(store, &service_config());
        let config = local_config(&seed);
        let done = jobs.create(ContentType::Committee, config.clone()).await.unwrap();
        jobs.run(done.id, ContentType::Committee, config).await.unwrap();
        let orphan = jobs.create(ContentType::Committee, CrawlConfig::default()).await.unwrap();
        (done.id, orphan.id)
    };

    let store: SharedStore = Arc::new(SqliteStore::connect(&url).await.unwrap());
    let jobs = controller(Arc::clone(&store), &service_config());
    assert_eq!(jobs.reap_orphans().await.unwrap(), 1);

    let done = jobs.get(done).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.items_scraped, 2);
    assert_eq!(store.select_records(done.id).await.unwrap().len(), 2);

    let orphan = jobs.get(orphan).await.unwrap();
    assert_eq!(orphan.status, JobStatus::Failed);
    assert!(orphan.error_message.unwrap().contains("server restarted"));
}

fn fast_monitor() -> MonitorSettings {
    MonitorSettings {
        poll_interval: Duration::from_millis(10),
        min_fetch_spacing: Duration::from_millis(5),
        stagnation_threshold: Duration::from_millis(60),
        absolute_ceiling: Duration::from_millis(200),
        suspicious_item_floor: 3,
        completion_grace: Duration::from_millis(30),
    }
}

async fn collect(mut events: tokio::sync::mpsc::Receiver<MonitorEvent>) -> Vec<MonitorEvent> {
    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn monitor_stops_a_job_past_the_ceiling() {
    let jobs = controller(Arc::new(MemoryStore::new()), &service_config());
    let job = jobs.create(ContentType::Mp, CrawlConfig::default()).await.unwrap();
    jobs.mark_running(job.id).await.unwrap();

    let monitor = ProgressMonitor::new(Arc::new(jobs.clone()), fast_monitor());
    let handle = monitor.spawn(job.id);
    let events = tokio::time::timeout(Duration::from_secs(5), collect(handle.events))
        .await
        .unwrap();

    let stagnant = events
        .iter()
        .filter(|event| matches!(event, MonitorEvent::Stagnant { .. }))
        .count();
    assert_eq!(stagnant, 1);
    assert!(events.iter().any(|event| matches!(event, MonitorEvent::TimedOut { .. })));
    assert!(matches!(
        events.last(),
        Some(MonitorEvent::Finished { status: JobStatus::Stopped, .. })
    ));
    assert_eq!(jobs.get(job.id).await.unwrap().status, JobStatus::Stopped);

    let last = handle.task.await.unwrap().unwrap();
    assert_eq!(last.status, JobStatus::Stopped);
}

#[tokio::test]
async fn monitor_reports_a_finished_job() {
    let jobs = controller(Arc::new(MemoryStore::new()), &service_config());
    let job = jobs.create(ContentType::Bill, CrawlConfig::default()).await.unwrap();
    jobs.mark_running(job.id).await.unwrap();
    jobs.update_progress(job.id, 5).await.unwrap();
    jobs.complete(job.id, 5, None).await.unwrap();

    let monitor = ProgressMonitor::new(Arc::new(jobs.clone()), fast_monitor());
    let events = collect(monitor.spawn(job.id).events).await;
    assert_eq!(
        events,
        [
            MonitorEvent::Progress { items_scraped: 5 },
            MonitorEvent::Finished {
                status: JobStatus::Completed,
                items_scraped: 5,
                error_message: None,
            },
        ]
    );
}

#[tokio::test]
async fn cancelled_monitor_ends_quietly() {
    let jobs = controller(Arc::new(MemoryStore::new()), &service_config());
    let job = jobs.create(ContentType::Vote, CrawlConfig::default()).await.unwrap();

    let monitor = ProgressMonitor::new(Arc::new(jobs.clone()), fast_monitor());
    let handle = monitor.spawn(job.id);
    handle.cancel.cancel();
    assert!(handle.task.await.unwrap().is_none());
    assert_eq!(jobs.get(job.id).await.unwrap().status, JobStatus::Pending);
}
