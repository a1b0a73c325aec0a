#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use parliament_scraper::config::CrawlConfig;
use parliament_scraper::crawly::JobSink;
use parliament_scraper::error::StoreError;
use parliament_scraper::Record;

pub const LOCAL_DOMAIN: &str = "127.0.0.1";

/// A crawl config that never waits and stays on the mock server.
pub fn local_config(seed: &str) -> CrawlConfig {
    CrawlConfig {
        url: Some(seed.to_string()),
        throttle_ms: 0,
        timeout_seconds: 5,
        allowed_domain: Some(LOCAL_DOMAIN.into()),
        retry_base_delay_ms: 1,
        blocked_cooldown_ms: 1,
        ..CrawlConfig::default()
    }
}

pub fn page(title: &str, body: &str, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!(r#"<a href="{href}">link</a>"#))
        .collect();
    format!(
        "<html><head><title>{title}</title></head><body><h1>{title}</h1><article>{body}</article><nav>{anchors}</nav></body></html>"
    )
}

pub fn html(body: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.into(), "text/html; charset=utf-8")
}

/// Serves `body` at `route`, expecting exactly `hits` requests.
pub async fn serve(server: &MockServer, route: &str, body: String, hits: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(html(body))
        .expect(hits)
        .mount(server)
        .await;
}

/// Sink that records what the crawler hands it.
#[derive(Default)]
pub struct RecordingSink {
    pub batches: Mutex<Vec<usize>>,
    pub progress: Mutex<Vec<u64>>,
    pub flushed: Mutex<Vec<Record>>,
    liveness_checks: AtomicUsize,
    /// Reports inactive once this many checks have passed.
    active_for: Option<usize>,
    fail_flushes: bool,
    /// Cancelling this abandons the crawl, even mid-fetch.
    pub abandon: CancellationToken,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stopping_after(checks: usize) -> Self {
        Self {
            active_for: Some(checks),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_flushes: true,
            ..Self::default()
        }
    }

    pub fn batches(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }

    pub fn progress(&self) -> Vec<u64> {
        self.progress.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobSink for RecordingSink {
    async fn is_active(&self) -> bool {
        let checks = self.liveness_checks.fetch_add(1, Ordering::SeqCst);
        self.active_for.map_or(true, |limit| checks < limit)
    }

    async fn flush(&self, records: &[Record]) -> Result<(), StoreError> {
        self.batches.lock().unwrap().push(records.len());
        if self.fail_flushes {
            return Err(StoreError::Decode {
                column: "records",
                reason: "disk full".into(),
            });
        }
        self.flushed.lock().unwrap().extend_from_slice(records);
        Ok(())
    }

    async fn progress(&self, items_scraped: u64) {
        self.progress.lock().unwrap().push(items_scraped);
    }

    async fn abandoned(&self) {
        self.abandon.cancelled().await
    }
}
