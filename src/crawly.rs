//! The `Crawly` engine walks the site breadth first, one URL at a time, and hands
//! extracted records to the job in small batches.
//! It throttles every request and stops cooperatively when the job is cancelled.

use std::collections::HashSet;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use tokio::time::sleep;

use crate::config::CrawlConfig;
use crate::content_type::{ContentType, SITE_DOMAIN};
use crate::error::{FetchResult, StoreError};
use crate::extractor::{discover_links, Extractor, PageExtraction, ParsedPage};
use crate::fetcher::Fetcher;
use crate::models::Record;
use crate::robots::RobotsRules;

// Default configuration constants.
const MAX_DEPTH: u32 = 2;
const MAX_ITEMS: usize = 100;
const BATCH_SIZE: usize = 5;
const THROTTLE_MILLIS: u64 = 1_000;

/// The job a crawl runs on behalf of.
#[async_trait]
pub trait JobSink: Send + Sync {
    /// Whether the job is still pending or running. Consulted before every fetch.
    async fn is_active(&self) -> bool;

    /// Durably writes one batch of records.
    async fn flush(&self, records: &[Record]) -> Result<(), StoreError>;

    /// Publishes the number of distinct records collected so far.
    async fn progress(&self, items_scraped: u64);

    /// Resolves once the crawl must end without waiting for the current fetch.
    async fn abandoned(&self) {
        std::future::pending().await
    }
}

/// A URL that could not be fetched or parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedUrl {
    pub url: String,
    pub error: String,
}

/// Result of one crawl invocation.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub records: Vec<Record>,
    pub failures: Vec<FailedUrl>,
    /// The job stopped being active before the crawl finished.
    pub stopped: bool,
    pub pages_fetched: usize,
    /// Pages re-extracted from raw markup after the structured pass found nothing.
    pub fallback_pages: usize,
}

/// Configuration parameters for the `Crawler`.
/// Defines bounds and behaviors for the crawling process.
#[derive(Debug, Clone)]
struct CrawlerConfig {
    content_type: ContentType,
    max_depth: u32,
    max_items: usize,
    batch_size: usize,
    throttle: Duration,
    domain: String,
    save_raw_html: bool,
    robots: bool,
    fetch: CrawlConfig,
}

impl CrawlerConfig {
    fn new(content_type: ContentType) -> Self {
        Self {
            content_type,
            max_depth: MAX_DEPTH,
            max_items: MAX_ITEMS,
            batch_size: BATCH_SIZE,
            throttle: Duration::from_millis(THROTTLE_MILLIS),
            domain: SITE_DOMAIN.into(),
            save_raw_html: false,
            robots: false,
            fetch: CrawlConfig::default(),
        }
    }
}

/// Builder pattern for `Crawler`. Allows for customizable configurations.
pub struct CrawlerBuilder {
    config: CrawlerConfig,
}

impl CrawlerBuilder {
    /// Initializes a new builder with default configuration.
    pub fn new(content_type: ContentType) -> Self {
        CrawlerBuilder {
            config: CrawlerConfig::new(content_type),
        }
    }

    /// Initializes a builder from a job's config blob.
    pub fn from_crawl_config(content_type: ContentType, config: &CrawlConfig) -> Self {
        Self::new(content_type)
            .with_max_depth(config.depth)
            .with_max_items(config.max_items as usize)
            .with_throttle(config.throttle())
            .with_domain(config.domain_filter())
            .with_raw_html(config.save_raw_html)
            .with_robots(config.respect_robots)
            .with_fetch_config(config.clone())
    }

    /// Number of breadth-first levels to process.
    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.config.max_depth = depth;
        self
    }

    /// Stop once this many distinct records are collected.
    pub fn with_max_items(mut self, items: usize) -> Self {
        self.config.max_items = items;
        self
    }

    /// Records are flushed whenever this many are pending.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size.max(1);
        self
    }

    /// Delay inserted before every fetch.
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.config.throttle = throttle;
        self
    }

    /// Only follow links containing `domain`.
    pub fn with_domain<S: AsRef<str>>(mut self, domain: S) -> Self {
        self.config.domain = domain.as_ref().into();
        self
    }

    /// Keep the fetched markup on page-level records.
    pub fn with_raw_html(mut self, save: bool) -> Self {
        self.config.save_raw_html = save;
        self
    }

    /// Enable or disable `robots.txt` handling
    pub fn with_robots(mut self, robots: bool) -> Self {
        self.config.robots = robots;
        self
    }

    /// Timeouts and retry delays for the fetcher.
    pub fn with_fetch_config(mut self, config: CrawlConfig) -> Self {
        self.config.fetch = config;
        self
    }

    /// Consumes the builder and returns a configured `Crawler` instance.
    pub fn build(self) -> FetchResult<Crawler> {
        Crawler::from_config(self.config)
    }
}

/// Main structure for the `Crawler`.
pub struct Crawler {
    config: CrawlerConfig,
    fetcher: Fetcher,
    extractor: Extractor,
}

/// Everything one crawl accumulates; dropped when the crawl returns.
#[derive(Default)]
struct CrawlState {
    visited: HashSet<String>,
    /// Keyed by URL so profile pages replace their list-phase record.
    output: IndexMap<String, Record>,
    batch: Vec<Record>,
    failures: Vec<FailedUrl>,
    /// Markup of every successful fetch, kept for the fallback pass.
    fetched: Vec<(String, String)>,
    fallback_pages: usize,
}

impl Crawler {
    fn from_config(config: CrawlerConfig) -> FetchResult<Self> {
        Ok(Self {
            fetcher: Fetcher::from_config(&config.fetch)?,
            extractor: Extractor::new(config.content_type, config.save_raw_html),
            config,
        })
    }

    /// Crawls from `seeds` until every level is processed, the item cap is
    /// reached or the job stops being active.
    #[tracing::instrument(skip(self, sink), fields(content_type = %self.config.content_type))]
    pub async fn start<S: AsRef<str> + Debug>(&self, seeds: &[S], sink: &dyn JobSink) -> CrawlOutcome {
        let mut state = CrawlState::default();
        let mut stopped = false;

        let robots = match seeds.first() {
            Some(seed) if self.config.robots => RobotsRules::fetch(&self.fetcher, seed.as_ref()).await,
            _ => RobotsRules::allow_all(),
        };

        let mut frontier: Vec<String> = seeds
            .iter()
            .map(|seed| seed.as_ref().to_string())
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();

        'levels: for depth in 0..self.config.max_depth {
            let last_level = depth + 1 >= self.config.max_depth;
            let mut next: IndexSet<String> = IndexSet::new();

            for url in frontier {
                if !state.visited.insert(url.clone()) {
                    continue;
                }
                if !sink.is_active().await {
                    tracing::info!("Job is no longer active, stopping {{ url: {url}, depth: {depth} }}");
                    stopped = true;
                    break 'levels;
                }
                if state.output.len() >= self.config.max_items {
                    tracing::info!(
                        "Reached the limit {{ depth: {depth}, items: {} }}.",
                        state.output.len()
                    );
                    break 'levels;
                }
                if !robots.allows(&url) {
                    tracing::debug!("Disallowed by robots.txt, skipping {{ url: {url} }}");
                    continue;
                }

                let fetched = tokio::select! {
                    fetched = async {
                        sleep(self.config.throttle).await;
                        self.fetcher.fetch_page(&url).await
                    } => fetched,
                    _ = sink.abandoned() => {
                        tracing::warn!("Crawl abandoned mid-fetch {{ url: {url}, depth: {depth} }}");
                        stopped = true;
                        break 'levels;
                    }
                };

                let page = match fetched {
                    Ok(page) => {
                        tracing::debug!(
                            "Fetched page {{ url: {}, status: {} }}",
                            page.url,
                            page.status
                        );
                        page
                    }
                    Err(error) => {
                        tracing::warn!("Failed to fetch {{ url: {url}, error: {error} }}");
                        state.failures.push(FailedUrl {
                            url,
                            error: error.to_string(),
                        });
                        continue;
                    }
                };

                let known = state.output.get(&url);
                let enriches = known.is_some();
                let (extraction, links) = self.extract_page(&page.html, &url, known);
                state.fetched.push((url.clone(), page.html));

                if !last_level {
                    next.extend(
                        links
                            .into_iter()
                            .chain(extraction.follow_up.iter().cloned())
                            .filter(|link| !state.visited.contains(link)),
                    );
                }
                self.collect(extraction, enriches, &mut state, sink).await;

                tracing::debug!("Finished crawling URL {{ url: {url}, depth: {depth} }}");
            }

            if next.is_empty() {
                break;
            }
            tracing::debug!(
                "Found other sub-URLs {{ depth: {}, len: {} }}",
                depth + 1,
                next.len()
            );
            frontier = next.into_iter().collect();
        }

        if !stopped && state.output.is_empty() && !state.fetched.is_empty() {
            self.fallback_pass(&mut state, sink).await;
        }

        self.flush(&mut state.batch, sink).await;

        tracing::info!(
            "Finished crawl {{ items: {}, pages: {}, failed: {}, stopped: {stopped} }}",
            state.output.len(),
            state.fetched.len(),
            state.failures.len()
        );

        CrawlOutcome {
            pages_fetched: state.fetched.len(),
            fallback_pages: state.fallback_pages,
            records: state.output.into_values().collect(),
            failures: state.failures,
            stopped,
        }
    }

    /// Parses and extracts one page. The parsed document never outlives this call.
    fn extract_page(
        &self,
        html: &str,
        url: &str,
        known: Option<&Record>,
    ) -> (PageExtraction, Vec<String>) {
        let page = ParsedPage::parse(html);
        let extraction = self.extractor.extract(&page, html, url, known);
        let links = discover_links(&page, url, &self.config.domain);
        (extraction, links)
    }

    /// Re-extracts every fetched page from its raw markup.
    async fn fallback_pass(&self, state: &mut CrawlState, sink: &dyn JobSink) {
        tracing::info!(
            "Structured extraction found nothing, retrying raw markup {{ pages: {} }}",
            state.fetched.len()
        );
        let fetched = std::mem::take(&mut state.fetched);
        for (url, html) in &fetched {
            let known = state.output.get(url);
            let enriches = known.is_some();
            let extraction = self
                .extractor
                .extract(&ParsedPage::raw(html.as_str()), html, url, known);
            state.fallback_pages += 1;
            self.collect(extraction, enriches, state, sink).await;
        }
        state.fetched = fetched;
    }

    /// Adds extracted records to the output and the pending batch.
    ///
    /// Only an enrichment of a known record may replace an earlier one; any other
    /// record for a URL already in the output is ignored.
    async fn collect(
        &self,
        extraction: PageExtraction,
        enriches: bool,
        state: &mut CrawlState,
        sink: &dyn JobSink,
    ) {
        let mut accepted = false;
        for record in extraction.records {
            if !record.has_absolute_url() {
                tracing::debug!("Dropping record without absolute URL {{ url: {} }}", record.url);
                continue;
            }
            let replaces = state.output.contains_key(&record.url);
            if replaces && !enriches {
                tracing::debug!("Keeping earlier record {{ url: {} }}", record.url);
                continue;
            }
            if !replaces && state.output.len() >= self.config.max_items {
                continue;
            }
            state.output.insert(record.url.clone(), record.clone());
            state.batch.push(record);
            accepted = true;

            if state.batch.len() >= self.config.batch_size {
                self.flush(&mut state.batch, sink).await;
            }
        }
        if accepted {
            sink.progress(state.output.len() as u64).await;
        }
    }

    /// Writes the pending batch. A failed write is logged and the batch dropped.
    async fn flush(&self, batch: &mut Vec<Record>, sink: &dyn JobSink) {
        if batch.is_empty() {
            return;
        }
        let records = std::mem::take(batch);
        match sink.flush(&records).await {
            Ok(()) => tracing::debug!("Flushed batch {{ records: {} }}", records.len()),
            Err(error) => tracing::error!(
                "Failed to persist batch {{ records: {}, error: {error} }}",
                records.len()
            ),
        }
    }
}
