//! HTTP GET with rotating user agents and exponential-backoff retries.

use std::time::Duration;

use rand::seq::SliceRandom;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONTENT_TYPE, PRAGMA, REFERER,
    USER_AGENT,
};
use reqwest::{Client, Response, StatusCode, Url};
use tokio::time::sleep;

pub use mime::Mime;

use crate::config::CrawlConfig;
use crate::error::{FetchError, FetchResult};

pub const MAX_ATTEMPTS: u32 = 3;

const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_LANGUAGES: &str = "is-IS,is;q=0.9,en-US;q=0.8,en;q=0.7";

/// A successfully fetched HTML page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: StatusCode,
    pub html: String,
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    timeout: Duration,
    retry_base_delay: Duration,
    blocked_cooldown: Duration,
}

impl Fetcher {
    pub fn from_config(config: &CrawlConfig) -> FetchResult<Self> {
        Ok(Self {
            client: Client::builder().build().map_err(FetchError::Client)?,
            timeout: config.request_timeout(),
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            blocked_cooldown: Duration::from_millis(config.blocked_cooldown_ms),
        })
    }

    /// `delay * 2^attempt`, with `attempt` counted from zero.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// GETs `url`, retrying failed attempts.
    ///
    /// A non-2xx answer on the final attempt is returned as the response rather
    /// than as an error; transport failures on the final attempt are errors.
    #[tracing::instrument(skip(self))]
    pub async fn fetch(&self, url: &str) -> FetchResult<Response> {
        let headers = self.headers(url);
        let mut attempt = 0;

        loop {
            let last_attempt = attempt + 1 >= MAX_ATTEMPTS;
            let result = self
                .client
                .get(url)
                .headers(headers.clone())
                .timeout(self.timeout)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if last_attempt => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    tracing::warn!("Unsuccessful response {{ url: {url}, status: {status}, attempt: {attempt} }}");
                    if matches!(status, StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS) {
                        tracing::debug!("Cooling down for {:?} after {status}", self.blocked_cooldown);
                        sleep(self.blocked_cooldown).await;
                    }
                }
                Err(error) => {
                    let error = classify(url, error);
                    if last_attempt {
                        return Err(error);
                    }
                    tracing::warn!("Request failed {{ url: {url}, attempt: {attempt}, error: {error} }}");
                }
            }

            sleep(self.retry_delay(attempt)).await;
            attempt += 1;
        }
    }

    /// Fetches `url` and returns its body if it is a successful HTML answer.
    pub async fn fetch_page(&self, url: &str) -> FetchResult<FetchedPage> {
        let response = self.fetch(url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let declared = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<Mime>().ok());
        if let Some(mime) = &declared {
            if !is_markup(mime) {
                return Err(FetchError::Unparseable {
                    url: url.to_string(),
                    reason: format!("content type {mime}"),
                });
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|error| classify(url, error))?;
        if let Some(kind) = infer::get(&bytes) {
            if kind.matcher_type() != infer::MatcherType::Text {
                return Err(FetchError::Unparseable {
                    url: url.to_string(),
                    reason: format!("body sniffed as {}", kind.mime_type()),
                });
            }
        }

        Ok(FetchedPage {
            url: url.to_string(),
            status,
            html: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    /// Headers sent on every attempt of one fetch.
    fn headers(&self, url: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);
        headers.insert(USER_AGENT, HeaderValue::from_static(agent));
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGES));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        if let Some(referer) = Url::parse(url)
            .ok()
            .and_then(|url| HeaderValue::from_str(&format!("{}/", url.origin().ascii_serialization())).ok())
        {
            headers.insert(REFERER, referer);
        }
        headers
    }
}

fn is_markup(mime: &Mime) -> bool {
    mime.type_() == mime::TEXT
        || (mime.type_() == mime::APPLICATION && mime.subtype().as_str().contains("xml"))
}

fn classify(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout { url: url.to_string() }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            source: error,
        }
    }
}
