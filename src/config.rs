//! Process settings and the per-job crawl configuration.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::content_type::{ContentType, SITE_DOMAIN};
use crate::error::ConfigError;

const DEFAULT_LISTEN_ADDR: &str = "[::1]:50051";
const DEFAULT_DATABASE_URL: &str = "sqlite://scraper.db?mode=rwc";
const DEFAULT_EXECUTION_LIMIT_SECS: u64 = 140;
const DEFAULT_BATCH_SIZE: usize = 5;

/// Settings shared by every job served by this process.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub listen_addr: SocketAddr,
    pub database_url: String,
    /// Wall-clock ceiling for one job execution.
    pub execution_limit: Duration,
    pub batch_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0, 0, 0, 0, 1], 50051)),
            database_url: DEFAULT_DATABASE_URL.into(),
            execution_limit: Duration::from_secs(DEFAULT_EXECUTION_LIMIT_SECS),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ServiceConfig {
    /// Reads `SCRAPER_*` variables, honouring a `.env` file when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Ok(Self {
            listen_addr: parse_var("SCRAPER_LISTEN_ADDR", DEFAULT_LISTEN_ADDR)?,
            database_url: env::var("SCRAPER_DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.into()),
            execution_limit: Duration::from_secs(parse_var(
                "SCRAPER_EXECUTION_LIMIT_SECS",
                &DEFAULT_EXECUTION_LIMIT_SECS.to_string(),
            )?),
            batch_size: match parse_var("SCRAPER_BATCH_SIZE", &DEFAULT_BATCH_SIZE.to_string())? {
                0 => {
                    return Err(ConfigError::InvalidValue {
                        key: "SCRAPER_BATCH_SIZE",
                        value: "0".into(),
                    })
                }
                size => size,
            },
        })
    }
}

fn parse_var<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

fn default_depth() -> u32 {
    2
}
fn default_throttle_ms() -> u64 {
    1_000
}
fn default_timeout_seconds() -> u64 {
    30
}
fn default_max_items() -> u32 {
    100
}
fn default_retry_base_delay_ms() -> u64 {
    1_000
}
fn default_blocked_cooldown_ms() -> u64 {
    5_000
}

/// The per-job config blob, stored as JSON on the job row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Seed override. When absent the content type's default seeds are used.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_depth")]
    pub depth: u32,
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    /// Per-request timeout.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub save_raw_html: bool,
    #[serde(default = "default_max_items")]
    pub max_items: u32,
    #[serde(default)]
    pub respect_robots: bool,
    /// Links are only followed when they contain this substring.
    #[serde(default)]
    pub allowed_domain: Option<String>,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Extra wait after a 403 or 429 answer.
    #[serde(default = "default_blocked_cooldown_ms")]
    pub blocked_cooldown_ms: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            url: None,
            depth: default_depth(),
            throttle_ms: default_throttle_ms(),
            timeout_seconds: default_timeout_seconds(),
            save_raw_html: false,
            max_items: default_max_items(),
            respect_robots: false,
            allowed_domain: None,
            retry_base_delay_ms: default_retry_base_delay_ms(),
            blocked_cooldown_ms: default_blocked_cooldown_ms(),
        }
    }
}

impl CrawlConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.depth == 0 {
            return Err(ConfigError::InvalidCrawlConfig("depth must be at least 1".into()));
        }
        if self.max_items == 0 {
            return Err(ConfigError::InvalidCrawlConfig("max_items must be at least 1".into()));
        }
        if self.timeout_seconds == 0 {
            return Err(ConfigError::InvalidCrawlConfig(
                "timeout_seconds must be at least 1".into(),
            ));
        }
        if let Some(url) = self.seed_override() {
            match reqwest::Url::parse(url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                _ => {
                    return Err(ConfigError::InvalidCrawlConfig(format!(
                        "url is not an absolute http(s) address: {url}"
                    )))
                }
            }
        }
        Ok(())
    }

    fn seed_override(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|url| !url.is_empty())
    }

    /// Seeds for the crawl: the override if present, else the type's defaults.
    pub fn seeds(&self, content_type: ContentType) -> Vec<String> {
        match self.seed_override() {
            Some(url) => vec![url.to_string()],
            None => content_type.default_seeds(),
        }
    }

    pub fn domain_filter(&self) -> &str {
        self.allowed_domain.as_deref().unwrap_or(SITE_DOMAIN)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}
