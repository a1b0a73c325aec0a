//! Optional `robots.txt` check, enabled per job with `respect_robots`.

use reqwest::Url;
use robotstxt::DefaultMatcher;

use crate::fetcher::Fetcher;

const ROBOTS_AGENT: &str = "*";

/// Rules for one host, fetched once per crawl.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    content: Option<String>,
}

impl RobotsRules {
    /// Rules that allow everything.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
        }
    }

    /// Fetches `robots.txt` for the host of `seed`. A missing or unreadable
    /// file allows everything.
    pub async fn fetch(fetcher: &Fetcher, seed: &str) -> Self {
        let Some(robots_url) = Url::parse(seed)
            .ok()
            .filter(|url| url.has_host())
            .map(|url| format!("{}/robots.txt", url.origin().ascii_serialization()))
        else {
            return Self::allow_all();
        };

        match fetcher.fetch_page(&robots_url).await {
            Ok(page) => {
                tracing::debug!("Fetched robots.txt {{ url: {robots_url} }}");
                Self::from_content(page.html)
            }
            Err(error) => {
                tracing::debug!("No usable robots.txt {{ url: {robots_url}, error: {error} }}");
                Self::allow_all()
            }
        }
    }

    pub fn allows(&self, url: &str) -> bool {
        match &self.content {
            Some(content) => {
                DefaultMatcher::default().one_agent_allowed_by_robots(content, ROBOTS_AGENT, url)
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disallowed_paths_are_blocked() {
        let rules = RobotsRules::from_content("User-agent: *\nDisallow: /altext/\n");
        assert!(!rules.allows("https://www.althingi.is/altext/raedur/"));
        assert!(rules.allows("https://www.althingi.is/thingmenn/"));
    }

    #[test]
    fn missing_rules_allow_everything() {
        assert!(RobotsRules::allow_all().allows("https://www.althingi.is/altext/"));
    }
}
