use std::sync::LazyLock;

use indexmap::IndexSet;
use regex::Regex;
use scraper::Selector;

use super::ParsedPage;
use crate::normalize::{is_on_site, normalize_url};

static HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#).expect("href pattern"));

const SKIPPED_PREFIXES: [&str; 4] = ["#", "javascript:", "mailto:", "tel:"];

/// Same-site links on `page`, normalized against `base_url`, in document order
/// and without duplicates.
pub fn discover_links(page: &ParsedPage, base_url: &str, domain: &str) -> Vec<String> {
    let hrefs: Vec<String> = match page {
        ParsedPage::Structured(document) => match Selector::parse("a[href]") {
            Ok(selector) => document
                .select(&selector)
                .filter_map(|element| element.value().attr("href").map(str::to_string))
                .collect(),
            Err(error) => {
                tracing::warn!("Invalid anchor selector {{ error: {error:?} }}");
                Vec::new()
            }
        },
        ParsedPage::RawOnly(html) => HREF
            .captures_iter(html)
            .map(|captures| captures[1].to_string())
            .collect(),
    };

    hrefs
        .iter()
        .map(|href| href.trim())
        .filter(|href| {
            !href.is_empty()
                && !SKIPPED_PREFIXES
                    .iter()
                    .any(|prefix| href.to_ascii_lowercase().starts_with(prefix))
        })
        .map(|href| normalize_url(href, base_url))
        .filter(|url| is_on_site(url, domain))
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"<html><body>
        <a href="/thingmenn/">Þingmenn</a>
        <a href="raedur/1">Ræða</a>
        <a href="https://www.facebook.com/althingi">Facebook</a>
        <a href="#top">Efst</a>
        <a href="mailto:althingi@althingi.is">Póstur</a>
        <a href="/thingmenn/">Aftur</a>
        <a>Enginn tengill</a>
    </body></html>"##;

    #[test]
    fn keeps_same_site_links_once() {
        let links = discover_links(&ParsedPage::parse(PAGE), "https://www.althingi.is/altext/", "althingi.is");
        assert_eq!(
            links,
            vec![
                "https://www.althingi.is/thingmenn/".to_string(),
                "https://www.althingi.is/altext/raedur/1".to_string(),
            ]
        );
    }

    #[test]
    fn raw_pages_yield_the_same_links() {
        let structured = discover_links(&ParsedPage::parse(PAGE), "https://www.althingi.is/altext/", "althingi.is");
        let raw = discover_links(&ParsedPage::raw(PAGE), "https://www.althingi.is/altext/", "althingi.is");
        assert_eq!(structured, raw);
    }
}
