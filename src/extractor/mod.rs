//! Turns fetched pages into typed records.
//!
//! Pages are extracted either from a parsed document ([`ParsedPage::Structured`])
//! or, as the error-recovery path, from the raw markup with pattern matching
//! ([`ParsedPage::RawOnly`]). Person pages are handled in two phases: the member
//! list yields one record per row plus a profile URL to fetch next, and the
//! profile page enriches the record emitted for that URL.

mod fallback;
mod generic;
mod links;
mod person;

use scraper::{ElementRef, Html, Selector};

pub use links::discover_links;

use crate::content_type::ContentType;
use crate::models::Record;

/// A fetched page, either parsed into a document or kept as raw markup.
pub enum ParsedPage {
    Structured(Html),
    RawOnly(String),
}

impl ParsedPage {
    pub fn parse(html: &str) -> Self {
        ParsedPage::Structured(Html::parse_document(html))
    }

    pub fn raw(html: impl Into<String>) -> Self {
        ParsedPage::RawOnly(html.into())
    }
}

/// What one page produced.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PageExtraction {
    /// New records, or a replacement for an earlier record with the same URL.
    pub records: Vec<Record>,
    /// Pages that must be fetched at the next depth to complete the records.
    pub follow_up: Vec<String>,
}

impl PageExtraction {
    fn single(record: Record) -> Self {
        Self {
            records: vec![record],
            follow_up: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Extractor {
    content_type: ContentType,
    save_raw_html: bool,
}

impl Extractor {
    pub fn new(content_type: ContentType, save_raw_html: bool) -> Self {
        Self {
            content_type,
            save_raw_html,
        }
    }

    /// Extracts records from `page`, fetched from `url`.
    ///
    /// `known` is the record previously emitted for `url`, if any; for person
    /// crawls it selects the profile phase.
    pub fn extract(
        &self,
        page: &ParsedPage,
        html: &str,
        url: &str,
        known: Option<&Record>,
    ) -> PageExtraction {
        let mut extraction = match (page, self.content_type.is_person(), known) {
            (ParsedPage::Structured(document), true, Some(base)) => {
                PageExtraction::single(person::profile(document, url, base))
            }
            (ParsedPage::Structured(document), true, None) => person::list(document, url),
            (ParsedPage::Structured(document), false, _) => {
                PageExtraction::single(generic::extract(document, self.content_type, url))
            }
            (ParsedPage::RawOnly(raw), true, Some(base)) => {
                PageExtraction::single(fallback::person_profile(raw, url, base))
            }
            (ParsedPage::RawOnly(raw), true, None) => fallback::person_list(raw, url),
            (ParsedPage::RawOnly(raw), false, _) => {
                PageExtraction::single(fallback::generic(raw, self.content_type, url))
            }
        };

        // List rows share one page; only page-level records keep the markup.
        let page_level = !self.content_type.is_person() || known.is_some();
        if self.save_raw_html && page_level {
            for record in &mut extraction.records {
                record.raw_html = Some(html.to_string());
            }
        }
        extraction
    }
}

/// Collapses the text content of an element into single-spaced words.
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses each pattern in turn, skipping any that are not valid CSS.
pub(crate) fn selectors<'a>(patterns: &'a [&'a str]) -> impl Iterator<Item = Selector> + 'a {
    patterns.iter().filter_map(|pattern| match Selector::parse(pattern) {
        Ok(selector) => Some(selector),
        Err(error) => {
            tracing::warn!("Invalid selector {{ pattern: {pattern}, error: {error:?} }}");
            None
        }
    })
}

/// Text of the first element matched by the first pattern that matches
/// anything non-empty.
pub(crate) fn first_text(document: &Html, patterns: &[&str]) -> Option<String> {
    selectors(patterns).find_map(|selector| {
        document
            .select(&selector)
            .map(element_text)
            .find(|text| !text.is_empty())
    })
}
