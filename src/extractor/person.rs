use scraper::{ElementRef, Html, Selector};

use super::{element_text, first_text, selectors, PageExtraction};
use crate::content_type::ContentType;
use crate::models::Record;
use crate::normalize::normalize_url;

pub(super) const MIN_CELLS: usize = 4;
pub(super) const MIN_BIO_CHARS: usize = 100;
pub(super) const SOCIAL_SITES: [&str; 3] = ["facebook", "twitter", "instagram"];

const NAME_CELL: usize = 0;
const POSITION_CELL: usize = 1;
const CONSTITUENCY_CELL: usize = 2;
const PARTY_CELL: usize = 3;

const IMAGE_PATTERNS: &[&str] = &[
    ".person-image img",
    ".profile-image img",
    ".thingmadur img",
    "img.mynd",
    "main img",
];
const BIO_PATTERNS: &[&str] = &[".bio", ".biography", ".ferill", "#bio"];

/// Fields read from one member-list row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ListRow {
    pub name: String,
    pub href: String,
    pub position: String,
    pub constituency: String,
    pub party: String,
}

impl ListRow {
    pub(super) fn into_record(self, page_url: &str) -> Record {
        let profile_url = normalize_url(&self.href, page_url);
        let mut record = Record::new(ContentType::Mp, self.name, profile_url.clone());
        let metadata = record.metadata_mut();
        metadata.position = non_empty(self.position);
        metadata.constituency = non_empty(self.constituency);
        metadata.party = non_empty(self.party);
        metadata.profile_url = Some(profile_url);
        record
    }
}

pub(super) fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

pub(super) fn rows_into_extraction(rows: Vec<ListRow>, page_url: &str) -> PageExtraction {
    let records: Vec<Record> = rows.into_iter().map(|row| row.into_record(page_url)).collect();
    let follow_up = records.iter().map(|record| record.url.clone()).collect();
    PageExtraction { records, follow_up }
}

/// List phase: one record per table row with a name link and enough cells.
pub(super) fn list(document: &Html, url: &str) -> PageExtraction {
    let (Ok(table), Ok(row), Ok(cell), Ok(link)) = (
        Selector::parse("table"),
        Selector::parse("tr"),
        Selector::parse("td"),
        Selector::parse("a[href]"),
    ) else {
        return PageExtraction::default();
    };

    let mut rows = Vec::new();
    for table in document.select(&table) {
        // The first row of every table is its header.
        for tr in table.select(&row).skip(1) {
            let cells: Vec<ElementRef<'_>> = tr.select(&cell).collect();
            if cells.len() < MIN_CELLS {
                continue;
            }
            let Some(anchor) = cells[NAME_CELL].select(&link).next() else {
                continue;
            };
            let name = element_text(anchor);
            let href = anchor.value().attr("href").unwrap_or_default().trim();
            if name.is_empty() || href.is_empty() {
                continue;
            }
            rows.push(ListRow {
                name,
                href: href.to_string(),
                position: element_text(cells[POSITION_CELL]),
                constituency: element_text(cells[CONSTITUENCY_CELL]),
                party: element_text(cells[PARTY_CELL]),
            });
        }
    }

    tracing::debug!("Member list rows found {{ url: {url}, rows: {} }}", rows.len());
    rows_into_extraction(rows, url)
}

/// Profile phase: enriches the list record emitted for `url`.
pub(super) fn profile(document: &Html, url: &str, base: &Record) -> Record {
    let mut record = base.clone();
    record.scraped_at = chrono::Utc::now();

    let image = selectors(IMAGE_PATTERNS).find_map(|selector| {
        document
            .select(&selector)
            .find_map(|img| img.value().attr("src"))
            .map(|src| normalize_url(src, url))
    });
    let email = Selector::parse(r#"a[href^="mailto:"]"#).ok().and_then(|selector| {
        document
            .select(&selector)
            .find_map(|anchor| anchor.value().attr("href").and_then(mailto_address))
    });
    let bio = first_text(document, BIO_PATTERNS).or_else(|| {
        Selector::parse("p").ok().and_then(|selector| {
            document
                .select(&selector)
                .map(element_text)
                .find(|text| text.chars().count() > MIN_BIO_CHARS)
        })
    });
    let social_links: Vec<String> = Selector::parse("a[href]")
        .map(|selector| {
            document
                .select(&selector)
                .filter_map(|anchor| anchor.value().attr("href"))
                .filter(|href| is_social(href))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    apply_profile(&mut record, image, email, bio, social_links);
    record
}

pub(super) fn apply_profile(
    record: &mut Record,
    image: Option<String>,
    email: Option<String>,
    bio: Option<String>,
    social_links: Vec<String>,
) {
    if bio.is_some() {
        record.content = bio;
    }
    let metadata = record.metadata_mut();
    if image.is_some() {
        metadata.image_url = image;
    }
    if email.is_some() {
        metadata.email = email;
    }
    for link in social_links {
        if !metadata.social_links.contains(&link) {
            metadata.social_links.push(link);
        }
    }
}

pub(super) fn mailto_address(href: &str) -> Option<String> {
    let address = href.trim().strip_prefix("mailto:")?;
    let address = address.split('?').next().unwrap_or_default().trim();
    non_empty(address.to_string())
}

pub(super) fn is_social(href: &str) -> bool {
    let href = href.to_ascii_lowercase();
    SOCIAL_SITES.iter().any(|site| href.contains(site))
}
