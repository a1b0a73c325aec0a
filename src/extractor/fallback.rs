//! Pattern-matching extraction over raw markup, used when document queries
//! find nothing. Less precise, but it tolerates markup the parser mangles.

use std::sync::LazyLock;

use regex::Regex;

use super::generic::synthesized_title;
use super::person::{
    apply_profile, is_social, mailto_address, non_empty, rows_into_extraction, ListRow, MIN_BIO_CHARS,
    MIN_CELLS,
};
use super::{collapse_whitespace, PageExtraction};
use crate::content_type::ContentType;
use crate::models::Record;
use crate::normalize::normalize_url;

static TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<table\b[^>]*>(.*?)</table>").expect("table pattern"));
static ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").expect("row pattern"));
static CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<td\b[^>]*>(.*?)</td>").expect("cell pattern"));
static ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*?href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#).expect("anchor pattern")
});
static IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<img\b[^>]*?src\s*=\s*["']([^"']+)["']"#).expect("image pattern")
});
static PARAGRAPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<p\b[^>]*>(.*?)</p>").expect("paragraph pattern"));
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h1\b[^>]*>(.*?)</h1>").expect("heading pattern"));
static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title\b[^>]*>(.*?)</title>").expect("title pattern"));
static MAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(article|main)\b[^>]*>(.*?)</(?:article|main)>").expect("main pattern")
});
static SCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(?:script|style)>").expect("script pattern")
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern"));

/// Strips tags and common entities from a markup fragment.
fn text_of(fragment: &str) -> String {
    let without_scripts = SCRIPT.replace_all(fragment, " ");
    let text = TAG.replace_all(&without_scripts, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    collapse_whitespace(&text)
}

pub(super) fn person_list(html: &str, url: &str) -> PageExtraction {
    let mut rows = Vec::new();
    for table in TABLE.captures_iter(html) {
        for row in ROW.captures_iter(&table[1]).skip(1) {
            let cells: Vec<&str> = CELL
                .captures_iter(&row[1])
                .filter_map(|cell| cell.get(1).map(|m| m.as_str()))
                .collect();
            if cells.len() < MIN_CELLS {
                continue;
            }
            let Some(anchor) = ANCHOR.captures(cells[0]) else {
                continue;
            };
            let name = text_of(&anchor[2]);
            let href = anchor[1].trim().to_string();
            if name.is_empty() || href.is_empty() {
                continue;
            }
            rows.push(ListRow {
                name,
                href,
                position: text_of(cells[1]),
                constituency: text_of(cells[2]),
                party: text_of(cells[3]),
            });
        }
    }
    tracing::debug!("Fallback member rows found {{ url: {url}, rows: {} }}", rows.len());
    rows_into_extraction(rows, url)
}

pub(super) fn person_profile(html: &str, url: &str, base: &Record) -> Record {
    let mut record = base.clone();
    record.scraped_at = chrono::Utc::now();

    let image = IMAGE
        .captures(html)
        .map(|image| normalize_url(&image[1], url));
    let email = ANCHOR
        .captures_iter(html)
        .find_map(|anchor| mailto_address(&anchor[1]));
    let bio = PARAGRAPH
        .captures_iter(html)
        .map(|paragraph| text_of(&paragraph[1]))
        .find(|text| text.chars().count() > MIN_BIO_CHARS);
    let social_links = ANCHOR
        .captures_iter(html)
        .map(|anchor| anchor[1].to_string())
        .filter(|href| is_social(href))
        .collect();

    apply_profile(&mut record, image, email, bio, social_links);
    record
}

pub(super) fn generic(html: &str, content_type: ContentType, url: &str) -> Record {
    let title = [&*HEADING, &*TITLE]
        .into_iter()
        .find_map(|pattern| {
            pattern
                .captures(html)
                .and_then(|captures| non_empty(text_of(&captures[1])))
        })
        .unwrap_or_else(|| synthesized_title(content_type, url));
    let body = MAIN
        .captures(html)
        .and_then(|captures| non_empty(text_of(&captures[2])))
        .unwrap_or_else(|| {
            PARAGRAPH
                .captures_iter(html)
                .map(|paragraph| text_of(&paragraph[1]))
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join("\n\n")
        });

    let mut record = Record::new(content_type, title, url);
    record.content = Some(body);
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_URL: &str = "https://www.althingi.is/thingmenn/";

    #[test]
    fn list_rows_from_raw_markup() {
        let html = r#"<TABLE class="x"><tr><th>Nafn</th></tr>
            <tr><td><a class="n" href="/cv/1">Anna&nbsp;Jónsdóttir</a></td><td>AJ</td><td>Reykjavík</td><td><b>Flokkur</b> A</td></tr>
            <tr><td>Enginn</td><td>EE</td><td>Suður</td><td>C</td></tr>
            <tr><td><a href='/cv/2'>Bjarni</a></td><td>BS</td><td>Norður</td><td>B</td></tr>
        </TABLE>"#;
        let extraction = person_list(html, LIST_URL);
        assert_eq!(extraction.records.len(), 2);
        assert_eq!(extraction.records[0].title, "Anna Jónsdóttir");
        assert_eq!(extraction.records[0].url, "https://www.althingi.is/cv/1");
        let metadata = extraction.records[0].metadata.as_ref().unwrap();
        assert_eq!(metadata.party.as_deref(), Some("Flokkur A"));
        assert_eq!(extraction.records[1].url, "https://www.althingi.is/cv/2");
    }

    #[test]
    fn profile_from_raw_markup() {
        let base = Record::new(ContentType::Mp, "Anna", "https://www.althingi.is/cv/1");
        let bio = "x".repeat(120);
        let html = format!(
            r#"<img alt="" src="/myndir/1.jpg"><p>stutt</p><p>{bio}</p>
               <a href="mailto:anna@althingi.is">póstur</a><a href="https://instagram.com/anna">ig</a>"#
        );
        let record = person_profile(&html, &base.url, &base);
        let metadata = record.metadata.unwrap();
        assert_eq!(record.content.as_deref(), Some(bio.as_str()));
        assert_eq!(metadata.email.as_deref(), Some("anna@althingi.is"));
        assert_eq!(metadata.image_url.as_deref(), Some("https://www.althingi.is/myndir/1.jpg"));
        assert_eq!(metadata.social_links, vec!["https://instagram.com/anna".to_string()]);
    }

    #[test]
    fn generic_prefers_heading_then_title() {
        let html = "<title>Alþingi</title><h1> Þingmál <i>12</i></h1><p>Fyrsta.</p><p>Önnur.</p><script>var x;</script>";
        let record = generic(html, ContentType::Issue, "https://www.althingi.is/mal/12");
        assert_eq!(record.title, "Þingmál 12");
        assert_eq!(record.content.as_deref(), Some("Fyrsta.\n\nÖnnur."));

        let record = generic("<div></div>", ContentType::Issue, "https://www.althingi.is/mal/12");
        assert_eq!(record.title, "Issue from https://www.althingi.is/mal/12");
    }
}
