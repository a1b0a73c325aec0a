use scraper::Html;

use super::first_text;
use crate::content_type::ContentType;
use crate::models::Record;

struct Patterns {
    title: &'static [&'static str],
    body: &'static [&'static str],
}

fn patterns(content_type: ContentType) -> Patterns {
    match content_type {
        ContentType::Bill => Patterns {
            title: &["h1.bill-title", ".thingmal h1", "#content h1", "h1", "title"],
            body: &[".bill-content", ".thingmal-efni", "#content .text", "article", "main"],
        },
        ContentType::Vote => Patterns {
            title: &[".vote-title", ".atkvaedagreidsla h1", "h1", "h2", "title"],
            body: &[".vote-results", ".atkvaedagreidsla", "table", "main"],
        },
        ContentType::Speech => Patterns {
            title: &[".speech-title", ".raeda h1", "h1", "title"],
            body: &[".speech-text", ".raeda", "#raeda", "article", "main"],
        },
        ContentType::Committee => Patterns {
            title: &[".committee-name", ".nefnd h1", "h1", "title"],
            body: &[".committee-description", ".nefnd", "article", "main"],
        },
        ContentType::Issue => Patterns {
            title: &[".issue-title", ".mal h1", "h1", "title"],
            body: &[".issue-content", ".mal", "article", "main"],
        },
        ContentType::Mp => Patterns {
            title: &[".thingmadur h1", "h1", "title"],
            body: &[".bio", "article", "main"],
        },
    }
}

pub(super) fn synthesized_title(content_type: ContentType, url: &str) -> String {
    format!("{} from {url}", content_type.label())
}

/// One record per page: first matching title and body selectors win.
pub(super) fn extract(document: &Html, content_type: ContentType, url: &str) -> Record {
    let patterns = patterns(content_type);
    let title = first_text(document, patterns.title)
        .unwrap_or_else(|| synthesized_title(content_type, url));
    let body = first_text(document, patterns.body).unwrap_or_default();

    let mut record = Record::new(content_type, title, url);
    record.content = Some(body);
    record
}
