//! The fixed set of record kinds the scraper knows how to crawl.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Domain substring every followed link must contain.
pub const SITE_DOMAIN: &str = "althingi.is";

const BILLS_SEED: &str = "https://www.althingi.is/thingstorf/thingmalalistar-eftir-thingum/lagafrumvorp/";
const VOTES_SEED: &str = "https://www.althingi.is/thingstorf/atkvaedagreidslur/";
const SPEECHES_SEED: &str = "https://www.althingi.is/altext/raedur/";
const COMMITTEES_SEED: &str = "https://www.althingi.is/thingnefndir/fastanefndir/";
const ISSUES_SEED: &str = "https://www.althingi.is/thingstorf/thingmalin/";

// Several index pages have carried the member list over time; all are tried.
const MP_SEEDS: [&str; 4] = [
    "https://www.althingi.is/thingmenn/althingismenn/",
    "https://www.althingi.is/thingmenn/thingmenn/",
    "https://www.althingi.is/altext/cv/is/",
    "https://www.althingi.is/thingmenn/",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Bill,
    Vote,
    Speech,
    Mp,
    Committee,
    Issue,
}

impl ContentType {
    pub const ALL: [ContentType; 6] = [
        ContentType::Bill,
        ContentType::Vote,
        ContentType::Speech,
        ContentType::Mp,
        ContentType::Committee,
        ContentType::Issue,
    ];

    /// Internal singular tag, as stored on jobs and records.
    pub fn singular(self) -> &'static str {
        match self {
            ContentType::Bill => "bill",
            ContentType::Vote => "vote",
            ContentType::Speech => "speech",
            ContentType::Mp => "mp",
            ContentType::Committee => "committee",
            ContentType::Issue => "issue",
        }
    }

    /// External plural form used by clients.
    pub fn plural(self) -> &'static str {
        match self {
            ContentType::Bill => "bills",
            ContentType::Vote => "votes",
            ContentType::Speech => "speeches",
            ContentType::Mp => "mps",
            ContentType::Committee => "committees",
            ContentType::Issue => "issues",
        }
    }

    /// Human readable name used in synthesized titles.
    pub fn label(self) -> &'static str {
        match self {
            ContentType::Bill => "Bill",
            ContentType::Vote => "Vote",
            ContentType::Speech => "Speech",
            ContentType::Mp => "MP",
            ContentType::Committee => "Committee",
            ContentType::Issue => "Issue",
        }
    }

    pub fn is_person(self) -> bool {
        matches!(self, ContentType::Mp)
    }

    pub fn default_seeds(self) -> Vec<String> {
        let seeds: &[&str] = match self {
            ContentType::Bill => &[BILLS_SEED],
            ContentType::Vote => &[VOTES_SEED],
            ContentType::Speech => &[SPEECHES_SEED],
            ContentType::Mp => &MP_SEEDS,
            ContentType::Committee => &[COMMITTEES_SEED],
            ContentType::Issue => &[ISSUES_SEED],
        };
        seeds.iter().map(|seed| seed.to_string()).collect()
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.singular())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown content type: {0}")]
pub struct UnknownContentType(pub String);

impl FromStr for ContentType {
    type Err = UnknownContentType;

    /// Accepts both the plural and the singular form.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_ascii_lowercase();
        ContentType::ALL
            .into_iter()
            .find(|kind| kind.singular() == value || kind.plural() == value)
            .ok_or(UnknownContentType(value))
    }
}
