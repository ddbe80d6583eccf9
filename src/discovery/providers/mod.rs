//! Candidate generators, one per source kind, plus the name matching they share.

pub mod api_catalog;
pub mod feed_rss;
pub mod page_scrape;

use std::sync::Arc;

use anyhow::Result;
use chrono::{Datelike, NaiveDate};

use crate::discovery::types::{GeneratorRegistry, Subject};
use crate::models::SourceKind;

pub const EXACT_NAME_MATCH: &str = "exact name match";
pub const PARTIAL_NAME_MATCH: &str = "partial name match";
pub const GRADUATION_CONSISTENT: &str = "graduation year consistent";

const EXACT_SIMILARITY: f64 = 0.95;
const MIN_SIMILARITY: f64 = 0.70;

/// Registry with the bundled simulated generators for every source kind.
/// With `live_feeds`, feed sources are fetched from their URL.
pub fn default_registry(live_feeds: bool) -> Result<GeneratorRegistry> {
    let feed = if live_feeds {
        feed_rss::FeedRssGenerator::http()
    } else {
        feed_rss::FeedRssGenerator::bundled()
    };
    Ok(GeneratorRegistry::new()
        .register(SourceKind::Api, Arc::new(api_catalog::ApiCatalogGenerator::bundled()?))
        .register(SourceKind::Feed, Arc::new(feed))
        .register(SourceKind::PageScrape, Arc::new(page_scrape::PageScrapeGenerator::bundled())))
}

/// Lowercase, drop punctuation, collapse whitespace ("Michael O'Brien" → "michael o brien").
pub(crate) fn normalize_name(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn name_similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&normalize_name(a), &normalize_name(b))
}

/// Best-matching subject for a person name, with the evidence tag it earns.
pub(crate) fn match_subject<'a>(person: &str, subjects: &'a [Subject]) -> Option<(&'a Subject, &'static str)> {
    let (best, sim) = subjects
        .iter()
        .map(|s| (s, name_similarity(person, &s.name)))
        .max_by(|a, b| a.1.total_cmp(&b.1))?;
    if sim >= EXACT_SIMILARITY {
        Some((best, EXACT_NAME_MATCH))
    } else if sim >= MIN_SIMILARITY {
        Some((best, PARTIAL_NAME_MATCH))
    } else {
        None
    }
}

/// Work dated after graduation is consistent with the subject's timeline.
pub(crate) fn graduation_consistent(subject: &Subject, date: NaiveDate) -> bool {
    date.year() >= subject.graduation_year
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subjects() -> Vec<Subject> {
        vec![
            Subject { id: 1, name: "James Mitchell".into(), graduation_year: 2020 },
            Subject { id: 2, name: "Michael O'Brien".into(), graduation_year: 2017 },
        ]
    }

    #[test]
    fn punctuation_does_not_break_exact_match() {
        let s = subjects();
        let (m, tag) = match_subject("Michael O Brien", &s).unwrap();
        assert_eq!(m.id, 2);
        assert_eq!(tag, EXACT_NAME_MATCH);
    }

    #[test]
    fn near_miss_is_partial_and_strangers_are_ignored() {
        let s = subjects();
        let (m, tag) = match_subject("Jamie Mitchel", &s).unwrap();
        assert_eq!(m.id, 1);
        assert_eq!(tag, PARTIAL_NAME_MATCH);
        assert!(match_subject("Alex Nobody", &s).is_none());
    }

    #[test]
    fn graduation_year_check() {
        let s = &subjects()[0];
        assert!(graduation_consistent(s, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()));
        assert!(!graduation_consistent(s, NaiveDate::from_ymd_opt(2019, 12, 31).unwrap()));
    }
}
