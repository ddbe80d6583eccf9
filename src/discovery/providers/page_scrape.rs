//! Page-scrape generator: reads nominee lists out of an awards page.
//!
//! Each nominee is an `<li class="nominee">` carrying its category and date
//! as data attributes, with `name` / `title` spans and an optional link.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use metrics::counter;
use once_cell::sync::OnceCell;
use regex::Regex;

use super::{graduation_consistent, match_subject, GRADUATION_CONSISTENT};
use crate::discovery::types::{Candidate, CandidateGenerator, Subject};
use crate::discovery::{normalize_text, normalize_title};
use crate::models::{AchievementType, DataSource};

const BUNDLED_PAGE: &str = include_str!("../../../fixtures/discovery/awards_page.html");

const OFFICIAL_NOMINATION_LIST: &str = "official nomination list";

#[derive(Debug, Clone, PartialEq)]
pub struct Nominee {
    pub person: String,
    pub title: String,
    pub category: AchievementType,
    pub date: NaiveDate,
    pub link: Option<String>,
}

fn nominee_re() -> Result<&'static Regex> {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_try_init(|| {
        Regex::new(
            r#"(?is)<li\s+class="nominee"\s+data-category="(?P<category>[^"]*)"\s+data-date="(?P<date>[^"]*)"\s*>\s*<span\s+class="name">(?P<name>.*?)</span>\s*<span\s+class="title">(?P<title>.*?)</span>\s*(?:<a\s+href="(?P<link>[^"]*)")?"#,
        )
    })
    .context("compiling nominee pattern")
}

/// Extract nominees. Entries with an unknown category or bad date are skipped.
pub fn parse_nominees(html: &str) -> Result<Vec<Nominee>> {
    let re = nominee_re()?;
    let mut out = Vec::new();
    for caps in re.captures_iter(html) {
        let category = match caps["category"].parse::<AchievementType>() {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(target: "discovery", error = %e, "skipping nominee");
                continue;
            }
        };
        let Ok(date) = NaiveDate::parse_from_str(caps["date"].trim(), "%Y-%m-%d") else {
            tracing::debug!(target: "discovery", date = &caps["date"], "skipping nominee with bad date");
            continue;
        };
        out.push(Nominee {
            person: normalize_text(&caps["name"]),
            title: normalize_title(&caps["title"]),
            category,
            date,
            link: caps
                .name("link")
                .map(|m| html_escape::decode_html_entities(m.as_str()).to_string()),
        });
    }
    Ok(out)
}

pub struct PageScrapeGenerator {
    page: String,
}

impl PageScrapeGenerator {
    pub fn from_html(html: &str) -> Self {
        Self { page: html.to_string() }
    }

    pub fn bundled() -> Self {
        Self::from_html(BUNDLED_PAGE)
    }
}

#[async_trait]
impl CandidateGenerator for PageScrapeGenerator {
    async fn generate(&self, source: &DataSource, subjects: &[Subject]) -> Result<Vec<Candidate>> {
        let nominees = parse_nominees(&self.page)?;
        let mut out = Vec::new();
        for n in nominees {
            let Some((subject, name_tag)) = match_subject(&n.person, subjects) else {
                continue;
            };
            let mut evidence = vec![OFFICIAL_NOMINATION_LIST.to_string(), name_tag.to_string()];
            if graduation_consistent(subject, n.date) {
                evidence.push(GRADUATION_CONSISTENT.to_string());
            }
            out.push(Candidate {
                subject_id: subject.id,
                subject_name: subject.name.clone(),
                description: format!("{} listed by {}", subject.name, source.name),
                title: n.title,
                category: n.category,
                date: n.date,
                source: source.name.clone(),
                link: n.link,
                evidence,
            });
        }
        counter!("discovery_candidates_total", "kind" => "page").increment(out.len() as u64);
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "page-scrape"
    }
}
