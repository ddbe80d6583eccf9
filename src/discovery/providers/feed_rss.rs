use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use super::{graduation_consistent, GRADUATION_CONSISTENT};
use crate::discovery::types::{Candidate, CandidateGenerator, Subject};
use crate::discovery::{normalize_text, normalize_title};
use crate::models::{AchievementType, DataSource};

const BUNDLED_FEED: &str = include_str!("../../../fixtures/discovery/feed_items.xml");

const PRESS_COVERAGE: &str = "press coverage";
const OFFICIAL_ANNOUNCEMENT: &str = "official announcement";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    category: Option<String>,
}

/// One parsed feed entry, already normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub title: String,
    pub text: String,
    pub link: Option<String>,
    pub published: Option<NaiveDate>,
    pub category: Option<String>,
}

fn parse_rfc2822_date(ts: &str) -> Option<NaiveDate> {
    let dt = OffsetDateTime::parse(ts.trim(), &Rfc2822).ok()?.to_offset(UtcOffset::UTC);
    NaiveDate::from_ymd_opt(dt.year(), u8::from(dt.month()) as u32, dt.day() as u32)
}

pub struct FeedRssGenerator {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { client: reqwest::Client },
}

impl FeedRssGenerator {
    /// Serve every feed source from the given XML.
    pub fn from_fixture_str(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
        }
    }

    pub fn bundled() -> Self {
        Self::from_fixture_str(BUNDLED_FEED)
    }

    /// Fetch each source's `url` over HTTP.
    pub fn http() -> Self {
        Self {
            mode: Mode::Http {
                client: reqwest::Client::new(),
            },
        }
    }

    pub fn parse_entries(s: &str) -> Result<Vec<FeedEntry>> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;

        let out = rss
            .channel
            .item
            .into_iter()
            .filter_map(|it| {
                let title = normalize_title(it.title.as_deref().unwrap_or_default());
                if title.is_empty() {
                    return None;
                }
                let text = normalize_text(it.description.as_deref().unwrap_or_default());
                Some(FeedEntry {
                    title,
                    text,
                    link: it.link.map(|l| l.trim().to_string()),
                    published: it.pub_date.as_deref().and_then(parse_rfc2822_date),
                    category: it.category.map(|c| c.trim().to_string()),
                })
            })
            .collect::<Vec<_>>();

        histogram!("discovery_feed_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }

    async fn load(&self, source: &DataSource) -> Result<String> {
        match &self.mode {
            Mode::Fixture(s) => Ok(s.clone()),
            Mode::Http { client } => {
                let resp = client
                    .get(&source.url)
                    .send()
                    .await
                    .with_context(|| format!("fetching feed {}", source.url))?;
                let resp = resp.error_for_status().context("feed http status")?;
                resp.text().await.context("feed http body")
            }
        }
    }
}

/// Category from the explicit `<category>` element, else from keywords.
fn categorize(entry: &FeedEntry) -> AchievementType {
    if let Some(c) = entry.category.as_deref().and_then(|c| c.parse().ok()) {
        return c;
    }
    let hay = format!("{} {}", entry.title, entry.text).to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| hay.contains(w));
    if has(&["award", "wins", "nominat"]) {
        AchievementType::Award
    } else if has(&["festival", "selected", "line-up", "premiere"]) {
        AchievementType::FestivalSelection
    } else if has(&["review", "critics", "stars"]) {
        AchievementType::Review
    } else if has(&["directed", "producer on", "credited", "writer on"]) {
        AchievementType::ProductionCredit
    } else {
        AchievementType::IndustryRecognition
    }
}

fn mentions(entry: &FeedEntry, subject: &Subject) -> bool {
    let needle = subject.name.to_lowercase();
    entry.title.to_lowercase().contains(&needle) || entry.text.to_lowercase().contains(&needle)
}

#[async_trait]
impl CandidateGenerator for FeedRssGenerator {
    async fn generate(&self, source: &DataSource, subjects: &[Subject]) -> Result<Vec<Candidate>> {
        let body = self.load(source).await?;
        let entries = Self::parse_entries(&body)?;
        let today = chrono::Utc::now().date_naive();

        let mut out = Vec::new();
        for entry in &entries {
            for subject in subjects.iter().filter(|s| mentions(entry, s)) {
                let date = entry.published.unwrap_or(today);
                let mut evidence = vec![
                    super::EXACT_NAME_MATCH.to_string(),
                    PRESS_COVERAGE.to_string(),
                ];
                if entry.text.to_lowercase().contains(OFFICIAL_ANNOUNCEMENT) {
                    evidence.push(OFFICIAL_ANNOUNCEMENT.to_string());
                }
                if graduation_consistent(subject, date) {
                    evidence.push(GRADUATION_CONSISTENT.to_string());
                }
                out.push(Candidate {
                    subject_id: subject.id,
                    subject_name: subject.name.clone(),
                    title: entry.title.clone(),
                    category: categorize(entry),
                    description: entry.text.clone(),
                    date,
                    source: source.name.clone(),
                    link: entry.link.clone(),
                    evidence,
                });
            }
        }
        counter!("discovery_candidates_total", "kind" => "feed").increment(out.len() as u64);
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "feed-rss"
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
