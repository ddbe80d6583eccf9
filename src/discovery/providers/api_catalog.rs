//! Programmatic-API generator backed by a bundled credit catalogue.
//!
//! Stands in for movie-database lookups: every catalogue entry names a
//! person, and entries whose person resembles a known alumnus become
//! candidates. Entries with a `source` only apply to that source.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use metrics::counter;
use serde::Deserialize;

use super::{graduation_consistent, match_subject, GRADUATION_CONSISTENT};
use crate::discovery::normalize_title;
use crate::discovery::types::{Candidate, CandidateGenerator, Subject};
use crate::models::{AchievementType, DataSource};

const BUNDLED_CATALOGUE: &str = include_str!("../../../fixtures/discovery/api_credits.json");

#[derive(Debug, Clone, Deserialize)]
struct CatalogEntry {
    #[serde(default)]
    source: Option<String>,
    person: String,
    title: String,
    category: AchievementType,
    #[serde(default)]
    description: String,
    date: NaiveDate,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    evidence: Vec<String>,
}

pub struct ApiCatalogGenerator {
    entries: Vec<CatalogEntry>,
}

impl ApiCatalogGenerator {
    pub fn from_fixture(json: &str) -> Result<Self> {
        let entries: Vec<CatalogEntry> =
            serde_json::from_str(json).context("parsing api credit catalogue")?;
        Ok(Self { entries })
    }

    pub fn bundled() -> Result<Self> {
        Self::from_fixture(BUNDLED_CATALOGUE)
    }

    fn applies_to(entry: &CatalogEntry, source: &DataSource) -> bool {
        entry
            .source
            .as_deref()
            .map_or(true, |s| s.eq_ignore_ascii_case(&source.name))
    }
}

#[async_trait]
impl CandidateGenerator for ApiCatalogGenerator {
    async fn generate(&self, source: &DataSource, subjects: &[Subject]) -> Result<Vec<Candidate>> {
        let mut out = Vec::new();
        for entry in self.entries.iter().filter(|e| Self::applies_to(e, source)) {
            let Some((subject, name_tag)) = match_subject(&entry.person, subjects) else {
                tracing::debug!(target: "discovery", person = %entry.person, "no alumni match");
                continue;
            };

            let mut evidence = entry.evidence.clone();
            evidence.push(name_tag.to_string());
            if graduation_consistent(subject, entry.date) {
                evidence.push(GRADUATION_CONSISTENT.to_string());
            }

            out.push(Candidate {
                subject_id: subject.id,
                subject_name: subject.name.clone(),
                title: normalize_title(&entry.title),
                category: entry.category,
                description: crate::discovery::normalize_text(&entry.description),
                date: entry.date,
                source: source.name.clone(),
                link: entry.link.clone(),
                evidence,
            });
        }
        counter!("discovery_candidates_total", "kind" => "api").increment(out.len() as u64);
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "api-catalogue"
    }
}
