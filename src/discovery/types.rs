// src/discovery/types.rs
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{AchievementType, DataSource, SourceKind};

/// A person the generators look for (an alumnus).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub id: i64,
    pub name: String,
    pub graduation_year: i32,
}

/// An achievement as found by a generator, before scoring and dedup.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Candidate {
    pub subject_id: i64,
    pub subject_name: String,
    pub title: String,
    pub category: AchievementType,
    pub description: String,
    pub date: NaiveDate,
    pub source: String,
    pub link: Option<String>,
    /// Evidence factor tags, e.g. "exact name match".
    pub evidence: Vec<String>,
}

/// Produces candidates for one data source. One implementation per source kind.
#[async_trait::async_trait]
pub trait CandidateGenerator: Send + Sync {
    async fn generate(&self, source: &DataSource, subjects: &[Subject]) -> Result<Vec<Candidate>>;
    fn name(&self) -> &'static str;
}

/// Generators keyed by source kind.
#[derive(Clone, Default)]
pub struct GeneratorRegistry {
    by_kind: HashMap<SourceKind, Arc<dyn CandidateGenerator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: SourceKind, generator: Arc<dyn CandidateGenerator>) -> Self {
        self.by_kind.insert(kind, generator);
        self
    }

    pub fn get(&self, kind: SourceKind) -> Option<&Arc<dyn CandidateGenerator>> {
        self.by_kind.get(&kind)
    }
}
