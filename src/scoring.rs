//! # Confidence Scoring
//!
//! Maps a discovered candidate and its originating source to a confidence
//! in `[0.0, 1.0]`:
//!
//! ```text
//! clamp01((base + source_bonus + Σ evidence_bonus) × category_multiplier)
//! ```
//!
//! - Tables are configuration data (TOML or JSON), with a built-in seed.
//! - Source and tag lookups are case-insensitive and punctuation-tolerant.
//! - Source aliases map alternative spellings to a canonical source.
//! - Unknown sources/tags get a small default bonus; unknown categories
//!   multiply by 1.0.
//!
//! The scorer is pure: no I/O once the tables are loaded.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::{fs, path::Path};

use crate::discovery::types::Candidate;

pub const ENV_SCORING_CONFIG_PATH: &str = "SCORING_CONFIG_PATH";

/// Bonus / multiplier tables for the confidence formula.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringTables {
    #[serde(default = "default_base")]
    pub base: f64,
    #[serde(default = "default_source_bonus")]
    pub default_source_bonus: f64,
    #[serde(default)]
    pub source_bonuses: HashMap<String, f64>,
    /// Aliases mapping non-canonical source names → canonical names.
    #[serde(default)]
    pub source_aliases: HashMap<String, String>,
    #[serde(default = "default_evidence_bonus")]
    pub default_evidence_bonus: f64,
    #[serde(default)]
    pub evidence_bonuses: HashMap<String, f64>,
    /// Keyed by achievement type label, e.g. "Award", "Review/Reception".
    #[serde(default)]
    pub category_multipliers: HashMap<String, f64>,
}

fn default_base() -> f64 {
    0.5
}
fn default_source_bonus() -> f64 {
    0.05
}
fn default_evidence_bonus() -> f64 {
    0.02
}

impl Default for ScoringTables {
    fn default() -> Self {
        Self::default_seed()
    }
}

impl ScoringTables {
    /// Load tables from a TOML or JSON file (by extension; TOML otherwise).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let s = fs::read_to_string(path)
            .with_context(|| format!("reading scoring tables from {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let raw: ScoringTables = if is_json {
            serde_json::from_str(&s).context("parsing scoring JSON")?
        } else {
            toml::from_str(&s).context("parsing scoring TOML")?
        };
        Ok(raw.normalized())
    }

    /// Load from `$SCORING_CONFIG_PATH` or `path`, falling back to the seed
    /// when the file is missing or malformed.
    pub fn load_or_seed<P: AsRef<Path>>(path: P) -> Self {
        let path = std::env::var(ENV_SCORING_CONFIG_PATH)
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|_| path.as_ref().to_path_buf());
        match Self::load_from_file(&path) {
            Ok(t) => {
                tracing::info!(path = %path.display(), "scoring tables loaded");
                t
            }
            Err(e) => {
                tracing::warn!(error = %e, "scoring tables unavailable, using built-in seed");
                Self::default_seed()
            }
        }
    }

    /// Built-in tables. Values are calibration data, not derived from anything.
    pub fn default_seed() -> Self {
        let mut source_bonuses = HashMap::new();
        for (k, v) in [
            ("official awards body", 0.35),
            ("aacta awards", 0.35),
            ("screen australia", 0.30),
            ("tmdb api", 0.25),
            ("omdb api", 0.20),
            ("if magazine", 0.15),
        ] {
            source_bonuses.insert(k.to_string(), v);
        }

        let mut source_aliases = HashMap::new();
        for (a, c) in [
            ("aacta", "aacta awards"),
            ("aacta official website", "aacta awards"),
            ("the movie database", "tmdb api"),
            ("tmdb", "tmdb api"),
            ("omdb", "omdb api"),
            ("inside film", "if magazine"),
        ] {
            source_aliases.insert(a.to_string(), c.to_string());
        }

        let mut evidence_bonuses = HashMap::new();
        for (k, v) in [
            ("official nomination list", 0.30),
            ("official announcement", 0.25),
            ("exact name match", 0.20),
            ("credited role", 0.15),
            ("graduation year consistent", 0.10),
            ("press coverage", 0.10),
            ("partial name match", 0.05),
        ] {
            evidence_bonuses.insert(k.to_string(), v);
        }

        let mut category_multipliers = HashMap::new();
        for (k, v) in [
            ("award", 1.10),
            ("industry recognition", 1.05),
            ("festival selection", 1.00),
            ("production credit", 1.00),
            ("review reception", 0.90),
        ] {
            category_multipliers.insert(k.to_string(), v);
        }

        Self {
            base: default_base(),
            default_source_bonus: default_source_bonus(),
            source_bonuses,
            source_aliases,
            default_evidence_bonus: default_evidence_bonus(),
            evidence_bonuses,
            category_multipliers,
        }
    }

    /// Normalize all table keys so lookups can use `normalize()` on input.
    fn normalized(self) -> Self {
        fn keys<V>(m: HashMap<String, V>) -> HashMap<String, V> {
            m.into_iter().map(|(k, v)| (normalize(&k), v)).collect()
        }
        Self {
            source_bonuses: keys(self.source_bonuses),
            source_aliases: self
                .source_aliases
                .into_iter()
                .map(|(a, c)| (normalize(&a), normalize(&c)))
                .collect(),
            evidence_bonuses: keys(self.evidence_bonuses),
            category_multipliers: keys(self.category_multipliers),
            ..self
        }
    }

    /// Source bonus: alias → exact → default.
    pub fn source_bonus(&self, source: &str) -> f64 {
        let s = normalize(source);
        if let Some(canon) = self.source_aliases.get(&s) {
            if let Some(&b) = self.source_bonuses.get(canon) {
                return b;
            }
        }
        self.source_bonuses
            .get(&s)
            .copied()
            .unwrap_or(self.default_source_bonus)
    }

    pub fn evidence_bonus(&self, tag: &str) -> f64 {
        self.evidence_bonuses
            .get(&normalize(tag))
            .copied()
            .unwrap_or(self.default_evidence_bonus)
    }

    pub fn category_multiplier(&self, category: &str) -> f64 {
        self.category_multipliers
            .get(&normalize(category))
            .copied()
            .unwrap_or(1.0)
    }
}

/// Pure confidence scorer over a set of tables.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceScorer {
    tables: ScoringTables,
}

impl ConfidenceScorer {
    pub fn new(tables: ScoringTables) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &ScoringTables {
        &self.tables
    }

    /// Score a candidate coming from `source`. Always within `[0, 1]`.
    pub fn score(&self, candidate: &Candidate, source: &str) -> f64 {
        let t = &self.tables;
        let mut total = t.base + t.source_bonus(source);

        // Distinct tags, summed in sorted order so tag order cannot change
        // the floating-point result.
        let tags: BTreeSet<String> = candidate.evidence.iter().map(|e| normalize(e)).collect();
        for tag in &tags {
            total += t.evidence_bonus(tag);
        }

        total *= t.category_multiplier(candidate.category.as_str());
        clamp01(total)
    }
}

/// Threshold check tolerant to float noise: 0.70 passes a 0.70 threshold,
/// 0.6999 does not.
pub fn meets_threshold(score: f64, threshold: f64) -> bool {
    const EPS: f64 = 1e-9;
    score + EPS >= threshold
}

/// Lowercase, replace punctuation/dashes/slashes with spaces, collapse spaces.
fn normalize(s: &str) -> String {
    let mut out = s.trim().to_lowercase();
    for ch in ['—', '–', '-', '_', '/', '\\'] {
        out = out.replace(ch, " ");
    }
    out = out.replace(['\n', '\r', '\t', '.', ',', '\'', '’'], " ");
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}
