//! # Discovery pipeline
//! Walks the active data sources, asks the generator registered for each
//! source kind for candidates, scores them, drops low-confidence and
//! already-known items, and stores the rest as unverified achievements.
//!
//! A failing source never aborts the run: the error is logged, counted and
//! written into that source's reliability fields, and the next source runs.

pub mod providers;
pub mod scheduler;
pub mod types;

use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use metrics::{counter, gauge, histogram};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db::{achievements, alumni, sources};
use crate::db::achievements::DiscoveryRow;
use crate::models::DataSource;
use crate::notify::{Broadcaster, PipelineEvent};
use crate::run_state::{RunStateTracker, RunStatus};
use crate::scoring::{meets_threshold, ConfidenceScorer};
use types::{Candidate, GeneratorRegistry, Subject};

pub const RELIABILITY_STEP_UP: f64 = 0.1;
pub const RELIABILITY_STEP_DOWN: f64 = 0.2;
pub const RELIABILITY_FLOOR: f64 = 0.1;

const TITLE_MAX_CHARS: usize = 200;
const TEXT_MAX_CHARS: usize = 1000;

/// Basic text normalization:
/// - HTML entity decode
/// - strip HTML tags
/// - normalize quotes
/// - collapse whitespace
/// - trim trailing sentence punctuation
/// - cap length
pub fn normalize_text(s: &str) -> String {
    cap_chars(clean(s), TEXT_MAX_CHARS)
}

/// Same as [`normalize_text`] with the title length cap.
pub fn normalize_title(s: &str) -> String {
    cap_chars(clean(s), TITLE_MAX_CHARS)
}

fn tag_re() -> Option<&'static Regex> {
    static RE: OnceCell<Regex> = OnceCell::new();
    // a tag starts with a letter (or `/` + letter); a bare `<` is text
    RE.get_or_try_init(|| Regex::new(r"(?is)<!--.*?-->|</?[a-z][^>]*>"))
        .map_err(|e| tracing::error!(error = %e, "tag pattern failed to compile"))
        .ok()
}

fn ws_re() -> Option<&'static Regex> {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_try_init(|| Regex::new(r"\s+"))
        .map_err(|e| tracing::error!(error = %e, "whitespace pattern failed to compile"))
        .ok()
}

fn clean(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    if let Some(re) = tag_re() {
        out = re.replace_all(&out, "").into_owned();
    }

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    if let Some(re) = ws_re() {
        out = re.replace_all(&out, " ").into_owned();
    }
    let mut out = out.trim().to_string();

    while out.ends_with(['!', '?', '.', ',']) {
        out.pop();
    }
    out.trim_end().to_string()
}

fn cap_chars(s: String, max: usize) -> String {
    if s.chars().count() > max {
        s.chars().take(max).collect()
    } else {
        s
    }
}

pub fn reliability_after_success(current: f64) -> f64 {
    (current + RELIABILITY_STEP_UP).min(1.0)
}

pub fn reliability_after_failure(current: f64) -> f64 {
    (current - RELIABILITY_STEP_DOWN).max(RELIABILITY_FLOOR)
}

/// Optional restriction of a run to some sources and/or alumni.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunScope {
    #[serde(default)]
    pub source_names: Option<Vec<String>>,
    #[serde(default)]
    pub subject_ids: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub sources_total: usize,
    /// Sources whose generator returned without error.
    pub sources_processed: usize,
    pub records_created: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Created,
    BelowThreshold,
    Duplicate,
    StoreFailed,
}

impl Disposition {
    fn label(self) -> &'static str {
        match self {
            Disposition::Created => "created",
            Disposition::BelowThreshold => "below_threshold",
            Disposition::Duplicate => "duplicate",
            Disposition::StoreFailed => "store_failed",
        }
    }
}

#[derive(Clone)]
pub struct DiscoveryPipeline {
    pool: SqlitePool,
    registry: GeneratorRegistry,
    scorer: ConfidenceScorer,
    tracker: RunStateTracker,
    broadcaster: Broadcaster,
    threshold: f64,
    interval: Duration,
}

impl DiscoveryPipeline {
    pub fn new(
        pool: SqlitePool,
        registry: GeneratorRegistry,
        scorer: ConfidenceScorer,
        tracker: RunStateTracker,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            pool,
            registry,
            scorer,
            tracker,
            broadcaster,
            threshold: 0.70,
            interval: Duration::from_secs(6 * 3600),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn tracker(&self) -> &RunStateTracker {
        &self.tracker
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    fn next_run_at(&self) -> chrono::DateTime<Utc> {
        let now = Utc::now();
        chrono::Duration::from_std(self.interval)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC)
    }

    /// One full run: enter `running`, process every in-scope source, leave
    /// `running` as `stopped` (or `error` if the run itself failed).
    pub async fn run(&self, scope: &RunScope) -> Result<RunSummary> {
        let t0 = Instant::now();
        self.tracker.mark_started().await?;
        counter!("discovery_runs_total").increment(1);
        self.broadcaster.broadcast(PipelineEvent::PipelineStarted {
            scope: scope.clone(),
            timestamp: Utc::now(),
        });

        let result = self.run_sources(scope).await;
        let elapsed_ms = t0.elapsed().as_millis() as i64;
        histogram!("discovery_run_ms").record(elapsed_ms as f64);
        gauge!("discovery_last_run_ts").set(Utc::now().timestamp() as f64);

        match result {
            Ok(summary) => {
                self.tracker
                    .mark_finished(RunStatus::Stopped, elapsed_ms, self.next_run_at())
                    .await?;
                tracing::info!(
                    target: "discovery",
                    sources_total = summary.sources_total,
                    sources_processed = summary.sources_processed,
                    records_created = summary.records_created,
                    elapsed_ms,
                    "run complete"
                );
                self.broadcaster.broadcast(PipelineEvent::PipelineCompleted {
                    summary,
                    duration_ms: elapsed_ms,
                    timestamp: Utc::now(),
                });
                Ok(summary)
            }
            Err(e) => {
                self.fail(&e, elapsed_ms).await;
                Err(e)
            }
        }
    }

    /// Record a failed run: tracker to `error` and a pipeline error event.
    pub async fn fail(&self, e: &anyhow::Error, elapsed_ms: i64) {
        tracing::error!(target: "discovery", error = ?e, "run failed");
        if let Err(te) = self
            .tracker
            .mark_finished(RunStatus::Error, elapsed_ms, self.next_run_at())
            .await
        {
            tracing::error!(target: "discovery", error = %te, "could not record failed run");
        }
        self.broadcaster.broadcast(PipelineEvent::PipelineError {
            message: format!("{e:#}"),
            summary: None,
            timestamp: Utc::now(),
        });
    }

    async fn run_sources(&self, scope: &RunScope) -> Result<RunSummary> {
        let active = sources::active(&self.pool, scope.source_names.as_deref()).await?;
        let subjects = alumni::subjects(&self.pool, scope.subject_ids.as_deref()).await?;

        let mut summary = RunSummary {
            sources_total: active.len(),
            ..Default::default()
        };
        tracing::info!(target: "discovery", sources = active.len(), subjects = subjects.len(), "run started");

        for source in &active {
            match self.generate(source, &subjects).await {
                Ok(candidates) => {
                    summary.sources_processed += 1;
                    self.record_attempt(source, None).await;
                    for c in &candidates {
                        if self.consider(c).await == Disposition::Created {
                            summary.records_created += 1;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "discovery", error = ?e, source = %source.name, "source failed");
                    counter!("discovery_source_errors_total").increment(1);
                    self.record_attempt(source, Some(&format!("{e:#}"))).await;
                }
            }
        }
        Ok(summary)
    }

    async fn generate(&self, source: &DataSource, subjects: &[Subject]) -> Result<Vec<Candidate>> {
        let generator = self
            .registry
            .get(source.kind)
            .ok_or_else(|| anyhow::anyhow!("no generator for source kind {}", source.kind))?;
        let out = generator.generate(source, subjects).await?;
        tracing::debug!(
            target: "discovery",
            source = %source.name,
            generator = generator.name(),
            candidates = out.len(),
            "generated"
        );
        Ok(out)
    }

    async fn consider(&self, c: &Candidate) -> Disposition {
        let disposition = self.store(c).await;
        if disposition != Disposition::Created {
            counter!("discovery_candidates_skipped_total", "reason" => disposition.label())
                .increment(1);
        }
        disposition
    }

    async fn store(&self, c: &Candidate) -> Disposition {
        let score = self.scorer.score(c, &c.source);
        if !meets_threshold(score, self.threshold) {
            tracing::info!(target: "discovery", title = %c.title, alumni = %c.subject_name, score, "below threshold");
            return Disposition::BelowThreshold;
        }

        match achievements::exists_identity(&self.pool, c.subject_id, &c.title, &c.source).await {
            Ok(true) => {
                tracing::info!(target: "discovery", title = %c.title, alumni = %c.subject_name, "already recorded");
                return Disposition::Duplicate;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(target: "discovery", error = %e, title = %c.title, "duplicate check failed");
                return Disposition::StoreFailed;
            }
        }

        match achievements::insert_discovered(&self.pool, c, score).await {
            Ok(rec) => {
                counter!("discovery_records_created_total").increment(1);
                tracing::info!(target: "discovery", id = rec.id, title = %rec.title, alumni = %c.subject_name, score, "new discovery");
                self.broadcaster.broadcast(PipelineEvent::NewDiscovery(DiscoveryRow {
                    id: rec.id,
                    title: rec.title,
                    alumni_name: c.subject_name.clone(),
                    achievement_type: rec.kind.as_str().to_string(),
                    confidence: rec.confidence_score,
                    source: rec.source,
                    timestamp: rec.created_at,
                    source_url: rec.source_url,
                    verified: rec.verified,
                }));
                Disposition::Created
            }
            // a concurrent writer got there first
            Err(e) if e.is_unique_violation() => {
                tracing::info!(target: "discovery", title = %c.title, alumni = %c.subject_name, "already recorded");
                Disposition::Duplicate
            }
            Err(e) => {
                tracing::warn!(target: "discovery", error = %e, title = %c.title, "store failed");
                Disposition::StoreFailed
            }
        }
    }

    async fn record_attempt(&self, source: &DataSource, error: Option<&str>) {
        let rate = match error {
            None => reliability_after_success(source.success_rate),
            Some(_) => reliability_after_failure(source.success_rate),
        };
        if let Err(e) = sources::record_attempt(&self.pool, source.id, rate, error, Utc::now()).await {
            tracing::warn!(target: "discovery", error = %e, source = %source.name, "could not update source reliability");
        }
    }
}
