// tests/pipeline_runs.rs
//
// End-to-end discovery runs against an in-memory store with the demo seed.
// Generators are replaced with small deterministic ones so every count below
// is exact.
//
// Seeded active sources: TMDb API (API), OMDb API (API),
// Screen Australia (RSS), IF Magazine (Web Scraping).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use sqlx::SqlitePool;

use alumni_tracker::automation::Automation;
use alumni_tracker::build_automation;
use alumni_tracker::config::DiscoveryConfig;
use alumni_tracker::db::{self, achievements, sources};
use alumni_tracker::discovery::types::{Candidate, CandidateGenerator, GeneratorRegistry, Subject};
use alumni_tracker::discovery::{DiscoveryPipeline, RunScope};
use alumni_tracker::error::AppError;
use alumni_tracker::models::{AchievementType, DataSource, SourceKind};
use alumni_tracker::notify::Broadcaster;
use alumni_tracker::run_state::{RunStateTracker, RunStatus};
use alumni_tracker::scoring::{ConfidenceScorer, ScoringTables};

/// Emits one candidate per (template, subject) pair, stamped with the
/// polled source's name.
struct Scripted {
    templates: Vec<(AchievementType, &'static str, Vec<&'static str>)>,
    delay: Duration,
}

impl Scripted {
    fn new(templates: Vec<(AchievementType, &'static str, Vec<&'static str>)>) -> Self {
        Self { templates, delay: Duration::ZERO }
    }

    fn slow(delay: Duration) -> Self {
        Self { templates: Vec::new(), delay }
    }
}

#[async_trait::async_trait]
impl CandidateGenerator for Scripted {
    async fn generate(&self, source: &DataSource, subjects: &[Subject]) -> Result<Vec<Candidate>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut out = Vec::new();
        for subject in subjects {
            for (category, title, evidence) in &self.templates {
                out.push(Candidate {
                    subject_id: subject.id,
                    subject_name: subject.name.clone(),
                    title: format!("{title} ({})", subject.name),
                    category: *category,
                    description: format!("{} found by {}", subject.name, source.name),
                    date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
                    source: source.name.clone(),
                    link: None,
                    evidence: evidence.iter().map(|s| s.to_string()).collect(),
                });
            }
        }
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct Broken;

#[async_trait::async_trait]
impl CandidateGenerator for Broken {
    async fn generate(&self, source: &DataSource, _subjects: &[Subject]) -> Result<Vec<Candidate>> {
        Err(anyhow!("{} is unreachable", source.name))
    }

    fn name(&self) -> &'static str {
        "broken"
    }
}

async fn seeded_pool() -> SqlitePool {
    let pool = db::connect_memory().await.expect("memory db");
    db::seed_demo_data(&pool).await.expect("seed");
    pool
}

async fn automation_with(pool: &SqlitePool, registry: GeneratorRegistry) -> Automation {
    build_automation(pool.clone(), &DiscoveryConfig::default(), ScoringTables::default_seed(), registry)
        .await
        .expect("automation")
}

fn award_registry() -> GeneratorRegistry {
    GeneratorRegistry::new()
        .register(
            SourceKind::Api,
            Arc::new(Scripted::new(vec![(
                AchievementType::Award,
                "Best Screenplay",
                vec!["exact name match", "credited role"],
            )])),
        )
        .register(SourceKind::Feed, Arc::new(Broken))
        .register(SourceKind::PageScrape, Arc::new(Scripted::new(Vec::new())))
}

fn only_subject(id: i64) -> RunScope {
    RunScope {
        source_names: None,
        subject_ids: Some(vec![id]),
    }
}

async fn source_named(pool: &SqlitePool, name: &str) -> DataSource {
    sources::list(pool)
        .await
        .expect("list sources")
        .into_iter()
        .find(|s| s.name == name)
        .expect("seeded source")
}

#[tokio::test]
async fn failing_source_does_not_block_the_others() {
    let pool = seeded_pool().await;
    let auto = automation_with(&pool, award_registry()).await;

    let summary = auto
        .run_if_idle(only_subject(1))
        .await
        .expect("run should complete");

    assert_eq!(summary.sources_total, 4);
    // Screen Australia's generator fails; the rest succeed
    assert_eq!(summary.sources_processed, 3);
    // one award per API source for Sarah Chen
    assert_eq!(summary.records_created, 2);

    let broken = source_named(&pool, "Screen Australia").await;
    assert!((broken.success_rate - 0.8).abs() < 1e-9, "got {}", broken.success_rate);
    assert!(broken.last_error.as_deref().is_some_and(|e| e.contains("unreachable")));
    assert!(broken.last_checked.is_some());

    let ok = source_named(&pool, "TMDb API").await;
    assert_eq!(ok.success_rate, 1.0);
    assert!(ok.last_error.is_none());

    // inactive sources are never polled
    assert!(source_named(&pool, "AACTA Awards").await.last_checked.is_none());
}

#[tokio::test]
async fn rerun_is_idempotent_and_tracker_counts_runs() {
    let pool = seeded_pool().await;
    let auto = automation_with(&pool, award_registry()).await;
    let before = achievements::count_total(&pool).await.unwrap();

    let first = auto.run_if_idle(RunScope::default()).await.expect("first run");
    // 5 alumni x 2 API sources
    assert_eq!(first.records_created, 10);

    let second = auto.run_if_idle(RunScope::default()).await.expect("second run");
    assert_eq!(second.records_created, 0);
    assert_eq!(achievements::count_total(&pool).await.unwrap(), before + 10);

    let state = auto.pipeline().tracker().get().await.unwrap();
    assert_eq!(state.status, RunStatus::Stopped);
    assert_eq!(state.run_count, 2);
    assert!(state.last_run_start.is_some());
    assert!(state.last_run_end.is_some());
    assert!(state.next_run.is_some_and(|n| n > chrono::Utc::now()));

    // discovered records are stored unverified
    let fresh = auto.discoveries(false, Some(50)).await.unwrap();
    assert!(fresh.iter().any(|d| d.title.starts_with("Best Screenplay") && !d.verified));
}

#[tokio::test]
async fn score_exactly_at_threshold_is_accepted() {
    let pool = seeded_pool().await;
    let registry = GeneratorRegistry::new().register(
        SourceKind::Api,
        Arc::new(Scripted::new(vec![
            // 0.5 + 0.20 (OMDb) = 0.70
            (AchievementType::ProductionCredit, "Editor", vec![]),
            // 0.70 * 0.9 = 0.63
            (AchievementType::Review, "Four Stars", vec![]),
        ])),
    );
    let auto = automation_with(&pool, registry).await;

    let scope = RunScope {
        source_names: Some(vec!["omdb api".into()]),
        subject_ids: Some(vec![4]),
    };
    let summary = auto.run_if_idle(scope).await.expect("run");
    assert_eq!(summary.sources_total, 1);
    assert_eq!(summary.records_created, 1);

    let stored = achievements::by_alumni(&pool, 4).await.unwrap();
    let editor = stored
        .iter()
        .find(|a| a.title.starts_with("Editor"))
        .expect("editor credit stored");
    assert!((editor.confidence_score - 0.70).abs() < 1e-9);
    assert!(!editor.verified);
    assert!(stored.iter().all(|a| !a.title.starts_with("Four Stars")));
}

#[tokio::test]
async fn listeners_see_the_run_lifecycle() {
    let pool = seeded_pool().await;
    let auto = automation_with(&pool, award_registry()).await;
    let mut listener = auto.subscribe().await;

    auto.run_if_idle(only_subject(2)).await.expect("run");

    let mut kinds = Vec::new();
    while let Some(ev) = listener.try_recv() {
        kinds.push(ev.kind());
    }
    assert_eq!(
        kinds,
        vec!["status", "pipeline_started", "new_discovery", "new_discovery", "pipeline_completed"]
    );
}

#[tokio::test]
async fn second_manual_run_while_busy_conflicts() {
    let pool = seeded_pool().await;
    let registry = GeneratorRegistry::new()
        .register(SourceKind::Api, Arc::new(Scripted::slow(Duration::from_millis(150))));
    let auto = automation_with(&pool, registry).await;

    let handle = auto.trigger_run(RunScope::default()).expect("first run starts");
    assert!(auto.is_busy());
    assert!(matches!(auto.trigger_run(RunScope::default()), Err(AppError::Conflict(_))));
    // scheduled ticks skip instead of queueing
    assert!(auto.run_if_idle(RunScope::default()).await.is_none());

    let summary = handle.await.expect("join").expect("run completes");
    assert_eq!(summary.records_created, 0);
    assert!(!auto.is_busy());
    assert!(auto.trigger_run(RunScope::default()).is_ok());
}

#[tokio::test]
async fn stop_during_a_run_wins_over_its_completion() {
    let pool = seeded_pool().await;
    let registry = GeneratorRegistry::new()
        .register(SourceKind::Api, Arc::new(Scripted::slow(Duration::from_millis(200))));
    let auto = automation_with(&pool, registry).await;

    let status = auto.toggle("start").await.unwrap();
    assert_eq!(status, RunStatus::Running);
    assert!(auto.schedule_enabled());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(auto.toggle("stop").await.unwrap(), RunStatus::Stopped);
    assert!(!auto.schedule_enabled());

    // wait for the in-flight run to drain
    while auto.is_busy() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let state = auto.pipeline().tracker().get().await.unwrap();
    assert_eq!(state.status, RunStatus::Stopped);
    assert_eq!(state.run_count, 1);
    assert!(state.last_run_end.is_some());

    assert!(matches!(auto.toggle("pause").await, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn start_while_a_stopped_run_drains_reports_running() {
    let pool = seeded_pool().await;
    let registry = GeneratorRegistry::new()
        .register(SourceKind::Api, Arc::new(Scripted::slow(Duration::from_millis(200))));
    let auto = automation_with(&pool, registry).await;

    assert_eq!(auto.toggle("start").await.unwrap(), RunStatus::Running);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(auto.toggle("stop").await.unwrap(), RunStatus::Stopped);

    // the first run still holds the lock
    assert!(auto.is_busy());
    assert_eq!(auto.toggle("start").await.unwrap(), RunStatus::Running);
    let state = auto.pipeline().tracker().get().await.unwrap();
    assert_eq!(state.status, RunStatus::Running);

    while auto.is_busy() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let state = auto.pipeline().tracker().get().await.unwrap();
    assert_eq!(state.status, RunStatus::Stopped);
    assert_eq!(state.run_count, 1);
    assert!(auto.schedule_enabled());
}

#[tokio::test]
async fn interrupted_run_is_recovered_when_wiring_up() {
    let pool = seeded_pool().await;
    // a previous process entered `running` and never came back
    let stale = RunStateTracker::new(pool.clone()).mark_started().await.unwrap();
    let stale_start = stale.last_run_start.expect("start stamped");

    let auto = automation_with(&pool, award_registry()).await;
    assert!(!auto.is_busy());
    let status = auto.status().await.unwrap();
    assert_eq!(status.status, RunStatus::Error);
    let state = auto.pipeline().tracker().get().await.unwrap();
    assert!(state.last_run_end.is_some());

    auto.run_if_idle(only_subject(1)).await.expect("run after recovery");
    let state = auto.pipeline().tracker().get().await.unwrap();
    assert_eq!(state.status, RunStatus::Stopped);
    assert_eq!(state.run_count, 2);
    assert!(state.last_run_start.is_some_and(|t| t > stale_start));
}

#[tokio::test]
async fn started_event_precedes_error_when_sources_cannot_be_read() {
    let pool = seeded_pool().await;
    let auto = automation_with(&pool, award_registry()).await;
    let mut listener = auto.subscribe().await;

    sqlx::query("DROP TABLE data_sources")
        .execute(&pool)
        .await
        .expect("drop sources");
    assert!(auto.run_if_idle(RunScope::default()).await.is_none());

    let mut kinds = Vec::new();
    while let Some(ev) = listener.try_recv() {
        kinds.push(ev.kind());
    }
    assert_eq!(kinds, vec!["status", "pipeline_started", "pipeline_error"]);
    let state = auto.pipeline().tracker().get().await.unwrap();
    assert_eq!(state.status, RunStatus::Error);
}

#[tokio::test]
async fn watchdog_marks_a_hung_run_as_error() {
    let pool = seeded_pool().await;
    let registry = GeneratorRegistry::new()
        .register(SourceKind::Api, Arc::new(Scripted::slow(Duration::from_secs(5))));
    let broadcaster = Broadcaster::new();
    let pipeline = DiscoveryPipeline::new(
        pool.clone(),
        registry,
        ConfidenceScorer::new(ScoringTables::default_seed()),
        RunStateTracker::new(pool.clone()),
        broadcaster.clone(),
    );
    let auto = Automation::new(pool.clone(), pipeline, Duration::from_millis(100));
    let mut listener = broadcaster.connect(None);

    assert!(auto.run_if_idle(RunScope::default()).await.is_none());

    let state = auto.pipeline().tracker().get().await.unwrap();
    assert_eq!(state.status, RunStatus::Error);
    assert!(state.last_run_end.is_some());
    assert!(!auto.is_busy());

    let mut saw_error = false;
    while let Some(ev) = listener.try_recv() {
        saw_error |= ev.kind() == "pipeline_error";
    }
    assert!(saw_error);
}

#[tokio::test]
async fn bundled_generators_find_seeded_alumni() {
    let pool = seeded_pool().await;
    let registry = alumni_tracker::discovery::providers::default_registry(false).expect("registry");
    let auto = automation_with(&pool, registry).await;

    let first = auto.run_if_idle(RunScope::default()).await.expect("run");
    assert_eq!(first.sources_processed, 4);
    assert!(first.records_created > 0);

    let again = auto.run_if_idle(RunScope::default()).await.expect("rerun");
    assert_eq!(again.records_created, 0);

    let status = auto.status().await.unwrap();
    assert_eq!(status.run_count, 2);
    assert_eq!(status.active_sources, 4);
    assert_eq!(status.total_sources, 5);
    assert_eq!(status.discoveries_today, 7 + first.records_created as i64);
}
