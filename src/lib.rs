// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod automation;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod discovery;
pub mod error;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod run_state;
pub mod scoring;

pub use crate::api::{router, AppState};

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::automation::Automation;
use crate::config::DiscoveryConfig;
use crate::discovery::scheduler::SchedulerCfg;
use crate::discovery::types::GeneratorRegistry;
use crate::discovery::DiscoveryPipeline;
use crate::notify::Broadcaster;
use crate::run_state::RunStateTracker;
use crate::scoring::{ConfidenceScorer, ScoringTables};

/// Install the global subscriber: `RUST_LOG` filter (default
/// `info,sqlx=warn`), compact output or JSON with `LOG_FORMAT=json`.
/// A subscriber installed earlier (e.g. by the hosting runtime) wins.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Wire tracker, broadcaster, scorer and pipeline into an [`Automation`]
/// controller using the given generators. A run left `running` by a
/// previous process is moved to `error`.
pub async fn build_automation(
    pool: SqlitePool,
    cfg: &DiscoveryConfig,
    tables: ScoringTables,
    registry: GeneratorRegistry,
) -> Result<Automation> {
    let sched = SchedulerCfg::from_config(cfg);
    let pipeline = DiscoveryPipeline::new(
        pool.clone(),
        registry,
        ConfidenceScorer::new(tables),
        RunStateTracker::new(pool.clone()),
        Broadcaster::new(),
    )
    .with_threshold(cfg.confidence_threshold)
    .with_interval(sched.interval);

    let automation = Automation::new(pool, pipeline, Duration::from_secs(cfg.run_timeout_secs.max(1)));
    automation
        .recover_stale_run()
        .await
        .context("recovering run state")?;
    automation.set_schedule_enabled(cfg.autostart);
    Ok(automation)
}

/// Application state with the bundled generators and the scoring tables
/// from `cfg.scoring_path`.
pub async fn build_state(pool: SqlitePool, cfg: &DiscoveryConfig) -> Result<AppState> {
    let tables = ScoringTables::load_or_seed(&cfg.scoring_path);
    let registry = discovery::providers::default_registry(cfg.live_feeds)?;
    let automation = build_automation(pool.clone(), cfg, tables, registry).await?;
    Ok(AppState {
        pool,
        automation,
        keep_alive: SchedulerCfg::from_config(cfg).heartbeat,
    })
}
