//! Automation controller: the single entry point for starting, stopping and
//! observing discovery runs.
//!
//! At most one run executes at a time. The run lock is an owned async mutex
//! taken with `try_lock`, so a manual run while busy is a 409 and a
//! scheduled tick while busy is skipped. Every run is bounded by a watchdog
//! timeout that leaves the tracker in `error` if it fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

use crate::db::achievements::{self, DiscoveryRow};
use crate::db::sources;
use crate::discovery::{DiscoveryPipeline, RunScope, RunSummary};
use crate::error::{AppError, AppResult};
use crate::models::{round2_value, SourceKind};
use crate::notify::{Listener, PipelineEvent, StatusSnapshot};
use crate::run_state::{RunStatePatch, RunStatus};

pub const DEFAULT_DISCOVERY_LIMIT: i64 = 20;
pub const MAX_DISCOVERY_LIMIT: i64 = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutomationStatus {
    pub status: RunStatus,
    pub schedule_enabled: bool,
    pub discoveries_today: i64,
    /// Percent change of today's discoveries against yesterday's.
    pub discoveries_change: f64,
    pub total_discoveries: i64,
    /// Records scored above 0.8.
    pub high_confidence: i64,
    pub active_sources: i64,
    pub total_sources: i64,
    /// Mean reliability of the active sources, in percent.
    pub success_rate: f64,
    /// Mean run duration in seconds.
    pub avg_processing_time: f64,
    pub run_count: i64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_scheduled_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStatus {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub active: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    /// Reliability in percent.
    pub success_rate: f64,
    pub items_found_today: i64,
    pub rate_limit: i64,
    pub errors: Vec<String>,
}

fn start_of_today() -> DateTime<Utc> {
    let now = Utc::now();
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|d| d.and_utc())
        .unwrap_or(now)
}

/// Change from `before` to `now` in percent. From zero, any growth is
/// reported as +100%.
fn percent_change(before: i64, now: i64) -> f64 {
    if before == 0 {
        return if now > 0 { 100.0 } else { 0.0 };
    }
    (now - before) as f64 / before as f64 * 100.0
}

#[derive(Clone)]
pub struct Automation {
    pool: SqlitePool,
    pipeline: DiscoveryPipeline,
    run_lock: Arc<Mutex<()>>,
    schedule_enabled: Arc<AtomicBool>,
    run_timeout: Duration,
}

impl Automation {
    pub fn new(pool: SqlitePool, pipeline: DiscoveryPipeline, run_timeout: Duration) -> Self {
        Self {
            pool,
            pipeline,
            run_lock: Arc::new(Mutex::new(())),
            schedule_enabled: Arc::new(AtomicBool::new(false)),
            run_timeout,
        }
    }

    pub fn pipeline(&self) -> &DiscoveryPipeline {
        &self.pipeline
    }

    pub fn schedule_enabled(&self) -> bool {
        self.schedule_enabled.load(Ordering::SeqCst)
    }

    pub fn set_schedule_enabled(&self, on: bool) {
        self.schedule_enabled.store(on, Ordering::SeqCst);
    }

    pub fn is_busy(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Clear a `running` state that no run in this process owns.
    pub async fn recover_stale_run(&self) -> AppResult<bool> {
        match self.run_lock.clone().try_lock_owned() {
            Ok(_guard) => self.pipeline.tracker().recover_interrupted().await,
            Err(_) => Ok(false),
        }
    }

    /// `start` enables the schedule and kicks off a run unless one is in
    /// flight; `stop` disables the schedule and marks an in-flight run
    /// stopped. Returns the resulting status.
    pub async fn toggle(&self, action: &str) -> AppResult<RunStatus> {
        match action.trim().to_ascii_lowercase().as_str() {
            "start" => {
                self.set_schedule_enabled(true);
                let status = match self.trigger_run(RunScope::default()) {
                    Ok(_) => RunStatus::Running,
                    // a run is still draining after a stop: it counts as running again
                    Err(AppError::Conflict(_)) => self.resume_in_flight().await?,
                    Err(e) => return Err(e),
                };
                tracing::info!(target: "discovery", %status, "automation started");
                Ok(status)
            }
            "stop" => {
                self.set_schedule_enabled(false);
                let tracker = self.pipeline.tracker();
                let state = if tracker.get().await?.status == RunStatus::Running {
                    tracker.update(RunStatePatch::status(RunStatus::Stopped)).await?
                } else {
                    tracker.get().await?
                };
                tracing::info!(target: "discovery", status = %state.status, "automation stopped");
                Ok(state.status)
            }
            other => Err(AppError::Validation(format!(
                "invalid action '{other}' (must be 'start' or 'stop')"
            ))),
        }
    }

    /// Put the tracker back to `running` for the run holding the lock,
    /// keeping its original start time.
    async fn resume_in_flight(&self) -> AppResult<RunStatus> {
        let tracker = self.pipeline.tracker();
        let state = tracker.get().await?;
        if state.status == RunStatus::Running {
            return Ok(state.status);
        }
        let resumed = tracker
            .update(RunStatePatch {
                status: Some(RunStatus::Running),
                last_run_start: state.last_run_start,
                ..Default::default()
            })
            .await?;
        if !self.is_busy() {
            // the run released the lock while we were resuming it
            return Ok(tracker.update(RunStatePatch::status(RunStatus::Stopped)).await?.status);
        }
        Ok(resumed.status)
    }

    /// Start a run in the background. Fails with a conflict while another
    /// run holds the lock.
    pub fn trigger_run(&self, scope: RunScope) -> AppResult<JoinHandle<Option<RunSummary>>> {
        let guard = self
            .run_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| AppError::Conflict("a discovery run is already in progress".into()))?;
        let this = self.clone();
        Ok(tokio::spawn(async move { this.run_locked(guard, scope).await }))
    }

    /// Run now if idle; `None` when another run is in flight or the run failed.
    pub async fn run_if_idle(&self, scope: RunScope) -> Option<RunSummary> {
        match self.run_lock.clone().try_lock_owned() {
            Ok(guard) => self.run_locked(guard, scope).await,
            Err(_) => {
                tracing::info!(target: "discovery", "run already in progress; skipping");
                None
            }
        }
    }

    async fn run_locked(&self, _guard: OwnedMutexGuard<()>, scope: RunScope) -> Option<RunSummary> {
        let t0 = Instant::now();
        match tokio::time::timeout(self.run_timeout, self.pipeline.run(&scope)).await {
            Ok(Ok(summary)) => Some(summary),
            // already recorded by the pipeline
            Ok(Err(_)) => None,
            Err(_) => {
                let e = anyhow::anyhow!("run exceeded {}s watchdog", self.run_timeout.as_secs());
                self.pipeline
                    .fail(&e, t0.elapsed().as_millis() as i64)
                    .await;
                None
            }
        }
    }

    pub async fn status(&self) -> AppResult<AutomationStatus> {
        let state = self.pipeline.tracker().get().await?;
        let all = sources::list(&self.pool).await?;
        let active: Vec<_> = all.iter().filter(|s| s.active).collect();
        let success_rate = if active.is_empty() {
            0.0
        } else {
            active.iter().map(|s| s.success_rate).sum::<f64>() / active.len() as f64 * 100.0
        };

        let today_start = start_of_today();
        let discoveries_today = achievements::count_created_since(&self.pool, today_start).await?;
        let discoveries_yesterday = achievements::count_created_between(
            &self.pool,
            today_start - chrono::Duration::days(1),
            today_start,
        )
        .await?;

        Ok(AutomationStatus {
            status: state.status,
            schedule_enabled: self.schedule_enabled(),
            discoveries_today,
            discoveries_change: round2_value(percent_change(discoveries_yesterday, discoveries_today)),
            total_discoveries: achievements::count_total(&self.pool).await?,
            high_confidence: achievements::count_high_confidence(&self.pool).await?,
            active_sources: active.len() as i64,
            total_sources: all.len() as i64,
            success_rate: round2_value(success_rate),
            avg_processing_time: round2_value(state.average_run_secs()),
            run_count: state.run_count,
            last_run: state.last_run_end.or(state.last_run_start),
            next_scheduled_run: state.next_run,
        })
    }

    pub async fn sources_status(&self) -> AppResult<Vec<SourceStatus>> {
        let interval = chrono::Duration::from_std(self.pipeline.interval())
            .map_err(|e| AppError::Other(e.into()))?;
        let found = achievements::counts_by_source_since(&self.pool, start_of_today()).await?;

        Ok(sources::list(&self.pool)
            .await?
            .into_iter()
            .map(|s| {
                let items_found_today = found
                    .iter()
                    .find(|(name, _)| *name == s.name)
                    .map_or(0, |(_, n)| *n);
                SourceStatus {
                    next_run: s.active.then(|| s.last_checked.map(|t| t + interval)).flatten(),
                    last_run: s.last_checked,
                    success_rate: round2_value(s.success_rate * 100.0),
                    items_found_today,
                    errors: s.last_error.into_iter().collect(),
                    name: s.name,
                    kind: s.kind,
                    active: s.active,
                    rate_limit: s.rate_limit,
                }
            })
            .collect())
    }

    pub async fn discoveries(&self, verified_only: bool, limit: Option<i64>) -> AppResult<Vec<DiscoveryRow>> {
        let limit = limit
            .unwrap_or(DEFAULT_DISCOVERY_LIMIT)
            .clamp(1, MAX_DISCOVERY_LIMIT);
        achievements::recent_discoveries(&self.pool, verified_only, limit).await
    }

    pub async fn snapshot(&self) -> AppResult<StatusSnapshot> {
        let state = self.pipeline.tracker().get().await?;
        let active = sources::active(&self.pool, None).await?.len() as i64;
        Ok(StatusSnapshot {
            status: state.status,
            schedule_enabled: self.schedule_enabled(),
            discoveries_today: achievements::count_created_since(&self.pool, start_of_today()).await?,
            active_sources: active,
            run_count: state.run_count,
            last_run: state.last_run_end.or(state.last_run_start),
            next_scheduled_run: state.next_run,
            timestamp: Utc::now(),
        })
    }

    /// New push-channel listener, primed with a status snapshot.
    pub async fn subscribe(&self) -> Listener {
        let snapshot = match self.snapshot().await {
            Ok(s) => Some(PipelineEvent::Status(s)),
            Err(e) => {
                tracing::warn!(error = %e, "status snapshot unavailable");
                None
            }
        };
        self.pipeline.broadcaster().connect(snapshot)
    }

    pub async fn heartbeat(&self) {
        let status = match self.pipeline.tracker().get().await {
            Ok(s) => s.status,
            Err(e) => {
                tracing::warn!(error = %e, "heartbeat could not read run state");
                return;
            }
        };
        self.pipeline.broadcaster().broadcast(PipelineEvent::Heartbeat {
            status,
            timestamp: Utc::now(),
        });
    }
}
