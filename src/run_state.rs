//! Persistent state of the discovery pipeline (single row, id = 1).
//!
//! `RunStateTracker` is the only reader and writer of that row. Writes go
//! through an async mutex so read-modify-write patches never interleave.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use tokio::sync::Mutex;

use crate::db::decode_label;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Stopped,
    Running,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Stopped => "stopped",
            RunStatus::Running => "running",
            RunStatus::Error => "error",
        }
    }

    /// stopped/error -> running, running -> stopped/error, or no change.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Stopped, Running) | (Error, Running) | (Running, Stopped) | (Running, Error)
        ) || self == next
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stopped" => Ok(RunStatus::Stopped),
            "running" => Ok(RunStatus::Running),
            "error" => Ok(RunStatus::Error),
            other => Err(AppError::Validation(format!("unknown run status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunState {
    pub status: RunStatus,
    pub last_run_start: Option<DateTime<Utc>>,
    pub last_run_end: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: i64,
    pub total_run_ms: i64,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    /// Mean duration of completed runs in seconds, 0 before the first run.
    pub fn average_run_secs(&self) -> f64 {
        if self.run_count <= 0 {
            0.0
        } else {
            self.total_run_ms as f64 / self.run_count as f64 / 1000.0
        }
    }
}

/// Fields to merge into the current state. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct RunStatePatch {
    pub status: Option<RunStatus>,
    pub last_run_start: Option<DateTime<Utc>>,
    pub last_run_end: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    /// Bump the run counter by one.
    pub count_run: bool,
    pub add_run_ms: i64,
}

impl RunStatePatch {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

#[derive(FromRow)]
struct RunStateRow {
    status: String,
    last_run_start: Option<DateTime<Utc>>,
    last_run_end: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
    run_count: i64,
    total_run_ms: i64,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RunStateRow> for RunState {
    type Error = AppError;

    fn try_from(r: RunStateRow) -> AppResult<Self> {
        Ok(RunState {
            status: decode_label("run status", &r.status)?,
            last_run_start: r.last_run_start,
            last_run_end: r.last_run_end,
            next_run: r.next_run,
            run_count: r.run_count,
            total_run_ms: r.total_run_ms,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct RunStateTracker {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl RunStateTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Current state, creating the default (stopped) row on first access.
    pub async fn get(&self) -> AppResult<RunState> {
        sqlx::query("INSERT OR IGNORE INTO run_state (id, status, run_count, total_run_ms, updated_at) VALUES (1, ?, 0, 0, ?)")
            .bind(RunStatus::Stopped.as_str())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        let row: RunStateRow = sqlx::query_as(
            "SELECT status, last_run_start, last_run_end, next_run, run_count, total_run_ms, updated_at \
             FROM run_state WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    /// Merge `patch` into the state. Rejects illegal status transitions.
    pub async fn update(&self, patch: RunStatePatch) -> AppResult<RunState> {
        let _guard = self.write_lock.lock().await;
        let current = self.get().await?;
        let now = Utc::now();
        let mut next = current.clone();

        if let Some(to) = patch.status {
            if !current.status.can_transition_to(to) {
                return Err(AppError::InvalidTransition {
                    from: current.status,
                    to,
                });
            }
            next.status = to;
            if to == RunStatus::Running && current.status != RunStatus::Running {
                next.last_run_start = Some(now);
            }
            if current.status == RunStatus::Running && to != RunStatus::Running {
                next.last_run_end = Some(now);
            }
        }
        if let Some(t) = patch.last_run_start {
            next.last_run_start = Some(t);
        }
        if let Some(t) = patch.last_run_end {
            next.last_run_end = Some(t);
        }
        if let Some(t) = patch.next_run {
            next.next_run = Some(t);
        }
        if patch.count_run {
            next.run_count += 1;
        }
        next.total_run_ms += patch.add_run_ms.max(0);
        next.updated_at = now;

        sqlx::query(
            "UPDATE run_state SET status = ?, last_run_start = ?, last_run_end = ?, next_run = ?, \
             run_count = ?, total_run_ms = ?, updated_at = ? WHERE id = 1",
        )
        .bind(next.status.as_str())
        .bind(next.last_run_start)
        .bind(next.last_run_end)
        .bind(next.next_run)
        .bind(next.run_count)
        .bind(next.total_run_ms)
        .bind(next.updated_at)
        .execute(&self.pool)
        .await?;

        if next.status != current.status {
            tracing::info!(target: "discovery", from = %current.status, to = %next.status, "run state changed");
        }
        Ok(next)
    }

    /// Enter `running` and count the run. The start time is always
    /// refreshed, even over a leftover `running` row.
    pub async fn mark_started(&self) -> AppResult<RunState> {
        self.update(RunStatePatch {
            status: Some(RunStatus::Running),
            last_run_start: Some(Utc::now()),
            count_run: true,
            ..Default::default()
        })
        .await
    }

    /// A `running` row with no run in flight was left by a process that
    /// died mid-run: move it to `error`. Returns whether anything changed.
    pub async fn recover_interrupted(&self) -> AppResult<bool> {
        if self.get().await?.status != RunStatus::Running {
            return Ok(false);
        }
        self.update(RunStatePatch::status(RunStatus::Error)).await?;
        tracing::warn!(target: "discovery", "previous run was interrupted; run state set to error");
        Ok(true)
    }

    /// Leave `running` with the outcome of a run. If the state already left
    /// `running` (an explicit stop mid-run), the timings are still recorded
    /// but the status is left alone.
    pub async fn mark_finished(
        &self,
        outcome: RunStatus,
        elapsed_ms: i64,
        next_run: DateTime<Utc>,
    ) -> AppResult<RunState> {
        let patch = RunStatePatch {
            status: Some(outcome),
            next_run: Some(next_run),
            add_run_ms: elapsed_ms,
            ..Default::default()
        };
        match self.update(patch.clone()).await {
            Err(AppError::InvalidTransition { from, to }) => {
                tracing::warn!(target: "discovery", %from, %to, "run finished after state changed; keeping status");
                self.update(RunStatePatch {
                    status: None,
                    last_run_end: Some(Utc::now()),
                    ..patch
                })
                .await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_memory;

    async fn tracker() -> RunStateTracker {
        RunStateTracker::new(connect_memory().await.unwrap())
    }

    #[test]
    fn transition_table() {
        use RunStatus::*;
        assert!(Stopped.can_transition_to(Running));
        assert!(Error.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopped));
        assert!(Running.can_transition_to(Error));
        assert!(Error.can_transition_to(Error));
        assert!(!Stopped.can_transition_to(Error));
        assert!(!Error.can_transition_to(Stopped));
    }

    #[tokio::test]
    async fn first_get_creates_stopped_state() {
        let t = tracker().await;
        let s = t.get().await.unwrap();
        assert_eq!(s.status, RunStatus::Stopped);
        assert_eq!(s.run_count, 0);
        assert!(s.last_run_start.is_none());
        assert_eq!(t.get().await.unwrap(), s);
    }

    #[tokio::test]
    async fn running_then_error_stamps_end() {
        let t = tracker().await;
        t.update(RunStatePatch::status(RunStatus::Running)).await.unwrap();
        t.update(RunStatePatch::status(RunStatus::Error)).await.unwrap();

        let s = t.get().await.unwrap();
        assert_eq!(s.status, RunStatus::Error);
        assert!(s.last_run_start.is_some());
        assert!(s.last_run_end.is_some());
        assert!(s.last_run_end >= s.last_run_start);
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected_and_state_kept() {
        let t = tracker().await;
        let err = t.update(RunStatePatch::status(RunStatus::Error)).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition { from: RunStatus::Stopped, to: RunStatus::Error }
        ));
        assert_eq!(t.get().await.unwrap().status, RunStatus::Stopped);
    }

    #[tokio::test]
    async fn counters_accumulate() {
        let t = tracker().await;
        let next = Utc::now() + chrono::Duration::hours(6);
        for ms in [1000, 3000] {
            t.mark_started().await.unwrap();
            t.mark_finished(RunStatus::Stopped, ms, next).await.unwrap();
        }
        let s = t.get().await.unwrap();
        assert_eq!(s.run_count, 2);
        assert_eq!(s.total_run_ms, 4000);
        assert_eq!(s.average_run_secs(), 2.0);
        assert_eq!(
            s.next_run.map(|t| t.timestamp_millis()),
            Some(next.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn finish_after_external_stop_keeps_status() {
        let t = tracker().await;
        t.mark_started().await.unwrap();
        t.update(RunStatePatch::status(RunStatus::Stopped)).await.unwrap();
        let s = t
            .mark_finished(RunStatus::Error, 500, Utc::now())
            .await
            .unwrap();
        assert_eq!(s.status, RunStatus::Stopped);
        assert_eq!(s.total_run_ms, 500);
    }

    #[tokio::test]
    async fn leftover_running_row_is_recovered_and_restart_restamps() {
        let t = tracker().await;
        let stale = Utc::now() - chrono::Duration::hours(3);
        t.update(RunStatePatch {
            status: Some(RunStatus::Running),
            last_run_start: Some(stale),
            ..Default::default()
        })
        .await
        .unwrap();

        // same row, seen by a fresh tracker after a restart
        let restarted = RunStateTracker::new(t.pool.clone());
        assert!(restarted.recover_interrupted().await.unwrap());
        let s = restarted.get().await.unwrap();
        assert_eq!(s.status, RunStatus::Error);
        assert!(s.last_run_end.is_some_and(|end| end > stale));
        assert!(!restarted.recover_interrupted().await.unwrap());

        let s = restarted.mark_started().await.unwrap();
        assert!(s.last_run_start.is_some_and(|start| start > stale));
    }

    #[tokio::test]
    async fn mark_started_over_running_row_refreshes_start() {
        let t = tracker().await;
        let stale = Utc::now() - chrono::Duration::hours(3);
        t.update(RunStatePatch {
            status: Some(RunStatus::Running),
            last_run_start: Some(stale),
            ..Default::default()
        })
        .await
        .unwrap();

        let s = t.mark_started().await.unwrap();
        assert_eq!(s.status, RunStatus::Running);
        assert!(s.last_run_start.is_some_and(|start| start > stale));
    }
}
