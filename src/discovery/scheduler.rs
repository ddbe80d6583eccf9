use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::automation::Automation;
use crate::config::{DiscoveryConfig, MAX_INTERVAL_HOURS};
use crate::discovery::RunScope;

#[derive(Clone, Copy, Debug)]
pub struct SchedulerCfg {
    pub interval: Duration,
    pub heartbeat: Duration,
}

impl SchedulerCfg {
    pub fn from_config(cfg: &DiscoveryConfig) -> Self {
        Self {
            interval: Duration::from_secs(
                cfg.interval_hours
                    .clamp(1, MAX_INTERVAL_HOURS)
                    .saturating_mul(3600),
            ),
            heartbeat: Duration::from_secs(cfg.heartbeat_secs.max(1)),
        }
    }
}

/// Run the pipeline every `interval` while the schedule is enabled. Ticks
/// that land while a run is in flight are skipped.
pub fn spawn_scheduler(automation: Automation, cfg: SchedulerCfg) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cfg.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !automation.schedule_enabled() {
                tracing::debug!(target: "discovery", "schedule disabled; tick ignored");
                continue;
            }
            counter!("discovery_scheduled_ticks_total").increment(1);
            if let Some(summary) = automation.run_if_idle(RunScope::default()).await {
                tracing::info!(
                    target: "discovery",
                    records_created = summary.records_created,
                    "scheduled run finished"
                );
            }
        }
    })
}

/// Broadcast a status heartbeat every `heartbeat`, independent of runs.
pub fn spawn_heartbeat(automation: Automation, cfg: SchedulerCfg) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cfg.heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            automation.heartbeat().await;
        }
    })
}
