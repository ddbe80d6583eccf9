//! Alumni Achievement Tracker: binary entrypoint.
//! Loads configuration, opens the store, wires the discovery automation and
//! serves the Axum router.

use alumni_tracker::config::AppConfig;
use alumni_tracker::discovery::scheduler::{spawn_heartbeat, spawn_scheduler, SchedulerCfg};
use alumni_tracker::metrics::Metrics;
use alumni_tracker::{build_state, db, init_tracing, router};
use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing::info;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load_default().context("loading app config")?;
    let pool = db::init_database(&cfg.database_url).await?;
    if cfg.seed_demo_data {
        db::seed_demo_data(&pool).await?;
    }

    let metrics = Metrics::init(cfg.discovery.confidence_threshold)?;
    let state = build_state(pool, &cfg.discovery).await?;

    let sched = SchedulerCfg::from_config(&cfg.discovery);
    spawn_scheduler(state.automation.clone(), sched);
    spawn_heartbeat(state.automation.clone(), sched);
    info!(
        interval_hours = cfg.discovery.interval_hours,
        autostart = cfg.discovery.autostart,
        live_feeds = cfg.discovery.live_feeds,
        "discovery automation ready"
    );

    let app = router(state).merge(metrics.router());
    Ok(app.into())
}
