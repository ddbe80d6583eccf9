use std::convert::Infallible;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::sse::{Event, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::automation::{Automation, AutomationStatus, SourceStatus};
use crate::dashboard::{build_dashboard, DashboardStats};
use crate::db::{self, achievements::DiscoveryRow};
use crate::discovery::RunScope;
use crate::error::{AppError, AppResult};
use crate::models::{Achievement, Alumni, AlumniProjectCredit, DataSource, NewAchievement, NewAlumni, Project};
use crate::notify::sse::event_stream;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub automation: Automation,
    /// SSE keep-alive period.
    pub keep_alive: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // alumni
        .route("/api/alumni", get(list_alumni).post(create_alumni))
        .route("/api/alumni/search", get(search_alumni))
        .route("/api/alumni/{id}", get(get_alumni))
        .route("/api/alumni/{id}/projects", get(alumni_projects))
        // achievements
        .route("/api/achievements", get(list_achievements).post(create_achievement))
        .route("/api/achievements/unverified", get(unverified_achievements))
        .route("/api/achievements/alumni/{id}", get(achievements_for_alumni))
        .route("/api/achievements/{id}/verify", post(verify_achievement))
        // catalogue
        .route("/api/projects", get(list_projects))
        .route("/api/data-sources", get(list_data_sources))
        .route("/api/dashboard/stats", get(dashboard_stats))
        // automation
        .route("/api/automation/toggle", post(toggle))
        .route("/api/automation/manual-run", post(manual_run))
        .route("/api/automation/status", get(automation_status))
        .route("/api/automation/sources", get(automation_sources))
        .route("/api/automation/discoveries", get(automation_discoveries))
        .route("/api/automation/events", get(automation_events))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_alumni(State(st): State<AppState>) -> AppResult<Json<Vec<Alumni>>> {
    Ok(Json(db::alumni::list(&st.pool).await?))
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

async fn search_alumni(
    State(st): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Vec<Alumni>>> {
    if query.q.trim().is_empty() {
        return Err(AppError::Validation("query parameter 'q' is required".into()));
    }
    Ok(Json(db::alumni::search(&st.pool, &query.q).await?))
}

async fn get_alumni(State(st): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<Alumni>> {
    Ok(Json(db::alumni::get(&st.pool, id).await?))
}

async fn create_alumni(
    State(st): State<AppState>,
    Json(body): Json<NewAlumni>,
) -> AppResult<Json<Alumni>> {
    Ok(Json(db::alumni::create(&st.pool, body).await?))
}

async fn alumni_projects(
    State(st): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<AlumniProjectCredit>>> {
    Ok(Json(db::alumni::projects(&st.pool, id).await?))
}

async fn list_achievements(State(st): State<AppState>) -> AppResult<Json<Vec<Achievement>>> {
    Ok(Json(db::achievements::list(&st.pool).await?))
}

async fn achievements_for_alumni(
    State(st): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<Achievement>>> {
    if !db::alumni::exists(&st.pool, id).await? {
        return Err(AppError::NotFound(format!("alumni {id}")));
    }
    Ok(Json(db::achievements::by_alumni(&st.pool, id).await?))
}

async fn unverified_achievements(State(st): State<AppState>) -> AppResult<Json<Vec<Achievement>>> {
    Ok(Json(db::achievements::unverified(&st.pool).await?))
}

async fn create_achievement(
    State(st): State<AppState>,
    Json(body): Json<NewAchievement>,
) -> AppResult<Json<Achievement>> {
    Ok(Json(db::achievements::create(&st.pool, body).await?))
}

async fn verify_achievement(
    State(st): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Achievement>> {
    Ok(Json(db::achievements::verify(&st.pool, id).await?))
}

async fn list_projects(State(st): State<AppState>) -> AppResult<Json<Vec<Project>>> {
    Ok(Json(db::projects::list(&st.pool).await?))
}

async fn list_data_sources(State(st): State<AppState>) -> AppResult<Json<Vec<DataSource>>> {
    Ok(Json(db::sources::list(&st.pool).await?))
}

async fn dashboard_stats(State(st): State<AppState>) -> AppResult<Json<DashboardStats>> {
    let alumni = db::alumni::list(&st.pool).await?;
    let achievements = db::achievements::list(&st.pool).await?;
    let projects = db::projects::list(&st.pool).await?;
    Ok(Json(build_dashboard(&alumni, &achievements, projects.len())))
}

// ---------- automation ----------

#[derive(Deserialize)]
struct ToggleReq {
    action: String,
}

async fn toggle(State(st): State<AppState>, Json(body): Json<ToggleReq>) -> AppResult<Json<Value>> {
    let status = st.automation.toggle(&body.action).await?;
    Ok(Json(json!({ "status": status })))
}

#[derive(Serialize)]
struct ManualRunResp {
    status: &'static str,
    message: String,
    source_names: Option<Vec<String>>,
    subject_ids: Option<Vec<i64>>,
}

/// Accepts an empty body as "everything".
async fn manual_run(State(st): State<AppState>, body: Bytes) -> AppResult<Json<ManualRunResp>> {
    let scope: RunScope = if body.iter().all(u8::is_ascii_whitespace) {
        RunScope::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("invalid run scope: {e}")))?
    };

    st.automation.trigger_run(scope.clone())?;
    tracing::info!(target: "discovery", ?scope, "manual run initiated");
    Ok(Json(ManualRunResp {
        status: "initiated",
        message: "discovery run started".into(),
        source_names: scope.source_names,
        subject_ids: scope.subject_ids,
    }))
}

async fn automation_status(State(st): State<AppState>) -> AppResult<Json<AutomationStatus>> {
    Ok(Json(st.automation.status().await?))
}

async fn automation_sources(State(st): State<AppState>) -> AppResult<Json<Vec<SourceStatus>>> {
    Ok(Json(st.automation.sources_status().await?))
}

#[derive(Deserialize)]
struct DiscoveriesQuery {
    #[serde(default)]
    verified_only: bool,
    limit: Option<i64>,
}

async fn automation_discoveries(
    State(st): State<AppState>,
    Query(q): Query<DiscoveriesQuery>,
) -> AppResult<Json<Vec<DiscoveryRow>>> {
    Ok(Json(st.automation.discoveries(q.verified_only, q.limit).await?))
}

async fn automation_events(
    State(st): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let listener = st.automation.subscribe().await;
    event_stream(listener, st.keep_alive)
}
