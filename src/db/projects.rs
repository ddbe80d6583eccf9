use chrono::NaiveDate;
use sqlx::{FromRow, SqlitePool};

use super::decode_label;
use crate::error::{AppError, AppResult};
use crate::models::Project;

#[derive(FromRow)]
struct ProjectRow {
    id: i64,
    title: String,
    release_date: Option<NaiveDate>,
    #[sqlx(rename = "type")]
    kind: String,
    imdb_id: Option<String>,
    tmdb_id: Option<String>,
    streaming_platforms: String,
    poster_url: Option<String>,
    synopsis: Option<String>,
    runtime_minutes: Option<i64>,
    budget: Option<f64>,
    box_office: Option<f64>,
}

impl TryFrom<ProjectRow> for Project {
    type Error = AppError;

    fn try_from(r: ProjectRow) -> AppResult<Self> {
        Ok(Project {
            id: r.id,
            title: r.title,
            release_date: r.release_date,
            kind: decode_label("project type", &r.kind)?,
            imdb_id: r.imdb_id,
            tmdb_id: r.tmdb_id,
            streaming_platforms: decode_platforms(&r.streaming_platforms)?,
            poster_url: r.poster_url,
            synopsis: r.synopsis,
            runtime_minutes: r.runtime_minutes,
            budget: r.budget,
            box_office: r.box_office,
        })
    }
}

/// Streaming platforms are stored as a JSON array.
pub(crate) fn decode_platforms(raw: &str) -> AppResult<Vec<String>> {
    serde_json::from_str(raw)
        .map_err(|e| AppError::Other(anyhow::anyhow!("bad streaming_platforms in store: {e}")))
}

pub async fn list(pool: &SqlitePool) -> AppResult<Vec<Project>> {
    let rows: Vec<ProjectRow> = sqlx::query_as(
        "SELECT id, title, release_date, type, imdb_id, tmdb_id, streaming_platforms, poster_url, \
         synopsis, runtime_minutes, budget, box_office FROM projects ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(Project::try_from).collect()
}
