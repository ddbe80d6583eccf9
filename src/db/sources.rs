use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use super::decode_label;
use crate::error::{AppError, AppResult};
use crate::models::DataSource;

const SELECT_SOURCES: &str = "SELECT id, name, type, url, active, rate_limit, last_checked, \
     last_error, success_rate FROM data_sources";

#[derive(FromRow)]
struct SourceRow {
    id: i64,
    name: String,
    #[sqlx(rename = "type")]
    kind: String,
    url: String,
    active: bool,
    rate_limit: i64,
    last_checked: Option<DateTime<Utc>>,
    last_error: Option<String>,
    success_rate: f64,
}

impl TryFrom<SourceRow> for DataSource {
    type Error = AppError;

    fn try_from(r: SourceRow) -> AppResult<Self> {
        Ok(DataSource {
            id: r.id,
            name: r.name,
            kind: decode_label("source type", &r.kind)?,
            url: r.url,
            active: r.active,
            rate_limit: r.rate_limit,
            last_checked: r.last_checked,
            last_error: r.last_error,
            success_rate: r.success_rate,
        })
    }
}

fn convert(rows: Vec<SourceRow>) -> AppResult<Vec<DataSource>> {
    rows.into_iter().map(DataSource::try_from).collect()
}

/// Every configured source, ordered by name.
pub async fn list(pool: &SqlitePool) -> AppResult<Vec<DataSource>> {
    let rows: Vec<SourceRow> = sqlx::query_as(&format!("{SELECT_SOURCES} ORDER BY name"))
        .fetch_all(pool)
        .await?;
    convert(rows)
}

/// Active sources ordered by name, optionally restricted to the given
/// names (case-insensitive).
pub async fn active(pool: &SqlitePool, only: Option<&[String]>) -> AppResult<Vec<DataSource>> {
    let rows: Vec<SourceRow> =
        sqlx::query_as(&format!("{SELECT_SOURCES} WHERE active = 1 ORDER BY name"))
            .fetch_all(pool)
            .await?;
    let all = convert(rows)?;
    Ok(match only {
        None => all,
        Some(names) => all
            .into_iter()
            .filter(|s| names.iter().any(|n| n.trim().eq_ignore_ascii_case(&s.name)))
            .collect(),
    })
}

/// Store the outcome of one processing attempt.
pub async fn record_attempt(
    pool: &SqlitePool,
    id: i64,
    success_rate: f64,
    last_error: Option<&str>,
    at: DateTime<Utc>,
) -> AppResult<()> {
    sqlx::query("UPDATE data_sources SET success_rate = ?, last_error = ?, last_checked = ? WHERE id = ?")
        .bind(success_rate)
        .bind(last_error)
        .bind(at)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
