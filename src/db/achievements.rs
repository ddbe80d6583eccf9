use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

use super::decode_label;
use crate::discovery::types::Candidate;
use crate::error::{AppError, AppResult};
use crate::models::{round2_value, Achievement, NewAchievement};

/// Unverified records below this score show up in the review queue.
pub const REVIEW_QUEUE_MAX_SCORE: f64 = 0.9;
/// Records above this score count as high confidence.
pub const HIGH_CONFIDENCE_SCORE: f64 = 0.8;

const SELECT_ACHIEVEMENTS: &str = "SELECT id, alumni_id, type, title, date, description, \
     confidence_score, verified, source, source_url, project_id, created_at FROM achievements";

#[derive(FromRow)]
struct AchievementRow {
    id: i64,
    alumni_id: i64,
    #[sqlx(rename = "type")]
    kind: String,
    title: String,
    date: NaiveDate,
    description: String,
    confidence_score: f64,
    verified: bool,
    source: String,
    source_url: Option<String>,
    project_id: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AchievementRow> for Achievement {
    type Error = AppError;

    fn try_from(r: AchievementRow) -> AppResult<Self> {
        Ok(Achievement {
            id: r.id,
            alumni_id: r.alumni_id,
            kind: decode_label("achievement type", &r.kind)?,
            title: r.title,
            date: r.date,
            description: r.description,
            confidence_score: r.confidence_score,
            verified: r.verified,
            source: r.source,
            source_url: r.source_url,
            project_id: r.project_id,
            created_at: r.created_at,
        })
    }
}

fn convert(rows: Vec<AchievementRow>) -> AppResult<Vec<Achievement>> {
    rows.into_iter().map(Achievement::try_from).collect()
}

pub async fn list(pool: &SqlitePool) -> AppResult<Vec<Achievement>> {
    let rows: Vec<AchievementRow> =
        sqlx::query_as(&format!("{SELECT_ACHIEVEMENTS} ORDER BY date DESC, id DESC"))
            .fetch_all(pool)
            .await?;
    convert(rows)
}

pub async fn get(pool: &SqlitePool, id: i64) -> AppResult<Achievement> {
    let row: Option<AchievementRow> =
        sqlx::query_as(&format!("{SELECT_ACHIEVEMENTS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
    row.ok_or_else(|| AppError::NotFound(format!("achievement {id}")))?
        .try_into()
}

pub async fn by_alumni(pool: &SqlitePool, alumni_id: i64) -> AppResult<Vec<Achievement>> {
    let rows: Vec<AchievementRow> = sqlx::query_as(&format!(
        "{SELECT_ACHIEVEMENTS} WHERE alumni_id = ? ORDER BY date DESC, id DESC"
    ))
    .bind(alumni_id)
    .fetch_all(pool)
    .await?;
    convert(rows)
}

/// Review queue: unverified and not already near-certain.
pub async fn unverified(pool: &SqlitePool) -> AppResult<Vec<Achievement>> {
    let rows: Vec<AchievementRow> = sqlx::query_as(&format!(
        "{SELECT_ACHIEVEMENTS} WHERE verified = 0 AND confidence_score < ? ORDER BY confidence_score DESC, id"
    ))
    .bind(REVIEW_QUEUE_MAX_SCORE)
    .fetch_all(pool)
    .await?;
    convert(rows)
}

pub async fn create(pool: &SqlitePool, new: NewAchievement) -> AppResult<Achievement> {
    let new = new.validated()?;
    if !super::alumni::exists(pool, new.alumni_id).await? {
        return Err(AppError::NotFound(format!("alumni {}", new.alumni_id)));
    }
    let res = sqlx::query(
        "INSERT INTO achievements (alumni_id, type, title, date, description, confidence_score, \
         verified, source, source_url, project_id, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(new.alumni_id)
    .bind(new.kind.as_str())
    .bind(&new.title)
    .bind(new.date)
    .bind(&new.description)
    .bind(new.confidence_score)
    .bind(new.verified)
    .bind(&new.source)
    .bind(&new.source_url)
    .bind(new.project_id)
    .bind(Utc::now())
    .execute(pool)
    .await;

    let id = match res {
        Ok(done) => done.last_insert_rowid(),
        Err(e) => {
            let err = AppError::from(e);
            return Err(if err.is_unique_violation() {
                AppError::Conflict(format!(
                    "achievement '{}' from '{}' already recorded for alumni {}",
                    new.title, new.source, new.alumni_id
                ))
            } else {
                err
            });
        }
    };
    get(pool, id).await
}

pub async fn verify(pool: &SqlitePool, id: i64) -> AppResult<Achievement> {
    let done = sqlx::query("UPDATE achievements SET verified = 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if done.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("achievement {id}")));
    }
    tracing::info!(achievement_id = id, "achievement verified");
    get(pool, id).await
}

/// Whether a record with the same (alumni, title, source) identity exists.
pub async fn exists_identity(pool: &SqlitePool, alumni_id: i64, title: &str, source: &str) -> AppResult<bool> {
    let n: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM achievements WHERE alumni_id = ? AND title = ? AND source = ?",
    )
    .bind(alumni_id)
    .bind(title)
    .bind(source)
    .fetch_one(pool)
    .await?;
    Ok(n > 0)
}

/// Persist a scored candidate as an unverified record.
pub async fn insert_discovered(pool: &SqlitePool, c: &Candidate, score: f64) -> AppResult<Achievement> {
    let id = sqlx::query(
        "INSERT INTO achievements (alumni_id, type, title, date, description, confidence_score, \
         verified, source, source_url, created_at) VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?)",
    )
    .bind(c.subject_id)
    .bind(c.category.as_str())
    .bind(&c.title)
    .bind(c.date)
    .bind(&c.description)
    .bind(score)
    .bind(&c.source)
    .bind(&c.link)
    .bind(Utc::now())
    .execute(pool)
    .await?
    .last_insert_rowid();
    get(pool, id).await
}

pub async fn count_total(pool: &SqlitePool) -> AppResult<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM achievements")
        .fetch_one(pool)
        .await?)
}

pub async fn count_created_since(pool: &SqlitePool, since: DateTime<Utc>) -> AppResult<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM achievements WHERE created_at >= ?")
        .bind(since)
        .fetch_one(pool)
        .await?)
}

/// Records created in `[from, to)`.
pub async fn count_created_between(pool: &SqlitePool, from: DateTime<Utc>, to: DateTime<Utc>) -> AppResult<i64> {
    Ok(
        sqlx::query_scalar("SELECT COUNT(*) FROM achievements WHERE created_at >= ? AND created_at < ?")
            .bind(from)
            .bind(to)
            .fetch_one(pool)
            .await?,
    )
}

pub async fn count_high_confidence(pool: &SqlitePool) -> AppResult<i64> {
    Ok(
        sqlx::query_scalar("SELECT COUNT(*) FROM achievements WHERE confidence_score > ?")
            .bind(HIGH_CONFIDENCE_SCORE)
            .fetch_one(pool)
            .await?,
    )
}

/// Records created since `since`, grouped by source name.
pub async fn counts_by_source_since(pool: &SqlitePool, since: DateTime<Utc>) -> AppResult<Vec<(String, i64)>> {
    Ok(sqlx::query_as(
        "SELECT source, COUNT(*) FROM achievements WHERE created_at >= ? GROUP BY source",
    )
    .bind(since)
    .fetch_all(pool)
    .await?)
}

/// A stored record as listed in the discovery feed.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct DiscoveryRow {
    pub id: i64,
    pub title: String,
    pub alumni_name: String,
    pub achievement_type: String,
    #[serde(serialize_with = "ser_round2")]
    pub confidence: f64,
    pub source: String,
    /// When the record was stored.
    pub timestamp: DateTime<Utc>,
    pub source_url: Option<String>,
    pub verified: bool,
}

fn ser_round2<S: serde::Serializer>(x: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(round2_value(*x))
}

/// Most recently created records first.
pub async fn recent_discoveries(pool: &SqlitePool, verified_only: bool, limit: i64) -> AppResult<Vec<DiscoveryRow>> {
    Ok(sqlx::query_as(
        "SELECT a.id, a.title, al.name AS alumni_name, a.type AS achievement_type, \
         a.confidence_score AS confidence, a.source, a.created_at AS timestamp, \
         a.source_url, a.verified \
         FROM achievements a JOIN alumni al ON al.id = a.alumni_id \
         WHERE (? = 0 OR a.verified = 1) \
         ORDER BY a.created_at DESC, a.id DESC LIMIT ?",
    )
    .bind(verified_only)
    .bind(limit.max(0))
    .fetch_all(pool)
    .await?)
}
