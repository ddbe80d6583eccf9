use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, SqlitePool};

use super::decode_label;
use crate::discovery::types::Subject;
use crate::error::{AppError, AppResult};
use crate::models::{Alumni, AlumniProjectCredit, NewAlumni, PrivacySettings, Project};

const SELECT_ALUMNI: &str = "SELECT id, name, graduation_year, degree_program, email, linkedin_url, \
     imdb_url, website, privacy_settings, created_at, updated_at FROM alumni";

#[derive(FromRow)]
struct AlumniRow {
    id: i64,
    name: String,
    graduation_year: i32,
    degree_program: String,
    email: Option<String>,
    linkedin_url: Option<String>,
    imdb_url: Option<String>,
    website: Option<String>,
    privacy_settings: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AlumniRow> for Alumni {
    type Error = AppError;

    fn try_from(r: AlumniRow) -> AppResult<Self> {
        let privacy_settings: PrivacySettings = serde_json::from_str(&r.privacy_settings)
            .map_err(|e| AppError::Other(anyhow::anyhow!("bad privacy_settings in store: {e}")))?;
        Ok(Alumni {
            id: r.id,
            name: r.name,
            graduation_year: r.graduation_year,
            degree_program: decode_label("degree_program", &r.degree_program)?,
            email: r.email,
            linkedin_url: r.linkedin_url,
            imdb_url: r.imdb_url,
            website: r.website,
            privacy_settings,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

fn convert(rows: Vec<AlumniRow>) -> AppResult<Vec<Alumni>> {
    rows.into_iter().map(Alumni::try_from).collect()
}

pub async fn list(pool: &SqlitePool) -> AppResult<Vec<Alumni>> {
    let rows: Vec<AlumniRow> = sqlx::query_as(&format!("{SELECT_ALUMNI} ORDER BY id"))
        .fetch_all(pool)
        .await?;
    convert(rows)
}

pub async fn get(pool: &SqlitePool, id: i64) -> AppResult<Alumni> {
    let row: Option<AlumniRow> = sqlx::query_as(&format!("{SELECT_ALUMNI} WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.ok_or_else(|| AppError::NotFound(format!("alumni {id}")))?
        .try_into()
}

pub async fn exists(pool: &SqlitePool, id: i64) -> AppResult<bool> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alumni WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(n > 0)
}

/// Case-insensitive substring match on name.
pub async fn search(pool: &SqlitePool, q: &str) -> AppResult<Vec<Alumni>> {
    let pattern = format!("%{}%", q.trim().to_lowercase());
    let rows: Vec<AlumniRow> =
        sqlx::query_as(&format!("{SELECT_ALUMNI} WHERE lower(name) LIKE ? ORDER BY id"))
            .bind(pattern)
            .fetch_all(pool)
            .await?;
    convert(rows)
}

pub async fn create(pool: &SqlitePool, new: NewAlumni) -> AppResult<Alumni> {
    let new = new.validated()?;
    let now = Utc::now();
    let privacy = serde_json::to_string(&new.privacy_settings)
        .map_err(|e| AppError::Other(e.into()))?;
    let id = sqlx::query(
        "INSERT INTO alumni (name, graduation_year, degree_program, email, linkedin_url, imdb_url, \
         website, privacy_settings, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&new.name)
    .bind(new.graduation_year)
    .bind(new.degree_program.as_str())
    .bind(&new.email)
    .bind(&new.linkedin_url)
    .bind(&new.imdb_url)
    .bind(&new.website)
    .bind(privacy)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    tracing::info!(alumni_id = id, name = %new.name, "alumni created");
    get(pool, id).await
}

/// Alumni as discovery subjects, optionally restricted to the given ids.
pub async fn subjects(pool: &SqlitePool, only: Option<&[i64]>) -> AppResult<Vec<Subject>> {
    let rows: Vec<(i64, String, i32)> =
        sqlx::query_as("SELECT id, name, graduation_year FROM alumni ORDER BY id")
            .fetch_all(pool)
            .await?;
    Ok(rows
        .into_iter()
        .filter(|(id, _, _)| only.map_or(true, |ids| ids.contains(id)))
        .map(|(id, name, graduation_year)| Subject { id, name, graduation_year })
        .collect())
}

#[derive(FromRow)]
struct CreditRow {
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
    role: String,
    character_name: Option<String>,
    billing_order: Option<i64>,
    verified: bool,
}

/// Projects an alumnus is credited on, with the role they held.
pub async fn projects(pool: &SqlitePool, alumni_id: i64) -> AppResult<Vec<AlumniProjectCredit>> {
    if !exists(pool, alumni_id).await? {
        return Err(AppError::NotFound(format!("alumni {alumni_id}")));
    }
    let rows: Vec<CreditRow> = sqlx::query_as(
        "SELECT p.id, p.title, p.release_date, p.type, p.imdb_id, p.tmdb_id, p.streaming_platforms, \
         p.poster_url, p.synopsis, p.runtime_minutes, p.budget, p.box_office, \
         ap.role, ap.character_name, ap.billing_order, ap.verified \
         FROM alumni_projects ap JOIN projects p ON p.id = ap.project_id \
         WHERE ap.alumni_id = ? ORDER BY p.release_date DESC, p.id",
    )
    .bind(alumni_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            Ok(AlumniProjectCredit {
                project: Project {
                    id: r.id,
                    title: r.title,
                    release_date: r.release_date,
                    kind: decode_label("project type", &r.kind)?,
                    imdb_id: r.imdb_id,
                    tmdb_id: r.tmdb_id,
                    streaming_platforms: super::projects::decode_platforms(&r.streaming_platforms)?,
                    poster_url: r.poster_url,
                    synopsis: r.synopsis,
                    runtime_minutes: r.runtime_minutes,
                    budget: r.budget,
                    box_office: r.box_office,
                },
                role: r.role,
                character_name: r.character_name,
                billing_order: r.billing_order,
                verified: r.verified,
            })
        })
        .collect()
}
