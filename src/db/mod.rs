//! SQLite storage: pool setup, idempotent schema creation and demo seed data.
//!
//! Query functions live in one submodule per table family. Enum columns hold
//! the same labels the API uses and are decoded through private row structs.

pub mod achievements;
pub mod alumni;
pub mod projects;
pub mod sources;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{AppError, AppResult};

/// Open (creating if needed) the database at `url` and make sure the schema exists.
pub async fn init_database(url: &str) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("parsing database url {url}"))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let file = opts.get_filename();
    if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(opts)
        .await
        .context("connecting to sqlite")?;

    create_schema(&pool).await?;
    info!(url, "database ready");
    Ok(pool)
}

/// Private in-memory database with the schema applied.
///
/// One connection that never expires, otherwise the database would vanish
/// with the connection that created it.
pub async fn connect_memory() -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await
        .context("opening in-memory sqlite")?;
    create_schema(&pool).await?;
    Ok(pool)
}

pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_alumni_table(pool).await?;
    create_projects_table(pool).await?;
    create_alumni_projects_table(pool).await?;
    create_achievements_table(pool).await?;
    create_data_sources_table(pool).await?;
    create_run_state_table(pool).await?;
    Ok(())
}

async fn create_alumni_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alumni (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            graduation_year INTEGER NOT NULL,
            degree_program TEXT NOT NULL,
            email TEXT,
            linkedin_url TEXT,
            imdb_url TEXT,
            website TEXT,
            privacy_settings TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("creating alumni table")?;
    Ok(())
}

async fn create_projects_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            release_date TEXT,
            type TEXT NOT NULL,
            imdb_id TEXT,
            tmdb_id TEXT,
            streaming_platforms TEXT NOT NULL DEFAULT '[]',
            poster_url TEXT,
            synopsis TEXT,
            runtime_minutes INTEGER,
            budget REAL,
            box_office REAL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("creating projects table")?;
    Ok(())
}

async fn create_alumni_projects_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alumni_projects (
            alumni_id INTEGER NOT NULL REFERENCES alumni(id) ON DELETE CASCADE,
            project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            role TEXT NOT NULL,
            character_name TEXT,
            billing_order INTEGER,
            verified INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (alumni_id, project_id, role)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("creating alumni_projects table")?;
    Ok(())
}

async fn create_achievements_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS achievements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            alumni_id INTEGER NOT NULL REFERENCES alumni(id) ON DELETE CASCADE,
            type TEXT NOT NULL,
            title TEXT NOT NULL,
            date TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            confidence_score REAL NOT NULL,
            verified INTEGER NOT NULL DEFAULT 0,
            source TEXT NOT NULL,
            source_url TEXT,
            project_id INTEGER REFERENCES projects(id) ON DELETE SET NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("creating achievements table")?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_achievements_identity \
         ON achievements(alumni_id, title, source)",
    )
    .execute(pool)
    .await
    .context("creating achievements identity index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_achievements_created ON achievements(created_at)")
        .execute(pool)
        .await?;
    Ok(())
}

async fn create_data_sources_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS data_sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            type TEXT NOT NULL,
            url TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            rate_limit INTEGER NOT NULL DEFAULT 60,
            last_checked TEXT,
            last_error TEXT,
            success_rate REAL NOT NULL DEFAULT 1.0
        )
        "#,
    )
    .execute(pool)
    .await
    .context("creating data_sources table")?;
    Ok(())
}

async fn create_run_state_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            status TEXT NOT NULL,
            last_run_start TEXT,
            last_run_end TEXT,
            next_run TEXT,
            run_count INTEGER NOT NULL DEFAULT 0,
            total_run_ms INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("creating run_state table")?;
    Ok(())
}

/// Decode a label column, treating an unknown label as a storage fault.
pub(crate) fn decode_label<T>(column: &str, raw: &str) -> AppResult<T>
where
    T: FromStr<Err = AppError>,
{
    raw.parse::<T>()
        .map_err(|e| AppError::Other(anyhow::anyhow!("bad {column} value in store: {e}")))
}

/// Insert the demo alumni, projects, achievements and data sources when the
/// store is empty. Returns whether anything was inserted.
pub async fn seed_demo_data(pool: &SqlitePool) -> Result<bool> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alumni")
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        return Ok(false);
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let alumni: [(i64, &str, i32, &str, &str, Option<&str>, Option<&str>, Option<&str>, &str); 5] = [
        (1, "Sarah Chen", 2018, "Film Production", "s.chen@example.com",
         Some("https://linkedin.com/in/sarahchen"), Some("https://www.imdb.com/name/nm1234567"), None,
         r#"{"public_profile":true,"show_email":false,"allow_notifications":true,"show_achievements":true}"#),
        (2, "James Mitchell", 2020, "Documentary", "j.mitchell@example.com",
         None, None, Some("https://jamesmitchellfilms.com"),
         r#"{"public_profile":true,"show_email":true,"allow_notifications":true,"show_achievements":true}"#),
        (3, "Emma Rodriguez", 2019, "Animation", "e.rodriguez@example.com",
         Some("https://linkedin.com/in/emmarodriguez"), None, None,
         r#"{"public_profile":true,"show_email":false,"allow_notifications":true,"show_achievements":true}"#),
        (4, "Michael O'Brien", 2017, "Screenwriting", "m.obrien@example.com",
         None, Some("https://www.imdb.com/name/nm2345678"), None,
         r#"{"public_profile":true,"show_email":false,"allow_notifications":true,"show_achievements":true}"#),
        (5, "Priya Sharma", 2021, "Television", "p.sharma@example.com",
         None, None, None,
         r#"{"public_profile":false,"show_email":false,"allow_notifications":true,"show_achievements":true}"#),
    ];
    for (id, name, year, program, email, linkedin, imdb, website, privacy) in alumni {
        sqlx::query(
            "INSERT INTO alumni (id, name, graduation_year, degree_program, email, linkedin_url, \
             imdb_url, website, privacy_settings, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(year)
        .bind(program)
        .bind(email)
        .bind(linkedin)
        .bind(imdb)
        .bind(website)
        .bind(privacy)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    let projects: [(i64, &str, NaiveDate, &str, Option<&str>, Option<&str>, &str, Option<i64>, Option<f64>, Option<f64>, &str); 4] = [
        (1, "Silent Echoes", ymd(2024, 6, 15), "Short Film", Some("tt1234567"), Some("123456"), "[]",
         Some(15), None, None, "A haunting exploration of memory and loss in modern Melbourne."),
        (2, "Urban Voices", ymd(2024, 3, 10), "Documentary", None, None, r#"["Netflix","Stan"]"#,
         Some(90), None, None, "Documentary exploring the diverse communities of Australian cities."),
        (3, "Dream Weavers", ymd(2023, 9, 1), "TV Series", None, None, r#"["Netflix"]"#,
         None, None, None, "An animated series about children who can enter each other's dreams."),
        (4, "The Last Station", ymd(2023, 11, 20), "Feature Film", Some("tt3456789"), None, "[]",
         Some(120), Some(2_500_000.0), Some(8_750_000.0), ""),
    ];
    for (id, title, release, kind, imdb, tmdb, platforms, runtime, budget, box_office, synopsis) in projects {
        sqlx::query(
            "INSERT INTO projects (id, title, release_date, type, imdb_id, tmdb_id, streaming_platforms, \
             synopsis, runtime_minutes, budget, box_office) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(title)
        .bind(release)
        .bind(kind)
        .bind(imdb)
        .bind(tmdb)
        .bind(platforms)
        .bind(Some(synopsis).filter(|s| !s.is_empty()))
        .bind(runtime)
        .bind(budget)
        .bind(box_office)
        .execute(&mut *tx)
        .await?;
    }

    for (alumni_id, project_id, role, verified) in [
        (1, 1, "Director", true),
        (2, 2, "Director/Producer", true),
        (3, 3, "Lead Animator", false),
        (4, 4, "Screenwriter", true),
    ] {
        sqlx::query(
            "INSERT INTO alumni_projects (alumni_id, project_id, role, verified) VALUES (?, ?, ?, ?)",
        )
        .bind(alumni_id as i64)
        .bind(project_id as i64)
        .bind(role)
        .bind(verified)
        .execute(&mut *tx)
        .await?;
    }

    let achievements: [(i64, &str, &str, NaiveDate, &str, f64, bool, &str, Option<&str>, Option<i64>); 7] = [
        (1, "Award", "AACTA Award - Best Short Film", ymd(2024, 12, 1),
         "Won AACTA Award for Best Short Film for 'Silent Echoes'", 0.95, true,
         "AACTA Official Website", Some("https://www.aacta.org/winners"), Some(1)),
        (2, "Festival Selection", "Sundance Film Festival - Official Selection", ymd(2024, 1, 20),
         "Documentary 'Urban Voices' selected for Sundance 2024", 0.90, true,
         "Sundance Institute", Some("https://www.sundance.org"), Some(2)),
        (3, "Production Credit", "Lead Animator - 'Dream Weavers'", ymd(2023, 6, 15),
         "Lead animator on Netflix animated series", 0.88, false,
         "TMDb API", None, Some(3)),
        (1, "Festival Selection", "Melbourne International Film Festival - Premiere", ymd(2024, 8, 10),
         "World premiere of 'Silent Echoes' at MIFF", 0.92, true,
         "MIFF Official Program", None, Some(1)),
        (4, "Production Credit", "Screenwriter - 'The Last Station'", ymd(2023, 11, 20),
         "Wrote screenplay for feature film starring Hugh Jackman", 0.85, true,
         "Screen Australia", None, Some(4)),
        (5, "Industry Recognition", "Screen Producers Australia - Emerging Producer Award", ymd(2024, 5, 15),
         "Recognized as one of Australia's top emerging producers", 0.98, true,
         "Screen Producers Australia", None, None),
        (2, "Review/Reception", "The Guardian - 5 Star Review", ymd(2024, 3, 15),
         "'Urban Voices' receives critical acclaim from The Guardian", 0.87, true,
         "The Guardian Australia", Some("https://www.theguardian.com/au"), Some(2)),
    ];
    for (alumni_id, kind, title, date, description, score, verified, source, url, project) in achievements {
        sqlx::query(
            "INSERT INTO achievements (alumni_id, type, title, date, description, confidence_score, \
             verified, source, source_url, project_id, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(alumni_id)
        .bind(kind)
        .bind(title)
        .bind(date)
        .bind(description)
        .bind(score)
        .bind(verified)
        .bind(source)
        .bind(url)
        .bind(project)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    for (name, kind, url, active, rate_limit) in [
        ("TMDb API", "API", "https://api.themoviedb.org/3", true, 40_i64),
        ("OMDb API", "API", "http://www.omdbapi.com", true, 1000),
        ("Screen Australia", "RSS", "https://www.screenaustralia.gov.au/rss", true, 10),
        ("IF Magazine", "Web Scraping", "https://if.com.au", true, 6),
        ("AACTA Awards", "Web Scraping", "https://www.aacta.org", false, 5),
    ] {
        sqlx::query(
            "INSERT INTO data_sources (name, type, url, active, rate_limit) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(kind)
        .bind(url)
        .bind(active)
        .bind(rate_limit)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    info!("seeded demo data");
    Ok(true)
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_is_idempotent_and_seed_runs_once() {
        let pool = connect_memory().await.unwrap();
        create_schema(&pool).await.unwrap();

        assert!(seed_demo_data(&pool).await.unwrap());
        assert!(!seed_demo_data(&pool).await.unwrap());

        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM achievements")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 7);
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM data_sources WHERE active = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 4);
    }

    #[tokio::test]
    async fn identity_index_rejects_duplicates() {
        let pool = connect_memory().await.unwrap();
        seed_demo_data(&pool).await.unwrap();
        let err = sqlx::query(
            "INSERT INTO achievements (alumni_id, type, title, date, confidence_score, source, created_at) \
             VALUES (1, 'Award', 'AACTA Award - Best Short Film', '2024-12-01', 0.9, 'AACTA Official Website', '2025-01-01T00:00:00+00:00')",
        )
        .execute(&pool)
        .await
        .unwrap_err();
        assert!(AppError::from(err).is_unique_violation());
    }

    #[tokio::test]
    async fn file_database_is_created_with_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/nested/alumni.db", dir.path().display());
        let pool = init_database(&url).await.unwrap();
        seed_demo_data(&pool).await.unwrap();
        assert!(dir.path().join("nested/alumni.db").exists());
    }
}
