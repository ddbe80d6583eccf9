//! # Domain Models
//! Alumni, achievements, projects and data sources as exposed over the API.
//!
//! Enum labels match the strings stored in the database and sent over the
//! wire (e.g. `"Review/Reception"`, `"Web Scraping"`), so the same
//! `as_str` / `FromStr` pair serves both the store and serde.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// Declares a string-labelled enum with `as_str`, `FromStr`, `ALL` and
/// label-based serde.
macro_rules! labelled_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let t = s.trim();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(t))
                    .ok_or_else(|| {
                        let allowed: Vec<&str> = $name::ALL.iter().map(|v| v.as_str()).collect();
                        AppError::Validation(format!(
                            "invalid {}: '{}' (must be one of: {})",
                            stringify!($name),
                            t,
                            allowed.join(", ")
                        ))
                    })
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(d)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

labelled_enum!(
    /// Degree programs offered by the school.
    DegreeProgram {
        FilmProduction => "Film Production",
        Screenwriting => "Screenwriting",
        Animation => "Animation",
        Documentary => "Documentary",
        Television => "Television",
    }
);

labelled_enum!(
    /// Category tag of an achievement. Also keys the scorer's multiplier table.
    AchievementType {
        Award => "Award",
        ProductionCredit => "Production Credit",
        FestivalSelection => "Festival Selection",
        Review => "Review/Reception",
        IndustryRecognition => "Industry Recognition",
    }
);

labelled_enum!(
    ProjectType {
        FeatureFilm => "Feature Film",
        ShortFilm => "Short Film",
        TvSeries => "TV Series",
        TvMovie => "TV Movie",
        WebSeries => "Web Series",
        Documentary => "Documentary",
        Animation => "Animation",
    }
);

labelled_enum!(
    /// How a data source is polled. Each kind has its own candidate generator.
    SourceKind {
        Api => "API",
        Feed => "RSS",
        PageScrape => "Web Scraping",
    }
);

pub const NAME_MIN: usize = 2;
pub const NAME_MAX: usize = 100;
pub const GRAD_YEAR_MIN: i32 = 1970;
pub const GRAD_YEAR_MAX: i32 = 2030;
pub const TITLE_MIN: usize = 3;
pub const TITLE_MAX: usize = 200;
pub const DESCRIPTION_MAX: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacySettings {
    #[serde(default = "yes")]
    pub public_profile: bool,
    #[serde(default)]
    pub show_email: bool,
    #[serde(default = "yes")]
    pub allow_notifications: bool,
    #[serde(default = "yes")]
    pub show_achievements: bool,
}

fn yes() -> bool {
    true
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            public_profile: true,
            show_email: false,
            allow_notifications: true,
            show_achievements: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alumni {
    pub id: i64,
    pub name: String,
    pub graduation_year: i32,
    pub degree_program: DegreeProgram,
    pub email: Option<String>,
    pub linkedin_url: Option<String>,
    pub imdb_url: Option<String>,
    pub website: Option<String>,
    pub privacy_settings: PrivacySettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for creating an alumni record.
#[derive(Debug, Clone, Deserialize)]
pub struct NewAlumni {
    pub name: String,
    pub graduation_year: i32,
    pub degree_program: DegreeProgram,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub linkedin_url: Option<String>,
    #[serde(default)]
    pub imdb_url: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub privacy_settings: PrivacySettings,
}

impl NewAlumni {
    /// Trim optional fields (empty → `None`) and check field constraints.
    pub fn validated(mut self) -> Result<Self, AppError> {
        self.name = self.name.trim().to_string();
        let n = self.name.chars().count();
        if !(NAME_MIN..=NAME_MAX).contains(&n) {
            return Err(AppError::Validation(format!(
                "name must be {NAME_MIN}..={NAME_MAX} characters"
            )));
        }
        if !(GRAD_YEAR_MIN..=GRAD_YEAR_MAX).contains(&self.graduation_year) {
            return Err(AppError::Validation(format!(
                "graduation_year must be between {GRAD_YEAR_MIN} and {GRAD_YEAR_MAX}"
            )));
        }

        self.email = blank_to_none(self.email);
        if let Some(e) = &self.email {
            if !e.contains('@') {
                return Err(AppError::Validation("invalid email address".into()));
            }
        }

        for (field, value) in [
            ("linkedin_url", &mut self.linkedin_url),
            ("imdb_url", &mut self.imdb_url),
            ("website", &mut self.website),
        ] {
            *value = blank_to_none(value.take());
            if let Some(u) = value.as_deref() {
                if !is_http_url(u) {
                    return Err(AppError::Validation(format!(
                        "{field} must start with http:// or https://"
                    )));
                }
            }
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Achievement {
    pub id: i64,
    pub alumni_id: i64,
    #[serde(rename = "type")]
    pub kind: AchievementType,
    pub title: String,
    pub date: NaiveDate,
    pub description: String,
    #[serde(serialize_with = "round2")]
    pub confidence_score: f64,
    pub verified: bool,
    pub source: String,
    pub source_url: Option<String>,
    pub project_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Payload for creating an achievement manually.
#[derive(Debug, Clone, Deserialize)]
pub struct NewAchievement {
    pub alumni_id: i64,
    #[serde(rename = "type")]
    pub kind: AchievementType,
    pub title: String,
    pub date: NaiveDate,
    pub description: String,
    pub confidence_score: f64,
    #[serde(default)]
    pub verified: bool,
    pub source: String,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub project_id: Option<i64>,
}

impl NewAchievement {
    pub fn validated(mut self) -> Result<Self, AppError> {
        self.title = self.title.trim().to_string();
        let n = self.title.chars().count();
        if !(TITLE_MIN..=TITLE_MAX).contains(&n) {
            return Err(AppError::Validation(format!(
                "title must be {TITLE_MIN}..={TITLE_MAX} characters"
            )));
        }
        if self.description.chars().count() > DESCRIPTION_MAX {
            return Err(AppError::Validation(format!(
                "description must be at most {DESCRIPTION_MAX} characters"
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_score) {
            return Err(AppError::Validation(
                "confidence_score must be within [0, 1]".into(),
            ));
        }
        self.source = self.source.trim().to_string();
        if self.source.is_empty() {
            return Err(AppError::Validation("source is required".into()));
        }
        self.source_url = blank_to_none(self.source_url);
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Project {
    pub id: i64,
    pub title: String,
    pub release_date: Option<NaiveDate>,
    #[serde(rename = "type")]
    pub kind: ProjectType,
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<String>,
    pub streaming_platforms: Vec<String>,
    pub poster_url: Option<String>,
    pub synopsis: Option<String>,
    pub runtime_minutes: Option<i64>,
    pub budget: Option<f64>,
    pub box_office: Option<f64>,
}

/// A project credit for one alumnus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlumniProjectCredit {
    pub project: Project,
    pub role: String,
    pub character_name: Option<String>,
    pub billing_order: Option<i64>,
    pub verified: bool,
}

/// A configured external data source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataSource {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub url: String,
    pub active: bool,
    /// Requests per hour.
    pub rate_limit: i64,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Rolling reliability in [0,1].
    pub success_rate: f64,
}

pub(crate) fn blank_to_none(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

pub(crate) fn is_http_url(u: &str) -> bool {
    u.starts_with("http://") || u.starts_with("https://")
}

/// Round to two decimals for display.
pub fn round2_value(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn round2<S: Serializer>(x: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(round2_value(*x))
}
