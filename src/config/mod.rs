// src/config/mod.rs
//! Application configuration.
//!
//! Lookup order:
//! 1) `$APP_CONFIG_PATH` (must exist if set)
//! 2) `config/app.toml`
//! 3) `config/app.json`
//! 4) built-in defaults
//!
//! A handful of environment variables override the file afterwards
//! (`DATABASE_URL`, `DISCOVERY_AUTOSTART`, `DISCOVERY_LIVE_FEEDS`).

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_CONFIG_PATH: &str = "APP_CONFIG_PATH";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_AUTOSTART: &str = "DISCOVERY_AUTOSTART";
pub const ENV_LIVE_FEEDS: &str = "DISCOVERY_LIVE_FEEDS";

pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/alumni.db?mode=rwc";
pub const DEFAULT_SCORING_PATH: &str = "config/scoring.toml";

/// One year; longer schedules are treated as this.
pub const MAX_INTERVAL_HOURS: u64 = 24 * 365;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Insert the demo alumni/projects/sources on an empty database.
    #[serde(default = "default_true")]
    pub seed_demo_data: bool,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,
    #[serde(default = "default_threshold")]
    pub confidence_threshold: f64,
    /// Watchdog for a single run.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_scoring_path")]
    pub scoring_path: String,
    /// Enable the scheduler at boot instead of waiting for a "start" toggle.
    #[serde(default)]
    pub autostart: bool,
    /// Fetch feed sources over HTTP instead of using the bundled fixture.
    #[serde(default)]
    pub live_feeds: bool,
}

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}
fn default_true() -> bool {
    true
}
fn default_interval_hours() -> u64 {
    6
}
fn default_threshold() -> f64 {
    0.70
}
fn default_run_timeout_secs() -> u64 {
    300
}
fn default_heartbeat_secs() -> u64 {
    10
}
fn default_scoring_path() -> String {
    DEFAULT_SCORING_PATH.to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_interval_hours(),
            confidence_threshold: default_threshold(),
            run_timeout_secs: default_run_timeout_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            scoring_path: default_scoring_path(),
            autostart: false,
            live_feeds: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            seed_demo_data: true,
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from an explicit path. Supports TOML or JSON.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = if ext == "json" {
            serde_json::from_str(&content).context("parsing JSON config")?
        } else {
            toml::from_str(&content).context("parsing TOML config")?
        };
        Ok(Self::sanitized(cfg))
    }

    /// Load using env var + fallbacks, then apply env overrides.
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let toml_p = PathBuf::from("config/app.toml");
            let json_p = PathBuf::from("config/app.json");
            if toml_p.exists() {
                Self::load_from(&toml_p)?
            } else if json_p.exists() {
                Self::load_from(&json_p)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(ENV_DATABASE_URL) {
            if !url.trim().is_empty() {
                self.database_url = url.trim().to_string();
            }
        }
        if let Some(b) = parse_bool_env(ENV_AUTOSTART) {
            self.discovery.autostart = b;
        }
        if let Some(b) = parse_bool_env(ENV_LIVE_FEEDS) {
            self.discovery.live_feeds = b;
        }
    }

    fn sanitized(mut cfg: Self) -> Self {
        let d = &mut cfg.discovery;
        if !(0.0..=1.0).contains(&d.confidence_threshold) {
            d.confidence_threshold = default_threshold();
        }
        d.interval_hours = d.interval_hours.clamp(1, MAX_INTERVAL_HOURS);
        d.run_timeout_secs = d.run_timeout_secs.max(1);
        d.heartbeat_secs = d.heartbeat_secs.max(1);
        cfg
    }
}

fn parse_bool_env(key: &str) -> Option<bool> {
    let v = std::env::var(key).ok()?;
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
