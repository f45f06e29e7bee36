// src/config.rs
//! Service configuration.
//!
//! Resolution order:
//! 1) `$TRENDS_CONFIG_PATH` (must exist if set)
//! 2) `config/trends.toml`
//! 3) built-in defaults
//!
//! Single values can then be overridden with `TRENDS_SNAPSHOT_PATH` and
//! `TRENDS_CACHE_TTL_SECS`.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collector::{FetchParams, SortMode, TimeWindow};

pub const ENV_CONFIG_PATH: &str = "TRENDS_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/trends.toml";
const ENV_SNAPSHOT_PATH: &str = "TRENDS_SNAPSHOT_PATH";
const ENV_CACHE_TTL: &str = "TRENDS_CACHE_TTL_SECS";

pub const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub sources: Vec<String>,
    pub post_limit: usize,
    pub comment_limit: usize,
    pub sort: SortMode,
    pub time_window: Option<TimeWindow>,
    /// Market-data period, e.g. "1d", "5d", "1mo", "1y".
    pub stock_period: String,
    pub rising_limit: usize,
    pub max_concurrent_sources: usize,
    pub cache_ttl_secs: u64,
    pub snapshot_path: PathBuf,
    /// Wall-clock refresh time, "HH:MM".
    pub daily_refresh_at: String,
    /// IANA zone name for `daily_refresh_at`.
    pub timezone: String,
    pub refresh_interval_secs: u64,
    pub narrative_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            post_limit: 100,
            comment_limit: 10,
            sort: SortMode::Hot,
            time_window: None,
            stock_period: "1mo".to_string(),
            rising_limit: 3,
            max_concurrent_sources: 8,
            cache_ttl_secs: DEFAULT_TTL_SECS,
            snapshot_path: PathBuf::from("cached_analysis.json"),
            daily_refresh_at: "12:00".to_string(),
            timezone: "US/Eastern".to_string(),
            refresh_interval_secs: DEFAULT_TTL_SECS,
            narrative_enabled: false,
        }
    }
}

pub fn default_sources() -> Vec<String> {
    ["wallstreetbets", "stocks", "stockmarket"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl AppConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let cfg: AppConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg.sanitized())
    }

    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if p.exists() {
                Self::load_from(&p)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(p) = std::env::var(ENV_SNAPSHOT_PATH) {
            if !p.trim().is_empty() {
                self.snapshot_path = PathBuf::from(p);
            }
        }
        if let Some(ttl) = std::env::var(ENV_CACHE_TTL)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| *v > 0)
        {
            self.cache_ttl_secs = ttl;
        }
    }

    /// Repair values that would make the pipeline useless.
    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        self.sources = self
            .sources
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if self.sources.is_empty() {
            self.sources = d.sources;
        }
        if self.post_limit == 0 {
            self.post_limit = d.post_limit;
        }
        if self.rising_limit == 0 {
            self.rising_limit = d.rising_limit;
        }
        if self.max_concurrent_sources == 0 {
            self.max_concurrent_sources = d.max_concurrent_sources;
        }
        if self.cache_ttl_secs == 0 {
            self.cache_ttl_secs = d.cache_ttl_secs;
        }
        if self.refresh_interval_secs == 0 {
            self.refresh_interval_secs = d.refresh_interval_secs;
        }
        if self.daily_time().is_err() {
            tracing::warn!(value = %self.daily_refresh_at, "invalid daily_refresh_at, using default");
            self.daily_refresh_at = d.daily_refresh_at;
        }
        if self.zone().is_err() {
            tracing::warn!(value = %self.timezone, "unknown timezone, using default");
            self.timezone = d.timezone;
        }
        self
    }

    pub fn fetch_params(&self) -> FetchParams {
        FetchParams {
            limit: self.post_limit,
            comment_limit: self.comment_limit,
            sort: self.sort,
            time_window: self.time_window,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn daily_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(self.daily_refresh_at.trim(), "%H:%M")
            .with_context(|| format!("daily_refresh_at '{}'", self.daily_refresh_at))
    }

    pub fn zone(&self) -> Result<Tz> {
        self.timezone
            .trim()
            .parse::<Tz>()
            .map_err(|e| anyhow!("timezone '{}': {e}", self.timezone))
    }
}
