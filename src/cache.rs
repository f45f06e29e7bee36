//! # Freshness Cache
//! Holds the last `AggregateResult` and decides when it is stale.
//!
//! States: `Empty` → `Valid` (age < TTL) → `Stale` (age ≥ TTL) → `Valid`
//! after a successful recompute.
//!
//! - The result and its timestamp live in one `RwLock`ed value, so readers
//!   never see a mismatched pair.
//! - Recomputes are serialised by an async mutex; callers that queued behind
//!   a recompute re-check freshness instead of recomputing again.
//! - A failed recompute keeps serving the last good result (or an empty one).
//! - Every recorded result is written to the snapshot file, if configured,
//!   and can be reloaded on startup.

use chrono::{DateTime, NaiveDateTime, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::CacheIoError;
use crate::pipeline::{AggregateResult, ResultProducer, StockRecord};

pub const SNAPSHOT_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheState {
    Empty,
    Valid,
    Stale,
}

/// Timestamps are kept at whole seconds so a reloaded snapshot is identical.
fn whole_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).unwrap_or(t)
}

pub struct FreshnessCache {
    producer: Arc<dyn ResultProducer>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    stored: RwLock<Option<AggregateResult>>,
    refresh: Mutex<()>,
    snapshot_path: Option<PathBuf>,
}

impl FreshnessCache {
    pub fn new(producer: Arc<dyn ResultProducer>, ttl: Duration) -> Self {
        Self {
            producer,
            ttl,
            clock: Arc::new(SystemClock),
            stored: RwLock::new(None),
            refresh: Mutex::new(()),
            snapshot_path: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn read_stored(&self) -> Option<AggregateResult> {
        match self.stored.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    fn write_stored(&self, result: AggregateResult) {
        match self.stored.write() {
            Ok(mut g) => *g = Some(result),
            Err(poison) => *poison.into_inner() = Some(result),
        }
    }

    fn is_fresh(&self, result: &AggregateResult) -> bool {
        let age = self.clock.now().signed_duration_since(result.computed_at);
        match age.to_std() {
            Ok(age) => age < self.ttl,
            // Timestamp in the future: treat as just computed.
            Err(_) => true,
        }
    }

    pub fn state(&self) -> CacheState {
        match self.read_stored() {
            None => CacheState::Empty,
            Some(r) if self.is_fresh(&r) => CacheState::Valid,
            Some(_) => CacheState::Stale,
        }
    }

    /// Stored result regardless of age.
    pub fn peek(&self) -> Option<AggregateResult> {
        self.read_stored()
    }

    fn fresh_stored(&self) -> Option<AggregateResult> {
        self.read_stored().filter(|r| self.is_fresh(r))
    }

    /// Serve the stored result if valid, otherwise recompute first.
    pub async fn get(&self) -> AggregateResult {
        if let Some(r) = self.fresh_stored() {
            counter!("cache_hits_total").increment(1);
            return r;
        }

        let _guard = self.refresh.lock().await;
        // Someone may have refreshed while we waited.
        if let Some(r) = self.fresh_stored() {
            counter!("cache_hits_total").increment(1);
            return r;
        }
        match self.peek() {
            None => tracing::info!(target: "cache", "no cached analysis, computing"),
            Some(_) => tracing::info!(target: "cache", "cached analysis outdated, computing"),
        }
        let outcome = self.recompute_locked().await;
        self.or_last_good(outcome)
    }

    /// Recompute regardless of state and overwrite the stored result.
    pub async fn try_force_refresh(&self) -> anyhow::Result<AggregateResult> {
        let _guard = self.refresh.lock().await;
        self.recompute_locked().await
    }

    /// Like [`try_force_refresh`](Self::try_force_refresh) but never fails:
    /// errors fall back to the last good result.
    pub async fn force_refresh(&self) -> AggregateResult {
        let outcome = self.try_force_refresh().await;
        self.or_last_good(outcome)
    }

    /// Caller must hold `self.refresh`.
    async fn recompute_locked(&self) -> anyhow::Result<AggregateResult> {
        counter!("cache_recompute_total").increment(1);
        let mut result = match self.producer.produce().await {
            Ok(r) => r,
            Err(e) => {
                counter!("cache_recompute_failures_total").increment(1);
                return Err(e);
            }
        };
        result.computed_at = whole_seconds(self.clock.now());
        self.store_locked(result.clone()).await;
        Ok(result)
    }

    fn or_last_good(&self, outcome: anyhow::Result<AggregateResult>) -> AggregateResult {
        match outcome {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(target: "cache", error = %format!("{e:#}"), "recompute failed, serving last good result");
                self.peek()
                    .unwrap_or_else(|| AggregateResult::empty(whole_seconds(self.clock.now())))
            }
        }
    }

    /// Store `result` with its own `computed_at` and persist it. Waits for
    /// any running recompute.
    pub async fn record(&self, result: AggregateResult) {
        let _guard = self.refresh.lock().await;
        self.store_locked(result).await;
    }

    /// Caller must hold `self.refresh`, so memory and snapshot file are
    /// always written in the same order.
    async fn store_locked(&self, result: AggregateResult) {
        gauge!("cache_last_refresh_ts").set(result.computed_at.timestamp() as f64);
        let snapshot = CacheSnapshot::from(&result);
        self.write_stored(result);

        if let Some(path) = &self.snapshot_path {
            match save_snapshot(path, &snapshot).await {
                Ok(()) => tracing::info!(target: "cache", path = %path.display(), "snapshot saved"),
                Err(e) => tracing::warn!(target: "cache", error = %e, "snapshot save failed"),
            }
        }
    }

    /// Reload the snapshot file. Leaves the cache untouched on failure.
    pub async fn load_snapshot(&self) -> Result<bool, CacheIoError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(false);
        };
        let _guard = self.refresh.lock().await;
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(false);
        }
        let snapshot = load_snapshot(path).await?;
        let result = snapshot.into_result()?;
        self.write_stored(result);
        tracing::info!(target: "cache", path = %path.display(), "loaded cached analysis");
        Ok(true)
    }

    /// [`load_snapshot`](Self::load_snapshot), logging failures and staying `Empty`.
    pub async fn restore(&self) -> CacheState {
        if let Err(e) = self.load_snapshot().await {
            tracing::warn!(target: "cache", error = %e, "could not load cached analysis");
        }
        self.state()
    }
}

// ------------------------------------------------------------
// Snapshot format
// ------------------------------------------------------------

/// A selected stock or the literal string "None".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Slot {
    Stock(Box<StockRecord>),
    Missing(String),
}

impl Slot {
    fn from_option(r: Option<&StockRecord>) -> Self {
        match r {
            Some(r) => Slot::Stock(Box::new(r.clone())),
            None => Slot::Missing("None".to_string()),
        }
    }

    fn into_option(self) -> Option<StockRecord> {
        match self {
            Slot::Stock(r) => Some(*r),
            Slot::Missing(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotBody {
    #[serde(rename = "Top_Stock")]
    pub top_stock: Slot,
    #[serde(rename = "Worst_Stock")]
    pub worst_stock: Slot,
    #[serde(rename = "Rising_Stock")]
    pub rising_stock: Slot,
    #[serde(rename = "Rising_Stocks", default)]
    pub rising_stocks: Vec<StockRecord>,
}

/// Serialized form of the cache, also the public response shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSnapshot {
    pub response: SnapshotBody,
    pub last_updated: String,
}

impl From<&AggregateResult> for CacheSnapshot {
    fn from(r: &AggregateResult) -> Self {
        Self {
            response: SnapshotBody {
                top_stock: Slot::from_option(r.top_stock.as_ref()),
                worst_stock: Slot::from_option(r.worst_stock.as_ref()),
                rising_stock: Slot::from_option(r.featured_rising()),
                rising_stocks: r.rising_stocks.clone(),
            },
            last_updated: r.computed_at.format(SNAPSHOT_TS_FORMAT).to_string(),
        }
    }
}

impl CacheSnapshot {
    pub fn into_result(self) -> Result<AggregateResult, CacheIoError> {
        let ts = NaiveDateTime::parse_from_str(&self.last_updated, SNAPSHOT_TS_FORMAT)
            .map_err(|_| CacheIoError::Timestamp(self.last_updated.clone()))?;
        let body = self.response;
        let mut rising_stocks = body.rising_stocks;
        // Older snapshots only carry the featured rising stock.
        if rising_stocks.is_empty() {
            if let Some(r) = body.rising_stock.into_option() {
                rising_stocks.push(r);
            }
        }
        Ok(AggregateResult {
            top_stock: body.top_stock.into_option(),
            worst_stock: body.worst_stock.into_option(),
            rising_stocks,
            computed_at: ts.and_utc(),
        })
    }
}

pub async fn save_snapshot(path: &Path, snapshot: &CacheSnapshot) -> Result<(), CacheIoError> {
    let io_err = |cause: std::io::Error| CacheIoError::Io {
        path: path.display().to_string(),
        cause,
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
    }
    let bytes = serde_json::to_vec_pretty(snapshot).map_err(|cause| CacheIoError::Format {
        path: path.display().to_string(),
        cause,
    })?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
    Ok(())
}

pub async fn load_snapshot(path: &Path) -> Result<CacheSnapshot, CacheIoError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|cause| CacheIoError::Io {
            path: path.display().to_string(),
            cause,
        })?;
    serde_json::from_str(&raw).map_err(|cause| CacheIoError::Format {
        path: path.display().to_string(),
        cause,
    })
}
