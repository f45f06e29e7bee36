// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod cache;
pub mod classify;
pub mod collector;
pub mod config;
pub mod error;
pub mod market;
pub mod mentions;
pub mod metrics;
pub mod narrative;
pub mod pipeline;
pub mod reddit;
pub mod scheduler;
pub mod selection;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::cache::{CacheState, FreshnessCache};
pub use crate::config::AppConfig;
pub use crate::pipeline::{AggregateResult, AnalysisPipeline};
pub use crate::selection::select;

use std::sync::Arc;

use crate::collector::SourceCollector;
use crate::market::YahooChart;
use crate::mentions::LexiconScorer;
use crate::narrative::{DisabledNarrator, Narrator, OpenAiNarrator};
use crate::pipeline::AnalysisParams;
use crate::reddit::RedditFetcher;

/// Build the production pipeline for `cfg`: Reddit listings, the lexicon
/// scorer, Yahoo quotes, and OpenAI narratives when enabled and a key is set.
pub fn build_pipeline(cfg: &AppConfig) -> anyhow::Result<AnalysisPipeline> {
    let collector = SourceCollector::new(
        Arc::new(RedditFetcher::new()?),
        Arc::new(LexiconScorer::new()),
    );
    let narrator: Arc<dyn Narrator> = if cfg.narrative_enabled {
        match OpenAiNarrator::from_env(None) {
            Ok(n) => Arc::new(n),
            Err(e) => {
                tracing::warn!(error = %e, "narratives enabled but unavailable");
                Arc::new(DisabledNarrator)
            }
        }
    } else {
        Arc::new(DisabledNarrator)
    };
    Ok(AnalysisPipeline::new(
        collector,
        Arc::new(YahooChart::new()?),
        narrator,
        AnalysisParams::from(cfg),
    ))
}

/// Pipeline, cache (restored from its snapshot) and router state for `cfg`.
pub async fn build_state(cfg: &AppConfig) -> anyhow::Result<AppState> {
    let pipeline = Arc::new(build_pipeline(cfg)?);
    let cache = Arc::new(
        FreshnessCache::new(pipeline.clone(), cfg.cache_ttl())
            .with_snapshot_path(cfg.snapshot_path.clone()),
    );
    let state = cache.restore().await;
    tracing::info!(state = ?state, ttl_secs = cfg.cache_ttl_secs, "cache ready");
    Ok(AppState { cache, pipeline })
}
