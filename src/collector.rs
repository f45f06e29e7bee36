// src/collector.rs
//! Per-source collection: fetch → extract → classify, run for every source
//! concurrently on a bounded pool.
//!
//! A failing source contributes an empty `SourceCategoryResult`; it never
//! fails the run. Results come back in the order the sources were given,
//! independent of completion order.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::classify::{classify, SourceCategoryResult};
use crate::error::CollectionError;
use crate::mentions::{extract, MentionMap, SentimentScorer, TextUnit, TickerMention};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("collect_sources_total", "Source collections attempted.");
        describe_counter!(
            "collect_source_errors_total",
            "Source collections that failed and contributed nothing."
        );
        describe_counter!("collect_units_total", "Text units fetched across sources.");
        describe_histogram!("collect_source_ms", "Per-source collection time in milliseconds.");
    });
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    #[default]
    Hot,
    New,
    Top,
    Rising,
    Controversial,
}

impl SortMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortMode::Hot => "hot",
            SortMode::New => "new",
            SortMode::Top => "top",
            SortMode::Rising => "rising",
            SortMode::Controversial => "controversial",
        }
    }

    /// Only these listings honour a time window.
    pub fn accepts_time_window(&self) -> bool {
        matches!(self, SortMode::Top | SortMode::Controversial)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    Hour,
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TimeWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::Hour => "hour",
            TimeWindow::Day => "day",
            TimeWindow::Week => "week",
            TimeWindow::Month => "month",
            TimeWindow::Year => "year",
            TimeWindow::All => "all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchParams {
    pub limit: usize,
    pub comment_limit: usize,
    pub sort: SortMode,
    pub time_window: Option<TimeWindow>,
}

impl FetchParams {
    /// The window actually sent upstream.
    pub fn effective_time_window(&self) -> Option<TimeWindow> {
        self.time_window.filter(|_| self.sort.accepts_time_window())
    }
}

/// Fetches already-truncated text units for one source.
#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(
        &self,
        source_id: &str,
        params: &FetchParams,
    ) -> Result<Vec<TextUnit>, CollectionError>;
}

/// Runs fetch + extraction + classification for one source.
#[derive(Clone)]
pub struct SourceCollector {
    fetcher: Arc<dyn SourceFetcher>,
    scorer: Arc<dyn SentimentScorer>,
}

impl SourceCollector {
    pub fn new(fetcher: Arc<dyn SourceFetcher>, scorer: Arc<dyn SentimentScorer>) -> Self {
        Self { fetcher, scorer }
    }

    pub async fn mentions(
        &self,
        source_id: &str,
        params: &FetchParams,
    ) -> Result<MentionMap, CollectionError> {
        let units = self.fetcher.fetch(source_id, params).await?;
        counter!("collect_units_total").increment(units.len() as u64);
        extract(&units, self.scorer.as_ref()).map_err(|cause| CollectionError::Extraction {
            source_id: source_id.to_string(),
            cause,
        })
    }

    pub async fn collect(
        &self,
        source_id: &str,
        params: &FetchParams,
    ) -> Result<SourceCategoryResult, CollectionError> {
        let mentions = self.mentions(source_id, params).await?;
        Ok(classify(source_id, mentions, params.limit))
    }

    /// Collect every source concurrently, at most `max_concurrent` at a time.
    /// Outcomes are in source order.
    pub async fn collect_outcomes(
        &self,
        sources: &[String],
        params: FetchParams,
        max_concurrent: usize,
    ) -> Vec<Result<SourceCategoryResult, CollectionError>> {
        self.run_bounded(sources, max_concurrent, move |c, source| async move {
            c.collect(&source, &params).await
        })
        .await
    }

    /// [`collect_outcomes`](Self::collect_outcomes) with failed sources
    /// replaced by empty results.
    pub async fn collect_all(
        &self,
        sources: &[String],
        params: FetchParams,
        max_concurrent: usize,
    ) -> Vec<SourceCategoryResult> {
        let outcomes = self.collect_outcomes(sources, params, max_concurrent).await;
        into_results(outcomes, sources).0
    }

    /// Mentions of exactly `symbols` in each source. Failed sources yield an
    /// empty list.
    pub async fn collect_specific(
        &self,
        sources: &[String],
        symbols: &[String],
        params: FetchParams,
        max_concurrent: usize,
    ) -> Vec<SpecificStockResult> {
        let wanted: Vec<String> = symbols.iter().map(|s| canonical_symbol(s)).collect();
        let outcomes = self
            .run_bounded(sources, max_concurrent, move |c, source| async move {
                c.mentions(&source, &params).await
            })
            .await;

        outcomes
            .into_iter()
            .zip(sources)
            .map(|(outcome, source)| {
                let mentions = match outcome {
                    Ok(map) => map
                        .into_vec()
                        .into_iter()
                        .filter(|m| wanted.contains(&m.symbol))
                        .collect(),
                    Err(e) => {
                        tracing::warn!(target: "collect", source = %source, error = %e, "specific analysis skipped source");
                        counter!("collect_source_errors_total").increment(1);
                        Vec::new()
                    }
                };
                SpecificStockResult {
                    source: source.clone(),
                    mentions,
                }
            })
            .collect()
    }

    /// One task per source behind a semaphore; outcomes are returned in
    /// source order.
    async fn run_bounded<T, F, Fut>(
        &self,
        sources: &[String],
        max_concurrent: usize,
        job: F,
    ) -> Vec<Result<T, CollectionError>>
    where
        T: Send + 'static,
        F: Fn(SourceCollector, String) -> Fut + Clone + Send + 'static,
        Fut: std::future::Future<Output = Result<T, CollectionError>> + Send + 'static,
    {
        ensure_metrics_described();
        let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let mut tasks = JoinSet::new();

        for (idx, source) in sources.iter().enumerate() {
            let permits = Arc::clone(&permits);
            let collector = self.clone();
            let source = source.clone();
            let job = job.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let started = Instant::now();
                counter!("collect_sources_total").increment(1);
                let out = job(collector, source.clone()).await;
                histogram!("collect_source_ms").record(started.elapsed().as_millis() as f64);
                tracing::debug!(target: "collect", source = %source, ok = out.is_ok(), "source done");
                (idx, out)
            });
        }

        let mut slots: Vec<Option<Result<T, CollectionError>>> =
            sources.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, out)) => slots[idx] = Some(out),
                Err(e) => tracing::error!(target: "collect", error = %e, "collection task error"),
            }
        }

        slots
            .into_iter()
            .zip(sources)
            .map(|(slot, source)| {
                slot.unwrap_or_else(|| {
                    Err(CollectionError::Aborted {
                        source_id: source.clone(),
                        reason: "task panicked or was cancelled".into(),
                    })
                })
            })
            .collect()
    }
}

/// Empty results stand in for failed sources. Also returns how many failed.
pub fn into_results(
    outcomes: Vec<Result<SourceCategoryResult, CollectionError>>,
    sources: &[String],
) -> (Vec<SourceCategoryResult>, usize) {
    let mut failed = 0;
    let results = outcomes
        .into_iter()
        .zip(sources)
        .map(|(outcome, source)| match outcome {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(target: "collect", source = %source, error = %e, "source contributes nothing");
                counter!("collect_source_errors_total").increment(1);
                failed += 1;
                SourceCategoryResult::empty(source.clone())
            }
        })
        .collect();
    (results, failed)
}

/// Result of a specific-symbol query for one source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpecificStockResult {
    pub source: String,
    pub mentions: Vec<TickerMention>,
}

/// `tsla`, `TSLA` and `$TSLA` all become `$TSLA`.
pub fn canonical_symbol(s: &str) -> String {
    let t = s.trim().trim_start_matches('$').to_ascii_uppercase();
    format!("${t}")
}
