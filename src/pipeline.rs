//! # Analysis Pipeline
//! Collect every source → select top / worst / rising → decorate the
//! winners with market data and (optionally) a narrative.
//!
//! Decoration never fails the run: a missing quote becomes `error` on the
//! record, a missing narrative is simply absent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::classify::SourceCategoryResult;
use crate::collector::{into_results, FetchParams, SourceCollector};
use crate::config::AppConfig;
use crate::error::AllSourcesFailed;
use crate::market::{MarketData, Quote};
use crate::mentions::TickerMention;
use crate::narrative::{Narrative, Narrator};
use crate::selection::{self, Selection};

/// A selected mention plus its market decoration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockRecord {
    #[serde(flatten)]
    pub mention: TickerMention,
    pub company_name: Option<String>,
    pub price: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub change: Option<f64>,
    pub percentage_change: Option<f64>,
    pub rsi: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "GPT_Analysis", default, skip_serializing_if = "Option::is_none")]
    pub narrative: Option<Narrative>,
}

impl StockRecord {
    pub fn undecorated(mention: TickerMention) -> Self {
        Self {
            mention,
            company_name: None,
            price: None,
            high: None,
            low: None,
            change: None,
            percentage_change: None,
            rsi: None,
            error: None,
            narrative: None,
        }
    }

    pub fn with_quote(mention: TickerMention, quote: anyhow::Result<Quote>) -> Self {
        let mut r = Self::undecorated(mention);
        match quote {
            Ok(q) => {
                r.company_name = q.company_name;
                r.price = Some(q.price);
                r.high = Some(q.high);
                r.low = Some(q.low);
                r.change = Some(q.change);
                r.percentage_change = Some(q.percentage_change);
                r.rsi = Some(q.rsi);
            }
            Err(e) => r.error = Some(format!("{e:#}")),
        }
        r
    }

    pub fn symbol(&self) -> &str {
        &self.mention.symbol
    }
}

/// The cached unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateResult {
    pub top_stock: Option<StockRecord>,
    pub worst_stock: Option<StockRecord>,
    /// Highest mention count first.
    pub rising_stocks: Vec<StockRecord>,
    pub computed_at: DateTime<Utc>,
}

impl AggregateResult {
    /// "None" in every category.
    pub fn empty(computed_at: DateTime<Utc>) -> Self {
        Self {
            top_stock: None,
            worst_stock: None,
            rising_stocks: Vec::new(),
            computed_at,
        }
    }

    /// The rising stock shown on its own: the second entry when there is
    /// more than one (the first usually repeats the top stock).
    pub fn featured_rising(&self) -> Option<&StockRecord> {
        match self.rising_stocks.len() {
            0 => None,
            1 => self.rising_stocks.first(),
            _ => self.rising_stocks.get(1),
        }
    }

    fn featured_rising_index(&self) -> Option<usize> {
        match self.rising_stocks.len() {
            0 => None,
            1 => Some(0),
            _ => Some(1),
        }
    }
}

/// Produces a fresh aggregate for the cache.
#[async_trait::async_trait]
pub trait ResultProducer: Send + Sync {
    async fn produce(&self) -> anyhow::Result<AggregateResult>;
}

/// Parameters of one analysis run.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisParams {
    pub sources: Vec<String>,
    pub fetch: FetchParams,
    pub stock_period: String,
    pub rising_limit: usize,
    pub max_concurrent: usize,
}

impl From<&AppConfig> for AnalysisParams {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            sources: cfg.sources.clone(),
            fetch: cfg.fetch_params(),
            stock_period: cfg.stock_period.clone(),
            rising_limit: cfg.rising_limit,
            max_concurrent: cfg.max_concurrent_sources,
        }
    }
}

/// Per-source categories with every entry decorated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceReport {
    pub source: String,
    pub top_stocks: Vec<StockRecord>,
    pub worst_stocks: Vec<StockRecord>,
    pub rising_stocks: Vec<StockRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpecificReport {
    pub source: String,
    pub specific_stock: Vec<StockRecord>,
}

pub struct AnalysisPipeline {
    collector: SourceCollector,
    market: Arc<dyn MarketData>,
    narrator: Arc<dyn Narrator>,
    params: AnalysisParams,
}

impl AnalysisPipeline {
    pub fn new(
        collector: SourceCollector,
        market: Arc<dyn MarketData>,
        narrator: Arc<dyn Narrator>,
        params: AnalysisParams,
    ) -> Self {
        Self {
            collector,
            market,
            narrator,
            params,
        }
    }

    pub fn params(&self) -> &AnalysisParams {
        &self.params
    }

    /// Undecorated per-source results, the selection made from them and the
    /// number of sources that failed.
    pub async fn collect_and_select(
        &self,
        params: &AnalysisParams,
    ) -> (Vec<SourceCategoryResult>, Selection, usize) {
        let outcomes = self
            .collector
            .collect_outcomes(&params.sources, params.fetch, params.max_concurrent)
            .await;
        let (results, failed) = into_results(outcomes, &params.sources);
        let sel = selection::select(&results, params.rising_limit);
        tracing::info!(
            target: "pipeline",
            sources = results.len(),
            failed_sources = failed,
            empty_sources = results.iter().filter(|r| r.is_empty()).count(),
            top = sel.top_stock.as_ref().map(|m| m.symbol.as_str()).unwrap_or("None"),
            worst = sel.worst_stock.as_ref().map(|m| m.symbol.as_str()).unwrap_or("None"),
            rising = sel.rising_stocks.len(),
            "selection done"
        );
        (results, sel, failed)
    }

    pub async fn decorate(&self, mention: TickerMention, period: &str) -> StockRecord {
        let bare = mention.symbol.trim_start_matches('$').to_string();
        let quote = self.market.quote(&bare, period).await;
        if let Err(e) = &quote {
            tracing::warn!(target: "pipeline", symbol = %mention.symbol, error = %e, "quote unavailable");
        }
        StockRecord::with_quote(mention, quote)
    }

    async fn decorate_all(&self, mentions: Vec<TickerMention>, period: &str) -> Vec<StockRecord> {
        let mut out = Vec::with_capacity(mentions.len());
        for m in mentions {
            out.push(self.decorate(m, period).await);
        }
        out
    }

    async fn narrate(&self, record: &mut StockRecord) {
        match self.narrator.explain(record).await {
            Ok(n) => record.narrative = Some(n),
            Err(e) => tracing::debug!(
                target: "pipeline",
                symbol = %record.symbol(),
                provider = self.narrator.provider_name(),
                error = %e,
                "no narrative"
            ),
        }
    }

    /// Full run with the configured parameters. `computed_at` is stamped
    /// at completion. Fails only when every source failed.
    pub async fn run(&self) -> Result<AggregateResult, AllSourcesFailed> {
        let params = self.params.clone();
        let (_, sel, failed) = self.collect_and_select(&params).await;
        if failed > 0 && failed == params.sources.len() {
            return Err(AllSourcesFailed { attempted: failed });
        }
        let period = params.stock_period.as_str();

        let Selection {
            top_stock,
            worst_stock,
            rising_stocks,
        } = sel;

        let (top, worst) = tokio::join!(
            async move {
                match top_stock {
                    Some(m) => Some(self.decorate(m, period).await),
                    None => None,
                }
            },
            async move {
                match worst_stock {
                    Some(m) => Some(self.decorate(m, period).await),
                    None => None,
                }
            }
        );
        let rising = self.decorate_all(rising_stocks, period).await;

        let mut result = AggregateResult {
            top_stock: top,
            worst_stock: worst,
            rising_stocks: rising,
            computed_at: Utc::now(),
        };

        if let Some(r) = result.top_stock.as_mut() {
            self.narrate(r).await;
        }
        if let Some(r) = result.worst_stock.as_mut() {
            self.narrate(r).await;
        }
        if let Some(i) = result.featured_rising_index() {
            self.narrate(&mut result.rising_stocks[i]).await;
        }
        result.computed_at = Utc::now();
        Ok(result)
    }

    /// Uncached run with caller parameters; every category entry of every
    /// source is decorated.
    pub async fn run_playground(&self, params: &AnalysisParams) -> Vec<SourceReport> {
        let (results, _, _) = self.collect_and_select(params).await;
        let mut out = Vec::with_capacity(results.len());
        for r in results {
            out.push(SourceReport {
                top_stocks: self.decorate_all(r.top_stocks, &params.stock_period).await,
                worst_stocks: self.decorate_all(r.worst_stocks, &params.stock_period).await,
                rising_stocks: self.decorate_all(r.rising_stocks, &params.stock_period).await,
                source: r.source,
            });
        }
        out
    }

    /// Mentions of the requested symbols per source, decorated.
    pub async fn run_specific(
        &self,
        params: &AnalysisParams,
        symbols: &[String],
    ) -> Vec<SpecificReport> {
        let found = self
            .collector
            .collect_specific(&params.sources, symbols, params.fetch, params.max_concurrent)
            .await;
        let mut out = Vec::with_capacity(found.len());
        for f in found {
            out.push(SpecificReport {
                specific_stock: self.decorate_all(f.mentions, &params.stock_period).await,
                source: f.source,
            });
        }
        out
    }
}

#[async_trait::async_trait]
impl ResultProducer for AnalysisPipeline {
    async fn produce(&self) -> anyhow::Result<AggregateResult> {
        Ok(self.run().await?)
    }
}
