// tests/collector_sources.rs
//
// SourceCollector against in-memory fetchers: per-source isolation, output
// order, the worker-pool bound and the specific-symbol query.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ticker_trends::collector::{FetchParams, SortMode, SourceCollector, SourceFetcher};
use ticker_trends::error::{CollectionError, ExtractionError};
use ticker_trends::mentions::{SentimentScorer, TextUnit};
use ticker_trends::selection::select;

/// "moon" → 0.9, "crash" → -0.8, "boom" fails, anything else 0.1.
struct KeywordScorer;

impl SentimentScorer for KeywordScorer {
    fn score(&self, text: &str) -> Result<f64, ExtractionError> {
        if text.contains("boom") {
            return Err(ExtractionError("scorer exploded".into()));
        }
        Ok(if text.contains("moon") {
            0.9
        } else if text.contains("crash") {
            -0.8
        } else {
            0.1
        })
    }
}

#[derive(Default)]
struct MapFetcher {
    posts: HashMap<String, Vec<TextUnit>>,
    delays: HashMap<String, Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MapFetcher {
    fn with(mut self, source: &str, titles: &[&str]) -> Self {
        let units = titles
            .iter()
            .enumerate()
            .map(|(i, t)| TextUnit::new(*t, "", format!("https://reddit.test/{source}/{i}"), vec![]))
            .collect();
        self.posts.insert(source.to_string(), units);
        self
    }

    fn delayed(mut self, source: &str, ms: u64) -> Self {
        self.delays.insert(source.to_string(), Duration::from_millis(ms));
        self
    }
}

#[async_trait]
impl SourceFetcher for MapFetcher {
    async fn fetch(
        &self,
        source_id: &str,
        _params: &FetchParams,
    ) -> Result<Vec<TextUnit>, CollectionError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let delay = self
            .delays
            .get(source_id)
            .copied()
            .unwrap_or(Duration::from_millis(5));
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.posts
            .get(source_id)
            .cloned()
            .ok_or_else(|| CollectionError::fetch(source_id, "403 Forbidden"))
    }
}

fn params() -> FetchParams {
    FetchParams {
        limit: 10,
        comment_limit: 3,
        sort: SortMode::Hot,
        time_window: None,
    }
}

fn sources(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn collector(fetcher: Arc<MapFetcher>) -> SourceCollector {
    SourceCollector::new(fetcher, Arc::new(KeywordScorer))
}

#[tokio::test]
async fn failing_source_is_empty_and_others_still_win() {
    let fetcher = Arc::new(
        MapFetcher::default()
            .with(
                "wallstreetbets",
                &["$GME to the moon", "$GME moon again", "$AAPL crash"],
            )
            .with("stocks", &["$AAPL crash incoming"]),
    );
    let results = collector(fetcher)
        .collect_all(&sources(&["wallstreetbets", "private", "stocks"]), params(), 4)
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[1].source, "private");
    assert!(results[1].is_empty());

    let sel = select(&results, 3);
    assert_eq!(sel.top_stock.as_ref().unwrap().symbol, "$GME");
    assert_eq!(sel.top_stock.as_ref().unwrap().count, 2);
    assert_eq!(sel.top_stock.unwrap().sentiment, 9.0);
    // Tail of both surviving sources.
    assert_eq!(sel.worst_stock.unwrap().symbol, "$AAPL");
    assert_eq!(sel.rising_stocks.len(), 1);
}

#[tokio::test]
async fn results_follow_input_order_not_completion_order() {
    let fetcher = Arc::new(
        MapFetcher::default()
            .with("slow", &["$AAA moon"])
            .with("fast", &["$BBB moon"])
            .delayed("slow", 60)
            .delayed("fast", 1),
    );
    let results = collector(fetcher)
        .collect_all(&sources(&["slow", "fast"]), params(), 2)
        .await;
    let names: Vec<_> = results.iter().map(|r| r.source.as_str()).collect();
    assert_eq!(names, vec!["slow", "fast"]);
    assert_eq!(results[0].top_stocks[0].symbol, "$AAA");
}

#[tokio::test]
async fn pool_bound_is_respected() {
    let names = ["a", "b", "c", "d", "e", "f"];
    let mut f = MapFetcher::default();
    for n in names {
        f = f.with(n, &["$SPY moon"]).delayed(n, 20);
    }
    let fetcher = Arc::new(f);
    let results = collector(fetcher.clone())
        .collect_all(&sources(&names), params(), 2)
        .await;

    assert_eq!(results.len(), names.len());
    assert!(results.iter().all(|r| !r.is_empty()));
    assert!(fetcher.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn scorer_failure_empties_only_that_source() {
    let fetcher = Arc::new(
        MapFetcher::default()
            .with("bad", &["$TSLA boom"])
            .with("good", &["$TSLA moon"]),
    );
    let c = collector(fetcher);
    let err = c.collect("bad", &params()).await.unwrap_err();
    assert!(matches!(err, CollectionError::Extraction { .. }));
    assert_eq!(err.source_id(), "bad");

    let results = c.collect_all(&sources(&["bad", "good"]), params(), 2).await;
    assert!(results[0].is_empty());
    assert_eq!(results[1].rising_stocks.len(), 1);
}

#[tokio::test]
async fn specific_query_keeps_only_requested_symbols() {
    let fetcher = Arc::new(
        MapFetcher::default()
            .with("wallstreetbets", &["$TSLA moon and $GME", "$AAPL crash"])
            .with("stocks", &["$NVDA moon"]),
    );
    let found = collector(fetcher)
        .collect_specific(
            &sources(&["wallstreetbets", "stocks", "gone"]),
            &["tsla".to_string(), "$AAPL".to_string()],
            params(),
            4,
        )
        .await;

    assert_eq!(found.len(), 3);
    let wsb: Vec<_> = found[0].mentions.iter().map(|m| m.symbol.as_str()).collect();
    assert_eq!(wsb, vec!["$TSLA", "$AAPL"]);
    assert!(found[1].mentions.is_empty());
    assert!(found[2].mentions.is_empty());
}
