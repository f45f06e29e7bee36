// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot, with the
// pipeline wired to in-memory collaborators.
//
// Covered:
// - GET /health
// - GET /api/home (info message)
// - POST /api/home getgeneralanalysis / redogeneralanalysis
// - POST /api/playground general + specific
// - malformed and unknown requests → 400

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value as Json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt as _; // for `oneshot`

use ticker_trends::collector::{FetchParams, SortMode, SourceCollector, SourceFetcher};
use ticker_trends::error::{CollectionError, ExtractionError};
use ticker_trends::market::{MarketData, Quote};
use ticker_trends::mentions::{SentimentScorer, TextUnit};
use ticker_trends::narrative::DisabledNarrator;
use ticker_trends::pipeline::{AnalysisParams, AnalysisPipeline};
use ticker_trends::{router, AppState, FreshnessCache};

const BODY_LIMIT: usize = 1024 * 1024;

struct FixedScorer;

impl SentimentScorer for FixedScorer {
    fn score(&self, text: &str) -> Result<f64, ExtractionError> {
        Ok(if text.contains("bad") { -0.6 } else { 0.8 })
    }
}

/// Serves canned posts; counts fetches so tests can see recomputes.
struct CannedFetcher {
    posts: HashMap<&'static str, Vec<&'static str>>,
    fetches: AtomicUsize,
}

#[async_trait]
impl SourceFetcher for CannedFetcher {
    async fn fetch(
        &self,
        source_id: &str,
        _params: &FetchParams,
    ) -> Result<Vec<TextUnit>, CollectionError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let titles = self
            .posts
            .get(source_id)
            .ok_or_else(|| CollectionError::fetch(source_id, "not found"))?;
        Ok(titles
            .iter()
            .map(|t| TextUnit::new(*t, "", format!("https://reddit.test/r/{source_id}"), vec![]))
            .collect())
    }
}

struct FlatMarket;

#[async_trait]
impl MarketData for FlatMarket {
    async fn quote(&self, symbol: &str, _period: &str) -> anyhow::Result<Quote> {
        if symbol == "DEAD" {
            anyhow::bail!("${symbol}: possibly delisted");
        }
        Ok(Quote {
            company_name: Some(format!("{symbol} Inc.")),
            price: 100.0,
            high: 110.0,
            low: 90.0,
            change: 5.0,
            percentage_change: 5.26,
            rsi: 55.0,
        })
    }
}

fn test_app() -> (Router, Arc<CannedFetcher>) {
    let fetcher = Arc::new(CannedFetcher {
        posts: HashMap::from([
            ("wallstreetbets", vec!["$SPY calls", "$SPY again", "$DEAD bad news"]),
            ("stocks", vec!["$SPY steady", "$TSLA bad quarter"]),
            ("stockmarket", vec!["$GPRO rally"]),
        ]),
        fetches: AtomicUsize::new(0),
    });
    let params = AnalysisParams {
        sources: vec!["wallstreetbets".into(), "stocks".into(), "stockmarket".into()],
        fetch: FetchParams {
            limit: 10,
            comment_limit: 2,
            sort: SortMode::Hot,
            time_window: None,
        },
        stock_period: "1mo".into(),
        rising_limit: 3,
        max_concurrent: 4,
    };
    let pipeline = Arc::new(AnalysisPipeline::new(
        SourceCollector::new(fetcher.clone(), Arc::new(FixedScorer)),
        Arc::new(FlatMarket),
        Arc::new(DisabledNarrator),
        params,
    ));
    let cache = Arc::new(FreshnessCache::new(
        pipeline.clone(),
        Duration::from_secs(3600),
    ));
    (router(AppState { cache, pipeline }), fetcher)
}

async fn send(app: &Router, method: &str, uri: &str, payload: Option<Json>) -> (StatusCode, Json) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match payload {
        Some(p) => {
            req = req.header("content-type", "application/json");
            Body::from(p.to_string())
        }
        None => Body::empty(),
    };
    let resp = app
        .clone()
        .oneshot(req.body(body).expect("build request"))
        .await
        .expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let v = serde_json::from_slice(&bytes).unwrap_or(Json::String(
        String::from_utf8_lossy(&bytes).into_owned(),
    ));
    (status, v)
}

#[tokio::test]
async fn health_is_ok() {
    let (app, _) = test_app();
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Json::String("OK".into()));
}

#[tokio::test]
async fn home_get_returns_info_message() {
    let (app, _) = test_app();
    let (status, body) = send(&app, "GET", "/api/home", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().contains("POST"));
}

#[tokio::test]
async fn general_analysis_is_cached_between_requests() {
    let (app, fetcher) = test_app();
    let req = json!({"request": {"type": "getgeneralanalysis"}});

    let (status, first) = send(&app, "POST", "/api/home", Some(req.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let fetched = fetcher.fetches.load(Ordering::SeqCst);
    assert_eq!(fetched, 3);

    let top = &first["response"]["Top_Stock"];
    assert_eq!(top["symbol"], "$SPY");
    assert_eq!(top["count"], 2);
    assert_eq!(top["company_name"], "SPY Inc.");
    assert!(first["last_updated"].is_string());

    let (_, second) = send(&app, "POST", "/api/home", Some(req)).await;
    assert_eq!(second, first);
    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), fetched);
}

#[tokio::test]
async fn redo_forces_a_new_collection() {
    let (app, fetcher) = test_app();
    send(&app, "POST", "/api/home", Some(json!({"request": {"type": "getgeneralanalysis"}}))).await;
    let (status, body) = send(
        &app,
        "POST",
        "/api/home",
        Some(json!({"request": {"type": "redogeneralanalysis"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 6);
    assert!(body["response"]["Rising_Stocks"].is_array());
}

#[tokio::test]
async fn delisted_worst_stock_carries_error() {
    let (app, _) = test_app();
    let (_, body) = send(&app, "POST", "/api/home", Some(json!({"request": {"type": "getgeneralanalysis"}}))).await;
    // Tails: $DEAD (wallstreetbets, count 1), $TSLA (stocks, count 1),
    // $GPRO (stockmarket, count 1); first in source order wins.
    let worst = &body["response"]["Worst_Stock"];
    assert_eq!(worst["symbol"], "$DEAD");
    assert!(worst["error"].as_str().unwrap().contains("delisted"));
    assert!(worst["price"].is_null());
}

#[tokio::test]
async fn bad_requests_are_rejected() {
    let (app, _) = test_app();

    let (status, body) = send(&app, "POST", "/api/home", Some(json!({"nope": 1}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid request format");

    let (status, body) = send(
        &app,
        "POST",
        "/api/home",
        Some(json!({"request": {"type": "dance"}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Unknown request type: dance");

    let (status, _) = send(
        &app,
        "POST",
        "/api/playground",
        Some(json!({"request": {"type": "getplaygroundgeneralanalysis",
            "parameters": {"time": "fortnight"}}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        "POST",
        "/api/playground",
        Some(json!({"request": {"type": "getplaygroundgeneralanalysis",
            "parameters": {"subreddits": ["stocks/../about"]}}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("invalid subreddit"));
}

#[tokio::test]
async fn playground_general_returns_every_source() {
    let (app, fetcher) = test_app();
    let (status, body) = send(
        &app,
        "POST",
        "/api/playground",
        Some(json!({"request": {"type": "getplaygroundgeneralanalysis",
            "parameters": {"subreddits": ["stocks", "stockmarket"], "limit": 4, "time": "none"}}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let results = body["analysis_results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["source"], "stocks");
    assert_eq!(results[0]["top_stocks"][0]["symbol"], "$SPY");
    assert_eq!(results[0]["top_stocks"][0]["price"], 100.0);
    assert!(body["timestamp"].is_string());
    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn playground_specific_filters_symbols() {
    let (app, _) = test_app();
    let (status, body) = send(
        &app,
        "POST",
        "/api/playground",
        Some(json!({"request": {"type": "getplaygroundspecificanalysis",
            "parameters": {"stocks": ["tsla"]}}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let results = body["analysis_results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert!(results[0]["specific_stock"].as_array().unwrap().is_empty());
    assert_eq!(results[1]["specific_stock"][0]["symbol"], "$TSLA");
    assert_eq!(results[1]["specific_stock"][0]["company_name"], "TSLA Inc.");
}
