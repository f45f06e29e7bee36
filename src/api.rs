use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{
    de::{
        value::{Error as DeError, StrDeserializer},
        IntoDeserializer,
    },
    Deserialize, Serialize,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::cache::{CacheSnapshot, FreshnessCache, SNAPSHOT_TS_FORMAT};
use crate::collector::{FetchParams, SortMode, TimeWindow};
use crate::config::default_sources;
use crate::pipeline::{AnalysisParams, AnalysisPipeline};

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<FreshnessCache>,
    pub pipeline: Arc<AnalysisPipeline>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/home", get(home_info).post(home))
        .route("/api/playground", post(playground))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request format")]
    InvalidFormat,
    #[error("Unknown request type: {0}")]
    UnknownType(String),
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(target: "api", error = %self, "rejected request");
        (StatusCode::BAD_REQUEST, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    request: ApiRequest,
}

#[derive(Debug, Deserialize)]
struct ApiRequest {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    parameters: Option<Value>,
}

fn envelope(body: Result<Json<Value>, JsonRejection>) -> Result<ApiRequest, ApiError> {
    let Json(raw) = body.map_err(|_| ApiError::InvalidFormat)?;
    let env: Envelope = serde_json::from_value(raw).map_err(|_| ApiError::InvalidFormat)?;
    Ok(env.request)
}

async fn home_info() -> Json<Value> {
    Json(json!({
        "message": "This endpoint supports POST requests for processing data."
    }))
}

async fn home(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<CacheSnapshot>, ApiError> {
    let req = envelope(body)?;
    let result = match req.kind.as_str() {
        "getgeneralanalysis" => state.cache.get().await,
        "redogeneralanalysis" => {
            tracing::info!(target: "api", "fresh analysis requested");
            state.cache.force_refresh().await
        }
        other => return Err(ApiError::UnknownType(other.to_string())),
    };
    Ok(Json(CacheSnapshot::from(&result)))
}

/// Reddit caps a listing page at 100 items.
pub const MAX_LISTING_LIMIT: usize = 100;

/// Subreddit names are ASCII letters, digits and underscores.
fn is_source_name(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Caller-supplied knobs for uncached runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaygroundParams {
    pub subreddits: Vec<String>,
    pub stocks: Vec<String>,
    pub limit: usize,
    pub comment_limit: usize,
    pub sort: SortMode,
    /// A window name, or "none".
    pub time: Option<String>,
    pub period: String,
}

impl Default for PlaygroundParams {
    fn default() -> Self {
        Self {
            subreddits: default_sources(),
            stocks: vec!["$AAPL".into(), "$TSLA".into()],
            limit: 10,
            comment_limit: 10,
            sort: SortMode::Hot,
            time: None,
            period: "1mo".into(),
        }
    }
}

impl PlaygroundParams {
    fn time_window(&self) -> Result<Option<TimeWindow>, ApiError> {
        match self.time.as_deref().map(str::trim) {
            None | Some("") | Some("none") => Ok(None),
            Some(t) => {
                let de: StrDeserializer<'_, DeError> = t.into_deserializer();
                TimeWindow::deserialize(de)
                    .map(Some)
                    .map_err(|_| ApiError::InvalidParameters(format!("unknown time window '{t}'")))
            }
        }
    }

    /// Overlay onto the service defaults. Limits are clamped to what a
    /// single Reddit listing returns.
    pub fn to_analysis(&self, base: &AnalysisParams) -> Result<AnalysisParams, ApiError> {
        if self.limit == 0 {
            return Err(ApiError::InvalidParameters("limit must be positive".into()));
        }
        let sources: Vec<String> = self
            .subreddits
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if sources.is_empty() {
            return Err(ApiError::InvalidParameters("no subreddits given".into()));
        }
        if let Some(bad) = sources.iter().find(|s| !is_source_name(s)) {
            return Err(ApiError::InvalidParameters(format!("invalid subreddit '{bad}'")));
        }
        Ok(AnalysisParams {
            sources,
            fetch: FetchParams {
                limit: self.limit.min(MAX_LISTING_LIMIT),
                comment_limit: self.comment_limit.min(MAX_LISTING_LIMIT),
                sort: self.sort,
                time_window: self.time_window()?,
            },
            stock_period: self.period.clone(),
            ..base.clone()
        })
    }
}

#[derive(Debug, Serialize)]
struct PlaygroundResponse<T> {
    analysis_results: Vec<T>,
    timestamp: String,
}

impl<T> PlaygroundResponse<T> {
    fn now(analysis_results: Vec<T>) -> Self {
        Self {
            analysis_results,
            timestamp: Utc::now().format(SNAPSHOT_TS_FORMAT).to_string(),
        }
    }
}

async fn playground(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = envelope(body)?;
    let params: PlaygroundParams = match req.parameters {
        Some(v) if !v.is_null() => serde_json::from_value(v)
            .map_err(|e| ApiError::InvalidParameters(e.to_string()))?,
        _ => PlaygroundParams::default(),
    };

    match req.kind.as_str() {
        "getplaygroundgeneralanalysis" => {
            let analysis = params.to_analysis(state.pipeline.params())?;
            tracing::info!(target: "api", sources = ?analysis.sources, limit = analysis.fetch.limit, "playground general analysis");
            let reports = state.pipeline.run_playground(&analysis).await;
            Ok(Json(PlaygroundResponse::now(reports)).into_response())
        }
        "getplaygroundspecificanalysis" => {
            let analysis = params.to_analysis(state.pipeline.params())?;
            if params.stocks.is_empty() {
                return Err(ApiError::InvalidParameters("no stocks given".into()));
            }
            tracing::info!(target: "api", stocks = ?params.stocks, "playground specific analysis");
            let reports = state.pipeline.run_specific(&analysis, &params.stocks).await;
            Ok(Json(PlaygroundResponse::now(reports)).into_response())
        }
        other => Err(ApiError::UnknownType(other.to_string())),
    }
}
