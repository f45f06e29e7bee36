//! Ticker Trends: binary entrypoint
//! Loads configuration, restores the cached analysis, starts the refresh
//! jobs and serves the Axum router.

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ticker_trends::config::AppConfig;
use ticker_trends::metrics::Metrics;
use ticker_trends::scheduler::{spawn_refresh_jobs, RefreshPlan, TokioScheduler};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ticker_trends=info,warn"));

    // A host runtime may already have installed a subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load_default().map_err(shuttle_runtime::Error::Custom)?;
    tracing::info!(
        sources = ?cfg.sources,
        sort = cfg.sort.as_str(),
        period = %cfg.stock_period,
        narrative = cfg.narrative_enabled,
        "configuration loaded"
    );

    // Install the recorder before any job can emit.
    let metrics = match Metrics::init(cfg.cache_ttl()) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = %e, "metrics disabled");
            None
        }
    };

    let state = ticker_trends::build_state(&cfg)
        .await
        .map_err(shuttle_runtime::Error::Custom)?;

    let plan = RefreshPlan::from_config(&cfg).map_err(shuttle_runtime::Error::Custom)?;
    spawn_refresh_jobs(&TokioScheduler, state.cache.clone(), plan);

    let mut router = ticker_trends::router(state);
    if let Some(m) = metrics {
        router = router.merge(m.router());
    }

    Ok(router.into())
}
