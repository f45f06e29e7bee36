use std::time::Duration;

use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder (once per process) and publish the
    /// configured cache TTL.
    pub fn init(cache_ttl: Duration) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        describe_counter!("cache_hits_total", "Requests served from a valid cache.");
        describe_counter!("cache_recompute_total", "Full analysis recomputes started.");
        describe_counter!(
            "cache_recompute_failures_total",
            "Recomputes that failed and kept the previous result."
        );
        describe_gauge!(
            "cache_last_refresh_ts",
            "Unix time of the result currently held by the cache."
        );
        describe_gauge!("cache_ttl_seconds", "Configured cache time-to-live.");
        gauge!("cache_ttl_seconds").set(cache_ttl.as_secs_f64());

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
