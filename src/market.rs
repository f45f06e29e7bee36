//! Market quotes used to decorate selected tickers.
//!
//! Daily bars come from the Yahoo chart endpoint; the period summary and RSI
//! are computed locally.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::mentions::round2;

pub const RSI_PERIODS: usize = 14;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub company_name: Option<String>,
    pub price: f64,
    pub high: f64,
    pub low: f64,
    pub change: f64,
    pub percentage_change: f64,
    pub rsi: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

#[async_trait::async_trait]
pub trait MarketData: Send + Sync {
    /// `symbol` without the `$` marker; `period` like "1d", "5d", "1mo", "1y".
    async fn quote(&self, symbol: &str, period: &str) -> Result<Quote>;
}

/// 0 when `previous` is zero; the result must stay finite to serialize.
pub fn percentage_change(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        return 0.0;
    }
    (current - previous) / previous * 100.0
}

/// Simple-moving-average RSI over the last `periods` close deltas.
/// Returns 0 when there are not enough closes.
pub fn rsi(closes: &[f64], periods: usize) -> f64 {
    if periods == 0 || closes.len() < periods + 1 {
        return 0.0;
    }
    let tail = &closes[closes.len() - (periods + 1)..];
    let (mut up, mut down) = (0.0, 0.0);
    for w in tail.windows(2) {
        let d = w[1] - w[0];
        if d > 0.0 {
            up += d;
        } else {
            down -= d;
        }
    }
    let (avg_up, avg_down) = (up / periods as f64, down / periods as f64);
    if avg_down == 0.0 {
        // Flat series has no defined RSI.
        return if avg_up == 0.0 { 0.0 } else { 100.0 };
    }
    100.0 - 100.0 / (1.0 + avg_up / avg_down)
}

/// Summarise bars for `period`. "1d" compares the last bar's open and close;
/// longer periods compare the first open with the last close and use the
/// period extremes.
pub fn analyze_period(bars: &[Bar], period: &str, company_name: Option<String>) -> Result<Quote> {
    let min_bars = if period == "1d" { 1 } else { 2 };
    if bars.len() < min_bars {
        bail!("possibly delisted; no price data found (period={period})");
    }
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let last = bars[bars.len() - 1];

    let (reference, high, low) = if period == "1d" {
        (last.open, last.high, last.low)
    } else {
        let high = bars.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let low = bars.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        (bars[0].open, high, low)
    };

    Ok(Quote {
        company_name,
        price: round2(last.close),
        high: round2(high),
        low: round2(low),
        change: round2(last.close - reference),
        percentage_change: round2(percentage_change(last.close, reference)),
        rsi: round2(rsi(&closes, RSI_PERIODS)),
    })
}

// ------------------------------------------------------------
// Yahoo chart client
// ------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    long_name: Option<String>,
    short_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
}

impl QuoteSeries {
    /// Rows with any missing field are dropped.
    fn bars(&self) -> Vec<Bar> {
        let n = self
            .open
            .len()
            .min(self.high.len())
            .min(self.low.len())
            .min(self.close.len());
        (0..n)
            .filter_map(|i| {
                Some(Bar {
                    open: self.open[i]?,
                    high: self.high[i]?,
                    low: self.low[i]?,
                    close: self.close[i]?,
                })
            })
            .collect()
    }
}

pub struct YahooChart {
    http: reqwest::Client,
    base_url: String,
}

impl YahooChart {
    pub fn new() -> Result<Self> {
        Self::with_base_url("https://query1.finance.yahoo.com")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (ticker-trends)")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

fn parse_chart(body: &str, period: &str) -> Result<Quote> {
    let env: ChartEnvelope = serde_json::from_str(body).context("chart json")?;
    if let Some(err) = env.chart.error.filter(|e| !e.is_null()) {
        bail!("chart error: {err}");
    }
    let result = env
        .chart
        .result
        .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
        .ok_or_else(|| anyhow!("possibly delisted; no chart result (period={period})"))?;
    let bars = result
        .indicators
        .quote
        .first()
        .map(QuoteSeries::bars)
        .unwrap_or_default();
    let name = result.meta.long_name.or(result.meta.short_name);
    analyze_period(&bars, period, name)
}

#[async_trait::async_trait]
impl MarketData for YahooChart {
    async fn quote(&self, symbol: &str, period: &str) -> Result<Quote> {
        let url = format!(
            "{}/v8/finance/chart/{}?range={}&interval=1d",
            self.base_url, symbol, period
        );
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET chart for {symbol}"))?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            bail!("${symbol}: possibly delisted; HTTP {status} (period={period})");
        }
        parse_chart(&body, period).with_context(|| format!("${symbol}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            open,
            high,
            low,
            close,
        }
    }

    #[test]
    fn rsi_needs_enough_data() {
        assert_eq!(rsi(&[1.0; 14], 14), 0.0);
    }

    #[test]
    fn rsi_balanced_and_one_sided() {
        // alternating +1 / -1 → equal averages → 50
        let closes: Vec<f64> = (0..15).map(|i| if i % 2 == 0 { 10.0 } else { 11.0 }).collect();
        assert!((rsi(&closes, 14) - 50.0).abs() < 1e-9);

        let rising: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert_eq!(rsi(&rising, 14), 100.0);
    }

    #[test]
    fn daily_uses_last_bar_only() {
        let bars = vec![bar(1.0, 9.0, 0.5, 2.0), bar(10.0, 12.0, 9.5, 11.0)];
        let q = analyze_period(&bars, "1d", None).unwrap();
        assert_eq!(q.price, 11.0);
        assert_eq!(q.high, 12.0);
        assert_eq!(q.low, 9.5);
        assert_eq!(q.change, 1.0);
        assert_eq!(q.percentage_change, 10.0);
    }

    #[test]
    fn longer_periods_span_all_bars() {
        let bars = vec![
            bar(100.0, 105.0, 98.0, 104.0),
            bar(104.0, 110.0, 101.0, 108.0),
            bar(108.0, 109.0, 95.0, 96.0),
        ];
        let q = analyze_period(&bars, "1mo", Some("Acme".into())).unwrap();
        assert_eq!(q.company_name.as_deref(), Some("Acme"));
        assert_eq!(q.high, 110.0);
        assert_eq!(q.low, 95.0);
        assert_eq!(q.change, -4.0);
        assert_eq!(q.percentage_change, -4.0);
        assert_eq!(q.rsi, 0.0);
    }

    #[test]
    fn zero_open_gives_zero_percentage() {
        assert_eq!(percentage_change(5.0, 0.0), 0.0);
        let q = analyze_period(&[bar(0.0, 2.0, 0.0, 1.5)], "1d", None).unwrap();
        assert_eq!(q.change, 1.5);
        assert_eq!(q.percentage_change, 0.0);
        assert!(serde_json::to_value(&q).unwrap()["percentage_change"].is_number());
    }

    #[test]
    fn too_few_bars_is_delisted() {
        let err = analyze_period(&[bar(1.0, 1.0, 1.0, 1.0)], "5d", None).unwrap_err();
        assert!(err.to_string().contains("possibly delisted"));
    }

    #[test]
    fn chart_json_with_gaps() {
        let body = r#"{"chart":{"result":[{"meta":{"longName":"Acme Corp"},
            "indicators":{"quote":[{"open":[1.0,null,2.0],"high":[1.5,3.0,2.5],
            "low":[0.5,1.0,1.5],"close":[1.2,2.0,2.4]}]}}],"error":null}}"#;
        let q = parse_chart(body, "5d").unwrap();
        assert_eq!(q.company_name.as_deref(), Some("Acme Corp"));
        assert_eq!(q.price, 2.4);
        assert_eq!(q.change, 1.4);
    }

    #[test]
    fn chart_error_surfaces() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found"}}}"#;
        assert!(parse_chart(body, "1mo").is_err());
    }
}
