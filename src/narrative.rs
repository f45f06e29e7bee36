//! Narrative commentary for a selected stock (language model).
//!
//! Purely decorative: nothing in selection or caching reads it.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

use crate::pipeline::StockRecord;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Narrative {
    pub overview: String,
    pub market_sentiment: String,
    pub technical_analysis: String,
    pub fundamental_analysis: String,
    pub prediction: String,
    /// 0..=100
    #[serde(rename = "Confidence Score", deserialize_with = "number_or_string")]
    pub confidence_score: f64,
}

/// Models return the score as either `72` or `"72"`.
fn number_or_string<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Text(String),
    }
    let v = match Raw::deserialize(d)? {
        Raw::Num(n) => n,
        Raw::Text(s) => s
            .trim()
            .trim_end_matches('%')
            .parse::<f64>()
            .map_err(serde::de::Error::custom)?,
    };
    Ok(v.clamp(0.0, 100.0))
}

#[async_trait::async_trait]
pub trait Narrator: Send + Sync {
    async fn explain(&self, record: &StockRecord) -> Result<Narrative>;
    fn provider_name(&self) -> &'static str;
}

/// Always fails; used when narratives are switched off.
pub struct DisabledNarrator;

#[async_trait::async_trait]
impl Narrator for DisabledNarrator {
    async fn explain(&self, _record: &StockRecord) -> Result<Narrative> {
        bail!("narratives disabled")
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

const SYSTEM_PROMPT: &str = "You are an expert financial analyst with deep knowledge of stock and crypto markets. \
You will receive a JSON record of a stock selected from subreddit discussion (best, worst or rising): \
symbol, company name, mention count, sentiment, the source post, price, high, low, change, percentage change and RSI. \
Analyze it and predict future performance using technical indicators, fundamentals, market trends and sentiment. \
Respond strictly in JSON with keys: \"overview\", \"market_sentiment\", \"technical_analysis\", \
\"fundamental_analysis\", \"prediction\", \"Confidence Score\" (a number between 0 and 100).";

/// OpenAI Chat Completions narrator. Requires `OPENAI_API_KEY`.
pub struct OpenAiNarrator {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiNarrator {
    /// `model_override` defaults to gpt-4o-mini.
    pub fn from_env(model_override: Option<&str>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("Missing OPENAI_API_KEY env var"))?;
        let http = reqwest::Client::builder()
            .user_agent("ticker-trends/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api_key,
            model: model_override.unwrap_or("gpt-4o-mini").to_string(),
        })
    }
}

#[async_trait::async_trait]
impl Narrator for OpenAiNarrator {
    async fn explain(&self, record: &StockRecord) -> Result<Narrative> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat<'a> {
            #[serde(rename = "type")]
            kind: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
            frequency_penalty: f32,
            presence_penalty: f32,
            response_format: ResponseFormat<'a>,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let user = format!(
            "Here is the stock data in JSON format: {}. Please analyze it and return a response in JSON format. \
             You have only 300 tokens to respond.",
            serde_json::to_string(record)?
        );
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.3,
            max_tokens: 300,
            frequency_penalty: 0.2,
            presence_penalty: 0.3,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("openai request")?;
        if !resp.status().is_success() {
            bail!("openai HTTP {}", resp.status());
        }
        let body: Resp = resp.json().await.context("openai response body")?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| anyhow!("openai returned no choices"))?;
        parse_narrative(content)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

pub fn parse_narrative(content: &str) -> Result<Narrative> {
    serde_json::from_str(content.trim()).context("narrative json")
}
