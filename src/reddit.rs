//! Reddit source fetcher over the public JSON listing endpoints.
//!
//! `GET /r/{sub}/{sort}.json?limit=N[&t=window]` for posts, then
//! `GET /r/{sub}/comments/{id}.json?depth=1` per post for top-level comments.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;

use crate::collector::{FetchParams, SourceFetcher};
use crate::error::CollectionError;
use crate::mentions::TextUnit;

const DEFAULT_BASE_URL: &str = "https://www.reddit.com";
const USER_AGENT: &str = "ticker-trends/0.1 (sentiment aggregation bot)";

/// Decode HTML entities and collapse whitespace.
pub fn clean_text(s: &str) -> String {
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let decoded = html_escape::decode_html_entities(s).to_string();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    re_ws.replace_all(&decoded, " ").trim().to_string()
}

#[derive(Debug, Deserialize)]
struct Listing<T> {
    data: ListingData<T>,
}

#[derive(Debug, Deserialize)]
struct ListingData<T> {
    children: Vec<Thing<T>>,
}

#[derive(Debug, Deserialize)]
struct Thing<T> {
    kind: String,
    data: T,
}

#[derive(Debug, Deserialize)]
struct PostData {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct CommentData {
    #[serde(default)]
    body: Option<String>,
}

pub struct RedditFetcher {
    http: reqwest::Client,
    base_url: String,
}

impl RedditFetcher {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn listing_url(&self, subreddit: &str, params: &FetchParams) -> String {
        let mut url = format!(
            "{}/r/{}/{}.json?limit={}&raw_json=1",
            self.base_url,
            subreddit,
            params.sort.as_str(),
            params.limit
        );
        if let Some(t) = params.effective_time_window() {
            url.push_str("&t=");
            url.push_str(t.as_str());
        }
        url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        subreddit: &str,
        url: &str,
    ) -> Result<T, CollectionError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| CollectionError::fetch(subreddit, e))?;
        if !resp.status().is_success() {
            return Err(CollectionError::fetch(
                subreddit,
                format!("HTTP {} for {url}", resp.status()),
            ));
        }
        resp.json::<T>()
            .await
            .map_err(|e| CollectionError::fetch(subreddit, e))
    }

    async fn top_comments(&self, subreddit: &str, post_id: &str, limit: usize) -> Vec<String> {
        if limit == 0 {
            return Vec::new();
        }
        let url = format!(
            "{}/r/{}/comments/{}.json?depth=1&limit={}&raw_json=1",
            self.base_url, subreddit, post_id, limit
        );
        // Comment failures only cost this post its comments.
        match self
            .get_json::<Vec<Listing<CommentData>>>(subreddit, &url)
            .await
        {
            Ok(listings) => comments_from(listings, limit),
            Err(e) => {
                tracing::debug!(target: "reddit", post = post_id, error = %e, "comments unavailable");
                Vec::new()
            }
        }
    }
}

fn comments_from(listings: Vec<Listing<CommentData>>, limit: usize) -> Vec<String> {
    listings
        .into_iter()
        .nth(1)
        .map(|l| {
            l.data
                .children
                .into_iter()
                .filter(|t| t.kind == "t1")
                .filter_map(|t| t.data.body)
                .map(|b| clean_text(&b))
                .filter(|b| !b.is_empty())
                .take(limit)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl SourceFetcher for RedditFetcher {
    async fn fetch(
        &self,
        source_id: &str,
        params: &FetchParams,
    ) -> Result<Vec<TextUnit>, CollectionError> {
        let url = self.listing_url(source_id, params);
        let listing: Listing<PostData> = self.get_json(source_id, &url).await?;

        let mut units = Vec::new();
        for thing in listing.data.children.into_iter().take(params.limit) {
            if thing.kind != "t3" {
                continue;
            }
            let post = thing.data;
            let comments = self
                .top_comments(source_id, &post.id, params.comment_limit)
                .await;
            units.push(TextUnit::new(
                clean_text(&post.title),
                clean_text(&post.selftext),
                post.url,
                comments,
            ));
        }
        tracing::info!(target: "reddit", subreddit = source_id, posts = units.len(), "fetched");
        Ok(units)
    }
}
