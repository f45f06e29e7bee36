//! Per-source classification into top / worst / rising lists.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::mentions::{MentionMap, TickerMention};

/// Sentiment a mention must exceed to count as rising.
pub const RISING_THRESHOLD: f64 = 0.5;

/// Category lists for one source. All three lists are sorted by sentiment
/// descending; the tail of `worst_stocks` is the worst.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceCategoryResult {
    pub source: String,
    pub top_stocks: Vec<TickerMention>,
    pub worst_stocks: Vec<TickerMention>,
    pub rising_stocks: Vec<TickerMention>,
}

impl SourceCategoryResult {
    /// No candidates from this source.
    pub fn empty(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.top_stocks.is_empty() && self.worst_stocks.is_empty() && self.rising_stocks.is_empty()
    }
}

/// Stable sort by sentiment, highest first.
pub fn sort_by_sentiment_desc(mentions: &mut [TickerMention]) {
    mentions.sort_by(|a, b| {
        b.sentiment
            .partial_cmp(&a.sentiment)
            .unwrap_or(Ordering::Equal)
    });
}

/// Split a source's mentions into its three category lists.
///
/// `top` is the first `limit / 2` entries and `worst` the last `limit / 2`.
/// With fewer than `limit` symbols the two slices overlap; that is kept as is.
pub fn classify(source: &str, mentions: MentionMap, limit: usize) -> SourceCategoryResult {
    let mut sorted = mentions.into_vec();
    sort_by_sentiment_desc(&mut sorted);

    let half = limit / 2;
    let top_stocks: Vec<TickerMention> = sorted.iter().take(half).cloned().collect();
    let worst_stocks: Vec<TickerMention> = sorted[sorted.len().saturating_sub(half)..].to_vec();
    let rising_stocks: Vec<TickerMention> = sorted
        .into_iter()
        .filter(|m| m.sentiment > RISING_THRESHOLD)
        .collect();

    SourceCategoryResult {
        source: source.to_string(),
        top_stocks,
        worst_stocks,
        rising_stocks,
    }
}
