//! # Mention Extraction
//! Finds `$TICKER` symbols in text units, accumulates per-symbol sentiment
//! and folds each symbol into one `TickerMention`.
//!
//! Sentiment per unit comes from a [`SentimentScorer`]. The per-symbol mean
//! is amplified ×10 so compound scores in [-1, 1] spread over roughly
//! [-10, 10]; a zero mean stays exactly zero.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ExtractionError;

/// Marker-prefixed uppercase ticker, e.g. `$TSLA`.
static TICKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$[A-Z]+").expect("ticker regex"));

/// One post: title, body, top comments and a backlink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextUnit {
    pub title: String,
    #[serde(rename = "text")]
    pub body: String,
    pub comments: Vec<String>,
    pub link: String,
    pub full_text: String,
}

impl TextUnit {
    /// Builds the unit and its concatenated `full_text`. Comments are
    /// numbered in the order given.
    pub fn new(
        title: impl Into<String>,
        body: impl Into<String>,
        link: impl Into<String>,
        comments: Vec<String>,
    ) -> Self {
        let title = title.into();
        let body = body.into();
        let link = link.into();
        let comments: Vec<String> = comments
            .into_iter()
            .enumerate()
            .map(|(i, c)| format!("Comment {}: {}", i + 1, c))
            .collect();
        let full_text = format!(
            "Post Title: {title} Post Text: {body} Post Link: {link} Top Comments:{}",
            comments.join(" ")
        );
        Self {
            title,
            body,
            comments,
            link,
            full_text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickerMention {
    pub symbol: String,
    /// Occurrences within the one source that produced this mention.
    pub count: u32,
    pub sentiment: f64,
    /// Last unit in which the symbol appeared.
    pub post: TextUnit,
}

/// Scores a text unit in [-1, 1].
pub trait SentimentScorer: Send + Sync {
    fn score(&self, text: &str) -> Result<f64, ExtractionError>;
}

/// Symbol → mention map that iterates in discovery order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MentionMap {
    entries: Vec<TickerMention>,
    index: HashMap<String, usize>,
}

impl MentionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces; a replaced symbol keeps its discovery position.
    pub fn insert(&mut self, mention: TickerMention) {
        match self.index.get(&mention.symbol) {
            Some(&i) => self.entries[i] = mention,
            None => {
                self.index.insert(mention.symbol.clone(), self.entries.len());
                self.entries.push(mention);
            }
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&TickerMention> {
        self.index.get(symbol).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TickerMention> {
        self.entries.iter()
    }

    pub fn into_vec(self) -> Vec<TickerMention> {
        self.entries
    }
}

impl FromIterator<TickerMention> for MentionMap {
    fn from_iter<I: IntoIterator<Item = TickerMention>>(iter: I) -> Self {
        let mut m = MentionMap::new();
        for it in iter {
            m.insert(it);
        }
        m
    }
}

/// ×10 amplification; zero stays zero.
pub fn normalize_score(x: f64) -> f64 {
    if x != 0.0 {
        x * 10.0
    } else {
        0.0
    }
}

pub(crate) fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Tickers in `text`, in order of appearance (duplicates kept).
pub fn find_tickers(text: &str) -> Vec<&str> {
    TICKER_RE.find_iter(text).map(|m| m.as_str()).collect()
}

struct Accumulator {
    count: u32,
    scores: Vec<f64>,
    post: TextUnit,
}

/// Scan units, score the ones that mention tickers and fold per symbol.
///
/// Units without tickers are not scored. A scorer failure aborts the whole
/// batch.
pub fn extract(
    units: &[TextUnit],
    scorer: &dyn SentimentScorer,
) -> Result<MentionMap, ExtractionError> {
    let mut order: Vec<String> = Vec::new();
    let mut acc: HashMap<String, Accumulator> = HashMap::new();

    for unit in units {
        let matches = find_tickers(&unit.full_text);
        if matches.is_empty() {
            continue;
        }
        let score = round2(scorer.score(&unit.full_text)?);

        for sym in matches {
            match acc.get_mut(sym) {
                Some(a) => {
                    a.count += 1;
                    a.scores.push(score);
                    a.post = unit.clone();
                }
                None => {
                    order.push(sym.to_string());
                    acc.insert(
                        sym.to_string(),
                        Accumulator {
                            count: 1,
                            scores: vec![score],
                            post: unit.clone(),
                        },
                    );
                }
            }
        }
    }

    let mut out = MentionMap::new();
    for sym in order {
        if let Some(a) = acc.remove(&sym) {
            let avg = a.scores.iter().sum::<f64>() / a.scores.len() as f64;
            out.insert(TickerMention {
                symbol: sym,
                count: a.count,
                sentiment: round2(normalize_score(avg)),
                post: a.post,
            });
        }
    }
    Ok(out)
}

// ------------------------------------------------------------
// Built-in lexicon scorer
// ------------------------------------------------------------

/// Word valences on a -4..=4 scale.
static LEXICON: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    [
        ("bullish", 2.6),
        ("bull", 1.8),
        ("moon", 2.0),
        ("mooning", 2.4),
        ("rocket", 1.8),
        ("calls", 0.8),
        ("buy", 1.2),
        ("buying", 1.2),
        ("long", 0.6),
        ("gain", 2.0),
        ("gains", 2.0),
        ("profit", 2.1),
        ("profits", 2.1),
        ("up", 0.8),
        ("beat", 1.4),
        ("strong", 2.3),
        ("growth", 1.9),
        ("good", 1.9),
        ("great", 3.1),
        ("love", 3.2),
        ("win", 2.8),
        ("winning", 2.4),
        ("rally", 2.0),
        ("soar", 2.4),
        ("soaring", 2.5),
        ("undervalued", 1.5),
        ("best", 3.2),
        ("happy", 2.7),
        ("bearish", -2.6),
        ("bear", -1.4),
        ("puts", -0.8),
        ("sell", -1.2),
        ("selling", -1.2),
        ("short", -0.6),
        ("loss", -2.3),
        ("losses", -2.3),
        ("down", -0.8),
        ("miss", -1.3),
        ("weak", -1.9),
        ("bad", -2.5),
        ("terrible", -3.1),
        ("hate", -2.7),
        ("crash", -2.8),
        ("crashing", -3.0),
        ("dump", -1.9),
        ("dumping", -2.1),
        ("bagholder", -1.7),
        ("overvalued", -1.5),
        ("fraud", -3.2),
        ("bankrupt", -3.0),
        ("bankruptcy", -3.0),
        ("recession", -2.4),
        ("worst", -3.1),
        ("fear", -2.2),
        ("panic", -2.5),
        ("scam", -2.9),
    ]
    .into_iter()
    .collect()
});

/// Same normalisation constant VADER uses for its compound score.
const COMPOUND_ALPHA: f64 = 15.0;

/// Lexicon scorer with a 3-token negation window, returning a compound score
/// `sum / sqrt(sum^2 + alpha)` in (-1, 1).
#[derive(Debug, Clone, Default)]
pub struct LexiconScorer;

impl LexiconScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn raw_sum(&self, text: &str) -> f64 {
        let tokens: Vec<String> = tokenize(text).collect();
        let mut sum = 0.0;
        for i in 0..tokens.len() {
            let Some(&base) = LEXICON.get(tokens[i].as_str()) else {
                continue;
            };
            let negated = (1..=3).any(|k| i >= k && is_negator(tokens[i - k].as_str()));
            // Negation dampens as well as flips.
            sum += if negated { -0.74 * base } else { base };
        }
        sum
    }
}

impl SentimentScorer for LexiconScorer {
    fn score(&self, text: &str) -> Result<f64, ExtractionError> {
        let sum = self.raw_sum(text);
        if sum == 0.0 {
            return Ok(0.0);
        }
        Ok((sum / (sum * sum + COMPOUND_ALPHA).sqrt()).clamp(-1.0, 1.0))
    }
}

fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn is_negator(tok: &str) -> bool {
    matches!(
        tok,
        "not"
            | "no"
            | "never"
            | "isn't"
            | "wasn't"
            | "aren't"
            | "won't"
            | "can't"
            | "cannot"
            | "don't"
            | "without"
    )
}
