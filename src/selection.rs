//! # Cross-Source Selection
//! Pure, deterministic merge of per-source category lists into one top
//! stock, one worst stock and an ordered list of rising stocks.
//!
//! Every direction runs the same three-step filter:
//! 1) per source, keep only the entries tied for that source's extremum
//!    (head of the list for top/rising, tail for worst);
//! 2) across sources, keep only the symbols that reappear in the most
//!    sources' extremum sets;
//! 3) pick by within-source mention count.
//!
//! Step 3 ties on `count` go to the earliest candidate in pool order, and
//! the pool is built in the order the source results are passed in.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::classify::SourceCategoryResult;
use crate::mentions::TickerMention;

pub const DEFAULT_RISING_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extremum {
    Head,
    Tail,
}

/// Output of one selection run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Selection {
    pub top_stock: Option<TickerMention>,
    pub worst_stock: Option<TickerMention>,
    pub rising_stocks: Vec<TickerMention>,
}

/// Step 1: candidates tied with each source's own extremum.
fn extremum_pool<'a, F>(
    results: &'a [SourceCategoryResult],
    list: F,
    side: Extremum,
) -> Vec<&'a TickerMention>
where
    F: Fn(&'a SourceCategoryResult) -> &'a [TickerMention],
{
    let mut pool = Vec::new();
    for r in results {
        let stocks = list(r);
        let edge = match side {
            Extremum::Head => stocks.first(),
            Extremum::Tail => stocks.last(),
        };
        let Some(edge) = edge else {
            continue;
        };
        let target = edge.sentiment;
        pool.extend(stocks.iter().filter(|m| m.sentiment == target));
    }
    pool
}

/// Step 2: keep entries whose symbol appears in the most extremum sets.
fn most_reappearing<'a>(pool: Vec<&'a TickerMention>) -> Vec<&'a TickerMention> {
    let mut appearances: HashMap<&'a str, usize> = HashMap::new();
    for &m in &pool {
        *appearances.entry(m.symbol.as_str()).or_insert(0) += 1;
    }
    let Some(&max) = appearances.values().max() else {
        return Vec::new();
    };
    pool.into_iter()
        .filter(|m| appearances[m.symbol.as_str()] == max)
        .collect()
}

/// Step 3 (single winner): highest count, earliest on ties.
fn highest_count<'a>(candidates: &[&'a TickerMention]) -> Option<&'a TickerMention> {
    let mut best: Option<&TickerMention> = None;
    for &c in candidates {
        match best {
            Some(b) if c.count <= b.count => {}
            _ => best = Some(c),
        }
    }
    best
}

fn pick_one<'a, F>(results: &'a [SourceCategoryResult], list: F, side: Extremum) -> Option<TickerMention>
where
    F: Fn(&'a SourceCategoryResult) -> &'a [TickerMention],
{
    let survivors = most_reappearing(extremum_pool(results, list, side));
    highest_count(&survivors).cloned()
}

pub fn select_top(results: &[SourceCategoryResult]) -> Option<TickerMention> {
    pick_one(results, |r| r.top_stocks.as_slice(), Extremum::Head)
}

pub fn select_worst(results: &[SourceCategoryResult]) -> Option<TickerMention> {
    pick_one(results, |r| r.worst_stocks.as_slice(), Extremum::Tail)
}

/// Up to `limit` rising stocks, highest count first. Equal counts keep pool
/// order.
pub fn select_rising(results: &[SourceCategoryResult], limit: usize) -> Vec<TickerMention> {
    let mut survivors = most_reappearing(extremum_pool(
        results,
        |r| r.rising_stocks.as_slice(),
        Extremum::Head,
    ));
    survivors.sort_by(|a, b| b.count.cmp(&a.count));
    survivors.into_iter().take(limit).cloned().collect()
}

pub fn select(results: &[SourceCategoryResult], rising_limit: usize) -> Selection {
    Selection {
        top_stock: select_top(results),
        worst_stock: select_worst(results),
        rising_stocks: select_rising(results, rising_limit),
    }
}
