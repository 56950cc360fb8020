//! Two-stage relevance retrieval.
//!
//! Stage one is an exact title match, returned alone when it hits. Stage two
//! expands the question into a lexical term set — a table of domain synonym
//! categories, falling back to the question's own tokens — and groups the
//! store's matches by document.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::models::SearchHit;
use crate::store;

/// Default hit cap for one retrieval query.
pub const DEFAULT_MAX_HITS: usize = 5;

/// Domain synonym categories. A category fires when any of its terms occurs
/// (case-insensitively) inside the question; firing contributes all of the
/// category's terms to the search set.
const TERM_CATEGORIES: &[(&str, &[&str])] = &[
    ("crossover", &["cross", "crossover", "crosses"]),
    ("signal", &["signal", "signals", "alert", "alerts"]),
    ("average", &["average", "averages", "moving", "sma", "ema"]),
    ("momentum", &["momentum", "rsi", "macd", "oscillator"]),
    ("price", &["price", "close", "open", "high", "low"]),
    ("volume", &["volume", "volumes"]),
    ("study", &["study", "studies", "indicator", "indicators"]),
    ("strategy", &["strategy", "strategies", "order", "orders"]),
    ("plot", &["plot", "plots", "chart", "declare"]),
];

/// Expand a question into lexical search terms.
///
/// Every triggered category contributes its full term list (deduplicated,
/// insertion-ordered). With no trigger the question's whitespace tokens are
/// used as-is; an empty question yields an empty set.
pub fn expand_terms(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();
    let mut terms: Vec<String> = Vec::new();

    for (_, synonyms) in TERM_CATEGORIES {
        if synonyms.iter().any(|term| lowered.contains(term)) {
            for term in *synonyms {
                if !terms.iter().any(|t| t == term) {
                    terms.push((*term).to_string());
                }
            }
        }
    }

    if terms.is_empty() {
        terms = lowered.split_whitespace().map(str::to_string).collect();
    }

    terms
}

/// Find up to `max_hits` passages relevant to the question.
///
/// An exact title match short-circuits stage two and returns the full
/// document as the single hit. Otherwise each matching document's chunks are
/// space-joined into one content blob; the hit score is the matching-chunk
/// count.
pub async fn find_relevant(
    pool: &SqlitePool,
    query: &str,
    max_hits: usize,
) -> Result<Vec<SearchHit>> {
    let query = query.trim();

    if !query.is_empty() {
        if let Some(doc) = store::exact_title_lookup(pool, query).await? {
            return Ok(vec![SearchHit {
                title: doc.title,
                content: doc.content,
                score: 1.0,
            }]);
        }
    }

    let terms = expand_terms(query);
    if terms.is_empty() {
        return Ok(Vec::new());
    }

    let groups = store::lexical_search(pool, &terms).await?;

    Ok(groups
        .into_iter()
        .take(max_hits)
        .map(|group| {
            let score = group.chunks.len() as f64;
            SearchHit {
                title: group.title,
                content: group.chunks.join(" "),
                score,
            }
        })
        .collect())
}
