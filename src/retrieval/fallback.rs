//! Deterministic pattern search used when the index cannot answer
//!
//! Relevance is traded for always having an answer: recent entities matching
//! the query words (or a small fixed vocabulary) come first, then the most
//! recent entities fill the remaining slots.

use super::{ResultMetadata, SearchMethod, VectorSearchResult};
use crate::storage::{Entity, GraphStore, StoreError};
use ahash::AHashSet;
use regex::{Regex, RegexBuilder};

/// Score of an entity matched by the pattern
pub const PATTERN_MATCH_SCORE: f32 = 0.75;

/// Score of an entity added only because it is recent
pub const RECENCY_FILL_SCORE: f32 = 0.5;

/// Words that make an entity worth surfacing even without query overlap
const FALLBACK_VOCABULARY: &[&str] = &[
    "project",
    "person",
    "organization",
    "concept",
    "technology",
    "system",
    "service",
    "tool",
];

/// How many recent entities the pattern is matched against
const RECENT_WINDOW: usize = 200;

fn build_pattern(query_text: Option<&str>) -> Option<Regex> {
    let mut words: Vec<String> = query_text
        .unwrap_or_default()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2)
        .map(|w| regex::escape(&w.to_lowercase()))
        .collect();
    words.extend(FALLBACK_VOCABULARY.iter().map(|w| w.to_string()));

    let mut seen = AHashSet::new();
    words.retain(|w| seen.insert(w.clone()));

    RegexBuilder::new(&format!("(?:{})", words.join("|")))
        .case_insensitive(true)
        .build()
        .ok()
}

fn matches(pattern: &Regex, entity: &Entity) -> bool {
    pattern.is_match(&entity.name)
        || pattern.is_match(&entity.entity_type)
        || entity.observations.iter().any(|o| pattern.is_match(o))
}

fn fallback_result(entity: &Entity, score: f32) -> VectorSearchResult {
    VectorSearchResult {
        id: entity.name.clone(),
        similarity: score,
        metadata: ResultMetadata::new(entity.entity_type.clone(), SearchMethod::Fallback),
    }
}

/// Pattern matches at 0.75 followed by recency fill at 0.5, at most `limit`
pub fn pattern_search(
    store: &dyn GraphStore,
    query_text: Option<&str>,
    limit: usize,
) -> Result<Vec<VectorSearchResult>, StoreError> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let recent = store.recent_entities(RECENT_WINDOW.max(limit))?;
    let mut results = Vec::with_capacity(limit);
    let mut taken = AHashSet::new();

    if let Some(pattern) = build_pattern(query_text) {
        for entity in recent.iter().filter(|e| matches(&pattern, e)) {
            if results.len() == limit {
                break;
            }
            taken.insert(entity.name.as_str());
            results.push(fallback_result(entity, PATTERN_MATCH_SCORE));
        }
    }

    for entity in &recent {
        if results.len() == limit {
            break;
        }
        if taken.insert(entity.name.as_str()) {
            results.push(fallback_result(entity, RECENCY_FILL_SCORE));
        }
    }

    tracing::debug!(
        "Fallback search returned {} results for {:?}",
        results.len(),
        query_text
    );
    Ok(results)
}
