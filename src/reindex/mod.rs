//! Batch regeneration of entity embeddings
//!
//! A run snapshots the matching entity names, then walks them in fixed-size
//! batches. One failing entity is recorded and never aborts the run.

mod engine;

pub use engine::{ClearMatchingOutcome, ReindexEngine};

use crate::config::{ReindexConfig, MAX_BATCH_SIZE};
use crate::storage::{Entity, EntitySelection, StoreError};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Most per-entity errors kept in a result
pub const MAX_RECORDED_ERRORS: usize = 100;

#[derive(Error, Debug)]
pub enum ReindexError {
    #[error("Batch size must be between 1 and {max}, got {actual}")]
    InvalidBatchSize { actual: usize, max: usize },

    #[error("Entity type filter is present but empty")]
    EmptyEntityTypes,

    #[error("Invalid name pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("Invalid custom query: {0}")]
    InvalidCustomQuery(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Which entities a run touches
#[derive(Debug, Clone, Default)]
pub struct ReindexFilter {
    pub entity_types: Option<Vec<String>>,
    /// Regex over entity names
    pub name_pattern: Option<String>,
    pub only_missing: bool,
    /// Regenerate even when the stored embedding already fits the provider
    pub force: bool,
    pub limit: Option<usize>,
    /// Single read-only SELECT returning entity names; replaces the other
    /// selection criteria except `limit`
    pub custom_query: Option<String>,
}

impl ReindexFilter {
    /// Check the filter and turn it into a store selection
    pub fn to_selection(&self) -> Result<EntitySelection, ReindexError> {
        if matches!(&self.entity_types, Some(types) if types.is_empty()) {
            return Err(ReindexError::EmptyEntityTypes);
        }

        let name_pattern = self
            .name_pattern
            .as_deref()
            .map(|pattern| {
                regex::Regex::new(pattern).map_err(|source| ReindexError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .transpose()?;

        if let Some(query) = &self.custom_query {
            validate_custom_query(query)?;
        }

        Ok(EntitySelection {
            entity_types: self.entity_types.clone(),
            name_pattern,
            only_missing: self.only_missing,
            custom_query: self.custom_query.clone(),
            limit: self.limit,
        })
    }
}

fn validate_custom_query(query: &str) -> Result<(), ReindexError> {
    let trimmed = query.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(ReindexError::InvalidCustomQuery("query is empty".to_string()));
    }
    let head = trimmed.split_whitespace().next().unwrap_or_default();
    if !head.eq_ignore_ascii_case("select") {
        return Err(ReindexError::InvalidCustomQuery(
            "query must be a SELECT returning entity names".to_string(),
        ));
    }
    if trimmed.contains(';') {
        return Err(ReindexError::InvalidCustomQuery(
            "query must be a single statement".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ReindexOptions {
    pub batch_size: usize,
    /// Pause between batches, skipped after the last one
    pub batch_delay: Duration,
    pub dry_run: bool,
    /// With `force`, skip entities re-embedded since the last bulk clear
    pub resume_after_clear: bool,
}

impl Default for ReindexOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay: Duration::from_millis(1000),
            dry_run: false,
            resume_after_clear: false,
        }
    }
}

impl ReindexOptions {
    pub fn from_config(config: &ReindexConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            batch_delay: Duration::from_millis(config.batch_delay_ms),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ReindexError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(ReindexError::InvalidBatchSize {
                actual: self.batch_size,
                max: MAX_BATCH_SIZE,
            });
        }
        Ok(())
    }
}

/// Emitted after every entity
#[derive(Debug, Clone, Serialize)]
pub struct ReindexProgress {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub percentage: f64,
    /// 1-based
    pub current_batch: usize,
    pub total_batches: usize,
    /// Running average time per entity times the entities left
    pub estimated_time_remaining: Option<Duration>,
    pub current_entity: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReindexItemError {
    pub entity_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReindexResult {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<ReindexItemError>,
    pub errors_truncated: bool,
    pub duration: Duration,
    pub dry_run: bool,
    pub cancelled: bool,
}

/// Text sent to the provider for an entity. Changing the layout invalidates
/// every stored embedding.
pub fn embedding_text(entity: &Entity) -> String {
    let head = format!("{} ({})", entity.name, entity.entity_type);
    if entity.observations.is_empty() {
        head
    } else {
        format!("{}: {}.", head, entity.observations.join(". "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn entity(observations: Vec<&str>) -> Entity {
        Entity {
            id: Uuid::new_v4(),
            name: "Ada Lovelace".into(),
            entity_type: "person".into(),
            observations: observations.into_iter().map(String::from).collect(),
            embedding: None,
            embedding_model: None,
            embedding_dimensions: None,
            embedding_updated: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_embedding_text_layout() {
        assert_eq!(
            embedding_text(&entity(vec!["Wrote the first program", "Worked with Babbage"])),
            "Ada Lovelace (person): Wrote the first program. Worked with Babbage."
        );
        assert_eq!(embedding_text(&entity(vec![])), "Ada Lovelace (person)");
    }

    #[test]
    fn test_filter_validation() {
        let empty_types = ReindexFilter {
            entity_types: Some(vec![]),
            ..Default::default()
        };
        assert!(matches!(
            empty_types.to_selection(),
            Err(ReindexError::EmptyEntityTypes)
        ));

        let bad_regex = ReindexFilter {
            name_pattern: Some("(".into()),
            ..Default::default()
        };
        assert!(matches!(
            bad_regex.to_selection(),
            Err(ReindexError::InvalidPattern { .. })
        ));

        for query in ["", "UPDATE entities SET name = 'x'", "SELECT 1; SELECT 2"] {
            let filter = ReindexFilter {
                custom_query: Some(query.into()),
                ..Default::default()
            };
            assert!(
                matches!(filter.to_selection(), Err(ReindexError::InvalidCustomQuery(_))),
                "{:?}",
                query
            );
        }

        let ok = ReindexFilter {
            custom_query: Some("select name from entities;".into()),
            ..Default::default()
        };
        assert!(ok.to_selection().is_ok());
    }

    #[test]
    fn test_batch_size_bounds() {
        let mut options = ReindexOptions::default();
        assert!(options.validate().is_ok());
        options.batch_size = 0;
        assert!(options.validate().is_err());
        options.batch_size = MAX_BATCH_SIZE + 1;
        assert!(options.validate().is_err());
    }
}
