//! Embedding consistency analysis
//!
//! Compares what is stored against the dimension the active index expects.
//! Samples are capped so reports stay bounded on large graphs; when a cap
//! drops entries the matching `*_truncated` flag is set.

use crate::storage::{EntitySample, GraphStore, IndexState, StoreError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Most mismatched entities listed in one report
pub const MISMATCH_SAMPLE_LIMIT: usize = 1000;

/// Most entities without an embedding listed in one report
pub const MISSING_SAMPLE_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsistencyStatus {
    Consistent,
    Inconsistent,
    NoEmbeddings,
}

impl std::fmt::Display for ConsistencyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsistencyStatus::Consistent => write!(f, "consistent"),
            ConsistencyStatus::Inconsistent => write!(f, "inconsistent"),
            ConsistencyStatus::NoEmbeddings => write!(f, "no-embeddings"),
        }
    }
}

/// An entity whose embedding is missing or has the wrong length
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionMismatch {
    pub entity_name: String,
    pub entity_type: String,
    /// 0 when there is no embedding
    pub current_dimensions: usize,
    pub expected_dimensions: usize,
    pub has_embedding: bool,
}

impl DimensionMismatch {
    fn from_sample(sample: EntitySample, expected: usize) -> Self {
        Self {
            has_embedding: sample.dimensions > 0,
            current_dimensions: sample.dimensions,
            entity_name: sample.name,
            entity_type: sample.entity_type,
            expected_dimensions: expected,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingStateSummary {
    pub total_entities: usize,
    pub entities_with_embeddings: usize,
    pub entities_without_embeddings: usize,
    /// Vector length -> number of entities
    pub dimension_counts: BTreeMap<usize, usize>,
    pub mismatches: Vec<DimensionMismatch>,
    pub mismatches_truncated: bool,
    pub missing_truncated: bool,
    pub consistency_status: ConsistencyStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexValidation {
    pub exists: bool,
    pub is_online: bool,
    pub state: Option<IndexState>,
    pub actual_dimensions: Option<usize>,
    pub is_valid: bool,
    pub message: String,
}

pub struct ConsistencyAnalyzer {
    store: Arc<dyn GraphStore>,
}

impl ConsistencyAnalyzer {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub fn analyze_embedding_state(
        &self,
        expected_dimensions: usize,
    ) -> Result<EmbeddingStateSummary, StoreError> {
        let total_entities = self.store.count_entities()?;
        let entities_with_embeddings = self.store.count_with_embeddings()?;
        let entities_without_embeddings = total_entities.saturating_sub(entities_with_embeddings);
        let dimension_counts = self.store.dimension_histogram()?;

        let mismatched_total = self.store.count_mismatched(expected_dimensions)?;
        let mut mismatches: Vec<DimensionMismatch> = self
            .store
            .sample_mismatched(expected_dimensions, MISMATCH_SAMPLE_LIMIT)?
            .into_iter()
            .map(|s| DimensionMismatch::from_sample(s, expected_dimensions))
            .collect();
        mismatches.extend(
            self.store
                .sample_missing(MISSING_SAMPLE_LIMIT)?
                .into_iter()
                .map(|s| DimensionMismatch::from_sample(s, expected_dimensions)),
        );

        let consistency_status = if entities_with_embeddings == 0 {
            ConsistencyStatus::NoEmbeddings
        } else if !mismatches.is_empty() {
            ConsistencyStatus::Inconsistent
        } else {
            ConsistencyStatus::Consistent
        };

        let summary = EmbeddingStateSummary {
            total_entities,
            entities_with_embeddings,
            entities_without_embeddings,
            dimension_counts,
            mismatches,
            mismatches_truncated: mismatched_total > MISMATCH_SAMPLE_LIMIT,
            missing_truncated: entities_without_embeddings > MISSING_SAMPLE_LIMIT,
            consistency_status,
        };

        tracing::info!(
            total = summary.total_entities,
            with_embeddings = summary.entities_with_embeddings,
            mismatched = mismatched_total,
            status = %summary.consistency_status,
            "Analyzed embedding state against {} dimensions",
            expected_dimensions
        );

        Ok(summary)
    }

    /// Check that a named index exists, is online and has the expected size.
    /// Each failure mode gets its own message.
    pub fn validate_index_definition(
        &self,
        index_name: &str,
        expected_dimensions: usize,
    ) -> Result<IndexValidation, StoreError> {
        let Some(info) = self.store.vector_index(index_name)? else {
            return Ok(IndexValidation {
                exists: false,
                is_online: false,
                state: None,
                actual_dimensions: None,
                is_valid: false,
                message: format!("Vector index '{}' does not exist", index_name),
            });
        };

        let actual = info.definition.dimensions;
        let is_online = info.state == IndexState::Online;

        let (is_valid, message) = if !is_online {
            (
                false,
                format!(
                    "Vector index '{}' is {} and not yet usable",
                    index_name, info.state
                ),
            )
        } else if actual != expected_dimensions {
            (
                false,
                format!(
                    "Vector index '{}' has {} dimensions but {} are expected",
                    index_name, actual, expected_dimensions
                ),
            )
        } else {
            (
                true,
                format!(
                    "Vector index '{}' is online with {} dimensions",
                    index_name, actual
                ),
            )
        };

        Ok(IndexValidation {
            exists: true,
            is_online,
            state: Some(info.state),
            actual_dimensions: Some(actual),
            is_valid,
            message,
        })
    }

    /// Mismatched entities first, then those without embeddings
    pub fn list_entities_needing_embeddings(
        &self,
        expected_dimensions: usize,
        limit: usize,
    ) -> Result<Vec<DimensionMismatch>, StoreError> {
        let mut needing: Vec<DimensionMismatch> = self
            .store
            .sample_mismatched(expected_dimensions, limit)?
            .into_iter()
            .map(|s| DimensionMismatch::from_sample(s, expected_dimensions))
            .collect();

        let remaining = limit.saturating_sub(needing.len());
        if remaining > 0 {
            needing.extend(
                self.store
                    .sample_missing(remaining)?
                    .into_iter()
                    .map(|s| DimensionMismatch::from_sample(s, expected_dimensions)),
            );
        }
        Ok(needing)
    }
}
