//! Storage layer for graphvec
//!
//! `GraphStore` is the boundary to the property graph holding entities, their
//! embeddings and the named vector indexes. Every mutation is a single-row
//! upsert; there is no cross-entity transaction and no global lock.
//! `SqliteGraphStore` is the bundled backend.

pub mod database;
pub mod similarity;

pub use database::{DbPool, DbStats, SqliteGraphStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Entity already exists: {0}")]
    EntityExists(String),

    #[error("Vector index not found: {0}")]
    IndexNotFound(String),

    #[error("Vector index already exists: {0}")]
    IndexExists(String),

    #[error("Invalid vector index definition: {0}")]
    InvalidIndex(String),

    #[error("Vector index '{name}' is not online (state: {state})")]
    IndexNotReady { name: String, state: IndexState },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Entity '{entity}' has a {actual}-dimension embedding in a {expected}-dimension index")]
    StoredDimensionMismatch {
        entity: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Knowledge graph entity as seen by the embedding subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub name: String,
    pub entity_type: String,
    pub observations: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub embedding_dimensions: Option<usize>,
    pub embedding_updated: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Entity {
    /// Length of the stored vector, 0 when there is none
    pub fn embedding_len(&self) -> usize {
        self.embedding.as_ref().map_or(0, |v| v.len())
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }
}

/// Minimal seed record
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub name: String,
    pub entity_type: String,
    pub observations: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl NewEntity {
    pub fn new(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        observations: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            observations,
            created_at: None,
        }
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }
}

/// Vector plus provenance, written wholesale
#[derive(Debug, Clone)]
pub struct StoredEmbedding {
    pub vector: Vec<f32>,
    pub model: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityFunction {
    Cosine,
    Euclidean,
}

impl std::fmt::Display for SimilarityFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimilarityFunction::Cosine => write!(f, "cosine"),
            SimilarityFunction::Euclidean => write!(f, "euclidean"),
        }
    }
}

impl std::str::FromStr for SimilarityFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(SimilarityFunction::Cosine),
            "euclidean" => Ok(SimilarityFunction::Euclidean),
            other => Err(format!(
                "unknown similarity function '{}', expected cosine or euclidean",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexState {
    Populating,
    Online,
    Failed,
}

impl std::fmt::Display for IndexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexState::Populating => write!(f, "POPULATING"),
            IndexState::Online => write!(f, "ONLINE"),
            IndexState::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for IndexState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "POPULATING" => Ok(IndexState::Populating),
            "ONLINE" => Ok(IndexState::Online),
            "FAILED" => Ok(IndexState::Failed),
            other => Err(format!("unknown index state '{}'", other)),
        }
    }
}

/// Parameters for creating a named vector index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub label: String,
    pub property: String,
    pub dimensions: usize,
    pub similarity: SimilarityFunction,
}

impl IndexDefinition {
    pub fn from_config(config: &crate::config::IndexConfig, dimensions: usize) -> Self {
        Self {
            name: config.name.clone(),
            label: config.label.clone(),
            property: config.property.clone(),
            dimensions,
            similarity: config.similarity,
        }
    }
}

/// Index introspection result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub definition: IndexDefinition,
    pub state: IndexState,
}

/// Which entities a reindex or clear touches
#[derive(Debug, Clone, Default)]
pub struct EntitySelection {
    pub entity_types: Option<Vec<String>>,
    /// Regex over the entity name
    pub name_pattern: Option<regex::Regex>,
    pub only_missing: bool,
    /// Read-only SELECT whose first column is the entity name
    pub custom_query: Option<String>,
    pub limit: Option<usize>,
}

/// Which embeddings a clear removes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearScope {
    All,
    /// Embeddings whose length differs from the target
    Mismatched(usize),
    Names(Vec<String>),
}

/// Lightweight entity reference used in analyzer samples
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitySample {
    pub name: String,
    pub entity_type: String,
    /// 0 when there is no embedding
    pub dimensions: usize,
}

#[derive(Debug, Clone)]
pub struct ScoredEntity {
    pub entity: Entity,
    pub score: f32,
}

/// Boundary to the property graph
///
/// Selection order is `created_at DESC` with insertion order as tie-break, so
/// repeated runs see entities in the same sequence.
pub trait GraphStore: Send + Sync {
    /// Seed an entity; entity CRUD beyond this lives outside the crate
    fn insert_entity(&self, entity: &NewEntity) -> Result<Entity, StoreError>;

    fn get_entity(&self, name: &str) -> Result<Option<Entity>, StoreError>;

    /// Fetch by name, in the order given; unknown names are skipped
    fn get_entities(&self, names: &[String]) -> Result<Vec<Entity>, StoreError>;

    fn count_entities(&self) -> Result<usize, StoreError>;

    fn count_with_embeddings(&self) -> Result<usize, StoreError>;

    /// Vector length -> number of entities
    fn dimension_histogram(&self) -> Result<BTreeMap<usize, usize>, StoreError>;

    fn sample_mismatched(
        &self,
        expected: usize,
        limit: usize,
    ) -> Result<Vec<EntitySample>, StoreError>;

    fn count_mismatched(&self, expected: usize) -> Result<usize, StoreError>;

    fn sample_missing(&self, limit: usize) -> Result<Vec<EntitySample>, StoreError>;

    fn select_entity_names(&self, selection: &EntitySelection) -> Result<Vec<String>, StoreError>;

    fn set_embedding(&self, name: &str, embedding: &StoredEmbedding) -> Result<(), StoreError>;

    /// Set embeddings in scope to NULL and record the clear time
    fn clear_embeddings(&self, scope: &ClearScope) -> Result<usize, StoreError>;

    fn count_clearable(&self, scope: &ClearScope) -> Result<usize, StoreError>;

    /// Copy every present embedding into the shadow field
    fn backup_embeddings(&self) -> Result<usize, StoreError>;

    /// Copy shadows back to the live field and delete them
    fn restore_embeddings(&self) -> Result<usize, StoreError>;

    fn count_backups(&self) -> Result<usize, StoreError>;

    fn last_clear_at(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    fn vector_index(&self, name: &str) -> Result<Option<IndexInfo>, StoreError>;

    fn create_vector_index(&self, definition: &IndexDefinition) -> Result<(), StoreError>;

    /// Returns whether an index was dropped
    fn drop_vector_index(&self, name: &str) -> Result<bool, StoreError>;

    /// Top-k by the index's similarity function, best first
    fn nearest(
        &self,
        index_name: &str,
        k: usize,
        query: &[f32],
    ) -> Result<Vec<ScoredEntity>, StoreError>;

    /// Visit, most recent first, every entity whose name or one of whose
    /// observations contains `text` under Unicode lower-casing
    fn scan_keyword_matches(
        &self,
        text: &str,
        visit: &mut dyn FnMut(Entity),
    ) -> Result<(), StoreError>;

    fn recent_entities(&self, limit: usize) -> Result<Vec<Entity>, StoreError>;
}

/// Substring test after full Unicode lower-casing of `haystack`.
/// `needle` must already be lower-cased.
pub fn contains_folded(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}
