use std::path::PathBuf;
use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::reindex::{ReindexError, ReindexItemError};
use crate::retrieval::{RerankError, SearchError};
use crate::storage::StoreError;

/// Main error type for graphvec
#[derive(Error, Debug)]
pub enum GraphvecError {
    /// Mismatched or invalid dimension settings, unusable provider setup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Provider rejected the credentials. Never retried.
    #[error("Provider authentication failed: {0}")]
    ProviderAuth(String),

    /// Provider throttled the request. Retryable with backoff.
    #[error("Provider rate limit exceeded: {0}")]
    ProviderRateLimit(String),

    /// Provider 5xx or network failure. Retryable.
    #[error("Provider transient failure: {0}")]
    ProviderTransient(String),

    /// Provider failed in a way that is neither auth nor retryable
    #[error("Provider error: {0}")]
    Provider(String),

    /// Vector length does not match the configured dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Vector index exists but is not ONLINE yet
    #[error("Index '{name}' not ready (state: {state})")]
    IndexNotReady { name: String, state: String },

    /// Entity lookup failed
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// A single item in a batch failed. Batch engines record these instead of returning them.
    #[error("Processing failed for '{entity}': {message}")]
    PerItemProcessing { entity: String, message: String },

    /// Invalid reindex request
    #[error("Invalid reindex request: {0}")]
    InvalidRequest(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Search errors that are not remapped above
    #[error("Search error: {0}")]
    Search(String),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GraphvecError {
    /// Whether retrying the same operation later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GraphvecError::ProviderRateLimit(_)
                | GraphvecError::ProviderTransient(_)
                | GraphvecError::IndexNotReady { .. }
        )
    }
}

impl From<EmbeddingError> for GraphvecError {
    fn from(e: EmbeddingError) -> Self {
        match e {
            EmbeddingError::Authentication(msg) => GraphvecError::ProviderAuth(msg),
            EmbeddingError::RateLimited { .. } => GraphvecError::ProviderRateLimit(e.to_string()),
            EmbeddingError::TransientServer(msg) => GraphvecError::ProviderTransient(msg),
            EmbeddingError::DimensionMismatch { expected, actual } => {
                GraphvecError::DimensionMismatch { expected, actual }
            }
            EmbeddingError::Initialization(msg) => GraphvecError::Configuration(msg),
            other => GraphvecError::Provider(other.to_string()),
        }
    }
}

impl From<StoreError> for GraphvecError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DimensionMismatch { expected, actual } => {
                GraphvecError::DimensionMismatch { expected, actual }
            }
            StoreError::IndexNotReady { name, state } => GraphvecError::IndexNotReady {
                name,
                state: state.to_string(),
            },
            StoreError::EntityNotFound(name) => GraphvecError::EntityNotFound(name),
            other => GraphvecError::Storage(other.to_string()),
        }
    }
}

impl From<SearchError> for GraphvecError {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::DimensionMismatch { expected, actual } => {
                GraphvecError::DimensionMismatch { expected, actual }
            }
            SearchError::Embedding(inner) => inner.into(),
            SearchError::Rerank(inner) => inner.into(),
            SearchError::Store(inner) => inner.into(),
            other => GraphvecError::Search(other.to_string()),
        }
    }
}

impl From<RerankError> for GraphvecError {
    fn from(e: RerankError) -> Self {
        match e {
            RerankError::Authentication(msg) => GraphvecError::ProviderAuth(msg),
            RerankError::RateLimited(msg) => GraphvecError::ProviderRateLimit(msg),
            RerankError::Server(msg) => GraphvecError::ProviderTransient(msg),
            other => GraphvecError::Provider(other.to_string()),
        }
    }
}

impl From<ReindexError> for GraphvecError {
    fn from(e: ReindexError) -> Self {
        match e {
            ReindexError::Store(inner) => inner.into(),
            other => GraphvecError::InvalidRequest(other.to_string()),
        }
    }
}

impl From<ReindexItemError> for GraphvecError {
    fn from(e: ReindexItemError) -> Self {
        GraphvecError::PerItemProcessing {
            entity: e.entity_name,
            message: e.error,
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for graphvec operations
pub type Result<T> = std::result::Result<T, GraphvecError>;
