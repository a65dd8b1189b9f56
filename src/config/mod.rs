//! Configuration management for graphvec
//!
//! One `Config` is loaded at process start (TOML file, then `GRAPHVEC_*`
//! environment overrides, then validation) and passed by reference into every
//! component constructor. Nothing else reads the environment for settings.

use crate::error::{GraphvecError, Result};
use crate::storage::SimilarityFunction;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod dimensions;
mod validator;

pub use dimensions::{
    model_dimensions, DimensionInputs, DimensionRegistry, DimensionSource, ResolvedDimensions,
    ValidationReport, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use validator::{ConfigValidator, MAX_BATCH_SIZE};

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub search: SearchConfig,
    pub reindex: ReindexConfig,
    pub rerank: RerankConfig,
    pub dimensions: DimensionsConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            created_at: current_timestamp(),
        }
    }
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("~/.graphvec/graph.sqlite"),
        }
    }
}

/// Which embedding backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(alias = "open-ai")]
    OpenAi,
    Voyage,
    Local,
    Mock,
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" | "open-ai" => Ok(ProviderKind::OpenAi),
            "voyage" => Ok(ProviderKind::Voyage),
            "local" => Ok(ProviderKind::Local),
            "mock" => Ok(ProviderKind::Mock),
            other => Err(format!(
                "unknown provider '{}', expected openai, voyage, local or mock",
                other
            )),
        }
    }
}

/// One extra provider in the fallback chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackProviderConfig {
    pub provider: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,
    pub model: String,
    /// Explicit embedding dimension; highest precedence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    /// Output dimension requested from providers that support shortening
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dimension: Option<usize>,
    pub api_key_env: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Voyage `input_type` ("document" or "query")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    pub fallback: Vec<FallbackProviderConfig>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: "text-embedding-3-small".to_string(),
            dimensions: None,
            output_dimension: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            input_type: None,
            fallback: Vec::new(),
            timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 500,
        }
    }
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub name: String,
    pub label: String,
    pub property: String,
    /// Explicit index dimension; inherits the embedding dimension when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    pub similarity: SimilarityFunction,
    pub settle_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: "entity_embeddings".to_string(),
            label: "Entity".to_string(),
            property: "embedding".to_string(),
            dimensions: None,
            similarity: SimilarityFunction::Cosine,
            settle_timeout_secs: 30,
            poll_interval_ms: 500,
        }
    }
}

/// Search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub hybrid: bool,
    pub rrf_k: f32,
    pub min_similarity: f32,
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            hybrid: true,
            rrf_k: 60.0,
            min_similarity: 0.5,
            default_limit: 10,
        }
    }
}

/// Reindex batch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReindexConfig {
    pub batch_size: usize,
    pub batch_delay_ms: u64,
}

impl Default for ReindexConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankProviderKind {
    Voyage,
    Local,
}

/// Reranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub enabled: bool,
    pub provider: RerankProviderKind,
    pub model: String,
    pub api_key_env: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: RerankProviderKind::Voyage,
            model: "rerank-2".to_string(),
            api_key_env: "VOYAGE_API_KEY".to_string(),
            base_url: None,
            timeout_secs: 30,
        }
    }
}

/// Dimension reconciliation policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DimensionsConfig {
    /// Refuse to start when embedding and index dimensions disagree
    pub strict: bool,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(GraphvecError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| GraphvecError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        config.finalize()?;

        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a config file
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env_overrides();
        config.finalize()?;
        Ok(config)
    }

    /// Validate settings and reconcile dimensions
    pub fn finalize(&self) -> Result<()> {
        ConfigValidator::validate(self)?;

        let report = DimensionRegistry::from_config(self).validate();
        for warning in &report.warnings {
            tracing::warn!("Dimension configuration: {}", warning);
        }
        if !report.is_valid {
            if self.dimensions.strict {
                return Err(GraphvecError::Configuration(report.errors.join("; ")));
            }
            for error in &report.errors {
                tracing::warn!("Dimension configuration (non-strict): {}", error);
            }
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: GRAPHVEC_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply `GRAPHVEC_`-prefixed key/value pairs; unparseable values are logged and skipped
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix("GRAPHVEC_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATABASE_PATH" => self.storage.database_path = PathBuf::from(value),
            "EMBEDDING__PROVIDER" => {
                self.embedding.provider =
                    value
                        .parse()
                        .map_err(|message| GraphvecError::InvalidConfigValue {
                            path: path.to_string(),
                            message,
                        })?;
            }
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__DIMENSIONS" => self.embedding.dimensions = Some(parse(path, value)?),
            "EMBEDDING__OUTPUT_DIMENSION" => {
                self.embedding.output_dimension = Some(parse(path, value)?)
            }
            "EMBEDDING__API_KEY_ENV" => self.embedding.api_key_env = value.to_string(),
            "EMBEDDING__BASE_URL" => self.embedding.base_url = Some(value.to_string()),
            "INDEX__NAME" => self.index.name = value.to_string(),
            "INDEX__DIMENSIONS" => self.index.dimensions = Some(parse(path, value)?),
            "INDEX__SIMILARITY" => {
                self.index.similarity =
                    value
                        .parse()
                        .map_err(|message| GraphvecError::InvalidConfigValue {
                            path: path.to_string(),
                            message,
                        })?;
            }
            "SEARCH__HYBRID" => self.search.hybrid = parse(path, value)?,
            "SEARCH__RRF_K" => self.search.rrf_k = parse(path, value)?,
            "SEARCH__MIN_SIMILARITY" => self.search.min_similarity = parse(path, value)?,
            "REINDEX__BATCH_SIZE" => self.reindex.batch_size = parse(path, value)?,
            "REINDEX__BATCH_DELAY_MS" => self.reindex.batch_delay_ms = parse(path, value)?,
            "RERANK__ENABLED" => self.rerank.enabled = parse(path, value)?,
            "RERANK__MODEL" => self.rerank.model = value.to_string(),
            "DIMENSIONS__STRICT" => self.dimensions.strict = parse(path, value)?,
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Database path with `~/` expanded
    pub fn database_path(&self) -> Result<PathBuf> {
        expand_path(&self.storage.database_path)
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            GraphvecError::Configuration("Cannot determine config directory".to_string())
        })?;

        Ok(config_dir.join("graphvec").join("config.toml"))
    }
}

fn parse<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| GraphvecError::InvalidConfigValue {
            path: path.to_string(),
            message: format!("Cannot parse '{}'", value),
        })
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| GraphvecError::Configuration("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| {
            GraphvecError::Configuration("Cannot determine home directory".to_string())
        })?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
