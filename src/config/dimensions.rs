//! Effective embedding and index dimensions
//!
//! Both numbers are derived from the loaded `Config` on every start; neither
//! is persisted. The index dimension inherits the resolved embedding
//! dimension unless explicitly overridden, so a model change cannot leave a
//! stale hardcoded index size behind.

use super::Config;
use serde::Serialize;

/// Used when the model name is not in the table and nothing is overridden
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;

/// Native output size of known models
const MODEL_DIMENSIONS: &[(&str, usize)] = &[
    ("text-embedding-3-small", 1536),
    ("text-embedding-3-large", 3072),
    ("text-embedding-ada-002", 1536),
    ("voyage-3", 1024),
    ("voyage-3-lite", 512),
    ("voyage-3-large", 1024),
    ("voyage-3.5", 1024),
    ("voyage-3.5-lite", 1024),
    ("voyage-code-3", 1024),
    ("voyage-large-2", 1536),
    ("voyage-2", 1024),
    ("all-MiniLM-L6-v2", 384),
    ("all-minilm-l6-v2", 384),
    ("bge-small-en-v1.5", 384),
    ("bge-base-en-v1.5", 768),
    ("nomic-embed-text", 768),
];

/// Look up a model's native dimension
pub fn model_dimensions(model: &str) -> Option<usize> {
    MODEL_DIMENSIONS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, dims)| *dims)
}

/// Raw knobs the registry reconciles
#[derive(Debug, Clone, Default)]
pub struct DimensionInputs {
    pub model: String,
    pub embedding_dimensions: Option<usize>,
    pub output_dimension: Option<usize>,
    pub index_dimensions: Option<usize>,
}

/// Where a resolved number came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DimensionSource {
    ExplicitOverride,
    OutputDimension,
    ModelInference,
    Default,
    InheritedFromEmbedding,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedDimensions {
    pub embedding_dimensions: usize,
    pub embedding_source: DimensionSource,
    pub index_dimensions: usize,
    pub index_source: DimensionSource,
    pub model: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

pub struct DimensionRegistry {
    inputs: DimensionInputs,
}

impl DimensionRegistry {
    pub fn new(inputs: DimensionInputs) -> Self {
        Self { inputs }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(DimensionInputs {
            model: config.embedding.model.clone(),
            embedding_dimensions: config.embedding.dimensions,
            output_dimension: config.embedding.output_dimension,
            index_dimensions: config.index.dimensions,
        })
    }

    pub fn resolve(&self) -> ResolvedDimensions {
        let inputs = &self.inputs;

        let (embedding_dimensions, embedding_source) =
            if let Some(dims) = inputs.embedding_dimensions {
                (dims, DimensionSource::ExplicitOverride)
            } else if let Some(dims) = inputs.output_dimension {
                (dims, DimensionSource::OutputDimension)
            } else if let Some(dims) = model_dimensions(&inputs.model) {
                (dims, DimensionSource::ModelInference)
            } else {
                (DEFAULT_EMBEDDING_DIMENSIONS, DimensionSource::Default)
            };

        let (index_dimensions, index_source) = match inputs.index_dimensions {
            Some(dims) => (dims, DimensionSource::ExplicitOverride),
            None => (embedding_dimensions, DimensionSource::InheritedFromEmbedding),
        };

        ResolvedDimensions {
            embedding_dimensions,
            embedding_source,
            index_dimensions,
            index_source,
            model: inputs.model.clone(),
        }
    }

    pub fn validate(&self) -> ValidationReport {
        let inputs = &self.inputs;
        let resolved = self.resolve();
        let mut report = ValidationReport::default();
        let native = model_dimensions(&inputs.model);

        if native.is_none() {
            if resolved.embedding_source == DimensionSource::Default {
                report.warnings.push(format!(
                    "Unknown model '{}'; assuming default dimension {}",
                    inputs.model, DEFAULT_EMBEDDING_DIMENSIONS
                ));
            } else {
                report.warnings.push(format!(
                    "Unknown model '{}'; relying on configured dimension {}",
                    inputs.model, resolved.embedding_dimensions
                ));
            }
        }

        // Conflicting knobs are reported even when precedence ignores one of them
        if let (Some(explicit), Some(output)) = (inputs.embedding_dimensions, inputs.output_dimension)
        {
            if explicit != output {
                report.warnings.push(format!(
                    "embedding.dimensions ({}) conflicts with embedding.output_dimension ({}); using {}",
                    explicit, output, explicit
                ));
            }
        }

        if let (Some(native), DimensionSource::ExplicitOverride | DimensionSource::OutputDimension) =
            (native, resolved.embedding_source)
        {
            if native != resolved.embedding_dimensions {
                report.warnings.push(format!(
                    "Model '{}' natively produces {} dimensions but {} is configured; the provider must support shortened output",
                    inputs.model, native, resolved.embedding_dimensions
                ));
            }
        }

        if resolved.embedding_dimensions == 0 {
            report
                .errors
                .push("Embedding dimension must be greater than 0".to_string());
        }
        if resolved.index_dimensions == 0 {
            report
                .errors
                .push("Index dimension must be greater than 0".to_string());
        }

        if resolved.embedding_dimensions != resolved.index_dimensions {
            report.errors.push(format!(
                "Embedding dimension {} ({:?}) does not match index dimension {} ({:?})",
                resolved.embedding_dimensions,
                resolved.embedding_source,
                resolved.index_dimensions,
                resolved.index_source
            ));
        }

        report.is_valid = report.errors.is_empty();
        report
    }
}
