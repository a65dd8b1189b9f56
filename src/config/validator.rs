use crate::config::{Config, ProviderKind, RerankProviderKind, SCHEMA_VERSION};
use crate::error::{GraphvecError, Result, ValidationError};

/// Upper bound for a reindex batch
pub const MAX_BATCH_SIZE: usize = 1000;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_index(config, &mut errors);
        Self::validate_search(config, &mut errors);
        Self::validate_reindex(config, &mut errors);
        Self::validate_rerank(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(GraphvecError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.database_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.database_path",
                "Database path cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let embedding = &config.embedding;

        if embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if matches!(embedding.provider, ProviderKind::OpenAi | ProviderKind::Voyage)
            && embedding.api_key_env.is_empty()
        {
            errors.push(ValidationError::new(
                "embedding.api_key_env",
                "Remote providers need an API key environment variable name",
            ));
        }

        if embedding.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "embedding.timeout_secs",
                "Timeout must be greater than 0",
            ));
        }

        if let Some(input_type) = &embedding.input_type {
            if input_type != "document" && input_type != "query" {
                errors.push(ValidationError::new(
                    "embedding.input_type",
                    format!("Input type must be 'document' or 'query', got '{}'", input_type),
                ));
            }
        }

        for (i, fallback) in embedding.fallback.iter().enumerate() {
            if fallback.model.is_empty() {
                errors.push(ValidationError::new(
                    format!("embedding.fallback[{}].model", i),
                    "Model name cannot be empty",
                ));
            }
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        let index = &config.index;

        let is_identifier =
            |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

        if !is_identifier(&index.name) {
            errors.push(ValidationError::new(
                "index.name",
                format!("Index name must be a non-empty identifier, got '{}'", index.name),
            ));
        }
        if index.label.is_empty() {
            errors.push(ValidationError::new("index.label", "Label cannot be empty"));
        }
        if index.property.is_empty() {
            errors.push(ValidationError::new(
                "index.property",
                "Property cannot be empty",
            ));
        }
        if index.poll_interval_ms == 0 {
            errors.push(ValidationError::new(
                "index.poll_interval_ms",
                "Poll interval must be greater than 0",
            ));
        }
    }

    fn validate_search(config: &Config, errors: &mut Vec<ValidationError>) {
        let search = &config.search;

        if !(search.rrf_k.is_finite() && search.rrf_k > 0.0) {
            errors.push(ValidationError::new(
                "search.rrf_k",
                format!("RRF constant must be positive, got {}", search.rrf_k),
            ));
        }
        if !(-1.0..=1.0).contains(&search.min_similarity) {
            errors.push(ValidationError::new(
                "search.min_similarity",
                format!(
                    "Minimum similarity must be between -1.0 and 1.0, got {}",
                    search.min_similarity
                ),
            ));
        }
        if search.default_limit == 0 {
            errors.push(ValidationError::new(
                "search.default_limit",
                "Default limit must be greater than 0",
            ));
        }
    }

    fn validate_reindex(config: &Config, errors: &mut Vec<ValidationError>) {
        let size = config.reindex.batch_size;
        if size == 0 || size > MAX_BATCH_SIZE {
            errors.push(ValidationError::new(
                "reindex.batch_size",
                format!("Batch size must be between 1 and {}, got {}", MAX_BATCH_SIZE, size),
            ));
        }
    }

    fn validate_rerank(config: &Config, errors: &mut Vec<ValidationError>) {
        let rerank = &config.rerank;
        if !rerank.enabled {
            return;
        }

        if rerank.model.is_empty() {
            errors.push(ValidationError::new("rerank.model", "Model cannot be empty"));
        }

        // If reranking is enabled, the API key must actually be present
        if rerank.provider == RerankProviderKind::Voyage {
            let env_var = &rerank.api_key_env;
            match std::env::var(env_var) {
                Ok(key) if !key.is_empty() => {}
                Ok(_) => errors.push(ValidationError::new(
                    "rerank.api_key_env",
                    format!("Environment variable {} is empty", env_var),
                )),
                Err(_) => errors.push(ValidationError::new(
                    "rerank.api_key_env",
                    format!("Environment variable {} is not set", env_var),
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_batch_size_bounds() {
        let mut config = Config::default();
        config.reindex.batch_size = 0;
        assert!(ConfigValidator::validate(&config).is_err());

        config.reindex.batch_size = MAX_BATCH_SIZE + 1;
        assert!(ConfigValidator::validate(&config).is_err());

        config.reindex.batch_size = MAX_BATCH_SIZE;
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_rrf_k() {
        let mut config = Config::default();
        config.search.rrf_k = 0.0;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_index_name_must_be_identifier() {
        let mut config = Config::default();
        config.index.name = "bad name; DROP".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = Config::default();
        config.embedding.model = String::new();
        config.search.default_limit = 0;
        match ConfigValidator::validate(&config) {
            Err(GraphvecError::ConfigValidation { errors }) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation errors, got {:?}", other),
        }
    }
}
