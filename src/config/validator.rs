use crate::config::{Config, SCHEMA_VERSION};
use crate::embedding::MIN_WRITER_HEAP_BYTES;
use crate::error::{RagError, Result, ValidationError};

const BACKENDS: [&str; 4] = ["auto", "ollama", "lmstudio", "local"];

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem found
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_embedding(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RagError::ConfigValidation { errors })
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
        if config.storage.transcript_file.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.transcript_file",
                "Transcript file path cannot be empty",
            ));
        }

        if config.storage.index_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.index_dir",
                "Index directory cannot be empty",
            ));
        }

        let table = &config.storage.table_name;
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            errors.push(ValidationError::new(
                "storage.table_name",
                format!("Table name must be non-empty [A-Za-z0-9_], got '{}'", table),
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        let chunking = &config.chunking;

        if !chunking.window_seconds.is_finite() || chunking.window_seconds <= 0.0 {
            errors.push(ValidationError::new(
                "chunking.window_seconds",
                "Window must be a positive number of seconds",
            ));
        }

        if !chunking.overlap_seconds.is_finite() || chunking.overlap_seconds < 0.0 {
            errors.push(ValidationError::new(
                "chunking.overlap_seconds",
                "Overlap cannot be negative",
            ));
        }

        if chunking.overlap_seconds >= chunking.window_seconds {
            errors.push(ValidationError::new(
                "chunking.overlap_seconds",
                format!(
                    "Overlap ({}) must be less than window ({})",
                    chunking.overlap_seconds, chunking.window_seconds
                ),
            ));
        }

        if chunking.embed_char_limit == 0 {
            errors.push(ValidationError::new(
                "chunking.embed_char_limit",
                "Embed char limit must be greater than 0",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        let indexing = &config.indexing;

        if indexing.max_attempts == 0 {
            errors.push(ValidationError::new(
                "indexing.max_attempts",
                "At least one attempt is required",
            ));
        }

        if indexing.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }

        if indexing.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if indexing.hnsw_ef_search == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_search",
                "HNSW ef_search must be greater than 0",
            ));
        }

        if indexing.keyword_writer_heap_bytes < MIN_WRITER_HEAP_BYTES {
            errors.push(ValidationError::new(
                "indexing.keyword_writer_heap_bytes",
                format!(
                    "Keyword writer heap must be at least {} bytes",
                    MIN_WRITER_HEAP_BYTES
                ),
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if retrieval.vector_candidate_multiplier == 0 {
            errors.push(ValidationError::new(
                "retrieval.vector_candidate_multiplier",
                "Multiplier must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&retrieval.min_vector_score) {
            errors.push(ValidationError::new(
                "retrieval.min_vector_score",
                format!(
                    "Score floor must be between 0.0 and 1.0, got {}",
                    retrieval.min_vector_score
                ),
            ));
        }

        if retrieval.keyword_boost < 1.0 {
            errors.push(ValidationError::new(
                "retrieval.keyword_boost",
                "Boost must be at least 1.0",
            ));
        }

        if !(0.0..=1.0).contains(&retrieval.keyword_only_score) {
            errors.push(ValidationError::new(
                "retrieval.keyword_only_score",
                "Keyword-only score must be between 0.0 and 1.0",
            ));
        }

        if !(0.0..=1.0).contains(&retrieval.max_overlap_ratio) {
            errors.push(ValidationError::new(
                "retrieval.max_overlap_ratio",
                "Overlap ratio must be between 0.0 and 1.0",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let embedding = &config.embedding;

        if !BACKENDS.contains(&embedding.backend.as_str()) {
            errors.push(ValidationError::new(
                "embedding.backend",
                format!(
                    "Backend must be one of {:?}, got '{}'",
                    BACKENDS, embedding.backend
                ),
            ));
        }

        if embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if embedding.max_input_chars == 0 {
            errors.push(ValidationError::new(
                "embedding.max_input_chars",
                "Max input chars must be greater than 0",
            ));
        }

        for (path, host) in [
            ("embedding.ollama_host", &embedding.ollama_host),
            ("embedding.lmstudio_host", &embedding.lmstudio_host),
        ] {
            if !host.starts_with("http://") && !host.starts_with("https://") {
                errors.push(ValidationError::new(
                    path,
                    format!("Host must be an http(s) URL, got '{}'", host),
                ));
            }
        }
    }
}
