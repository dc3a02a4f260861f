//! Configuration management for meetrag
//!
//! Loads the TOML configuration, applies `MEETRAG_*` environment overrides
//! and validates the result before anything else runs.

use crate::error::{RagError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(rename = "_meta", default)]
    pub meta: MetaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
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

/// Per-recording file layout, relative to the recording directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub transcript_file: PathBuf,
    pub index_dir: PathBuf,
    pub table_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            transcript_file: PathBuf::from("analysis").join("transcript.txt"),
            index_dir: PathBuf::from("analysis").join("vectordb"),
            table_name: "chunks".to_string(),
        }
    }
}

/// Chunk window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub window_seconds: f64,
    pub overlap_seconds: f64,
    pub embed_char_limit: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_seconds: 15.0,
            overlap_seconds: 5.0,
            embed_char_limit: 1500,
        }
    }
}

/// Index build configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Transcripts shorter than this (in characters) are skipped
    pub min_transcript_chars: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Pause between removing an old index and writing the new one
    pub settle_delay_ms: u64,
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
    /// Memory budget for writing the keyword index (tantivy needs at least 15 MB)
    #[serde(default = "default_keyword_writer_heap")]
    pub keyword_writer_heap_bytes: usize,
}

fn default_keyword_writer_heap() -> usize {
    crate::embedding::DEFAULT_WRITER_HEAP_BYTES
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            min_transcript_chars: 8000,
            max_attempts: 3,
            retry_backoff_ms: 500,
            settle_delay_ms: 100,
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
            keyword_writer_heap_bytes: default_keyword_writer_heap(),
        }
    }
}

/// Hybrid retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
    /// Vector candidates fetched per requested result
    pub vector_candidate_multiplier: usize,
    /// Keyword candidates fetched per requested result
    pub keyword_candidate_multiplier: usize,
    pub min_vector_score: f32,
    pub keyword_boost: f32,
    pub keyword_only_score: f32,
    pub max_overlap_ratio: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            vector_candidate_multiplier: 4,
            keyword_candidate_multiplier: 2,
            min_vector_score: 0.01,
            keyword_boost: 1.5,
            keyword_only_score: 0.8,
            max_overlap_ratio: 0.5,
        }
    }
}

/// Embedding backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "auto", "ollama", "lmstudio" or "local"
    pub backend: String,
    /// Model requested from Ollama / LM Studio
    pub model: String,
    /// Model used by the in-process fastembed backend
    pub local_model: String,
    pub ollama_host: String,
    pub lmstudio_host: String,
    pub batch_size: usize,
    pub max_input_chars: usize,
    pub ping_timeout_ms: u64,
    pub request_retry_delay_ms: u64,
    pub batch_pause_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "auto".to_string(),
            model: "nomic-embed-text".to_string(),
            local_model: "all-MiniLM-L6-v2".to_string(),
            ollama_host: "http://localhost:11434".to_string(),
            lmstudio_host: "http://localhost:1234/v1".to_string(),
            batch_size: 10,
            max_input_chars: 2000,
            ping_timeout_ms: 3000,
            request_retry_delay_ms: 2000,
            batch_pause_ms: 100,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RagError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: MEETRAG_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    fn apply_overrides(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix("MEETRAG_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "EMBEDDING__BACKEND" => self.embedding.backend = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__OLLAMA_HOST" => self.embedding.ollama_host = value.to_string(),
            "EMBEDDING__LMSTUDIO_HOST" => self.embedding.lmstudio_host = value.to_string(),
            "CHUNKING__WINDOW_SECONDS" => {
                self.chunking.window_seconds = parse_number(path, value)?;
            }
            "CHUNKING__OVERLAP_SECONDS" => {
                self.chunking.overlap_seconds = parse_number(path, value)?;
            }
            "INDEXING__MIN_TRANSCRIPT_CHARS" => {
                self.indexing.min_transcript_chars = parse_number(path, value)?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| RagError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("meetrag").join("config.toml"))
    }
}

fn parse_number<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| RagError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}' as a number", value),
    })
}
