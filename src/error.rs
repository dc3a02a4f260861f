use std::path::PathBuf;
use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::storage::StoreError;

/// Main error type for meetrag operations that are allowed to fail
/// across the public interface (query, status, delete, configuration).
#[derive(Error, Debug)]
pub enum RagError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Vector store errors on the read path
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// No embedding backend could be reached
    #[error("No embedding provider available")]
    ProviderUnavailable,

    /// Rejected query input
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Fatal index build failures.
///
/// These never cross the public interface as `Err`: the index manager turns
/// them into a [`crate::index::BuildReport`] carrying the message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("transcript not found: {0}")]
    TranscriptMissing(PathBuf),

    #[error("failed to read transcript {path}: {message}")]
    TranscriptRead { path: PathBuf, message: String },

    #[error("no embedding provider available (Ollama/LM Studio)")]
    ProviderUnavailable,

    #[error("embedding model {model} could not be prepared")]
    ModelNotReady { model: String },

    #[error("no transcript segments could be parsed")]
    NoUtterances,

    #[error("transcript produced no chunks")]
    NoChunks,

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("index write failed after {attempts} attempts: {message}")]
    StoreWrite { attempts: u32, message: String },

    #[error("build superseded by a newer request")]
    Superseded,
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

/// Result type for meetrag operations
pub type Result<T> = std::result::Result<T, RagError>;
