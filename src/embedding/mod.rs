/// Embedding backends and the in-memory search indexes
///
/// Architecture:
/// - EmbeddingProvider trait: detect a backend, prepare its model, embed text
/// - HttpEmbeddingProvider for Ollama / LM Studio servers
/// - FastEmbedProvider for local, in-process embedding
/// - HNSW (L2) for nearest-neighbour search over chunk vectors
/// - Tantivy for keyword search over chunk text
mod http;
mod keyword_index;
mod provider;
mod vector_index;

pub use http::HttpEmbeddingProvider;
pub use keyword_index::{
    KeywordIndex, KeywordIndexError, KeywordSearchResult, DEFAULT_WRITER_HEAP_BYTES,
    MIN_WRITER_HEAP_BYTES,
};
pub use provider::FastEmbedProvider;
pub use vector_index::{SearchResult, VectorIndex, VectorIndexError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Input exceeds the model context length: {0}")]
    ContextLength(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(ProviderKind),
}

impl EmbeddingError {
    /// Whether a retry could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            EmbeddingError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Which backend served a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    LmStudio,
    Local,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::LmStudio => "lmstudio",
            ProviderKind::Local => "local",
        };
        f.write_str(name)
    }
}

/// A reachable embedding backend, as returned by [`EmbeddingProvider::detect`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedProvider {
    pub kind: ProviderKind,
    /// Base URL for HTTP backends
    pub base_url: Option<String>,
}

impl DetectedProvider {
    pub fn http(kind: ProviderKind, base_url: impl Into<String>) -> Self {
        Self {
            kind,
            base_url: Some(base_url.into()),
        }
    }

    pub fn local() -> Self {
        Self {
            kind: ProviderKind::Local,
            base_url: None,
        }
    }
}

/// Embedding collaborator consumed by index builds and queries
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Find a reachable backend, if any
    async fn detect(&self) -> Option<DetectedProvider>;

    /// Make sure the configured model is usable on `provider`
    async fn ensure_model(&self, provider: &DetectedProvider) -> bool;

    /// Generate embedding for a single text
    async fn embed(
        &self,
        text: &str,
        provider: &DetectedProvider,
    ) -> Result<Vec<f32>, EmbeddingError>;

    /// Generate embeddings for multiple texts; output order and length match the input
    async fn embed_batch(
        &self,
        texts: &[String],
        provider: &DetectedProvider,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Truncate to at most `max_chars` characters
pub(crate) fn clamp_input(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
