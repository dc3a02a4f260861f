//! Entry point used by the rest of the application
//!
//! `TranscriptRag` wires the index manager, the retrieval engine and the
//! shared state store around one embedding provider.

use crate::chunking::{Chunk, ChunkBuilder};
use crate::config::{Config, EmbeddingConfig};
use crate::embedding::{EmbeddingProvider, FastEmbedProvider, HttpEmbeddingProvider};
use crate::error::{RagError, Result};
use crate::index::{BuildReport, IndexManager, IndexStateStore, IndexStatusReport};
use crate::retrieval::{RetrievalEngine, ScoredChunk};
use crate::storage::HnswParams;
use crate::transcript::parse_transcript;
use std::path::Path;
use std::sync::Arc;

/// Retrieval over meeting transcripts, one index per recording directory
pub struct TranscriptRag {
    config: Config,
    state: Arc<IndexStateStore>,
    indexer: IndexManager,
    engine: RetrievalEngine,
}

impl TranscriptRag {
    pub fn new(config: Config, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let hnsw = HnswParams {
            m: config.indexing.hnsw_m,
            ef_construction: config.indexing.hnsw_ef_construction,
            ef_search: config.indexing.hnsw_ef_search,
        };
        let state = Arc::new(IndexStateStore::new(config.storage.clone(), hnsw));

        let indexer = IndexManager::new(
            config.chunking.clone(),
            config.indexing.clone(),
            Arc::clone(&provider),
            Arc::clone(&state),
        )?;
        let engine = RetrievalEngine::new(config.retrieval.clone(), provider, Arc::clone(&state));

        Ok(Self {
            config,
            state,
            indexer,
            engine,
        })
    }

    /// Build with the provider selected by `embedding.backend`
    pub fn from_config(config: Config) -> Result<Self> {
        let provider = provider_for(&config.embedding)?;
        Self::new(config, provider)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> &Arc<IndexStateStore> {
        &self.state
    }

    /// (Re)build the recording's index
    pub async fn build_index(&self, recording: &Path) -> BuildReport {
        self.indexer.build_index(recording).await
    }

    /// Hybrid query; `k` defaults to `retrieval.default_top_k`
    pub async fn query(
        &self,
        recording: &Path,
        query: &str,
        k: Option<usize>,
    ) -> Result<Vec<ScoredChunk>> {
        let k = k.unwrap_or_else(|| self.engine.default_top_k());
        self.engine.query(recording, query, k).await
    }

    pub async fn status(&self, recording: &Path) -> IndexStatusReport {
        self.state.status(recording).await
    }

    pub async fn delete_index(&self, recording: &Path) -> Result<()> {
        self.state.delete(recording).await
    }

    /// Chunks as stored in the recording's index
    pub async fn indexed_chunks(&self, recording: &Path) -> Result<Vec<Chunk>> {
        self.state.indexed_chunks(recording).await
    }

    /// Parse and chunk the recording's transcript without embedding it
    pub async fn chunks(&self, recording: &Path) -> Result<Vec<Chunk>> {
        let paths = self.state.paths(recording);
        let transcript = tokio::fs::read_to_string(&paths.transcript)
            .await
            .map_err(|e| RagError::Io {
                source: e,
                context: format!("Failed to read transcript {}", paths.transcript.display()),
            })?;

        let builder = ChunkBuilder::from_config(&self.config.chunking)
            .map_err(|e| RagError::Config(e.to_string()))?;
        Ok(builder.build(&parse_transcript(&transcript)))
    }
}

/// Embedding provider for the configured backend
pub fn provider_for(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.backend.as_str() {
        "local" => Ok(Arc::new(FastEmbedProvider::new(
            &config.local_model,
            config.max_input_chars,
        )?)),
        _ => Ok(Arc::new(HttpEmbeddingProvider::new(config.clone()))),
    }
}
