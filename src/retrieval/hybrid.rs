//! Hybrid search combining semantic and keyword search

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::IndexStateStore;
use crate::retrieval::{fuse_results, temporal_dedup, FusionConfig, ScoredChunk};
use crate::storage::StoreError;
use crate::transcript::format_timestamp;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

const PREVIEW_CHARS: usize = 80;

/// Query engine over recording indexes
pub struct RetrievalEngine {
    config: RetrievalConfig,
    fusion: FusionConfig,
    provider: Arc<dyn EmbeddingProvider>,
    state: Arc<IndexStateStore>,
}

impl RetrievalEngine {
    pub fn new(
        config: RetrievalConfig,
        provider: Arc<dyn EmbeddingProvider>,
        state: Arc<IndexStateStore>,
    ) -> Self {
        let fusion = FusionConfig::from(&config);
        Self {
            config,
            fusion,
            provider,
            state,
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.config.default_top_k
    }

    /// Run a hybrid query against a recording's index
    ///
    /// Returns at most `k` chunks, best first. A recording without a usable
    /// index yields an empty list. Keyword search is best-effort; vector
    /// search failures are returned as errors.
    pub async fn query(&self, recording: &Path, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }

        let paths = self.state.paths(recording);
        if !paths.index_dir.exists() {
            debug!("No index for {}", recording.display());
            return Ok(Vec::new());
        }

        let provider = self
            .provider
            .detect()
            .await
            .ok_or(RagError::ProviderUnavailable)?;
        let embedding = self.provider.embed(query, &provider).await?;

        let record = self.state.recording(recording);
        let _read = record.gate.read().await;

        let table = match self.state.open_table(&paths).await {
            Ok(table) => table,
            Err(e) => {
                warn!("Index for {} unreadable: {}", recording.display(), e);
                return Ok(Vec::new());
            }
        };

        let vector_limit = k.saturating_mul(self.config.vector_candidate_multiplier);
        let keyword_limit = k.saturating_mul(self.config.keyword_candidate_multiplier);
        let text = query.to_string();

        let (vector_hits, keyword_hits) = tokio::task::spawn_blocking(move || {
            let vector_hits = table.search(&embedding, vector_limit)?;

            let keyword_hits = match table.search_text(&text, keyword_limit) {
                Ok(hits) => hits,
                Err(e) => {
                    debug!("Keyword search skipped: {}", e);
                    Vec::new()
                }
            };

            Ok::<_, StoreError>((vector_hits, keyword_hits))
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))??;

        let vector_count = vector_hits.len();
        let keyword_count = keyword_hits.len();

        let candidates = fuse_results(vector_hits, keyword_hits, &self.fusion);
        let candidate_count = candidates.len();
        let results = temporal_dedup(candidates, k, self.config.max_overlap_ratio);

        info!(
            "Query returned {} results ({} vector hits, {} keyword hits, {} candidates)",
            results.len(),
            vector_count,
            keyword_count,
            candidate_count
        );
        for (i, result) in results.iter().enumerate() {
            debug!(
                "[{}] Chunk {} ({}-{}) Score: {:.3} - \"{}\"",
                i + 1,
                result.chunk.chunk_id,
                format_timestamp(result.chunk.start_time),
                format_timestamp(result.chunk.end_time),
                result.score,
                preview(&result.chunk.embed_text)
            );
        }

        Ok(results)
    }
}

fn preview(text: &str) -> String {
    let flat = text.replace('\n', " ");
    match flat.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview() {
        assert_eq!(preview("a\nb"), "a b");
        let long = "x".repeat(100);
        assert_eq!(preview(&long).chars().count(), PREVIEW_CHARS + 3);
    }
}
