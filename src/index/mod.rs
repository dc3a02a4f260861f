//! Index (re)build for a recording's transcript
//!
//! A build parses and chunks the transcript, embeds every chunk in one
//! batched call and then replaces the recording's index wholesale. Only the
//! replace step touches the filesystem; it runs under the recording's
//! exclusive gate and is retried with linear backoff.

mod state;

pub use state::{IndexStateStore, IndexStatus, IndexStatusReport, RecordingPaths, RecordingState};

use crate::chunking::ChunkBuilder;
use crate::config::{ChunkingConfig, IndexingConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{BuildError, RagError, Result};
use crate::retry::RetryPolicy;
use crate::storage::{BuildMetadata, IndexRow, StoreError, WriteMode};
use crate::transcript::parse_transcript;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Outcome of a build request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    pub indexed: bool,
    pub skipped: bool,
    pub chunk_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BuildReport {
    pub fn indexed(chunk_count: usize) -> Self {
        Self {
            indexed: true,
            skipped: false,
            chunk_count,
            error: None,
        }
    }

    pub fn skipped() -> Self {
        Self {
            indexed: false,
            skipped: true,
            chunk_count: 0,
            error: None,
        }
    }

    pub fn failed(error: &BuildError) -> Self {
        Self {
            indexed: false,
            skipped: false,
            chunk_count: 0,
            error: Some(error.to_string()),
        }
    }
}

enum Built {
    Skipped { chars: usize },
    Indexed { chunk_count: usize },
}

/// Builds and replaces recording indexes
pub struct IndexManager {
    chunker: ChunkBuilder,
    chunking: ChunkingConfig,
    indexing: IndexingConfig,
    provider: Arc<dyn EmbeddingProvider>,
    state: Arc<IndexStateStore>,
}

impl IndexManager {
    pub fn new(
        chunking: ChunkingConfig,
        indexing: IndexingConfig,
        provider: Arc<dyn EmbeddingProvider>,
        state: Arc<IndexStateStore>,
    ) -> Result<Self> {
        let chunker =
            ChunkBuilder::from_config(&chunking).map_err(|e| RagError::Config(e.to_string()))?;

        Ok(Self {
            chunker,
            chunking,
            indexing,
            provider,
            state,
        })
    }

    /// Build (or rebuild) the index for a recording.
    ///
    /// Never fails as `Err`: fatal problems come back in the report and set
    /// the recording's status to error.
    pub async fn build_index(&self, recording: &Path) -> BuildReport {
        let record = self.state.recording(recording);
        let _build = record.build_lock.lock().await;
        let lease = record.generation();

        match self.run_build(recording, &record, lease).await {
            Ok(Built::Skipped { chars }) => {
                info!(
                    "Transcript for {} too short to index ({} chars)",
                    recording.display(),
                    chars
                );
                record.record_for_lease(lease, IndexStatusReport::skipped());
                BuildReport::skipped()
            }
            Ok(Built::Indexed { chunk_count }) => {
                info!(
                    "Indexed {} chunks for {}",
                    chunk_count,
                    recording.display()
                );
                BuildReport::indexed(chunk_count)
            }
            Err(BuildError::Superseded) => {
                // The delete that superseded us already set the status
                info!("Index build for {} superseded", recording.display());
                BuildReport::failed(&BuildError::Superseded)
            }
            Err(e) => {
                warn!("Index build for {} failed: {}", recording.display(), e);
                record.record_for_lease(lease, IndexStatusReport::failed(e.to_string()));
                BuildReport::failed(&e)
            }
        }
    }

    async fn run_build(
        &self,
        recording: &Path,
        record: &RecordingState,
        lease: u64,
    ) -> std::result::Result<Built, BuildError> {
        let paths = self.state.paths(recording);

        let transcript = match tokio::fs::read_to_string(&paths.transcript).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BuildError::TranscriptMissing(paths.transcript));
            }
            Err(e) => {
                return Err(BuildError::TranscriptRead {
                    path: paths.transcript,
                    message: e.to_string(),
                });
            }
        };

        let chars = transcript.chars().count();
        if chars < self.indexing.min_transcript_chars {
            return Ok(Built::Skipped { chars });
        }

        let provider = self
            .provider
            .detect()
            .await
            .ok_or(BuildError::ProviderUnavailable)?;
        info!("Using {} embedding provider", provider.kind);

        if !self.provider.ensure_model(&provider).await {
            return Err(BuildError::ModelNotReady {
                model: self.provider.model_name().to_string(),
            });
        }

        let utterances = parse_transcript(&transcript);
        if utterances.is_empty() {
            return Err(BuildError::NoUtterances);
        }

        let chunks = self.chunker.build(&utterances);
        if chunks.is_empty() {
            return Err(BuildError::NoChunks);
        }
        info!(
            "Parsed {} utterances into {} chunks",
            utterances.len(),
            chunks.len()
        );

        let texts: Vec<String> = chunks.iter().map(|c| c.embed_text.clone()).collect();
        let vectors = self
            .provider
            .embed_batch(&texts, &provider)
            .await
            .map_err(|e| BuildError::Embedding(e.to_string()))?;

        if vectors.len() != chunks.len() {
            return Err(BuildError::Embedding(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                vectors.len()
            )));
        }

        let rows: Vec<IndexRow> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexRow { chunk, vector })
            .collect();

        let metadata = BuildMetadata {
            built_at: chrono::Utc::now(),
            model: self.provider.model_name().to_string(),
            fingerprint: blake3::hash(transcript.as_bytes()).to_hex().to_string(),
            window_seconds: self.chunking.window_seconds,
            overlap_seconds: self.chunking.overlap_seconds,
            embed_char_limit: self.chunking.embed_char_limit,
        };

        let _write = record.gate.write().await;
        if record.generation() != lease {
            return Err(BuildError::Superseded);
        }

        let chunk_count = self.replace_index(&paths, rows, &metadata).await?;

        // Still under the gate, so a queued delete cannot slip in first
        record.record_for_lease(
            lease,
            IndexStatusReport::ready(chunk_count, Some(&metadata)),
        );
        Ok(Built::Indexed { chunk_count })
    }

    /// Destroy and recreate the index directory, with retries.
    ///
    /// Caller holds the recording's gate exclusively.
    async fn replace_index(
        &self,
        paths: &RecordingPaths,
        rows: Vec<IndexRow>,
        metadata: &BuildMetadata,
    ) -> std::result::Result<usize, BuildError> {
        let policy = RetryPolicy::new(
            self.indexing.max_attempts,
            Duration::from_millis(self.indexing.retry_backoff_ms),
        );
        let rows = Arc::new(rows);

        policy
            .run(
                |attempt| {
                    self.state.invalidate(&paths.index_dir);
                    if attempt > 0 {
                        warn!(
                            "Retrying index write for {} (attempt {}/{})",
                            paths.recording.display(),
                            attempt + 1,
                            policy.max_attempts()
                        );
                    }
                },
                |_| self.write_index(paths, Arc::clone(&rows), metadata.clone()),
            )
            .await
            .map_err(|exhausted| BuildError::StoreWrite {
                attempts: exhausted.attempts,
                message: exhausted.last_error.to_string(),
            })
    }

    async fn write_index(
        &self,
        paths: &RecordingPaths,
        rows: Arc<Vec<IndexRow>>,
        metadata: BuildMetadata,
    ) -> std::result::Result<usize, StoreError> {
        let dir = &paths.index_dir;
        if dir.exists() {
            tokio::fs::remove_dir_all(dir)
                .await
                .map_err(|e| StoreError::io(e, format!("Failed to remove {}", dir.display())))?;
            tokio::time::sleep(Duration::from_millis(self.indexing.settle_delay_ms)).await;
        }
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| StoreError::io(e, format!("Failed to create {}", dir.display())))?;

        let handle = self.state.handle(dir);
        let name = paths.table_name.clone();
        let keyword_heap = self.indexing.keyword_writer_heap_bytes;

        tokio::task::spawn_blocking(move || {
            let table = handle.create_table(&name, &rows, WriteMode::Overwrite, &metadata)?;

            if let Err(e) = table.create_fts_index_with_heap("text", keyword_heap) {
                warn!(
                    "Full-text index creation failed, search will be vector-only: {}",
                    e
                );
            }

            table.count_rows()
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}
