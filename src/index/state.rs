//! Per-recording index state and the shared storage-handle registry

use crate::chunking::Chunk;
use crate::config::StorageConfig;
use crate::error::{RagError, Result};
use crate::storage::{BuildMetadata, ChunkTable, Connection, HnswParams, StoreError};
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, info};

/// Readiness of a recording's index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexStatus {
    NotIndexed,
    SkippedTooShort,
    Ready,
    Error,
}

impl std::fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IndexStatus::NotIndexed => "not indexed",
            IndexStatus::SkippedTooShort => "skipped (transcript too short)",
            IndexStatus::Ready => "ready",
            IndexStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Status as reported to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatusReport {
    pub indexed: bool,
    pub chunk_count: usize,
    pub status: IndexStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl IndexStatusReport {
    pub fn not_indexed() -> Self {
        Self {
            indexed: false,
            chunk_count: 0,
            status: IndexStatus::NotIndexed,
            last_error: None,
            indexed_at: None,
            fingerprint: None,
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: IndexStatus::SkippedTooShort,
            ..Self::not_indexed()
        }
    }

    pub fn ready(chunk_count: usize, metadata: Option<&BuildMetadata>) -> Self {
        Self {
            indexed: true,
            chunk_count,
            status: IndexStatus::Ready,
            last_error: None,
            indexed_at: metadata.map(|m| m.built_at),
            fingerprint: metadata.map(|m| m.fingerprint.clone()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: IndexStatus::Error,
            last_error: Some(message.into()),
            ..Self::not_indexed()
        }
    }
}

/// Where a recording's transcript and index live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingPaths {
    pub recording: PathBuf,
    pub transcript: PathBuf,
    pub index_dir: PathBuf,
    pub table_name: String,
}

impl RecordingPaths {
    pub fn resolve(recording: &Path, storage: &StorageConfig) -> Self {
        Self {
            recording: recording.to_path_buf(),
            transcript: recording.join(&storage.transcript_file),
            index_dir: recording.join(&storage.index_dir),
            table_name: storage.table_name.clone(),
        }
    }
}

/// In-process bookkeeping for one recording
#[derive(Debug, Default)]
pub struct RecordingState {
    outcome: Mutex<Option<IndexStatusReport>>,
    generation: AtomicU64,
    /// Serializes builds
    pub(crate) build_lock: AsyncMutex<()>,
    /// Shared by handle readers, exclusive for destructive operations
    pub(crate) gate: RwLock<()>,
}

impl RecordingState {
    /// Current delete generation; a build holds the value it started with
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Invalidate every outstanding lease
    fn supersede(&self) -> u64 {
        let _outcome = self.outcome();
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn outcome(&self) -> MutexGuard<'_, Option<IndexStatusReport>> {
        self.outcome.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a build outcome unless a delete has superseded `lease`.
    ///
    /// The lease check and the write happen under the same lock that
    /// [`RecordingState::supersede`] takes, so a delete either lands first
    /// and wins, or lands later and overwrites.
    pub(crate) fn record_for_lease(&self, lease: u64, report: IndexStatusReport) -> bool {
        let mut outcome = self.outcome();
        if self.generation.load(Ordering::SeqCst) != lease {
            return false;
        }
        *outcome = Some(report);
        true
    }

    fn is_unindexed(&self) -> bool {
        matches!(
            self.outcome().as_ref().map(|r| r.status),
            None | Some(IndexStatus::NotIndexed)
        )
    }
}

/// Tracks index readiness per recording and owns the storage-handle cache.
///
/// Handles are keyed by index directory. Anything that destroys an index
/// directory must hold the recording's gate exclusively and call
/// [`IndexStateStore::invalidate`] before touching the filesystem.
pub struct IndexStateStore {
    storage: StorageConfig,
    hnsw: HnswParams,
    recordings: Mutex<AHashMap<PathBuf, Arc<RecordingState>>>,
    handles: Mutex<AHashMap<PathBuf, Arc<Connection>>>,
}

impl IndexStateStore {
    pub fn new(storage: StorageConfig, hnsw: HnswParams) -> Self {
        Self {
            storage,
            hnsw,
            recordings: Mutex::new(AHashMap::new()),
            handles: Mutex::new(AHashMap::new()),
        }
    }

    pub fn paths(&self, recording: &Path) -> RecordingPaths {
        RecordingPaths::resolve(recording, &self.storage)
    }

    pub fn recording(&self, recording: &Path) -> Arc<RecordingState> {
        let mut recordings = self.recordings.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(recordings.entry(recording.to_path_buf()).or_default())
    }

    fn existing(&self, recording: &Path) -> Option<Arc<RecordingState>> {
        self.recordings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(recording)
            .cloned()
    }

    /// Number of recordings with in-process state
    pub fn tracked(&self) -> usize {
        self.recordings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Drop a recording's state when nothing else holds it and it has no
    /// outcome worth keeping. `state` is the caller's own reference.
    fn release(&self, recording: &Path, state: Arc<RecordingState>) {
        let mut recordings = self.recordings.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one held by the caller
        if Arc::strong_count(&state) == 2 && state.is_unindexed() {
            recordings.remove(recording);
        }
    }

    /// Cached connection for an index directory
    pub fn handle(&self, index_dir: &Path) -> Arc<Connection> {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            handles
                .entry(index_dir.to_path_buf())
                .or_insert_with(|| Arc::new(Connection::connect(index_dir, self.hnsw))),
        )
    }

    /// Drop the cached connection for an index directory
    pub fn invalidate(&self, index_dir: &Path) {
        let removed = self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(index_dir);
        if removed.is_some() {
            debug!("Invalidated storage handle for {}", index_dir.display());
        }
    }

    pub fn is_cached(&self, index_dir: &Path) -> bool {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(index_dir)
    }

    /// Open the recording's table through the cache.
    ///
    /// Callers hold the recording's gate (shared) for as long as they use
    /// the returned table.
    pub(crate) async fn open_table(&self, paths: &RecordingPaths) -> Result<Arc<ChunkTable>> {
        let handle = self.handle(&paths.index_dir);
        let name = paths.table_name.clone();

        let table = tokio::task::spawn_blocking(move || handle.open_table(&name))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;
        Ok(table)
    }

    /// Index status for a recording
    ///
    /// Falls back to reading the index on disk when no build outcome has
    /// been recorded in this process. Unreadable indexes report not-indexed.
    pub async fn status(&self, recording: &Path) -> IndexStatusReport {
        if let Some(state) = self.existing(recording) {
            if let Some(report) = state.outcome().clone() {
                return report;
            }
        }

        let paths = self.paths(recording);
        if !paths.index_dir.exists() {
            return IndexStatusReport::not_indexed();
        }

        let state = self.recording(recording);
        let _read = state.gate.read().await;
        let on_disk = async {
            let table = self.open_table(&paths).await?;
            tokio::task::spawn_blocking(move || {
                let count = table.count_rows()?;
                let metadata = table.metadata()?;
                Ok::<_, StoreError>((count, metadata))
            })
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
            .map_err(RagError::from)
        };

        match on_disk.await {
            Ok((count, metadata)) => IndexStatusReport::ready(count, metadata.as_ref()),
            Err(e) => {
                debug!("Reading index status for {} failed: {}", recording.display(), e);
                IndexStatusReport::not_indexed()
            }
        }
    }

    /// Chunks stored in the recording's index, in id order
    ///
    /// A recording without an index has no chunks.
    pub async fn indexed_chunks(&self, recording: &Path) -> Result<Vec<Chunk>> {
        let paths = self.paths(recording);
        if !paths.index_dir.exists() {
            return Ok(Vec::new());
        }

        let state = self.recording(recording);
        let _read = state.gate.read().await;
        let table = self.open_table(&paths).await?;
        let chunks = tokio::task::spawn_blocking(move || table.chunks())
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;
        Ok(chunks)
    }

    pub async fn chunk_count(&self, recording: &Path) -> usize {
        self.status(recording).await.chunk_count
    }

    /// Remove a recording's index; a missing index is not an error.
    ///
    /// Any build already running for the recording is superseded and will
    /// not write.
    pub async fn delete(&self, recording: &Path) -> Result<()> {
        let state = self.recording(recording);
        let generation = state.supersede();
        let paths = self.paths(recording);

        {
            let _write = state.gate.write().await;
            self.invalidate(&paths.index_dir);

            if paths.index_dir.exists() {
                tokio::fs::remove_dir_all(&paths.index_dir)
                    .await
                    .map_err(|e| RagError::Io {
                        source: e,
                        context: format!("Failed to remove index {}", paths.index_dir.display()),
                    })?;
                info!(
                    "Deleted index for {} (generation {})",
                    recording.display(),
                    generation
                );
            }

            *state.outcome() = Some(IndexStatusReport::not_indexed());
        }

        self.release(recording, state);
        Ok(())
    }
}
