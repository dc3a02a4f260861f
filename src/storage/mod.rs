//! Persistent vector store for chunk indexes
//!
//! A store directory holds one SQLite file per table (chunk rows, their
//! vectors and build metadata) plus an optional tantivy directory for
//! keyword search. Opening a table loads its vectors into an in-memory HNSW
//! graph; the graph is never persisted.

pub mod database;

use crate::chunking::Chunk;
use crate::embedding::{KeywordIndexError, VectorIndexError};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub use database::{ChunkTable, KeywordHit, VectorHit};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("Keyword index error: {0}")]
    Keyword(#[from] KeywordIndexError),

    #[error("Vector index error: {0}")]
    Vector(#[from] VectorIndexError),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("Cannot create a table without rows")]
    EmptyTable,

    #[error("Unsupported field for full-text index: {0}")]
    UnsupportedField(String),

    #[error("No full-text index on table {0}")]
    NoKeywordIndex(String),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Storage task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub(crate) fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        StoreError::Io {
            source,
            context: context.into(),
        }
    }
}

/// How `create_table` treats an existing table of the same name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Overwrite,
}

/// One chunk with its embedding, as written to a table
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRow {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// Build provenance stored alongside a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildMetadata {
    pub built_at: chrono::DateTime<chrono::Utc>,
    pub model: String,
    /// BLAKE3 hex digest of the transcript the table was built from
    pub fingerprint: String,
    pub window_seconds: f64,
    pub overlap_seconds: f64,
    pub embed_char_limit: usize,
}

/// HNSW parameters used when a table is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HnswParams {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

/// Handle on a store directory
///
/// Opened tables are memoized; dropping the connection (or the store
/// directory's cached handle) releases them.
pub struct Connection {
    dir: PathBuf,
    hnsw: HnswParams,
    tables: Mutex<AHashMap<String, Arc<ChunkTable>>>,
}

impl Connection {
    /// Connect to a store directory; it is created lazily by the first table
    pub fn connect(dir: &Path, hnsw: HnswParams) -> Self {
        Self {
            dir: dir.to_path_buf(),
            hnsw,
            tables: Mutex::new(AHashMap::new()),
        }
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.sqlite", name))
    }

    fn keyword_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.fts", name))
    }

    fn cached(&self) -> std::sync::MutexGuard<'_, AHashMap<String, Arc<ChunkTable>>> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Names of the tables present in the directory
    pub fn table_names(&self) -> Result<Vec<String>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| StoreError::io(e, format!("Failed to list {}", self.dir.display())))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(e, "Failed to read directory entry"))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("sqlite") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Create a table from `rows`
    ///
    /// With [`WriteMode::Overwrite`] any existing table of that name,
    /// including its keyword index, is replaced.
    pub fn create_table(
        &self,
        name: &str,
        rows: &[IndexRow],
        mode: WriteMode,
        metadata: &BuildMetadata,
    ) -> Result<Arc<ChunkTable>, StoreError> {
        let path = self.table_path(name);
        if path.exists() {
            match mode {
                WriteMode::Create => return Err(StoreError::TableExists(name.to_string())),
                WriteMode::Overwrite => self.drop_table(name)?,
            }
        }

        std::fs::create_dir_all(&self.dir)
            .map_err(|e| StoreError::io(e, format!("Failed to create {}", self.dir.display())))?;

        let table = Arc::new(ChunkTable::create(
            name,
            path,
            self.keyword_path(name),
            rows,
            metadata,
            self.hnsw,
        )?);

        self.cached().insert(name.to_string(), Arc::clone(&table));
        Ok(table)
    }

    /// Open an existing table
    pub fn open_table(&self, name: &str) -> Result<Arc<ChunkTable>, StoreError> {
        if let Some(table) = self.cached().get(name) {
            return Ok(Arc::clone(table));
        }

        let path = self.table_path(name);
        if !path.exists() {
            return Err(StoreError::TableNotFound(name.to_string()));
        }

        let table = Arc::new(ChunkTable::open(
            name,
            path,
            self.keyword_path(name),
            self.hnsw,
        )?);

        // A concurrent opener may have won; keep whichever landed first
        let mut tables = self.cached();
        let table = tables.entry(name.to_string()).or_insert(table);
        Ok(Arc::clone(table))
    }

    /// Remove a table and its keyword index
    pub fn drop_table(&self, name: &str) -> Result<(), StoreError> {
        self.cached().remove(name);

        let path = self.table_path(name);
        for file in [
            path.clone(),
            PathBuf::from(format!("{}-wal", path.display())),
            PathBuf::from(format!("{}-shm", path.display())),
        ] {
            if file.exists() {
                std::fs::remove_file(&file).map_err(|e| {
                    StoreError::io(e, format!("Failed to remove {}", file.display()))
                })?;
            }
        }

        let keyword_path = self.keyword_path(name);
        if keyword_path.exists() {
            std::fs::remove_dir_all(&keyword_path).map_err(|e| {
                StoreError::io(e, format!("Failed to remove {}", keyword_path.display()))
            })?;
        }

        Ok(())
    }
}

/// Little-endian f32 encoding used for the vector column
pub(crate) fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for &value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub(crate) fn decode_vector(blob: &[u8]) -> Result<Vec<f32>, StoreError> {
    if blob.len() % std::mem::size_of::<f32>() != 0 {
        return Err(StoreError::InvalidValue(format!(
            "vector blob length {} is not a multiple of 4",
            blob.len()
        )));
    }

    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn chunk(id: u64, start: f64, end: f64, text: &str) -> Chunk {
        Chunk {
            chunk_id: id,
            embed_text: format!("Alice: {}", text),
            display_text: format!("[0:00:00 - 0:00:10] ● Alice:\n    {}", text),
            start_time: start,
            end_time: end,
            speakers: vec!["Alice".to_string()],
        }
    }

    pub(crate) fn metadata() -> BuildMetadata {
        BuildMetadata {
            built_at: chrono::Utc::now(),
            model: "test-model".to_string(),
            fingerprint: blake3::hash(b"transcript").to_hex().to_string(),
            window_seconds: 15.0,
            overlap_seconds: 5.0,
            embed_char_limit: 1500,
        }
    }

    fn rows() -> Vec<IndexRow> {
        vec![
            IndexRow {
                chunk: chunk(0, 0.0, 15.0, "we need to fix the billing export"),
                vector: vec![1.0, 0.0, 0.0],
            },
            IndexRow {
                chunk: chunk(1, 10.0, 25.0, "lunch plans for thursday"),
                vector: vec![0.0, 1.0, 0.0],
            },
        ]
    }

    #[test]
    fn test_vector_blob_roundtrip() {
        let vector = vec![0.5, -1.25, f32::MIN_POSITIVE];
        assert_eq!(decode_vector(&encode_vector(&vector)).unwrap(), vector);
        assert!(decode_vector(&[0, 1, 2]).is_err());
    }

    #[test]
    fn test_open_missing_table() {
        let temp = TempDir::new().unwrap();
        let conn = Connection::connect(&temp.path().join("db"), HnswParams::default());
        assert!(matches!(
            conn.open_table("chunks"),
            Err(StoreError::TableNotFound(_))
        ));
        assert!(conn.table_names().unwrap().is_empty());
    }

    #[test]
    fn test_create_modes() {
        let temp = TempDir::new().unwrap();
        let conn = Connection::connect(&temp.path().join("db"), HnswParams::default());

        conn.create_table("chunks", &rows(), WriteMode::Create, &metadata())
            .unwrap();
        assert!(matches!(
            conn.create_table("chunks", &rows(), WriteMode::Create, &metadata()),
            Err(StoreError::TableExists(_))
        ));

        let replaced = conn
            .create_table("chunks", &rows()[..1], WriteMode::Overwrite, &metadata())
            .unwrap();
        assert_eq!(replaced.count_rows().unwrap(), 1);
        assert_eq!(conn.table_names().unwrap(), vec!["chunks".to_string()]);
    }

    #[test]
    fn test_reopen_from_disk() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("db");
        {
            let conn = Connection::connect(&dir, HnswParams::default());
            let table = conn
                .create_table("chunks", &rows(), WriteMode::Overwrite, &metadata())
                .unwrap();
            table.create_fts_index("text").unwrap();
        }

        let conn = Connection::connect(&dir, HnswParams::default());
        let table = conn.open_table("chunks").unwrap();
        assert_eq!(table.count_rows().unwrap(), 2);
        assert!(table.has_keyword_index());

        let hits = table.search(&[0.0, 1.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].chunk.chunk_id, 1);
        assert_eq!(hits[0].chunk.speakers, vec!["Alice".to_string()]);

        let meta = table.metadata().unwrap().unwrap();
        assert_eq!(meta.model, "test-model");
    }

    #[test]
    fn test_drop_table() {
        let temp = TempDir::new().unwrap();
        let conn = Connection::connect(&temp.path().join("db"), HnswParams::default());
        let table = conn
            .create_table("chunks", &rows(), WriteMode::Overwrite, &metadata())
            .unwrap();
        table.create_fts_index("text").unwrap();
        drop(table);

        conn.drop_table("chunks").unwrap();
        assert!(conn.table_names().unwrap().is_empty());
        assert!(!temp.path().join("db").join("chunks.fts").exists());
    }
}
