//! SQLite-backed chunk table
//!
//! Rows hold chunk metadata plus the embedding vector; nearest-neighbour and
//! keyword search go through in-process indexes built over those rows.

use super::{decode_vector, encode_vector, BuildMetadata, HnswParams, IndexRow, StoreError};
use crate::chunking::Chunk;
use crate::embedding::{KeywordIndex, VectorIndex, DEFAULT_WRITER_HEAP_BYTES};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    chunk_id INTEGER PRIMARY KEY,
    embed_text TEXT NOT NULL,
    display_text TEXT NOT NULL,
    start_time REAL NOT NULL,
    end_time REAL NOT NULL,
    speakers TEXT NOT NULL,
    vector BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS table_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const BUILD_KEY: &str = "build";
const DIMENSION_KEY: &str = "dimension";

/// A vector-search hit with its raw distance
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk: Chunk,
    pub distance: f32,
}

/// A keyword-search hit with its BM25 score
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub chunk: Chunk,
    pub score: f32,
}

/// One table of chunk rows
pub struct ChunkTable {
    name: String,
    pool: DbPool,
    vectors: VectorIndex,
    keyword_path: PathBuf,
    keywords: RwLock<Option<KeywordIndex>>,
    ef_search: usize,
}

impl std::fmt::Debug for ChunkTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkTable")
            .field("name", &self.name)
            .field("rows", &self.vectors.len())
            .finish()
    }
}

fn open_pool(path: &Path) -> Result<DbPool, StoreError> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )
    });

    Ok(Pool::builder()
        .max_size(4)
        .connection_timeout(Duration::from_secs(5))
        .build(manager)?)
}

impl ChunkTable {
    pub(super) fn create(
        name: &str,
        path: PathBuf,
        keyword_path: PathBuf,
        rows: &[IndexRow],
        metadata: &BuildMetadata,
        hnsw: HnswParams,
    ) -> Result<Self, StoreError> {
        let dimension = rows.first().ok_or(StoreError::EmptyTable)?.vector.len();
        if let Some(bad) = rows.iter().find(|r| r.vector.len() != dimension) {
            return Err(StoreError::DimensionMismatch {
                expected: dimension,
                actual: bad.vector.len(),
            });
        }

        let pool = open_pool(&path)?;
        {
            let mut conn = pool.get()?;
            conn.execute_batch(SCHEMA)?;

            let tx = conn.transaction()?;
            {
                let mut insert = tx.prepare(
                    "INSERT INTO chunks (chunk_id, embed_text, display_text, start_time, end_time, speakers, vector)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for row in rows {
                    let chunk = &row.chunk;
                    insert.execute(params![
                        to_sql_id(chunk.chunk_id)?,
                        chunk.embed_text,
                        chunk.display_text,
                        chunk.start_time,
                        chunk.end_time,
                        encode_speakers(&chunk.speakers)?,
                        encode_vector(&row.vector),
                    ])?;
                }

                let build = serde_json::to_string(metadata)
                    .map_err(|e| StoreError::InvalidValue(e.to_string()))?;
                tx.execute(
                    "INSERT OR REPLACE INTO table_meta (key, value) VALUES (?1, ?2)",
                    params![BUILD_KEY, build],
                )?;
                tx.execute(
                    "INSERT OR REPLACE INTO table_meta (key, value) VALUES (?1, ?2)",
                    params![DIMENSION_KEY, dimension.to_string()],
                )?;
            }
            tx.commit()?;
        }

        let items: Vec<(u64, Vec<f32>)> = rows
            .iter()
            .map(|r| (r.chunk.chunk_id, r.vector.clone()))
            .collect();
        let vectors = VectorIndex::build(dimension, hnsw.m, hnsw.ef_construction, &items)?;

        tracing::debug!("Created table {} with {} rows", name, rows.len());

        Ok(Self {
            name: name.to_string(),
            pool,
            vectors,
            keyword_path,
            keywords: RwLock::new(None),
            ef_search: hnsw.ef_search,
        })
    }

    pub(super) fn open(
        name: &str,
        path: PathBuf,
        keyword_path: PathBuf,
        hnsw: HnswParams,
    ) -> Result<Self, StoreError> {
        // Read through a plain connection first so a corrupt file fails fast
        let conn = rusqlite::Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;

        let dimension: Option<String> = conn
            .query_row(
                "SELECT value FROM table_meta WHERE key = ?1",
                params![DIMENSION_KEY],
                |row| row.get(0),
            )
            .optional()?;
        let dimension: usize = dimension
            .ok_or_else(|| StoreError::InvalidValue("table has no dimension".to_string()))?
            .parse()
            .map_err(|_| StoreError::InvalidValue("unreadable dimension".to_string()))?;

        let mut stmt = conn.prepare("SELECT chunk_id, vector FROM chunks ORDER BY chunk_id")?;
        let mut items = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id = from_sql_id(row.get(0)?)?;
            let blob: Vec<u8> = row.get(1)?;
            items.push((id, decode_vector(&blob)?));
        }
        drop(rows);
        drop(stmt);
        drop(conn);

        let pool = open_pool(&path)?;
        let vectors = VectorIndex::build(dimension, hnsw.m, hnsw.ef_construction, &items)?;

        // The keyword index is optional; a broken one degrades to vector-only search
        let keywords = if keyword_path.exists() {
            match KeywordIndex::open(&keyword_path) {
                Ok(index) => Some(index),
                Err(e) => {
                    tracing::warn!("Keyword index for {} unusable: {}", name, e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            name: name.to_string(),
            pool,
            vectors,
            keyword_path,
            keywords: RwLock::new(keywords),
            ef_search: hnsw.ef_search,
        })
    }

    /// Nearest chunks to `vector`, closest first
    pub fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<VectorHit>, StoreError> {
        let neighbours = self.vectors.search(vector, limit, self.ef_search)?;

        let conn = self.pool.get()?;
        let mut hits = Vec::with_capacity(neighbours.len());
        for neighbour in neighbours {
            let chunk = fetch_chunk(&conn, neighbour.id)?;
            hits.push(VectorHit {
                chunk,
                distance: neighbour.distance,
            });
        }
        Ok(hits)
    }

    /// Full-text search over chunk text
    pub fn search_text(&self, text: &str, limit: usize) -> Result<Vec<KeywordHit>, StoreError> {
        let guard = self.keywords.read().unwrap_or_else(|e| e.into_inner());
        let index = guard
            .as_ref()
            .ok_or_else(|| StoreError::NoKeywordIndex(self.name.clone()))?;
        let matches = index.search(text, limit)?;
        drop(guard);

        let conn = self.pool.get()?;
        let mut hits = Vec::with_capacity(matches.len());
        for m in matches {
            hits.push(KeywordHit {
                chunk: fetch_chunk(&conn, m.id)?,
                score: m.score,
            });
        }
        Ok(hits)
    }

    /// Build the full-text index over `field`; only `"text"` is indexable
    pub fn create_fts_index(&self, field: &str) -> Result<(), StoreError> {
        self.create_fts_index_with_heap(field, DEFAULT_WRITER_HEAP_BYTES)
    }

    /// Like [`ChunkTable::create_fts_index`] with an explicit writer budget.
    ///
    /// A failed build leaves no keyword index behind.
    pub fn create_fts_index_with_heap(
        &self,
        field: &str,
        heap_bytes: usize,
    ) -> Result<(), StoreError> {
        if field != "text" {
            return Err(StoreError::UnsupportedField(field.to_string()));
        }

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT chunk_id, embed_text FROM chunks ORDER BY chunk_id")?;
        let docs = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        let docs = docs
            .into_iter()
            .map(|(id, text)| Ok((from_sql_id(id)?, text)))
            .collect::<Result<Vec<_>, StoreError>>()?;

        let mut guard = self.keywords.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
        if self.keyword_path.exists() {
            std::fs::remove_dir_all(&self.keyword_path).map_err(|e| {
                StoreError::io(
                    e,
                    format!("Failed to clear {}", self.keyword_path.display()),
                )
            })?;
        }

        let items: Vec<(u64, &str)> = docs.iter().map(|(id, t)| (*id, t.as_str())).collect();
        match KeywordIndex::create_with_heap(&self.keyword_path, &items, heap_bytes) {
            Ok(index) => {
                *guard = Some(index);
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_dir_all(&self.keyword_path) {
                    tracing::debug!(
                        "Could not remove partial keyword index {}: {}",
                        self.keyword_path.display(),
                        cleanup
                    );
                }
                Err(e.into())
            }
        }
    }

    pub fn has_keyword_index(&self) -> bool {
        self.keywords
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn count_rows(&self) -> Result<usize, StoreError> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        usize::try_from(count).map_err(|_| StoreError::InvalidValue(format!("row count {}", count)))
    }

    /// All chunks in id order
    pub fn chunks(&self) -> Result<Vec<Chunk>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT chunk_id, embed_text, display_text, start_time, end_time, speakers
             FROM chunks ORDER BY chunk_id",
        )?;
        let mut rows = stmt.query([])?;
        let mut chunks = Vec::new();
        while let Some(row) = rows.next()? {
            chunks.push(chunk_from_row(row)?);
        }
        Ok(chunks)
    }

    /// Build provenance, if recorded
    pub fn metadata(&self) -> Result<Option<BuildMetadata>, StoreError> {
        let conn = self.pool.get()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM table_meta WHERE key = ?1",
                params![BUILD_KEY],
                |row| row.get(0),
            )
            .optional()?;

        value
            .map(|v| serde_json::from_str(&v).map_err(|e| StoreError::InvalidValue(e.to_string())))
            .transpose()
    }
}

fn fetch_chunk(conn: &rusqlite::Connection, id: u64) -> Result<Chunk, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT chunk_id, embed_text, display_text, start_time, end_time, speakers
         FROM chunks WHERE chunk_id = ?1",
    )?;
    let mut rows = stmt.query(params![to_sql_id(id)?])?;
    match rows.next()? {
        Some(row) => chunk_from_row(row),
        None => Err(StoreError::InvalidValue(format!(
            "indexed chunk {} has no row",
            id
        ))),
    }
}

fn chunk_from_row(row: &rusqlite::Row<'_>) -> Result<Chunk, StoreError> {
    let speakers: String = row.get(5)?;
    Ok(Chunk {
        chunk_id: from_sql_id(row.get(0)?)?,
        embed_text: row.get(1)?,
        display_text: row.get(2)?,
        start_time: row.get(3)?,
        end_time: row.get(4)?,
        speakers: serde_json::from_str(&speakers)
            .map_err(|e| StoreError::InvalidValue(format!("speakers: {}", e)))?,
    })
}

fn encode_speakers(speakers: &[String]) -> Result<String, StoreError> {
    serde_json::to_string(speakers).map_err(|e| StoreError::InvalidValue(e.to_string()))
}

fn to_sql_id(id: u64) -> Result<i64, StoreError> {
    i64::try_from(id).map_err(|_| StoreError::InvalidValue(format!("chunk_id {} out of range", id)))
}

fn from_sql_id(id: i64) -> Result<u64, StoreError> {
    u64::try_from(id).map_err(|_| StoreError::InvalidValue(format!("negative chunk_id {}", id)))
}

#[cfg(test)]
mod tests {
    use super::super::tests::{chunk, metadata};
    use super::*;
    use tempfile::TempDir;

    fn table(temp: &TempDir) -> ChunkTable {
        let rows = vec![
            IndexRow {
                chunk: chunk(0, 0.0, 15.0, "the quarterly roadmap review"),
                vector: vec![1.0, 0.0],
            },
            IndexRow {
                chunk: chunk(1, 10.0, 25.0, "hiring plan for the platform team"),
                vector: vec![0.0, 1.0],
            },
            IndexRow {
                chunk: chunk(2, 20.0, 35.0, "roadmap dates slipped"),
                vector: vec![0.7, 0.7],
            },
        ];
        ChunkTable::create(
            "chunks",
            temp.path().join("chunks.sqlite"),
            temp.path().join("chunks.fts"),
            &rows,
            &metadata(),
            HnswParams::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_vector_search_order() {
        let temp = TempDir::new().unwrap();
        let table = table(&temp);

        let hits = table.search(&[1.0, 0.0], 3).unwrap();
        let ids: Vec<u64> = hits.iter().map(|h| h.chunk.chunk_id).collect();
        assert_eq!(ids, vec![0, 2, 1]);
        assert!(hits[0].distance < 1e-5);
    }

    #[test]
    fn test_search_text_requires_index() {
        let temp = TempDir::new().unwrap();
        let table = table(&temp);

        assert!(matches!(
            table.search_text("roadmap", 5),
            Err(StoreError::NoKeywordIndex(_))
        ));

        table.create_fts_index("text").unwrap();
        let hits = table.search_text("roadmap", 5).unwrap();
        let mut ids: Vec<u64> = hits.iter().map(|h| h.chunk.chunk_id).collect();
        ids.sort();
        assert_eq!(ids, vec![0, 2]);
    }

    #[test]
    fn test_fts_unsupported_field() {
        let temp = TempDir::new().unwrap();
        let table = table(&temp);
        assert!(matches!(
            table.create_fts_index("speakers"),
            Err(StoreError::UnsupportedField(_))
        ));
    }

    #[test]
    fn test_failed_fts_build_leaves_no_index() {
        let temp = TempDir::new().unwrap();
        let table = table(&temp);

        assert!(table.create_fts_index_with_heap("text", 1_000).is_err());
        assert!(!table.has_keyword_index());
        assert!(!temp.path().join("chunks.fts").exists());
        assert_eq!(table.search(&[1.0, 0.0], 1).unwrap().len(), 1);
    }

    #[test]
    fn test_dimension_mismatch() {
        let temp = TempDir::new().unwrap();
        let rows = vec![
            IndexRow {
                chunk: chunk(0, 0.0, 1.0, "a"),
                vector: vec![1.0, 0.0],
            },
            IndexRow {
                chunk: chunk(1, 1.0, 2.0, "b"),
                vector: vec![1.0],
            },
        ];
        let result = ChunkTable::create(
            "chunks",
            temp.path().join("chunks.sqlite"),
            temp.path().join("chunks.fts"),
            &rows,
            &metadata(),
            HnswParams::default(),
        );
        assert!(matches!(
            result,
            Err(StoreError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_chunks_and_count() {
        let temp = TempDir::new().unwrap();
        let table = table(&temp);
        assert_eq!(table.count_rows().unwrap(), 3);

        let chunks = table.chunks().unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].embed_text, "Alice: roadmap dates slipped");
    }
}
