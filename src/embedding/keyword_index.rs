/// Tantivy keyword index for full-text search over chunk text
use std::path::Path;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, ReloadPolicy, TantivyError};
use thiserror::Error;

/// Writer heap for the one-shot build
pub const DEFAULT_WRITER_HEAP_BYTES: usize = 50_000_000;

/// Smallest writer heap tantivy accepts
pub const MIN_WRITER_HEAP_BYTES: usize = 15_000_000;

#[derive(Error, Debug)]
pub enum KeywordIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Tantivy error: {0}")]
    TantivyError(#[from] TantivyError),
}

/// Search result with chunk ID and BM25 score
#[derive(Debug, Clone)]
pub struct KeywordSearchResult {
    pub id: u64,
    pub score: f32,
}

/// Tantivy keyword index wrapper
///
/// Written once when a table is built, then opened read-only.
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    id_field: Field,
    text_field: Field,
}

impl KeywordIndex {
    /// Create a new index at `index_path` holding `items`
    ///
    /// # Arguments
    /// * `index_path` - Directory to store the index (must not hold an index yet)
    /// * `items` - (chunk_id, text) pairs
    pub fn create(index_path: &Path, items: &[(u64, &str)]) -> Result<Self, KeywordIndexError> {
        Self::create_with_heap(index_path, items, DEFAULT_WRITER_HEAP_BYTES)
    }

    /// Like [`KeywordIndex::create`] with an explicit writer memory budget
    pub fn create_with_heap(
        index_path: &Path,
        items: &[(u64, &str)],
        heap_bytes: usize,
    ) -> Result<Self, KeywordIndexError> {
        std::fs::create_dir_all(index_path)?;

        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_u64_field("chunk_id", INDEXED | STORED);
        let text_field = schema_builder.add_text_field("text", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_dir(index_path, schema)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        {
            let mut writer: tantivy::IndexWriter = index
                .writer(heap_bytes)
                .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

            for (id, text) in items {
                writer
                    .add_document(doc!(
                        id_field => *id,
                        text_field => *text,
                    ))
                    .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;
            }

            writer
                .commit()
                .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;
            writer
                .wait_merging_threads()
                .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;
        }

        Self::from_index(index)
    }

    /// Open an existing index
    pub fn open(index_path: &Path) -> Result<Self, KeywordIndexError> {
        if !index_path.join("meta.json").exists() {
            return Err(KeywordIndexError::IndexNotFound(
                index_path.display().to_string(),
            ));
        }

        let index = Index::open_in_dir(index_path)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        Self::from_index(index)
    }

    fn from_index(index: Index) -> Result<Self, KeywordIndexError> {
        let schema = index.schema();

        let id_field = schema.get_field("chunk_id").map_err(|_| {
            KeywordIndexError::InitializationError("Missing 'chunk_id' field in schema".to_string())
        })?;
        let text_field = schema.get_field("text").map_err(|_| {
            KeywordIndexError::InitializationError("Missing 'text' field in schema".to_string())
        })?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            id_field,
            text_field,
        })
    }

    /// Search the index
    ///
    /// Query syntax errors are tolerated: whatever parses is searched.
    ///
    /// # Returns
    /// Vector of search results sorted by relevance
    pub fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<KeywordSearchResult>, KeywordIndexError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let (query, errors) = query_parser.parse_query_lenient(query);
        if !errors.is_empty() {
            tracing::debug!("Keyword query parsed with {} errors", errors.len());
        }

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved_doc: tantivy::TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

            let id = retrieved_doc
                .get_first(self.id_field)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| {
                    KeywordIndexError::SearchError("Missing or invalid chunk_id field".to_string())
                })?;

            results.push(KeywordSearchResult { id, score });
        }

        Ok(results)
    }

    /// Get the number of documents in the index
    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(dir: &Path) -> KeywordIndex {
        KeywordIndex::create(
            dir,
            &[
                (1, "We should migrate the billing service before March"),
                (2, "The billing dashboard is slow again"),
                (3, "Lunch is on Thursday"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_create_and_search() {
        let temp = TempDir::new().unwrap();
        let index = sample(&temp.path().join("fts"));
        assert_eq!(index.len(), 3);

        let results = index.search("billing", 10).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.id == 1 || r.id == 2));

        let results = index.search("lunch", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 3);
    }

    #[test]
    fn test_phrase_search() {
        let temp = TempDir::new().unwrap();
        let index = sample(&temp.path().join("fts"));

        let results = index.search("\"billing dashboard\"", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 2);
    }

    #[test]
    fn test_malformed_query_is_tolerated() {
        let temp = TempDir::new().unwrap();
        let index = sample(&temp.path().join("fts"));

        let results = index.search("billing AND (", 10).unwrap();
        assert!(!results.is_empty());
    }

    #[test]
    fn test_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("fts");
        drop(sample(&path));

        let index = KeywordIndex::open(&path).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.search("thursday", 5).unwrap()[0].id, 3);
    }

    #[test]
    fn test_heap_below_minimum_fails() {
        let temp = TempDir::new().unwrap();
        let result = KeywordIndex::create_with_heap(
            &temp.path().join("fts"),
            &[(1, "billing")],
            MIN_WRITER_HEAP_BYTES / 2,
        );
        assert!(matches!(
            result,
            Err(KeywordIndexError::InitializationError(_))
        ));
    }

    #[test]
    fn test_open_missing() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            KeywordIndex::open(&temp.path().join("nope")),
            Err(KeywordIndexError::IndexNotFound(_))
        ));
    }
}
