/// HNSW vector index for nearest-neighbour search over chunk vectors
use hnsw_rs::prelude::*;
use thiserror::Error;

/// hnsw_rs refuses more layers than this
const MAX_LAYERS: usize = 16;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Non-finite value in vector {id}")]
    NonFinite { id: u64 },
}

/// Search result with ID and raw distance
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// ID of the item (the chunk_id)
    pub id: u64,
    /// Euclidean distance to the query (lower is closer)
    pub distance: f32,
}

/// HNSW vector index wrapper
///
/// Built in one pass from the stored vectors of a table; the graph lives in
/// memory only and is rebuilt whenever the table is opened.
pub struct VectorIndex {
    index: Hnsw<'static, f32, DistL2>,
    dimension: usize,
    count: usize,
}

impl VectorIndex {
    /// Build an index over `items`
    ///
    /// # Arguments
    /// * `dimension` - Vector dimension (every item must match)
    /// * `m` - HNSW M parameter (number of connections per layer)
    /// * `ef_construction` - HNSW construction parameter (higher = better recall, slower build)
    /// * `items` - (id, vector) pairs
    pub fn build(
        dimension: usize,
        m: usize,
        ef_construction: usize,
        items: &[(u64, Vec<f32>)],
    ) -> Result<Self, VectorIndexError> {
        for (id, vector) in items {
            if vector.len() != dimension {
                return Err(VectorIndexError::InvalidDimension {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(VectorIndexError::NonFinite { id: *id });
            }
        }

        let index = Hnsw::<f32, DistL2>::new(
            m.max(1),
            items.len().max(1),
            MAX_LAYERS,
            ef_construction.max(1),
            DistL2,
        );

        for (id, vector) in items {
            index.insert((vector.as_slice(), *id as usize));
        }

        Ok(Self {
            index,
            dimension,
            count: items.len(),
        })
    }

    /// Search for the k nearest neighbours
    ///
    /// # Returns
    /// Up to `k` results sorted by distance ascending
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
    ) -> Result<Vec<SearchResult>, VectorIndexError> {
        if query.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 || self.count == 0 {
            return Ok(Vec::new());
        }

        let mut results: Vec<SearchResult> = self
            .index
            .search(query, k, ef_search.max(k))
            .into_iter()
            .map(|neighbour| SearchResult {
                id: neighbour.d_id as u64,
                distance: neighbour.distance,
            })
            .collect();

        results.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
        results.truncate(k);

        Ok(results)
    }

    /// Get the number of vectors in the index
    pub fn len(&self) -> usize {
        self.count
    }

    /// Check if index is empty
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Get vector dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }
}
