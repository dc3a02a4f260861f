//! Score fusion for vector and keyword hits

use crate::config::RetrievalConfig;
use crate::retrieval::ScoredChunk;
use crate::storage::{KeywordHit, VectorHit};
use ahash::AHashMap;

/// Configuration for fusion algorithm
#[derive(Debug, Clone, PartialEq)]
pub struct FusionConfig {
    /// Vector hits scoring below this are dropped
    pub min_vector_score: f32,

    /// Multiplier for chunks found by both searches (result capped at 1.0)
    pub keyword_boost: f32,

    /// Score for chunks only the keyword search found
    pub keyword_only_score: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            min_vector_score: 0.01,
            keyword_boost: 1.5,
            keyword_only_score: 0.8,
        }
    }
}

impl From<&RetrievalConfig> for FusionConfig {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            min_vector_score: config.min_vector_score,
            keyword_boost: config.keyword_boost,
            keyword_only_score: config.keyword_only_score,
        }
    }
}

/// Similarity in (0, 1] for a vector distance
pub fn distance_to_score(distance: f32) -> f32 {
    1.0 / (1.0 + distance)
}

/// Merge vector and keyword hits into one ranked candidate list
///
/// # Returns
/// Candidates sorted by score descending, ties broken by ascending chunk_id
pub fn fuse_results(
    vector_hits: Vec<VectorHit>,
    keyword_hits: Vec<KeywordHit>,
    config: &FusionConfig,
) -> Vec<ScoredChunk> {
    let mut candidates: Vec<ScoredChunk> = Vec::with_capacity(vector_hits.len());
    let mut positions: AHashMap<u64, usize> = AHashMap::new();

    for hit in vector_hits {
        let score = distance_to_score(hit.distance);
        if score < config.min_vector_score || positions.contains_key(&hit.chunk.chunk_id) {
            continue;
        }
        positions.insert(hit.chunk.chunk_id, candidates.len());
        candidates.push(ScoredChunk::new(hit.chunk, score));
    }

    for hit in keyword_hits {
        match positions.get(&hit.chunk.chunk_id) {
            Some(&pos) => {
                let boosted = candidates[pos].score * config.keyword_boost;
                candidates[pos].score = boosted.min(1.0);
            }
            None => {
                positions.insert(hit.chunk.chunk_id, candidates.len());
                candidates.push(ScoredChunk::new(hit.chunk, config.keyword_only_score));
            }
        }
    }

    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
    });

    candidates
}
