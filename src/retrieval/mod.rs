//! Hybrid retrieval over a recording's chunk index
//!
//! Vector hits and keyword hits are fused into one score per chunk, sorted,
//! and then thinned out so no two returned chunks cover mostly the same
//! stretch of the meeting.

mod deduplication;
mod fusion;
mod hybrid;

pub use deduplication::{overlap_seconds, temporal_dedup};
pub use fusion::{distance_to_score, fuse_results, FusionConfig};
pub use hybrid::RetrievalEngine;

use crate::chunking::Chunk;
use serde::{Deserialize, Serialize};

/// A chunk returned by a query, with its final fused score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub score: f32,
}

impl ScoredChunk {
    pub fn new(chunk: Chunk, score: f32) -> Self {
        Self { chunk, score }
    }
}
