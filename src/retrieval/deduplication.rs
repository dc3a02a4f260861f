//! Temporal deduplication of ranked results

use crate::chunking::Chunk;
use crate::retrieval::ScoredChunk;

/// Seconds shared by the time ranges of two chunks
pub fn overlap_seconds(a: &Chunk, b: &Chunk) -> f64 {
    let start = a.start_time.max(b.start_time);
    let end = a.end_time.min(b.end_time);
    (end - start).max(0.0)
}

/// Keep the best-ranked chunks that do not mostly repeat each other
///
/// Walks `candidates` in order and keeps one only if its overlap with every
/// kept chunk is at most `max_overlap_ratio` of the shorter of the two
/// durations (a zero-length duration counts as one second). Stops after
/// `limit` chunks.
///
/// This is stricter than measuring against the candidate alone: a long
/// candidate that swallows a short kept chunk is dropped, so every pair of
/// kept chunks stays within the ratio whichever one came first.
///
/// # Arguments
/// * `candidates` - Scored chunks, best first
/// * `limit` - Maximum number of results
/// * `max_overlap_ratio` - Allowed overlap fraction (0.5 by default)
pub fn temporal_dedup(
    candidates: Vec<ScoredChunk>,
    limit: usize,
    max_overlap_ratio: f64,
) -> Vec<ScoredChunk> {
    let mut kept: Vec<ScoredChunk> = Vec::with_capacity(limit.min(candidates.len()));

    for candidate in candidates {
        if kept.len() >= limit {
            break;
        }

        let distinct = kept.iter().all(|k| {
            let shorter = candidate.chunk.duration().min(k.chunk.duration());
            let basis = if shorter > 0.0 { shorter } else { 1.0 };
            overlap_seconds(&candidate.chunk, &k.chunk) / basis <= max_overlap_ratio
        });

        if distinct {
            kept.push(candidate);
        }
    }

    kept
}
