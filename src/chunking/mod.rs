//! Temporal chunking of utterances
//!
//! Groups utterances into overlapping fixed-length time windows. Each
//! non-empty window becomes one [`Chunk`], the unit that gets embedded,
//! indexed and returned by search.

use crate::config::ChunkingConfig;
use crate::transcript::Utterance;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Marker appended to truncated embedding text
pub const ELLIPSIS: &str = "...";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChunkConfigError {
    #[error("window_seconds must be a positive finite number, got {0}")]
    InvalidWindow(f64),

    #[error("overlap_seconds must be a non-negative finite number, got {0}")]
    InvalidOverlap(f64),

    #[error("overlap_seconds ({overlap}) must be strictly less than window_seconds ({window})")]
    OverlapNotLessThanWindow { window: f64, overlap: f64 },

    #[error("embed_char_limit must be greater than 0")]
    ZeroCharLimit,
}

/// A time-windowed group of utterances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub chunk_id: u64,
    /// `speaker: text` lines, capped at the builder's char limit
    pub embed_text: String,
    /// Original timestamped transcript text, never truncated
    pub display_text: String,
    pub start_time: f64,
    pub end_time: f64,
    /// Distinct speakers in first-occurrence order
    pub speakers: Vec<String>,
}

impl Chunk {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// Half-open time window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start: f64,
    pub end: f64,
}

impl TimeWindow {
    fn selects(&self, utterance: &Utterance) -> bool {
        utterance.end_time > self.start && utterance.start_time < self.end
    }
}

/// Builds overlapping chunks from parsed utterances
#[derive(Debug, Clone)]
pub struct ChunkBuilder {
    window_seconds: f64,
    overlap_seconds: f64,
    embed_char_limit: usize,
}

impl Default for ChunkBuilder {
    fn default() -> Self {
        Self {
            window_seconds: 15.0,
            overlap_seconds: 5.0,
            embed_char_limit: 1500,
        }
    }
}

impl ChunkBuilder {
    /// Create a builder, rejecting configurations that could not advance
    pub fn new(
        window_seconds: f64,
        overlap_seconds: f64,
        embed_char_limit: usize,
    ) -> Result<Self, ChunkConfigError> {
        if !window_seconds.is_finite() || window_seconds <= 0.0 {
            return Err(ChunkConfigError::InvalidWindow(window_seconds));
        }
        if !overlap_seconds.is_finite() || overlap_seconds < 0.0 {
            return Err(ChunkConfigError::InvalidOverlap(overlap_seconds));
        }
        if overlap_seconds >= window_seconds {
            return Err(ChunkConfigError::OverlapNotLessThanWindow {
                window: window_seconds,
                overlap: overlap_seconds,
            });
        }
        if embed_char_limit == 0 {
            return Err(ChunkConfigError::ZeroCharLimit);
        }

        Ok(Self {
            window_seconds,
            overlap_seconds,
            embed_char_limit,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self, ChunkConfigError> {
        Self::new(
            config.window_seconds,
            config.overlap_seconds,
            config.embed_char_limit,
        )
    }

    /// Distance between consecutive window starts
    pub fn step(&self) -> f64 {
        self.window_seconds - self.overlap_seconds
    }

    /// Window schedule for the given utterances.
    ///
    /// Starts at the first utterance's start and continues while the window
    /// start is before the last utterance's end.
    pub fn windows(&self, utterances: &[Utterance]) -> Vec<TimeWindow> {
        let (Some(first), Some(last)) = (utterances.first(), utterances.last()) else {
            return Vec::new();
        };

        let origin = first.start_time;
        let step = self.step();
        let mut windows = Vec::new();

        for n in 0u64.. {
            let start = origin + n as f64 * step;
            if start >= last.end_time {
                break;
            }
            windows.push(TimeWindow {
                start,
                end: start + self.window_seconds,
            });
        }

        windows
    }

    /// Build chunks; ids are assigned sequentially to non-empty windows only
    pub fn build(&self, utterances: &[Utterance]) -> Vec<Chunk> {
        let mut chunks = Vec::new();

        for window in self.windows(utterances) {
            let selected: Vec<&Utterance> =
                utterances.iter().filter(|u| window.selects(u)).collect();

            if selected.is_empty() {
                continue;
            }

            let chunk_id = chunks.len() as u64;
            chunks.push(self.assemble(chunk_id, &selected));
        }

        chunks
    }

    fn assemble(&self, chunk_id: u64, selected: &[&Utterance]) -> Chunk {
        let full_text = selected
            .iter()
            .map(|u| format!("{}: {}", u.speaker, u.text))
            .collect::<Vec<_>>()
            .join("\n");

        let display_text = selected
            .iter()
            .map(|u| u.raw_text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let mut speakers: Vec<String> = Vec::new();
        for u in selected {
            if !speakers.iter().any(|s| s == &u.speaker) {
                speakers.push(u.speaker.clone());
            }
        }

        let start_time = selected
            .iter()
            .map(|u| u.start_time)
            .fold(f64::INFINITY, f64::min);
        let end_time = selected
            .iter()
            .map(|u| u.end_time)
            .fold(f64::NEG_INFINITY, f64::max);

        Chunk {
            chunk_id,
            embed_text: truncate_chars(&full_text, self.embed_char_limit),
            display_text,
            start_time,
            end_time,
            speakers,
        }
    }
}

/// Cut `text` to `limit` characters, marking the cut with [`ELLIPSIS`]
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => format!("{}{}", &text[..byte_idx], ELLIPSIS),
        None => text.to_string(),
    }
}
