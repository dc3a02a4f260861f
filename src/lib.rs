//! meetrag - Retrieval over timestamped meeting transcripts
//!
//! Parses a recording's transcript into speaker turns, groups them into
//! overlapping time windows, embeds and indexes those windows, and answers
//! free-text queries with a hybrid vector + keyword search that avoids
//! returning several chunks covering the same moment.

pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod rag;
pub mod retrieval;
pub mod retry;
pub mod storage;
pub mod transcript;

pub use error::{BuildError, RagError, Result};
pub use rag::TranscriptRag;
