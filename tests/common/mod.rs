//! Shared fixtures for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use meetrag::config::Config;
use meetrag::embedding::{DetectedProvider, EmbeddingError, EmbeddingProvider};
use meetrag::TranscriptRag;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Deterministic embedding provider.
///
/// Queries always embed to the origin. Chunks mentioning "budget" sit at
/// distance 1 from it (similarity 0.5); everything else is ~1000 away and
/// falls under the similarity floor.
pub struct FakeProvider {
    pub available: AtomicBool,
    pub model_ready: AtomicBool,
    pub fail_embed: AtomicBool,
    pub drop_one: AtomicBool,
    pub batch_calls: AtomicUsize,
    pub batch_delay: Duration,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            model_ready: AtomicBool::new(true),
            fail_embed: AtomicBool::new(false),
            drop_one: AtomicBool::new(false),
            batch_calls: AtomicUsize::new(0),
            batch_delay: Duration::ZERO,
        }
    }

    pub fn with_batch_delay(delay: Duration) -> Self {
        Self {
            batch_delay: delay,
            ..Self::new()
        }
    }

    pub fn vector_for(text: &str) -> Vec<f32> {
        if text.contains("budget") {
            vec![1.0, 0.0, 0.0, 0.0]
        } else {
            vec![1000.0, text.len() as f32 * 0.01, 0.0, 0.0]
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FakeProvider {
    async fn detect(&self) -> Option<DetectedProvider> {
        self.available
            .load(Ordering::SeqCst)
            .then(DetectedProvider::local)
    }

    async fn ensure_model(&self, _provider: &DetectedProvider) -> bool {
        self.model_ready.load(Ordering::SeqCst)
    }

    async fn embed(
        &self,
        _text: &str,
        _provider: &DetectedProvider,
    ) -> Result<Vec<f32>, EmbeddingError> {
        if self.fail_embed.load(Ordering::SeqCst) {
            return Err(EmbeddingError::GenerationError("fake failure".to_string()));
        }
        Ok(vec![0.0; 4])
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        _provider: &DetectedProvider,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if !self.batch_delay.is_zero() {
            tokio::time::sleep(self.batch_delay).await;
        }
        if self.fail_embed.load(Ordering::SeqCst) {
            return Err(EmbeddingError::GenerationError("fake failure".to_string()));
        }

        let mut vectors: Vec<Vec<f32>> = texts.iter().map(|t| Self::vector_for(t)).collect();
        if self.drop_one.load(Ordering::SeqCst) {
            vectors.pop();
        }
        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        "fake-embed"
    }
}

pub fn rag_with(provider: &Arc<FakeProvider>) -> TranscriptRag {
    rag_with_config(provider, Config::default())
}

pub fn rag_with_config(provider: &Arc<FakeProvider>, config: Config) -> TranscriptRag {
    let provider: Arc<dyn EmbeddingProvider> = Arc::clone(provider) as Arc<dyn EmbeddingProvider>;
    TranscriptRag::new(config, provider).unwrap()
}

const FILLER: &str = "and then we walked through the remaining items on the list, \
    checked who is on point for each of them, and agreed to follow up in the channel afterwards";

/// Topic mentioned by the utterance at `index`, if any
fn topic(index: usize) -> Option<&'static str> {
    match index {
        10 | 11 => Some("the budget for next quarter needs another review"),
        40 => Some("we should book the offsite venue before it fills up"),
        _ => None,
    }
}

/// Sixty 10-second turns; long enough to pass the default length threshold
pub fn meeting_transcript() -> String {
    let speakers = ["Alice", "Bob", "Carol"];
    let mut out = String::from("Meeting transcript\n\n");

    for i in 0..60 {
        let start = i * 10;
        let end = start + 10;
        out.push_str(&format!(
            "[{} - {}] ● {}:\n",
            clock(start),
            clock(end),
            speakers[i % speakers.len()]
        ));
        match topic(i) {
            Some(topic) => out.push_str(&format!("    Point {}: {}, {}\n\n", i, topic, FILLER)),
            None => out.push_str(&format!("    Point {}: {}\n\n", i, FILLER)),
        }
    }

    out
}

fn clock(seconds: usize) -> String {
    format!(
        "{}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

pub fn write_transcript(recording: &Path, content: &str) {
    let dir = recording.join("analysis");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("transcript.txt"), content).unwrap();
}

pub fn index_dir(recording: &Path) -> std::path::PathBuf {
    recording.join("analysis").join("vectordb")
}
