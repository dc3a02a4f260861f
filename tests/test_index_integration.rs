//! Integration tests for index builds, status and deletion
//!
//! Uses a deterministic in-process embedding provider so the whole
//! parse -> chunk -> embed -> store pipeline runs without a model server.

mod common;

use common::{
    index_dir, meeting_transcript, rag_with, rag_with_config, write_transcript, FakeProvider,
};
use meetrag::config::Config;
use meetrag::index::IndexStatus;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[tokio::test]
async fn test_build_then_status_ready() {
    let temp = TempDir::new().unwrap();
    let transcript = meeting_transcript();
    write_transcript(temp.path(), &transcript);

    let provider = Arc::new(FakeProvider::new());
    let rag = rag_with(&provider);

    let before = rag.status(temp.path()).await;
    assert_eq!(before.status, IndexStatus::NotIndexed);
    assert!(!before.indexed);

    let report = rag.build_index(temp.path()).await;
    println!("Build report: {:?}", report);
    assert!(report.indexed);
    assert!(!report.skipped);
    assert!(report.error.is_none());
    assert!(report.chunk_count > 0);
    assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 1);

    let status = rag.status(temp.path()).await;
    assert_eq!(status.status, IndexStatus::Ready);
    assert!(status.indexed);
    assert_eq!(status.chunk_count, report.chunk_count);
    assert_eq!(
        status.fingerprint.as_deref(),
        Some(blake3::hash(transcript.as_bytes()).to_hex().as_str())
    );
    assert!(status.indexed_at.is_some());

    assert!(index_dir(temp.path()).join("chunks.sqlite").exists());
    assert!(index_dir(temp.path()).join("chunks.fts").exists());
}

#[tokio::test]
async fn test_rebuild_gives_same_chunk_count() {
    let temp = TempDir::new().unwrap();
    write_transcript(temp.path(), &meeting_transcript());

    let provider = Arc::new(FakeProvider::new());
    let rag = rag_with(&provider);

    let first = rag.build_index(temp.path()).await;
    let second = rag.build_index(temp.path()).await;

    assert!(first.indexed && second.indexed);
    assert_eq!(first.chunk_count, second.chunk_count);
    assert_eq!(rag.status(temp.path()).await.chunk_count, second.chunk_count);
}

#[tokio::test]
async fn test_chunk_count_matches_chunk_listing() {
    let temp = TempDir::new().unwrap();
    write_transcript(temp.path(), &meeting_transcript());

    let rag = rag_with(&Arc::new(FakeProvider::new()));
    let chunks = rag.chunks(temp.path()).await.unwrap();
    let report = rag.build_index(temp.path()).await;

    assert_eq!(report.chunk_count, chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_id, i as u64);
    }
}

#[tokio::test]
async fn test_short_transcript_is_skipped() {
    let temp = TempDir::new().unwrap();
    let mut transcript = String::from("[0:00:00 - 0:00:05] ● Alice:\n    ");
    while transcript.chars().count() < 500 {
        transcript.push_str("short sync. ");
    }
    write_transcript(temp.path(), &transcript);

    let provider = Arc::new(FakeProvider::new());
    let rag = rag_with(&provider);
    let report = rag.build_index(temp.path()).await;

    assert!(!report.indexed);
    assert!(report.skipped);
    assert_eq!(report.chunk_count, 0);
    assert!(report.error.is_none());

    // Nothing was embedded or written
    assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 0);
    assert!(!index_dir(temp.path()).exists());
    assert_eq!(
        rag.status(temp.path()).await.status,
        IndexStatus::SkippedTooShort
    );
}

#[tokio::test]
async fn test_missing_transcript_reports_error() {
    let temp = TempDir::new().unwrap();
    let rag = rag_with(&Arc::new(FakeProvider::new()));

    let report = rag.build_index(temp.path()).await;
    let error = report.error.unwrap();
    assert!(error.starts_with("transcript not found"), "{}", error);
    assert!(!report.indexed);

    let status = rag.status(temp.path()).await;
    assert_eq!(status.status, IndexStatus::Error);
    assert_eq!(status.last_error.as_deref(), Some(error.as_str()));
}

#[tokio::test]
async fn test_provider_unavailable_reports_error() {
    let temp = TempDir::new().unwrap();
    write_transcript(temp.path(), &meeting_transcript());

    let provider = Arc::new(FakeProvider::new());
    provider.available.store(false, Ordering::SeqCst);
    let rag = rag_with(&provider);

    let report = rag.build_index(temp.path()).await;
    assert!(report.error.unwrap().contains("no embedding provider"));
    assert_eq!(rag.status(temp.path()).await.status, IndexStatus::Error);
    assert!(!index_dir(temp.path()).exists());
}

#[tokio::test]
async fn test_model_not_ready_reports_error() {
    let temp = TempDir::new().unwrap();
    write_transcript(temp.path(), &meeting_transcript());

    let provider = Arc::new(FakeProvider::new());
    provider.model_ready.store(false, Ordering::SeqCst);
    let rag = rag_with(&provider);

    let report = rag.build_index(temp.path()).await;
    assert!(report.error.unwrap().contains("fake-embed"));
    assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_transcript_without_segments_reports_error() {
    let temp = TempDir::new().unwrap();
    let transcript = "no timestamps in this export at all. ".repeat(300);
    write_transcript(temp.path(), &transcript);

    let rag = rag_with(&Arc::new(FakeProvider::new()));
    let report = rag.build_index(temp.path()).await;

    assert_eq!(
        report.error.as_deref(),
        Some("no transcript segments could be parsed")
    );
    assert_eq!(rag.status(temp.path()).await.status, IndexStatus::Error);
}

#[tokio::test]
async fn test_embedding_count_mismatch_reports_error() {
    let temp = TempDir::new().unwrap();
    write_transcript(temp.path(), &meeting_transcript());

    let provider = Arc::new(FakeProvider::new());
    provider.drop_one.store(true, Ordering::SeqCst);
    let rag = rag_with(&provider);

    let report = rag.build_index(temp.path()).await;
    let error = report.error.unwrap();
    assert!(error.contains("embeddings, got"), "{}", error);
    assert!(!index_dir(temp.path()).exists());
}

#[tokio::test]
async fn test_failed_rebuild_keeps_previous_index() {
    let temp = TempDir::new().unwrap();
    write_transcript(temp.path(), &meeting_transcript());

    let provider = Arc::new(FakeProvider::new());
    let rag = rag_with(&provider);
    let first = rag.build_index(temp.path()).await;
    assert!(first.indexed);

    provider.fail_embed.store(true, Ordering::SeqCst);
    let second = rag.build_index(temp.path()).await;
    assert!(second.error.unwrap().starts_with("embedding failed"));
    assert_eq!(rag.status(temp.path()).await.status, IndexStatus::Error);

    // The failure happened before the replace step
    provider.fail_embed.store(false, Ordering::SeqCst);
    let results = rag.query(temp.path(), "budget", Some(5)).await.unwrap();
    assert!(!results.is_empty());
}

#[tokio::test]
async fn test_status_read_from_disk_in_new_instance() {
    let temp = TempDir::new().unwrap();
    write_transcript(temp.path(), &meeting_transcript());

    let provider = Arc::new(FakeProvider::new());
    let report = rag_with(&provider).build_index(temp.path()).await;

    let fresh = rag_with(&provider);
    let status = fresh.status(temp.path()).await;
    assert_eq!(status.status, IndexStatus::Ready);
    assert_eq!(status.chunk_count, report.chunk_count);
    assert!(status.fingerprint.is_some());
}

#[tokio::test]
async fn test_delete_without_index_is_noop() {
    let temp = TempDir::new().unwrap();
    let rag = rag_with(&Arc::new(FakeProvider::new()));

    rag.delete_index(temp.path()).await.unwrap();
    rag.delete_index(temp.path()).await.unwrap();
    assert_eq!(rag.status(temp.path()).await.status, IndexStatus::NotIndexed);
}

#[tokio::test]
async fn test_status_lifecycle() {
    let temp = TempDir::new().unwrap();
    write_transcript(temp.path(), &meeting_transcript());
    let rag = rag_with(&Arc::new(FakeProvider::new()));

    assert_eq!(rag.status(temp.path()).await.status, IndexStatus::NotIndexed);

    rag.build_index(temp.path()).await;
    assert_eq!(rag.status(temp.path()).await.status, IndexStatus::Ready);

    rag.delete_index(temp.path()).await.unwrap();
    let status = rag.status(temp.path()).await;
    assert_eq!(status.status, IndexStatus::NotIndexed);
    assert_eq!(status.chunk_count, 0);
    assert!(!index_dir(temp.path()).exists());

    let results = rag.query(temp.path(), "budget", None).await.unwrap();
    assert!(results.is_empty());

    // Rebuild after delete works through a fresh handle
    let report = rag.build_index(temp.path()).await;
    assert!(report.indexed);
    assert!(!rag.query(temp.path(), "budget", None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_supersedes_running_build() {
    let temp = TempDir::new().unwrap();
    write_transcript(temp.path(), &meeting_transcript());

    let provider = Arc::new(FakeProvider::with_batch_delay(Duration::from_millis(400)));
    let rag = Arc::new(rag_with(&provider));

    let builder = {
        let rag = Arc::clone(&rag);
        let recording = temp.path().to_path_buf();
        tokio::spawn(async move { rag.build_index(&recording).await })
    };

    // Let the build get as far as embedding
    while provider.batch_calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    rag.delete_index(temp.path()).await.unwrap();

    let report = builder.await.unwrap();
    println!("Superseded build: {:?}", report);
    assert!(!report.indexed);
    assert!(report.error.unwrap().contains("superseded"));

    assert!(!index_dir(temp.path()).exists());
    assert_eq!(rag.status(temp.path()).await.status, IndexStatus::NotIndexed);
}

#[tokio::test]
async fn test_concurrent_builds_are_serialized() {
    let temp = TempDir::new().unwrap();
    write_transcript(temp.path(), &meeting_transcript());

    let provider = Arc::new(FakeProvider::with_batch_delay(Duration::from_millis(50)));
    let rag = Arc::new(rag_with(&provider));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let rag = Arc::clone(&rag);
        let recording = temp.path().to_path_buf();
        handles.push(tokio::spawn(async move { rag.build_index(&recording).await }));
    }

    let mut counts = Vec::new();
    for handle in handles {
        let report = handle.await.unwrap();
        assert!(report.indexed, "{:?}", report);
        counts.push(report.chunk_count);
    }

    assert!(counts.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 3);
    assert_eq!(rag.status(temp.path()).await.chunk_count, counts[0]);
}

#[tokio::test]
async fn test_rebuild_replaces_content() {
    let temp = TempDir::new().unwrap();
    write_transcript(temp.path(), &meeting_transcript());

    let rag = rag_with(&Arc::new(FakeProvider::new()));
    rag.build_index(temp.path()).await;
    assert!(!rag.query(temp.path(), "offsite", None).await.unwrap().is_empty());

    let replaced = meeting_transcript().replace("offsite venue", "holiday party");
    write_transcript(temp.path(), &replaced);
    let report = rag.build_index(temp.path()).await;
    assert!(report.indexed);

    let offsite = rag.query(temp.path(), "offsite", None).await.unwrap();
    assert!(offsite.iter().all(|r| !r.chunk.embed_text.contains("offsite")));

    let party = rag.query(temp.path(), "holiday", None).await.unwrap();
    assert!(party[0].chunk.embed_text.contains("holiday party"));
    assert!((party[0].score - 0.8).abs() < 1e-6);
}

#[tokio::test]
async fn test_store_write_failure_exhausts_retries() {
    for attempts in [2u32, 4] {
        let temp = TempDir::new().unwrap();
        write_transcript(temp.path(), &meeting_transcript());

        // A regular file where the index directory belongs cannot be replaced
        let dir = index_dir(temp.path());
        std::fs::write(&dir, b"not a directory").unwrap();

        let mut config = Config::default();
        config.indexing.max_attempts = attempts;
        config.indexing.retry_backoff_ms = 40;
        let provider = Arc::new(FakeProvider::new());
        let rag = rag_with_config(&provider, config);

        rag.state().handle(&dir);
        assert!(rag.state().is_cached(&dir));

        let started = Instant::now();
        let report = rag.build_index(temp.path()).await;
        let elapsed = started.elapsed();
        println!("Failed build after {:?}: {:?}", elapsed, report);

        let error = report.error.clone().unwrap();
        assert!(!report.indexed);
        assert!(
            error.starts_with(&format!("index write failed after {} attempts:", attempts)),
            "{}",
            error
        );
        assert!(error.contains("Failed to remove"), "{}", error);

        // Linear backoff: 40ms * (1 + 2 + ... + attempts-1)
        let backoff: u64 = (1..attempts as u64).map(|n| 40 * n).sum();
        assert!(elapsed >= Duration::from_millis(backoff));

        assert!(!rag.state().is_cached(&dir));
        assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 1);

        let status = rag.status(temp.path()).await;
        assert_eq!(status.status, IndexStatus::Error);
        assert_eq!(status.last_error.as_deref(), Some(error.as_str()));

        let results = rag.query(temp.path(), "budget", Some(5)).await.unwrap();
        assert!(results.is_empty());
        assert!(dir.is_file());
    }
}

#[tokio::test]
async fn test_keyword_index_failure_does_not_fail_build() {
    let temp = TempDir::new().unwrap();
    write_transcript(temp.path(), &meeting_transcript());

    // Below tantivy's minimum writer budget
    let mut config = Config::default();
    config.indexing.keyword_writer_heap_bytes = 1_000;
    let provider = Arc::new(FakeProvider::new());
    let rag = rag_with_config(&provider, config);

    let report = rag.build_index(temp.path()).await;
    assert!(report.indexed, "{:?}", report);
    assert!(report.error.is_none());
    assert!(report.chunk_count > 0);

    assert!(index_dir(temp.path()).join("chunks.sqlite").exists());
    assert!(!index_dir(temp.path()).join("chunks.fts").exists());

    let status = rag.status(temp.path()).await;
    assert_eq!(status.status, IndexStatus::Ready);
    assert_eq!(status.chunk_count, report.chunk_count);

    let results = rag.query(temp.path(), "budget", Some(5)).await.unwrap();
    assert!(!results.is_empty());
    for r in &results {
        assert!((r.score - 0.5).abs() < 1e-6, "score {}", r.score);
    }
}

#[tokio::test]
async fn test_indexed_chunks_match_transcript_chunks() {
    let temp = TempDir::new().unwrap();
    write_transcript(temp.path(), &meeting_transcript());
    let rag = rag_with(&Arc::new(FakeProvider::new()));

    assert!(rag.indexed_chunks(temp.path()).await.unwrap().is_empty());

    rag.build_index(temp.path()).await;
    let stored = rag.indexed_chunks(temp.path()).await.unwrap();
    assert_eq!(stored, rag.chunks(temp.path()).await.unwrap());

    rag.delete_index(temp.path()).await.unwrap();
    assert!(rag.indexed_chunks(temp.path()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_deleted_recordings_are_not_tracked() {
    let provider = Arc::new(FakeProvider::new());
    let rag = rag_with(&provider);
    let temp = TempDir::new().unwrap();

    for i in 0..5 {
        let recording = temp.path().join(format!("rec-{}", i));
        write_transcript(&recording, &meeting_transcript());
        assert!(rag.build_index(&recording).await.indexed);
    }
    assert_eq!(rag.state().tracked(), 5);

    for i in 0..5 {
        let recording = temp.path().join(format!("rec-{}", i));
        rag.delete_index(&recording).await.unwrap();
        assert_eq!(rag.status(&recording).await.status, IndexStatus::NotIndexed);
    }
    assert_eq!(rag.state().tracked(), 0);
}
