//! Integration tests for building index artifacts.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{CountingProvider, FailingProvider, FlakyProvider, SlowProvider, instant_retry, write_files};
use persona_rag::{
    ChunkingStrategy, Document, DocumentFormat, EmbeddingBackend, EmbeddingConfig, HashingEmbeddingProvider,
    IndexArtifact, Indexer, RagConfig, RagError, Retriever, write_degraded_index,
};

const PERSONA: &[(&str, &str)] = &[
    ("about.md", "Marco builds voice agents. He has 5 years of experience."),
    ("hobbies/sailing.md", "On weekends Marco sails along the coast.\n\nHe also plays chess with friends."),
    ("notes.txt", "not matched by the pattern"),
];

fn config(index: &std::path::Path) -> RagConfig {
    RagConfig::builder()
        .index_path(index)
        .chunk_size(64)
        .chunk_overlap(8)
        .build_retry(instant_retry(0))
        .build()
        .unwrap()
}

fn chunk_ids(artifact: &IndexArtifact) -> Vec<String> {
    artifact.entries.iter().map(|e| e.chunk.id.clone()).collect()
}

#[tokio::test]
async fn builds_and_reports_counts() {
    let source = tempfile::tempdir().unwrap();
    let index = tempfile::tempdir().unwrap();
    write_files(source.path(), PERSONA);

    let config = config(index.path());
    let report = Indexer::new(&config, Arc::new(HashingEmbeddingProvider::new(128)))
        .build(source.path(), "*.md", index.path())
        .await
        .unwrap();

    assert_eq!(report.documents_indexed, 2);
    assert_eq!(report.files_skipped, 0);
    assert_eq!(report.chunks_skipped, 0);
    assert!(report.chunks_indexed >= 2);
    assert!(!report.degraded);
    assert_eq!(report.path, config.table_path());

    let artifact = IndexArtifact::read(&report.path).unwrap().unwrap();
    assert_eq!(artifact.manifest.embedding_model, "hashing-fnv1a-128");
    assert_eq!(artifact.manifest.dimensions, 128);
    assert_eq!(artifact.manifest.entry_count, report.chunks_indexed);
    assert_eq!(artifact.manifest.chunk_size, 64);
    assert!(artifact.entries.iter().all(|e| !e.chunk.source_id.ends_with(".txt")));
    assert_eq!(artifact.entries[0].chunk.id, "about.md#0");
}

#[tokio::test]
async fn unreadable_sources_still_produce_an_empty_index() {
    let source = tempfile::tempdir().unwrap();
    let index = tempfile::tempdir().unwrap();
    std::fs::write(source.path().join("a.md"), [0xffu8, 0xfe, 0xfd]).unwrap();
    std::fs::write(source.path().join("b.md"), [0xc3u8, 0x28]).unwrap();

    let config = config(index.path());
    let provider = Arc::new(CountingProvider::new(32));
    let report = Indexer::new(&config, provider.clone()).build(source.path(), "*.md", index.path()).await.unwrap();

    assert_eq!(report.files_skipped, 2);
    assert_eq!(report.chunks_indexed, 0);
    assert!(report.degraded);
    assert_eq!(provider.calls(), 0);

    let retriever = Retriever::open(&config, Arc::new(HashingEmbeddingProvider::new(32))).unwrap();
    assert!(retriever.is_empty());
    assert!(retriever.manifest().is_some_and(|m| m.degraded));
    assert!(retriever.retrieve("does anything come back at all", 3, 0.0).await.unwrap().is_empty());
}

#[tokio::test]
async fn failing_provider_degrades_instead_of_failing() {
    let source = tempfile::tempdir().unwrap();
    let index = tempfile::tempdir().unwrap();
    write_files(source.path(), PERSONA);

    let config = RagConfig::builder().index_path(index.path()).build_retry(instant_retry(2)).build().unwrap();
    let provider = Arc::new(FailingProvider::impersonating(16));
    let report = Indexer::new(&config, provider.clone()).build(source.path(), "*.md", index.path()).await.unwrap();

    assert_eq!(report.chunks_indexed, 0);
    assert_eq!(report.chunks_skipped, 2);
    assert!(report.degraded);
    // Two chunks, three attempts each.
    assert_eq!(provider.calls(), 6);

    let artifact = IndexArtifact::read(&report.path).unwrap().unwrap();
    assert!(artifact.entries.is_empty());
    assert_eq!(artifact.manifest.dimensions, 16);
}

#[tokio::test]
async fn rejected_requests_fail_each_chunk_once() {
    let source = tempfile::tempdir().unwrap();
    let index = tempfile::tempdir().unwrap();
    write_files(source.path(), PERSONA);

    let config = RagConfig::builder().index_path(index.path()).build_retry(instant_retry(3)).build().unwrap();
    let provider = Arc::new(FailingProvider::rejecting(16));
    let report = Indexer::new(&config, provider.clone()).build(source.path(), "*.md", index.path()).await.unwrap();

    assert_eq!(report.chunks_indexed, 0);
    assert_eq!(report.chunks_skipped, 2);
    assert!(report.degraded);
    assert!(!report.timed_out);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn unavailable_provider_still_ships_an_empty_index() {
    let source = tempfile::tempdir().unwrap();
    let index = tempfile::tempdir().unwrap();
    write_files(source.path(), PERSONA);

    let config = RagConfig::builder()
        .index_path(index.path())
        .embedding(EmbeddingConfig { backend: EmbeddingBackend::Hashing, model: None, dimensions: Some(48) })
        .build()
        .unwrap();
    let cause = RagError::EmbeddingUnavailable { provider: "FastEmbed".into(), message: "model host unreachable".into() };
    let report = write_degraded_index(&config, source.path(), "*.md", index.path(), &cause).unwrap();

    assert!(report.degraded);
    assert_eq!(report.chunks_indexed, 0);
    assert_eq!(report.chunks_skipped, 2);

    let artifact = IndexArtifact::read(&report.path).unwrap().unwrap();
    assert!(artifact.entries.is_empty());
    assert!(artifact.manifest.degraded);
    assert_eq!(artifact.manifest.embedding_model, "hashing-fnv1a-48");
    assert_eq!(artifact.manifest.dimensions, 48);

    let provider = Arc::new(HashingEmbeddingProvider::new(48));
    let retriever = Retriever::open(&config, provider.clone()).unwrap();
    assert!(retriever.retrieve_default("what does Marco build").await.unwrap().is_empty());

    let rebuilt = Indexer::new(&config, provider).build(source.path(), "*.md", index.path()).await.unwrap();
    assert!(!rebuilt.degraded);
    assert_eq!(rebuilt.chunks_indexed, 2);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let source = tempfile::tempdir().unwrap();
    let index = tempfile::tempdir().unwrap();
    write_files(source.path(), PERSONA);

    let config = RagConfig::builder().index_path(index.path()).build_retry(instant_retry(3)).build().unwrap();
    let provider = Arc::new(FlakyProvider::new(32, 2));
    let report = Indexer::new(&config, provider.clone()).build(source.path(), "*.md", index.path()).await.unwrap();

    assert_eq!(report.chunks_indexed, 2);
    assert!(!report.degraded);
    assert_eq!(provider.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn build_deadline_skips_pending_chunks() {
    let source = tempfile::tempdir().unwrap();
    let index = tempfile::tempdir().unwrap();
    write_files(source.path(), PERSONA);

    let config = RagConfig::builder()
        .index_path(index.path())
        .build_timeout(Duration::from_secs(1))
        .build_retry(instant_retry(0))
        .build()
        .unwrap();
    let provider = Arc::new(SlowProvider::new(32, Duration::from_secs(60)));
    let report = Indexer::new(&config, provider).build(source.path(), "*.md", index.path()).await.unwrap();

    assert!(report.timed_out);
    assert!(report.degraded);
    assert_eq!(report.chunks_indexed, 0);
    assert!(IndexArtifact::read(&report.path).unwrap().is_some());
}

#[tokio::test]
async fn rebuilding_is_idempotent() {
    let source = tempfile::tempdir().unwrap();
    let index = tempfile::tempdir().unwrap();
    write_files(source.path(), PERSONA);

    let config = config(index.path());
    let indexer = Indexer::new(&config, Arc::new(HashingEmbeddingProvider::new(64)));
    let first = indexer.build(source.path(), "*.md", index.path()).await.unwrap();
    let first = IndexArtifact::read(&first.path).unwrap().unwrap();
    let second = indexer.build(source.path(), "*.md", index.path()).await.unwrap();
    let second = IndexArtifact::read(&second.path).unwrap().unwrap();

    assert_eq!(chunk_ids(&first), chunk_ids(&second));
    assert_eq!(first.entries, second.entries);
}

#[tokio::test]
async fn rebuild_replaces_previous_table() {
    let source = tempfile::tempdir().unwrap();
    let index = tempfile::tempdir().unwrap();
    write_files(source.path(), PERSONA);

    let config = config(index.path());
    let indexer = Indexer::new(&config, Arc::new(HashingEmbeddingProvider::new(64)));
    indexer.build(source.path(), "*.md", index.path()).await.unwrap();

    std::fs::remove_dir_all(source.path().join("hobbies")).unwrap();
    let report = indexer.build(source.path(), "*.md", index.path()).await.unwrap();

    let artifact = IndexArtifact::read(&report.path).unwrap().unwrap();
    assert!(artifact.entries.iter().all(|e| e.chunk.source_id == "about.md"));
    let files: Vec<_> = std::fs::read_dir(index.path()).unwrap().map(|e| e.unwrap().file_name().to_string_lossy().into_owned()).collect();
    assert_eq!(files, ["documents.json"]);
}

#[tokio::test]
async fn concurrent_embedding_keeps_chunk_order() {
    let text = "Sentence number one is here. ".repeat(40);
    let documents = vec![
        Document::new("b.txt", text.clone(), DocumentFormat::Plain),
        Document::new("a.txt", text, DocumentFormat::Plain),
    ];

    let sequential_dir = tempfile::tempdir().unwrap();
    let parallel_dir = tempfile::tempdir().unwrap();
    let base = RagConfig::builder().chunk_size(100).chunk_overlap(10);

    let sequential = base.clone().index_path(sequential_dir.path()).build().unwrap();
    let parallel = base.index_path(parallel_dir.path()).embed_concurrency(8).build().unwrap();
    let provider = Arc::new(HashingEmbeddingProvider::new(64));

    let s = Indexer::new(&sequential, provider.clone())
        .build_from_documents(&documents, sequential_dir.path())
        .await
        .unwrap();
    let p = Indexer::new(&parallel, provider).build_from_documents(&documents, parallel_dir.path()).await.unwrap();

    let s = IndexArtifact::read(&s.path).unwrap().unwrap();
    let p = IndexArtifact::read(&p.path).unwrap().unwrap();
    assert_eq!(s.entries, p.entries);
    assert_eq!(p.entries[0].chunk.id, "a.txt#0");
    let ordinals: Vec<_> = p.entries.iter().filter(|e| e.chunk.source_id == "a.txt").map(|e| e.chunk.ordinal).collect();
    assert_eq!(ordinals, (0..ordinals.len()).collect::<Vec<_>>());
}

#[tokio::test]
async fn markdown_strategy_records_heading_paths() {
    let source = tempfile::tempdir().unwrap();
    let index = tempfile::tempdir().unwrap();
    write_files(source.path(), &[("persona.md", "# Marco\n\n## Career\nVoice agents since 2019.\n\n## Family\nTwo sisters.\n")]);

    let config = RagConfig::builder().index_path(index.path()).chunking(ChunkingStrategy::Markdown).build().unwrap();
    let report = Indexer::new(&config, Arc::new(HashingEmbeddingProvider::new(32)))
        .build(source.path(), "*.md", index.path())
        .await
        .unwrap();

    let artifact = IndexArtifact::read(&report.path).unwrap().unwrap();
    let paths: Vec<_> = artifact.entries.iter().map(|e| e.chunk.metadata["header_path"].clone()).collect();
    assert_eq!(paths, ["Marco > Career", "Marco > Family"]);
}

#[tokio::test]
async fn missing_source_directory_is_a_config_error() {
    let index = tempfile::tempdir().unwrap();
    let config = config(index.path());
    let err = Indexer::new(&config, Arc::new(HashingEmbeddingProvider::new(32)))
        .build(&index.path().join("missing"), "*.md", index.path())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::ConfigError(_)));
    assert!(!config.table_path().exists());
}
