mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{GatedEmbedder, Harness};
use deedbox::app::App;
use deedbox::embedding::DisabledEmbedder;
use deedbox_core::generate::NO_RELEVANT_DOCUMENTS;
use deedbox_core::models::LocalState;
use deedbox_core::store::ChunkStore;
use deedbox_core::Error;

fn write_local(h: &Harness, path: &str, content: &str) {
    let full = h.local_file(path);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(full, content).unwrap();
}

fn long_lease(topic: &str, paragraphs: usize) -> String {
    (0..paragraphs)
        .map(|i| format!("Section {} of the lease covers the {} terms in detail.", i, topic))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[tokio::test]
async fn test_search_on_empty_index_skips_generation() {
    let h = Harness::new();
    let app = h.app();

    let response = app.retrieval.search("what is the rent?", None).await.unwrap();
    assert_eq!(response.answer, NO_RELEVANT_DOCUMENTS);
    assert!(response.results.is_empty());
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_index_and_search() {
    let h = Harness::new();
    write_local(&h, "leases/unit5.txt", "Monthly rent is 900 EUR. Rent is due on the first.");
    write_local(&h, "insurance/policy.md", "The building insurance covers roof damage.");
    let app = h.app();

    let report = app.retrieval.index_document("leases/unit5.txt").await.unwrap();
    assert_eq!(report.path, "leases/unit5.txt");
    assert_eq!(report.chunks, 1);
    app.retrieval.index_document("insurance/policy.md").await.unwrap();

    let response = app.retrieval.search("how much is the rent", Some(2)).await.unwrap();
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 1);
    assert!(response.answer.starts_with("Q: how much is the rent"));
    assert_eq!(response.results[0].document.path, "leases/unit5.txt");
    assert_eq!(response.results[0].document.name, "unit5.txt");
    assert!(response.results[0].document.content.contains("900 EUR"));

    assert_eq!(
        app.retrieval.indexed_documents().await.unwrap(),
        vec!["insurance/policy.md".to_string(), "leases/unit5.txt".to_string()]
    );
}

#[tokio::test]
async fn test_reindex_is_idempotent() {
    let h = Harness::new();
    write_local(&h, "a.txt", &long_lease("rent", 6));
    let app = h.app();

    let first = app.retrieval.index_document("a.txt").await.unwrap();
    let chunks_before = h.store.chunks_for("a.txt").await.unwrap();
    let second = app.retrieval.index_document("a.txt").await.unwrap();
    let chunks_after = h.store.chunks_for("a.txt").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(chunks_before, chunks_after);
}

#[tokio::test]
async fn test_reindex_replaces_old_chunks() {
    let h = Harness::new();
    write_local(&h, "a.txt", &long_lease("rent", 10));
    let app = h.app();

    let long = app.retrieval.index_document("a.txt").await.unwrap();
    assert!(long.chunks > 2);

    write_local(&h, "a.txt", "Short lease: rent 900.");
    let short = app.retrieval.index_document("a.txt").await.unwrap();
    assert_eq!(short.chunks, 1);
    assert_eq!(h.store.chunks_for("a.txt").await.unwrap().len(), 1);
    assert_eq!(h.store.total_chunks().await.unwrap(), 1);
}

#[tokio::test]
async fn test_index_missing_document_is_not_found() {
    let h = Harness::new();
    let app = h.app();

    let err = app.retrieval.index_document("leases/gone.pdf").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {:?}", err);

    let err = app.retrieval.index_document("../outside.txt").await.unwrap_err();
    assert!(matches!(err, Error::Config(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_search_rejects_bad_parameters() {
    let h = Harness::new();
    let app = h.app();

    for (query, top_k) in [("   ", None), ("rent", Some(0)), ("rent", Some(11))] {
        let err = app.retrieval.search(query, top_k).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{:?}/{:?}: {:?}", query, top_k, err);
    }
}

#[tokio::test]
async fn test_search_is_bounded_and_ordered() {
    let h = Harness::new();
    write_local(&h, "a.txt", &long_lease("rent", 4));
    write_local(&h, "b.txt", &long_lease("rent", 4));
    write_local(&h, "c.txt", &long_lease("parking", 4));
    write_local(&h, "d.txt", "rent rent deposit");
    let app = h.app();
    for p in ["a.txt", "b.txt", "c.txt", "d.txt"] {
        app.retrieval.index_document(p).await.unwrap();
    }

    for k in 1..=10 {
        let first = app.retrieval.search("rent", Some(k)).await.unwrap();
        let hits = app
            .retrieval
            .index()
            .search(&app.retrieval.index().embed_query("rent").await.unwrap(), k)
            .await
            .unwrap();
        assert!(hits.len() <= k);
        assert!(first.results.len() <= k);
        for w in hits.windows(2) {
            assert!(w[0].score >= w[1].score);
            if w[0].score == w[1].score {
                assert!(
                    (w[0].document_path.as_str(), w[0].chunk_index)
                        < (w[1].document_path.as_str(), w[1].chunk_index)
                );
            }
        }
        for w in first.results.windows(2) {
            assert!(w[0].score >= w[1].score);
        }

        let second = app.retrieval.search("rent", Some(k)).await.unwrap();
        assert_eq!(first, second);
    }
}

#[tokio::test]
async fn test_disabled_embeddings_surface_provider_error() {
    let h = Harness::new();
    write_local(&h, "a.txt", "rent");
    let app = App::from_parts(
        &h.config,
        h.remote_storage(),
        h.store.clone(),
        Arc::new(DisabledEmbedder),
        h.generator.clone(),
    )
    .unwrap();

    let err = app.retrieval.index_document("a.txt").await.unwrap_err();
    assert!(matches!(err, Error::Provider(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_parallel_indexing_of_distinct_paths() {
    let h = Harness::new();
    let paths: Vec<String> = (0..8).map(|i| format!("docs/{}.txt", i)).collect();
    for p in &paths {
        write_local(&h, p, &long_lease("deposit", 3));
    }
    let app = Arc::new(h.app());

    let mut tasks = Vec::new();
    for p in paths.clone() {
        let app = Arc::clone(&app);
        tasks.push(tokio::spawn(async move {
            app.retrieval.index_document(&p).await
        }));
    }
    for t in tasks {
        t.await.unwrap().unwrap();
    }
    assert_eq!(app.retrieval.indexed_documents().await.unwrap(), {
        let mut sorted = paths;
        sorted.sort();
        sorted
    });
}

/// Manifest empty, remote lists `leases/unit5.txt` with hash "a1"; sync adds
/// it, a re-sync is a no-op, and once the remote drops it the entry becomes
/// DELETED and search stops returning it.
#[tokio::test]
async fn test_unit5_lifecycle() {
    let h = Harness::new();
    h.remote.put_hashed("leases/unit5.txt", "Unit5 lease. The rent for unit5 is 900 EUR.", "a1");
    h.remote.put("leases/unit7.txt", "Unit7 lease. The rent for unit7 is 700 EUR.", 0);
    let app = h.app();

    let first = app.sync().await.unwrap();
    assert_eq!(first.status.files_added, 2);
    assert_eq!(first.indexed, 2);
    let manifest = app.reconciler().unwrap().manifest_store().load().await.unwrap();
    let entry = manifest.get("leases/unit5.txt").unwrap();
    assert_eq!(entry.content_hash, "a1");
    assert_eq!(entry.local_state, LocalState::Present);

    let response = app.retrieval.search("unit5 rent", None).await.unwrap();
    assert!(response
        .results
        .iter()
        .any(|r| r.document.path == "leases/unit5.txt"));

    let again = app.sync().await.unwrap();
    assert_eq!(again.status.files_added, 0);
    assert_eq!(again.status.files_updated, 0);
    assert_eq!(again.indexed, 0);

    h.remote.remove("leases/unit5.txt");
    let third = app.sync().await.unwrap();
    assert_eq!(third.status.files_deleted, 1);
    let manifest = app.reconciler().unwrap().manifest_store().load().await.unwrap();
    assert_eq!(
        manifest.get("leases/unit5.txt").unwrap().local_state,
        LocalState::Deleted
    );

    let response = app.retrieval.search("unit5 rent", Some(10)).await.unwrap();
    assert!(response
        .results
        .iter()
        .all(|r| r.document.path != "leases/unit5.txt"));
    assert!(h.store.chunks_for("leases/unit5.txt").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sync_heals_index_for_unindexed_present_paths() {
    let h = Harness::with_config("");
    let mut config = h.config.clone();
    config.sync.index_after_sync = false;
    h.remote.put("a.txt", "rent 900", 0);
    let no_index = App::from_parts(
        &config,
        h.remote_storage(),
        h.store.clone(),
        h.embedder.clone(),
        h.generator.clone(),
    )
    .unwrap();
    no_index.sync().await.unwrap();
    assert!(no_index.retrieval.indexed_documents().await.unwrap().is_empty());

    let app = h.app();
    let report = app.sync().await.unwrap();
    assert_eq!(report.status.files_added, 0);
    assert_eq!(report.indexed, 1);
    assert_eq!(
        app.retrieval.indexed_documents().await.unwrap(),
        vec!["a.txt".to_string()]
    );
}

/// An index request queued behind an in-flight one for the same path must
/// see the file as it is once it holds the path lock. If the path was
/// deleted in the meantime it is not indexed, and the deletion prune leaves
/// no chunks behind.
#[tokio::test]
async fn test_index_queued_behind_deletion_does_not_resurrect_chunks() {
    let h = Harness::new();
    let mut config = h.config.clone();
    config.sync.index_after_sync = false;
    h.remote.put("leases/a.txt", "Lease a. The rent is 900 EUR.", 0);
    let embedder = GatedEmbedder::new();
    let app = Arc::new(
        App::from_parts(
            &config,
            h.remote_storage(),
            h.store.clone(),
            embedder.clone(),
            h.generator.clone(),
        )
        .unwrap(),
    );
    app.sync().await.unwrap();

    // holds the path lock while parked in the embedder
    let first = tokio::spawn({
        let app = Arc::clone(&app);
        async move { app.retrieval.index_document("leases/a.txt").await }
    });
    embedder.entered.notified().await;

    let second = tokio::spawn({
        let app = Arc::clone(&app);
        async move { app.retrieval.index_document("leases/a.txt").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.remote.remove("leases/a.txt");
    let sync = tokio::spawn({
        let app = Arc::clone(&app);
        async move { app.sync().await }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!h.local_file("leases/a.txt").exists());
    assert!(!sync.is_finished());

    embedder.release.add_permits(1);
    first.await.unwrap().unwrap();
    let err = second.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {:?}", err);
    let report = sync.await.unwrap().unwrap();
    assert_eq!(report.status.files_deleted, 1);

    assert!(h.store.chunks_for("leases/a.txt").await.unwrap().is_empty());
    assert!(app.retrieval.indexed_documents().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_corrupt_document_is_unreadable() {
    let h = Harness::new();
    write_local(&h, "leases/broken.docx", "this is not a zip archive");
    let app = h.app();

    let err = app.retrieval.index_document("leases/broken.docx").await.unwrap_err();
    assert!(
        matches!(err, Error::Extract { ref path, .. } if path == "leases/broken.docx"),
        "got {:?}",
        err
    );
    assert_eq!(err.code(), "unreadable_document");
    assert!(h.store.chunks_for("leases/broken.docx").await.unwrap().is_empty());
}
