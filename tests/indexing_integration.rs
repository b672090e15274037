//! End-to-end indexing scenarios: fresh index, idempotence, incremental
//! update, deletion reconciliation, and manifest consistency.
//!
//! All runs use the deterministic mock provider so no network or model
//! downloads are involved.

use pampax::indexing::indexer::{IndexOptions, Indexer};
use pampax::storage::{MerkleManifest, MetadataDb, ProjectLayout};
use pampax::{EmbeddingProvider, Settings};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn three_file_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("A.js"), "function alpha(){ return 1; }\n").unwrap();
    fs::write(dir.path().join("B.py"), "def beta():\n    return 2\n").unwrap();
    fs::write(dir.path().join("C.rs"), "fn gamma() -> u32 { 3 }\n").unwrap();
    dir
}

fn indexer_for(root: &Path) -> Indexer {
    let settings = Settings::default();
    let provider = EmbeddingProvider::create("mock", &settings).unwrap();
    Indexer::new(ProjectLayout::new(root), settings, provider)
}

fn chunk_rows(root: &Path) -> Vec<(String, String, String)> {
    let db = MetadataDb::new(ProjectLayout::new(root).db_path());
    let conn = db.open_ro().unwrap();
    db.chunks_for_provider(&conn, "mock", 64)
        .unwrap()
        .into_iter()
        .map(|r| (r.file_path, r.symbol, r.sha))
        .collect()
}

#[tokio::test]
async fn fresh_index_emits_one_chunk_per_function() {
    let repo = three_file_repo();
    let mut indexer = indexer_for(repo.path());
    let report = indexer.index(IndexOptions::default()).await.unwrap();

    assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
    assert_eq!(report.provider, "mock");
    assert_eq!(report.processed_chunks, 3);

    let rows = chunk_rows(repo.path());
    let symbols: Vec<&str> = rows.iter().map(|(_, s, _)| s.as_str()).collect();
    assert!(symbols.contains(&"alpha"));
    assert!(symbols.contains(&"beta"));
    assert!(symbols.contains(&"gamma"));

    // Chunk bodies round-trip through the store.
    let store = pampax::ChunkStore::new(
        ProjectLayout::new(repo.path()).chunks_dir(),
        pampax::EncryptMode::Off,
        None,
    )
    .unwrap();
    for (_, _, sha) in &rows {
        let body = store.read(sha).unwrap();
        assert_eq!(pampax::storage::sha1_hex(&body), *sha);
    }

    // The codemap landed at the repo root for git.
    assert!(repo.path().join("pampax.codemap.json").exists());
}

#[tokio::test]
async fn reindex_without_changes_processes_nothing() {
    let repo = three_file_repo();
    let mut indexer = indexer_for(repo.path());
    indexer.index(IndexOptions::default()).await.unwrap();

    let second = indexer.index(IndexOptions::default()).await.unwrap();
    assert_eq!(second.processed_chunks, 0);
    assert!(second.errors.is_empty());
}

#[tokio::test]
async fn incremental_update_touches_only_the_changed_file() {
    let repo = three_file_repo();
    let mut indexer = indexer_for(repo.path());
    indexer.index(IndexOptions::default()).await.unwrap();

    let before: Vec<_> = chunk_rows(repo.path())
        .into_iter()
        .filter(|(f, _, _)| f != "A.js")
        .collect();
    let manifest_before =
        MerkleManifest::load(&ProjectLayout::new(repo.path()).merkle_path()).unwrap();
    let a_sha_before = manifest_before.get("A.js").unwrap().sha_file.clone();

    // Append a second function to A.js and update just that file.
    let mut source = fs::read_to_string(repo.path().join("A.js")).unwrap();
    source.push_str("function delta(){ return 4; }\n");
    fs::write(repo.path().join("A.js"), source).unwrap();

    let report = indexer
        .index(IndexOptions {
            changed_files: Some(vec![PathBuf::from("A.js")]),
            ..IndexOptions::default()
        })
        .await
        .unwrap();

    // alpha's chunk id is unchanged (same code, same sha) so only delta is
    // newly embedded.
    assert_eq!(report.processed_chunks, 1);

    let manifest_after =
        MerkleManifest::load(&ProjectLayout::new(repo.path()).merkle_path()).unwrap();
    assert_ne!(manifest_after.get("A.js").unwrap().sha_file, a_sha_before);
    assert_eq!(manifest_after.get("A.js").unwrap().chunk_shas.len(), 2);

    let rows = chunk_rows(repo.path());
    let a_rows: Vec<_> = rows.iter().filter(|(f, _, _)| f == "A.js").collect();
    assert_eq!(a_rows.len(), 2);

    // B.py and C.rs rows are untouched.
    let after: Vec<_> = rows
        .iter()
        .filter(|(f, _, _)| f != "A.js")
        .cloned()
        .collect();
    let mut before_sorted = before.clone();
    let mut after_sorted = after.clone();
    before_sorted.sort();
    after_sorted.sort();
    assert_eq!(before_sorted, after_sorted);
}

#[tokio::test]
async fn deleting_a_file_removes_every_trace() {
    let repo = three_file_repo();
    let mut indexer = indexer_for(repo.path());
    indexer.index(IndexOptions::default()).await.unwrap();

    let b_shas: Vec<String> = chunk_rows(repo.path())
        .into_iter()
        .filter(|(f, _, _)| f == "B.py")
        .map(|(_, _, sha)| sha)
        .collect();
    assert!(!b_shas.is_empty());

    fs::remove_file(repo.path().join("B.py")).unwrap();
    indexer
        .index(IndexOptions {
            changed_files: Some(vec![]),
            deleted_files: vec![PathBuf::from("B.py")],
            ..IndexOptions::default()
        })
        .await
        .unwrap();

    let rows = chunk_rows(repo.path());
    assert!(rows.iter().all(|(f, _, _)| f != "B.py"));

    let manifest = MerkleManifest::load(&ProjectLayout::new(repo.path()).merkle_path()).unwrap();
    assert!(manifest.get("B.py").is_none());

    let store = pampax::ChunkStore::new(
        ProjectLayout::new(repo.path()).chunks_dir(),
        pampax::EncryptMode::Off,
        None,
    )
    .unwrap();
    for sha in &b_shas {
        assert!(!store.contains(sha), "stale body for {sha}");
    }
}

#[tokio::test]
async fn full_scan_reconciles_files_deleted_out_of_band() {
    let repo = three_file_repo();
    let mut indexer = indexer_for(repo.path());
    indexer.index(IndexOptions::default()).await.unwrap();

    // Delete without telling the indexer, then run a full scan.
    fs::remove_file(repo.path().join("C.rs")).unwrap();
    indexer.index(IndexOptions::default()).await.unwrap();

    let rows = chunk_rows(repo.path());
    assert!(rows.iter().all(|(f, _, _)| f != "C.rs"));

    // Every surviving row's file exists on disk.
    for (file, _, _) in &rows {
        assert!(repo.path().join(file).exists(), "orphan row for {file}");
    }
}

#[tokio::test]
async fn manifest_chunk_shas_match_database_rows() {
    let repo = three_file_repo();
    let mut indexer = indexer_for(repo.path());
    indexer.index(IndexOptions::default()).await.unwrap();

    let manifest = MerkleManifest::load(&ProjectLayout::new(repo.path()).merkle_path()).unwrap();
    let rows = chunk_rows(repo.path());

    for file in ["A.js", "B.py", "C.rs"] {
        let entry = manifest.get(file).unwrap();
        let mut manifest_shas = entry.chunk_shas.clone();
        let mut row_shas: Vec<String> = rows
            .iter()
            .filter(|(f, _, _)| f == file)
            .map(|(_, _, sha)| sha.clone())
            .collect();
        manifest_shas.sort();
        row_shas.sort();
        assert_eq!(manifest_shas, row_shas, "mismatch for {file}");
    }
}

#[tokio::test]
async fn parse_hostile_content_falls_back_to_file_chunk() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("broken.js"), "function ((((( {{{ ").unwrap();
    let mut indexer = indexer_for(dir.path());
    let report = indexer.index(IndexOptions::default()).await.unwrap();

    // The run succeeds and the file is represented somehow.
    let rows = chunk_rows(dir.path());
    assert!(!rows.is_empty());
    assert!(report.processed_chunks >= 1);
}

#[tokio::test]
async fn cancellation_stops_between_files_and_saves_cleanly() {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    let repo = three_file_repo();
    let mut indexer = indexer_for(repo.path());

    let cancel = Arc::new(AtomicBool::new(true));
    let report = indexer
        .index(IndexOptions {
            cancel: Some(cancel),
            ..IndexOptions::default()
        })
        .await
        .unwrap();
    assert_eq!(report.processed_chunks, 0);

    // A later uncancelled run completes normally.
    let report = indexer.index(IndexOptions::default()).await.unwrap();
    assert_eq!(report.processed_chunks, 3);
}
