//! Semantic operations exposed to outer adapters (CLI, agent protocol).
//!
//! Thin async functions over the indexer, retrieval engine, and stores. Each
//! call loads settings for the project root, builds the pieces it needs, and
//! tears them down again; only the watcher holds state across calls.

use crate::config::Settings;
use crate::embedding::EmbeddingProvider;
use crate::error::{IndexResult, StoreResult};
use crate::indexing::indexer::{IndexOptions, Indexer};
use crate::indexing::watcher::{self, WatchHandle, WatchOptions};
use crate::search::scope::{self, ContextPack, SearchScope};
use crate::search::{SearchEngine, SearchResponse};
use crate::storage::{ChunkStore, EncryptMode, MetadataDb, ProjectLayout};
use crate::types::IndexReport;
use serde::Serialize;
use std::path::{Path, PathBuf};

fn load_settings(root: &Path) -> Settings {
    Settings::load(root).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "configuration failed to load, using defaults");
        Settings::default()
    })
}

fn build_indexer(root: &Path, provider: &str) -> IndexResult<Indexer> {
    let settings = load_settings(root);
    let provider = EmbeddingProvider::create(provider, &settings)?;
    Ok(Indexer::new(
        ProjectLayout::new(root),
        settings,
        provider,
    ))
}

/// Full index of the repository at `root`.
pub async fn index(
    root: impl Into<PathBuf>,
    provider: &str,
    encrypt: Option<&str>,
) -> IndexResult<IndexReport> {
    let root = root.into();
    let mut indexer = build_indexer(&root, provider)?;
    indexer
        .index(IndexOptions {
            encrypt_mode: encrypt.and_then(EncryptMode::parse),
            ..IndexOptions::default()
        })
        .await
}

/// Incremental update over an explicit candidate set.
pub async fn update(
    root: impl Into<PathBuf>,
    provider: &str,
    changed_files: Vec<PathBuf>,
    deleted_files: Vec<PathBuf>,
) -> IndexResult<IndexReport> {
    let root = root.into();
    let mut indexer = build_indexer(&root, provider)?;
    indexer
        .index(IndexOptions {
            changed_files: Some(changed_files),
            deleted_files,
            ..IndexOptions::default()
        })
        .await
}

/// Start watching `root`, incrementally reindexing debounced change
/// batches. The returned handle exposes `flush()` and `close()`.
pub async fn watch(
    root: impl Into<PathBuf>,
    provider: &str,
    debounce_ms: Option<u64>,
) -> IndexResult<WatchHandle> {
    let root = root.into();
    let settings = load_settings(&root);
    let debounce = debounce_ms.unwrap_or(settings.debounce_ms);
    let mut indexer = build_indexer(&root, provider)?;
    // Initialize the provider once up front so watch batches never race a
    // model download.
    indexer.provider_init().await?;
    watcher::watch(
        indexer,
        WatchOptions {
            debounce_ms: debounce,
            on_batch: None,
        },
    )
    .map_err(|e| crate::error::IndexError::Config {
        reason: e.to_string(),
    })
}

/// Hybrid search over an indexed project.
pub async fn search(
    query: &str,
    limit: usize,
    provider: &str,
    root: impl Into<PathBuf>,
    scope: SearchScope,
) -> SearchResponse {
    let root = root.into();
    let settings = load_settings(&root);
    let layout = ProjectLayout::new(&root);

    let mut embedding = match EmbeddingProvider::create(provider, &settings) {
        Ok(p) => p,
        Err(e) => {
            return SearchResponse {
                success: false,
                results: Vec::new(),
                error: Some(crate::search::SearchFailure {
                    code: crate::search::FailureCode::SearchError,
                    message: e.to_string(),
                    suggestion: "Check provider selection and credentials".to_string(),
                }),
            };
        }
    };
    if let Err(e) = embedding.init().await {
        return SearchResponse {
            success: false,
            results: Vec::new(),
            error: Some(crate::search::SearchFailure {
                code: crate::search::FailureCode::SearchError,
                message: e.to_string(),
                suggestion: "Check provider initialization (model download, credentials)"
                    .to_string(),
            }),
        };
    }

    let store = match open_store(&layout, &settings) {
        Ok(store) => store,
        Err(e) => {
            return SearchResponse {
                success: false,
                results: Vec::new(),
                error: Some(crate::search::SearchFailure {
                    code: crate::search::FailureCode::SearchError,
                    message: e.to_string(),
                    suggestion: "Fix PAMPAX_ENCRYPTION_KEY and retry".to_string(),
                }),
            };
        }
    };

    let engine = SearchEngine::new(layout, store, settings);
    engine.search(query, limit, &embedding, &scope).await
}

fn open_store(layout: &ProjectLayout, settings: &Settings) -> StoreResult<ChunkStore> {
    let mode = EncryptMode::parse(&settings.encryption_mode).unwrap_or_default();
    ChunkStore::new(
        layout.chunks_dir(),
        mode,
        settings.encryption_key.as_deref(),
    )
}

/// Fetch one chunk body by SHA.
pub fn get_chunk(sha: &str, root: impl Into<PathBuf>) -> StoreResult<Vec<u8>> {
    let root = root.into();
    let settings = load_settings(&root);
    let layout = ProjectLayout::new(&root);
    open_store(&layout, &settings)?.read(sha)
}

/// A light listing of indexed chunks.
#[derive(Debug, Serialize)]
pub struct OverviewEntry {
    pub chunk_id: String,
    pub file_path: String,
    pub symbol: String,
    pub chunk_type: String,
}

pub fn get_overview(
    limit: usize,
    root: impl Into<PathBuf>,
) -> Result<Vec<OverviewEntry>, crate::error::DbError> {
    let root = root.into();
    let db = MetadataDb::new(ProjectLayout::new(&root).db_path());
    let conn = db.open_ro()?;
    Ok(db
        .overview(&conn, limit)?
        .into_iter()
        .map(|(chunk_id, file_path, symbol, chunk_type)| OverviewEntry {
            chunk_id,
            file_path,
            symbol,
            chunk_type,
        })
        .collect())
}

#[derive(Debug, Serialize)]
pub struct ProjectStats {
    pub total_chunks: i64,
    pub by_language: Vec<(String, i64)>,
    pub by_chunk_type: Vec<(String, i64)>,
    pub by_provider: Vec<(String, i64)>,
    pub learned_intentions: i64,
}

pub fn get_stats(root: impl Into<PathBuf>) -> Result<ProjectStats, crate::error::DbError> {
    let root = root.into();
    let db = MetadataDb::new(ProjectLayout::new(&root).db_path());
    let conn = db.open_ro()?;
    Ok(ProjectStats {
        total_chunks: db.chunk_count(&conn)?,
        by_language: db.counts_by(&conn, "lang")?,
        by_chunk_type: db.counts_by(&conn, "chunk_type")?,
        by_provider: db.counts_by(&conn, "embedding_provider")?,
        learned_intentions: db.intention_count(&conn)?,
    })
}

#[derive(Debug, Serialize)]
pub struct QueryAnalytics {
    pub top_patterns: Vec<crate::storage::database::PatternStat>,
    pub learned_intentions: i64,
}

pub fn get_query_analytics(
    root: impl Into<PathBuf>,
) -> Result<QueryAnalytics, crate::error::DbError> {
    let root = root.into();
    let db = MetadataDb::new(ProjectLayout::new(&root).db_path());
    let conn = db.open_ro()?;
    Ok(QueryAnalytics {
        top_patterns: db.top_patterns(&conn, 20)?,
        learned_intentions: db.intention_count(&conn)?,
    })
}

/// Expand a named context pack into a search scope.
pub fn use_context_pack(
    name: &str,
    root: impl Into<PathBuf>,
) -> Result<SearchScope, scope::PackError> {
    let root = root.into();
    let pack = scope::load_context_pack(&ProjectLayout::new(&root).contextpacks_dir(), name)?;
    Ok(pack.to_scope())
}

pub fn list_context_packs(root: impl Into<PathBuf>) -> Vec<ContextPack> {
    let root = root.into();
    scope::list_context_packs(&ProjectLayout::new(&root).contextpacks_dir())
}
