//! Indexing orchestrator: walks the repo, chunks and embeds changed files,
//! and persists every store atomically at the end of the run.
//!
//! One file's failure never aborts the run; it lands in the report's error
//! list and the walk continues. The manifest and codemap are saved once, at
//! a clean stop or successful completion.

use crate::chunking::{Chunker, SizeAnalyzer};
use crate::config::Settings;
use crate::embedding::EmbeddingProvider;
use crate::error::{IndexError, IndexResult, StoreError};
use crate::indexing::walker;
use crate::parsing::Language;
use crate::search::bm25;
use crate::storage::{
    ChunkRecord, ChunkStore, Codemap, CodemapEntry, EncryptMode, FileManifestEntry,
    MerkleManifest, MetadataDb, ProjectLayout, sha1_hex,
};
use crate::types::{Chunk, FileError, IndexReport};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub type ProgressFn = Box<dyn Fn(&str) + Send + Sync>;

/// Inputs for one indexing run.
#[derive(Default)]
pub struct IndexOptions {
    /// Exact candidate set for an incremental run; `None` walks the repo.
    pub changed_files: Option<Vec<PathBuf>>,
    /// Files known to be gone; their chunks and manifest entries drop.
    pub deleted_files: Vec<PathBuf>,
    /// Overrides the configured encryption mode for this run.
    pub encrypt_mode: Option<EncryptMode>,
    pub on_progress: Option<ProgressFn>,
    /// Checked at each per-file boundary; a set flag stops cleanly, saving
    /// what completed.
    pub cancel: Option<Arc<AtomicBool>>,
}

/// The indexing orchestrator. Exclusively owns writes to the database,
/// codemap, chunk store, and manifest; retrieval holds read-only handles.
pub struct Indexer {
    layout: ProjectLayout,
    settings: Settings,
    provider: EmbeddingProvider,
    db: MetadataDb,
    analyzer: SizeAnalyzer,
}

impl Indexer {
    pub fn new(layout: ProjectLayout, settings: Settings, provider: EmbeddingProvider) -> Self {
        let db = MetadataDb::new(layout.db_path());
        Self {
            layout,
            settings,
            provider,
            db,
            analyzer: SizeAnalyzer::new(),
        }
    }

    pub fn provider(&self) -> &EmbeddingProvider {
        &self.provider
    }

    /// Initialize the provider eagerly (model load / download). `index()`
    /// also does this lazily; the watcher calls it up front.
    pub async fn provider_init(&mut self) -> IndexResult<()> {
        Ok(self.provider.init().await?)
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn open_store(&self, encrypt_override: Option<EncryptMode>) -> IndexResult<ChunkStore> {
        let mode = encrypt_override
            .or_else(|| EncryptMode::parse(&self.settings.encryption_mode))
            .unwrap_or_default();
        Ok(ChunkStore::new(
            self.layout.chunks_dir(),
            mode,
            self.settings.encryption_key.as_deref(),
        )?)
    }

    /// Run one indexing pass.
    pub async fn index(&mut self, options: IndexOptions) -> IndexResult<IndexReport> {
        self.provider.init().await?;
        let store = self.open_store(options.encrypt_mode)?;
        let conn = self.db.open_rw()?;

        self.warn_on_provider_mismatch(&conn);

        let full_scan = options.changed_files.is_none();
        let mut deleted: Vec<String> = options
            .deleted_files
            .iter()
            .map(|p| walker::normalize_rel_path(p))
            .collect();
        let candidates: Vec<String> = match &options.changed_files {
            Some(files) => {
                // Changed files that no longer exist fold into the deletes.
                let mut kept = Vec::new();
                for path in files {
                    let rel = walker::normalize_rel_path(path);
                    if self.layout.root().join(path).exists() {
                        kept.push(rel);
                    } else {
                        deleted.push(rel);
                    }
                }
                kept
            }
            None => walker::walk_source_files(self.layout.root())
                .iter()
                .map(|p| walker::normalize_rel_path(p))
                .collect(),
        };

        let mut manifest = MerkleManifest::load(&self.layout.merkle_path()).map_err(|e| {
            IndexError::FileRead {
                path: self.layout.merkle_path(),
                source: e,
            }
        })?;
        let mut codemap = Codemap::load(&self.layout.codemap_path());

        let mut report = IndexReport {
            provider: self.provider.name().to_string(),
            ..IndexReport::default()
        };
        let mut mutated = false;
        let mut clean_stop = false;

        for rel in &candidates {
            if options
                .cancel
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::Relaxed))
            {
                clean_stop = true;
                break;
            }
            if let Some(progress) = &options.on_progress {
                progress(rel);
            }
            match self
                .process_file(rel, &conn, &store, &mut manifest, &mut codemap, &mut report)
                .await
            {
                Ok(file_mutated) => mutated |= file_mutated,
                Err(e) => {
                    tracing::warn!(file = %rel, error = %e, "file failed, continuing");
                    report.errors.push(FileError {
                        file: rel.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if !clean_stop {
            // Explicit deletions, then (on a full scan) reconciliation of
            // manifest entries whose files vanished.
            if full_scan {
                let missing: Vec<String> = manifest
                    .files()
                    .filter(|rel| !self.layout.root().join(rel).exists())
                    .map(str::to_string)
                    .collect();
                deleted.extend(missing);
            }
            for rel in &deleted {
                mutated |= self.remove_file(rel, &conn, &store, &mut manifest, &mut codemap)?;
            }
        }

        manifest.save().map_err(|e| IndexError::Persist {
            path: self.layout.merkle_path(),
            source: Box::new(e),
        })?;
        codemap.save().map_err(|e| IndexError::Persist {
            path: self.layout.codemap_path(),
            source: Box::new(e),
        })?;

        if mutated {
            bm25::invalidate(self.layout.root());
        }
        Ok(report)
    }

    /// Index one file. Returns whether anything changed.
    async fn process_file(
        &self,
        rel: &str,
        conn: &rusqlite::Connection,
        store: &ChunkStore,
        manifest: &mut MerkleManifest,
        codemap: &mut Codemap,
        report: &mut IndexReport,
    ) -> IndexResult<bool> {
        let abs = self.layout.root().join(rel);
        let bytes = std::fs::read(&abs).map_err(|e| IndexError::FileRead {
            path: abs.clone(),
            source: e,
        })?;
        let source = String::from_utf8_lossy(&bytes).into_owned();
        let sha_file = sha1_hex(source.as_bytes());

        if manifest.is_unchanged(rel, &sha_file) {
            return Ok(false);
        }

        let Some(lang) = Language::from_path(std::path::Path::new(rel)) else {
            return Ok(false);
        };

        let counter = self.provider.token_counter();
        let limits = self.provider.profile().chunk_limits();
        let chunker = Chunker::new(lang, &self.analyzer, &counter, limits);
        let output = chunker.chunk_source(rel, &source)?;
        report.chunking_stats.absorb(&output.stats);
        if output.parse_failed {
            report.errors.push(FileError {
                file: rel.to_string(),
                message: "parse failed; indexed as a whole-file fallback chunk".to_string(),
            });
        }

        let previous_ids: HashSet<String> =
            self.db.chunk_ids_for_file(conn, rel)?.into_iter().collect();
        let mut emitted_ids: HashSet<String> = HashSet::new();
        let mut chunk_shas: Vec<String> = Vec::new();
        let mut mutated = false;

        for chunk in &output.chunks {
            emitted_ids.insert(chunk.id.clone());
            chunk_shas.push(chunk.sha.clone());
            report.total_chunks += 1;

            if codemap.is_current(&chunk.id, &chunk.sha) && previous_ids.contains(&chunk.id) {
                self.db.mark_retained(conn, &chunk.id)?;
                continue;
            }
            self.embed_and_persist(chunk, conn, store, codemap).await?;
            report.processed_chunks += 1;
            mutated = true;
        }

        // Rows from this file's previous state that were not re-emitted.
        let stale: Vec<String> = previous_ids.difference(&emitted_ids).cloned().collect();
        if !stale.is_empty() {
            let stale_shas = self.shas_of(conn, &stale)?;
            self.db.delete_chunks_by_ids(conn, &stale)?;
            for id in &stale {
                codemap.remove(id);
            }
            self.remove_unreferenced_bodies(conn, store, &stale_shas)?;
            mutated = true;
        }

        manifest.insert(
            rel.to_string(),
            FileManifestEntry {
                sha_file,
                chunk_shas,
            },
        );
        Ok(mutated)
    }

    async fn embed_and_persist(
        &self,
        chunk: &Chunk,
        conn: &rusqlite::Connection,
        store: &ChunkStore,
        codemap: &mut Codemap,
    ) -> IndexResult<()> {
        let embedding = self.provider.generate(&chunk.embedding_text()).await?;
        let record = ChunkRecord::from_parts(
            chunk,
            embedding,
            self.provider.name(),
            self.provider.dimensions(),
        );
        self.db.upsert_chunk(conn, &record)?;
        let encrypted = store.write(&chunk.sha, chunk.code.as_bytes())?;
        let mut entry = CodemapEntry::from_chunk(
            chunk,
            self.provider.name(),
            self.provider.dimensions(),
            encrypted,
        );
        entry.flags.encrypted = encrypted;
        codemap.upsert(chunk.id.clone(), entry);
        Ok(())
    }

    /// Drop a deleted file's chunks everywhere. Returns whether anything
    /// was removed.
    fn remove_file(
        &self,
        rel: &str,
        conn: &rusqlite::Connection,
        store: &ChunkStore,
        manifest: &mut MerkleManifest,
        codemap: &mut Codemap,
    ) -> IndexResult<bool> {
        let shas = self.db.delete_chunks_by_file(conn, rel)?;
        let removed_rows = !shas.is_empty();
        codemap.remove_file(rel);
        self.remove_unreferenced_bodies(conn, store, &shas)?;
        let removed_manifest = manifest.remove(rel);
        Ok(removed_rows || removed_manifest)
    }

    /// Full body SHAs for rows about to be deleted. Chunk ids only carry a
    /// truncated sha, so the rows must be consulted while they still exist.
    fn shas_of(&self, conn: &rusqlite::Connection, ids: &[String]) -> IndexResult<Vec<String>> {
        let mut stmt = conn
            .prepare("SELECT sha FROM code_chunks WHERE id = ?1")
            .map_err(crate::error::DbError::from)?;
        let mut shas = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(sha) = stmt.query_row([id], |row| row.get::<_, String>(0)) {
                shas.push(sha);
            }
        }
        Ok(shas)
    }

    /// Content-addressed bodies are shared; only remove one once no row
    /// references it.
    fn remove_unreferenced_bodies(
        &self,
        conn: &rusqlite::Connection,
        store: &ChunkStore,
        shas: &[String],
    ) -> IndexResult<()> {
        for sha in shas {
            if self.db.chunk_by_sha(conn, sha)?.is_none() {
                match store.remove(sha) {
                    Ok(()) | Err(StoreError::NotFound { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// Warn (never fail) when existing rows disagree with the configured
    /// provider, quoting both configurations and a recovery command.
    fn warn_on_provider_mismatch(&self, conn: &rusqlite::Connection) {
        let Ok(configs) = self.db.provider_configs(conn) else {
            return;
        };
        let current = (self.provider.name().to_string(), self.provider.dimensions());
        for (provider, dimensions, count) in configs {
            if (provider.clone(), dimensions) != current {
                tracing::warn!(
                    "index holds {count} chunks embedded with '{provider}' ({dimensions} dims) \
                     but this run uses '{}' ({} dims); mixed configurations are invisible to \
                     each other at search time. To rebuild: delete .pampa/ and pampax.codemap.json, \
                     then re-run indexing",
                    current.0,
                    current.1
                );
            }
        }
    }
}
