//! SQLite metadata store for chunks, embeddings, the intention cache, and
//! query patterns.
//!
//! Connections are opened per operation and dropped at the end; only the
//! indexer performs writes during a run. Embedding vectors are stored as a
//! length-prefixed little-endian `f32` blob and decoded before similarity.

use crate::error::{DbError, DbResult};
use crate::types::{ChunkMetadata, ContextInfo, SymbolInfo};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};

/// One row of `code_chunks`, decoded.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub file_path: String,
    pub symbol: String,
    pub sha: String,
    pub lang: String,
    pub chunk_type: String,
    pub embedding: Vec<f32>,
    pub provider: String,
    pub dimensions: usize,
    pub tags: Vec<String>,
    pub intent: Option<String>,
    pub description: Option<String>,
    pub doc_comment: Option<String>,
    pub variables: Vec<String>,
    pub context: ContextInfo,
}

impl ChunkRecord {
    /// Assemble a record from chunk metadata plus its embedding.
    pub fn from_parts(
        chunk: &crate::types::Chunk,
        embedding: Vec<f32>,
        provider: &str,
        dimensions: usize,
    ) -> Self {
        Self {
            id: chunk.id.clone(),
            file_path: chunk.file_path.clone(),
            symbol: chunk.symbol.clone(),
            sha: chunk.sha.clone(),
            lang: chunk.lang.clone(),
            chunk_type: chunk.chunk_type.clone(),
            embedding,
            provider: provider.to_string(),
            dimensions,
            tags: chunk.metadata.tags.clone(),
            intent: chunk.metadata.intent.clone(),
            description: chunk.metadata.description.clone(),
            doc_comment: chunk.metadata.doc_comment.clone(),
            variables: chunk.metadata.variables.clone(),
            context: chunk.metadata.context.clone(),
        }
    }

    pub fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            doc_comment: self.doc_comment.clone(),
            tags: self.tags.clone(),
            intent: self.intent.clone(),
            description: self.description.clone(),
            variables: self.variables.clone(),
            context: self.context.clone(),
        }
    }
}

/// A learned query → chunk mapping.
#[derive(Debug, Clone)]
pub struct IntentionHit {
    pub target_sha: String,
    pub confidence: f64,
    pub usage_count: i64,
}

/// Aggregate row for analytics output.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PatternStat {
    pub pattern: String,
    pub frequency: i64,
}

/// Encode a vector as `u32 len (LE) || f32 values (LE)`.
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + vector.len() * 4);
    out.extend_from_slice(&(vector.len() as u32).to_le_bytes());
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode a length-prefixed little-endian `f32` blob.
pub fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>, String> {
    if blob.len() < 4 {
        return Err("blob shorter than length prefix".to_string());
    }
    let len = u32::from_le_bytes([blob[0], blob[1], blob[2], blob[3]]) as usize;
    let body = &blob[4..];
    if body.len() != len * 4 {
        return Err(format!(
            "length prefix {len} disagrees with payload of {} bytes",
            body.len()
        ));
    }
    let mut out = Vec::with_capacity(len);
    for chunk in body.chunks_exact(4) {
        out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(out)
}

fn json_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn json_context(raw: Option<String>) -> ContextInfo {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

/// Handle on the metadata database file. Cheap to clone; each operation
/// opens its own short-lived connection.
#[derive(Debug, Clone)]
pub struct MetadataDb {
    path: PathBuf,
}

impl MetadataDb {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Open for writing, creating the schema if needed.
    pub fn open_rw(&self) -> DbResult<Connection> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|_| DbError::DatabaseNotFound {
                path: self.path.clone(),
            })?;
        }
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }

    /// Open for reading; a missing file is an actionable error, not a crash.
    pub fn open_ro(&self) -> DbResult<Connection> {
        if !self.path.exists() {
            return Err(DbError::DatabaseNotFound {
                path: self.path.clone(),
            });
        }
        Ok(Connection::open(&self.path)?)
    }

    /// Insert or replace a chunk row.
    pub fn upsert_chunk(&self, conn: &Connection, record: &ChunkRecord) -> DbResult<()> {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            r#"INSERT INTO code_chunks
               (id, file_path, symbol, sha, lang, chunk_type, embedding,
                embedding_provider, embedding_dimensions, pampa_tags, pampa_intent,
                pampa_description, doc_comments, variables_used, context_info,
                created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)
               ON CONFLICT(id) DO UPDATE SET
                 sha = excluded.sha,
                 embedding = excluded.embedding,
                 embedding_provider = excluded.embedding_provider,
                 embedding_dimensions = excluded.embedding_dimensions,
                 pampa_tags = excluded.pampa_tags,
                 pampa_intent = excluded.pampa_intent,
                 pampa_description = excluded.pampa_description,
                 doc_comments = excluded.doc_comments,
                 variables_used = excluded.variables_used,
                 context_info = excluded.context_info,
                 updated_at = excluded.updated_at"#,
            params![
                record.id,
                record.file_path,
                record.symbol,
                record.sha,
                record.lang,
                record.chunk_type,
                encode_embedding(&record.embedding),
                record.provider,
                record.dimensions as i64,
                serde_json::to_string(&record.tags).unwrap_or_else(|_| "[]".to_string()),
                record.intent,
                record.description,
                record.doc_comment,
                serde_json::to_string(&record.variables).unwrap_or_else(|_| "[]".to_string()),
                serde_json::to_string(&record.context).unwrap_or_else(|_| "{}".to_string()),
                now,
            ],
        )?;
        Ok(())
    }

    /// All chunk ids currently stored for a file.
    pub fn chunk_ids_for_file(&self, conn: &Connection, file_path: &str) -> DbResult<Vec<String>> {
        let mut stmt = conn.prepare("SELECT id FROM code_chunks WHERE file_path = ?1")?;
        let ids = stmt
            .query_map(params![file_path], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn delete_chunks_by_ids(&self, conn: &Connection, ids: &[String]) -> DbResult<usize> {
        let mut deleted = 0;
        for id in ids {
            deleted += conn.execute("DELETE FROM code_chunks WHERE id = ?1", params![id])?;
        }
        Ok(deleted)
    }

    /// Delete every chunk of a file; returns the SHAs of the removed bodies.
    pub fn delete_chunks_by_file(&self, conn: &Connection, file_path: &str) -> DbResult<Vec<String>> {
        let mut stmt = conn.prepare("SELECT sha FROM code_chunks WHERE file_path = ?1")?;
        let shas = stmt
            .query_map(params![file_path], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        conn.execute("DELETE FROM code_chunks WHERE file_path = ?1", params![file_path])?;
        Ok(shas)
    }

    /// Touch the `updated_at` of a retained (unchanged) chunk.
    pub fn mark_retained(&self, conn: &Connection, id: &str) -> DbResult<()> {
        conn.execute(
            "UPDATE code_chunks SET updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// All rows for the `(provider, dimensions)` pair. This filter is
    /// mandatory on every vector read: rows embedded under a different
    /// configuration are invisible here.
    pub fn chunks_for_provider(
        &self,
        conn: &Connection,
        provider: &str,
        dimensions: usize,
    ) -> DbResult<Vec<ChunkRecord>> {
        let mut stmt = conn.prepare(
            r#"SELECT id, file_path, symbol, sha, lang, chunk_type, embedding,
                      embedding_provider, embedding_dimensions, pampa_tags,
                      pampa_intent, pampa_description, doc_comments,
                      variables_used, context_info
               FROM code_chunks
               WHERE embedding_provider = ?1 AND embedding_dimensions = ?2"#,
        )?;
        let rows = stmt.query_map(params![provider, dimensions as i64], |row| {
            let blob: Vec<u8> = row.get(6)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                blob,
                row.get::<_, String>(7)?,
                row.get::<_, i64>(8)?,
                row.get::<_, Option<String>>(9)?,
                row.get::<_, Option<String>>(10)?,
                row.get::<_, Option<String>>(11)?,
                row.get::<_, Option<String>>(12)?,
                row.get::<_, Option<String>>(13)?,
                row.get::<_, Option<String>>(14)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (
                id,
                file_path,
                symbol,
                sha,
                lang,
                chunk_type,
                blob,
                provider,
                dims,
                tags,
                intent,
                description,
                doc_comment,
                variables,
                context,
            ) = row?;
            let embedding =
                decode_embedding(&blob).map_err(|reason| DbError::MalformedEmbedding {
                    chunk_id: id.clone(),
                    reason,
                })?;
            records.push(ChunkRecord {
                id,
                file_path,
                symbol,
                sha,
                lang,
                chunk_type,
                embedding,
                provider,
                dimensions: dims as usize,
                tags: json_list(tags),
                intent,
                description,
                doc_comment,
                variables: json_list(variables),
                context: json_context(context),
            });
        }
        Ok(records)
    }

    /// Distinct `(provider, dimensions)` pairs present, with row counts.
    /// Used for the mismatched-configuration warning.
    pub fn provider_configs(&self, conn: &Connection) -> DbResult<Vec<(String, usize, i64)>> {
        let mut stmt = conn.prepare(
            "SELECT embedding_provider, embedding_dimensions, COUNT(*)
             FROM code_chunks GROUP BY embedding_provider, embedding_dimensions",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)? as usize,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn chunk_count(&self, conn: &Connection) -> DbResult<i64> {
        Ok(conn.query_row("SELECT COUNT(*) FROM code_chunks", [], |row| row.get(0))?)
    }

    /// Look up the file path and symbol of a chunk by body SHA.
    pub fn chunk_by_sha(
        &self,
        conn: &Connection,
        sha: &str,
    ) -> DbResult<Option<(String, String, String)>> {
        Ok(conn
            .query_row(
                "SELECT id, file_path, symbol FROM code_chunks WHERE sha = ?1 LIMIT 1",
                params![sha],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?)
    }

    // ---- intention cache ----

    /// Fetch a learned intention, bumping its usage counter on hit.
    pub fn intention_lookup(
        &self,
        conn: &Connection,
        normalized: &str,
    ) -> DbResult<Option<IntentionHit>> {
        let hit = conn
            .query_row(
                "SELECT target_sha, confidence, usage_count FROM intention_cache
                 WHERE query_normalized = ?1",
                params![normalized],
                |row| {
                    Ok(IntentionHit {
                        target_sha: row.get(0)?,
                        confidence: row.get(1)?,
                        usage_count: row.get(2)?,
                    })
                },
            )
            .optional()?;
        if hit.is_some() {
            conn.execute(
                "UPDATE intention_cache
                 SET usage_count = usage_count + 1, last_used = ?1
                 WHERE query_normalized = ?2",
                params![Utc::now().to_rfc3339(), normalized],
            )?;
        }
        Ok(hit)
    }

    /// Record (or re-record, overwriting confidence) a learned intention.
    pub fn intention_record(
        &self,
        conn: &Connection,
        normalized: &str,
        original: &str,
        target_sha: &str,
        confidence: f64,
    ) -> DbResult<()> {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            r#"INSERT INTO intention_cache
               (query_normalized, original_query, target_sha, confidence,
                usage_count, created_at, last_used)
               VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
               ON CONFLICT(query_normalized) DO UPDATE SET
                 target_sha = excluded.target_sha,
                 confidence = excluded.confidence,
                 last_used = excluded.last_used"#,
            params![normalized, original, target_sha, confidence, now],
        )?;
        Ok(())
    }

    pub fn intention_count(&self, conn: &Connection) -> DbResult<i64> {
        Ok(conn.query_row("SELECT COUNT(*) FROM intention_cache", [], |row| row.get(0))?)
    }

    // ---- query patterns ----

    /// Increment (or insert) the frequency of an anonymized query pattern.
    pub fn pattern_record(&self, conn: &Connection, pattern: &str) -> DbResult<()> {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            r#"INSERT INTO query_patterns (pattern, frequency, created_at, updated_at)
               VALUES (?1, 1, ?2, ?2)
               ON CONFLICT(pattern) DO UPDATE SET
                 frequency = frequency + 1,
                 updated_at = excluded.updated_at"#,
            params![pattern, now],
        )?;
        Ok(())
    }

    pub fn top_patterns(&self, conn: &Connection, limit: usize) -> DbResult<Vec<PatternStat>> {
        let mut stmt = conn.prepare(
            "SELECT pattern, frequency FROM query_patterns
             ORDER BY frequency DESC, pattern ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(PatternStat {
                    pattern: row.get(0)?,
                    frequency: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ---- overview / stats ----

    /// Chunk counts grouped by an arbitrary column (lang, chunk_type, ...).
    pub fn counts_by(&self, conn: &Connection, column: &str) -> DbResult<Vec<(String, i64)>> {
        let sql = match column {
            "lang" => "SELECT lang, COUNT(*) FROM code_chunks GROUP BY lang ORDER BY 2 DESC",
            "chunk_type" => {
                "SELECT chunk_type, COUNT(*) FROM code_chunks GROUP BY chunk_type ORDER BY 2 DESC"
            }
            "embedding_provider" => {
                "SELECT embedding_provider, COUNT(*) FROM code_chunks
                 GROUP BY embedding_provider ORDER BY 2 DESC"
            }
            _ => {
                return Err(DbError::Sqlite(rusqlite::Error::InvalidParameterName(
                    column.to_string(),
                )));
            }
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// A light listing for the overview operation: first `limit` chunks in
    /// file order.
    pub fn overview(
        &self,
        conn: &Connection,
        limit: usize,
    ) -> DbResult<Vec<(String, String, String, String)>> {
        let mut stmt = conn.prepare(
            "SELECT id, file_path, symbol, chunk_type FROM code_chunks
             ORDER BY file_path ASC, symbol ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS code_chunks (
    id TEXT PRIMARY KEY,
    file_path TEXT NOT NULL,
    symbol TEXT NOT NULL,
    sha TEXT NOT NULL,
    lang TEXT NOT NULL,
    chunk_type TEXT NOT NULL,
    embedding BLOB,
    embedding_provider TEXT NOT NULL,
    embedding_dimensions INTEGER NOT NULL,
    pampa_tags TEXT,
    pampa_intent TEXT,
    pampa_description TEXT,
    doc_comments TEXT,
    variables_used TEXT,
    context_info TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_file_path ON code_chunks(file_path);
CREATE INDEX IF NOT EXISTS idx_chunks_symbol ON code_chunks(symbol);
CREATE INDEX IF NOT EXISTS idx_chunks_lang ON code_chunks(lang);
CREATE INDEX IF NOT EXISTS idx_chunks_provider ON code_chunks(embedding_provider);
CREATE INDEX IF NOT EXISTS idx_chunks_type ON code_chunks(chunk_type);
CREATE INDEX IF NOT EXISTS idx_chunks_tags ON code_chunks(pampa_tags);
CREATE INDEX IF NOT EXISTS idx_chunks_intent ON code_chunks(pampa_intent);
CREATE INDEX IF NOT EXISTS idx_chunks_lang_provider_dims
    ON code_chunks(lang, embedding_provider, embedding_dimensions);

CREATE TABLE IF NOT EXISTS intention_cache (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    query_normalized TEXT NOT NULL UNIQUE,
    original_query TEXT NOT NULL,
    target_sha TEXT NOT NULL,
    confidence REAL NOT NULL,
    usage_count INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    last_used TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_intention_query ON intention_cache(query_normalized);
CREATE INDEX IF NOT EXISTS idx_intention_sha ON intention_cache(target_sha);
CREATE INDEX IF NOT EXISTS idx_intention_usage ON intention_cache(usage_count DESC);

CREATE TABLE IF NOT EXISTS query_patterns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pattern TEXT NOT NULL UNIQUE,
    frequency INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_patterns_frequency ON query_patterns(frequency DESC);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, ChunkMetadata};

    fn sample_chunk(id: &str, file: &str, symbol: &str) -> Chunk {
        let code = format!("function {symbol}() {{}}");
        let sha = crate::storage::sha1_hex(code.as_bytes());
        Chunk {
            id: id.to_string(),
            file_path: file.to_string(),
            symbol: symbol.to_string(),
            sha,
            lang: "javascript".to_string(),
            chunk_type: "function".to_string(),
            code,
            metadata: ChunkMetadata::default(),
            symbol_info: None,
        }
    }

    fn test_db() -> (tempfile::TempDir, MetadataDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = MetadataDb::new(dir.path().join("pampa.db"));
        (dir, db)
    }

    #[test]
    fn embedding_blob_roundtrip() {
        let vector = vec![0.25_f32, -1.5, 3.75, 0.0];
        let blob = encode_embedding(&vector);
        assert_eq!(blob.len(), 4 + 16);
        assert_eq!(decode_embedding(&blob).unwrap(), vector);
    }

    #[test]
    fn embedding_blob_rejects_truncation() {
        let blob = encode_embedding(&[1.0, 2.0]);
        assert!(decode_embedding(&blob[..blob.len() - 1]).is_err());
        assert!(decode_embedding(&[1, 0]).is_err());
    }

    #[test]
    fn provider_filter_hides_other_configs() {
        let (_dir, db) = test_db();
        let conn = db.open_rw().unwrap();

        let a = ChunkRecord::from_parts(&sample_chunk("a:1:x", "a.js", "one"), vec![1.0; 4], "mock", 4);
        let b = ChunkRecord::from_parts(&sample_chunk("b:2:y", "b.js", "two"), vec![1.0; 8], "openai", 8);
        db.upsert_chunk(&conn, &a).unwrap();
        db.upsert_chunk(&conn, &b).unwrap();

        let visible = db.chunks_for_provider(&conn, "mock", 4).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, "a:1:x");

        let configs = db.provider_configs(&conn).unwrap();
        assert_eq!(configs.len(), 2);
    }

    #[test]
    fn missing_db_is_actionable() {
        let (_dir, db) = test_db();
        match db.open_ro() {
            Err(DbError::DatabaseNotFound { path }) => {
                assert!(path.ends_with("pampa.db"));
            }
            other => panic!("expected DatabaseNotFound, got {other:?}"),
        }
    }

    #[test]
    fn intention_cache_hit_bumps_usage() {
        let (_dir, db) = test_db();
        let conn = db.open_rw().unwrap();
        db.intention_record(&conn, "create session", "Create session?", "sha1", 0.9)
            .unwrap();

        let first = db.intention_lookup(&conn, "create session").unwrap().unwrap();
        assert_eq!(first.usage_count, 1);
        let second = db.intention_lookup(&conn, "create session").unwrap().unwrap();
        assert_eq!(second.usage_count, 2);
        assert!(db.intention_lookup(&conn, "unknown").unwrap().is_none());

        // Re-recording overwrites confidence but keeps the row.
        db.intention_record(&conn, "create session", "create session", "sha2", 0.95)
            .unwrap();
        let hit = db.intention_lookup(&conn, "create session").unwrap().unwrap();
        assert_eq!(hit.target_sha, "sha2");
        assert!((hit.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn pattern_frequency_accumulates() {
        let (_dir, db) = test_db();
        let conn = db.open_rw().unwrap();
        db.pattern_record(&conn, "create <Session>").unwrap();
        db.pattern_record(&conn, "create <Session>").unwrap();
        db.pattern_record(&conn, "find <Service>").unwrap();

        let top = db.top_patterns(&conn, 10).unwrap();
        assert_eq!(top[0].pattern, "create <Session>");
        assert_eq!(top[0].frequency, 2);
    }

    #[test]
    fn delete_by_file_returns_shas() {
        let (_dir, db) = test_db();
        let conn = db.open_rw().unwrap();
        let a = ChunkRecord::from_parts(&sample_chunk("a:1:x", "a.js", "one"), vec![0.0; 4], "mock", 4);
        db.upsert_chunk(&conn, &a).unwrap();

        let shas = db.delete_chunks_by_file(&conn, "a.js").unwrap();
        assert_eq!(shas, vec![a.sha.clone()]);
        assert_eq!(db.chunk_count(&conn).unwrap(), 0);
    }
}
