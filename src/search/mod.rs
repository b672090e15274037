//! Hybrid retrieval engine.
//!
//! A search runs through seven phases: intention-cache lookup, pattern
//! recording, vector scoring with soft metadata boosts, symbol boosting,
//! BM25 fusion via reciprocal ranks, optional cross-encoder reranking, and
//! final composition. Failures surface as structured responses, never as
//! panics or errors to the caller.

pub mod bm25;
pub mod intent;
pub mod rerank;
pub mod scope;

pub use rerank::{RerankMode, Reranker};
pub use scope::{ContextPack, PackError, SearchScope};

use crate::config::Settings;
use crate::embedding::EmbeddingProvider;
use crate::error::DbError;
use crate::storage::{ChunkRecord, ChunkStore, Codemap, MetadataDb, ProjectLayout};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

const RRF_K: f32 = 60.0;
const BM25_FLOOR: usize = 60;
const INTENT_LEARN_THRESHOLD: f32 = 0.8;
const SYMBOL_BOOST_SCALE: f32 = 0.1;

/// Semantic failure categories surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    DatabaseNotFound,
    NoChunksFound,
    NoRelevantMatches,
    SearchError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchFailure {
    pub code: FailureCode,
    pub message: String,
    pub suggestion: String,
}

/// One ranked hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultItem {
    pub chunk_id: String,
    pub file_path: String,
    pub symbol: String,
    pub lang: String,
    pub sha: String,
    pub chunk_type: String,
    /// Final score, clamped to `[0, 1]`.
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_raw: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hybrid_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reranker_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reranker_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_boost: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbol_boost_sources: Vec<String>,
    /// `intention` | `vector` | `hybrid` | `reranked`
    pub search_type: String,
    /// Decompressed chunk body, when it could be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Structured search outcome: `success == false` carries the failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub success: bool,
    pub results: Vec<SearchResultItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SearchFailure>,
}

impl SearchResponse {
    fn ok(results: Vec<SearchResultItem>) -> Self {
        Self {
            success: true,
            results,
            error: None,
        }
    }

    fn fail(code: FailureCode, message: String, suggestion: String) -> Self {
        Self {
            success: false,
            results: Vec::new(),
            error: Some(SearchFailure {
                code,
                message,
                suggestion,
            }),
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

struct Candidate {
    record: ChunkRecord,
    item: SearchResultItem,
}

/// Read-only retrieval over one project's index.
pub struct SearchEngine {
    layout: ProjectLayout,
    db: MetadataDb,
    store: ChunkStore,
    settings: Settings,
}

impl SearchEngine {
    pub fn new(layout: ProjectLayout, store: ChunkStore, settings: Settings) -> Self {
        let db = MetadataDb::new(layout.db_path());
        Self {
            layout,
            db,
            store,
            settings,
        }
    }

    /// Run the full pipeline. Never returns an error: failures come back as
    /// structured responses.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        provider: &EmbeddingProvider,
        scope: &SearchScope,
    ) -> SearchResponse {
        match self.search_inner(query, limit.max(1), provider, scope).await {
            Ok(response) => response,
            Err(failure) => SearchResponse {
                success: false,
                results: Vec::new(),
                error: Some(failure),
            },
        }
    }

    async fn search_inner(
        &self,
        query: &str,
        limit: usize,
        provider: &EmbeddingProvider,
        scope: &SearchScope,
    ) -> Result<SearchResponse, SearchFailure> {
        if !self.db.exists() {
            return Ok(SearchResponse::fail(
                FailureCode::DatabaseNotFound,
                format!("No index database at '{}'", self.db.path().display()),
                "Run indexing first to build the database".to_string(),
            ));
        }
        let conn = self.db.open_rw().map_err(db_failure)?;

        // Phase 1: intention shortcut.
        let mut intent_results: Vec<SearchResultItem> = Vec::new();
        if scope.symbol_boost {
            let normalized = intent::normalize_intent(query);
            if let Ok(Some(hit)) = self.db.intention_lookup(&conn, &normalized)
                && let Ok(Some((chunk_id, file_path, symbol))) =
                    self.db.chunk_by_sha(&conn, &hit.target_sha)
            {
                match self.store.read(&hit.target_sha) {
                    Ok(body) => intent_results.push(SearchResultItem {
                        chunk_id,
                        file_path,
                        symbol,
                        lang: String::new(),
                        sha: hit.target_sha.clone(),
                        chunk_type: String::new(),
                        score: hit.confidence as f32,
                        score_raw: None,
                        vector_score: None,
                        bm25_score: None,
                        hybrid_score: None,
                        bm25_rank: None,
                        vector_rank: None,
                        reranker_score: None,
                        reranker_rank: None,
                        symbol_boost: None,
                        symbol_boost_sources: Vec::new(),
                        search_type: "intention".to_string(),
                        code: Some(String::from_utf8_lossy(&body).into_owned()),
                    }),
                    Err(e) => {
                        tracing::warn!(sha = %hit.target_sha, error = %e, "intention hit body unreadable, skipping shortcut");
                    }
                }
            }
        }

        // Phase 2: pattern analytics.
        if let Err(e) = self.db.pattern_record(&conn, &intent::query_pattern(query)) {
            tracing::debug!(error = %e, "query pattern recording failed");
        }

        // Phase 3: vector candidates.
        let provider_name = provider.name();
        let dimensions = provider.dimensions();
        let rows = self
            .db
            .chunks_for_provider(&conn, provider_name, dimensions)
            .map_err(db_failure)?;
        if rows.is_empty() {
            let total = self.db.chunk_count(&conn).map_err(db_failure)?;
            let message = if total == 0 {
                "The index contains no chunks".to_string()
            } else {
                format!(
                    "No chunks embedded with provider '{provider_name}' at {dimensions} dimensions \
                     (the index holds {total} chunks under other configurations)"
                )
            };
            return Ok(SearchResponse::fail(
                FailureCode::NoChunksFound,
                message,
                "Re-run indexing with this provider, or search with the provider the index was built with"
                    .to_string(),
            ));
        }

        let globs = scope.glob_set();
        let scoped: Vec<ChunkRecord> = rows
            .into_iter()
            .filter(|row| scope.matches(&row.file_path, &row.tags, &row.lang, globs.as_ref()))
            .collect();
        if scoped.is_empty() {
            return Ok(SearchResponse::fail(
                FailureCode::NoRelevantMatches,
                "No indexed chunks match the requested scope".to_string(),
                "Relax the path_glob, tags, or lang filters".to_string(),
            ));
        }

        let query_embedding = provider.generate(query).await.map_err(|e| SearchFailure {
            code: FailureCode::SearchError,
            message: format!("query embedding failed: {e}"),
            suggestion: "Check provider credentials and connectivity".to_string(),
        })?;

        let normalized_query = intent::normalize_query(query);
        let mut candidates: Vec<Candidate> = scoped
            .into_iter()
            .map(|record| {
                let vector_score = cosine_similarity(&query_embedding, &record.embedding);
                let mut score = vector_score;
                if let Some(intent_text) = &record.intent {
                    let intent_lower = intent_text.to_lowercase();
                    if intent_lower.contains(&normalized_query)
                        || normalized_query.contains(&intent_lower)
                    {
                        score += 0.2;
                    }
                }
                for tag in &record.tags {
                    if normalized_query.contains(tag.as_str()) {
                        score += 0.1;
                    }
                }
                let (clamped, raw) = if score > 1.0 {
                    (1.0, Some(score))
                } else {
                    (score, None)
                };
                let item = SearchResultItem {
                    chunk_id: record.id.clone(),
                    file_path: record.file_path.clone(),
                    symbol: record.symbol.clone(),
                    lang: record.lang.clone(),
                    sha: record.sha.clone(),
                    chunk_type: record.chunk_type.clone(),
                    score: clamped,
                    score_raw: raw,
                    vector_score: Some(vector_score),
                    bm25_score: None,
                    hybrid_score: None,
                    bm25_rank: None,
                    vector_rank: None,
                    reranker_score: None,
                    reranker_rank: None,
                    symbol_boost: None,
                    symbol_boost_sources: Vec::new(),
                    search_type: "vector".to_string(),
                    code: None,
                };
                Candidate { record, item }
            })
            .collect();

        // Phase 4: symbol boost from declared names.
        if scope.symbol_boost {
            let codemap = Codemap::load(&self.layout.codemap_path());
            for candidate in &mut candidates {
                let mut sources: Vec<String> = Vec::new();
                let mut consider = |name: &str, sources: &mut Vec<String>| {
                    let lowered = name.to_lowercase();
                    if lowered.len() > 2
                        && normalized_query.contains(&lowered)
                        && !sources.contains(&name.to_string())
                    {
                        sources.push(name.to_string());
                    }
                };
                consider(&candidate.record.symbol, &mut sources);
                if let Some(entry) = codemap.get(&candidate.record.id) {
                    for param in &entry.parameters {
                        consider(&param.name, &mut sources);
                    }
                    for callee in &entry.calls {
                        consider(callee, &mut sources);
                    }
                }
                if !sources.is_empty() {
                    let boost = sources.len() as f32 * SYMBOL_BOOST_SCALE;
                    candidate.item.symbol_boost = Some(boost);
                    candidate.item.symbol_boost_sources = sources;
                }
            }
        }

        candidates.sort_by(|a, b| {
            let key = |c: &Candidate| {
                (
                    c.item.score,
                    c.item.symbol_boost.unwrap_or(0.0),
                    c.item.hybrid_score.unwrap_or(0.0),
                )
            };
            let (s1, b1, h1) = key(a);
            let (s2, b2, h2) = key(b);
            s2.partial_cmp(&s1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b2.partial_cmp(&b1).unwrap_or(std::cmp::Ordering::Equal))
                .then(h2.partial_cmp(&h1).unwrap_or(std::cmp::Ordering::Equal))
        });
        for (position, candidate) in candidates.iter_mut().enumerate() {
            candidate.item.vector_rank = Some(position + 1);
        }

        // Phase 5: lexical candidates fused by reciprocal rank.
        if scope.hybrid && scope.bm25 {
            self.fuse_bm25(query, limit, provider_name, dimensions, &mut candidates);
        }

        // Phase 6: rerank the top slice; failures keep the prior order.
        let mode = scope
            .reranker
            .or_else(|| RerankMode::parse(self.settings.default_reranker_mode()))
            .unwrap_or(RerankMode::Off);
        if mode != RerankMode::Off && candidates.len() > 1 {
            self.apply_rerank(query, mode, &mut candidates).await;
        }

        // Phase 7: compose.
        let mut seen: HashSet<String> = intent_results.iter().map(|r| r.chunk_id.clone()).collect();
        let mut composed = intent_results;
        for candidate in candidates {
            if composed.len() >= limit {
                break;
            }
            if seen.insert(candidate.item.chunk_id.clone()) {
                composed.push(candidate.item);
            }
        }
        composed.truncate(limit);

        for item in &mut composed {
            if item.code.is_none() {
                match self.store.read(&item.sha) {
                    Ok(body) => item.code = Some(String::from_utf8_lossy(&body).into_owned()),
                    Err(e) => tracing::debug!(sha = %item.sha, error = %e, "result body unreadable"),
                }
            }
        }

        if composed.is_empty() {
            return Ok(SearchResponse::fail(
                FailureCode::NoRelevantMatches,
                format!("Nothing relevant found for '{query}'"),
                "Try a broader query or different wording".to_string(),
            ));
        }

        // Learn high-confidence top results as intentions.
        if let Some(top) = composed.first()
            && top.search_type != "intention"
            && top.score > INTENT_LEARN_THRESHOLD
        {
            let normalized = intent::normalize_intent(query);
            if let Err(e) =
                self.db
                    .intention_record(&conn, &normalized, query, &top.sha, top.score as f64)
            {
                tracing::debug!(error = %e, "intention learning failed");
            }
        }

        Ok(SearchResponse::ok(composed))
    }

    fn fuse_bm25(
        &self,
        query: &str,
        limit: usize,
        provider_name: &str,
        dimensions: usize,
        candidates: &mut Vec<Candidate>,
    ) {
        let index = bm25::cached_or_build(self.layout.root(), provider_name, dimensions, || {
            let mut index = bm25::Bm25Index::new();
            let Ok(conn) = self.db.open_ro() else {
                return index;
            };
            let Ok(rows) = self.db.chunks_for_provider(&conn, provider_name, dimensions) else {
                return index;
            };
            for row in rows {
                let body = self
                    .store
                    .read(&row.sha)
                    .map(|b| String::from_utf8_lossy(&b).into_owned())
                    .unwrap_or_default();
                let text = format!(
                    "{} {} {} {} {}",
                    row.symbol,
                    row.file_path,
                    row.description.as_deref().unwrap_or(""),
                    row.intent.as_deref().unwrap_or(""),
                    body
                );
                index.add_document(row.id, &text);
            }
            index.consolidate();
            index
        });
        if index.is_empty() {
            return;
        }

        let allowed: HashSet<String> = candidates.iter().map(|c| c.item.chunk_id.clone()).collect();
        let lexical = index.search(query, limit.max(BM25_FLOOR), Some(&allowed));
        if lexical.is_empty() {
            return;
        }

        let bm25_ranks: HashMap<&str, (usize, f32)> = lexical
            .iter()
            .enumerate()
            .map(|(position, (id, score))| (id.as_str(), (position + 1, *score)))
            .collect();

        for candidate in candidates.iter_mut() {
            let vector_rank = candidate.item.vector_rank.unwrap_or(usize::MAX);
            let mut rrf = 1.0 / (RRF_K + vector_rank as f32);
            if let Some((rank, score)) = bm25_ranks.get(candidate.item.chunk_id.as_str()) {
                rrf += 1.0 / (RRF_K + *rank as f32);
                candidate.item.bm25_rank = Some(*rank);
                candidate.item.bm25_score = Some(*score);
            }
            candidate.item.hybrid_score = Some(rrf);
            candidate.item.search_type = "hybrid".to_string();
        }

        // Ties on summed RRF break toward the better lexical rank, then the
        // better vector rank.
        candidates.sort_by(|a, b| {
            b.item
                .hybrid_score
                .partial_cmp(&a.item.hybrid_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    a.item
                        .bm25_rank
                        .unwrap_or(usize::MAX)
                        .cmp(&b.item.bm25_rank.unwrap_or(usize::MAX))
                })
                .then_with(|| {
                    a.item
                        .vector_rank
                        .unwrap_or(usize::MAX)
                        .cmp(&b.item.vector_rank.unwrap_or(usize::MAX))
                })
        });
    }

    async fn apply_rerank(&self, query: &str, mode: RerankMode, candidates: &mut Vec<Candidate>) {
        let reranker = match Reranker::create(mode, &self.settings) {
            Ok(Some(reranker)) => reranker,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "reranker unavailable, keeping prior order");
                return;
            }
        };

        let slice = candidates.len().min(self.settings.reranker_max).min(200);
        let documents: Vec<String> = candidates[..slice]
            .iter()
            .map(|candidate| {
                self.store
                    .read(&candidate.record.sha)
                    .map(|b| String::from_utf8_lossy(&b).into_owned())
                    .unwrap_or_else(|_| {
                        format!("{} {}", candidate.record.symbol, candidate.record.file_path)
                    })
            })
            .collect();

        match reranker.rerank(query, &documents).await {
            Ok(ranked) => {
                let mut order: Vec<usize> = Vec::with_capacity(slice);
                for entry in &ranked {
                    candidates[entry.index].item.reranker_score = Some(entry.score);
                    candidates[entry.index].item.reranker_rank = Some(entry.rank);
                    candidates[entry.index].item.search_type = "reranked".to_string();
                    order.push(entry.index);
                }
                // Reorder the reranked slice in rank order; the tail keeps
                // its previous ordering.
                let mut reordered: Vec<Candidate> = Vec::with_capacity(candidates.len());
                let mut taken: HashSet<usize> = HashSet::new();
                for index in order {
                    if taken.insert(index) {
                        reordered.push(std::mem::replace(
                            &mut candidates[index],
                            Candidate::placeholder(),
                        ));
                    }
                }
                for (index, candidate) in candidates.drain(..).enumerate() {
                    if !taken.contains(&index) && !candidate.item.chunk_id.is_empty() {
                        reordered.push(candidate);
                    }
                }
                *candidates = reordered;
            }
            Err(e) => {
                tracing::warn!(error = %e, "reranking failed, keeping prior order");
            }
        }
    }
}

impl Candidate {
    /// Hollow slot used while reordering after a rerank.
    fn placeholder() -> Self {
        Self {
            record: ChunkRecord {
                id: String::new(),
                file_path: String::new(),
                symbol: String::new(),
                sha: String::new(),
                lang: String::new(),
                chunk_type: String::new(),
                embedding: Vec::new(),
                provider: String::new(),
                dimensions: 0,
                tags: Vec::new(),
                intent: None,
                description: None,
                doc_comment: None,
                variables: Vec::new(),
                context: Default::default(),
            },
            item: SearchResultItem {
                chunk_id: String::new(),
                file_path: String::new(),
                symbol: String::new(),
                lang: String::new(),
                sha: String::new(),
                chunk_type: String::new(),
                score: 0.0,
                score_raw: None,
                vector_score: None,
                bm25_score: None,
                hybrid_score: None,
                bm25_rank: None,
                vector_rank: None,
                reranker_score: None,
                reranker_rank: None,
                symbol_boost: None,
                symbol_boost_sources: Vec::new(),
                search_type: String::new(),
                code: None,
            },
        }
    }
}

fn db_failure(e: DbError) -> SearchFailure {
    match e {
        DbError::DatabaseNotFound { path } => SearchFailure {
            code: FailureCode::DatabaseNotFound,
            message: format!("No index database at '{}'", path.display()),
            suggestion: "Run indexing first to build the database".to_string(),
        },
        other => SearchFailure {
            code: FailureCode::SearchError,
            message: other.to_string(),
            suggestion: "Re-run indexing if the database is corrupt".to_string(),
        },
    }
}
