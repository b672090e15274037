//! In-memory BM25 lexical index, built lazily per `(base path, provider,
//! dimensions)` and flushed whenever the indexer mutates the database.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

const K1: f32 = 1.2;
const B: f32 = 0.75;

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .flat_map(|word| word.split('_'))
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

struct DocStats {
    term_freq: HashMap<String, u32>,
    len: usize,
}

/// Plain BM25 over chunk documents. Documents are chunk ids; the text is
/// the symbol, path, description, intent, and decompressed body joined.
#[derive(Default)]
pub struct Bm25Index {
    docs: HashMap<String, DocStats>,
    doc_freqs: HashMap<String, usize>,
    total_len: usize,
    avg_doc_len: f32,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&mut self, id: String, text: &str) {
        let tokens = tokenize(text);
        let mut term_freq: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *term_freq.entry(token.clone()).or_default() += 1;
        }
        for term in term_freq.keys() {
            *self.doc_freqs.entry(term.clone()).or_default() += 1;
        }
        self.total_len += tokens.len();
        self.docs.insert(
            id,
            DocStats {
                term_freq,
                len: tokens.len(),
            },
        );
    }

    /// Recompute corpus statistics after bulk adds.
    pub fn consolidate(&mut self) {
        self.avg_doc_len = if self.docs.is_empty() {
            0.0
        } else {
            self.total_len as f32 / self.docs.len() as f32
        };
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Top `limit` documents for the query, optionally restricted to an
    /// allowed id set. Scores are descending; ties break on id for
    /// determinism.
    pub fn search(
        &self,
        query: &str,
        limit: usize,
        allowed: Option<&HashSet<String>>,
    ) -> Vec<(String, f32)> {
        let query_tokens: Vec<String> = {
            let mut seen = HashSet::new();
            tokenize(query)
                .into_iter()
                .filter(|t| seen.insert(t.clone()))
                .collect()
        };
        if query_tokens.is_empty() || self.docs.is_empty() {
            return Vec::new();
        }

        let total_docs = self.docs.len() as f32;
        let mut scored: Vec<(String, f32)> = self
            .docs
            .iter()
            .filter(|(id, _)| allowed.is_none_or(|set| set.contains(*id)))
            .filter_map(|(id, doc)| {
                let mut score = 0.0f32;
                for token in &query_tokens {
                    let Some(&tf) = doc.term_freq.get(token) else {
                        continue;
                    };
                    let df = *self.doc_freqs.get(token).unwrap_or(&0) as f32;
                    let idf = (((total_docs - df + 0.5) / (df + 0.5)) + 1.0).ln().max(0.0);
                    let tf = tf as f32;
                    let denom =
                        tf + K1 * (1.0 - B + B * (doc.len as f32 / self.avg_doc_len.max(1.0)));
                    if denom > 0.0 {
                        score += idf * (tf * (K1 + 1.0) / denom);
                    }
                }
                (score > 0.0).then(|| (id.clone(), score))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        scored
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    base: PathBuf,
    provider: String,
    dimensions: usize,
}

/// Process-wide index cache. Writes serialize on a short-held mutex; reads
/// clone the `Arc` and score lock-free.
static CACHE: LazyLock<Mutex<HashMap<CacheKey, Arc<Bm25Index>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Get the cached index for a scope, building it with `build` on a miss.
pub fn cached_or_build<F>(
    base: &Path,
    provider: &str,
    dimensions: usize,
    build: F,
) -> Arc<Bm25Index>
where
    F: FnOnce() -> Bm25Index,
{
    let key = CacheKey {
        base: base.to_path_buf(),
        provider: provider.to_string(),
        dimensions,
    };
    if let Some(index) = CACHE.lock().get(&key) {
        return index.clone();
    }
    // Build outside the lock; BM25 construction reads chunk bodies.
    let built = Arc::new(build());
    CACHE.lock().entry(key).or_insert(built).clone()
}

/// Drop every cached index for a base path. Called on any index mutation.
pub fn invalidate(base: &Path) {
    CACHE.lock().retain(|key, _| key.base != base);
}
