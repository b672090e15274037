//! Token- and size-aware chunk analysis.
//!
//! The hybrid strategy: a constant-time character pre-filter decides whether
//! an exact tokenization is needed at all. Estimates are only ever trusted
//! for subdivision-candidate screening (oversized chunks get split anyway);
//! a chunk is never skipped as *too small* on the basis of an estimate.

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;

/// Bounds a chunk's size is classified against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    pub min: usize,
    pub optimal: usize,
    pub max: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeDecision {
    TooSmall,
    Optimal,
    NeedsSubdivision,
    TooLarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeMethod {
    CharEstimate,
    Tokenized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeAnalysis {
    pub size: usize,
    pub decision: SizeDecision,
    pub method: SizeMethod,
}

/// Pluggable token counting. The character counter is both the degraded
/// mode (`tokenizer_unavailable`) and the profile default for providers
/// that size by characters.
pub enum TokenCounter {
    /// ~4 chars per token.
    Chars,
    /// An exact tokenizer (HuggingFace `tokenizers` vocabulary).
    HuggingFace(Box<tokenizers::Tokenizer>),
}

impl TokenCounter {
    /// Load an exact counter from a HuggingFace `tokenizer.json` file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, String> {
        tokenizers::Tokenizer::from_file(path)
            .map(|tok| Self::HuggingFace(Box::new(tok)))
            .map_err(|e| format!("failed to load tokenizer from '{}': {e}", path.display()))
    }

    pub fn count(&self, text: &str) -> usize {
        match self {
            Self::Chars => estimate_tokens(text),
            Self::HuggingFace(tok) => tok
                .encode(text, false)
                .map(|enc| enc.len())
                .unwrap_or_else(|_| estimate_tokens(text)),
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Self::HuggingFace(_))
    }
}

/// Constant-time token estimate: `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

fn classify(size: usize, limits: &ChunkLimits, relaxed: bool) -> SizeDecision {
    let (min, opt_hi, max) = if relaxed {
        (
            (limits.min as f64 * 0.8) as usize,
            (limits.optimal as f64 * 1.2) as usize,
            (limits.max as f64 * 1.2) as usize,
        )
    } else {
        (limits.min, limits.optimal, limits.max)
    };

    if size < min {
        SizeDecision::TooSmall
    } else if size <= opt_hi {
        SizeDecision::Optimal
    } else if size <= max {
        SizeDecision::NeedsSubdivision
    } else {
        SizeDecision::TooLarge
    }
}

const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Size analyzer with a bounded result cache keyed by the code text.
pub struct SizeAnalyzer {
    cache: Mutex<LruCache<u64, SizeAnalysis>>,
}

impl Default for SizeAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SizeAnalyzer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1"),
            )),
        }
    }

    fn cache_key(code: &str, limits: &ChunkLimits) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        code.hash(&mut hasher);
        limits.min.hash(&mut hasher);
        limits.optimal.hash(&mut hasher);
        limits.max.hash(&mut hasher);
        hasher.finish()
    }

    /// Analyze one snippet.
    ///
    /// `allow_estimate_for_skip` may only be passed `true` from subdivision
    /// screening. The indexing skip path MUST pass `false` so a too-small
    /// classification is always backed by a real tokenization.
    pub fn analyze(
        &self,
        code: &str,
        limits: &ChunkLimits,
        counter: &TokenCounter,
        allow_estimate_for_skip: bool,
    ) -> SizeAnalysis {
        let key = Self::cache_key(code, limits);
        if let Some(hit) = self.cache.lock().get(&key) {
            return *hit;
        }

        let estimate = estimate_tokens(code);
        let estimated_decision = classify(estimate, limits, true);

        // Estimates are safe only for the too-large path: those chunks get
        // subdivided regardless, so precision does not change the outcome.
        if allow_estimate_for_skip && estimated_decision == SizeDecision::TooLarge {
            let analysis = SizeAnalysis {
                size: estimate,
                decision: SizeDecision::TooLarge,
                method: SizeMethod::CharEstimate,
            };
            self.cache.lock().put(key, analysis);
            return analysis;
        }

        // For character-mode profiles the counter itself counts chars; that
        // is still the exact measure for those limits, not an estimate.
        let size = counter.count(code);
        let analysis = SizeAnalysis {
            size,
            decision: classify(size, limits, false),
            method: SizeMethod::Tokenized,
        };
        self.cache.lock().put(key, analysis);
        analysis
    }

    /// Batch analysis. The uncached subset is tokenized on a scoped worker
    /// pool; results come back in input order.
    pub fn analyze_batch(
        &self,
        codes: &[&str],
        limits: &ChunkLimits,
        counter: &TokenCounter,
        allow_estimate_for_skip: bool,
    ) -> Vec<SizeAnalysis> {
        let mut results: Vec<Option<SizeAnalysis>> = vec![None; codes.len()];
        let mut missing: Vec<usize> = Vec::new();
        {
            let mut cache = self.cache.lock();
            for (i, code) in codes.iter().enumerate() {
                let key = Self::cache_key(code, limits);
                match cache.get(&key) {
                    Some(hit) => results[i] = Some(*hit),
                    None => missing.push(i),
                }
            }
        }

        if !missing.is_empty() {
            let workers = num_cpus::get().min(missing.len()).max(1);
            let computed: Mutex<Vec<(usize, SizeAnalysis)>> =
                Mutex::new(Vec::with_capacity(missing.len()));
            std::thread::scope(|scope| {
                for shard in missing.chunks(missing.len().div_ceil(workers)) {
                    let computed = &computed;
                    scope.spawn(move || {
                        for &i in shard {
                            let analysis =
                                self.analyze(codes[i], limits, counter, allow_estimate_for_skip);
                            computed.lock().push((i, analysis));
                        }
                    });
                }
            });
            for (i, analysis) in computed.into_inner() {
                results[i] = Some(analysis);
            }
        }

        results
            .into_iter()
            .map(|r| r.expect("every slot filled by cache or workers"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: ChunkLimits = ChunkLimits {
        min: 100,
        optimal: 500,
        max: 700,
    };

    fn code_of_tokens(n: usize) -> String {
        // 4 chars per token under the char counter.
        "abcd".repeat(n)
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn exact_classification_boundaries() {
        let analyzer = SizeAnalyzer::new();
        let counter = TokenCounter::Chars;
        // Char counter: size = chars/4.
        let at_min = code_of_tokens(100);
        let below_min = code_of_tokens(99);
        let at_max = code_of_tokens(700);
        let above_max = code_of_tokens(701);

        assert_eq!(
            analyzer.analyze(&at_min, &LIMITS, &counter, false).decision,
            SizeDecision::Optimal
        );
        assert_eq!(
            analyzer.analyze(&below_min, &LIMITS, &counter, false).decision,
            SizeDecision::TooSmall
        );
        assert_eq!(
            analyzer.analyze(&at_max, &LIMITS, &counter, false).decision,
            SizeDecision::NeedsSubdivision
        );
        assert_eq!(
            analyzer.analyze(&above_max, &LIMITS, &counter, false).decision,
            SizeDecision::TooLarge
        );
    }

    #[test]
    fn estimate_shortcut_only_fires_for_too_large() {
        let analyzer = SizeAnalyzer::new();
        let counter = TokenCounter::Chars;

        // Far above max*1.2: the relaxed estimate says TooLarge, so the
        // shortcut returns a char estimate.
        let huge = code_of_tokens(2000);
        let analysis = analyzer.analyze(&huge, &LIMITS, &counter, true);
        assert_eq!(analysis.method, SizeMethod::CharEstimate);
        assert_eq!(analysis.decision, SizeDecision::TooLarge);

        // A small snippet with the flag set still gets the exact path: the
        // skip decision may not rest on an estimate.
        let small = code_of_tokens(50);
        let analysis = analyzer.analyze(&small, &LIMITS, &counter, true);
        assert_eq!(analysis.method, SizeMethod::Tokenized);
        assert_eq!(analysis.decision, SizeDecision::TooSmall);
    }

    #[test]
    fn without_flag_never_estimates() {
        let analyzer = SizeAnalyzer::new();
        let counter = TokenCounter::Chars;
        let huge = code_of_tokens(5000);
        let analysis = analyzer.analyze(&huge, &LIMITS, &counter, false);
        assert_eq!(analysis.method, SizeMethod::Tokenized);
    }

    #[test]
    fn cache_returns_identical_analysis() {
        let analyzer = SizeAnalyzer::with_capacity(4);
        let counter = TokenCounter::Chars;
        let code = code_of_tokens(300);
        let first = analyzer.analyze(&code, &LIMITS, &counter, false);
        let second = analyzer.analyze(&code, &LIMITS, &counter, false);
        assert_eq!(first, second);
    }

    #[test]
    fn batch_matches_single() {
        let analyzer = SizeAnalyzer::new();
        let counter = TokenCounter::Chars;
        let codes: Vec<String> = (1..20).map(|i| code_of_tokens(i * 60)).collect();
        let refs: Vec<&str> = codes.iter().map(String::as_str).collect();

        let batch = analyzer.analyze_batch(&refs, &LIMITS, &counter, false);
        for (code, got) in refs.iter().zip(&batch) {
            let single = analyzer.analyze(code, &LIMITS, &counter, false);
            assert_eq!(*got, single);
        }
    }
}
