//! Model profiles: the sizing constants every other component reads.

use crate::chunking::ChunkLimits;
use crate::config::Settings;
use serde::{Deserialize, Serialize};

/// How a profile measures chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    /// Character counting (~4 chars per token for the estimates).
    Chars,
    /// An exact vocabulary tokenizer.
    HuggingFace,
}

/// Sizing and dimension constants for one embedding model family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    pub max_tokens: usize,
    pub optimal_tokens: usize,
    pub min_chunk_tokens: usize,
    pub max_chunk_tokens: usize,
    pub overlap_tokens: usize,
    /// Character safety net applied at the provider boundary.
    pub max_chunk_chars: usize,
    pub dimensions: usize,
    pub use_tokens: bool,
    pub tokenizer: TokenizerKind,
}

impl ModelProfile {
    pub const fn openai() -> Self {
        Self {
            max_tokens: 8191,
            optimal_tokens: 400,
            min_chunk_tokens: 60,
            max_chunk_tokens: 1200,
            overlap_tokens: 80,
            max_chunk_chars: 24_000,
            dimensions: 1536,
            use_tokens: true,
            tokenizer: TokenizerKind::HuggingFace,
        }
    }

    pub const fn cohere() -> Self {
        Self {
            max_tokens: 512,
            optimal_tokens: 300,
            min_chunk_tokens: 50,
            max_chunk_tokens: 480,
            overlap_tokens: 50,
            max_chunk_chars: 12_000,
            dimensions: 1024,
            use_tokens: true,
            tokenizer: TokenizerKind::HuggingFace,
        }
    }

    pub const fn ollama() -> Self {
        Self {
            max_tokens: 2048,
            optimal_tokens: 350,
            min_chunk_tokens: 50,
            max_chunk_tokens: 1000,
            overlap_tokens: 60,
            max_chunk_chars: 16_000,
            dimensions: 768,
            use_tokens: false,
            tokenizer: TokenizerKind::Chars,
        }
    }

    pub const fn transformers() -> Self {
        Self {
            max_tokens: 512,
            optimal_tokens: 250,
            min_chunk_tokens: 40,
            max_chunk_tokens: 450,
            overlap_tokens: 40,
            max_chunk_chars: 8_000,
            dimensions: 384,
            use_tokens: false,
            tokenizer: TokenizerKind::Chars,
        }
    }

    pub const fn mock() -> Self {
        Self {
            max_tokens: 4096,
            optimal_tokens: 300,
            min_chunk_tokens: 10,
            max_chunk_tokens: 900,
            overlap_tokens: 40,
            max_chunk_chars: 16_000,
            dimensions: 64,
            use_tokens: false,
            tokenizer: TokenizerKind::Chars,
        }
    }

    /// Apply the `PAMPAX_MAX_TOKENS` / `PAMPAX_DIMENSIONS` overrides.
    pub fn with_overrides(mut self, settings: &Settings) -> Self {
        if let Some(max) = settings.max_tokens {
            self.max_tokens = max;
            self.max_chunk_tokens = self.max_chunk_tokens.min(max);
            self.optimal_tokens = self.optimal_tokens.min(max);
        }
        if let Some(dims) = settings.dimensions {
            self.dimensions = dims;
        }
        self
    }

    /// Bounds the chunker classifies against.
    pub fn chunk_limits(&self) -> ChunkLimits {
        ChunkLimits {
            min: self.min_chunk_tokens,
            optimal: self.optimal_tokens,
            max: self.max_chunk_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_clamp_chunk_bounds() {
        let settings = Settings {
            max_tokens: Some(256),
            dimensions: Some(512),
            ..Settings::default()
        };
        let profile = ModelProfile::openai().with_overrides(&settings);
        assert_eq!(profile.max_tokens, 256);
        assert!(profile.max_chunk_tokens <= 256);
        assert_eq!(profile.dimensions, 512);
    }

    #[test]
    fn limits_are_ordered() {
        for profile in [
            ModelProfile::openai(),
            ModelProfile::cohere(),
            ModelProfile::ollama(),
            ModelProfile::transformers(),
            ModelProfile::mock(),
        ] {
            let limits = profile.chunk_limits();
            assert!(limits.min < limits.optimal);
            assert!(limits.optimal < limits.max);
        }
    }
}
