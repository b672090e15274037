//! Pluggable embedding providers.
//!
//! The provider is a closed set of capabilities rather than a trait object:
//! local transformers, an Ollama daemon, OpenAI-compatible HTTP, Cohere, and
//! a deterministic mock for tests. The factory resolves `auto` by configured
//! credentials and falls back to the local model.

pub mod cohere;
pub mod local;
pub mod ollama;
pub mod openai;
pub mod profiles;
pub mod rate_limit;

pub use profiles::{ModelProfile, TokenizerKind};
pub use rate_limit::RateLimiter;

use crate::chunking::TokenCounter;
use crate::config::Settings;
use crate::error::{EmbeddingError, EmbeddingResult};
use cohere::CohereProvider;
use local::LocalProvider;
use ollama::OllamaProvider;
use openai::OpenAiProvider;

/// An owned embedding provider; the indexer holds it and passes it to the
/// watcher explicitly, so there is no shared module state.
#[derive(Debug)]
pub enum EmbeddingProvider {
    Local(LocalProvider),
    Ollama(OllamaProvider),
    OpenAi(OpenAiProvider),
    Cohere(CohereProvider),
    Mock(MockProvider),
}

impl EmbeddingProvider {
    /// Resolve a provider by name. `auto` prefers OpenAI when an API key is
    /// configured, then Cohere, then the local model.
    pub fn create(choice: &str, settings: &Settings) -> EmbeddingResult<Self> {
        let resolved = match choice {
            "auto" => {
                if settings.openai_api_key.is_some() {
                    "openai"
                } else if settings.cohere_api_key.is_some() {
                    "cohere"
                } else {
                    "transformers"
                }
            }
            other => other,
        };

        match resolved {
            "openai" => {
                let api_key =
                    settings
                        .openai_api_key
                        .clone()
                        .ok_or_else(|| EmbeddingError::Init {
                            provider: "openai".to_string(),
                            reason: "OPENAI_API_KEY is not set".to_string(),
                        })?;
                Ok(Self::OpenAi(OpenAiProvider::new(
                    api_key,
                    settings.openai_base_url.clone(),
                    settings.openai_embedding_model.clone(),
                    ModelProfile::openai().with_overrides(settings),
                    settings.rate_limit,
                )))
            }
            "cohere" => {
                let api_key =
                    settings
                        .cohere_api_key
                        .clone()
                        .ok_or_else(|| EmbeddingError::Init {
                            provider: "cohere".to_string(),
                            reason: "COHERE_API_KEY is not set".to_string(),
                        })?;
                Ok(Self::Cohere(CohereProvider::new(
                    api_key,
                    settings.cohere_model.clone(),
                    ModelProfile::cohere().with_overrides(settings),
                    settings.rate_limit,
                )))
            }
            "ollama" => Ok(Self::Ollama(OllamaProvider::new(
                settings.ollama_base_url.clone(),
                settings.ollama_model.clone(),
                ModelProfile::ollama().with_overrides(settings),
            ))),
            "transformers" => Ok(Self::Local(LocalProvider::new(
                settings.transformers_model.clone(),
                ModelProfile::transformers().with_overrides(settings),
            ))),
            "mock" => Ok(Self::Mock(MockProvider::new(
                ModelProfile::mock().with_overrides(settings),
            ))),
            other => Err(EmbeddingError::Init {
                provider: other.to_string(),
                reason: "unknown provider; expected auto, openai, cohere, ollama, transformers, or mock"
                    .to_string(),
            }),
        }
    }

    /// One-time initialization (model load for local providers).
    pub async fn init(&mut self) -> EmbeddingResult<()> {
        match self {
            Self::Local(p) => p.init().await,
            _ => Ok(()),
        }
    }

    /// Embed one text. Inputs beyond the profile's character budget are
    /// truncated here as a safety net; the chunker should already be within
    /// limits, so truncation warrants a warning.
    pub async fn generate(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        let budget = self.profile().max_chunk_chars;
        let input = if text.len() > budget {
            let cut = (0..=budget).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0);
            tracing::warn!(
                provider = self.name(),
                len = text.len(),
                budget,
                "embedding input exceeded the provider character budget and was truncated"
            );
            &text[..cut]
        } else {
            text
        };

        match self {
            Self::Local(p) => p.generate(input).await,
            Self::Ollama(p) => p.generate(input).await,
            Self::OpenAi(p) => p.generate(input).await,
            Self::Cohere(p) => p.generate(input).await,
            Self::Mock(p) => Ok(p.generate(input)),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.profile().dimensions
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Local(_) => "transformers",
            Self::Ollama(_) => "ollama",
            Self::OpenAi(_) => "openai",
            Self::Cohere(_) => "cohere",
            Self::Mock(_) => "mock",
        }
    }

    pub fn model_name(&self) -> Option<String> {
        match self {
            Self::Local(p) => Some(p.model_name().to_string()),
            Self::Ollama(p) => Some(p.model().to_string()),
            Self::OpenAi(p) => Some(p.model().to_string()),
            Self::Cohere(p) => Some(p.model().to_string()),
            Self::Mock(_) => None,
        }
    }

    pub fn profile(&self) -> &ModelProfile {
        match self {
            Self::Local(p) => p.profile(),
            Self::Ollama(p) => p.profile(),
            Self::OpenAi(p) => p.profile(),
            Self::Cohere(p) => p.profile(),
            Self::Mock(p) => p.profile(),
        }
    }

    /// Token counter matching the profile's sizing mode.
    ///
    /// Providers whose profile wants an exact tokenizer load it from
    /// `tokenizer.json` next to the project config when present. Otherwise
    /// sizing degrades to character mode, logged once per process.
    pub fn token_counter(&self) -> TokenCounter {
        match self.profile().tokenizer {
            TokenizerKind::Chars => TokenCounter::Chars,
            TokenizerKind::HuggingFace => {
                let vocab = std::path::Path::new("tokenizer.json");
                match TokenCounter::from_file(vocab) {
                    Ok(counter) => counter,
                    Err(reason) => {
                        static WARNED: std::sync::Once = std::sync::Once::new();
                        WARNED.call_once(|| {
                            tracing::warn!(%reason, "tokenizer unavailable, sizing by characters");
                        });
                        TokenCounter::Chars
                    }
                }
            }
        }
    }
}

/// Deterministic hashed bag-of-words embeddings. Similar texts share tokens
/// and therefore cosine mass, which is enough signal for integration tests
/// and offline smoke runs.
#[derive(Debug)]
pub struct MockProvider {
    profile: ModelProfile,
}

impl MockProvider {
    pub fn new(profile: ModelProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    pub fn generate(&self, text: &str) -> Vec<f32> {
        let dim = self.profile.dimensions;
        let mut vector = vec![0.0f32; dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| t.len() > 1)
        {
            let mut hash: u64 = 1469598103934665603;
            for byte in token.to_lowercase().bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            vector[(hash % dim as u64) as usize] += 1.0;
        }
        let magnitude: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for v in &mut vector {
                *v /= magnitude;
            }
        }
        vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn auto_prefers_openai_then_cohere_then_local() {
        let mut settings = mock_settings();
        settings.openai_api_key = Some("sk-test".to_string());
        settings.cohere_api_key = Some("co-test".to_string());
        let p = EmbeddingProvider::create("auto", &settings).unwrap();
        assert_eq!(p.name(), "openai");

        settings.openai_api_key = None;
        let p = EmbeddingProvider::create("auto", &settings).unwrap();
        assert_eq!(p.name(), "cohere");

        settings.cohere_api_key = None;
        let p = EmbeddingProvider::create("auto", &settings).unwrap();
        assert_eq!(p.name(), "transformers");
    }

    #[test]
    fn explicit_openai_without_key_fails() {
        let err = EmbeddingProvider::create("openai", &mock_settings()).unwrap_err();
        assert!(matches!(err, EmbeddingError::Init { .. }));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        assert!(EmbeddingProvider::create("quantum", &mock_settings()).is_err());
    }

    #[tokio::test]
    async fn mock_is_deterministic_and_normalized() {
        let provider = EmbeddingProvider::create("mock", &mock_settings()).unwrap();
        let a = provider.generate("function alpha() {}").await.unwrap();
        let b = provider.generate("function alpha() {}").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), provider.dimensions());
        let magnitude: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn mock_similarity_tracks_shared_tokens() {
        let provider = EmbeddingProvider::create("mock", &mock_settings()).unwrap();
        let query = provider.generate("create checkout session").await.unwrap();
        let close = provider
            .generate("function createCheckout(session) { checkout(session); }")
            .await
            .unwrap();
        let far = provider
            .generate("fn parse_manifest(bytes) { decode(bytes) }")
            .await
            .unwrap();

        let cos = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
        assert!(cos(&query, &close) > cos(&query, &far));
    }

    #[tokio::test]
    async fn oversized_input_is_truncated_not_fatal() {
        let provider = EmbeddingProvider::create("mock", &mock_settings()).unwrap();
        let huge = "token ".repeat(10_000);
        let vector = provider.generate(&huge).await.unwrap();
        assert_eq!(vector.len(), provider.dimensions());
    }
}
