//! Configuration for the semantic code memory.
//!
//! Layered configuration in the order: built-in defaults, a `pampax.toml`
//! file at the project root, then environment variables. All knobs the
//! engine recognizes are environment-addressable:
//!
//! - `PAMPAX_ENCRYPTION_KEY` — 32 bytes, base64 or hex; activates `auto` encryption
//! - `PAMPAX_MAX_TOKENS`, `PAMPAX_DIMENSIONS` — model profile overrides
//! - `PAMPAX_RATE_LIMIT` — requests-per-minute cap for API providers
//! - `PAMPAX_RERANKER_DEFAULT` — `off` | `transformers` | `api`
//! - `PAMPAX_RERANK_API_URL`, `PAMPAX_RERANK_API_KEY`, `PAMPAX_RERANK_MODEL`,
//!   `PAMPAX_RERANKER_MAX`, `PAMPAX_RERANKER_MAX_TOKENS`
//! - `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `PAMPAX_OPENAI_EMBEDDING_MODEL` (or `OPENAI_MODEL`)
//! - `COHERE_API_KEY`, `PAMPAX_COHERE_MODEL`, `PAMPAX_OLLAMA_MODEL`, `PAMPAX_TRANSFORMERS_MODEL`
//! - `PAMPAX_MOCK_RERANKER_TESTS` — deterministic reranker for tests

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Encryption policy for chunk bodies: `on`, `off`, or `auto`.
    #[serde(default = "default_encrypt_mode")]
    pub encryption_mode: String,

    /// 32-byte key, base64 or hex encoded. Presence activates `auto` mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,

    /// Override for the model profile's max token budget.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,

    /// Override for the model profile's embedding dimensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,

    /// Requests per minute for API embedding providers. `None` = unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,

    /// Default reranker mode when a search does not pass one explicitly.
    #[serde(default = "default_reranker")]
    pub reranker_default: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_api_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_model: Option<String>,

    /// Cap on candidates sent to the reranker.
    #[serde(default = "default_reranker_max")]
    pub reranker_max: usize,

    /// Per-document token budget for the local cross-encoder.
    #[serde(default = "default_reranker_max_tokens")]
    pub reranker_max_tokens: usize,

    /// Global test hook: forces the deterministic mock reranker.
    #[serde(default)]
    pub mock_reranker_tests: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cohere_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cohere_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ollama_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ollama_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transformers_model: Option<String>,

    /// Watcher debounce in milliseconds; clamped to >= 50 at use sites.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_encrypt_mode() -> String {
    "auto".to_string()
}
fn default_reranker() -> String {
    "off".to_string()
}
fn default_reranker_max() -> usize {
    200
}
fn default_reranker_max_tokens() -> usize {
    512
}
fn default_debounce_ms() -> u64 {
    300
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            encryption_mode: default_encrypt_mode(),
            encryption_key: None,
            max_tokens: None,
            dimensions: None,
            rate_limit: None,
            reranker_default: default_reranker(),
            rerank_api_url: None,
            rerank_api_key: None,
            rerank_model: None,
            reranker_max: default_reranker_max(),
            reranker_max_tokens: default_reranker_max_tokens(),
            mock_reranker_tests: false,
            openai_api_key: None,
            openai_base_url: None,
            openai_embedding_model: None,
            cohere_api_key: None,
            cohere_model: None,
            ollama_model: None,
            ollama_base_url: None,
            transformers_model: None,
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Settings {
    /// Load settings for a project rooted at `base`.
    ///
    /// `OPENAI_*` / `COHERE_API_KEY` are read under their conventional names;
    /// everything else comes in under the `PAMPAX_` prefix.
    pub fn load(base: &Path) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(base.join("pampax.toml")))
            .merge(Env::raw().only(&["OPENAI_API_KEY", "OPENAI_BASE_URL", "COHERE_API_KEY"]))
            .merge(
                Env::raw()
                    .only(&["OPENAI_MODEL"])
                    .map(|_| "openai_embedding_model".into()),
            )
            .merge(Env::prefixed("PAMPAX_"))
            .extract()
    }

    /// Effective reranker mode for a call that did not pass one.
    pub fn default_reranker_mode(&self) -> &str {
        &self.reranker_default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert_eq!(s.encryption_mode, "auto");
        assert_eq!(s.reranker_default, "off");
        assert_eq!(s.reranker_max, 200);
        assert_eq!(s.reranker_max_tokens, 512);
        assert!(s.rate_limit.is_none());
    }

    #[test]
    fn toml_layer_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pampax.toml"),
            "reranker_default = \"api\"\nrate_limit = 120\n",
        )
        .unwrap();
        let s = Settings::load(dir.path()).unwrap();
        assert_eq!(s.reranker_default, "api");
        assert_eq!(s.rate_limit, Some(120));
    }
}
