//! Cross-encoder reranking: a local model or a remote rerank API.
//!
//! Both backends produce a stable descending ordering with ranks `1..=N`.
//! Failures here are soft at the search layer; the engine keeps its prior
//! ordering and logs.

use crate::config::Settings;
use crate::error::{RerankError, RerankResult as Result};
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Reranker selection for one search call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankMode {
    #[default]
    Off,
    Transformers,
    Api,
}

impl RerankMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(Self::Off),
            "transformers" => Some(Self::Transformers),
            "api" => Some(Self::Api),
            _ => None,
        }
    }
}

/// One reranked document: its input index and assigned score/rank.
#[derive(Debug, Clone)]
pub struct Reranked {
    pub index: usize,
    pub score: f32,
    pub rank: usize,
}

/// Reranker backends. The explicit per-call mode is authoritative;
/// `PAMPAX_MOCK_RERANKER_TESTS` is a test-only global override that wins
/// over everything.
pub enum Reranker {
    Local(LocalReranker),
    Api(ApiReranker),
    Mock,
}

impl Reranker {
    /// Build the backend for a mode. `Api` without a configured URL is an
    /// init error (and therefore a soft skip at the call site).
    pub fn create(mode: RerankMode, settings: &Settings) -> Result<Option<Self>> {
        if settings.mock_reranker_tests {
            return Ok(Some(Self::Mock));
        }
        match mode {
            RerankMode::Off => Ok(None),
            RerankMode::Transformers => Ok(Some(Self::Local(LocalReranker::new(
                settings.reranker_max_tokens,
            )))),
            RerankMode::Api => {
                let url = settings
                    .rerank_api_url
                    .clone()
                    .ok_or_else(|| RerankError::Init {
                        backend: "api".to_string(),
                        reason: "PAMPAX_RERANK_API_URL is not set".to_string(),
                    })?;
                Ok(Some(Self::Api(ApiReranker::new(
                    url,
                    settings.rerank_api_key.clone(),
                    settings.rerank_model.clone(),
                ))))
            }
        }
    }

    /// Score `(query, doc)` pairs and return a stable descending ordering.
    pub async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<Reranked>> {
        let mut scored = match self {
            Self::Local(backend) => backend.rerank(query, documents).await?,
            Self::Api(backend) => backend.rerank(query, documents, documents.len()).await?,
            Self::Mock => mock_scores(query, documents),
        };
        // Stable sort: equal scores keep their input order.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for (position, entry) in scored.iter_mut().enumerate() {
            entry.rank = position + 1;
        }
        Ok(scored)
    }
}

/// Deterministic token-overlap scorer used when the mock hook is active.
fn mock_scores(query: &str, documents: &[String]) -> Vec<Reranked> {
    let query_tokens: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    documents
        .iter()
        .enumerate()
        .map(|(index, doc)| {
            let lower = doc.to_lowercase();
            let hits = query_tokens.iter().filter(|t| lower.contains(*t)).count();
            Reranked {
                index,
                score: hits as f32 / query_tokens.len().max(1) as f32,
                rank: 0,
            }
        })
        .collect()
}

/// Local cross-encoder loaded once and shared.
pub struct LocalReranker {
    model: Mutex<Option<Arc<Mutex<TextRerank>>>>,
    max_tokens: usize,
}

impl LocalReranker {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            model: Mutex::new(None),
            max_tokens,
        }
    }

    fn model(&self) -> Result<Arc<Mutex<TextRerank>>> {
        let mut slot = self.model.lock().map_err(|_| RerankError::Init {
            backend: "transformers".to_string(),
            reason: "model mutex poisoned".to_string(),
        })?;
        if let Some(model) = slot.as_ref() {
            return Ok(model.clone());
        }
        let loaded = TextRerank::try_new(RerankInitOptions::new(RerankerModel::BGERerankerBase))
            .map_err(|e| RerankError::Init {
                backend: "transformers".to_string(),
                reason: format!("failed to load cross-encoder: {e}"),
            })?;
        let model = Arc::new(Mutex::new(loaded));
        *slot = Some(model.clone());
        Ok(model)
    }

    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<Reranked>> {
        let model = self.model()?;
        // Truncate each document to the token budget (~4 chars per token).
        let budget_chars = self.max_tokens * 4;
        let docs: Vec<String> = documents
            .iter()
            .map(|doc| {
                let cut = (0..=budget_chars.min(doc.len()))
                    .rev()
                    .find(|&i| doc.is_char_boundary(i))
                    .unwrap_or(0);
                doc[..cut].to_string()
            })
            .collect();
        let query = query.to_string();

        let results = tokio::task::spawn_blocking(move || {
            let mut guard = model.lock().map_err(|_| RerankError::Init {
                backend: "transformers".to_string(),
                reason: "model mutex poisoned".to_string(),
            })?;
            guard
                .rerank(query, docs, false, None)
                .map_err(|e| RerankError::Init {
                    backend: "transformers".to_string(),
                    reason: format!("inference failed: {e}"),
                })
        })
        .await
        .map_err(|e| RerankError::Init {
            backend: "transformers".to_string(),
            reason: format!("inference task failed: {e}"),
        })??;

        Ok(results
            .into_iter()
            .map(|r| Reranked {
                index: r.index,
                score: r.score,
                rank: 0,
            })
            .collect())
    }
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct ApiResultEntry {
    index: usize,
    #[serde(alias = "score")]
    relevance_score: f32,
}

/// The accepted response shapes: `{results: [...]}`, `{data: [...]}`, or a
/// bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum ApiResponse {
    Results { results: Vec<ApiResultEntry> },
    Data { data: Vec<ApiResultEntry> },
    Bare(Vec<ApiResultEntry>),
}

/// Remote rerank API client (`POST` with bearer auth).
pub struct ApiReranker {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: Option<String>,
}

impl ApiReranker {
    pub fn new(url: String, api_key: Option<String>, model: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
            model,
        }
    }

    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<Reranked>> {
        let body = ApiRequest {
            model: self.model.as_deref(),
            query,
            documents,
            top_n,
        };
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RerankError::BadStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ApiResponse =
            response
                .json()
                .await
                .map_err(|e| RerankError::BadSchema {
                    reason: e.to_string(),
                })?;
        let entries = match parsed {
            ApiResponse::Results { results } => results,
            ApiResponse::Data { data } => data,
            ApiResponse::Bare(entries) => entries,
        };

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.index >= documents.len() {
                return Err(RerankError::BadSchema {
                    reason: format!(
                        "index {} out of range for {} documents",
                        entry.index,
                        documents.len()
                    ),
                });
            }
            out.push(Reranked {
                index: entry.index,
                score: entry.relevance_score,
                rank: 0,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[tokio::test]
    async fn mock_ranks_by_token_overlap() {
        let reranker = Reranker::Mock;
        let documents = docs(&[
            "fn parse_config()",
            "create checkout session for stripe",
            "create session",
        ]);
        let ranked = reranker
            .rerank("create checkout session", &documents)
            .await
            .unwrap();
        assert_eq!(ranked[0].index, 1);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].index, 2);
        assert_eq!(ranked.len(), 3);
    }

    #[tokio::test]
    async fn ranks_are_dense_and_stable_on_ties() {
        let reranker = Reranker::Mock;
        let documents = docs(&["alpha", "alpha", "beta"]);
        let ranked = reranker.rerank("alpha", &documents).await.unwrap();
        // Tied docs keep their input order.
        assert_eq!(ranked[0].index, 0);
        assert_eq!(ranked[1].index, 1);
        assert_eq!(
            ranked.iter().map(|r| r.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(RerankMode::parse("off"), Some(RerankMode::Off));
        assert_eq!(RerankMode::parse("transformers"), Some(RerankMode::Transformers));
        assert_eq!(RerankMode::parse("api"), Some(RerankMode::Api));
        assert_eq!(RerankMode::parse("gpu"), None);
    }

    #[test]
    fn mock_override_wins_over_mode() {
        let settings = Settings {
            mock_reranker_tests: true,
            ..Settings::default()
        };
        let reranker = Reranker::create(RerankMode::Api, &settings).unwrap();
        assert!(matches!(reranker, Some(Reranker::Mock)));
    }

    #[test]
    fn api_mode_without_url_is_init_error() {
        let reranker = Reranker::create(RerankMode::Api, &Settings::default());
        assert!(reranker.is_err());
    }

    #[test]
    fn response_schema_variants_parse() {
        let results: ApiResponse =
            serde_json::from_str(r#"{"results":[{"index":0,"relevance_score":0.9}]}"#).unwrap();
        let data: ApiResponse =
            serde_json::from_str(r#"{"data":[{"index":1,"relevance_score":0.5}]}"#).unwrap();
        let bare: ApiResponse =
            serde_json::from_str(r#"[{"index":2,"score":0.1}]"#).unwrap();
        assert!(matches!(results, ApiResponse::Results { .. }));
        assert!(matches!(data, ApiResponse::Data { .. }));
        assert!(matches!(bare, ApiResponse::Bare(_)));
    }
}
