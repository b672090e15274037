//! Ollama daemon embeddings client. Local, so requests skip the shared
//! rate limit.

use crate::embedding::profiles::ModelProfile;
use crate::error::{EmbeddingError, EmbeddingResult};
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "nomic-embed-text";

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Debug)]
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    profile: ModelProfile,
}

impl OllamaProvider {
    pub fn new(base_url: Option<String>, model: Option<String>, profile: ModelProfile) -> Self {
        let mut base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            profile,
        }
    }

    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        let body = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::BadResponse {
                provider: "ollama".to_string(),
                reason: format!("status {status}: {text}"),
            });
        }

        let parsed: EmbeddingResponse =
            response
                .json()
                .await
                .map_err(|e| EmbeddingError::BadResponse {
                    provider: "ollama".to_string(),
                    reason: format!("invalid response body: {e}"),
                })?;

        let expected = self.profile.dimensions;
        if parsed.embedding.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                provider: "ollama".to_string(),
                expected,
                actual: parsed.embedding.len(),
            });
        }
        Ok(parsed.embedding)
    }
}
