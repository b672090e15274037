//! Cohere embeddings client.

use crate::embedding::profiles::ModelProfile;
use crate::embedding::rate_limit::RateLimiter;
use crate::error::{EmbeddingError, EmbeddingResult};
use serde::{Deserialize, Serialize};

const EMBED_URL: &str = "https://api.cohere.ai/v1/embed";
const DEFAULT_MODEL: &str = "embed-english-v3.0";

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    texts: [&'a str; 1],
    input_type: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct CohereProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    profile: ModelProfile,
    limiter: RateLimiter,
}

impl std::fmt::Debug for CohereProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CohereProvider")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

impl CohereProvider {
    pub fn new(
        api_key: String,
        model: Option<String>,
        profile: ModelProfile,
        rate_limit: Option<u32>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            profile,
            limiter: RateLimiter::new(rate_limit),
        }
    }

    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        let expected = self.profile.dimensions;
        let vector = self.limiter.execute(|| self.request(text)).await?;
        if vector.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                provider: "cohere".to_string(),
                expected,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }

    async fn request(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        let body = EmbedRequest {
            model: &self.model,
            texts: [text],
            input_type: "search_document",
        };
        let response = self
            .client
            .post(EMBED_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(EmbeddingError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::BadResponse {
                provider: "cohere".to_string(),
                reason: format!("status {status}: {text}"),
            });
        }

        let parsed: EmbedResponse =
            response
                .json()
                .await
                .map_err(|e| EmbeddingError::BadResponse {
                    provider: "cohere".to_string(),
                    reason: format!("invalid response body: {e}"),
                })?;
        parsed
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::BadResponse {
                provider: "cohere".to_string(),
                reason: "empty embeddings array".to_string(),
            })
    }
}
