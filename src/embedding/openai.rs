//! OpenAI-compatible embeddings client (`POST <base>/embeddings`).

use crate::embedding::profiles::ModelProfile;
use crate::embedding::rate_limit::RateLimiter;
use crate::error::{EmbeddingError, EmbeddingResult};
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    profile: ModelProfile,
    limiter: RateLimiter,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        profile: ModelProfile,
        rate_limit: Option<u32>,
    ) -> Self {
        let mut base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
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
        let vector = self
            .limiter
            .execute(|| self.request(text))
            .await?;
        if vector.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                provider: "openai".to_string(),
                expected,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }

    async fn request(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: text,
        };
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
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
                provider: "openai".to_string(),
                reason: format!("status {status}: {text}"),
            });
        }

        let parsed: EmbeddingResponse =
            response
                .json()
                .await
                .map_err(|e| EmbeddingError::BadResponse {
                    provider: "openai".to_string(),
                    reason: format!("invalid response body: {e}"),
                })?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::BadResponse {
                provider: "openai".to_string(),
                reason: "empty data array".to_string(),
            })
    }
}
