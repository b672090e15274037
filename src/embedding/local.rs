//! In-process embedding model via fastembed.

use crate::embedding::profiles::ModelProfile;
use crate::error::{EmbeddingError, EmbeddingResult};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};

const DEFAULT_MODEL_NAME: &str = "AllMiniLML6V2";

fn parse_model(name: &str) -> EmbeddingResult<EmbeddingModel> {
    match name {
        "AllMiniLML6V2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "AllMiniLML12V2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "BGESmallENV15" => Ok(EmbeddingModel::BGESmallENV15),
        "BGEBaseENV15" => Ok(EmbeddingModel::BGEBaseENV15),
        "MultilingualE5Small" => Ok(EmbeddingModel::MultilingualE5Small),
        "JinaEmbeddingsV2BaseCode" => Ok(EmbeddingModel::JinaEmbeddingsV2BaseCode),
        _ => Err(EmbeddingError::Init {
            provider: "transformers".to_string(),
            reason: format!(
                "unknown embedding model '{name}'; supported: AllMiniLML6V2, AllMiniLML12V2, BGESmallENV15, BGEBaseENV15, MultilingualE5Small, JinaEmbeddingsV2BaseCode"
            ),
        }),
    }
}

/// Local transformer embeddings. The model is loaded once at `init` and
/// shared behind a mutex; inference runs on the blocking pool.
pub struct LocalProvider {
    model_name: String,
    model: Option<Arc<Mutex<TextEmbedding>>>,
    profile: ModelProfile,
}

impl std::fmt::Debug for LocalProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalProvider")
            .field("model_name", &self.model_name)
            .field("loaded", &self.model.is_some())
            .finish()
    }
}

impl LocalProvider {
    pub fn new(model_name: Option<String>, profile: ModelProfile) -> Self {
        Self {
            model_name: model_name.unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string()),
            model: None,
            profile,
        }
    }

    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Load the model, downloading it on first use. Detects the real
    /// dimension with a probe embedding and corrects the profile.
    pub async fn init(&mut self) -> EmbeddingResult<()> {
        if self.model.is_some() {
            return Ok(());
        }
        let model_kind = parse_model(&self.model_name)?;
        let model_name = self.model_name.clone();

        let (model, dimension) = tokio::task::spawn_blocking(move || {
            let mut model = TextEmbedding::try_new(
                InitOptions::new(model_kind).with_show_download_progress(false),
            )
            .map_err(|e| EmbeddingError::Init {
                provider: "transformers".to_string(),
                reason: format!(
                    "failed to load '{model_name}': {e}; first use needs network access for the model download"
                ),
            })?;
            let probe = model
                .embed(vec!["probe"], None)
                .map_err(|e| EmbeddingError::Init {
                    provider: "transformers".to_string(),
                    reason: format!("dimension probe failed: {e}"),
                })?;
            let dimension = probe.into_iter().next().map(|v| v.len()).unwrap_or(0);
            Ok::<_, EmbeddingError>((model, dimension))
        })
        .await
        .map_err(|e| EmbeddingError::Init {
            provider: "transformers".to_string(),
            reason: format!("model load task failed: {e}"),
        })??;

        if dimension != 0 && dimension != self.profile.dimensions {
            tracing::debug!(
                model = %self.model_name,
                dimension,
                "correcting profile dimensions to the loaded model"
            );
            self.profile.dimensions = dimension;
        }
        self.model = Some(Arc::new(Mutex::new(model)));
        Ok(())
    }

    pub async fn generate(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| EmbeddingError::Init {
                provider: "transformers".to_string(),
                reason: "provider used before init()".to_string(),
            })?
            .clone();
        let owned = text.to_string();

        let vector = tokio::task::spawn_blocking(move || {
            let mut guard = model.lock().map_err(|_| EmbeddingError::BadResponse {
                provider: "transformers".to_string(),
                reason: "embedding model mutex poisoned".to_string(),
            })?;
            let mut embeddings =
                guard
                    .embed(vec![owned], None)
                    .map_err(|e| EmbeddingError::BadResponse {
                        provider: "transformers".to_string(),
                        reason: format!("inference failed: {e}"),
                    })?;
            embeddings.pop().ok_or_else(|| EmbeddingError::BadResponse {
                provider: "transformers".to_string(),
                reason: "model returned no embedding".to_string(),
            })
        })
        .await
        .map_err(|e| EmbeddingError::BadResponse {
            provider: "transformers".to_string(),
            reason: format!("inference task failed: {e}"),
        })??;

        let expected = self.profile.dimensions;
        if vector.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                provider: "transformers".to_string(),
                expected,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }
}
