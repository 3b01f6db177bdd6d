//! Text encoder backed by fastembed.
//!
//! - Model chosen by name, resolved before anything is downloaded
//! - Weights cached under `<cache_dir>/models`
//! - Dimensions probed once at load

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::encoders::{EncodeError, Encoder, LoadProgress, TextEncoder};

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct FastembedTextEncoder {
    model: Mutex<Option<TextEmbedding>>,
    model_name: String,
    model_enum: fastembed::EmbeddingModel,
    cache_dir: PathBuf,
}

impl FastembedTextEncoder {
    /// Create an unloaded encoder for the named model.
    ///
    /// Nothing is downloaded until [`Encoder::load`].
    ///
    /// # Arguments
    /// * `model_name` - Name of the model (e.g., "all-MiniLM-L6-v2")
    /// * `cache_dir` - Directory to cache downloaded models
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EncodeError> {
        let model_enum = Self::parse_model_name(model_name)?;

        Ok(Self {
            model: Mutex::new(None),
            model_name: model_name.to_string(),
            model_enum,
            cache_dir,
        })
    }

    /// Compute SHA256 hash of the model name, used to identify which model
    /// produced a collection.
    pub fn model_id_hash(model_name: &str) -> [u8; 32] {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(model_name.as_bytes());
        hasher.finalize().into()
    }

    /// Parse model name string to fastembed enum.
    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EncodeError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "allminiml6v2" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2)
            }
            "all-minilm-l6-v2-q" | "allminiml6v2q" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q)
            }
            "bge-small-en-v1.5" | "bgesmallenv15" => {
                Ok(fastembed::EmbeddingModel::BGESmallENV15)
            }
            "bge-small-en-v1.5-q" | "bgesmallenv15q" => {
                Ok(fastembed::EmbeddingModel::BGESmallENV15Q)
            }
            "bge-base-en-v1.5" | "bgebaseenv15" => {
                Ok(fastembed::EmbeddingModel::BGEBaseENV15)
            }
            "bge-base-en-v1.5-q" | "bgebaseenv15q" => {
                Ok(fastembed::EmbeddingModel::BGEBaseENV15Q)
            }
            _ => Err(EncodeError::InvalidModel(format!(
                "Unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5 (add -q suffix for quantized)",
                name
            ))),
        }
    }

    /// Probe the model to determine embedding dimensions.
    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EncodeError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EncodeError::LoadFailure(format!("Failed to probe dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EncodeError::LoadFailure("Model returned no embedding".to_string()))
    }
}

impl Encoder for FastembedTextEncoder {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn load(&self, progress: &mut dyn FnMut(LoadProgress)) -> Result<usize, EncodeError> {
        let models_dir = self.cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EncodeError::LoadFailure(format!("Failed to create models directory: {}", e))
        })?;

        // fastembed downloads and initializes in one call, so weights only
        // report start and finish
        progress(LoadProgress::new("weights", 0.0));
        let options = InitOptions::new(self.model_enum.clone())
            .with_cache_dir(models_dir)
            .with_show_download_progress(false);

        let mut model = TextEmbedding::try_new(options)
            .map_err(|e| EncodeError::LoadFailure(e.to_string()))?;
        progress(LoadProgress::new("weights", 1.0));

        progress(LoadProgress::new("probe", 0.0));
        let dimensions = Self::probe_dimensions(&mut model)?;
        progress(LoadProgress::new("probe", 1.0));

        let mut slot = self.model.lock().map_err(|e| {
            EncodeError::LoadFailure(format!("Failed to acquire model lock: {}", e))
        })?;
        *slot = Some(model);

        Ok(dimensions)
    }
}

impl TextEncoder for FastembedTextEncoder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EncodeError> {
        let mut guard = self.model.lock().map_err(|e| {
            EncodeError::EncodeFailure(format!("Failed to acquire model lock: {}", e))
        })?;

        let model = guard
            .as_mut()
            .ok_or_else(|| EncodeError::NotReady(self.model_name.clone()))?;

        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EncodeError::EncodeFailure(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EncodeError::EncodeFailure("No embedding returned".to_string()))
    }
}
