//! Embedding sources for text and audio.
//!
//! Both encoders feed one store, so they must agree on dimensionality.
//! Each one is loaded explicitly before use and reports load progress per
//! named resource.
//!
//! - `slot`: lifecycle wrapper (`Unloaded → Loading → Ready | Failed`)
//! - `text`: fastembed sentence embedding model
//! - `spectral`: model-free band-energy audio encoder

mod slot;
mod spectral;
mod text;

pub use slot::{EncoderSlot, ModelState};
pub use spectral::SpectralAudioEncoder;
pub use text::FastembedTextEncoder;

use serde::Serialize;

/// Sample rate every audio encoder expects. Decoders resample to this.
pub const TARGET_SAMPLE_RATE: u32 = 44_100;

/// Progress of one named resource while an encoder loads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadProgress {
    pub resource: String,
    /// 0.0 to 1.0
    pub fraction: f32,
}

impl LoadProgress {
    pub fn new(resource: impl Into<String>, fraction: f32) -> Self {
        Self {
            resource: resource.into(),
            fraction,
        }
    }
}

/// Error type for encoder operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("Encoder '{0}' is not loaded")]
    NotReady(String),

    #[error("Encoder load failed: {0}")]
    LoadFailure(String),

    #[error("Embedding generation failed: {0}")]
    EncodeFailure(String),

    #[error("Unsupported input: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

/// Lifecycle shared by every encoder.
pub trait Encoder: Send + Sync {
    fn name(&self) -> &str;

    /// One-time initialization. Returns the output dimensionality.
    fn load(&self, progress: &mut dyn FnMut(LoadProgress)) -> Result<usize, EncodeError>;
}

pub trait TextEncoder: Encoder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EncodeError>;
}

pub trait AudioEncoder: Encoder {
    /// Embed mono PCM samples recorded at `sample_rate`.
    fn embed(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<f32>, EncodeError>;
}

/// Which encoder an operation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    Text,
    Audio,
}

impl std::fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncoderKind::Text => write!(f, "text"),
            EncoderKind::Audio => write!(f, "audio"),
        }
    }
}
