use anyhow::{Context, Result};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::audio::{AudioDecoder, WavDecoder};
use crate::config::Config;
use crate::encoders::{
    AudioEncoder, EncoderSlot, FastembedTextEncoder, SpectralAudioEncoder, TextEncoder,
    TARGET_SAMPLE_RATE,
};
use crate::vectors::{StoreConfig, VectorStore};

/// Everything the controller works with, created once per process and
/// passed in explicitly.
pub struct PipelineContext {
    text: EncoderSlot<dyn TextEncoder>,
    audio: EncoderSlot<dyn AudioEncoder>,
    decoder: Box<dyn AudioDecoder>,
    store: RwLock<VectorStore>,
}

impl PipelineContext {
    pub fn new(
        text: Box<dyn TextEncoder>,
        audio: Box<dyn AudioEncoder>,
        decoder: Box<dyn AudioDecoder>,
        store: VectorStore,
    ) -> Self {
        Self {
            text: EncoderSlot::new(text),
            audio: EncoderSlot::new(audio),
            decoder,
            store: RwLock::new(store),
        }
    }

    /// Wire up the default encoders, decoder and store from a loaded config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let text = FastembedTextEncoder::new(&config.text_encoder.model, config.base_path().to_path_buf())
            .context("Failed to configure text encoder")?;

        PipelineContextBuilder::new()
            .text_encoder(Box::new(text))
            .audio_encoder(Box::new(SpectralAudioEncoder::new(
                config.audio_encoder.dimensions,
            )))
            .decoder(Box::new(WavDecoder::resampling_to(TARGET_SAMPLE_RATE)))
            .store(StoreConfig {
                name: config.store.name.clone(),
                dir: config.base_path().to_path_buf(),
                dimensions: config.store.dimensions,
            })
            .build()
    }

    pub fn text(&self) -> &EncoderSlot<dyn TextEncoder> {
        &self.text
    }

    pub fn audio(&self) -> &EncoderSlot<dyn AudioEncoder> {
        &self.audio
    }

    pub fn decoder(&self) -> &dyn AudioDecoder {
        self.decoder.as_ref()
    }

    pub fn store(&self) -> RwLockReadGuard<'_, VectorStore> {
        self.store.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn store_mut(&self) -> RwLockWriteGuard<'_, VectorStore> {
        self.store.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Builder for creating pipeline contexts
pub struct PipelineContextBuilder {
    text: Option<Box<dyn TextEncoder>>,
    audio: Option<Box<dyn AudioEncoder>>,
    decoder: Option<Box<dyn AudioDecoder>>,
    store: Option<StoreConfig>,
}

impl PipelineContextBuilder {
    pub fn new() -> Self {
        Self {
            text: None,
            audio: None,
            decoder: None,
            store: None,
        }
    }

    pub fn text_encoder(mut self, encoder: Box<dyn TextEncoder>) -> Self {
        self.text = Some(encoder);
        self
    }

    pub fn audio_encoder(mut self, encoder: Box<dyn AudioEncoder>) -> Self {
        self.audio = Some(encoder);
        self
    }

    /// Defaults to a WAV decoder resampling to the encoder rate
    pub fn decoder(mut self, decoder: Box<dyn AudioDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn store(mut self, config: StoreConfig) -> Self {
        self.store = Some(config);
        self
    }

    pub fn build(self) -> Result<PipelineContext> {
        let text = self.text.context("Text encoder is required")?;

        let audio = self.audio.context("Audio encoder is required")?;

        let store = self.store.context("Store configuration is required")?;

        let decoder = self
            .decoder
            .unwrap_or_else(|| Box::new(WavDecoder::resampling_to(TARGET_SAMPLE_RATE)));

        Ok(PipelineContext::new(
            text,
            audio,
            decoder,
            VectorStore::new(store),
        ))
    }
}

impl Default for PipelineContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
