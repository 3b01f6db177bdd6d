//! Deterministic encoders and fixtures for pipeline tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use crate::audio::wav_bytes;
use crate::encoders::{
    AudioEncoder, EncodeError, Encoder, LoadProgress, TextEncoder, TARGET_SAMPLE_RATE,
};
use crate::pipeline::{Controller, PipelineContextBuilder};
use crate::vectors::StoreConfig;

/// Text encoder with a fixed phrase → vector table. Unknown text maps to
/// the zero vector.
pub struct StubText {
    dims: usize,
    vectors: HashMap<String, Vec<f32>>,
    fail: bool,
    pub loads: Arc<AtomicUsize>,
}

impl StubText {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            vectors: HashMap::new(),
            fail: false,
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl Encoder for StubText {
    fn name(&self) -> &str {
        "stub-text"
    }

    fn load(&self, progress: &mut dyn FnMut(LoadProgress)) -> Result<usize, EncodeError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        progress(LoadProgress::new("weights", 0.5));
        if self.fail {
            return Err(EncodeError::LoadFailure("weights unavailable".to_string()));
        }
        progress(LoadProgress::new("weights", 1.0));
        Ok(self.dims)
    }
}

impl TextEncoder for StubText {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EncodeError> {
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| vec![0.0; self.dims]))
    }
}

/// Audio encoder whose output is the first `dims` samples of the clip.
///
/// A clip starting below -0.9 is rejected, which lets tests plant encode
/// failures in a batch.
pub struct StubAudio {
    dims: usize,
}

impl StubAudio {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

pub fn stub_audio_embed(
    dims: usize,
    samples: &[f32],
    sample_rate: u32,
) -> Result<Vec<f32>, EncodeError> {
    if sample_rate != TARGET_SAMPLE_RATE {
        return Err(EncodeError::UnsupportedFormat(format!("{sample_rate} Hz")));
    }
    if samples.first().map(|s| *s < -0.9).unwrap_or(true) {
        return Err(EncodeError::EncodeFailure("stub rejects clip".to_string()));
    }
    Ok((0..dims)
        .map(|i| samples.get(i).copied().unwrap_or(0.0))
        .collect())
}

impl Encoder for StubAudio {
    fn name(&self) -> &str {
        "stub-audio"
    }

    fn load(&self, progress: &mut dyn FnMut(LoadProgress)) -> Result<usize, EncodeError> {
        progress(LoadProgress::new("bands", 1.0));
        Ok(self.dims)
    }
}

impl AudioEncoder for StubAudio {
    fn embed(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<f32>, EncodeError> {
        stub_audio_embed(self.dims, samples, sample_rate)
    }
}

/// Audio encoder that parks inside `embed` until released.
pub struct BlockingAudio {
    dims: usize,
    started: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl BlockingAudio {
    /// Returns the encoder, a receiver signalled when `embed` is entered and
    /// a sender that lets `embed` finish.
    pub fn new(dims: usize) -> (Self, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        (
            Self {
                dims,
                started: Mutex::new(Some(started_tx)),
                release: Mutex::new(release_rx),
            },
            started_rx,
            release_tx,
        )
    }
}

impl Encoder for BlockingAudio {
    fn name(&self) -> &str {
        "blocking-audio"
    }

    fn load(&self, _progress: &mut dyn FnMut(LoadProgress)) -> Result<usize, EncodeError> {
        Ok(self.dims)
    }
}

impl AudioEncoder for BlockingAudio {
    fn embed(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<f32>, EncodeError> {
        if let Some(started) = self.started.lock().unwrap().take() {
            started.send(()).unwrap();
        }
        self.release.lock().unwrap().recv().unwrap();
        stub_audio_embed(self.dims, samples, sample_rate)
    }
}

pub fn controller(
    dir: &Path,
    text: impl TextEncoder + 'static,
    audio: impl AudioEncoder + 'static,
) -> Controller {
    let context = PipelineContextBuilder::new()
        .text_encoder(Box::new(text))
        .audio_encoder(Box::new(audio))
        .store(StoreConfig {
            name: "test".to_string(),
            dir: dir.to_path_buf(),
            dimensions: None,
        })
        .build()
        .unwrap();
    Controller::new(context)
}

/// Controller with both encoders loaded and the store open.
pub fn ready_controller(
    dir: &Path,
    text: impl TextEncoder + 'static,
    audio: impl AudioEncoder + 'static,
) -> Controller {
    let controller = controller(dir, text, audio);
    controller.init_store().unwrap();
    controller
        .load_models(
            &[crate::encoders::EncoderKind::Text, crate::encoders::EncoderKind::Audio],
            &mut |_, _| {},
        )
        .unwrap();
    controller
}

/// Write a 44.1 kHz mono WAV file.
pub fn write_wav(dir: &Path, name: &str, samples: &[f32]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, wav_bytes(samples, TARGET_SAMPLE_RATE, 1)).unwrap();
    path
}

pub fn tone(frequency: f32, seconds: f32) -> Vec<f32> {
    let count = (TARGET_SAMPLE_RATE as f32 * seconds) as usize;
    (0..count)
        .map(|n| {
            let t = n as f32 / TARGET_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.5
        })
        .collect()
}
