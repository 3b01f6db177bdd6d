//! Band-energy audio encoder.
//!
//! Spreads up to `MAX_FRAMES` analysis frames evenly over the clip, takes a
//! Hann-windowed DFT magnitude spectrum of each, pools the spectra into
//! log-spaced bands, log-compresses and L2-normalizes the result.
//! Clips that sound alike land close together; it carries no text semantics.

use rayon::prelude::*;
use std::ops::Range;

use crate::encoders::{AudioEncoder, EncodeError, Encoder, LoadProgress, TARGET_SAMPLE_RATE};

/// Samples per analysis frame
const FRAME_LEN: usize = 1024;

/// Upper bound on frames analysed per clip
const MAX_FRAMES: usize = 64;

/// Lowest band edge in Hz
const MIN_FREQUENCY: f32 = 20.0;

pub struct SpectralAudioEncoder {
    dimensions: usize,
    window: Vec<f32>,
    /// cos/sin of 2πn/FRAME_LEN
    twiddles: Vec<(f32, f32)>,
    bands: Vec<Range<usize>>,
}

impl SpectralAudioEncoder {
    pub fn new(dimensions: usize) -> Self {
        let window = (0..FRAME_LEN)
            .map(|n| {
                let phase = 2.0 * std::f32::consts::PI * n as f32 / FRAME_LEN as f32;
                0.5 - 0.5 * phase.cos()
            })
            .collect();

        let twiddles = (0..FRAME_LEN)
            .map(|n| {
                let phase = 2.0 * std::f32::consts::PI * n as f32 / FRAME_LEN as f32;
                (phase.cos(), phase.sin())
            })
            .collect();

        Self {
            dimensions,
            window,
            twiddles,
            bands: Self::band_bins(dimensions),
        }
    }

    /// Map each of `count` log-spaced bands to a non-empty range of DFT bins.
    fn band_bins(count: usize) -> Vec<Range<usize>> {
        let bins = FRAME_LEN / 2 + 1;
        let bin_hz = TARGET_SAMPLE_RATE as f32 / FRAME_LEN as f32;
        let nyquist = TARGET_SAMPLE_RATE as f32 / 2.0;
        let ratio = (nyquist / MIN_FREQUENCY).ln();

        (0..count)
            .map(|b| {
                let lo_hz = MIN_FREQUENCY * (ratio * b as f32 / count as f32).exp();
                let hi_hz = MIN_FREQUENCY * (ratio * (b + 1) as f32 / count as f32).exp();

                let lo = ((lo_hz / bin_hz).floor() as usize).min(bins - 1);
                let hi = ((hi_hz / bin_hz).ceil() as usize).clamp(lo + 1, bins);
                lo..hi
            })
            .collect()
    }

    /// Start offsets of the frames to analyse.
    fn frame_starts(len: usize) -> Vec<usize> {
        if len <= FRAME_LEN {
            return vec![0];
        }

        let last = len - FRAME_LEN;
        let count = MAX_FRAMES.min(last / FRAME_LEN + 1);
        if count == 1 {
            return vec![last / 2];
        }

        (0..count).map(|i| i * last / (count - 1)).collect()
    }

    /// Magnitude spectrum of one windowed frame, zero-padded past the clip end.
    fn frame_spectrum(&self, samples: &[f32], start: usize) -> Vec<f32> {
        let frame: Vec<f32> = (0..FRAME_LEN)
            .map(|n| samples.get(start + n).copied().unwrap_or(0.0) * self.window[n])
            .collect();

        (0..=FRAME_LEN / 2)
            .map(|k| {
                let (mut re, mut im) = (0.0f32, 0.0f32);
                for (n, &x) in frame.iter().enumerate() {
                    let (c, s) = self.twiddles[(k * n) % FRAME_LEN];
                    re += x * c;
                    im -= x * s;
                }
                (re * re + im * im).sqrt()
            })
            .collect()
    }
}

impl Encoder for SpectralAudioEncoder {
    fn name(&self) -> &str {
        "spectral"
    }

    fn load(&self, progress: &mut dyn FnMut(LoadProgress)) -> Result<usize, EncodeError> {
        progress(LoadProgress::new("filterbank", 0.0));
        if self.dimensions == 0 {
            return Err(EncodeError::LoadFailure(
                "spectral encoder needs at least one band".to_string(),
            ));
        }
        progress(LoadProgress::new("filterbank", 1.0));
        Ok(self.dimensions)
    }
}

impl AudioEncoder for SpectralAudioEncoder {
    fn embed(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<f32>, EncodeError> {
        if sample_rate != TARGET_SAMPLE_RATE {
            return Err(EncodeError::UnsupportedFormat(format!(
                "expected {TARGET_SAMPLE_RATE} Hz audio, got {sample_rate} Hz"
            )));
        }
        if samples.is_empty() {
            return Err(EncodeError::EncodeFailure("audio clip has no samples".to_string()));
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(EncodeError::EncodeFailure("audio clip has non-finite samples".to_string()));
        }

        let starts = Self::frame_starts(samples.len());
        let spectra: Vec<Vec<f32>> = starts
            .par_iter()
            .map(|&start| self.frame_spectrum(samples, start))
            .collect();

        let mut pooled = vec![0.0f32; self.dimensions];
        for spectrum in &spectra {
            for (value, range) in pooled.iter_mut().zip(&self.bands) {
                let band = &spectrum[range.clone()];
                *value += band.iter().sum::<f32>() / band.len() as f32;
            }
        }

        let frames = spectra.len() as f32;
        for value in pooled.iter_mut() {
            *value = (1.0 + *value / frames).ln();
        }

        // silence stays a zero vector
        let norm = pooled.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for value in pooled.iter_mut() {
                *value /= norm;
            }
        }

        Ok(pooled)
    }
}
