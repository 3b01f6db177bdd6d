//! Media classification and PCM decoding.
//!
//! Files are classified by sniffing their content with `infer`, never by
//! extension. Decoding produces mono `f32` samples; `WavDecoder` handles
//! RIFF/WAVE PCM and IEEE float and can resample to a fixed rate.

use std::path::Path;

/// What a file looks like from its leading bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaKind {
    Audio { mime: String },
    /// Anything else, with the detected mime type when there is one
    Other { mime: Option<String> },
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed audio file: {0}")]
    Malformed(String),
}

/// Decoded mono audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Turns a file on disk into mono PCM.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<AudioClip, DecodeError>;
}

/// Sniff the file content and classify it.
pub fn classify(path: &Path) -> Result<MediaKind, DecodeError> {
    let kind = match infer::get_from_path(path)? {
        Some(t) if t.matcher_type() == infer::MatcherType::Audio => MediaKind::Audio {
            mime: t.mime_type().to_string(),
        },
        Some(t) => MediaKind::Other {
            mime: Some(t.mime_type().to_string()),
        },
        None => MediaKind::Other { mime: None },
    };

    log::debug!("{} classified as {:?}", path.display(), kind);
    Ok(kind)
}

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

#[derive(Debug, Clone, Copy)]
struct WavFormat {
    code: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

/// RIFF/WAVE decoder. Multichannel input is averaged down to mono.
#[derive(Debug, Clone, Default)]
pub struct WavDecoder {
    target_rate: Option<u32>,
}

impl WavDecoder {
    /// Decoder that linearly resamples everything to `rate`.
    pub fn resampling_to(rate: u32) -> Self {
        Self {
            target_rate: Some(rate),
        }
    }

    /// Decode an in-memory WAV file.
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<AudioClip, DecodeError> {
        if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
            return Err(DecodeError::UnsupportedFormat(
                "only RIFF/WAVE files can be decoded".to_string(),
            ));
        }

        let mut format: Option<WavFormat> = None;
        let mut data: Option<&[u8]> = None;
        let mut pos = 12;

        while pos + 8 <= bytes.len() {
            let id = &bytes[pos..pos + 4];
            let size = u32::from_le_bytes([
                bytes[pos + 4],
                bytes[pos + 5],
                bytes[pos + 6],
                bytes[pos + 7],
            ]) as usize;
            let start = pos + 8;
            // a truncated data chunk still yields the samples that made it
            let end = start.saturating_add(size).min(bytes.len());
            let body = &bytes[start..end];

            match id {
                b"fmt " => format = Some(Self::parse_format(body)?),
                b"data" => data = Some(body),
                _ => {}
            }

            // chunks are word aligned
            pos = start.saturating_add(size).saturating_add(size & 1);
        }

        let format = format.ok_or_else(|| DecodeError::Malformed("missing fmt chunk".to_string()))?;
        let data = data.ok_or_else(|| DecodeError::Malformed("missing data chunk".to_string()))?;

        let samples = Self::decode_samples(&format, data)?;
        let clip = AudioClip {
            samples,
            sample_rate: format.sample_rate,
        };

        Ok(match self.target_rate {
            Some(rate) => resample(clip, rate),
            None => clip,
        })
    }

    fn parse_format(body: &[u8]) -> Result<WavFormat, DecodeError> {
        if body.len() < 16 {
            return Err(DecodeError::Malformed("fmt chunk too short".to_string()));
        }

        let u16_at = |i: usize| u16::from_le_bytes([body[i], body[i + 1]]);
        let mut code = u16_at(0);
        let channels = u16_at(2);
        let sample_rate = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
        let bits_per_sample = u16_at(14);

        if code == WAVE_FORMAT_EXTENSIBLE {
            // sub-format GUID starts at 24; its first two bytes are the format code
            if body.len() < 26 {
                return Err(DecodeError::Malformed(
                    "extensible fmt chunk too short".to_string(),
                ));
            }
            code = u16_at(24);
        }

        if channels == 0 {
            return Err(DecodeError::Malformed("zero channels".to_string()));
        }
        if sample_rate == 0 {
            return Err(DecodeError::Malformed("zero sample rate".to_string()));
        }

        Ok(WavFormat {
            code,
            channels,
            sample_rate,
            bits_per_sample,
        })
    }

    fn decode_samples(format: &WavFormat, data: &[u8]) -> Result<Vec<f32>, DecodeError> {
        let width = match (format.code, format.bits_per_sample) {
            (WAVE_FORMAT_PCM, 8 | 16 | 24 | 32) | (WAVE_FORMAT_IEEE_FLOAT, 32) => {
                format.bits_per_sample as usize / 8
            }
            (code, bits) => {
                return Err(DecodeError::UnsupportedFormat(format!(
                    "WAV format 0x{code:04x} with {bits} bits per sample"
                )))
            }
        };

        let decode_one = |b: &[u8]| -> f32 {
            match (format.code, width) {
                (WAVE_FORMAT_IEEE_FLOAT, _) => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
                (_, 1) => (b[0] as f32 - 128.0) / 128.0,
                (_, 2) => i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0,
                (_, 3) => {
                    let v = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
                    v as f32 / 8_388_608.0
                }
                _ => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0,
            }
        };

        let channels = format.channels as usize;
        let frame = width * channels;

        Ok(data
            .chunks_exact(frame)
            .map(|f| f.chunks_exact(width).map(decode_one).sum::<f32>() / channels as f32)
            .collect())
    }
}

impl AudioDecoder for WavDecoder {
    fn decode(&self, path: &Path) -> Result<AudioClip, DecodeError> {
        let bytes = std::fs::read(path)?;
        self.decode_bytes(&bytes)
    }
}

/// Linear-interpolation resampler.
pub fn resample(clip: AudioClip, rate: u32) -> AudioClip {
    if clip.sample_rate == rate || clip.samples.is_empty() {
        return AudioClip {
            samples: clip.samples,
            sample_rate: rate,
        };
    }

    let ratio = clip.sample_rate as f64 / rate as f64;
    let out_len = ((clip.samples.len() as f64) / ratio).round().max(1.0) as usize;
    let last = clip.samples.len() - 1;

    let samples = (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = (pos - idx as f64) as f32;
            clip.samples[idx] * (1.0 - frac) + clip.samples[next] * frac
        })
        .collect();

    AudioClip {
        samples,
        sample_rate: rate,
    }
}

/// Encode mono samples as a 16-bit PCM WAV file.
#[cfg(test)]
pub(crate) fn wav_bytes(samples: &[f32], sample_rate: u32, channels: u16) -> Vec<u8> {
    let data: Vec<u8> = samples
        .iter()
        .flat_map(|s| {
            let v = (s.clamp(-1.0, 1.0) * 32_767.0) as i16;
            std::iter::repeat(v.to_le_bytes()).take(channels as usize)
        })
        .flatten()
        .collect();

    let block_align = channels * 2;
    let mut out = Vec::with_capacity(44 + data.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&WAVE_FORMAT_PCM.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&data);
    out
}
