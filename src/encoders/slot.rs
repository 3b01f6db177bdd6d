//! Load-once wrapper that tracks an encoder's lifecycle.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::encoders::{AudioEncoder, EncodeError, Encoder, LoadProgress, TextEncoder};

/// Lifecycle of one encoder within a process.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ModelState {
    Unloaded,
    Loading { fraction: f32 },
    Ready { dimensions: usize },
    /// Terminal: the slot never retries
    Failed { reason: String },
}

/// Owns an encoder and gates `embed` on it being loaded.
pub struct EncoderSlot<E: ?Sized> {
    encoder: Box<E>,
    state: RwLock<ModelState>,
}

impl<E: Encoder + ?Sized> EncoderSlot<E> {
    pub fn new(encoder: Box<E>) -> Self {
        Self {
            encoder,
            state: RwLock::new(ModelState::Unloaded),
        }
    }

    pub fn name(&self) -> &str {
        self.encoder.name()
    }

    pub fn state(&self) -> ModelState {
        self.read_state().clone()
    }

    /// Output dimensionality once loaded.
    pub fn dimensions(&self) -> Option<usize> {
        match *self.read_state() {
            ModelState::Ready { dimensions } => Some(dimensions),
            _ => None,
        }
    }

    /// Load the encoder unless already loaded.
    ///
    /// Progress fractions are forwarded per resource and never go backwards.
    /// A failed load is remembered and returned again on later calls.
    pub fn load(&self, on_progress: &mut dyn FnMut(LoadProgress)) -> Result<usize, EncodeError> {
        match &*self.read_state() {
            ModelState::Ready { dimensions } => return Ok(*dimensions),
            ModelState::Failed { reason } => return Err(EncodeError::LoadFailure(reason.clone())),
            ModelState::Loading { .. } => return Err(EncodeError::NotReady(self.name().to_string())),
            ModelState::Unloaded => {}
        }

        log::info!("Loading encoder '{}'", self.name());
        *self.write_state() = ModelState::Loading { fraction: 0.0 };

        let mut seen: HashMap<String, f32> = HashMap::new();
        let mut forward = |progress: LoadProgress| {
            let last = seen.entry(progress.resource.clone()).or_insert(0.0);
            let fraction = progress.fraction.clamp(0.0, 1.0).max(*last);
            *last = fraction;

            *self.write_state() = ModelState::Loading { fraction };
            on_progress(LoadProgress {
                resource: progress.resource,
                fraction,
            });
        };

        let result = match self.encoder.load(&mut forward) {
            Ok(0) => Err(EncodeError::LoadFailure(format!(
                "encoder '{}' reported zero output dimensions",
                self.name()
            ))),
            other => other,
        };

        match result {
            Ok(dimensions) => {
                log::info!("Encoder '{}' ready ({dimensions} dimensions)", self.name());
                *self.write_state() = ModelState::Ready { dimensions };
                Ok(dimensions)
            }
            Err(err) => {
                let reason = match err {
                    EncodeError::LoadFailure(reason) => reason,
                    other => other.to_string(),
                };
                log::error!("Encoder '{}' failed to load: {reason}", self.name());
                *self.write_state() = ModelState::Failed {
                    reason: reason.clone(),
                };
                Err(EncodeError::LoadFailure(reason))
            }
        }
    }

    /// Fail fast unless the encoder is loaded. Returns its dimensionality.
    pub fn ensure_ready(&self) -> Result<usize, EncodeError> {
        self.dimensions()
            .ok_or_else(|| EncodeError::NotReady(self.name().to_string()))
    }

    fn check_output(&self, embedding: Vec<f32>, dimensions: usize) -> Result<Vec<f32>, EncodeError> {
        if embedding.len() != dimensions {
            return Err(EncodeError::EncodeFailure(format!(
                "encoder '{}' returned {} values, expected {dimensions}",
                self.name(),
                embedding.len()
            )));
        }
        Ok(embedding)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ModelState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ModelState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl<E: TextEncoder + ?Sized> EncoderSlot<E> {
    pub fn embed_text(&self, text: &str) -> Result<Vec<f32>, EncodeError> {
        let dimensions = self.ensure_ready()?;
        let embedding = self.encoder.embed(text)?;
        self.check_output(embedding, dimensions)
    }
}

impl<E: AudioEncoder + ?Sized> EncoderSlot<E> {
    pub fn embed_audio(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<f32>, EncodeError> {
        let dimensions = self.ensure_ready()?;
        let embedding = self.encoder.embed(samples, sample_rate)?;
        self.check_output(embedding, dimensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeText {
        loads: AtomicUsize,
        fail: bool,
    }

    impl FakeText {
        fn new(fail: bool) -> Self {
            Self {
                loads: AtomicUsize::new(0),
                fail,
            }
        }
    }

    impl Encoder for FakeText {
        fn name(&self) -> &str {
            "fake"
        }

        fn load(&self, progress: &mut dyn FnMut(LoadProgress)) -> Result<usize, EncodeError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            progress(LoadProgress::new("weights", 0.5));
            // out-of-order report must not move the fraction backwards
            progress(LoadProgress::new("weights", 0.2));
            progress(LoadProgress::new("weights", 1.0));
            if self.fail {
                return Err(EncodeError::LoadFailure("network unreachable".to_string()));
            }
            Ok(2)
        }
    }

    impl TextEncoder for FakeText {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EncodeError> {
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    fn noop(_: LoadProgress) {}

    #[test]
    fn test_embed_before_load_is_not_ready() {
        let slot: EncoderSlot<dyn TextEncoder> = EncoderSlot::new(Box::new(FakeText::new(false)));

        assert_eq!(slot.state(), ModelState::Unloaded);
        assert!(matches!(slot.embed_text("hi"), Err(EncodeError::NotReady(_))));
    }

    #[test]
    fn test_load_then_embed() {
        let slot: EncoderSlot<dyn TextEncoder> = EncoderSlot::new(Box::new(FakeText::new(false)));

        assert_eq!(slot.load(&mut noop).unwrap(), 2);
        assert_eq!(slot.state(), ModelState::Ready { dimensions: 2 });
        assert_eq!(slot.embed_text("hey").unwrap(), vec![3.0, 1.0]);
    }

    #[test]
    fn test_load_twice_loads_once() {
        let fake = FakeText::new(false);
        let slot = EncoderSlot::new(Box::new(fake));

        slot.load(&mut noop).unwrap();
        slot.load(&mut noop).unwrap();
        assert_eq!(slot.encoder.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_load_is_terminal() {
        let slot = EncoderSlot::new(Box::new(FakeText::new(true)));

        let first = slot.load(&mut noop);
        assert_eq!(
            first,
            Err(EncodeError::LoadFailure("network unreachable".to_string()))
        );
        assert!(matches!(slot.state(), ModelState::Failed { .. }));

        let second = slot.load(&mut noop);
        assert!(matches!(second, Err(EncodeError::LoadFailure(_))));
        assert_eq!(slot.encoder.loads.load(Ordering::SeqCst), 1);
        assert!(matches!(slot.embed_text("x"), Err(EncodeError::NotReady(_))));
    }

    #[test]
    fn test_progress_is_monotonic() {
        let slot = EncoderSlot::new(Box::new(FakeText::new(false)));

        let mut fractions = vec![];
        slot.load(&mut |p: LoadProgress| fractions.push(p.fraction)).unwrap();

        assert_eq!(fractions, vec![0.5, 0.5, 1.0]);
    }
}
