//! Pipeline controller.
//!
//! Orchestrates store initialization, model loading, batch embedding,
//! searches and clearing over one [`PipelineContext`]:
//! - every operation goes through the [`Gate`], so overlapping calls get `Busy`
//! - operations that need a model or the store fail fast with `NotReady`
//! - the last outcome of each operation class is kept for `status`

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::audio::{self, MediaKind};
use crate::encoders::{EncoderKind, FastembedTextEncoder, LoadProgress, ModelState};
use crate::pipeline::{Gate, Operation, PipelineContext, PipelineError};
use crate::vectors::{QueryResult, Record, SearchFilter};

/// Tag carried by every record made from an audio file
pub const AUDIO_TAG: &str = "audio";
/// Tag carried by every record made from text
pub const TEXT_TAG: &str = "text";

/// Result of the last run of an operation class.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failed { reason: String },
}

/// What to search with.
#[derive(Debug, Clone)]
pub enum SearchInput {
    Text(String),
    /// Path to an audio file
    Audio(PathBuf),
}

/// Emitted after each file of a batch.
#[derive(Debug, Clone)]
pub struct BatchProgress<'a> {
    /// Files handled so far, including this one
    pub index: usize,
    pub total: usize,
    pub file: &'a Path,
}

/// Aggregated result of a batch.
///
/// `processed + skipped + errors.len()` equals the number of files given.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
    pub errors: Vec<(PathBuf, PipelineError)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub name: String,
    pub path: PathBuf,
    pub initialized: bool,
    pub records: usize,
    pub dimensions: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EncoderStatus {
    pub kind: EncoderKind,
    pub name: String,
    pub state: ModelState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub store: StoreStatus,
    pub encoders: Vec<EncoderStatus>,
    /// Short identity of the text model, first 8 bytes of its SHA-256
    pub text_model_id: String,
    pub running: Option<Operation>,
    pub outcomes: BTreeMap<Operation, Outcome>,
}

pub struct Controller {
    context: PipelineContext,
    gate: Gate,
    outcomes: Mutex<BTreeMap<Operation, Outcome>>,
}

impl Controller {
    pub fn new(context: PipelineContext) -> Self {
        Self {
            context,
            gate: Gate::new(),
            outcomes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Hold the permit for `op` while `f` runs and record how it went.
    fn run<T>(
        &self,
        op: Operation,
        f: impl FnOnce() -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        let _permit = self.gate.try_acquire(op)?;
        let span = tracing::info_span!("operation", %op);
        let _entered = span.enter();

        log::debug!("Starting {op}");
        let result = f();

        let outcome = match &result {
            Ok(_) => {
                log::debug!("Finished {op}");
                Outcome::Success
            }
            Err(e) => {
                log::error!("{op} failed: {e}");
                Outcome::Failed {
                    reason: e.to_string(),
                }
            }
        };
        self.outcomes().insert(op, outcome);

        result
    }

    fn outcomes(&self) -> MutexGuard<'_, BTreeMap<Operation, Outcome>> {
        self.outcomes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open or create the store.
    pub fn init_store(&self) -> Result<StoreStatus, PipelineError> {
        self.run(Operation::InitStore, || {
            self.context.store_mut().initialize()?;
            Ok(self.store_status())
        })
    }

    /// Load the requested encoders.
    ///
    /// A failing encoder does not stop the others from loading. Any failure,
    /// or an encoder whose dimensionality disagrees with the store, is
    /// reported as `InitFailure` once all have been attempted.
    pub fn load_models(
        &self,
        kinds: &[EncoderKind],
        on_progress: &mut dyn FnMut(EncoderKind, LoadProgress),
    ) -> Result<(), PipelineError> {
        self.run(Operation::LoadModels, || {
            let mut failures = vec![];
            let mut loaded_dims: Vec<(EncoderKind, usize)> = vec![];

            for &kind in kinds {
                let mut forward = |p: LoadProgress| on_progress(kind, p);
                let loaded = match kind {
                    EncoderKind::Text => self.context.text().load(&mut forward),
                    EncoderKind::Audio => self.context.audio().load(&mut forward),
                };

                match loaded {
                    Ok(dimensions) => {
                        if let Some(expected) = self.context.store().dimensions() {
                            if expected != dimensions {
                                failures.push(format!(
                                    "{kind} encoder produces {dimensions} dimensions, store holds {expected}"
                                ));
                            }
                        }
                        loaded_dims.push((kind, dimensions));
                    }
                    Err(e) => failures.push(format!("{kind} encoder: {e}")),
                }
            }

            // both encoders feed one store
            if let [(a, da), (b, db), ..] = loaded_dims[..] {
                if da != db {
                    failures.push(format!(
                        "{a} encoder produces {da} dimensions but {b} encoder produces {db}"
                    ));
                }
            }

            if failures.is_empty() {
                Ok(())
            } else {
                Err(PipelineError::InitFailure(failures.join("; ")))
            }
        })
    }

    /// Embed and insert every audio file in `files`, in order.
    ///
    /// Files that are not audio are skipped. Per-file failures are collected
    /// and the batch carries on.
    pub fn run_batch_embed(
        &self,
        files: &[PathBuf],
        extra_tags: &BTreeSet<String>,
        on_progress: &mut dyn FnMut(BatchProgress<'_>),
    ) -> Result<BatchSummary, PipelineError> {
        self.run(Operation::BatchEmbed, || {
            self.ensure_store()?;
            self.context.audio().ensure_ready()?;

            let mut summary = BatchSummary::default();
            let total = files.len();

            for (i, file) in files.iter().enumerate() {
                match self.embed_file(file, extra_tags) {
                    Ok(Some(key)) => {
                        log::debug!("Indexed {} as {key}", file.display());
                        summary.processed += 1;
                    }
                    Ok(None) => summary.skipped += 1,
                    Err(e) => {
                        log::warn!("Failed to index {}: {e}", file.display());
                        summary.errors.push((file.clone(), e));
                    }
                }

                on_progress(BatchProgress {
                    index: i + 1,
                    total,
                    file,
                });
            }

            log::info!(
                "Batch finished: {} processed, {} skipped, {} failed",
                summary.processed,
                summary.skipped,
                summary.errors.len()
            );
            Ok(summary)
        })
    }

    /// Returns `None` when the file is not audio.
    fn embed_file(
        &self,
        file: &Path,
        extra_tags: &BTreeSet<String>,
    ) -> Result<Option<u64>, PipelineError> {
        let mime = match audio::classify(file)? {
            MediaKind::Audio { mime } => mime,
            MediaKind::Other { mime } => {
                log::debug!(
                    "Skipping {} ({})",
                    file.display(),
                    mime.as_deref().unwrap_or("unknown type")
                );
                return Ok(None);
            }
        };

        let clip = self.context.decoder().decode(file)?;
        let embedding = self
            .context
            .audio()
            .embed_audio(&clip.samples, clip.sample_rate)?;

        let content = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file.display().to_string());

        let mut tags = extra_tags.clone();
        tags.insert(AUDIO_TAG.to_string());
        tags.insert(mime);

        let key = self.context.store_mut().insert(&content, embedding, tags)?;
        Ok(Some(key))
    }

    /// Embed `text` and store it as a record.
    pub fn run_insert_text(
        &self,
        text: &str,
        extra_tags: &BTreeSet<String>,
    ) -> Result<u64, PipelineError> {
        self.run(Operation::InsertText, || {
            let text = text.trim();
            if text.is_empty() {
                return Err(PipelineError::InvalidQuery("text is empty".to_string()));
            }

            self.ensure_store()?;
            let embedding = self.context.text().embed_text(text)?;

            let mut tags = extra_tags.clone();
            tags.insert(TEXT_TAG.to_string());

            Ok(self.context.store_mut().insert(text, embedding, tags)?)
        })
    }

    /// Rank the store against a text or audio query.
    pub fn run_search(
        &self,
        input: &SearchInput,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<QueryResult>, PipelineError> {
        let op = match input {
            SearchInput::Text(_) => Operation::TextSearch,
            SearchInput::Audio(_) => Operation::AudioSearch,
        };

        self.run(op, || {
            self.ensure_store()?;

            let query = match input {
                SearchInput::Text(text) => {
                    let text = text.trim();
                    if text.is_empty() {
                        return Err(PipelineError::InvalidQuery("query text is empty".to_string()));
                    }
                    self.context.text().embed_text(text)?
                }
                SearchInput::Audio(path) => {
                    self.context.audio().ensure_ready()?;
                    if let MediaKind::Other { mime } = audio::classify(path)? {
                        return Err(PipelineError::UnsupportedFormat(format!(
                            "{} is not audio ({})",
                            path.display(),
                            mime.as_deref().unwrap_or("unknown type")
                        )));
                    }
                    let clip = self.context.decoder().decode(path)?;
                    self.context
                        .audio()
                        .embed_audio(&clip.samples, clip.sample_rate)?
                }
            };

            let results = self.context.store().rank(&query, k, filter)?;
            log::debug!("{op} returned {} results", results.len());
            Ok(results)
        })
    }

    /// Delete the collection.
    ///
    /// The store is uninitialized afterwards whatever the outcome, and
    /// inserts and searches report `NotReady` until [`Controller::init_store`]
    /// runs again.
    pub fn run_clear(&self) -> Result<(), PipelineError> {
        self.run(Operation::Clear, || Ok(self.context.store_mut().clear()?))
    }

    /// Snapshot of every record, in key order.
    pub fn records(&self) -> Result<Vec<Record>, PipelineError> {
        let store = self.context.store();
        Ok(store.scan()?.cloned().collect())
    }

    pub fn status(&self) -> ControllerStatus {
        let text = self.context.text();
        let audio = self.context.audio();

        let text_model_id = FastembedTextEncoder::model_id_hash(text.name())[..8]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();

        ControllerStatus {
            store: self.store_status(),
            encoders: vec![
                EncoderStatus {
                    kind: EncoderKind::Text,
                    name: text.name().to_string(),
                    state: text.state(),
                },
                EncoderStatus {
                    kind: EncoderKind::Audio,
                    name: audio.name().to_string(),
                    state: audio.state(),
                },
            ],
            text_model_id,
            running: self.gate.running(),
            outcomes: self.outcomes().clone(),
        }
    }

    fn store_status(&self) -> StoreStatus {
        let store = self.context.store();
        StoreStatus {
            name: store.name().to_string(),
            path: store.collection_path(),
            initialized: store.is_initialized(),
            records: store.len(),
            dimensions: store.dimensions(),
        }
    }

    fn ensure_store(&self) -> Result<(), PipelineError> {
        let store = self.context.store();
        if store.is_initialized() {
            Ok(())
        } else {
            Err(PipelineError::NotReady(format!(
                "store '{}' is not initialized",
                store.name()
            )))
        }
    }
}

/// Files under `path` in sorted order. A file path yields itself.
pub fn collect_files(path: &Path, recursive: bool) -> std::io::Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = vec![];
    let mut dirs = vec![path.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if recursive {
                    dirs.push(entry.path());
                }
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}
