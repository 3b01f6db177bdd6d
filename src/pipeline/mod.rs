//! Orchestration of the embedding pipeline.
//!
//! - `context`: explicit holder of encoders, decoder and store
//! - `gate`: single-permit guard shared by all operations
//! - `controller`: init, load, batch-embed, search, clear
//! - `errors`: `PipelineError` and conversions from module errors

mod context;
mod controller;
mod errors;
mod gate;

pub use context::PipelineContext;
pub use controller::{collect_files, Controller, SearchInput};
pub use errors::PipelineError;
pub use gate::{Gate, Operation};

#[cfg(test)]
pub use context::PipelineContextBuilder;
#[cfg(test)]
pub use controller::Outcome;
