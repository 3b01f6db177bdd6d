//! Single-permit guard: at most one controller operation runs at a time.
//!
//! A request made while the permit is held is rejected with
//! [`PipelineError::Busy`] immediately. Nothing queues.

use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::pipeline::PipelineError;

/// Operation classes the controller runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    InitStore,
    LoadModels,
    BatchEmbed,
    InsertText,
    TextSearch,
    AudioSearch,
    Clear,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::InitStore => "init-store",
            Operation::LoadModels => "load-models",
            Operation::BatchEmbed => "batch-embed",
            Operation::InsertText => "insert-text",
            Operation::TextSearch => "text-search",
            Operation::AudioSearch => "audio-search",
            Operation::Clear => "clear",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Default)]
pub struct Gate {
    running: Mutex<Option<Operation>>,
}

/// Held for the duration of one operation; releases the gate on drop.
#[derive(Debug)]
pub struct Permit<'a> {
    gate: &'a Gate,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, operation: Operation) -> Result<Permit<'_>, PipelineError> {
        let mut running = self.slot();
        if let Some(current) = *running {
            log::warn!("Rejected {operation}: {current} is still running");
            return Err(PipelineError::Busy { running: current });
        }

        *running = Some(operation);
        Ok(Permit { gate: self })
    }

    /// The operation currently holding the permit.
    pub fn running(&self) -> Option<Operation> {
        *self.slot()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Operation>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        *self.gate.slot() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_busy() {
        let gate = Gate::new();
        let permit = gate.try_acquire(Operation::BatchEmbed).unwrap();

        assert_eq!(gate.running(), Some(Operation::BatchEmbed));
        assert_eq!(
            gate.try_acquire(Operation::TextSearch).unwrap_err(),
            PipelineError::Busy {
                running: Operation::BatchEmbed
            }
        );
        drop(permit);
        assert_eq!(gate.running(), None);
    }

    #[test]
    fn test_drop_releases() {
        let gate = Gate::new();
        drop(gate.try_acquire(Operation::Clear).unwrap());

        assert_eq!(gate.running(), None);
        assert!(gate.try_acquire(Operation::InitStore).is_ok());
    }

    #[test]
    fn test_same_class_is_also_exclusive() {
        let gate = Gate::new();
        let _permit = gate.try_acquire(Operation::TextSearch).unwrap();
        assert!(gate.try_acquire(Operation::TextSearch).is_err());
    }
}
