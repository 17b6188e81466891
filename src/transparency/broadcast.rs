//! Applying one configuration change to every logical core

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOperation {
    /// Start intercepting #DB and #BP on the core
    EnableDbAndBpExiting,
    /// Stop intercepting #DB and #BP on the core
    DisableDbAndBpExiting,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("{operation:?} failed on core {core}")]
    CoreFailed {
        operation: BroadcastOperation,
        core: u32,
    },
}

/// Runs an operation on all cores and returns once every core applied it
pub trait CoreBroadcaster: Send + Sync {
    fn apply(&self, operation: BroadcastOperation) -> Result<(), BroadcastError>;
}

/// Per-core interception bits, for hosts without a hypervisor backend
#[derive(Debug)]
pub struct InterceptionCores {
    cores: Vec<AtomicBool>,
}

impl InterceptionCores {
    pub fn new(core_count: usize) -> Self {
        Self {
            cores: (0..core_count).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    pub fn core_count(&self) -> usize {
        self.cores.len()
    }

    pub fn is_intercepting(&self, core: usize) -> bool {
        self.cores
            .get(core)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn intercepting_count(&self) -> usize {
        self.cores
            .iter()
            .filter(|c| c.load(Ordering::SeqCst))
            .count()
    }
}

impl CoreBroadcaster for InterceptionCores {
    fn apply(&self, operation: BroadcastOperation) -> Result<(), BroadcastError> {
        let enable = operation == BroadcastOperation::EnableDbAndBpExiting;
        log::debug!("Broadcasting {:?} to {} cores", operation, self.cores.len());
        for core in &self.cores {
            core.store(enable, Ordering::SeqCst);
        }
        Ok(())
    }
}
