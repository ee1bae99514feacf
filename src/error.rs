//! Orchestrator error handling
//!
//! One error type for the whole host layer. Variants are grouped by how the
//! caller is expected to react: programming errors and resource exhaustion
//! abort the run, lookup misses and duplicate registrations are handled at
//! the call site.

use crate::coordination::Command;
use crate::flags::Flag;

/// Result type for orchestrator operations
pub type SimResult<T> = Result<T, SimError>;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("{operation} is not supported on buffer {buffer}")]
    Unsupported {
        operation: &'static str,
        buffer: String,
    },

    #[error("no buffer is registered for key {key:#010x}")]
    UnknownBuffer { key: Flag },

    #[error("allocation of {bytes} bytes for buffer {buffer} failed: {reason}")]
    AllocationFailed {
        buffer: &'static str,
        bytes: usize,
        reason: String,
    },

    #[error("trying to add a buffer for an already-available key {name} ({key:#010x})")]
    DuplicateKey { key: Flag, name: &'static str },

    #[error("buffer for {name} ({key:#010x}) does not match its family: {element_size}-byte elements in {slots} slot(s)")]
    FamilyMismatch {
        key: Flag,
        name: &'static str,
        element_size: usize,
        slots: usize,
    },

    #[error("buffer {name} is missing or not allocated")]
    MissingBuffer { name: &'static str },

    #[error("slot {slot} requested on buffer {key:#010x} which only has {slots} slot(s)")]
    SlotOutOfRange { key: Flag, slot: usize, slots: usize },

    #[error("invalid device map: {message}")]
    InvalidDeviceMap { message: String },

    #[error("invalid grid geometry: {message}")]
    InvalidGeometry { message: String },

    #[error("particle count invariant violated: {message}")]
    CountInvariant { message: String },

    #[error("device {device} failed during {command:?}: {message}")]
    PhaseFailed {
        device: usize,
        command: Command,
        message: String,
    },

    #[error("worker for device {device} disconnected")]
    WorkerDisconnected { device: usize },

    #[error("control flags were already registered")]
    AlreadyRegistered,

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl SimError {
    /// Whether the run has to be aborted.
    ///
    /// Lookup misses and duplicate registrations are the caller's business;
    /// everything else means the working set or the phase results can no
    /// longer be trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SimError::DuplicateKey { .. }
                | SimError::SlotOutOfRange { .. }
                | SimError::AlreadyRegistered
        )
    }
}

/// Helper trait for attaching a context string to foreign errors
pub trait SimErrorContext<T> {
    fn sim_context(self, context: &str) -> SimResult<T>;
}

impl<T, E> SimErrorContext<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn sim_context(self, context: &str) -> SimResult<T> {
        self.map_err(|e| SimError::Config {
            message: format!("{}: {}", context, e),
        })
    }
}

/// Create an unsupported-operation error
pub fn unsupported(operation: &'static str, buffer: impl std::fmt::Display) -> SimError {
    SimError::Unsupported {
        operation,
        buffer: buffer.to_string(),
    }
}

/// Create an allocation error
pub fn allocation_error(
    buffer: &'static str,
    bytes: usize,
    reason: impl std::fmt::Display,
) -> SimError {
    SimError::AllocationFailed {
        buffer,
        bytes,
        reason: reason.to_string(),
    }
}
