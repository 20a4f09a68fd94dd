//! Error types for every layer of the identification engine.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A structurally malformed container.
///
/// An entry that is simply not present is never reported through this type;
/// it leaves the requirements naming it unsatisfied.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Not a {kind} container: {reason}")]
    NotAContainer { kind: &'static str, reason: String },

    #[error("Truncated {what} at offset {offset}")]
    Truncated { what: &'static str, offset: u64 },

    #[error("Invalid {what}: {reason}")]
    Invalid { what: &'static str, reason: String },

    #[error("Broken sector chain starting at sector {start}: {reason}")]
    BrokenChain { start: u32, reason: String },

    #[error("CRC mismatch for entry '{path}': expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        path: String,
        expected: u32,
        actual: u32,
    },

    #[error("Failed to inflate entry '{path}': {source}")]
    Inflate {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl ContainerError {
    pub(crate) fn invalid(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            what,
            reason: reason.into(),
        }
    }
}

/// A byte-sequence pattern that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid pattern at position {position}: {message}")]
pub struct PatternError {
    pub position: usize,
    pub message: String,
}

impl PatternError {
    pub(crate) fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// Failures while building an identifier. These are configuration problems
/// and are always returned to the caller.
#[derive(Debug, Error)]
pub enum ConstructionError {
    #[error("Unsupported container kind: {0}")]
    UnsupportedKind(String),

    #[error("Duplicate container signature id {0}")]
    DuplicateSignature(u32),

    #[error("Scratch directory {path} is not usable: {reason}")]
    ScratchDir { path: PathBuf, reason: String },
}

/// Failures of a single `process` call. Recoverable per request.
#[derive(Debug, Error)]
pub enum IdentificationError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Container parse error: {0}")]
    Container(#[from] ContainerError),
}

impl IdentificationError {
    /// Returns true when the input was readable but is not a well-formed
    /// container.
    pub fn is_parse_failure(&self) -> bool {
        matches!(self, Self::Container(_))
    }
}

pub type Result<T> = std::result::Result<T, IdentificationError>;
