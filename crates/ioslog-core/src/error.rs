//! Error types for session setup.
//!
//! Only setup-time failures live here. A source failing mid-stream is not
//! an `Error`: it travels through the aggregated output stream itself (see
//! the reader crate's `LogStreamError`) so every subscriber observes it.

use thiserror::Error;

use crate::types::SourceKind;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to start {kind} log capture: {reason}")]
    SourceSpawn { kind: SourceKind, reason: String },
}

impl Error {
    pub fn source_spawn(kind: SourceKind, reason: impl Into<String>) -> Self {
        Self::SourceSpawn {
            kind,
            reason: reason.into(),
        }
    }

    /// Check if this is a recoverable error.
    ///
    /// Spawn failures are recoverable at the session level: the affected
    /// source simply contributes no lines while the others keep running.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::SourceSpawn { .. })
    }
}
