//! Error types for interpose.

use crate::port::PortKind;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using interpose's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for interpose operations.
///
/// Failures reported by collaborator ports and frames travel through the
/// proxy layer unchanged as [`Error::Port`]. Lifecycle invariant violations
/// are not represented here; they are programming defects and are asserted.
#[derive(Error, Debug)]
pub enum Error {
    /// A collaborator port or frame reported a failure.
    #[error("port error: {0}")]
    Port(String),

    /// A disposal request is recorded for the stage; new sessions are refused.
    #[error("stage '{stage}' has a pending disposal")]
    DisposalPending {
        /// Stage name.
        stage: String,
    },

    /// The stage has been disposed.
    #[error("stage '{stage}' is disposed")]
    Disposed {
        /// Stage name.
        stage: String,
    },

    /// The new target refused to open while rewiring. The old target stays wired.
    #[error("rewiring '{output}' failed: {source}")]
    RewireFailed {
        /// Output being rewired.
        output: String,
        /// Failure reported by the new target.
        #[source]
        source: Box<Error>,
    },

    /// The rewiring exclusion could not be taken in time.
    #[error("timed out after {0:?} waiting for port rewiring lock")]
    RewireLockTimeout(Duration),

    /// A rewire target of the wrong kind was supplied.
    #[error("expected a {expected} port, got a {found} port")]
    KindMismatch {
        /// Kind of the output being rewired.
        expected: PortKind,
        /// Kind of the supplied target.
        found: PortKind,
    },

    /// A frame proxy was used after it was restored to its pool.
    #[error("frame proxy used after restoration")]
    StaleFrame,

    /// No stage factory with this identifier is registered.
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    /// The stage has no input with this name.
    #[error("unknown input: {0}")]
    UnknownInput(String),

    /// The stage has no output with this name.
    #[error("unknown output: {0}")]
    UnknownOutput(String),
}

impl Error {
    /// Build a collaborator failure from any displayable reason.
    pub fn port(reason: impl Into<String>) -> Self {
        Self::Port(reason.into())
    }
}
