//! Unified error type for the clipmill conversion stack.
//!
//! All crates funnel their failures into [`Error`]. Per-job failures are
//! caught at the job-procedure boundary and collapse into the job record's
//! captured message; nothing here ever aborts a sibling job or a batch.

use std::time::Duration;

/// Unified error type covering all failure modes in clipmill.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Engine construction or readiness failed.
    #[error("Engine init error: {0}")]
    EngineInit(String),

    /// Duration probing failed. Callers degrade progress reporting to
    /// indeterminate instead of failing the job.
    #[error("Probe error: {0}")]
    Probe(String),

    /// Writing a file into the engine's virtual filesystem failed.
    #[error("Write error [{name}]: {message}")]
    Write {
        /// Virtual filename that was being written.
        name: String,
        /// Human-readable error description.
        message: String,
    },

    /// The transcode call itself failed.
    #[error("Execute error: {0}")]
    Execute(String),

    /// Reading an output buffer back out of the engine failed.
    #[error("Read error [{name}]: {message}")]
    Read {
        /// Virtual filename that was being read.
        name: String,
        /// Human-readable error description.
        message: String,
    },

    /// An engine call exceeded its deadline.
    #[error("Timeout error [{operation}]: no result after {after:?}")]
    Timeout {
        /// The operation that timed out (e.g. "readiness", "execute").
        operation: String,
        /// The deadline that expired.
        after: Duration,
    },

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convenience constructor for [`Error::EngineInit`].
    pub fn engine_init(message: impl Into<String>) -> Self {
        Error::EngineInit(message.into())
    }

    /// Convenience constructor for [`Error::Probe`].
    pub fn probe(message: impl Into<String>) -> Self {
        Error::Probe(message.into())
    }

    /// Convenience constructor for [`Error::Write`].
    pub fn write(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Write {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Execute`].
    pub fn execute(message: impl Into<String>) -> Self {
        Error::Execute(message.into())
    }

    /// Convenience constructor for [`Error::Read`].
    pub fn read(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Read {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Timeout`].
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl std::fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
