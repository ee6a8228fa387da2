//! Error taxonomy for the pipeline.
//!
//! Only [`DiscoveryError`] and [`PipelineError`] are run-level. Everything
//! that happens to a single document is folded into an [`ErrorKind`] and
//! recorded, never propagated.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-document failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Structurally invalid document
    Corrupt,
    /// Valid document using an encoding or feature we cannot handle
    Unsupported,
    /// Exceeded the per-document processing budget
    Timeout,
    /// The document could not be read
    IoError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Corrupt => write!(f, "corrupt"),
            ErrorKind::Unsupported => write!(f, "unsupported"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::IoError => write!(f, "io_error"),
        }
    }
}

/// Errors raised by a [`PdfBackend`](crate::pdf::PdfBackend).
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to read document: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse PDF: {0}")]
    Corrupt(String),

    #[error("Unsupported document: {0}")]
    Unsupported(String),

    #[error("Extraction cancelled")]
    Cancelled,
}

impl ParseError {
    /// Category recorded for this error. A cancelled parse only happens
    /// after the deadline fired, so it counts as a timeout.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParseError::Io(_) => ErrorKind::IoError,
            ParseError::Corrupt(_) => ErrorKind::Corrupt,
            ParseError::Unsupported(_) => ErrorKind::Unsupported,
            ParseError::Cancelled => ErrorKind::Timeout,
        }
    }
}

impl From<lopdf::Error> for ParseError {
    fn from(err: lopdf::Error) -> Self {
        match err {
            lopdf::Error::IO(e) => ParseError::Io(e),
            other => ParseError::Corrupt(other.to_string()),
        }
    }
}

/// Fatal errors while discovering input documents.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Input root does not exist: {0}")]
    RootMissing(PathBuf),

    #[error("Input root is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Cannot access input root {path}: {source}")]
    RootInaccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to write one output artifact. Recorded as a warning.
#[derive(Error, Debug)]
#[error("Failed to write {path}: {source}")]
pub struct WriteError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Invalid pipeline configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Worker count must be at least 1")]
    NoWorkers,

    #[error("Per-document timeout must be greater than zero")]
    ZeroTimeout,

    #[error("At least one accepted extension is required")]
    NoExtensions,

    #[error("Output extension must not be empty")]
    EmptyOutputExtension,

    #[error("Failed to read settings file {path}: {source}")]
    SettingsIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings file {path}: {source}")]
    SettingsFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Run-level errors that stop the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to prepare output root {path}: {source}")]
    OutputRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write run summary: {0}")]
    Summary(#[source] WriteError),
}
