//! docsweep core - batch PDF content extraction
//!
//! This crate contains the whole pipeline, with no CLI dependency:
//! - Input discovery (walkdir)
//! - PDF content extraction behind a narrow backend trait (lopdf)
//! - Per-document fault containment with hard deadlines
//! - Bounded worker pool and atomic artifact writes
//! - Run coordination, cancellation and the run summary

pub mod config;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod pdf;
pub mod pipeline;
pub mod types;

pub use config::{PipelineConfig, Settings};
pub use error::{DiscoveryError, ErrorKind, ParseError, PipelineError, WriteError};
pub use extract::Extractor;
pub use pdf::{LopdfBackend, PdfBackend};
pub use pipeline::{Pipeline, RunState, RunSummary};
pub use types::{DocumentRef, ExtractedContent, ExtractionResult};
