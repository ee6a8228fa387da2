//! PDF extraction capability.
//!
//! The pipeline only talks to a parser through [`PdfBackend`]: open a
//! document, then extract its content. Both calls run on the blocking pool
//! and must check the cancellation token between units of work so that an
//! abandoned attempt stops and frees its memory.

mod extractor;
pub mod outline;

pub use extractor::LopdfBackend;

use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::error::ParseError;
use crate::types::ExtractedContent;

/// Narrow contract a parsing engine has to satisfy.
pub trait PdfBackend: Send + Sync + 'static {
    /// Parsed document, owned by a single extraction attempt.
    type Handle: Send + 'static;

    /// Open and parse the document at `path`.
    fn open(&self, path: &Path) -> Result<Self::Handle, ParseError>;

    /// Extract content from an opened document.
    ///
    /// Implementations return [`ParseError::Cancelled`] once `cancel` fires.
    fn extract(
        &self,
        handle: Self::Handle,
        cancel: &CancellationToken,
    ) -> Result<ExtractedContent, ParseError>;
}
