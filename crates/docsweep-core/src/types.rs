//! Document and result types shared across the pipeline.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// One discovered input document. Never mutated after discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentRef {
    /// Absolute path used to open the document
    pub path: PathBuf,
    /// Path relative to the input root, `/`-separated
    pub relative_path: String,
    /// File size in bytes at discovery time
    pub size: u64,
    /// Last modification time, if the filesystem reports one
    pub modified: Option<DateTime<Utc>>,
}

impl DocumentRef {
    /// Raw bytes of the path relative to the input root, `/`-separated.
    ///
    /// `relative_path` is lossy for names that are not valid UTF-8, so two
    /// distinct files can share it. These bytes never collide.
    pub fn identity(&self) -> Vec<u8> {
        let depth = self.relative_path.split('/').count();
        let components: Vec<_> = self.path.components().collect();
        let start = components.len().saturating_sub(depth);

        let mut bytes = Vec::new();
        for (i, component) in components[start..].iter().enumerate() {
            if i > 0 {
                bytes.push(b'/');
            }
            bytes.extend_from_slice(component.as_os_str().as_encoded_bytes());
        }
        bytes
    }
}

/// Kind of asset referenced from a page's resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Form,
    Font,
    Other,
}

/// An embedded asset referenced by a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRef {
    /// Resource name on the page (e.g. `Im0`, `F1`)
    pub name: String,
    pub kind: AssetKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Extracted content for a single page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    /// 1-based page number
    pub number: u32,
    /// Page width in PDF points
    pub width: f64,
    /// Page height in PDF points
    pub height: f64,
    pub text: String,
    pub assets: Vec<AssetRef>,
}

/// Heading level in the derived outline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HeadingLevel {
    H1,
    H2,
    H3,
}

impl HeadingLevel {
    /// Map a 1-based depth onto a level, clamping anything deeper to H3.
    pub fn from_depth(depth: usize) -> Self {
        match depth {
            0 | 1 => HeadingLevel::H1,
            2 => HeadingLevel::H2,
            _ => HeadingLevel::H3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineEntry {
    pub level: HeadingLevel,
    pub text: String,
    pub page: u32,
}

/// Semantic payload of a successfully extracted document.
///
/// Raw PDF bytes are never kept here; the parsed document is dropped once
/// extraction returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub title: Option<String>,
    pub outline: Vec<OutlineEntry>,
    pub pages: Vec<PageRecord>,
}

impl ExtractedContent {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Outcome of processing one document.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionResult {
    Success { content: ExtractedContent },
    Failure { kind: ErrorKind, message: String },
}

impl ExtractionResult {
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Output artifact written for one document.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Artifact<'a> {
    Success {
        source: &'a str,
        title: Option<&'a str>,
        outline: &'a [OutlineEntry],
        pages: &'a [PageRecord],
    },
    Failure {
        source: &'a str,
        kind: ErrorKind,
        message: &'a str,
    },
}

impl<'a> Artifact<'a> {
    pub fn new(doc: &'a DocumentRef, result: &'a ExtractionResult) -> Self {
        match result {
            ExtractionResult::Success { content } => Artifact::Success {
                source: &doc.relative_path,
                title: content.title.as_deref(),
                outline: &content.outline,
                pages: &content.pages,
            },
            ExtractionResult::Failure { kind, message } => Artifact::Failure {
                source: &doc.relative_path,
                kind: *kind,
                message,
            },
        }
    }
}
