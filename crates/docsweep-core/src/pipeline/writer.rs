//! Output artifacts.
//!
//! Output names are planned once from the full, sorted discovery list, so
//! the name a document gets never depends on which worker finishes first.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::config::RUN_SUMMARY_FILE;
use crate::error::WriteError;
use crate::types::{Artifact, DocumentRef, ExtractionResult};

/// Hex digits of the path hash tried, in order, when names collide.
const HASH_LENGTHS: [usize; 3] = [8, 16, 64];

/// Relative output path for every discovered document, keyed by its
/// source path.
#[derive(Debug, Clone, Default)]
pub struct OutputPlan {
    names: HashMap<PathBuf, PathBuf>,
}

impl OutputPlan {
    /// Plan names for `documents`, which must already be sorted.
    ///
    /// Names are compared case-insensitively. The first document keeps the
    /// plain name; later ones get a short hash of their raw relative path.
    pub fn new(documents: &[DocumentRef], output_extension: &str) -> Self {
        let mut claimed: HashSet<String> = HashSet::new();
        claimed.insert(RUN_SUMMARY_FILE.to_lowercase());

        let mut names = HashMap::with_capacity(documents.len());
        for doc in documents {
            let plain = Path::new(&doc.relative_path).with_extension(output_extension);
            let name = if claimed.insert(collision_key(&plain)) {
                plain
            } else {
                let renamed = disambiguate(&doc.identity(), &plain, output_extension, &mut claimed);
                tracing::info!(
                    path = %doc.relative_path,
                    output = %renamed.display(),
                    "Output name collision, using disambiguated name"
                );
                renamed
            };
            names.insert(doc.path.clone(), name);
        }

        Self { names }
    }

    /// Planned relative output path for a document.
    pub fn output_for(&self, doc: &DocumentRef) -> Option<&Path> {
        self.names.get(&doc.path).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn collision_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

fn disambiguate(
    identity: &[u8],
    plain: &Path,
    output_extension: &str,
    claimed: &mut HashSet<String>,
) -> PathBuf {
    let hash = blake3::hash(identity).to_hex();
    let stem = plain
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut candidate = plain.to_path_buf();
    for len in HASH_LENGTHS {
        candidate = plain.with_file_name(format!("{stem}-{}.{output_extension}", &hash[..len]));
        if claimed.insert(collision_key(&candidate)) {
            break;
        }
    }
    candidate
}

/// Writes one artifact per document under the output root.
#[derive(Debug, Clone)]
pub struct ResultWriter {
    output_root: PathBuf,
    plan: OutputPlan,
    output_extension: String,
}

impl ResultWriter {
    pub fn new(output_root: impl Into<PathBuf>, plan: OutputPlan, output_extension: &str) -> Self {
        Self {
            output_root: output_root.into(),
            plan,
            output_extension: output_extension.to_string(),
        }
    }

    /// Absolute artifact path for a document.
    pub fn target_for(&self, doc: &DocumentRef) -> PathBuf {
        match self.plan.output_for(doc) {
            Some(name) => self.output_root.join(name),
            None => self
                .output_root
                .join(Path::new(&doc.relative_path).with_extension(&self.output_extension)),
        }
    }

    /// Serialize and write the artifact for one outcome.
    pub async fn write(
        &self,
        doc: &DocumentRef,
        result: &ExtractionResult,
    ) -> Result<PathBuf, WriteError> {
        let target = self.target_for(doc);
        let bytes = serde_json::to_vec_pretty(&Artifact::new(doc, result)).map_err(|e| WriteError {
            path: target.clone(),
            source: std::io::Error::other(e),
        })?;
        write_atomic(&target, &bytes).await?;
        tracing::debug!(path = %doc.relative_path, output = %target.display(), "Wrote artifact");
        Ok(target)
    }
}

/// Write `bytes` to `path` via a temporary sibling and a rename, creating
/// parent directories as needed. Readers never see a partial file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), WriteError> {
    let err = |source| WriteError {
        path: path.to_path_buf(),
        source,
    };

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent).await.map_err(err)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err(e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err(e));
    }
    Ok(())
}
