//! Input discovery.
//!
//! Walks the input root once and returns every accepted document sorted by
//! relative path. Only a missing or non-directory root is fatal; anything
//! else that goes wrong with an individual entry becomes a warning.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use walkdir::WalkDir;

use crate::config::PipelineConfig;
use crate::error::DiscoveryError;
use crate::types::DocumentRef;

/// Non-fatal problem with a single directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryWarning {
    pub path: String,
    pub message: String,
}

/// Discovery output.
#[derive(Debug, Default)]
pub struct Discovered {
    pub documents: Vec<DocumentRef>,
    pub warnings: Vec<DiscoveryWarning>,
}

/// Discover candidate documents under `config.input_root`.
///
/// If the output root already exists inside the input root it is skipped,
/// so artifacts from a previous run are never picked up as input.
pub fn discover(config: &PipelineConfig) -> Result<Discovered, DiscoveryError> {
    let root = canonical_root(&config.input_root)?;
    let excluded = std::fs::canonicalize(&config.output_root)
        .ok()
        .filter(|out| out.starts_with(&root) && *out != root);

    let mut found = Discovered::default();
    let mut candidates: Vec<(DocumentRef, PathBuf)> = Vec::new();

    let walker = WalkDir::new(&root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| excluded.as_deref() != Some(e.path()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| root.display().to_string());
                tracing::warn!(path = %path, error = %e, "Skipping unreadable entry");
                found.warnings.push(DiscoveryWarning {
                    path,
                    message: e.to_string(),
                });
                continue;
            }
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }

        let accepted = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| config.accepts_extension(e))
            .unwrap_or(false);
        if !accepted {
            continue;
        }

        // Regular files are their own target; symlinks must land inside the root.
        let target = if file_type.is_symlink() {
            match std::fs::canonicalize(entry.path()) {
                Ok(target) if target.starts_with(&root) => target,
                Ok(target) => {
                    tracing::debug!(
                        path = %entry.path().display(),
                        target = %target.display(),
                        "Skipping symlink outside input root"
                    );
                    continue;
                }
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Broken symlink");
                    found.warnings.push(DiscoveryWarning {
                        path: entry.path().display().to_string(),
                        message: e.to_string(),
                    });
                    continue;
                }
            }
        } else {
            entry.path().to_path_buf()
        };

        let metadata = match std::fs::metadata(&target) {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "Cannot stat entry");
                found.warnings.push(DiscoveryWarning {
                    path: entry.path().display().to_string(),
                    message: e.to_string(),
                });
                continue;
            }
        };

        let Ok(relative) = entry.path().strip_prefix(&root) else {
            continue;
        };

        let doc = DocumentRef {
            path: entry.path().to_path_buf(),
            relative_path: to_relative_string(relative),
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        };
        candidates.push((doc, target));
    }

    candidates.sort_by(|a, b| a.0.relative_path.cmp(&b.0.relative_path));
    found.documents = dedup_by_target(candidates);

    tracing::info!(
        root = %root.display(),
        documents = found.documents.len(),
        warnings = found.warnings.len(),
        "Discovery complete"
    );

    Ok(found)
}

fn canonical_root(root: &Path) -> Result<PathBuf, DiscoveryError> {
    let metadata = match std::fs::metadata(root) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DiscoveryError::RootMissing(root.to_path_buf()));
        }
        Err(source) => {
            return Err(DiscoveryError::RootInaccessible {
                path: root.to_path_buf(),
                source,
            });
        }
    };
    if !metadata.is_dir() {
        return Err(DiscoveryError::NotADirectory(root.to_path_buf()));
    }
    std::fs::canonicalize(root).map_err(|source| DiscoveryError::RootInaccessible {
        path: root.to_path_buf(),
        source,
    })
}

/// Keep the first ref (in relative-path order) for each target file.
fn dedup_by_target(candidates: Vec<(DocumentRef, PathBuf)>) -> Vec<DocumentRef> {
    let mut targets: HashSet<PathBuf> = HashSet::new();
    candidates
        .into_iter()
        .filter_map(|(doc, target)| {
            if targets.insert(target) {
                Some(doc)
            } else {
                tracing::debug!(path = %doc.relative_path, "Skipping duplicate of an earlier document");
                None
            }
        })
        .collect()
}

fn to_relative_string(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
