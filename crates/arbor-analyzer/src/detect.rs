//! Filesystem change detection
//!
//! A path's version token depends on the configured mode. Whatever the
//! mode: a missing file previously seen is `Removed`, an unknown present
//! file is `Added`, a present file with a different token is `Modified`.
//! Renames are paired out-of-band by content hash.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ChangeDetection;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileChangeKind {
    Added,
    Modified,
    Removed,
    Renamed { from: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Repository-relative path.
    pub path: String,
    pub kind: FileChangeKind,
}

/// Compute the version token for a file, or `None` when it does not exist.
pub async fn file_version(
    root: &Path,
    rel_path: &Path,
    mode: ChangeDetection,
) -> std::io::Result<Option<String>> {
    let absolute = root.join(rel_path);
    match mode {
        ChangeDetection::Mtime => {
            let meta = match tokio::fs::metadata(&absolute).await {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e),
            };
            let modified = meta.modified()?;
            let nanos = modified
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            Ok(Some(format!("mtime-{}", nanos)))
        }
        ChangeDetection::Hash | ChangeDetection::Content => {
            let content = match tokio::fs::read(&absolute).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e),
            };
            let full = hex_digest(&content);
            Ok(Some(match mode {
                ChangeDetection::Hash => full[..32].to_string(),
                _ => full,
            }))
        }
    }
}

/// Full SHA-256 content hash, used for rename pairing regardless of the
/// detection mode.
pub fn content_hash(content: &str) -> String {
    hex_digest(content.as_bytes())
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Classify a set of paths against the known version map.
pub async fn detect_changes(
    root: &Path,
    paths: &[PathBuf],
    known_versions: &HashMap<String, String>,
    mode: ChangeDetection,
) -> std::io::Result<Vec<FileChange>> {
    let mut changes = Vec::new();
    for path in paths {
        let key = path.to_string_lossy().to_string();
        let current = file_version(root, path, mode).await?;
        match (known_versions.get(&key), current) {
            (None, Some(_)) => changes.push(FileChange {
                path: key,
                kind: FileChangeKind::Added,
            }),
            (Some(_), None) => changes.push(FileChange {
                path: key,
                kind: FileChangeKind::Removed,
            }),
            (Some(previous), Some(current)) if previous != &current => {
                changes.push(FileChange {
                    path: key,
                    kind: FileChangeKind::Modified,
                });
            }
            _ => {}
        }
    }
    Ok(changes)
}

/// Fuse removed/added pairs whose content hashes coincide into renames.
/// `removed_hashes` maps removed paths to their last known content hash;
/// `added_hashes` maps added paths to their current hash.
pub fn pair_renames(
    changes: Vec<FileChange>,
    removed_hashes: &HashMap<String, String>,
    added_hashes: &HashMap<String, String>,
) -> Vec<FileChange> {
    let mut renamed_from: HashMap<String, String> = HashMap::new();
    let mut consumed_removed: Vec<String> = Vec::new();

    for change in &changes {
        if change.kind != FileChangeKind::Added {
            continue;
        }
        let Some(added_hash) = added_hashes.get(&change.path) else {
            continue;
        };
        let matching = changes.iter().find(|candidate| {
            candidate.kind == FileChangeKind::Removed
                && !consumed_removed.contains(&candidate.path)
                && removed_hashes.get(&candidate.path) == Some(added_hash)
        });
        if let Some(removed) = matching {
            renamed_from.insert(change.path.clone(), removed.path.clone());
            consumed_removed.push(removed.path.clone());
        }
    }

    changes
        .into_iter()
        .filter_map(|change| match change.kind {
            FileChangeKind::Added => match renamed_from.remove(&change.path) {
                Some(from) => Some(FileChange {
                    path: change.path,
                    kind: FileChangeKind::Renamed { from },
                }),
                None => Some(change),
            },
            FileChangeKind::Removed if consumed_removed.contains(&change.path) => None,
            _ => Some(change),
        })
        .collect()
}
