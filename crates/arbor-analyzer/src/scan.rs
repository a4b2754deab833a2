//! Repository scanning

use std::path::{Path, PathBuf};

use arbor_parser::{classify, is_skipped_path};
use tracing::debug;

/// Walk the repository and return the repository-relative paths of every
/// supported, non-skipped file. Honors .gitignore via the walker itself.
pub fn scan_repository(root: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let walker = ignore::WalkBuilder::new(root)
        .hidden(false)
        .follow_links(false)
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                debug!(%error, "walk entry skipped");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        if is_skipped_path(relative) {
            continue;
        }
        if classify(relative).is_ok() {
            paths.push(relative.to_path_buf());
        }
    }

    paths.sort();
    paths
}
