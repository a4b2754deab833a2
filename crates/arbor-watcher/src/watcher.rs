//! Filesystem watcher with debounced, deterministic batches
//!
//! Raw notify events funnel into a debounce window; everything seen within
//! the window is de-duplicated, made repository-relative, filtered against
//! the skip rules, sorted, and emitted as one batch. The same set of events
//! always produces the same batch regardless of arrival order.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use arbor_parser::{classify, is_skipped_path};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// One debounced batch of dirty repository-relative paths, sorted
/// lexicographically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchBatch {
    pub paths: Vec<PathBuf>,
}

impl WatchBatch {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Watches a repository root and yields debounced batches.
pub struct RepoWatcher {
    _watcher: RecommendedWatcher,
    batch_rx: mpsc::UnboundedReceiver<WatchBatch>,
}

impl RepoWatcher {
    pub fn new(root: impl AsRef<Path>, debounce: Duration) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<PathBuf>();
        let (batch_tx, batch_rx) = mpsc::unbounded_channel::<WatchBatch>();

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        if !matches!(
                            event.kind,
                            notify::EventKind::Create(_)
                                | notify::EventKind::Modify(_)
                                | notify::EventKind::Remove(_)
                        ) {
                            return;
                        }
                        for path in event.paths {
                            let _ = raw_tx.send(path);
                        }
                    }
                    Err(e) => error!("watch error: {}", e),
                }
            })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!("watching {}", root.display());

        tokio::spawn(debounce_loop(root, raw_rx, batch_tx, debounce));

        Ok(Self {
            _watcher: watcher,
            batch_rx,
        })
    }

    /// Await the next non-empty batch. `None` once the watcher shuts down.
    pub async fn next_batch(&mut self) -> Option<WatchBatch> {
        self.batch_rx.recv().await
    }
}

async fn debounce_loop(
    root: PathBuf,
    mut raw_rx: mpsc::UnboundedReceiver<PathBuf>,
    batch_tx: mpsc::UnboundedSender<WatchBatch>,
    debounce: Duration,
) {
    while let Some(first) = raw_rx.recv().await {
        let mut pending: BTreeSet<PathBuf> = BTreeSet::new();
        collect_path(&root, first, &mut pending);

        loop {
            tokio::select! {
                more = raw_rx.recv() => match more {
                    Some(path) => collect_path(&root, path, &mut pending),
                    None => break,
                },
                _ = tokio::time::sleep(debounce) => break,
            }
        }

        if pending.is_empty() {
            continue;
        }
        let batch = WatchBatch {
            paths: pending.into_iter().collect(),
        };
        debug!(paths = batch.paths.len(), "emitting watch batch");
        if batch_tx.send(batch).is_err() {
            return;
        }
    }
}

/// Normalize to a repository-relative path and keep it only when it is a
/// supported, non-skipped file.
fn collect_path(root: &Path, path: PathBuf, pending: &mut BTreeSet<PathBuf>) {
    let relative = match path.strip_prefix(root) {
        Ok(relative) => relative.to_path_buf(),
        Err(_) => return,
    };
    if is_skipped_path(&relative) {
        return;
    }
    if classify(&relative).is_ok() {
        pending.insert(relative);
    }
}
