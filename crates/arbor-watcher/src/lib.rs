//! Arbor Watcher — debounced filesystem watching

pub mod watcher;

pub use watcher::{RepoWatcher, WatchBatch};
