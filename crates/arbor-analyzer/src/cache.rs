//! Bounded AST cache
//!
//! Keeps the most recent AST per path. Thread-safe for concurrent access;
//! once the bound is reached the least recently touched entry is evicted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arbor_parser::SourceAst;
use dashmap::DashMap;

struct Entry {
    ast: Arc<SourceAst>,
    last_touch: u64,
}

pub struct AstCache {
    entries: DashMap<String, Entry>,
    capacity: usize,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AstCache {
    pub fn new(capacity: usize) -> Self {
        AstCache {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, path: &str) -> Option<Arc<SourceAst>> {
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        match self.entries.get_mut(path) {
            Some(mut entry) => {
                entry.last_touch = tick;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.ast.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, ast: SourceAst) {
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            ast.path.clone(),
            Entry {
                ast: Arc::new(ast),
                last_touch: tick,
            },
        );
        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().last_touch)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(path) => {
                    self.entries.remove(&path);
                }
                None => break,
            }
        }
    }

    pub fn remove(&self, path: &str) {
        self.entries.remove(path);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
