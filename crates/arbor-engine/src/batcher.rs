//! Change batching
//!
//! Changes group into per-file batches. A batch leaves the batcher when it
//! grows past the size threshold, when its oldest change times out, or at
//! half the timeout if it carries an urgent (priority <= 2) change. All
//! state sits under one mutex, so an add racing an emit can neither lose
//! nor duplicate a change.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::change::ChangeSet;
use crate::config::EngineConfig;

/// Priority at or below which a batch becomes urgent.
const URGENT_PRIORITY: u8 = 2;

#[derive(Debug, Clone)]
pub struct ChangeBatch {
    pub file_path: String,
    pub changes: Vec<ChangeSet>,
    /// Most urgent priority among the contained changes.
    pub top_priority: u8,
    insertion_seq: u64,
}

impl ChangeBatch {
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

struct PendingBatch {
    changes: Vec<ChangeSet>,
    oldest: Instant,
    top_priority: u8,
    insertion_seq: u64,
}

struct BatcherState {
    batches: HashMap<String, PendingBatch>,
    next_seq: u64,
}

/// Groups change sets by target file and emits ordered batches.
#[derive(Clone)]
pub struct ChangeBatcher {
    state: Arc<Mutex<BatcherState>>,
    threshold: usize,
    timeout: Duration,
}

impl ChangeBatcher {
    pub fn new(config: &EngineConfig) -> Self {
        ChangeBatcher {
            state: Arc::new(Mutex::new(BatcherState {
                batches: HashMap::new(),
                next_seq: 0,
            })),
            threshold: config.batch_threshold.max(1),
            timeout: config.batch_timeout,
        }
    }

    /// Add a change. Returns the batch when the size threshold fires.
    pub fn add(&self, change: ChangeSet) -> Option<ChangeBatch> {
        let path = change.file_path.clone();
        let mut state = self.lock();
        if !state.batches.contains_key(&path) {
            let seq = state.next_seq;
            state.next_seq += 1;
            state.batches.insert(
                path.clone(),
                PendingBatch {
                    changes: Vec::new(),
                    oldest: Instant::now(),
                    top_priority: u8::MAX,
                    insertion_seq: seq,
                },
            );
        }
        let full = match state.batches.get_mut(&path) {
            Some(entry) => {
                entry.top_priority = entry.top_priority.min(change.priority());
                entry.changes.push(change);
                entry.changes.len() >= self.threshold
            }
            None => false,
        };
        if full {
            state.batches.remove(&path).map(into_batch)
        } else {
            None
        }
    }

    /// Emit batches whose timers have fired at `now`.
    pub fn poll_due(&self, now: Instant) -> Vec<ChangeBatch> {
        let mut state = self.lock();
        let half = self.timeout / 2;
        let due: Vec<String> = state
            .batches
            .iter()
            .filter(|(_, batch)| {
                let age = now.saturating_duration_since(batch.oldest);
                age >= self.timeout || (batch.top_priority <= URGENT_PRIORITY && age >= half)
            })
            .map(|(path, _)| path.clone())
            .collect();

        let mut emitted: Vec<ChangeBatch> = due
            .into_iter()
            .filter_map(|path| state.batches.remove(&path))
            .map(into_batch)
            .collect();
        sort_batches(&mut emitted);
        emitted
    }

    /// Drain everything, in priority order with insertion order as the tie
    /// break.
    pub fn process_all(&self) -> Vec<ChangeBatch> {
        let mut state = self.lock();
        let mut emitted: Vec<ChangeBatch> =
            state.batches.drain().map(|(_, batch)| into_batch(batch)).collect();
        sort_batches(&mut emitted);
        emitted
    }

    pub fn pending_len(&self) -> usize {
        self.lock().batches.values().map(|b| b.changes.len()).sum()
    }

    /// Background timer that feeds due batches into a channel. The task
    /// exits when the receiver side closes.
    pub fn spawn_emitter(&self, tx: mpsc::UnboundedSender<ChangeBatch>) -> tokio::task::JoinHandle<()> {
        let batcher = self.clone();
        let period = (batcher.timeout / 4).max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                for batch in batcher.poll_due(Instant::now()) {
                    if tx.send(batch).is_err() {
                        return;
                    }
                }
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BatcherState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn into_batch(pending: PendingBatch) -> ChangeBatch {
    let file_path = pending
        .changes
        .first()
        .map(|c| c.file_path.clone())
        .unwrap_or_default();
    ChangeBatch {
        file_path,
        changes: pending.changes,
        top_priority: pending.top_priority,
        insertion_seq: pending.insertion_seq,
    }
}

fn sort_batches(batches: &mut [ChangeBatch]) {
    batches.sort_by(|a, b| {
        a.top_priority
            .cmp(&b.top_priority)
            .then(a.insertion_seq.cmp(&b.insertion_seq))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeType;

    fn change(change_type: ChangeType, path: &str) -> ChangeSet {
        ChangeSet::new(change_type, path, Vec::new())
    }

    fn batcher_with(threshold: usize, timeout_ms: u64) -> ChangeBatcher {
        ChangeBatcher::new(&EngineConfig {
            batch_threshold: threshold,
            batch_timeout: Duration::from_millis(timeout_ms),
            ..EngineConfig::default()
        })
    }

    #[test]
    fn size_threshold_emits_immediately() {
        let batcher = batcher_with(2, 500);
        assert!(batcher.add(change(ChangeType::SymbolModify, "a.ts")).is_none());
        let batch = batcher.add(change(ChangeType::SymbolModify, "a.ts")).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batcher.pending_len(), 0);
    }

    #[test]
    fn batches_key_by_file_path() {
        let batcher = batcher_with(3, 500);
        let _ = batcher.add(change(ChangeType::SymbolModify, "a.ts"));
        let _ = batcher.add(change(ChangeType::SymbolModify, "b.ts"));
        assert_eq!(batcher.pending_len(), 2);
        let drained = batcher.process_all();
        assert_eq!(drained.len(), 2);
    }

    #[test]
    fn urgent_batch_emits_at_half_timeout() {
        let batcher = batcher_with(10, 100);
        let _ = batcher.add(change(ChangeType::SymbolModify, "a.ts"));
        let _ = batcher.add(change(ChangeType::FileDelete, "c.ts"));

        let now = Instant::now();
        // Before half the timeout nothing is due.
        assert!(batcher.poll_due(now).is_empty());

        std::thread::sleep(Duration::from_millis(60));
        let due = batcher.poll_due(Instant::now());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].file_path, "c.ts");
        assert_eq!(due[0].top_priority, 1);
        // The ordinary batch is still pending.
        assert_eq!(batcher.pending_len(), 1);
    }

    #[test]
    fn full_timeout_emits_everything_due() {
        let batcher = batcher_with(10, 40);
        let _ = batcher.add(change(ChangeType::SymbolModify, "a.ts"));
        std::thread::sleep(Duration::from_millis(60));
        let due = batcher.poll_due(Instant::now());
        assert_eq!(due.len(), 1);
    }

    #[test]
    fn process_all_orders_by_priority_then_insertion() {
        let batcher = batcher_with(10, 500);
        let _ = batcher.add(change(ChangeType::SymbolModify, "a.ts"));
        let _ = batcher.add(change(ChangeType::SymbolModify, "b.ts"));
        let _ = batcher.add(change(ChangeType::FileDelete, "c.ts"));

        let drained = batcher.process_all();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].file_path, "c.ts");
        // Tie between a.ts and b.ts breaks by insertion order.
        assert_eq!(drained[1].file_path, "a.ts");
        assert_eq!(drained[2].file_path, "b.ts");
    }

    #[tokio::test]
    async fn emitter_task_delivers_due_batches() {
        let batcher = batcher_with(10, 40);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = batcher.spawn_emitter(tx);

        let _ = batcher.add(change(ChangeType::FileDelete, "c.ts"));
        let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.file_path, "c.ts");

        drop(rx);
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }
}
