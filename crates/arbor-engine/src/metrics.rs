//! Engine metrics

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Wall-clock spent per pipeline stage, accumulated across batches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageDurations {
    pub shadow_apply: Duration,
    pub plan_build: Duration,
    pub plan_apply: Duration,
    pub diff: Duration,
}

/// Snapshot of engine counters. Cheap to clone; handed out by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VgeMetrics {
    pub total_changes: u64,
    pub batches_processed: u64,
    pub average_batch_size: f64,
    pub stages: StageDurations,
    pub shadow_memory_bytes: u64,
    pub cache_hit_rate: f64,
    pub plans_applied: u64,
    pub plans_rolled_back: u64,
    pub last_update: Option<SystemTime>,
}

impl Default for VgeMetrics {
    fn default() -> Self {
        VgeMetrics {
            total_changes: 0,
            batches_processed: 0,
            average_batch_size: 0.0,
            stages: StageDurations::default(),
            shadow_memory_bytes: 0,
            cache_hit_rate: 0.0,
            plans_applied: 0,
            plans_rolled_back: 0,
            last_update: None,
        }
    }
}

impl VgeMetrics {
    pub fn record_batch(&mut self, batch_size: usize) {
        self.batches_processed += 1;
        let n = self.batches_processed as f64;
        self.average_batch_size =
            self.average_batch_size + (batch_size as f64 - self.average_batch_size) / n;
        self.last_update = Some(SystemTime::now());
    }
}
