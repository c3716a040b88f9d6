//! Score-prioritized pending queue
//!
//! Dispatch order is score descending with stable FIFO tie-breaking on the
//! insertion sequence number. The queue is a sorted vector: n stays in the
//! low thousands and is pruned on every threshold rise, so sorted insertion
//! beats a heap on simplicity and the prune pass.

use serde::{Deserialize, Serialize};

/// Where a submission originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionSource {
    Cpu,
    Verifier,
    Journal,
}

/// One queued submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionTask {
    pub seed: u64,
    pub score: f64,
    pub source: SubmissionSource,
    pub seq: u64,
    pub retries: u32,
}

impl SubmissionTask {
    pub fn new(seed: u64, score: f64, source: SubmissionSource, seq: u64) -> Self {
        Self {
            seed,
            score,
            source,
            seq,
            retries: 0,
        }
    }
}

/// Pending submissions, highest score first, FIFO on ties.
#[derive(Debug, Default)]
pub struct PendingQueue {
    tasks: Vec<SubmissionTask>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorted insertion by (score desc, seq asc).
    pub fn insert(&mut self, task: SubmissionTask) {
        let position = self.tasks.partition_point(|t| {
            t.score > task.score || (t.score == task.score && t.seq < task.seq)
        });
        self.tasks.insert(position, task);
    }

    /// The highest-priority task, removed from the queue.
    pub fn pop_head(&mut self) -> Option<SubmissionTask> {
        if self.tasks.is_empty() {
            None
        } else {
            Some(self.tasks.remove(0))
        }
    }

    pub fn peek_head(&self) -> Option<&SubmissionTask> {
        self.tasks.first()
    }

    /// Drop every task failing `keep`; returns how many were removed.
    pub fn prune(&mut self, mut keep: impl FnMut(&SubmissionTask) -> bool) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|t| keep(t));
        before - self.tasks.len()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubmissionTask> {
        self.tasks.iter()
    }

    pub fn contains_seed(&self, seed: u64) -> bool {
        self.tasks.iter().any(|t| t.seed == seed)
    }
}
