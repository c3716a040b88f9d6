//! Candidate verifier
//!
//! GPU-flagged seeds wait here for an exact CPU rescore. The queue is
//! bounded with two levels: candidates (gate passers) strictly dominate
//! samples (margin-calibration traffic). When full, samples are rejected
//! outright and a new candidate evicts the oldest sample; only if no sample
//! is left is the candidate itself rejected. A seen-set keeps a seed from
//! being queued twice while pending, and is rolled back on rejection or
//! eviction.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashSet;

use seedhunt_core::{BestTracker, EventLog, ExploreStats};
use seedhunt_net::{SubmissionManager, SubmissionSource};
use seedhunt_scorer::ExactScorer;

use crate::adaptive::{AdaptiveMargin, AdaptiveScoreShift};

pub const DEFAULT_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyPriority {
    Candidate,
    Sample,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifyRequest {
    pub seed: u64,
    pub approx: f32,
    pub priority: VerifyPriority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued; the oldest pending sample was dropped to make room.
    EvictedSample,
    Rejected,
    Duplicate,
    Closed,
}

#[derive(Debug, Default)]
struct Levels {
    candidates: VecDeque<VerifyRequest>,
    samples: VecDeque<VerifyRequest>,
}

impl Levels {
    fn len(&self) -> usize {
        self.candidates.len() + self.samples.len()
    }
}

/// Bounded two-level verification queue.
#[derive(Debug)]
pub struct VerifyQueue {
    levels: Mutex<Levels>,
    available: Condvar,
    seen: DashSet<u64>,
    capacity: usize,
    closed: AtomicBool,
}

impl VerifyQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            levels: Mutex::new(Levels::default()),
            available: Condvar::new(),
            seen: DashSet::new(),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn push(&self, request: VerifyRequest) -> PushOutcome {
        if self.closed.load(Ordering::Relaxed) {
            return PushOutcome::Closed;
        }
        if !self.seen.insert(request.seed) {
            return PushOutcome::Duplicate;
        }
        let mut levels = self.levels.lock().unwrap();
        if levels.len() < self.capacity {
            match request.priority {
                VerifyPriority::Candidate => levels.candidates.push_back(request),
                VerifyPriority::Sample => levels.samples.push_back(request),
            }
            drop(levels);
            self.available.notify_one();
            return PushOutcome::Queued;
        }
        match request.priority {
            VerifyPriority::Sample => {
                drop(levels);
                self.seen.remove(&request.seed);
                PushOutcome::Rejected
            }
            VerifyPriority::Candidate => {
                if let Some(evicted) = levels.samples.pop_front() {
                    levels.candidates.push_back(request);
                    drop(levels);
                    self.seen.remove(&evicted.seed);
                    self.available.notify_one();
                    PushOutcome::EvictedSample
                } else {
                    drop(levels);
                    self.seen.remove(&request.seed);
                    PushOutcome::Rejected
                }
            }
        }
    }

    /// Highest-priority pending request, waiting up to `timeout` when the
    /// queue is empty. `None` on timeout or when closed and drained.
    pub fn pop(&self, timeout: Duration) -> Option<VerifyRequest> {
        let mut levels = self.levels.lock().unwrap();
        loop {
            if let Some(request) = levels.candidates.pop_front() {
                return Some(request);
            }
            if let Some(request) = levels.samples.pop_front() {
                return Some(request);
            }
            if self.closed.load(Ordering::Relaxed) {
                return None;
            }
            let (guard, wait) = self.available.wait_timeout(levels, timeout).unwrap();
            levels = guard;
            if wait.timed_out() {
                return None;
            }
        }
    }

    /// Release the seen-set entry after a request was fully processed.
    pub fn mark_done(&self, seed: u64) {
        self.seen.remove(&seed);
    }

    /// Stop accepting pushes; pending requests remain poppable for a drain.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.levels.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_seen(&self) -> usize {
        self.seen.len()
    }
}

/// Everything a verifier thread needs.
pub struct VerifierContext {
    pub queue: Arc<VerifyQueue>,
    pub image_size: usize,
    pub best: Arc<BestTracker>,
    pub margin: Arc<AdaptiveMargin>,
    pub shift: Arc<AdaptiveScoreShift>,
    pub submit: Option<Arc<SubmissionManager>>,
    pub stats: Arc<ExploreStats>,
    pub events: Arc<EventLog>,
}

/// Pool of verifier threads popping in priority order and rescoring exactly.
pub struct VerifierPool {
    handles: Vec<JoinHandle<()>>,
}

impl VerifierPool {
    pub fn spawn(threads: usize, context: Arc<VerifierContext>) -> Self {
        let handles = (0..threads.max(1))
            .map(|i| {
                let context = Arc::clone(&context);
                std::thread::Builder::new()
                    .name(format!("verify-{i}"))
                    .spawn(move || verify_loop(&context))
                    .expect("spawn verifier")
            })
            .collect();
        Self { handles }
    }

    /// Wait for all threads; call after closing the queue.
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn verify_loop(ctx: &VerifierContext) {
    let scorer = ExactScorer::with_size(ctx.image_size);
    loop {
        match ctx.queue.pop(Duration::from_millis(100)) {
            Some(request) => {
                let result = scorer.score(request.seed);
                ctx.stats.add_verified(1);
                ctx.margin.record(request.approx, result.total_score);
                ctx.shift.record(request.approx, result.total_score);
                if ctx.best.offer(&result) {
                    ctx.events.best(format!(
                        "new best {:.4} at seed {} (verified)",
                        result.total_score, result.seed
                    ));
                }
                if let Some(submit) = &ctx.submit {
                    submit.maybe_enqueue(request.seed, result.total_score, SubmissionSource::Verifier);
                }
                ctx.queue.mark_done(request.seed);
            }
            None => {
                if ctx.queue.is_closed() && ctx.queue.is_empty() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(seed: u64) -> VerifyRequest {
        VerifyRequest {
            seed,
            approx: -9.0,
            priority: VerifyPriority::Candidate,
        }
    }

    fn sample(seed: u64) -> VerifyRequest {
        VerifyRequest {
            seed,
            approx: -9.0,
            priority: VerifyPriority::Sample,
        }
    }

    #[test]
    fn test_candidate_dominates_sample() {
        let queue = VerifyQueue::new(8);
        assert_eq!(queue.push(sample(1)), PushOutcome::Queued);
        assert_eq!(queue.push(candidate(2)), PushOutcome::Queued);
        assert_eq!(queue.push(sample(3)), PushOutcome::Queued);
        let order: Vec<u64> = (0..3)
            .filter_map(|_| queue.pop(Duration::from_millis(1)))
            .map(|r| r.seed)
            .collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn test_full_queue_rejects_samples_evicts_for_candidates() {
        let capacity = 4;
        let queue = VerifyQueue::new(capacity);
        for seed in 0..capacity as u64 {
            assert_eq!(queue.push(sample(seed)), PushOutcome::Queued);
        }
        // One candidate displaces exactly one sample (the oldest).
        assert_eq!(queue.push(candidate(100)), PushOutcome::EvictedSample);
        assert_eq!(queue.len(), capacity);
        // A further sample is rejected outright.
        assert_eq!(queue.push(sample(101)), PushOutcome::Rejected);
        // The evicted seed may be pushed again later.
        assert_eq!(queue.push(sample(0)), PushOutcome::Rejected);
        assert!(!queue.is_closed());
    }

    #[test]
    fn test_eviction_cascade_and_seen_rollback() {
        // Capacity 2: samples A, B then candidates C, D. C evicts A, D
        // evicts B; the verifier sees C then D; the seen-set ends empty.
        let queue = VerifyQueue::new(2);
        assert_eq!(queue.push(sample(0xA)), PushOutcome::Queued);
        assert_eq!(queue.push(sample(0xB)), PushOutcome::Queued);
        assert_eq!(queue.push(candidate(0xC)), PushOutcome::EvictedSample);
        assert_eq!(queue.push(candidate(0xD)), PushOutcome::EvictedSample);

        let first = queue.pop(Duration::from_millis(1)).unwrap();
        let second = queue.pop(Duration::from_millis(1)).unwrap();
        assert_eq!(first.seed, 0xC);
        assert_eq!(second.seed, 0xD);
        queue.mark_done(first.seed);
        queue.mark_done(second.seed);
        assert_eq!(queue.pending_seen(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_candidate_rejected_when_full_of_candidates() {
        let queue = VerifyQueue::new(2);
        assert_eq!(queue.push(candidate(1)), PushOutcome::Queued);
        assert_eq!(queue.push(candidate(2)), PushOutcome::Queued);
        assert_eq!(queue.push(candidate(3)), PushOutcome::Rejected);
        // Rolled back: seed 3 is not marked pending.
        assert_eq!(queue.pending_seen(), 2);
    }

    #[test]
    fn test_duplicate_push_refused_while_pending() {
        let queue = VerifyQueue::new(4);
        assert_eq!(queue.push(candidate(7)), PushOutcome::Queued);
        assert_eq!(queue.push(candidate(7)), PushOutcome::Duplicate);
        let popped = queue.pop(Duration::from_millis(1)).unwrap();
        // Still pending until mark_done.
        assert_eq!(queue.push(candidate(7)), PushOutcome::Duplicate);
        queue.mark_done(popped.seed);
        assert_eq!(queue.push(candidate(7)), PushOutcome::Queued);
    }

    #[test]
    fn test_closed_queue_rejects_and_drains() {
        let queue = VerifyQueue::new(4);
        queue.push(candidate(1));
        queue.push(sample(2));
        queue.close();
        assert_eq!(queue.push(candidate(3)), PushOutcome::Closed);
        assert!(queue.pop(Duration::from_millis(1)).is_some());
        assert!(queue.pop(Duration::from_millis(1)).is_some());
        assert!(queue.pop(Duration::from_millis(1)).is_none());
    }

    #[test]
    fn test_verifier_pool_drains_and_feeds_margin() {
        let queue = Arc::new(VerifyQueue::new(64));
        let margin = Arc::new(AdaptiveMargin::new(crate::adaptive::MarginConfig {
            window: 64,
            min_samples: 4,
            ..crate::adaptive::MarginConfig::default()
        }));
        let context = Arc::new(VerifierContext {
            queue: Arc::clone(&queue),
            image_size: 32,
            best: Arc::new(BestTracker::new()),
            margin: Arc::clone(&margin),
            shift: Arc::new(AdaptiveScoreShift::default()),
            submit: None,
            stats: Arc::new(ExploreStats::new()),
            events: Arc::new(EventLog::default()),
        });

        for seed in 0..16u64 {
            // Deliberately low approximations so the margin sees a positive
            // underestimate on every pair.
            assert_eq!(
                queue.push(VerifyRequest {
                    seed,
                    approx: -50.0,
                    priority: VerifyPriority::Sample,
                }),
                PushOutcome::Queued
            );
        }
        let pool = VerifierPool::spawn(2, Arc::clone(&context));
        queue.close();
        pool.join();

        assert_eq!(context.stats.snapshot().verified, 16);
        assert_eq!(queue.pending_seen(), 0);
        assert!(context.best.current().is_some());
        assert!(margin.current() > 0.0);
    }
}
