//! Shared counters, running statistics and best-so-far trackers
//!
//! Contention on these structures dominates at multi-MHz aggregate scoring
//! rates, so the hot paths are atomic counters and workers publish score
//! moments in batches rather than per sample. Counters wrap on overflow;
//! snapshots are atomic per counter but not across counters, and readers
//! tolerate the slight skew.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::score::ScoreResult;

/// Running first and second moments, merged from batched worker updates.
#[derive(Debug, Clone, Copy, Default)]
struct Moments {
    count: u64,
    sum: f64,
    sum_sq: f64,
}

impl Moments {
    fn merge(&mut self, count: u64, sum: f64, sum_sq: f64) {
        self.count = self.count.wrapping_add(count);
        self.sum += sum;
        self.sum_sq += sum_sq;
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    fn std_dev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let var = (self.sum_sq / self.count as f64 - mean * mean).max(0.0);
        var.sqrt()
    }
}

/// Thread-safe exploration counters and score statistics.
#[derive(Debug, Default)]
pub struct ExploreStats {
    cpu_scored: AtomicU64,
    gpu_scored: AtomicU64,
    verified: AtomicU64,
    candidates: AtomicU64,
    samples: AtomicU64,
    dropped_nan: AtomicU64,
    submitted: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
    exact: Mutex<Moments>,
    approx: Mutex<Moments>,
}

/// Point-in-time view of [`ExploreStats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub cpu_scored: u64,
    pub gpu_scored: u64,
    pub verified: u64,
    pub candidates: u64,
    pub samples: u64,
    pub dropped_nan: u64,
    pub submitted: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub failed: u64,
    pub exact_mean: f64,
    pub exact_std_dev: f64,
    pub approx_mean: f64,
    pub approx_std_dev: f64,
}

impl ExploreStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a batch of exact-scorer results: count, score sum, score sum
    /// of squares.
    pub fn record_exact_batch(&self, count: u64, sum: f64, sum_sq: f64) {
        self.cpu_scored.fetch_add(count, Ordering::Relaxed);
        self.exact.lock().unwrap().merge(count, sum, sum_sq);
    }

    /// Publish a batch of approximate-scorer results.
    pub fn record_approx_batch(&self, count: u64, sum: f64, sum_sq: f64) {
        self.gpu_scored.fetch_add(count, Ordering::Relaxed);
        self.approx.lock().unwrap().merge(count, sum, sum_sq);
    }

    /// Running mean and standard deviation of approximate scores. Feeds the
    /// GPU manager's sample gate.
    pub fn approx_moments(&self) -> (f64, f64) {
        let m = self.approx.lock().unwrap();
        (m.mean(), m.std_dev())
    }

    pub fn add_verified(&self, n: u64) {
        self.verified.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_candidates(&self, n: u64) {
        self.candidates.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_samples(&self, n: u64) {
        self.samples.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_dropped_nan(&self, n: u64) {
        self.dropped_nan.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_submitted(&self, n: u64) {
        self.submitted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_accepted(&self, n: u64) {
        self.accepted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_rejected(&self, n: u64) {
        self.rejected.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_failed(&self, n: u64) {
        self.failed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let exact = *self.exact.lock().unwrap();
        let approx = *self.approx.lock().unwrap();
        StatsSnapshot {
            cpu_scored: self.cpu_scored.load(Ordering::Relaxed),
            gpu_scored: self.gpu_scored.load(Ordering::Relaxed),
            verified: self.verified.load(Ordering::Relaxed),
            candidates: self.candidates.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            dropped_nan: self.dropped_nan.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            exact_mean: exact.mean(),
            exact_std_dev: exact.std_dev(),
            approx_mean: approx.mean(),
            approx_std_dev: approx.std_dev(),
        }
    }
}

/// Best exact result seen so far.
#[derive(Debug, Default)]
pub struct BestTracker {
    best: Mutex<Option<ScoreResult>>,
}

impl BestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `result` if it beats the current best. Returns true on a new
    /// best so the caller can emit an event.
    pub fn offer(&self, result: &ScoreResult) -> bool {
        if !result.total_score.is_finite() {
            return false;
        }
        let mut best = self.best.lock().unwrap();
        match best.as_ref() {
            Some(current) if current.total_score >= result.total_score => false,
            _ => {
                *best = Some(result.clone());
                true
            }
        }
    }

    pub fn current(&self) -> Option<ScoreResult> {
        self.best.lock().unwrap().clone()
    }
}

/// Best approximate (GPU) score seen so far.
#[derive(Debug, Default)]
pub struct ApproxBestTracker {
    best: Mutex<Option<(u64, f32)>>,
}

impl ApproxBestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&self, seed: u64, score: f32) -> bool {
        if !score.is_finite() {
            return false;
        }
        let mut best = self.best.lock().unwrap();
        match *best {
            Some((_, current)) if current >= score => false,
            _ => {
                *best = Some((seed, score));
                true
            }
        }
    }

    pub fn current(&self) -> Option<(u64, f32)> {
        *self.best.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(seed: u64, total: f64) -> ScoreResult {
        ScoreResult {
            seed,
            alpha_est: 3.0,
            alpha_score: total,
            peakiness: 0.0,
            peakiness_penalty: 0.0,
            flatness: 0.0,
            flatness_penalty: 0.0,
            neighbor_corr: 0.5,
            neighbor_corr_penalty: 0.0,
            total_score: total,
        }
    }

    #[test]
    fn test_batched_moments() {
        let stats = ExploreStats::new();
        // Scores 1, 2, 3 published as one batch.
        stats.record_exact_batch(3, 6.0, 14.0);
        let snap = stats.snapshot();
        assert_eq!(snap.cpu_scored, 3);
        assert!((snap.exact_mean - 2.0).abs() < 1e-12);
        let expected_std = (14.0 / 3.0 - 4.0f64).sqrt();
        assert!((snap.exact_std_dev - expected_std).abs() < 1e-12);
    }

    #[test]
    fn test_approx_moments_feed_sample_gate() {
        let stats = ExploreStats::new();
        stats.record_approx_batch(2, -4.0, 10.0);
        let (mean, std) = stats.approx_moments();
        assert_eq!(mean, -2.0);
        assert!((std - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_best_tracker_monotone() {
        let tracker = BestTracker::new();
        assert!(tracker.offer(&result(1, -5.0)));
        assert!(!tracker.offer(&result(2, -6.0)));
        assert!(tracker.offer(&result(3, -4.0)));
        assert_eq!(tracker.current().unwrap().seed, 3);
    }

    #[test]
    fn test_best_tracker_ignores_nan() {
        let tracker = BestTracker::new();
        assert!(!tracker.offer(&result(1, f64::NAN)));
        assert!(tracker.current().is_none());
    }

    #[test]
    fn test_approx_best_tracker() {
        let tracker = ApproxBestTracker::new();
        assert!(tracker.offer(5, -2.0));
        assert!(!tracker.offer(6, f32::NAN));
        assert!(tracker.offer(7, -1.0));
        assert_eq!(tracker.current(), Some((7, -1.0)));
    }
}
