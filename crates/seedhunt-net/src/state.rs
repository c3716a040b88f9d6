//! Submission eligibility bookkeeping
//!
//! A seed is worth submitting only while it beats the leaderboard's current
//! floor and has not been seen before. `known_seeds` mirrors the remote top
//! list and is rebuilt on every refresh; `attempted_seeds` guards against
//! re-submitting between refreshes and is bounded, because the refresh
//! eventually absorbs old attempts into `known_seeds`. Attempts are volatile
//! per process; only known seeds are authoritative across restarts.

use std::collections::{HashSet, VecDeque};

use crate::api::TopEntry;

/// Capacity of the attempted-seed set before FIFO eviction.
pub const ATTEMPTED_CAP: usize = 4096;

/// Insertion-ordered set with FIFO eviction at capacity.
#[derive(Debug)]
pub struct BoundedSeedSet {
    set: HashSet<u64>,
    order: VecDeque<u64>,
    cap: usize,
}

impl BoundedSeedSet {
    pub fn new(cap: usize) -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    /// Insert, evicting the oldest member at capacity. Returns false if the
    /// seed was already present.
    pub fn insert(&mut self, seed: u64) -> bool {
        if !self.set.insert(seed) {
            return false;
        }
        self.order.push_back(seed);
        if self.order.len() > self.cap {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
        true
    }

    pub fn contains(&self, seed: u64) -> bool {
        self.set.contains(&seed)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

/// Current view of what the leaderboard holds and what this process has
/// already tried.
#[derive(Debug)]
pub struct SubmissionState {
    known_seeds: HashSet<u64>,
    attempted: BoundedSeedSet,
    top_scores: Vec<f64>,
    top500_threshold: f64,
}

impl SubmissionState {
    pub fn new() -> Self {
        Self {
            known_seeds: HashSet::new(),
            attempted: BoundedSeedSet::new(ATTEMPTED_CAP),
            top_scores: Vec::new(),
            top500_threshold: f64::NAN,
        }
    }

    /// The submission floor: `max(user_min_score, top500_threshold)` once
    /// the remote floor is known, +inf before the first refresh.
    pub fn threshold(&self, user_min_score: f64) -> f64 {
        if self.top500_threshold.is_finite() {
            user_min_score.max(self.top500_threshold)
        } else {
            f64::INFINITY
        }
    }

    pub fn top500_threshold(&self) -> f64 {
        self.top500_threshold
    }

    pub fn is_known(&self, seed: u64) -> bool {
        self.known_seeds.contains(&seed)
    }

    pub fn mark_known(&mut self, seed: u64) {
        self.known_seeds.insert(seed);
    }

    /// Check eligibility and record the attempt in one step. Eligible means:
    /// the remote floor is known, `score` beats the submission floor, and
    /// the seed is in neither `known` nor `attempted`.
    pub fn mark_attempt_if_eligible(&mut self, seed: u64, score: f64, user_min_score: f64) -> bool {
        if !self.top500_threshold.is_finite() {
            return false;
        }
        if !(score > self.threshold(user_min_score)) {
            return false;
        }
        if self.known_seeds.contains(&seed) {
            return false;
        }
        self.attempted.insert(seed)
    }

    /// Apply a fresh top list: scores sorted descending, threshold set to
    /// the lowest, `known_seeds` cleared and rebuilt. Returns the best entry.
    pub fn apply_top(&mut self, entries: &[TopEntry]) -> Option<TopEntry> {
        let mut scores: Vec<f64> = entries.iter().map(|e| e.score).collect();
        scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        self.top500_threshold = scores.last().copied().unwrap_or(f64::NAN);
        self.top_scores = scores;
        self.known_seeds.clear();
        self.known_seeds.extend(entries.iter().map(|e| e.seed));
        entries
            .iter()
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
            .cloned()
    }

    pub fn top_scores(&self) -> &[f64] {
        &self.top_scores
    }

    pub fn known_len(&self) -> usize {
        self.known_seeds.len()
    }

    pub fn attempted_len(&self) -> usize {
        self.attempted.len()
    }
}

impl Default for SubmissionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seed: u64, score: f64) -> TopEntry {
        TopEntry {
            seed,
            score,
            rank: None,
            discoverer_id: None,
        }
    }

    #[test]
    fn test_bounded_set_fifo_eviction() {
        let mut set = BoundedSeedSet::new(3);
        assert!(set.insert(1));
        assert!(set.insert(2));
        assert!(set.insert(3));
        assert!(!set.insert(2));
        assert!(set.insert(4));
        // 1 was oldest, evicted
        assert!(!set.contains(1));
        assert!(set.contains(2));
        assert!(set.contains(4));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_threshold_infinite_before_refresh() {
        let state = SubmissionState::new();
        assert_eq!(state.threshold(-2.0), f64::INFINITY);
    }

    #[test]
    fn test_eligibility_requires_finite_floor() {
        let mut state = SubmissionState::new();
        assert!(!state.mark_attempt_if_eligible(42, 100.0, -2.0));
        state.apply_top(&[entry(1, 0.0)]);
        assert!(state.mark_attempt_if_eligible(42, 0.5, -2.0));
    }

    #[test]
    fn test_eligibility_blocks_known_and_attempted() {
        let mut state = SubmissionState::new();
        state.apply_top(&[entry(1, 0.0)]);
        // known seed
        assert!(!state.mark_attempt_if_eligible(1, 5.0, -2.0));
        // first attempt passes, repeat does not
        assert!(state.mark_attempt_if_eligible(42, 0.5, -2.0));
        assert!(!state.mark_attempt_if_eligible(42, 0.5, -2.0));
    }

    #[test]
    fn test_threshold_is_max_of_floors() {
        let mut state = SubmissionState::new();
        state.apply_top(&[entry(1, 3.0), entry(2, 1.0)]);
        assert_eq!(state.threshold(-2.0), 1.0);
        assert_eq!(state.threshold(2.0), 2.0);
        assert!(!state.mark_attempt_if_eligible(42, 0.9, -2.0));
        assert!(state.mark_attempt_if_eligible(42, 1.1, -2.0));
    }

    #[test]
    fn test_apply_top_rebuilds_known() {
        let mut state = SubmissionState::new();
        state.apply_top(&[entry(1, 3.0), entry(2, 1.0)]);
        assert!(state.is_known(1));
        let best = state.apply_top(&[entry(3, 5.0), entry(4, 2.0)]).unwrap();
        assert_eq!(best.seed, 3);
        assert!(!state.is_known(1));
        assert!(state.is_known(4));
        assert_eq!(state.top_scores(), &[5.0, 2.0]);
        assert_eq!(state.top500_threshold(), 2.0);
    }
}
