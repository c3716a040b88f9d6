//! Resumable seed-space allocator
//!
//! A full-period permutation of the seed space: at first run we draw a random
//! `start_offset` and a `step` coprime to `|S|`; the k-th seed is
//! `MIN + (start_offset + k * step) mod |S|`. Any prefix of the enumeration
//! is a uniform-looking sample, workers get collision-free slices, and
//! resumption is a single persisted integer.
//!
//! Claims advance `next_index` atomically, so no two live claims overlap. A
//! snapshot timer persists `{start_offset, step, next_index}`; a crash
//! replays at most one snapshot interval, which only re-scores seeds.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use rand::Rng;
use serde::{Deserialize, Serialize};

use seedhunt_core::{persist, space::SeedSpace};

/// Persisted permutation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedExploreState {
    pub start_offset: u64,
    pub step: u64,
    pub next_index: u64,
    pub updated_at: String,
}

/// A contiguous slice of the permutation index range, exclusively owned by
/// one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub offset: u64,
    pub count: u64,
}

#[derive(Debug)]
struct PermState {
    start_offset: u64,
    step: u64,
    next_index: u64,
}

/// Hands out disjoint index slices of the permutation and persists progress.
#[derive(Debug)]
pub struct SeedAllocator {
    space: SeedSpace,
    inner: Mutex<PermState>,
    path: Option<PathBuf>,
    /// Total indices to enumerate; `None` runs until stopped.
    target: Option<u64>,
    dirty: AtomicBool,
}

impl SeedAllocator {
    /// Load persisted state from `path` when present and valid, otherwise
    /// start a fresh permutation. An invalid step resets the permutation
    /// entirely; carrying `next_index` across a different step would
    /// enumerate a different sequence.
    pub fn resume_or_create(
        space: SeedSpace,
        path: Option<PathBuf>,
        target: Option<u64>,
    ) -> Self {
        let state = match path.as_deref().map(persist::load_json::<SeedExploreState>) {
            Some(Ok(Some(loaded))) => {
                if space.is_valid_step(loaded.step % space.size()) {
                    log::info!(
                        "resuming seed permutation at index {} (step {})",
                        loaded.next_index,
                        loaded.step
                    );
                    PermState {
                        start_offset: loaded.start_offset % space.size(),
                        step: loaded.step % space.size(),
                        next_index: loaded.next_index,
                    }
                } else {
                    log::warn!(
                        "persisted step {} is not coprime to the space, starting fresh",
                        loaded.step
                    );
                    Self::fresh(space)
                }
            }
            Some(Err(err)) => {
                log::warn!("seed state unreadable ({err:#}), starting fresh");
                Self::fresh(space)
            }
            _ => Self::fresh(space),
        };
        Self {
            space,
            inner: Mutex::new(state),
            path,
            target,
            dirty: AtomicBool::new(true),
        }
    }

    /// Exact permutation, primarily a test hook.
    pub fn with_permutation(
        space: SeedSpace,
        start_offset: u64,
        step: u64,
        target: Option<u64>,
    ) -> Self {
        assert!(space.is_valid_step(step), "step must be coprime to |S|");
        Self {
            space,
            inner: Mutex::new(PermState {
                start_offset: start_offset % space.size(),
                step,
                next_index: 0,
            }),
            path: None,
            target,
            dirty: AtomicBool::new(true),
        }
    }

    fn fresh(space: SeedSpace) -> PermState {
        let mut rng = rand::thread_rng();
        let start_offset = rng.gen_range(0..space.size());
        // Rejection-sample a coprime step; |S| has few small factors, so
        // this terminates almost immediately.
        let step = loop {
            let candidate = rng.gen_range(1..space.size());
            if space.is_valid_step(candidate) {
                break candidate;
            }
        };
        PermState {
            start_offset,
            step,
            next_index: 0,
        }
    }

    pub fn space(&self) -> SeedSpace {
        self.space
    }

    /// Atomically claim up to `max_count` permutation indices. `None` once a
    /// finite target is exhausted.
    pub fn claim(&self, max_count: u64) -> Option<Claim> {
        let mut inner = self.inner.lock().unwrap();
        let remaining = match self.target {
            Some(target) => target.saturating_sub(inner.next_index),
            None => u64::MAX,
        };
        if remaining == 0 || max_count == 0 {
            return None;
        }
        let count = max_count.min(remaining);
        let claim = Claim {
            offset: inner.next_index,
            count,
        };
        inner.next_index = inner.next_index.wrapping_add(count);
        self.dirty.store(true, Ordering::Relaxed);
        Some(claim)
    }

    /// The seed at permutation index `index`.
    pub fn seed_at(&self, index: u64) -> u64 {
        let inner = self.inner.lock().unwrap();
        self.space.seed_at(inner.start_offset, inner.step, index)
    }

    /// All seeds of a claim, in index order.
    pub fn seeds(&self, claim: &Claim) -> Vec<u64> {
        let inner = self.inner.lock().unwrap();
        (claim.offset..claim.offset.wrapping_add(claim.count))
            .map(|k| self.space.seed_at(inner.start_offset, inner.step, k))
            .collect()
    }

    pub fn state(&self) -> SeedExploreState {
        let inner = self.inner.lock().unwrap();
        SeedExploreState {
            start_offset: inner.start_offset,
            step: inner.step,
            next_index: inner.next_index,
            updated_at: persist::timestamp_now(),
        }
    }

    pub fn next_index(&self) -> u64 {
        self.inner.lock().unwrap().next_index
    }

    /// Persist the current state if it changed since the last snapshot. On
    /// error the state stays dirty and the next tick retries.
    pub fn snapshot(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty.load(Ordering::Relaxed) {
            return Ok(());
        }
        let state = self.state();
        persist::save_json(path, &state)?;
        self.dirty.store(false, Ordering::Relaxed);
        Ok(())
    }
}
