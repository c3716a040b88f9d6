//! Approximate batch-scorer contract
//!
//! The exploration manager consumes GPU backends through this trait and
//! never sees backend-specific types. The contract:
//!
//! - `enqueue` submits up to `batch_size` seeds without blocking; the
//!   backend zero-pads its fixed-size batch internally. Once `max_inflight`
//!   jobs are buffered, `enqueue` refuses with [`ScorerError::Saturated`].
//! - `await_next` yields completions strictly in submission order, each with
//!   the original seeds and one `f32` score per seed. NaN scores mean "drop
//!   this sample".
//! - A backend may be destroyed and recreated through its
//!   [`ScorerFactory`] with a new `(batch_size, inflight)` pair, but only
//!   when it has no pending jobs.
//!
//! [`CpuReferenceScorer`] implements the contract with a reduced-resolution
//! exact score. It is the fallback backend when no GPU is available and the
//! deterministic backend the pipeline tests run against.

use std::collections::VecDeque;

use thiserror::Error;

use crate::exact::ExactScorer;

pub type JobId = u64;

/// Image size the CPU reference backend scores at. Small enough to keep the
/// fallback usable, close enough that the adaptive margin stays tight.
pub const REFERENCE_IMAGE_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum ScorerError {
    /// `max_inflight` jobs are already buffered; drain before enqueueing.
    #[error("scorer saturated with {pending} inflight jobs")]
    Saturated { pending: usize },

    #[error("batch of {len} seeds exceeds batch size {batch_size}")]
    Oversized { len: usize, batch_size: usize },

    /// The backend itself failed; the manager treats this as a runtime
    /// backend error (stop, drain, exit cleanly).
    #[error("backend failure: {0}")]
    Backend(String),
}

/// One completed job, seeds and scores in one-to-one correspondence.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedBatch {
    pub job: JobId,
    pub seeds: Vec<u64>,
    pub scores: Vec<f32>,
}

/// An opaque batched approximate scorer.
pub trait ApproxScorer: Send {
    fn batch_size(&self) -> usize;

    fn max_inflight(&self) -> usize;

    /// Jobs submitted but not yet drained.
    fn pending(&self) -> usize;

    /// Submit a batch. Non-blocking; fails with `Saturated` at the inflight
    /// cap and `Oversized` past the batch size.
    fn enqueue(&mut self, seeds: &[u64]) -> Result<JobId, ScorerError>;

    /// The oldest outstanding completion, or `None` when nothing is pending.
    fn await_next(&mut self) -> Result<Option<CompletedBatch>, ScorerError>;
}

/// Builds scorers for one device, so the manager can rebuild with retuned
/// `(batch_size, inflight)` once pending jobs have drained.
pub trait ScorerFactory: Send {
    fn device_name(&self) -> &str;

    fn create(&self, batch_size: usize, inflight: usize)
        -> Result<Box<dyn ApproxScorer>, ScorerError>;
}

/// CPU fallback backend: reduced-resolution exact scoring behind the batch
/// contract.
pub struct CpuReferenceScorer {
    batch_size: usize,
    max_inflight: usize,
    scorer: ExactScorer,
    queue: VecDeque<(JobId, Vec<u64>)>,
    next_job: JobId,
}

impl CpuReferenceScorer {
    pub fn new(batch_size: usize, max_inflight: usize) -> Self {
        Self::with_image_size(batch_size, max_inflight, REFERENCE_IMAGE_SIZE)
    }

    pub fn with_image_size(batch_size: usize, max_inflight: usize, image_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_inflight: max_inflight.max(1),
            scorer: ExactScorer::with_size(image_size),
            queue: VecDeque::new(),
            next_job: 0,
        }
    }
}

impl ApproxScorer for CpuReferenceScorer {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn max_inflight(&self) -> usize {
        self.max_inflight
    }

    fn pending(&self) -> usize {
        self.queue.len()
    }

    fn enqueue(&mut self, seeds: &[u64]) -> Result<JobId, ScorerError> {
        if seeds.len() > self.batch_size {
            return Err(ScorerError::Oversized {
                len: seeds.len(),
                batch_size: self.batch_size,
            });
        }
        if self.queue.len() >= self.max_inflight {
            return Err(ScorerError::Saturated {
                pending: self.queue.len(),
            });
        }
        let job = self.next_job;
        self.next_job += 1;
        self.queue.push_back((job, seeds.to_vec()));
        Ok(job)
    }

    fn await_next(&mut self) -> Result<Option<CompletedBatch>, ScorerError> {
        let Some((job, seeds)) = self.queue.pop_front() else {
            return Ok(None);
        };
        let scores = seeds
            .iter()
            .map(|&seed| self.scorer.score(seed).total_score as f32)
            .collect();
        Ok(Some(CompletedBatch { job, seeds, scores }))
    }
}

/// Factory for the CPU reference backend.
pub struct CpuReferenceFactory {
    image_size: usize,
}

impl CpuReferenceFactory {
    pub fn new() -> Self {
        Self {
            image_size: REFERENCE_IMAGE_SIZE,
        }
    }

    pub fn with_image_size(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl Default for CpuReferenceFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ScorerFactory for CpuReferenceFactory {
    fn device_name(&self) -> &str {
        "cpu-reference"
    }

    fn create(
        &self,
        batch_size: usize,
        inflight: usize,
    ) -> Result<Box<dyn ApproxScorer>, ScorerError> {
        Ok(Box::new(CpuReferenceScorer::with_image_size(
            batch_size,
            inflight,
            self.image_size,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exact::ExactScorer;

    #[test]
    fn test_fifo_completion_order() {
        let mut scorer = CpuReferenceScorer::new(4, 3);
        let a = scorer.enqueue(&[1, 2]).unwrap();
        let b = scorer.enqueue(&[3]).unwrap();
        let first = scorer.await_next().unwrap().unwrap();
        let second = scorer.await_next().unwrap().unwrap();
        assert_eq!(first.job, a);
        assert_eq!(first.seeds, vec![1, 2]);
        assert_eq!(second.job, b);
        assert!(scorer.await_next().unwrap().is_none());
    }

    #[test]
    fn test_scores_match_seed_order() {
        let mut scorer = CpuReferenceScorer::new(4, 1);
        scorer.enqueue(&[42, 99]).unwrap();
        let batch = scorer.await_next().unwrap().unwrap();
        let exact = ExactScorer::with_size(REFERENCE_IMAGE_SIZE);
        assert_eq!(batch.scores.len(), 2);
        assert_eq!(batch.scores[0], exact.score(42).total_score as f32);
        assert_eq!(batch.scores[1], exact.score(99).total_score as f32);
    }

    #[test]
    fn test_saturation_backpressure() {
        let mut scorer = CpuReferenceScorer::new(2, 2);
        scorer.enqueue(&[1]).unwrap();
        scorer.enqueue(&[2]).unwrap();
        assert!(matches!(
            scorer.enqueue(&[3]),
            Err(ScorerError::Saturated { pending: 2 })
        ));
        scorer.await_next().unwrap();
        scorer.enqueue(&[3]).unwrap();
    }

    #[test]
    fn test_oversized_batch_rejected() {
        let mut scorer = CpuReferenceScorer::new(2, 2);
        assert!(matches!(
            scorer.enqueue(&[1, 2, 3]),
            Err(ScorerError::Oversized { len: 3, .. })
        ));
    }

    #[test]
    fn test_approximation_tracks_exact_score() {
        // The reduced-resolution score stays within a small band of the
        // full-resolution score; the adaptive margin closes the rest.
        let exact = ExactScorer::new();
        let mut scorer = CpuReferenceScorer::new(4, 1);
        scorer.enqueue(&[1, 42, 0xDEAD_BEEF_CAFE_BABE]).unwrap();
        let batch = scorer.await_next().unwrap().unwrap();
        for (&seed, &approx) in batch.seeds.iter().zip(batch.scores.iter()) {
            let truth = exact.score(seed).total_score;
            assert!((approx as f64 - truth).abs() < 1.0, "seed {seed:#x}");
        }
    }

    #[test]
    fn test_factory_rebuild_changes_geometry() {
        let factory = CpuReferenceFactory::new();
        let scorer = factory.create(256, 4).unwrap();
        assert_eq!(scorer.batch_size(), 256);
        assert_eq!(scorer.max_inflight(), 4);
        let retuned = factory.create(384, 4).unwrap();
        assert_eq!(retuned.batch_size(), 384);
    }
}
