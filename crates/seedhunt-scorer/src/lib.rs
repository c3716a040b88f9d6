//! Exact and approximate spectral scorers
//!
//! The exact scorer is the numeric contract of the whole pipeline: it maps a
//! seed to a [`seedhunt_core::ScoreResult`] through a fixed sequence of
//! floating-point operations and must return bit-identical totals for the
//! same seed on the same platform. Everything downstream (verification,
//! adaptive margins, the submission threshold) is defined relative to it.
//!
//! The approximate side is a trait contract over opaque batch scorers
//! (typically GPU backends). The in-tree [`CpuReferenceScorer`] implements it
//! with a reduced-resolution exact score, which keeps the full pipeline
//! exercisable on machines without a GPU and gives tests a deterministic
//! backend.

/// Image rendering, FFT, power spectrum, radial statistics
pub mod spectrum;

/// The exact CPU scorer
pub mod exact;

/// Approximate batch-scorer contract and CPU reference backend
pub mod approx;

pub use approx::{
    ApproxScorer, CompletedBatch, CpuReferenceFactory, CpuReferenceScorer, JobId, ScorerError,
    ScorerFactory,
};
pub use exact::{ExactScorer, DEFAULT_IMAGE_SIZE};
