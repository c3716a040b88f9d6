//! The seedhunt exploration pipeline
//!
//! Ties the scorers to the submission path: the allocator hands out disjoint
//! slices of the seed permutation, CPU workers score them exactly, the GPU
//! manager pumps batches through an approximate backend and triages results
//! against an adaptive admission gate, and the verifier re-scores survivors
//! exactly before they reach the submission manager.
//!
//! # Architecture
//!
//! 1. **Allocator** ([`allocator`]): resumable coprime-permutation claims
//! 2. **CPU workers** ([`worker`]): exact scoring over claimed slices
//! 3. **GPU manager** ([`gpu`]): pipelined batches, autotune, reinit
//! 4. **Controllers** ([`adaptive`]): quantile margin and mean score shift
//! 5. **Verifier** ([`verifier`]): bounded two-level queue, exact rescore
//! 6. **Guard and runner** ([`guard`], [`runner`]): memory limit, lifecycle,
//!    signals
//!
//! The runner owns every component; shared trackers travel as `Arc`s with
//! their own locks.

pub mod adaptive;
pub mod allocator;
pub mod gpu;
pub mod guard;
pub mod runner;
pub mod status;
pub mod verifier;
pub mod worker;

pub use adaptive::{AdaptiveMargin, AdaptiveScoreShift, MarginConfig, ShiftConfig};
pub use allocator::{Claim, SeedAllocator, SeedExploreState};
pub use gpu::{GpuConfig, GpuExplorer, TuningHint};
pub use guard::MemoryLimit;
pub use runner::{BackendMode, Runner, RunnerConfig};
pub use status::StatusReport;
pub use verifier::{PushOutcome, VerifierPool, VerifyPriority, VerifyQueue, VerifyRequest};
pub use worker::{CpuWorkerPool, WorkerConfig};
