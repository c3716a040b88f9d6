//! Core types and shared infrastructure for seedhunt
//!
//! seedhunt searches an enormous 64-bit seed space for seeds whose
//! deterministically-rendered grayscale image scores highly under a fixed
//! spectral-quality objective. This crate provides the foundations every
//! other crate in the workspace builds on:
//!
//! - The seed space and its modular arithmetic ([`space`])
//! - The deterministic per-pixel generator ([`prng`])
//! - The exact score record ([`score`])
//! - Thread-safe counters, running statistics and best-so-far trackers
//!   ([`stats`])
//! - The bounded, typed event log ([`events`])
//! - Atomic JSON persistence for resumable state ([`persist`])
//! - The error taxonomy separating fatal from recoverable failures
//!   ([`error`])
//!
//! # Design
//!
//! Every shared structure here carries its own synchronization and is handed
//! out as an `Arc` by the runner. Components never reach through a global
//! registry; the runner owns the instances for the lifetime of the run.

/// Seed space boundaries and permutation arithmetic
pub mod space;

/// Deterministic counter-based pixel generator
pub mod prng;

/// Exact score record and scoring constants
pub mod score;

/// Shared counters, running statistics, best-so-far trackers
pub mod stats;

/// Bounded typed event log
pub mod events;

/// Atomic JSON state files
pub mod persist;

/// Error taxonomy
pub mod error;

pub use error::HuntError;
pub use events::{Event, EventKind, EventLog};
pub use prng::PixelRng;
pub use score::ScoreResult;
pub use space::SeedSpace;
pub use stats::{ApproxBestTracker, BestTracker, ExploreStats, StatsSnapshot};
