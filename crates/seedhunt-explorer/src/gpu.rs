//! GPU exploration manager
//!
//! Single-threaded producer/consumer over an approximate batch scorer:
//! keeps `inflight` jobs outstanding, drains completions in FIFO order, and
//! triages every score against the adaptive admission gate.
//!
//! - Scores at or above `threshold - margin` become **candidates** (top 4
//!   per batch) for exact verification.
//! - Below the gate, a budgeted trickle of near-gate scores goes through as
//!   **samples** so the margin controller keeps seeing fresh
//!   `(approx, exact)` pairs even when no candidate fires.
//!
//! The autotuner hill-climbs the batch size against the measured
//! completion rate; the scorer is only rebuilt once its pending queue is
//! empty. An optional wall-clock reinit works around driver residency
//! growth on long runs.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use seedhunt_core::{persist, ApproxBestTracker, EventLog, ExploreStats, HuntError};
use seedhunt_net::SubmissionManager;
use seedhunt_scorer::{ApproxScorer, CompletedBatch, ScorerFactory};

use crate::adaptive::AdaptiveMargin;
use crate::allocator::SeedAllocator;
use crate::verifier::{PushOutcome, VerifyPriority, VerifyQueue, VerifyRequest};

/// Stop flag is checked at least once per this many drain polls.
const STOP_POLL_BATCHES: u32 = 128;

/// One-sided z-score for the sample gate: admits roughly the top 5% of the
/// approximate score distribution when the margin band is far away.
const SAMPLE_Z: f64 = 1.645;

#[derive(Debug, Clone)]
pub struct GpuConfig {
    pub batch: usize,
    pub inflight: usize,
    pub min_batch: usize,
    pub max_batch: usize,
    pub autotune: bool,
    pub tune_interval: Duration,
    pub reinit_interval: Option<Duration>,
    /// Candidates forwarded per batch.
    pub top_k: usize,
    /// Sample gate widening below the candidate gate.
    pub sample_slack: f64,
    /// Verification samples per second for margin calibration.
    pub samples_per_sec: u32,
    pub auto_margin_sampling: bool,
    pub tuning_hint_path: Option<PathBuf>,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            batch: 2048,
            inflight: 4,
            min_batch: 128,
            max_batch: 65_536,
            autotune: true,
            tune_interval: Duration::from_secs(1),
            reinit_interval: None,
            top_k: 4,
            sample_slack: 0.5,
            samples_per_sec: 8,
            auto_margin_sampling: true,
            tuning_hint_path: None,
        }
    }
}

/// Persisted per-device autotune result, used to seed the next run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningHint {
    pub device: String,
    pub batch: usize,
    pub inflight: usize,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

impl Direction {
    fn flip(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

/// Hill-climbing batch-size tuner. Step factors shrink with each direction
/// change; two changes at the deepest level settle the tuner.
#[derive(Debug)]
struct AutoTuner {
    level: usize,
    direction: Direction,
    last_rate: f64,
    reversals_at_deepest: u32,
    settled: bool,
}

const TUNE_FACTORS: [(f64, f64); 3] = [(1.2, 0.85), (1.1, 0.9), (1.05, 0.95)];

impl AutoTuner {
    fn new() -> Self {
        Self {
            level: 0,
            direction: Direction::Up,
            last_rate: 0.0,
            reversals_at_deepest: 0,
            settled: false,
        }
    }

    fn settled(&self) -> bool {
        self.settled
    }

    /// Feed one rate measurement; returns the next batch size to try, if
    /// any.
    fn tick(&mut self, current_batch: usize, rate: f64, min: usize, max: usize) -> Option<usize> {
        if self.settled {
            return None;
        }
        if self.last_rate > 0.0 && rate < 0.98 * self.last_rate {
            self.direction = self.direction.flip();
            if self.level + 1 < TUNE_FACTORS.len() {
                self.level += 1;
            } else {
                self.reversals_at_deepest += 1;
                if self.reversals_at_deepest >= 2 {
                    self.settled = true;
                    self.last_rate = rate;
                    return None;
                }
            }
        }
        self.last_rate = rate;
        let (up, down) = TUNE_FACTORS[self.level];
        let factor = match self.direction {
            Direction::Up => up,
            Direction::Down => down,
        };
        let next = align_batch((current_batch as f64 * factor) as usize).clamp(min, max);
        (next != current_batch).then_some(next)
    }
}

/// Snap to hardware-friendly alignment: multiples of 16, then 8, then 1.
fn align_batch(batch: usize) -> usize {
    if batch >= 16 {
        batch - batch % 16
    } else if batch >= 8 {
        8
    } else {
        batch.max(1)
    }
}

/// Shared handles the GPU manager drives.
pub struct GpuContext {
    pub allocator: Arc<SeedAllocator>,
    pub stats: Arc<ExploreStats>,
    pub approx_best: Arc<ApproxBestTracker>,
    pub events: Arc<EventLog>,
    pub margin: Arc<AdaptiveMargin>,
    pub submit: Option<Arc<SubmissionManager>>,
    pub verifier: Option<Arc<VerifyQueue>>,
    pub stop: Arc<AtomicBool>,
}

pub struct GpuExplorer {
    cfg: GpuConfig,
    factory: Box<dyn ScorerFactory>,
    scorer: Box<dyn ApproxScorer>,
    batch: usize,
    ctx: GpuContext,
    tuner: AutoTuner,
    completed_since_tick: u64,
    last_tick: Instant,
    pending_batch: Option<usize>,
    created_at: Instant,
    sample_window: Instant,
    samples_this_window: u32,
}

impl GpuExplorer {
    /// Build the initial scorer. A persisted tuning hint for the same device
    /// overrides the configured starting batch.
    pub fn new(
        factory: Box<dyn ScorerFactory>,
        cfg: GpuConfig,
        ctx: GpuContext,
    ) -> Result<Self, HuntError> {
        let mut batch = cfg.batch.clamp(cfg.min_batch, cfg.max_batch);
        if let Some(path) = &cfg.tuning_hint_path {
            match persist::load_json::<TuningHint>(path) {
                Ok(Some(hint)) if hint.device == factory.device_name() => {
                    log::info!(
                        "using tuned batch {} for device {}",
                        hint.batch,
                        hint.device
                    );
                    batch = hint.batch.clamp(cfg.min_batch, cfg.max_batch);
                }
                Ok(_) => {}
                Err(err) => log::warn!("ignoring unreadable tuning hint: {err:#}"),
            }
        }
        let scorer = factory
            .create(batch, cfg.inflight)
            .map_err(|e| HuntError::BackendInit(e.to_string()))?;
        ctx.events.info(format!(
            "approximate scorer ready on {} (batch {}, inflight {})",
            factory.device_name(),
            batch,
            cfg.inflight
        ));
        Ok(Self {
            cfg,
            factory,
            scorer,
            batch,
            ctx,
            tuner: AutoTuner::new(),
            completed_since_tick: 0,
            last_tick: Instant::now(),
            pending_batch: None,
            created_at: Instant::now(),
            sample_window: Instant::now(),
            samples_this_window: 0,
        })
    }

    pub fn current_batch(&self) -> usize {
        self.batch
    }

    /// Producer/consumer loop. Returns when the stop flag rises or a finite
    /// exploration target is exhausted; drains pending jobs before
    /// returning. Backend runtime errors stop the whole run but still
    /// return `Ok` after a clean drain.
    pub fn run(&mut self) -> Result<(), HuntError> {
        let mut polls: u32 = 0;
        let mut exhausted = false;
        'outer: loop {
            if self.ctx.stop.load(Ordering::Relaxed) {
                break;
            }
            // Keep the pipeline full.
            while self.pending_batch.is_none() && self.scorer.pending() < self.scorer.max_inflight()
            {
                let Some(claim) = self.ctx.allocator.claim(self.batch as u64) else {
                    exhausted = true;
                    break;
                };
                let seeds = self.ctx.allocator.seeds(&claim);
                match self.scorer.enqueue(&seeds) {
                    Ok(_) => {}
                    Err(seedhunt_scorer::ScorerError::Saturated { .. }) => break,
                    Err(err) => {
                        self.on_backend_error(&err);
                        break 'outer;
                    }
                }
            }
            // Drain one completion.
            match self.scorer.await_next() {
                Ok(Some(batch)) => {
                    self.completed_since_tick += batch.seeds.len() as u64;
                    self.process(batch);
                }
                Ok(None) => {
                    if exhausted {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(err) => {
                    self.on_backend_error(&err);
                    break;
                }
            }
            polls += 1;
            if polls % STOP_POLL_BATCHES == 0 && self.ctx.stop.load(Ordering::Relaxed) {
                break;
            }
            self.maybe_autotune();
            self.maybe_reinit();
            self.maybe_apply_pending_batch();
        }
        self.drain();
        Ok(())
    }

    fn drain(&mut self) {
        while let Ok(Some(batch)) = self.scorer.await_next() {
            self.process(batch);
        }
    }

    fn on_backend_error(&mut self, err: &seedhunt_scorer::ScorerError) {
        self.ctx
            .events
            .error(format!("approximate backend failed: {err}"));
        self.ctx.stop.store(true, Ordering::Relaxed);
    }

    fn process(&mut self, batch: CompletedBatch) {
        let threshold = self
            .ctx
            .submit
            .as_ref()
            .map(|s| s.threshold())
            .unwrap_or(f64::INFINITY);
        let margin = self.ctx.margin.current();
        let gate = threshold - margin;
        let (mu, sigma) = self.ctx.stats.approx_moments();
        let sample_gate = if gate.is_finite() {
            (mu + SAMPLE_Z * sigma).max(gate - self.cfg.sample_slack)
        } else {
            // No finite submission floor yet: sample the upper tail alone.
            mu + SAMPLE_Z * sigma
        };

        let mut count = 0u64;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut candidates: Vec<(u64, f32)> = Vec::new();
        for (&seed, &score) in batch.seeds.iter().zip(batch.scores.iter()) {
            if score.is_nan() {
                self.ctx.stats.add_dropped_nan(1);
                continue;
            }
            let value = score as f64;
            count += 1;
            sum += value;
            sum_sq += value * value;
            if self.ctx.approx_best.offer(seed, score) {
                self.ctx
                    .events
                    .best(format!("new approx best {score:.4} at seed {seed}"));
            }
            if self.ctx.submit.is_some() && value >= gate {
                candidates.push((seed, score));
            } else if self.cfg.auto_margin_sampling && value >= sample_gate {
                self.emit_sample(seed, score);
            }
        }
        self.ctx.stats.record_approx_batch(count, sum, sum_sq);

        if let Some(verifier) = &self.ctx.verifier {
            candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            candidates.truncate(self.cfg.top_k);
            for (seed, score) in candidates {
                let outcome = verifier.push(VerifyRequest {
                    seed,
                    approx: score,
                    priority: VerifyPriority::Candidate,
                });
                if matches!(outcome, PushOutcome::Queued | PushOutcome::EvictedSample) {
                    self.ctx.stats.add_candidates(1);
                }
            }
        }
    }

    fn emit_sample(&mut self, seed: u64, score: f32) {
        let Some(verifier) = &self.ctx.verifier else {
            return;
        };
        let now = Instant::now();
        if now.duration_since(self.sample_window) >= Duration::from_secs(1) {
            self.sample_window = now;
            self.samples_this_window = 0;
        }
        if self.samples_this_window >= self.cfg.samples_per_sec {
            return;
        }
        let outcome = verifier.push(VerifyRequest {
            seed,
            approx: score,
            priority: VerifyPriority::Sample,
        });
        if outcome == PushOutcome::Queued {
            self.samples_this_window += 1;
            self.ctx.stats.add_samples(1);
        }
    }

    fn maybe_autotune(&mut self) {
        if !self.cfg.autotune || self.tuner.settled() || self.pending_batch.is_some() {
            return;
        }
        let elapsed = self.last_tick.elapsed();
        if elapsed < self.cfg.tune_interval {
            return;
        }
        let rate = self.completed_since_tick as f64 / elapsed.as_secs_f64();
        self.completed_since_tick = 0;
        self.last_tick = Instant::now();
        if let Some(next) =
            self.tuner
                .tick(self.batch, rate, self.cfg.min_batch, self.cfg.max_batch)
        {
            log::debug!(
                "autotune: {:.0} seeds/s at batch {}, trying {}",
                rate,
                self.batch,
                next
            );
            self.pending_batch = Some(next);
        } else if self.tuner.settled() {
            self.ctx.events.info(format!(
                "autotune settled at batch {} ({:.0} seeds/s)",
                self.batch, rate
            ));
            self.persist_hint();
        }
    }

    /// Rebuilds wait for an empty pipeline; completions stay FIFO per
    /// scorer, so draining first keeps every enqueued seed accounted for.
    fn maybe_apply_pending_batch(&mut self) {
        let Some(next) = self.pending_batch else {
            return;
        };
        if self.scorer.pending() > 0 {
            return;
        }
        match self.factory.create(next, self.cfg.inflight) {
            Ok(scorer) => {
                self.scorer = scorer;
                self.batch = next;
                self.created_at = Instant::now();
            }
            Err(err) => {
                self.ctx
                    .events
                    .warning(format!("scorer rebuild at batch {next} failed: {err}"));
            }
        }
        self.pending_batch = None;
    }

    fn maybe_reinit(&mut self) {
        let Some(interval) = self.cfg.reinit_interval else {
            return;
        };
        if self.created_at.elapsed() < interval || self.scorer.pending() > 0 {
            return;
        }
        match self.factory.create(self.batch, self.cfg.inflight) {
            Ok(scorer) => {
                self.scorer = scorer;
                self.created_at = Instant::now();
                self.ctx.events.info("approximate scorer reinitialized");
            }
            Err(err) => {
                self.ctx
                    .events
                    .warning(format!("scorer reinit failed: {err}"));
                self.created_at = Instant::now();
            }
        }
    }

    fn persist_hint(&self) {
        let Some(path) = &self.cfg.tuning_hint_path else {
            return;
        };
        let hint = TuningHint {
            device: self.factory.device_name().to_string(),
            batch: self.batch,
            inflight: self.cfg.inflight,
            updated_at: persist::timestamp_now(),
        };
        if let Err(err) = persist::save_json(path, &hint) {
            log::warn!("could not persist tuning hint: {err:#}");
        }
    }
}
