//! CPU exploration worker pool
//!
//! `T` workers on a rayon pool, each in a tight claim-score-publish loop.
//! Stats go to the shared tracker in batches (512 results or one second,
//! whichever comes first): at aggregate multi-MHz rates, per-sample lock
//! traffic on the stats mutex would dominate the scoring itself.
//!
//! In stateless mode workers skip the allocator and stride the raw seed
//! space directly: worker `i` scores `base + i, base + i + T, ...`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use seedhunt_core::{space::SeedSpace, BestTracker, EventLog, ExploreStats};
use seedhunt_net::{SubmissionManager, SubmissionSource};
use seedhunt_scorer::ExactScorer;

use crate::allocator::SeedAllocator;

/// Stop flag is polled at least this often, in scored seeds.
const STOP_POLL_ITERATIONS: u64 = 1024;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub threads: usize,
    /// Indices claimed per allocator round trip.
    pub claim_size: u64,
    /// Stats are published after this many results...
    pub stats_batch: u64,
    /// ...or after this long, whichever comes first.
    pub stats_flush_interval: Duration,
    /// Explore by striding from this base seed instead of the allocator.
    pub stateless_base: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            claim_size: 512,
            stats_batch: 512,
            stats_flush_interval: Duration::from_secs(1),
            stateless_base: None,
        }
    }
}

/// Shared handles one worker loop needs.
pub struct WorkerContext {
    pub allocator: Arc<SeedAllocator>,
    pub best: Arc<BestTracker>,
    pub stats: Arc<ExploreStats>,
    pub events: Arc<EventLog>,
    pub submit: Option<Arc<SubmissionManager>>,
    pub stop: Arc<AtomicBool>,
}

/// Accumulates score moments until the publish threshold.
struct StatsBatch {
    count: u64,
    sum: f64,
    sum_sq: f64,
    last_flush: Instant,
}

impl StatsBatch {
    fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            last_flush: Instant::now(),
        }
    }

    fn add(&mut self, score: f64) {
        self.count += 1;
        self.sum += score;
        self.sum_sq += score * score;
    }

    fn due(&self, batch: u64, interval: Duration) -> bool {
        self.count >= batch || (self.count > 0 && self.last_flush.elapsed() >= interval)
    }

    fn flush(&mut self, stats: &ExploreStats) {
        if self.count > 0 {
            stats.record_exact_batch(self.count, self.sum, self.sum_sq);
            self.count = 0;
            self.sum = 0.0;
            self.sum_sq = 0.0;
        }
        self.last_flush = Instant::now();
    }
}

/// Runs the worker pool to completion (stop flag, or allocator exhaustion).
pub struct CpuWorkerPool {
    cfg: WorkerConfig,
}

impl CpuWorkerPool {
    pub fn new(cfg: WorkerConfig) -> Self {
        Self { cfg }
    }

    /// Blocks until every worker has exited.
    pub fn run(&self, context: &WorkerContext) -> anyhow::Result<()> {
        let threads = self.cfg.threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("explore-{i}"))
            .build()?;
        context
            .events
            .info(format!("cpu exploration started on {threads} workers"));
        pool.broadcast(|ctx| {
            worker_loop(&self.cfg, context, ctx.index(), threads);
        });
        context.events.info("cpu exploration stopped");
        Ok(())
    }
}

fn worker_loop(cfg: &WorkerConfig, ctx: &WorkerContext, index: usize, threads: usize) {
    let scorer = ExactScorer::new();
    let mut batch = StatsBatch::new();
    let mut iterations = 0u64;
    let mut stride_chunk = 0u64;
    let space = ctx.allocator.space();

    'outer: loop {
        if ctx.stop.load(Ordering::Relaxed) {
            break;
        }
        let seeds = match cfg.stateless_base {
            Some(base) => {
                let seeds = stride_seeds(
                    space,
                    base,
                    index as u64,
                    threads as u64,
                    stride_chunk,
                    cfg.claim_size,
                );
                stride_chunk += 1;
                seeds
            }
            None => match ctx.allocator.claim(cfg.claim_size) {
                Some(claim) => ctx.allocator.seeds(&claim),
                None => break,
            },
        };
        for seed in seeds {
            iterations += 1;
            if iterations % STOP_POLL_ITERATIONS == 0 && ctx.stop.load(Ordering::Relaxed) {
                break 'outer;
            }
            let result = scorer.score(seed);
            batch.add(result.total_score);
            if ctx.best.offer(&result) {
                ctx.events.best(format!(
                    "new best {:.4} at seed {}",
                    result.total_score, result.seed
                ));
            }
            if let Some(submit) = &ctx.submit {
                submit.maybe_enqueue(seed, result.total_score, SubmissionSource::Cpu);
            }
            if batch.due(cfg.stats_batch, cfg.stats_flush_interval) {
                batch.flush(&ctx.stats);
            }
        }
    }
    batch.flush(&ctx.stats);
}

/// Chunk `chunk` of worker `index`'s stride: the worker owns the residue
/// class `base + index (mod threads)` and walks it `count` seeds at a time.
fn stride_seeds(
    space: SeedSpace,
    base: u64,
    index: u64,
    threads: u64,
    chunk: u64,
    count: u64,
) -> Vec<u64> {
    let first = chunk.wrapping_mul(count);
    (first..first.wrapping_add(count))
        .map(|k| space.normalize(base.wrapping_add(index).wrapping_add(k.wrapping_mul(threads))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::SeedAllocator;

    fn context(target: u64) -> WorkerContext {
        let space = SeedSpace::new(0, 4096);
        WorkerContext {
            allocator: Arc::new(SeedAllocator::with_permutation(space, 7, 5, Some(target))),
            best: Arc::new(BestTracker::new()),
            stats: Arc::new(ExploreStats::new()),
            events: Arc::new(EventLog::default()),
            submit: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    fn small_config(threads: usize) -> WorkerConfig {
        WorkerConfig {
            threads,
            claim_size: 32,
            stats_batch: 64,
            stats_flush_interval: Duration::from_millis(100),
            stateless_base: None,
        }
    }

    #[test]
    fn test_pool_scores_entire_target() {
        let ctx = context(256);
        let pool = CpuWorkerPool::new(small_config(4));
        pool.run(&ctx).unwrap();
        let snap = ctx.stats.snapshot();
        assert_eq!(snap.cpu_scored, 256);
        assert!(ctx.best.current().is_some());
        assert!(snap.exact_mean < 0.0);
    }

    #[test]
    fn test_stop_flag_halts_promptly() {
        let ctx = context(u64::MAX);
        ctx.stop.store(true, Ordering::Relaxed);
        let pool = CpuWorkerPool::new(small_config(2));
        // Stop was set before start: workers exit on their first poll.
        pool.run(&ctx).unwrap();
        let snap = ctx.stats.snapshot();
        assert!(snap.cpu_scored <= 2 * STOP_POLL_ITERATIONS);
    }

    #[test]
    fn test_stride_seeds_partition_residue_classes() {
        let space = SeedSpace::new(0, 1 << 32);
        let worker0 = stride_seeds(space, 100, 0, 4, 0, 8);
        let worker1 = stride_seeds(space, 100, 1, 4, 0, 8);
        assert_eq!(worker0[..3], [100, 104, 108]);
        assert_eq!(worker1[..3], [101, 105, 109]);
        // Next chunk continues where the previous left off.
        let chunk1 = stride_seeds(space, 100, 0, 4, 1, 8);
        assert_eq!(chunk1[0], 100 + 8 * 4);
    }

    #[test]
    fn test_batched_stats_flush_on_exit() {
        // Fewer results than the batch size: the final flush must publish
        // the remainder.
        let ctx = context(10);
        let pool = CpuWorkerPool::new(WorkerConfig {
            threads: 1,
            claim_size: 4,
            stats_batch: 1_000_000,
            stats_flush_interval: Duration::from_secs(3600),
            stateless_base: None,
        });
        pool.run(&ctx).unwrap();
        assert_eq!(ctx.stats.snapshot().cpu_scored, 10);
    }
}
