//! Runner: ownership, lifecycle and signal wiring
//!
//! The runner owns every component for the lifetime of the run and hands
//! shared trackers out as `Arc`s. Teardown is cooperative: SIGINT/SIGTERM
//! (or the memory guard, or a backend failure) raise one shared stop flag,
//! every loop observes it within its bounded poll interval, the verifier
//! closes and drains, the submission manager flushes its journal, and the
//! allocator takes a final snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use seedhunt_core::{
    space::SeedSpace, ApproxBestTracker, BestTracker, EventLog, ExploreStats, HuntError,
};
use seedhunt_net::{ScoreApi, SubmissionConfig, SubmissionManager};
use seedhunt_scorer::ScorerFactory;

use crate::adaptive::{AdaptiveMargin, AdaptiveScoreShift, MarginConfig, ShiftConfig};
use crate::allocator::SeedAllocator;
use crate::gpu::{GpuConfig, GpuContext, GpuExplorer};
use crate::guard::{self, MemoryLimit};
use crate::status::StatusReport;
use crate::verifier::{VerifierContext, VerifierPool, VerifyQueue};
use crate::worker::{CpuWorkerPool, WorkerConfig, WorkerContext};

const STOP_POLL: Duration = Duration::from_millis(250);

/// Which scoring backends the run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    /// Exact CPU workers only.
    CpuOnly,
    /// Approximate pipeline if a backend is available, CPU otherwise.
    ApproxPreferred,
    /// Approximate pipeline or fail.
    ApproxRequired,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub space: SeedSpace,
    pub backend: BackendMode,
    pub worker: WorkerConfig,
    pub gpu: GpuConfig,
    pub margin: MarginConfig,
    pub shift: ShiftConfig,
    pub verifier_capacity: usize,
    pub verifier_threads: usize,
    /// Total permutation indices to explore; `None` runs until stopped.
    pub target: Option<u64>,
    pub seed_state_path: Option<std::path::PathBuf>,
    pub snapshot_interval: Duration,
    pub status_interval: Duration,
    pub memory_limit: Option<MemoryLimit>,
    pub memory_guard_interval: Duration,
    /// Replace the default SIGINT/SIGTERM handlers. Disable in tests; the
    /// process-global handler can only be installed once.
    pub install_signal_handler: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            space: SeedSpace::v2(),
            backend: BackendMode::CpuOnly,
            worker: WorkerConfig::default(),
            gpu: GpuConfig::default(),
            margin: MarginConfig::default(),
            shift: ShiftConfig::default(),
            verifier_capacity: crate::verifier::DEFAULT_CAPACITY,
            verifier_threads: 1,
            target: None,
            seed_state_path: None,
            snapshot_interval: Duration::from_secs(30),
            status_interval: Duration::from_secs(10),
            memory_limit: None,
            memory_guard_interval: Duration::from_secs(5),
            install_signal_handler: true,
        }
    }
}

pub struct Runner {
    cfg: RunnerConfig,
    api: Option<Arc<dyn ScoreApi>>,
    submission: Option<SubmissionConfig>,
    gpu_factory: Option<Box<dyn ScorerFactory>>,
    stop: Arc<AtomicBool>,
}

impl Runner {
    pub fn new(cfg: RunnerConfig) -> Self {
        Self {
            cfg,
            api: None,
            submission: None,
            gpu_factory: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enable the submission pipeline.
    pub fn with_submission(mut self, api: Arc<dyn ScoreApi>, cfg: SubmissionConfig) -> Self {
        self.api = Some(api);
        self.submission = Some(cfg);
        self
    }

    /// Provide the approximate-scorer backend.
    pub fn with_scorer_factory(mut self, factory: Box<dyn ScorerFactory>) -> Self {
        self.gpu_factory = Some(factory);
        self
    }

    /// The shared stop flag, for embedding and tests.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run to completion. Blocks until the stop flag rises or a finite
    /// target is exhausted. Only fatal initialization errors return `Err`.
    pub fn run(self) -> Result<(), HuntError> {
        let Runner {
            cfg,
            api,
            submission,
            gpu_factory,
            stop,
        } = self;

        if cfg.worker.threads == 0 && cfg.backend == BackendMode::CpuOnly {
            return Err(HuntError::Usage(
                "no workers configured: zero threads with a cpu-only backend".into(),
            ));
        }

        let events = Arc::new(EventLog::default());
        let stats = Arc::new(ExploreStats::new());
        let best = Arc::new(BestTracker::new());
        let approx_best = Arc::new(ApproxBestTracker::new());
        let margin = Arc::new(AdaptiveMargin::new(cfg.margin.clone()));
        let shift = Arc::new(AdaptiveScoreShift::new(cfg.shift.clone()));
        let allocator = Arc::new(SeedAllocator::resume_or_create(
            cfg.space,
            cfg.seed_state_path.clone(),
            cfg.target,
        ));

        if cfg.install_signal_handler {
            let stop = Arc::clone(&stop);
            let events = Arc::clone(&events);
            ctrlc::set_handler(move || {
                events.info("stop requested by signal");
                stop.store(true, Ordering::Relaxed);
            })
            .map_err(|e| HuntError::Usage(format!("could not install signal handler: {e}")))?;
        }

        // Submission pipeline
        let mut submit: Option<Arc<SubmissionManager>> = None;
        let mut service_handles: Vec<JoinHandle<()>> = Vec::new();
        if let (Some(api), Some(sub_cfg)) = (api, submission) {
            let manager = Arc::new(SubmissionManager::new(
                api,
                sub_cfg,
                Arc::clone(&stats),
                Arc::clone(&events),
                Arc::clone(&stop),
            ));
            service_handles.extend(manager.start());
            submit = Some(manager);
        }

        // Memory guard; the approximate pipeline gets a default ceiling.
        let use_approx = cfg.backend != BackendMode::CpuOnly;
        let guard_limit = cfg.memory_limit.or(use_approx.then_some(MemoryLimit::GpuDefault));
        if let Some(limit) = guard_limit {
            service_handles.push(guard::spawn(
                limit,
                cfg.memory_guard_interval,
                Arc::clone(&stop),
                Arc::clone(&events),
            ));
        }

        // Allocator snapshot timer
        {
            let allocator = Arc::clone(&allocator);
            let stop = Arc::clone(&stop);
            let interval = cfg.snapshot_interval;
            service_handles.push(
                std::thread::Builder::new()
                    .name("seed-snapshot".into())
                    .spawn(move || {
                        while !stop.load(Ordering::Relaxed) {
                            sleep_with_stop(&stop, interval);
                            if let Err(err) = allocator.snapshot() {
                                log::warn!("seed state snapshot failed, will retry: {err:#}");
                            }
                        }
                    })
                    .expect("spawn snapshot timer"),
            );
        }

        // Status ticker
        {
            let stats = Arc::clone(&stats);
            let best = Arc::clone(&best);
            let approx_best = Arc::clone(&approx_best);
            let margin = Arc::clone(&margin);
            let shift = Arc::clone(&shift);
            let submit = submit.clone();
            let stop = Arc::clone(&stop);
            let interval = cfg.status_interval;
            service_handles.push(
                std::thread::Builder::new()
                    .name("status".into())
                    .spawn(move || {
                        while !stop.load(Ordering::Relaxed) {
                            sleep_with_stop(&stop, interval);
                            let report = StatusReport::gather(
                                &stats,
                                &best,
                                &approx_best,
                                &margin,
                                &shift,
                                submit.as_ref(),
                            );
                            log::info!("{report}");
                        }
                    })
                    .expect("spawn status ticker"),
            );
        }

        // Approximate pipeline: verifier + GPU manager thread.
        let mut verify_queue: Option<Arc<VerifyQueue>> = None;
        let mut verifier_pool: Option<VerifierPool> = None;
        let mut gpu_handle: Option<JoinHandle<()>> = None;
        if use_approx {
            match gpu_factory {
                Some(factory) => {
                    let queue = Arc::new(VerifyQueue::new(cfg.verifier_capacity));
                    let gpu_ctx = GpuContext {
                        allocator: Arc::clone(&allocator),
                        stats: Arc::clone(&stats),
                        approx_best: Arc::clone(&approx_best),
                        events: Arc::clone(&events),
                        margin: Arc::clone(&margin),
                        submit: submit.clone(),
                        verifier: Some(Arc::clone(&queue)),
                        stop: Arc::clone(&stop),
                    };
                    match GpuExplorer::new(factory, cfg.gpu.clone(), gpu_ctx) {
                        Ok(mut explorer) => {
                            let pool = VerifierPool::spawn(
                                cfg.verifier_threads,
                                Arc::new(VerifierContext {
                                    queue: Arc::clone(&queue),
                                    image_size: seedhunt_scorer::DEFAULT_IMAGE_SIZE,
                                    best: Arc::clone(&best),
                                    margin: Arc::clone(&margin),
                                    shift: Arc::clone(&shift),
                                    submit: submit.clone(),
                                    stats: Arc::clone(&stats),
                                    events: Arc::clone(&events),
                                }),
                            );
                            verifier_pool = Some(pool);
                            verify_queue = Some(queue);
                            gpu_handle = Some(
                                std::thread::Builder::new()
                                    .name("gpu-explore".into())
                                    .spawn(move || {
                                        if let Err(err) = explorer.run() {
                                            log::error!("approximate pipeline failed: {err}");
                                        }
                                    })
                                    .expect("spawn gpu manager"),
                            );
                        }
                        Err(err) if cfg.backend == BackendMode::ApproxRequired => {
                            stop.store(true, Ordering::Relaxed);
                            return Err(err);
                        }
                        Err(err) => {
                            events.warning(format!(
                                "approximate backend unavailable ({err}), continuing on cpu"
                            ));
                        }
                    }
                }
                None if cfg.backend == BackendMode::ApproxRequired => {
                    stop.store(true, Ordering::Relaxed);
                    return Err(HuntError::BackendInit(
                        "approximate backend mandated but none available".into(),
                    ));
                }
                None => {
                    events.warning("no approximate backend available, continuing on cpu");
                }
            }
        }

        // A run needs at least one work source after fallbacks resolved.
        if cfg.worker.threads == 0 && gpu_handle.is_none() {
            stop.store(true, Ordering::Relaxed);
            return Err(HuntError::Usage(
                "no scoring backend active: zero cpu threads and no approximate pipeline".into(),
            ));
        }

        // Exact CPU workers on this thread.
        if cfg.worker.threads > 0 {
            let worker_ctx = WorkerContext {
                allocator: Arc::clone(&allocator),
                best: Arc::clone(&best),
                stats: Arc::clone(&stats),
                events: Arc::clone(&events),
                submit: submit.clone(),
                stop: Arc::clone(&stop),
            };
            if let Err(err) = CpuWorkerPool::new(cfg.worker.clone()).run(&worker_ctx) {
                events.error(format!("worker pool failed: {err:#}"));
                stop.store(true, Ordering::Relaxed);
            }
        } else if let Some(handle) = gpu_handle.take() {
            let _ = handle.join();
        } else {
            while !stop.load(Ordering::Relaxed) {
                std::thread::sleep(STOP_POLL);
            }
        }

        // Teardown: flag first, then drain in dependency order.
        stop.store(true, Ordering::Relaxed);
        if let Some(handle) = gpu_handle {
            let _ = handle.join();
        }
        if let Some(queue) = verify_queue {
            queue.close();
        }
        if let Some(pool) = verifier_pool {
            pool.join();
        }
        if let Some(manager) = &submit {
            manager.shutdown();
        }
        for handle in service_handles {
            let _ = handle.join();
        }
        if let Err(err) = allocator.snapshot() {
            log::warn!("final seed state snapshot failed: {err:#}");
        }
        events.info("run stopped cleanly");
        Ok(())
    }
}

fn sleep_with_stop(stop: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(STOP_POLL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedhunt_scorer::CpuReferenceFactory;

    fn base_cfg(target: u64) -> RunnerConfig {
        RunnerConfig {
            space: SeedSpace::new(0, 1 << 16),
            target: Some(target),
            install_signal_handler: false,
            snapshot_interval: Duration::from_millis(50),
            status_interval: Duration::from_millis(100),
            worker: WorkerConfig {
                threads: 2,
                claim_size: 16,
                ..WorkerConfig::default()
            },
            ..RunnerConfig::default()
        }
    }

    #[test]
    fn test_cpu_only_run_completes_target() {
        let cfg = base_cfg(64);
        let runner = Runner::new(cfg);
        runner.run().unwrap();
    }

    #[test]
    fn test_zero_threads_cpu_only_is_usage_error() {
        let mut cfg = base_cfg(16);
        cfg.worker.threads = 0;
        let err = Runner::new(cfg).run().unwrap_err();
        assert!(matches!(err, HuntError::Usage(_)));
    }

    #[test]
    fn test_required_backend_without_factory_is_fatal() {
        let mut cfg = base_cfg(16);
        cfg.backend = BackendMode::ApproxRequired;
        let err = Runner::new(cfg).run().unwrap_err();
        assert!(matches!(err, HuntError::BackendInit(_)));
    }

    #[test]
    fn test_preferred_backend_without_factory_falls_back() {
        let mut cfg = base_cfg(32);
        cfg.backend = BackendMode::ApproxPreferred;
        // No factory: warn and complete on cpu workers alone.
        Runner::new(cfg).run().unwrap();
    }

    #[test]
    fn test_approx_pipeline_with_reference_backend() {
        let mut cfg = base_cfg(128);
        cfg.backend = BackendMode::ApproxPreferred;
        cfg.worker.threads = 1;
        cfg.gpu = GpuConfig {
            batch: 16,
            inflight: 2,
            autotune: false,
            ..GpuConfig::default()
        };
        let runner =
            Runner::new(cfg).with_scorer_factory(Box::new(CpuReferenceFactory::new()));
        runner.run().unwrap();
    }

    #[test]
    fn test_stop_flag_ends_unbounded_run() {
        let mut cfg = base_cfg(0);
        cfg.target = None;
        let runner = Runner::new(cfg);
        let stop = runner.stop_flag();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            stop.store(true, Ordering::Relaxed);
        });
        runner.run().unwrap();
        stopper.join().unwrap();
    }
}
