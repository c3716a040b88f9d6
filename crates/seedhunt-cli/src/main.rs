//! seedhunt command line
//!
//! Thin wiring: parse arguments, initialize logging, build the runner.
//! Everything interesting happens in `seedhunt-explorer` and
//! `seedhunt-net`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use seedhunt_core::HuntError;
use seedhunt_explorer::{
    BackendMode, GpuConfig, MemoryLimit, Runner, RunnerConfig, WorkerConfig,
};
use seedhunt_net::{api, LeaderboardClient, SubmissionConfig};
use seedhunt_scorer::CpuReferenceFactory;

const DEFAULT_BASE_URL: &str = "https://api.seedhunt.dev";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Exact CPU scoring only
    Cpu,
    /// Approximate pipeline when a backend is available
    Approx,
    /// Approximate pipeline, fail if unavailable
    ApproxRequired,
}

#[derive(Debug, Parser)]
#[command(name = "seedhunt", version, about = "Spectral seed-space explorer")]
struct Args {
    /// Worker threads for exact scoring (0 disables the CPU pool)
    #[arg(long)]
    threads: Option<usize>,

    #[arg(long, value_enum, default_value = "cpu")]
    backend: Backend,

    /// Lowest score worth submitting
    #[arg(long, default_value_t = -2.0)]
    min_score: f64,

    /// Submit qualifying finds to the leaderboard
    #[arg(long)]
    submit: bool,

    /// Leaderboard base URL
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Directory for resumable state files
    #[arg(long, default_value = ".seedhunt")]
    state_dir: PathBuf,

    /// Stop after exploring this many seeds
    #[arg(long)]
    target: Option<u64>,

    /// Initial approximate-scorer batch size
    #[arg(long)]
    batch: Option<usize>,

    /// Outstanding approximate-scorer jobs
    #[arg(long)]
    inflight: Option<usize>,

    /// Disable batch-size autotuning
    #[arg(long)]
    no_autotune: bool,

    /// Resident memory limit in GiB
    #[arg(long)]
    mem_limit_gib: Option<f64>,

    /// Resident memory limit as a fraction of RAM
    #[arg(long, conflicts_with = "mem_limit_gib")]
    mem_limit_fraction: Option<f64>,

    /// Explore by striding from this seed instead of the persistent
    /// permutation
    #[arg(long)]
    stateless_base: Option<u64>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            match err {
                HuntError::Usage(_) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn run(args: Args) -> Result<(), HuntError> {
    if api::update_check_disabled() {
        log::debug!("update check disabled by environment");
    }

    let mut worker = WorkerConfig {
        stateless_base: args.stateless_base,
        ..WorkerConfig::default()
    };
    if let Some(threads) = args.threads {
        worker.threads = threads;
    }

    let mut gpu = GpuConfig {
        autotune: !args.no_autotune,
        tuning_hint_path: Some(args.state_dir.join("gpu-tuning.json")),
        ..GpuConfig::default()
    };
    if let Some(batch) = args.batch {
        gpu.batch = batch;
    }
    if let Some(inflight) = args.inflight {
        if inflight == 0 {
            return Err(HuntError::Usage("--inflight must be at least 1".into()));
        }
        gpu.inflight = inflight;
    }

    let memory_limit = match (args.mem_limit_gib, args.mem_limit_fraction) {
        (Some(gib), _) if gib > 0.0 => Some(MemoryLimit::Bytes((gib * (1u64 << 30) as f64) as u64)),
        (Some(_), _) => return Err(HuntError::Usage("--mem-limit-gib must be positive".into())),
        (None, Some(fraction)) if fraction > 0.0 && fraction <= 1.0 => {
            Some(MemoryLimit::Fraction(fraction))
        }
        (None, Some(_)) => {
            return Err(HuntError::Usage(
                "--mem-limit-fraction must be within (0, 1]".into(),
            ))
        }
        (None, None) => None,
    };

    let backend = match args.backend {
        Backend::Cpu => BackendMode::CpuOnly,
        Backend::Approx => BackendMode::ApproxPreferred,
        Backend::ApproxRequired => BackendMode::ApproxRequired,
    };

    let seed_state_path = args
        .stateless_base
        .is_none()
        .then(|| args.state_dir.join("seed-state.json"));

    let cfg = RunnerConfig {
        backend,
        worker,
        gpu,
        target: args.target,
        seed_state_path,
        memory_limit,
        ..RunnerConfig::default()
    };

    let mut runner = Runner::new(cfg);

    if backend != BackendMode::CpuOnly {
        // The in-tree approximate backend; GPU device backends plug in
        // through the same factory seam.
        runner = runner.with_scorer_factory(Box::new(CpuReferenceFactory::new()));
    }

    if args.submit {
        let client = LeaderboardClient::new(&args.base_url)
            .map_err(|e| HuntError::Usage(format!("invalid leaderboard client: {e}")))?;
        let submission = SubmissionConfig {
            user_min_score: args.min_score,
            journal_path: Some(args.state_dir.join("journal.json")),
            top_cache_path: Some(args.state_dir.join("top500-cache.json")),
            ..SubmissionConfig::default()
        };
        runner = runner.with_submission(std::sync::Arc::new(client), submission);
    }

    log::info!(
        "seedhunt {} starting ({} backend{})",
        env!("CARGO_PKG_VERSION"),
        match backend {
            BackendMode::CpuOnly => "cpu",
            BackendMode::ApproxPreferred => "approx",
            BackendMode::ApproxRequired => "approx (required)",
        },
        if args.submit { ", submitting" } else { "" }
    );
    runner.run()
}
