//! End-to-end pipeline shutdown behavior
//!
//! Drives the full stack (allocator, approximate pipeline, verifier,
//! submission manager) against a scripted leaderboard, flips the stop flag
//! mid-run, and checks the teardown contract: the manager drains, the
//! journal on disk holds exactly the not-yet-dispatched tasks in dispatch
//! order, and the seed state file allows an exact resume.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use seedhunt_core::space::SeedSpace;
use seedhunt_explorer::{BackendMode, GpuConfig, Runner, RunnerConfig, WorkerConfig};
use seedhunt_net::{api::SubmitReply, ApiError, ScoreApi, SubmissionConfig, TopEntry};
use seedhunt_scorer::CpuReferenceFactory;

/// Leaderboard double: a fixed floor, and every submission answers 429 so
/// queued tasks stay pending.
struct RateLimitedBoard {
    floor: f64,
    submissions: Mutex<Vec<u64>>,
}

impl ScoreApi for RateLimitedBoard {
    fn fetch_top(&self, _limit: usize) -> Result<Vec<TopEntry>, ApiError> {
        Ok(vec![TopEntry {
            seed: 999_999,
            score: self.floor,
            rank: Some(500),
            discoverer_id: None,
        }])
    }

    fn submit_score(&self, seed: u64, _score: f64) -> Result<SubmitReply, ApiError> {
        self.submissions.lock().unwrap().push(seed);
        Err(ApiError::RateLimited)
    }
}

#[test]
fn test_stop_mid_run_flushes_journal_in_dispatch_order() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("journal.json");
    let state_path = dir.path().join("seed-state.json");

    let api = Arc::new(RateLimitedBoard {
        floor: -20.0,
        submissions: Mutex::new(Vec::new()),
    });

    let cfg = RunnerConfig {
        space: SeedSpace::new(0, 1 << 16),
        backend: BackendMode::ApproxPreferred,
        worker: WorkerConfig {
            threads: 0,
            ..WorkerConfig::default()
        },
        gpu: GpuConfig {
            batch: 16,
            inflight: 2,
            autotune: false,
            ..GpuConfig::default()
        },
        seed_state_path: Some(state_path.clone()),
        snapshot_interval: Duration::from_millis(50),
        status_interval: Duration::from_secs(60),
        install_signal_handler: false,
        target: None,
        ..RunnerConfig::default()
    };

    let runner = Runner::new(cfg)
        .with_scorer_factory(Box::new(CpuReferenceFactory::new()))
        .with_submission(
            Arc::clone(&api) as Arc<dyn ScoreApi>,
            SubmissionConfig {
                user_min_score: -30.0,
                journal_path: Some(journal_path.clone()),
                ..SubmissionConfig::default()
            },
        );

    let stop = runner.stop_flag();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(600));
        stop.store(true, Ordering::Relaxed);
    });
    runner.run().unwrap();
    stopper.join().unwrap();

    // The journal holds the still-pending tasks in dispatch order: score
    // descending, sequence ascending on ties, unique seeds.
    let raw = std::fs::read_to_string(&journal_path).expect("journal flushed on shutdown");
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["version"], 1);
    let entries = value["entries"].as_array().unwrap();
    assert!(!entries.is_empty(), "expected pending submissions to survive");
    let mut seen = std::collections::HashSet::new();
    let mut previous: Option<(f64, u64)> = None;
    for entry in entries {
        let seed = entry["seed"].as_u64().unwrap();
        let score = entry["score"].as_f64().unwrap();
        let seq = entry["seq"].as_u64().unwrap();
        assert!(seen.insert(seed), "duplicate seed {seed} in journal");
        if let Some((prev_score, prev_seq)) = previous {
            assert!(
                score < prev_score || (score == prev_score && seq > prev_seq),
                "journal out of dispatch order"
            );
        }
        previous = Some((score, seq));
    }

    // The seed state snapshot is present and resumable.
    let state: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&state_path).unwrap()).unwrap();
    assert!(state["next_index"].as_u64().unwrap() > 0);

    // At least one dispatch was attempted and rate limited.
    assert!(!api.submissions.lock().unwrap().is_empty());
}
