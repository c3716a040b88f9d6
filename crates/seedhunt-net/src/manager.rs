//! The submission manager
//!
//! Owns the pending queue, the eligibility state, the rate limiter and the
//! journal, and runs two background threads: a dispatcher that keeps at most
//! one network call in flight, and a top-list refresh timer that keeps the
//! admission floor current and prunes the queue when it rises.
//!
//! All dispatch logic lives in [`SubmissionManager::dispatch_once`], a
//! synchronous step function the thread loop (and the test suite) drives.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, Sender};
use serde::Serialize;

use seedhunt_core::{persist, EventLog, ExploreStats};

use crate::api::{ApiError, ScoreApi, TopEntry};
use crate::journal;
use crate::queue::{PendingQueue, SubmissionSource, SubmissionTask};
use crate::ratelimit::{retry_delay, RateLimiter};
use crate::state::SubmissionState;

/// How long the dispatcher and timers sleep between stop-flag polls.
const STOP_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct SubmissionConfig {
    /// Scores at or below this are never considered.
    pub user_min_score: f64,

    /// Per-task retry budget for retryable server errors.
    pub max_retries: u32,

    /// Top-list refresh cadence. Clamped to at least 10 s.
    pub refresh_interval: Duration,

    /// Initial backoff after a failed refresh; doubles up to the cap.
    pub refresh_failure_backoff: Duration,
    pub refresh_failure_backoff_cap: Duration,

    /// How many entries to request from the top list.
    pub top_limit: usize,

    pub journal_path: Option<std::path::PathBuf>,
    pub top_cache_path: Option<std::path::PathBuf>,

    /// Journal writes are coalesced within this window.
    pub journal_debounce: Duration,

    pub accepted_cap: usize,
    pub accepted_best_cap: usize,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            user_min_score: f64::NEG_INFINITY,
            max_retries: 8,
            refresh_interval: Duration::from_secs(180),
            refresh_failure_backoff: Duration::from_secs(5),
            refresh_failure_backoff_cap: Duration::from_secs(300),
            top_limit: 500,
            journal_path: None,
            top_cache_path: None,
            journal_debounce: Duration::from_secs(1),
            accepted_cap: 20,
            accepted_best_cap: 3,
        }
    }
}

/// A submission the server accepted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptedRecord {
    pub seed: u64,
    pub score: f64,
    pub rank: Option<u32>,
    /// How deep into the top list the entry landed, 100 = rank 1.
    pub difficulty_percentile: Option<f64>,
    pub at: String,
}

/// Result of one dispatcher step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DispatchOutcome {
    /// Nothing to do.
    Idle,
    /// A backoff or retry window is open for this long.
    Backoff(Duration),
    Accepted(u64),
    Rejected(u64),
    RateLimited(Duration),
    WillRetry(Duration),
    Failed(u64),
}

/// Mirror of the last successful top-list fetch, persisted next to the
/// journal so a restart has a floor before its first refresh.
#[derive(Debug, Serialize)]
struct TopCache<'a> {
    updated_at: String,
    entries: &'a [TopEntry],
}

pub struct SubmissionManager {
    cfg: SubmissionConfig,
    api: Arc<dyn ScoreApi>,
    state: Mutex<SubmissionState>,
    queue: Mutex<PendingQueue>,
    active: Mutex<Option<SubmissionTask>>,
    seq: AtomicU64,
    limiter: Mutex<RateLimiter>,
    retry_until: Mutex<Option<Instant>>,
    journal_dirty: AtomicBool,
    journal_loaded: AtomicBool,
    last_journal_write: Mutex<Instant>,
    accepted: Mutex<Vec<AcceptedRecord>>,
    accepted_best: Mutex<Vec<AcceptedRecord>>,
    stats: Arc<ExploreStats>,
    events: Arc<EventLog>,
    stop: Arc<AtomicBool>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl SubmissionManager {
    pub fn new(
        api: Arc<dyn ScoreApi>,
        mut cfg: SubmissionConfig,
        stats: Arc<ExploreStats>,
        events: Arc<EventLog>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        cfg.refresh_interval = cfg.refresh_interval.max(Duration::from_secs(10));
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            cfg,
            api,
            state: Mutex::new(SubmissionState::new()),
            queue: Mutex::new(PendingQueue::new()),
            active: Mutex::new(None),
            seq: AtomicU64::new(0),
            limiter: Mutex::new(RateLimiter::new()),
            retry_until: Mutex::new(None),
            journal_dirty: AtomicBool::new(false),
            journal_loaded: AtomicBool::new(false),
            last_journal_write: Mutex::new(Instant::now()),
            accepted: Mutex::new(Vec::new()),
            accepted_best: Mutex::new(Vec::new()),
            stats,
            events,
            stop,
            wake_tx,
            wake_rx,
        }
    }

    /// The current submission floor: `max(user_min_score, top500_threshold)`,
    /// +inf until the first successful refresh.
    pub fn threshold(&self) -> f64 {
        self.state.lock().unwrap().threshold(self.cfg.user_min_score)
    }

    pub fn user_min_score(&self) -> f64 {
        self.cfg.user_min_score
    }

    pub fn pending_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn accepted_records(&self) -> Vec<AcceptedRecord> {
        self.accepted.lock().unwrap().clone()
    }

    pub fn accepted_best(&self) -> Vec<AcceptedRecord> {
        self.accepted_best.lock().unwrap().clone()
    }

    pub fn limiter_backoff_active(&self, now: Instant) -> bool {
        self.limiter.lock().unwrap().backoff_active(now)
    }

    /// Queue a score if it is eligible. Fails fast below the user floor,
    /// then defers to the eligibility state, which also records the attempt.
    pub fn maybe_enqueue(&self, seed: u64, score: f64, source: SubmissionSource) -> bool {
        if !(score > self.cfg.user_min_score) || !score.is_finite() {
            return false;
        }
        {
            let mut state = self.state.lock().unwrap();
            if !state.mark_attempt_if_eligible(seed, score, self.cfg.user_min_score) {
                return false;
            }
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.queue
            .lock()
            .unwrap()
            .insert(SubmissionTask::new(seed, score, source, seq));
        self.journal_dirty.store(true, Ordering::Relaxed);
        let _ = self.wake_tx.try_send(());
        true
    }

    /// One synchronous dispatcher step at time `now`.
    pub fn dispatch_once(&self, now: Instant) -> DispatchOutcome {
        if let Some(wait) = self.limiter.lock().unwrap().backoff_remaining(now) {
            return DispatchOutcome::Backoff(wait);
        }
        {
            let mut retry_until = self.retry_until.lock().unwrap();
            match *retry_until {
                Some(until) if until > now => return DispatchOutcome::Backoff(until - now),
                Some(_) => *retry_until = None,
                None => {}
            }
        }
        let Some(task) = self.queue.lock().unwrap().pop_head() else {
            return DispatchOutcome::Idle;
        };
        *self.active.lock().unwrap() = Some(task.clone());
        self.stats.add_submitted(1);
        let result = self.api.submit_score(task.seed, task.score);
        let outcome = self.settle(task, result, now);
        *self.active.lock().unwrap() = None;
        self.journal_dirty.store(true, Ordering::Relaxed);
        outcome
    }

    fn settle(
        &self,
        mut task: SubmissionTask,
        result: Result<crate::api::SubmitReply, ApiError>,
        now: Instant,
    ) -> DispatchOutcome {
        match result {
            Ok(reply) if reply.accepted => {
                self.on_accepted(&task, reply.rank);
                DispatchOutcome::Accepted(task.seed)
            }
            Ok(reply) => {
                self.stats.add_rejected(1);
                self.events.rejected(format!(
                    "seed {} rejected by server{}",
                    task.seed,
                    reply
                        .message
                        .map(|m| format!(": {m}"))
                        .unwrap_or_default()
                ));
                DispatchOutcome::Rejected(task.seed)
            }
            Err(err) if err.is_rate_limited() => {
                let delay = self.limiter.lock().unwrap().on_rate_limited(now);
                self.events.warning(format!(
                    "rate limited, retrying seed {} in {:.1}s",
                    task.seed,
                    delay.as_secs_f64()
                ));
                self.queue.lock().unwrap().insert(task);
                DispatchOutcome::RateLimited(delay)
            }
            Err(err) if err.is_retryable() => {
                task.retries += 1;
                if task.retries > self.cfg.max_retries {
                    self.stats.add_failed(1);
                    self.events.error(format!(
                        "giving up on seed {} after {} retries: {err}",
                        task.seed, self.cfg.max_retries
                    ));
                    DispatchOutcome::Failed(task.seed)
                } else {
                    let delay = retry_delay(task.retries);
                    self.events.warning(format!(
                        "submit of seed {} failed ({err}), retrying in {:.1}s",
                        task.seed,
                        delay.as_secs_f64()
                    ));
                    *self.retry_until.lock().unwrap() = Some(now + delay);
                    self.queue.lock().unwrap().insert(task);
                    DispatchOutcome::WillRetry(delay)
                }
            }
            Err(err) => {
                self.stats.add_rejected(1);
                self.events.rejected(format!("seed {} rejected: {err}", task.seed));
                DispatchOutcome::Rejected(task.seed)
            }
        }
    }

    fn on_accepted(&self, task: &SubmissionTask, rank: Option<u32>) {
        self.state.lock().unwrap().mark_known(task.seed);
        self.stats.add_accepted(1);
        self.limiter.lock().unwrap().reset();
        let record = AcceptedRecord {
            seed: task.seed,
            score: task.score,
            rank,
            difficulty_percentile: rank.map(|r| {
                (self.cfg.top_limit as f64 - r as f64 + 1.0) / self.cfg.top_limit as f64 * 100.0
            }),
            at: persist::timestamp_now(),
        };
        {
            let mut accepted = self.accepted.lock().unwrap();
            accepted.push(record.clone());
            if accepted.len() > self.cfg.accepted_cap {
                accepted.remove(0);
            }
        }
        {
            let mut best = self.accepted_best.lock().unwrap();
            best.push(record);
            best.sort_by(|a, b| {
                b.difficulty_percentile
                    .unwrap_or(0.0)
                    .partial_cmp(&a.difficulty_percentile.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(
                        b.score
                            .partial_cmp(&a.score)
                            .unwrap_or(std::cmp::Ordering::Equal),
                    )
            });
            best.truncate(self.cfg.accepted_best_cap);
        }
        self.events.accepted(format!(
            "seed {} accepted at score {:.4}{}",
            task.seed,
            task.score,
            rank.map(|r| format!(" (rank {r})")).unwrap_or_default()
        ));
    }

    /// Fetch the top list and fold it in: new floor, rebuilt known set,
    /// queue prune, first-time journal restore, cache mirror.
    pub fn refresh_top(&self) -> Result<(), ApiError> {
        let entries = self.api.fetch_top(self.cfg.top_limit)?;
        let (floor, best) = {
            let mut state = self.state.lock().unwrap();
            let best = state.apply_top(&entries);
            (state.top500_threshold(), best)
        };
        self.events.info(format!(
            "top list refreshed: {} entries, floor {:.4}{}",
            entries.len(),
            floor,
            best.map(|b| format!(", best {:.4}", b.score)).unwrap_or_default()
        ));
        let removed = {
            let state = self.state.lock().unwrap();
            self.queue
                .lock()
                .unwrap()
                .prune(|t| t.score > floor && !state.is_known(t.seed))
        };
        if removed > 0 {
            self.journal_dirty.store(true, Ordering::Relaxed);
            self.events
                .info(format!("pruned {removed} queued submissions below the new floor"));
        }
        if !self.journal_loaded.swap(true, Ordering::Relaxed) {
            self.restore_journal();
        }
        if let Some(path) = &self.cfg.top_cache_path {
            let cache = TopCache {
                updated_at: persist::timestamp_now(),
                entries: &entries,
            };
            if let Err(err) = persist::save_json(path, &cache) {
                log::warn!("could not write top-list cache: {err:#}");
            }
        }
        Ok(())
    }

    /// Re-admit journalled tasks through the normal eligibility path,
    /// preserving their sequence numbers.
    fn restore_journal(&self) {
        let Some(path) = &self.cfg.journal_path else {
            return;
        };
        let Some(entries) = journal::load(path) else {
            return;
        };
        let entries = journal::dedup_entries(entries);
        let mut restored = 0usize;
        let mut max_seq = self.seq.load(Ordering::Relaxed);
        for entry in entries {
            let eligible = {
                let mut state = self.state.lock().unwrap();
                state.mark_attempt_if_eligible(entry.seed, entry.score, self.cfg.user_min_score)
            };
            if !eligible {
                continue;
            }
            let source = entry.source.unwrap_or(SubmissionSource::Journal);
            self.queue.lock().unwrap().insert(SubmissionTask::new(
                entry.seed,
                entry.score,
                source,
                entry.seq,
            ));
            max_seq = max_seq.max(entry.seq + 1);
            restored += 1;
        }
        self.seq.store(max_seq, Ordering::Relaxed);
        if restored > 0 {
            self.journal_dirty.store(true, Ordering::Relaxed);
            self.events
                .info(format!("restored {restored} queued submissions from journal"));
            let _ = self.wake_tx.try_send(());
        }
    }

    /// Write the journal now: the in-flight task (prepended) plus the queue
    /// in dispatch order.
    pub fn flush_journal(&self) {
        let Some(path) = &self.cfg.journal_path else {
            return;
        };
        let mut tasks: Vec<SubmissionTask> = Vec::new();
        if let Some(active) = self.active.lock().unwrap().clone() {
            tasks.push(active);
        }
        tasks.extend(self.queue.lock().unwrap().iter().cloned());
        if let Err(err) = journal::save(path, &tasks) {
            log::warn!("journal write failed, keeping dirty: {err:#}");
            return;
        }
        self.journal_dirty.store(false, Ordering::Relaxed);
        *self.last_journal_write.lock().unwrap() = Instant::now();
    }

    fn journal_tick(&self, now: Instant) {
        if !self.journal_dirty.load(Ordering::Relaxed) {
            return;
        }
        let due = {
            let last = self.last_journal_write.lock().unwrap();
            now.duration_since(*last) >= self.cfg.journal_debounce
        };
        if due {
            self.flush_journal();
        }
    }

    /// Flush state and stop accepting work. Does not wait for an in-flight
    /// network call.
    pub fn shutdown(&self) {
        self.flush_journal();
    }

    /// Spawn the dispatcher and refresh threads.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        let dispatcher = Arc::clone(self);
        handles.push(
            std::thread::Builder::new()
                .name("submit-dispatch".into())
                .spawn(move || dispatcher.dispatch_loop())
                .expect("spawn dispatcher"),
        );
        let refresher = Arc::clone(self);
        handles.push(
            std::thread::Builder::new()
                .name("top-refresh".into())
                .spawn(move || refresher.refresh_loop())
                .expect("spawn refresher"),
        );
        handles
    }

    fn dispatch_loop(&self) {
        while !self.stop.load(Ordering::Relaxed) {
            let now = Instant::now();
            self.journal_tick(now);
            match self.dispatch_once(now) {
                DispatchOutcome::Idle => {
                    let _ = self.wake_rx.recv_timeout(STOP_POLL);
                }
                DispatchOutcome::Backoff(wait)
                | DispatchOutcome::RateLimited(wait)
                | DispatchOutcome::WillRetry(wait) => {
                    let _ = self.wake_rx.recv_timeout(wait.min(STOP_POLL));
                }
                _ => {}
            }
        }
        self.flush_journal();
    }

    fn refresh_loop(&self) {
        let mut failure_backoff = self.cfg.refresh_failure_backoff;
        while !self.stop.load(Ordering::Relaxed) {
            match self.refresh_top() {
                Ok(()) => {
                    failure_backoff = self.cfg.refresh_failure_backoff;
                    self.sleep_with_stop(self.cfg.refresh_interval);
                }
                Err(err) => {
                    self.events.warning(format!(
                        "top-list refresh failed: {err}, retrying in {:.0}s",
                        failure_backoff.as_secs_f64()
                    ));
                    self.sleep_with_stop(failure_backoff);
                    failure_backoff =
                        (failure_backoff * 2).min(self.cfg.refresh_failure_backoff_cap);
                }
            }
        }
    }

    fn sleep_with_stop(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.stop.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(STOP_POLL));
        }
    }
}
