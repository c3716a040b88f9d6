//! Memory guard
//!
//! A timer thread samples resident memory and requests a clean stop when it
//! crosses the configured limit. GPU driver residency can grow across long
//! runs; stopping at a bound beats the OOM killer. The sampler is
//! injectable so the trip logic is testable without inflating a real
//! process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use sysinfo::{get_current_pid, ProcessesToUpdate, System};

use seedhunt_core::EventLog;

const STOP_POLL: Duration = Duration::from_millis(250);

/// Resident-memory ceiling for the run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MemoryLimit {
    Bytes(u64),
    /// Fraction of total system RAM.
    Fraction(f64),
    /// 80% of total RAM, the default when a GPU backend is active.
    GpuDefault,
}

impl MemoryLimit {
    pub fn resolve(&self, total_ram: u64) -> u64 {
        match *self {
            MemoryLimit::Bytes(bytes) => bytes,
            MemoryLimit::Fraction(fraction) => (total_ram as f64 * fraction.clamp(0.01, 1.0)) as u64,
            MemoryLimit::GpuDefault => (total_ram as f64 * 0.8) as u64,
        }
    }
}

/// Spawn the guard with the real process sampler.
pub fn spawn(
    limit: MemoryLimit,
    interval: Duration,
    stop: Arc<AtomicBool>,
    events: Arc<EventLog>,
) -> JoinHandle<()> {
    let mut system = System::new();
    system.refresh_memory();
    let limit_bytes = limit.resolve(system.total_memory());
    let pid = get_current_pid().ok();
    let sampler = move || {
        let pid = pid?;
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).map(|p| p.memory())
    };
    spawn_with_sampler(limit_bytes, interval, stop, events, sampler)
}

/// Spawn the guard with an arbitrary RSS sampler (bytes).
pub fn spawn_with_sampler(
    limit_bytes: u64,
    interval: Duration,
    stop: Arc<AtomicBool>,
    events: Arc<EventLog>,
    mut sampler: impl FnMut() -> Option<u64> + Send + 'static,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("memory-guard".into())
        .spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                if let Some(resident) = sampler() {
                    if resident > limit_bytes {
                        events.warning(format!(
                            "resident memory {} MiB over limit {} MiB, requesting stop",
                            resident / (1 << 20),
                            limit_bytes / (1 << 20)
                        ));
                        stop.store(true, Ordering::Relaxed);
                        break;
                    }
                }
                sleep_with_stop(&stop, interval);
            }
        })
        .expect("spawn memory guard")
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

    #[test]
    fn test_limit_resolution() {
        let gib = 1u64 << 30;
        assert_eq!(MemoryLimit::Bytes(2 * gib).resolve(16 * gib), 2 * gib);
        assert_eq!(MemoryLimit::Fraction(0.5).resolve(16 * gib), 8 * gib);
        assert_eq!(MemoryLimit::GpuDefault.resolve(10 * gib), 8 * gib);
    }

    #[test]
    fn test_guard_trips_within_one_interval() {
        let stop = Arc::new(AtomicBool::new(false));
        let events = Arc::new(EventLog::default());
        let handle = spawn_with_sampler(
            1000,
            Duration::from_millis(10),
            Arc::clone(&stop),
            Arc::clone(&events),
            || Some(2000),
        );
        handle.join().unwrap();
        assert!(stop.load(Ordering::Relaxed));
        assert_eq!(events.count(seedhunt_core::EventKind::Warning), 1);
    }

    #[test]
    fn test_guard_idle_below_limit() {
        let stop = Arc::new(AtomicBool::new(false));
        let events = Arc::new(EventLog::default());
        let handle = spawn_with_sampler(
            10_000,
            Duration::from_millis(5),
            Arc::clone(&stop),
            Arc::clone(&events),
            || Some(500),
        );
        std::thread::sleep(Duration::from_millis(50));
        assert!(!stop.load(Ordering::Relaxed));
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();
        assert!(events.is_empty());
    }
}
