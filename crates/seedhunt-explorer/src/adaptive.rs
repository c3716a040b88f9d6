//! Adaptive margin and score-shift controllers
//!
//! The GPU score is a bounded-error approximation of the exact score. The
//! margin controller keeps `gpu + margin >= cpu` for nearly all verified
//! samples by tracking the empirical quantile of the underestimate
//! `max(0, cpu - gpu)`; the shift controller tracks the mean bias for
//! backends with a calibrated offset. Both rise immediately and decay
//! slowly, so a burst of bad approximations widens the gate at once while
//! a quiet stretch narrows it gradually.

use std::sync::atomic::{AtomicI8, AtomicU64, Ordering};
use std::sync::Mutex;

use statrs::statistics::{Data, OrderStatistics};

/// Movement below this is reported as a flat trend.
const TREND_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct MarginConfig {
    /// Ring capacity of underestimate samples.
    pub window: usize,
    /// Samples required before the quantile is trusted.
    pub min_samples: usize,
    pub quantile: f64,
    /// Added on top of the quantile.
    pub safety: f64,
    pub min_margin: f64,
    pub max_margin: f64,
    /// Fraction of the gap closed per sample when decreasing.
    pub decay: f64,
}

impl Default for MarginConfig {
    fn default() -> Self {
        Self {
            window: 4096,
            min_samples: 64,
            quantile: 0.995,
            safety: 0.02,
            min_margin: 0.0,
            max_margin: 5.0,
            decay: 0.05,
        }
    }
}

#[derive(Debug)]
struct MarginInner {
    under: std::collections::VecDeque<f64>,
}

/// Quantile-driven admission margin, published through an atomic for the
/// GPU manager's hot path.
#[derive(Debug)]
pub struct AdaptiveMargin {
    cfg: MarginConfig,
    inner: Mutex<MarginInner>,
    current_bits: AtomicU64,
    trend: AtomicI8,
}

impl AdaptiveMargin {
    pub fn new(cfg: MarginConfig) -> Self {
        let initial = cfg.min_margin;
        Self {
            cfg,
            inner: Mutex::new(MarginInner {
                under: std::collections::VecDeque::new(),
            }),
            current_bits: AtomicU64::new(initial.to_bits()),
            trend: AtomicI8::new(0),
        }
    }

    /// Record one verified `(approximate, exact)` pair.
    pub fn record(&self, approx: f32, exact: f64) {
        if !approx.is_finite() || !exact.is_finite() {
            return;
        }
        let under = (exact - approx as f64).max(0.0);
        let target = {
            let mut inner = self.inner.lock().unwrap();
            if inner.under.len() == self.cfg.window {
                inner.under.pop_front();
            }
            inner.under.push_back(under);
            if inner.under.len() < self.cfg.min_samples {
                return;
            }
            let mut data = Data::new(inner.under.iter().copied().collect::<Vec<f64>>());
            (data.quantile(self.cfg.quantile) + self.cfg.safety)
                .clamp(self.cfg.min_margin, self.cfg.max_margin)
        };
        let current = self.current();
        let next = drift(current, target, self.cfg.decay);
        self.current_bits.store(next.to_bits(), Ordering::Relaxed);
        self.trend.store(trend_of(current, next), Ordering::Relaxed);
    }

    pub fn current(&self) -> f64 {
        f64::from_bits(self.current_bits.load(Ordering::Relaxed))
    }

    pub fn trend_symbol(&self) -> &'static str {
        trend_symbol(self.trend.load(Ordering::Relaxed))
    }

    pub fn sample_count(&self) -> usize {
        self.inner.lock().unwrap().under.len()
    }
}

impl Default for AdaptiveMargin {
    fn default() -> Self {
        Self::new(MarginConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct ShiftConfig {
    pub safety: f64,
    pub decay: f64,
    pub min_shift: f64,
    pub max_shift: f64,
    pub min_samples: u64,
}

impl Default for ShiftConfig {
    fn default() -> Self {
        Self {
            safety: 0.05,
            decay: 0.05,
            min_shift: -5.0,
            max_shift: 5.0,
            min_samples: 32,
        }
    }
}

#[derive(Debug, Default)]
struct ShiftInner {
    count: u64,
    mean: f64,
}

/// Mean-bias compensation for approximate backends with a calibrated
/// offset: proposes `shift = -mean(cpu - gpu) + safety` with the same
/// fast-up/slow-down policy as the margin.
#[derive(Debug)]
pub struct AdaptiveScoreShift {
    cfg: ShiftConfig,
    inner: Mutex<ShiftInner>,
    current_bits: AtomicU64,
    trend: AtomicI8,
}

impl AdaptiveScoreShift {
    pub fn new(cfg: ShiftConfig) -> Self {
        Self {
            cfg,
            inner: Mutex::new(ShiftInner::default()),
            current_bits: AtomicU64::new(0f64.to_bits()),
            trend: AtomicI8::new(0),
        }
    }

    pub fn record(&self, approx: f32, exact: f64) {
        if !approx.is_finite() || !exact.is_finite() {
            return;
        }
        let delta = exact - approx as f64;
        let target = {
            let mut inner = self.inner.lock().unwrap();
            inner.count += 1;
            inner.mean += (delta - inner.mean) / inner.count as f64;
            if inner.count < self.cfg.min_samples {
                return;
            }
            (-inner.mean + self.cfg.safety).clamp(self.cfg.min_shift, self.cfg.max_shift)
        };
        let current = self.current();
        let next = drift(current, target, self.cfg.decay);
        self.current_bits.store(next.to_bits(), Ordering::Relaxed);
        self.trend.store(trend_of(current, next), Ordering::Relaxed);
    }

    pub fn current(&self) -> f64 {
        f64::from_bits(self.current_bits.load(Ordering::Relaxed))
    }

    pub fn trend_symbol(&self) -> &'static str {
        trend_symbol(self.trend.load(Ordering::Relaxed))
    }
}

impl Default for AdaptiveScoreShift {
    fn default() -> Self {
        Self::new(ShiftConfig::default())
    }
}

/// Fast increase, slow decrease toward `target`.
fn drift(current: f64, target: f64, decay: f64) -> f64 {
    if target > current {
        target
    } else {
        current + decay * (target - current)
    }
}

fn trend_of(previous: f64, next: f64) -> i8 {
    if next - previous > TREND_EPSILON {
        1
    } else if previous - next > TREND_EPSILON {
        -1
    } else {
        0
    }
}

fn trend_symbol(trend: i8) -> &'static str {
    match trend {
        1 => "^",
        -1 => "v",
        _ => "-",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn margin_with(window: usize, min_samples: usize) -> AdaptiveMargin {
        AdaptiveMargin::new(MarginConfig {
            window,
            min_samples,
            ..MarginConfig::default()
        })
    }

    #[test]
    fn test_margin_rises_immediately_to_quantile() {
        let margin = margin_with(256, 16);
        // cpu - gpu = 0.5 on every sample
        for _ in 0..64 {
            margin.record(1.0, 1.5);
        }
        let expected = 0.5 + MarginConfig::default().safety;
        assert!((margin.current() - expected).abs() < 1e-9);
        assert!(margin.current() <= MarginConfig::default().max_margin);
    }

    #[test]
    fn test_margin_decays_slowly() {
        let margin = margin_with(64, 16);
        for _ in 0..64 {
            margin.record(1.0, 1.5);
        }
        let high = margin.current();
        // Window floods with zero-underestimate samples.
        for _ in 0..64 {
            margin.record(1.0, 1.0);
        }
        let low = margin.current();
        assert!(low < high);
        // Decrease per sample is bounded by decay * gap, so after 64 steps
        // some gap remains.
        let floor = MarginConfig::default().safety;
        assert!(low > floor - 1e-9);
        let max_drop = high - floor;
        assert!(high - low <= max_drop + 1e-9);

        let before = margin.current();
        margin.record(1.0, 1.0);
        let after = margin.current();
        let decay = MarginConfig::default().decay;
        assert!(before - after <= decay * (before - floor) + 1e-9);
    }

    #[test]
    fn test_margin_needs_min_samples() {
        let margin = margin_with(256, 32);
        for _ in 0..31 {
            margin.record(0.0, 2.0);
        }
        assert_eq!(margin.current(), 0.0);
        margin.record(0.0, 2.0);
        assert!(margin.current() > 0.0);
    }

    #[test]
    fn test_margin_clamped_to_max() {
        let margin = AdaptiveMargin::new(MarginConfig {
            window: 64,
            min_samples: 8,
            max_margin: 1.0,
            ..MarginConfig::default()
        });
        for _ in 0..32 {
            margin.record(0.0, 50.0);
        }
        assert_eq!(margin.current(), 1.0);
    }

    #[test]
    fn test_margin_trend_symbols() {
        let margin = margin_with(16, 8);
        // Growing underestimates: the quantile target climbs every sample.
        for i in 0..16 {
            margin.record(1.0, 2.0 + i as f64 * 0.05);
        }
        assert_eq!(margin.trend_symbol(), "^");
        // Enough zeros to flood the window, then keep decaying.
        for _ in 0..48 {
            margin.record(1.0, 1.0);
        }
        assert_eq!(margin.trend_symbol(), "v");
    }

    #[test]
    fn test_margin_ignores_nan_pairs() {
        let margin = margin_with(64, 4);
        for _ in 0..16 {
            margin.record(f32::NAN, 1.0);
        }
        assert_eq!(margin.sample_count(), 0);
    }

    #[test]
    fn test_shift_tracks_mean_bias() {
        let shift = AdaptiveScoreShift::new(ShiftConfig {
            min_samples: 4,
            ..ShiftConfig::default()
        });
        // gpu consistently reads 0.3 above cpu: mean(cpu - gpu) = -0.3,
        // proposed shift = 0.3 + safety.
        for _ in 0..32 {
            shift.record(1.3, 1.0);
        }
        let expected = 0.3 + ShiftConfig::default().safety;
        assert!((shift.current() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_shift_trend_rises_with_growing_bias() {
        let shift = AdaptiveScoreShift::new(ShiftConfig {
            min_samples: 4,
            ..ShiftConfig::default()
        });
        // The overestimate widens over time, so the proposed shift keeps
        // climbing.
        for i in 0..32 {
            shift.record(1.3 + i as f32 * 0.01, 1.0);
        }
        assert!(shift.current() > 0.3);
        assert!(shift.current() < 1.0);
        assert_eq!(shift.trend_symbol(), "^");
    }
}
