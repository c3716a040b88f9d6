//! The exact CPU scorer
//!
//! Maps a seed to a [`ScoreResult`] through the fixed pipeline: render,
//! power spectrum, radial profile, spectral-slope fit, then the three
//! penalty terms (peakiness, flatness, neighbor correlation). The same seed
//! must produce a bit-identical `total_score` on every run on the same
//! numeric platform.

use ndarray::Array2;
use seedhunt_core::ScoreResult;

use crate::spectrum::{annulus_values, power_spectrum, radial_profile, render_image};

pub const DEFAULT_IMAGE_SIZE: usize = 128;

/// Target spectral slope: images whose radial power law is near `1/r^3`
/// score best.
const ALPHA_TARGET: f64 = 3.0;

/// Applied instead of `alpha_score` when the fit is degenerate.
const ALPHA_NAN_PENALTY: f64 = -100.0;

/// Lowest radius entering the slope fit; excludes DC and its neighbor.
const FIT_R_MIN: usize = 2;

/// The fit stops at this fraction of the largest radius.
const FIT_R_MAX_FRAC: f64 = 0.90;

/// Fewer finite, positive fit points than this yields alpha = NaN.
const MIN_FIT_POINTS: usize = 6;

/// Mid-frequency annulus bounds, as fractions of the largest radius.
const ANNULUS_LO_FRAC: f64 = 0.15;
const ANNULUS_HI_FRAC: f64 = 0.95;

const PEAKINESS_WEIGHT: f64 = 0.6;
const FLATNESS_WEIGHT: f64 = 8.0;
const FLATNESS_FLOOR: f64 = 0.15;
const CORR_WEIGHT: f64 = 5.0;
const CORR_TARGET: f64 = 0.4;

const EPS: f64 = 1e-12;

/// Deterministic seed-to-score pipeline at a fixed image size.
#[derive(Debug, Clone)]
pub struct ExactScorer {
    size: usize,
}

impl ExactScorer {
    pub fn new() -> Self {
        Self::with_size(DEFAULT_IMAGE_SIZE)
    }

    /// A scorer over `size`-wide images. `size` must be a power of two.
    pub fn with_size(size: usize) -> Self {
        assert!(size.is_power_of_two(), "image size must be a power of two");
        Self { size }
    }

    pub fn image_size(&self) -> usize {
        self.size
    }

    pub fn score(&self, seed: u64) -> ScoreResult {
        let image = render_image(seed, self.size);
        let power = power_spectrum(&image);
        let profile = radial_profile(&power);
        let r_max = (profile.len() - 1) as f64;

        let alpha_est = fit_alpha(&profile);
        let alpha_score = if alpha_est.is_finite() {
            -(alpha_est - ALPHA_TARGET).abs()
        } else {
            ALPHA_NAN_PENALTY
        };

        let mut annulus = annulus_values(&power, ANNULUS_LO_FRAC, ANNULUS_HI_FRAC, r_max);
        let (peakiness, flatness) = annulus_stats(&mut annulus);
        let peakiness_penalty = -PEAKINESS_WEIGHT * peakiness;
        let flatness_penalty = -FLATNESS_WEIGHT * (flatness - FLATNESS_FLOOR).max(0.0);

        let neighbor_corr = neighbor_correlation(&image);
        let neighbor_corr_penalty = -CORR_WEIGHT * (CORR_TARGET - neighbor_corr).max(0.0);

        let total_score = alpha_score + peakiness_penalty + flatness_penalty + neighbor_corr_penalty;

        ScoreResult {
            seed,
            alpha_est,
            alpha_score,
            peakiness,
            peakiness_penalty,
            flatness,
            flatness_penalty,
            neighbor_corr,
            neighbor_corr_penalty,
            total_score,
        }
    }
}

impl Default for ExactScorer {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordinary least squares of `log(mean_power)` against `log(r)`, negated to
/// a positive-down slope. NaN when fewer than [`MIN_FIT_POINTS`] radii have
/// finite positive power.
fn fit_alpha(profile: &[f64]) -> f64 {
    let r_hi = ((profile.len() - 1) as f64 * FIT_R_MAX_FRAC).floor() as usize;
    let mut n = 0usize;
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for r in FIT_R_MIN..=r_hi {
        let p = profile[r];
        if p.is_finite() && p > 0.0 {
            let x = (r as f64).ln();
            let y = p.ln();
            n += 1;
            sx += x;
            sy += y;
            sxx += x * x;
            sxy += x * y;
        }
    }
    if n < MIN_FIT_POINTS {
        return f64::NAN;
    }
    let nf = n as f64;
    let den = nf * sxx - sx * sx;
    if den == 0.0 {
        return f64::NAN;
    }
    let slope = (nf * sxy - sx * sy) / den;
    -slope
}

/// Peakiness and spectral flatness of the annulus values. Scratch-sorts the
/// slice for the median.
fn annulus_stats(values: &mut [f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mut max = f64::NEG_INFINITY;
    let mut ln_sum = 0.0;
    let mut sum = 0.0;
    for &v in values.iter() {
        if v > max {
            max = v;
        }
        ln_sum += (v + EPS).ln();
        sum += v;
    }
    let count = values.len() as f64;
    let median = select_kth(values, values.len() / 2);
    let peakiness = ((max + EPS) / (median + EPS)).log10();
    let geo_mean = (ln_sum / count).exp();
    let arith_mean = sum / count + EPS;
    let flatness = geo_mean / arith_mean;
    (peakiness, flatness)
}

/// Hoare quickselect: the element that would sit at `k` in sorted order.
fn select_kth(values: &mut [f64], k: usize) -> f64 {
    let mut lo = 0usize;
    let mut hi = values.len() - 1;
    loop {
        if lo == hi {
            return values[lo];
        }
        let pivot = values[lo + (hi - lo) / 2];
        let mut i = lo;
        let mut j = hi;
        while i <= j {
            while values[i] < pivot {
                i += 1;
            }
            while values[j] > pivot {
                j -= 1;
            }
            if i <= j {
                values.swap(i, j);
                i += 1;
                if j == 0 {
                    break;
                }
                j -= 1;
            }
        }
        if k <= j {
            hi = j;
        } else if k >= i {
            lo = i;
        } else {
            return values[k];
        }
    }
}

/// Pearson correlation over one set of value pairs.
fn pair_correlation(pairs: impl Iterator<Item = (f64, f64)>) -> f64 {
    let mut n = 0.0;
    let mut sa = 0.0;
    let mut sb = 0.0;
    let mut saa = 0.0;
    let mut sbb = 0.0;
    let mut sab = 0.0;
    for (a, b) in pairs {
        n += 1.0;
        sa += a;
        sb += b;
        saa += a * a;
        sbb += b * b;
        sab += a * b;
    }
    let den = (n * saa - sa * sa).sqrt() * (n * sbb - sb * sb).sqrt();
    if den > 0.0 && den.is_finite() {
        (n * sab - sa * sb) / den
    } else {
        0.0
    }
}

/// Mean of the horizontal and vertical adjacent-pixel correlations.
fn neighbor_correlation(image: &Array2<f64>) -> f64 {
    let n = image.nrows();
    let horizontal = pair_correlation(
        (0..n).flat_map(|y| (0..n - 1).map(move |x| (y, x))).map(|(y, x)| (image[[y, x]], image[[y, x + 1]])),
    );
    let vertical = pair_correlation(
        (0..n - 1).flat_map(|y| (0..n).map(move |x| (y, x))).map(|(y, x)| (image[[y, x]], image[[y + 1, x]])),
    );
    0.5 * (horizontal + vertical)
}
