//! Exact score record
//!
//! The exact CPU scorer reduces a seed's rendered image to one scalar,
//! `total_score`, plus the per-component diagnostics the status surface and
//! the adaptive controllers consume. All penalties are `<= 0`; the total is
//! the alpha score plus the three penalties.

use serde::{Deserialize, Serialize};

/// Full result of exactly scoring one seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub seed: u64,

    /// Estimated spectral slope; NaN when the radial fit was degenerate.
    pub alpha_est: f64,

    /// `-(alpha_est - target).abs()`, or a fixed penalty when NaN.
    pub alpha_score: f64,

    pub peakiness: f64,
    pub peakiness_penalty: f64,

    pub flatness: f64,
    pub flatness_penalty: f64,

    pub neighbor_corr: f64,
    pub neighbor_corr_penalty: f64,

    /// `alpha_score + peakiness_penalty + flatness_penalty + neighbor_corr_penalty`.
    pub total_score: f64,
}

impl ScoreResult {
    /// Whether every component is finite. Scores with non-finite components
    /// never enter the submission path.
    pub fn is_finite(&self) -> bool {
        self.total_score.is_finite()
            && self.alpha_score.is_finite()
            && self.peakiness_penalty.is_finite()
            && self.flatness_penalty.is_finite()
            && self.neighbor_corr_penalty.is_finite()
    }
}
