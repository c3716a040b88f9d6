//! Status snapshot for the UI bridge
//!
//! Aggregates the shared trackers into one immutable report. The CLI logs
//! it periodically; a richer terminal frontend can render the same struct.

use std::fmt;
use std::sync::Arc;

use seedhunt_core::{ApproxBestTracker, BestTracker, ExploreStats, ScoreResult, StatsSnapshot};
use seedhunt_net::SubmissionManager;

use crate::adaptive::{AdaptiveMargin, AdaptiveScoreShift};

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub stats: StatsSnapshot,
    pub best: Option<ScoreResult>,
    pub approx_best: Option<(u64, f32)>,
    pub margin: f64,
    pub margin_trend: &'static str,
    pub shift: f64,
    pub shift_trend: &'static str,
    pub pending_submissions: usize,
    pub submission_threshold: f64,
}

impl StatusReport {
    pub fn gather(
        stats: &Arc<ExploreStats>,
        best: &Arc<BestTracker>,
        approx_best: &Arc<ApproxBestTracker>,
        margin: &Arc<AdaptiveMargin>,
        shift: &Arc<AdaptiveScoreShift>,
        submit: Option<&Arc<SubmissionManager>>,
    ) -> Self {
        Self {
            stats: stats.snapshot(),
            best: best.current(),
            approx_best: approx_best.current(),
            margin: margin.current(),
            margin_trend: margin.trend_symbol(),
            shift: shift.current(),
            shift_trend: shift.trend_symbol(),
            pending_submissions: submit.map(|s| s.pending_len()).unwrap_or(0),
            submission_threshold: submit.map(|s| s.threshold()).unwrap_or(f64::INFINITY),
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu {} gpu {} verified {} | best {} | margin {:.3}{} shift {:.3}{} | pending {} accepted {}",
            self.stats.cpu_scored,
            self.stats.gpu_scored,
            self.stats.verified,
            self.best
                .as_ref()
                .map(|b| format!("{:.4}@{}", b.total_score, b.seed))
                .unwrap_or_else(|| "-".into()),
            self.margin,
            self.margin_trend,
            self.shift,
            self.shift_trend,
            self.pending_submissions,
            self.stats.accepted,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_and_render_without_submission() {
        let stats = Arc::new(ExploreStats::new());
        stats.record_exact_batch(3, -27.0, 243.0);
        let report = StatusReport::gather(
            &stats,
            &Arc::new(BestTracker::new()),
            &Arc::new(ApproxBestTracker::new()),
            &Arc::new(AdaptiveMargin::default()),
            &Arc::new(AdaptiveScoreShift::default()),
            None,
        );
        assert_eq!(report.stats.cpu_scored, 3);
        assert_eq!(report.pending_submissions, 0);
        let line = report.to_string();
        assert!(line.contains("cpu 3"));
        assert!(line.contains("best -"));
    }
}
