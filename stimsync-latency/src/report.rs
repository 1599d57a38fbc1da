use std::fmt;

use serde::Serialize;
use stimsync_timing::IntervalStats;

use crate::estimator::InsufficientOverlap;

const TABLE_WIDTH: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GlobalLag {
    /// Grid samples; positive when the tracker trails the display.
    pub samples: i64,
    pub ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalLag {
    pub windows: usize,
    pub window_size: f64,
    pub lags_ms: Vec<f64>,
    pub mean_ms: f64,
    pub std_ms: f64,
}

/// Timing comparison between the display's and the tracker's sync traces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyReport {
    pub display: IntervalStats,
    pub tracker: IntervalStats,
    /// Grid spacing used for resampling, seconds.
    pub resample_interval: f64,
    pub global: GlobalLag,
    pub local: Result<LocalLag, InsufficientOverlap>,
    /// Length of the overlapping part of both recordings, seconds.
    pub duration: f64,
}

impl fmt::Display for LatencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:^20} | {:^16} | {:^16}", "statistic", "display", "tracker")?;
        writeln!(f, "{}", "=".repeat(TABLE_WIDTH))?;

        let rows: [(&str, fn(&IntervalStats) -> f64); 5] = [
            ("mean fps", |s| s.effective_rate),
            ("mean frame length", |s| s.mean),
            ("std frame length", |s| s.std),
            ("min frame length", |s| s.min),
            ("max frame length", |s| s.max),
        ];
        for (label, stat) in rows {
            writeln!(
                f,
                "{:^20} | {:^16.4} | {:^16.4}",
                label,
                stat(&self.display),
                stat(&self.tracker)
            )?;
            writeln!(f, "{}", "-".repeat(TABLE_WIDTH))?;
        }

        writeln!(f, "Globally optimal lag: {:.1}ms", self.global.ms)?;
        match &self.local {
            Ok(local) => writeln!(
                f,
                "Local lag ({} {}s windows): {:.1}ms mean, {:.1}ms std",
                local.windows, local.window_size, local.mean_ms, local.std_ms
            )?,
            Err(skipped) => writeln!(f, "Local lag skipped: {skipped}")?,
        }
        write!(f, "Total length of recording: {:.6} s", self.duration)
    }
}
