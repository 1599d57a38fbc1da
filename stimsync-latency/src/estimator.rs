use serde::Serialize;
use stimsync_core::{InvalidTrajectory, SyncTrace, Trajectory};
use stimsync_timing::IntervalStats;
use thiserror::Error;
use tracing::{debug, warn};

use crate::report::{GlobalLag, LatencyReport, LocalLag};

#[derive(Debug, Error)]
pub enum LatencyError {
    #[error("{trace} trace has {timestamps} timestamps but {states} states")]
    LengthMismatch {
        trace: &'static str,
        timestamps: usize,
        states: usize,
    },
    #[error("{trace} trace has {samples} usable samples, need at least 2")]
    TooShort { trace: &'static str, samples: usize },
    #[error("{trace} trace: {source}")]
    InvalidSamples {
        trace: &'static str,
        #[source]
        source: InvalidTrajectory,
    },
    #[error("tracker trace has no positive mean frame interval")]
    DegenerateInterval,
    #[error("traces do not overlap in time ({start:.3}..{end:.3})")]
    NoOverlap { start: f64, end: f64 },
}

/// Local lag windows do not fit into the overlapping recording.
#[derive(Debug, Clone, Copy, PartialEq, Error, Serialize)]
#[error("window of {window_size}s does not fit a {duration:.3}s overlap")]
pub struct InsufficientOverlap {
    pub window_size: f64,
    pub duration: f64,
}

/// Evenly spaced points from `start` to `stop` inclusive; the last point is
/// exactly `stop`.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            let mut points: Vec<f64> = (0..n).map(|i| start + i as f64 * step).collect();
            points[n - 1] = stop;
            points
        }
    }
}

pub fn resample(trajectory: &Trajectory, grid: &[f64]) -> Vec<f64> {
    grid.iter().map(|&t| trajectory.eval_at(t)).collect()
}

/// Shift, in samples, that best aligns `tracker` onto `display`.
///
/// Full cross-correlation `c[k] = sum_n tracker[n + k] * display[n]` over
/// `k = -(len(display) - 1) ..= len(tracker) - 1`; the first maximum wins.
/// Positive means the tracker trails the display.
pub fn calculate_lag(display: &[f64], tracker: &[f64]) -> i64 {
    if display.is_empty() || tracker.is_empty() {
        return 0;
    }
    let m = display.len() as i64;
    let len = tracker.len() as i64;
    let mut best_lag = -(m - 1);
    let mut best = f64::NEG_INFINITY;
    for k in -(m - 1)..len {
        let lo = (-k).max(0);
        let hi = m.min(len - k);
        let c: f64 = (lo..hi)
            .map(|n| tracker[(n + k) as usize] * display[n as usize])
            .sum();
        if c > best {
            best = c;
            best_lag = k;
        }
    }
    best_lag
}

struct Prepared {
    trajectory: Trajectory,
    stats: IntervalStats,
    start: f64,
    end: f64,
}

fn prepare(name: &'static str, trace: &SyncTrace) -> Result<Prepared, LatencyError> {
    if trace.timestamps.len() != trace.states.len() {
        return Err(LatencyError::LengthMismatch {
            trace: name,
            timestamps: trace.timestamps.len(),
            states: trace.states.len(),
        });
    }
    let trace = trace.without_unset();
    if trace.len() < 2 {
        return Err(LatencyError::TooShort {
            trace: name,
            samples: trace.len(),
        });
    }
    let trajectory = Trajectory::from_points(
        trace
            .timestamps
            .iter()
            .copied()
            .zip(trace.states.iter().copied()),
    )
    .map_err(|source| LatencyError::InvalidSamples {
        trace: name,
        source,
    })?;
    Ok(Prepared {
        stats: IntervalStats::from_timestamps(&trace.timestamps),
        start: trajectory.start_time(),
        end: trajectory.end_time(),
        trajectory,
    })
}

fn samples_in(span: f64, dt: f64) -> usize {
    1 + (span / dt).floor() as usize
}

/// Compares the display's own sync record with what the tracker saw.
///
/// Both traces are resampled at the tracker's mean frame interval over their
/// common time span. `n_windows` windows of `window_size` seconds give the
/// local lag spread; they are skipped with a warning when a window does not
/// fit.
pub fn estimate(
    display: &SyncTrace,
    tracker: &SyncTrace,
    window_size: f64,
    n_windows: usize,
) -> Result<LatencyReport, LatencyError> {
    let display = prepare("display", display)?;
    let tracker = prepare("tracker", tracker)?;

    let dt = tracker.stats.mean;
    if !(dt.is_finite() && dt > 0.0) {
        return Err(LatencyError::DegenerateInterval);
    }
    let start = display.start.max(tracker.start);
    let end = display.end.min(tracker.end);
    if end <= start {
        return Err(LatencyError::NoOverlap { start, end });
    }
    let duration = end - start;

    let grid = linspace(start, end, samples_in(duration, dt));
    let samples = calculate_lag(
        &resample(&display.trajectory, &grid),
        &resample(&tracker.trajectory, &grid),
    );
    let global = GlobalLag {
        samples,
        ms: samples as f64 * dt * 1e3,
    };
    debug!(samples, grid = grid.len(), dt, "global lag");

    let local = if window_size >= duration || n_windows == 0 || window_size <= 0.0 {
        let skipped = InsufficientOverlap {
            window_size,
            duration,
        };
        warn!(%skipped, "local lag skipped");
        Err(skipped)
    } else {
        let points = samples_in(window_size, dt);
        let lags_ms: Vec<f64> = linspace(start, end - window_size, n_windows)
            .into_iter()
            .map(|s| {
                let window = linspace(s, s + window_size, points);
                calculate_lag(
                    &resample(&display.trajectory, &window),
                    &resample(&tracker.trajectory, &window),
                ) as f64
                    * dt
                    * 1e3
            })
            .collect();
        let n = lags_ms.len() as f64;
        let mean_ms = lags_ms.iter().sum::<f64>() / n;
        let std_ms = (lags_ms.iter().map(|l| (l - mean_ms).powi(2)).sum::<f64>() / n).sqrt();
        Ok(LocalLag {
            windows: n_windows,
            window_size,
            lags_ms,
            mean_ms,
            std_ms,
        })
    };

    Ok(LatencyReport {
        display: display.stats,
        tracker: tracker.stats,
        resample_interval: dt,
        global,
        local,
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const DT: f64 = 0.25;

    /// Display and tracker traces on the same clock, tracker `delay` samples
    /// behind.
    fn shifted_traces(n: usize, delay: usize) -> (SyncTrace, SyncTrace) {
        let mut rng = StdRng::seed_from_u64(7);
        let bits: Vec<f64> = (0..n + delay)
            .map(|_| if rng.random_bool(0.5) { 1.0 } else { 0.0 })
            .collect();
        let timestamps: Vec<f64> = (0..n).map(|i| 1.0 + i as f64 * DT).collect();
        let display = SyncTrace::new(timestamps.clone(), bits[delay..].to_vec());
        let tracker = SyncTrace::new(timestamps, bits[..n].to_vec());
        (display, tracker)
    }

    #[test]
    fn lag_sign_follows_tracker_delay() {
        let display = [0.0, 1.0, 0.0, 0.0, 0.0];
        let tracker = [0.0, 0.0, 0.0, 1.0, 0.0];
        assert_eq!(calculate_lag(&display, &tracker), 2);
        assert_eq!(calculate_lag(&tracker, &display), -2);
        assert_eq!(calculate_lag(&display, &display), 0);
    }

    #[test]
    fn first_maximum_wins() {
        assert_eq!(calculate_lag(&[1.0], &[1.0, 1.0, 1.0]), 0);
        assert_eq!(calculate_lag(&[0.0, 0.0], &[0.0, 0.0]), -1);
    }

    #[test]
    fn linspace_matches_endpoints() {
        assert_eq!(linspace(0.0, 1.0, 5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(linspace(3.0, 9.0, 1), vec![3.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
        assert_eq!(*linspace(0.1, 0.7, 7).last().unwrap(), 0.7);
    }

    #[test]
    fn recovers_shift_globally_and_locally() {
        let (display, tracker) = shifted_traces(401, 3);
        let report = estimate(&display, &tracker, 20.0, 9).unwrap();

        assert_eq!(report.resample_interval, DT);
        assert_eq!(report.duration, 100.0);
        assert_eq!(report.global.samples, 3);
        assert!((report.global.ms - 750.0).abs() < 1e-9);

        let local = report.local.as_ref().unwrap();
        assert_eq!(local.lags_ms.len(), 9);
        assert!((local.mean_ms - 750.0).abs() < 1e-9);
        assert!(local.std_ms < 1e-9);
        assert!((report.tracker.effective_rate - 4.0).abs() < 1e-12);

        let table = report.to_string();
        assert!(table.contains("Globally optimal lag: 750.0ms"));
        assert!(table.contains("Local lag (9 20s windows): 750.0ms mean, 0.0ms std"));
    }

    #[test]
    fn oversized_window_still_reports_global_lag() {
        let (display, tracker) = shifted_traces(81, 2);
        let report = estimate(&display, &tracker, 60.0, 4).unwrap();
        assert_eq!(report.global.samples, 2);
        assert_eq!(
            report.local,
            Err(InsufficientOverlap {
                window_size: 60.0,
                duration: 20.0
            })
        );
        assert!(report.to_string().contains("Local lag skipped"));
    }

    #[test]
    fn unset_timestamps_are_ignored() {
        let (mut display, tracker) = shifted_traces(201, 1);
        display.timestamps.insert(0, 0.0);
        display.states.insert(0, 1.0);
        display.timestamps.push(0.0);
        display.states.push(1.0);

        let report = estimate(&display, &tracker, 10.0, 3).unwrap();
        assert_eq!(report.global.samples, 1);
        assert_eq!(report.display.count, 200);
    }

    #[test]
    fn rejects_unusable_traces() {
        let short = SyncTrace::new(vec![0.0, 5.0], vec![1.0, 0.0]);
        let (display, tracker) = shifted_traces(20, 0);
        assert!(matches!(
            estimate(&short, &tracker, 1.0, 1),
            Err(LatencyError::TooShort {
                trace: "display",
                samples: 1
            })
        ));

        let bad = SyncTrace::new(vec![1.0, 2.0], vec![1.0]);
        assert!(matches!(
            estimate(&display, &bad, 1.0, 1),
            Err(LatencyError::LengthMismatch { trace: "tracker", .. })
        ));

        let later = SyncTrace::new(vec![500.0, 500.5, 501.0], vec![0.0, 1.0, 0.0]);
        assert!(matches!(
            estimate(&display, &later, 1.0, 1),
            Err(LatencyError::NoOverlap { .. })
        ));
    }
}
