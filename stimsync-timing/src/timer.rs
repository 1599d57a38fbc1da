use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock source shared by the controller and every screen.
///
/// Readings are seconds since the UNIX epoch so that timestamps taken in one
/// process are meaningful in another on the same machine or NTP domain.
pub trait Clock: Clone + Send + Sync {
    fn now(&self) -> f64;
    fn sleep(&self, d: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    fn sleep(&self, d: Duration) {
        high_precision_sleep(d)
    }
}

/// Clock that only moves when told to. `sleep` advances it.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, t: f64) {
        *self.now.lock() = t;
    }

    pub fn advance(&self, dt: f64) {
        *self.now.lock() += dt;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }

    fn sleep(&self, d: Duration) {
        self.advance(d.as_secs_f64())
    }
}

pub fn high_precision_sleep(duration: Duration) {
    #[cfg(target_os = "linux")]
    linux_sleep(duration);
    #[cfg(not(target_os = "linux"))]
    std::thread::sleep(duration);
}

#[cfg(target_os = "linux")]
fn linux_sleep(duration: Duration) {
    use libc::{clock_nanosleep, timespec, CLOCK_MONOTONIC};

    let req = timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    };

    unsafe {
        clock_nanosleep(CLOCK_MONOTONIC, 0, &req, std::ptr::null_mut());
    }
}

/// Descriptive statistics over a series of intervals, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct IntervalStats {
    pub count: usize,
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    pub min: f64,
    pub max: f64,
    /// `1 / mean`, or zero when there are no intervals.
    pub effective_rate: f64,
}

impl IntervalStats {
    pub fn from_intervals(intervals: &[f64]) -> Self {
        if intervals.is_empty() {
            return Self::default();
        }
        let n = intervals.len() as f64;
        let mean = intervals.iter().sum::<f64>() / n;
        let var = intervals.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let min = intervals.iter().copied().fold(f64::INFINITY, f64::min);
        let max = intervals.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self {
            count: intervals.len(),
            mean,
            std: var.sqrt(),
            min,
            max,
            effective_rate: if mean > 0.0 { 1.0 / mean } else { 0.0 },
        }
    }

    /// Stats over the successive differences of a timestamp series.
    pub fn from_timestamps(timestamps: &[f64]) -> Self {
        let diffs: Vec<f64> = timestamps.windows(2).map(|w| w[1] - w[0]).collect();
        Self::from_intervals(&diffs)
    }
}

pub const SUMMARY_PERCENTILES: [f64; 7] = [1.0, 5.0, 10.0, 50.0, 90.0, 95.0, 99.0];

/// Frame-rate summary emitted when a stimulus is stopped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameSummary {
    pub frames: usize,
    pub duration: f64,
    pub intervals: IntervalStats,
    /// `(percentile, frames per second)` pairs.
    pub fps_percentiles: Vec<(f64, f64)>,
}

/// Records frame-to-frame intervals over one stimulus run.
#[derive(Debug, Clone)]
pub struct FrameProfiler {
    intervals: VecDeque<f64>,
    max_samples: usize,
    started_at: Option<f64>,
    last_frame: Option<f64>,
    frames: usize,
}

impl FrameProfiler {
    pub fn new(max_samples: usize) -> Self {
        Self {
            intervals: VecDeque::with_capacity(max_samples.min(4096)),
            max_samples,
            started_at: None,
            last_frame: None,
            frames: 0,
        }
    }

    pub fn begin(&mut self, now: f64) {
        self.reset();
        self.started_at = Some(now);
    }

    pub fn reset(&mut self) {
        self.intervals.clear();
        self.started_at = None;
        self.last_frame = None;
        self.frames = 0;
    }

    pub fn is_active(&self) -> bool {
        self.started_at.is_some()
    }

    /// Forgets the previous frame so a gap (e.g. a pause) is not recorded
    /// as one long interval.
    pub fn interrupt(&mut self) {
        self.last_frame = None;
    }

    /// Marks a painted frame. Zero-length intervals are discarded.
    pub fn record_frame(&mut self, now: f64) {
        if self.started_at.is_none() {
            return;
        }
        self.frames += 1;
        if let Some(last) = self.last_frame {
            let dt = now - last;
            if dt > 0.0 {
                if self.intervals.len() >= self.max_samples {
                    self.intervals.pop_front();
                }
                self.intervals.push_back(dt);
            }
        }
        self.last_frame = Some(now);
    }

    pub fn summary(&self, now: f64) -> Option<FrameSummary> {
        let started_at = self.started_at?;
        if self.intervals.is_empty() {
            return None;
        }
        let intervals: Vec<f64> = self.intervals.iter().copied().collect();
        let mut fps: Vec<f64> = intervals.iter().map(|dt| 1.0 / dt).collect();
        fps.sort_by(f64::total_cmp);
        Some(FrameSummary {
            frames: self.frames,
            duration: now - started_at,
            intervals: IntervalStats::from_intervals(&intervals),
            fps_percentiles: SUMMARY_PERCENTILES
                .iter()
                .map(|&p| (p, percentile(&fps, p)))
                .collect(),
        })
    }
}

impl Default for FrameProfiler {
    fn default() -> Self {
        Self::new(100_000)
    }
}

/// Linear-interpolated percentile of an ascending slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (p / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_stats_match_hand_computation() {
        let stats = IntervalStats::from_timestamps(&[1.0, 1.5, 2.5, 3.0]);
        assert_eq!(stats.count, 3);
        assert!((stats.mean - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(stats.min, 0.5);
        assert_eq!(stats.max, 1.0);
        assert!((stats.effective_rate - 1.5).abs() < 1e-12);
        let expected_std = ((2.0 * (0.5f64 - 2.0 / 3.0).powi(2) + (1.0f64 - 2.0 / 3.0).powi(2))
            / 3.0)
            .sqrt();
        assert!((stats.std - expected_std).abs() < 1e-12);
    }

    #[test]
    fn empty_intervals_are_all_zero() {
        assert_eq!(IntervalStats::from_intervals(&[]), IntervalStats::default());
    }

    #[test]
    fn profiler_skips_zero_intervals_and_summarizes() {
        let mut profiler = FrameProfiler::new(16);
        assert!(profiler.summary(0.0).is_none());
        profiler.begin(10.0);
        for t in [10.0, 10.25, 10.25, 10.5, 10.75] {
            profiler.record_frame(t);
        }
        let summary = profiler.summary(11.0).unwrap();
        assert_eq!(summary.frames, 5);
        assert_eq!(summary.intervals.count, 3);
        assert_eq!(summary.duration, 1.0);
        assert!(summary.fps_percentiles.iter().all(|(_, fps)| (*fps - 4.0).abs() < 1e-9));
    }

    #[test]
    fn profiler_is_bounded() {
        let mut profiler = FrameProfiler::new(4);
        profiler.begin(0.0);
        for i in 0..20 {
            profiler.record_frame(i as f64);
        }
        assert_eq!(profiler.summary(20.0).unwrap().intervals.count, 4);
    }

    #[test]
    fn percentile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&v, 0.0), 1.0);
        assert_eq!(percentile(&v, 50.0), 2.5);
        assert_eq!(percentile(&v, 100.0), 4.0);
    }

    #[test]
    fn manual_clock_sleep_advances() {
        let clock = ManualClock::new(5.0);
        clock.sleep(Duration::from_millis(250));
        assert_eq!(clock.now(), 5.25);
        let shared = clock.clone();
        shared.set(9.0);
        assert_eq!(clock.now(), 9.0);
    }
}
