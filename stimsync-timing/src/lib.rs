pub mod timer;

pub use timer::{
    Clock, FrameProfiler, FrameSummary, IntervalStats, ManualClock, SystemClock,
    high_precision_sleep, percentile,
};
