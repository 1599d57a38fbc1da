pub mod estimator;
pub mod report;

pub use estimator::{
    InsufficientOverlap, LatencyError, calculate_lag, estimate, linspace, resample,
};
pub use report::{GlobalLag, LatencyReport, LocalLag};
