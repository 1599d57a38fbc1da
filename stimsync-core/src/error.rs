use thiserror::Error;

/// A trajectory could not be built from its control points.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidTrajectory {
    #[error("trajectory needs at least one control point")]
    Empty,
    #[error("control point {index} has a non-finite time or value")]
    NonFinite { index: usize },
}

/// Stimulus parameters were rejected by `configure`.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("unknown stimulus '{0}'")]
    UnknownStimulus(String),

    #[error("invalid configuration for {stimulus}: {source}")]
    Invalid {
        stimulus: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {stimulus}.{param}: {reason}")]
    Value {
        stimulus: &'static str,
        param: &'static str,
        reason: String,
    },
}
