use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// One screen did not receive a batch.
#[derive(Debug, Error)]
#[error("delivery to screen `{screen}` failed: {source}")]
pub struct DeliveryFailure {
    pub screen: String,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("malformed tracker line ({reason}): {line}")]
pub struct MalformedTrackerFrame {
    pub line: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("cannot connect to tracker at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("no complete tracker frame after {attempts} reads")]
    NoFrame { attempts: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("cannot write tracker trace {path}: {source}")]
    Trace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("bad control message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("controller closed the connection")]
    Closed,
}
