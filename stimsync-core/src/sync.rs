use serde::{Deserialize, Serialize};

/// State of the corner square at the moment a frame was painted or captured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncSquareSample {
    pub timestamp: f64,
    pub state: f64,
}

/// Column form of a recorded sync-square history, as written to disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncTrace {
    pub timestamps: Vec<f64>,
    pub states: Vec<f64>,
}

impl SyncTrace {
    pub fn new(timestamps: Vec<f64>, states: Vec<f64>) -> Self {
        Self { timestamps, states }
    }

    pub fn push(&mut self, sample: SyncSquareSample) {
        self.timestamps.push(sample.timestamp);
        self.states.push(sample.state);
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Drops samples whose timestamp is exactly zero, the "never captured"
    /// sentinel.
    pub fn without_unset(&self) -> SyncTrace {
        let (timestamps, states) = self
            .timestamps
            .iter()
            .zip(&self.states)
            .filter(|(ts, _)| **ts != 0.0)
            .map(|(ts, s)| (*ts, *s))
            .unzip();
        SyncTrace { timestamps, states }
    }
}

impl FromIterator<SyncSquareSample> for SyncTrace {
    fn from_iter<I: IntoIterator<Item = SyncSquareSample>>(iter: I) -> Self {
        let mut trace = SyncTrace::default();
        for sample in iter {
            trace.push(sample);
        }
        trace
    }
}
