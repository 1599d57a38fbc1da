use std::io::{ErrorKind, Read};
use std::net::TcpStream;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{MalformedTrackerFrame, TrackerError};

const LINE_START: &str = "FT";
const READ_CHUNK: usize = 4096;
/// An unterminated partial line is discarded past this size.
const MAX_PENDING: usize = 64 * 1024;

/// Token positions in a tracker line, counted after the `FT` marker.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerLayout {
    pub frame_index: usize,
    pub heading_index: usize,
    pub timestamp_index: usize,
    pub square_index: usize,
    /// Tokens per line including the marker.
    pub token_count: usize,
    /// Multiplier bringing tracker timestamps to seconds.
    pub timestamp_scale: f64,
}

impl Default for TrackerLayout {
    fn default() -> Self {
        Self {
            frame_index: 0,
            heading_index: 16,
            timestamp_index: 21,
            square_index: 25,
            token_count: 27,
            timestamp_scale: 1.0,
        }
    }
}

impl TrackerLayout {
    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            self.frame_index,
            self.heading_index,
            self.timestamp_index,
            self.square_index,
        ];
        if let Some(index) = fields.iter().find(|&&i| i + 1 >= self.token_count) {
            return Err(format!(
                "tracker field index {index} does not fit a {}-token line",
                self.token_count
            ));
        }
        if !(self.timestamp_scale.is_finite() && self.timestamp_scale > 0.0) {
            return Err("tracker timestamp_scale must be positive".to_string());
        }
        Ok(())
    }

    fn parse(&self, line: &str) -> Result<TrackerFrame, MalformedTrackerFrame> {
        let malformed = |reason: String| MalformedTrackerFrame {
            line: line.to_string(),
            reason,
        };
        let tokens: Vec<&str> = line.split(',').map(str::trim).collect();
        if tokens.len() != self.token_count {
            return Err(malformed(format!(
                "expected {} tokens, got {}",
                self.token_count,
                tokens.len()
            )));
        }
        let number = |index: usize, field: &str| -> Result<f64, MalformedTrackerFrame> {
            tokens[index + 1]
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| malformed(format!("bad {field} `{}`", tokens[index + 1])))
        };
        let frame = number(self.frame_index, "frame number")?;
        if frame < 0.0 || frame.fract() != 0.0 {
            return Err(malformed(format!("bad frame number `{frame}`")));
        }
        Ok(TrackerFrame {
            frame_number: frame as u64,
            heading: number(self.heading_index, "heading")?,
            timestamp: number(self.timestamp_index, "timestamp")? * self.timestamp_scale,
            sync_square: number(self.square_index, "sync square")?,
        })
    }
}

/// One tracker sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerFrame {
    pub frame_number: u64,
    /// Integrated heading, radians.
    pub heading: f64,
    /// Seconds, after `timestamp_scale`.
    pub timestamp: f64,
    /// Brightness of the corner square as seen by the camera.
    pub sync_square: f64,
}

/// Result of a single read from the tracker stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Frame(TrackerFrame),
    /// No complete line yet.
    Incomplete,
    Malformed(MalformedTrackerFrame),
    /// The stream reached EOF.
    Closed,
}

/// Incremental reader over a FicTrac-style text stream.
///
/// Only the newest complete line of each read is parsed; older buffered
/// lines are skipped so the consumer never falls behind the tracker.
pub struct TrackerReader<R> {
    source: R,
    layout: TrackerLayout,
    max_attempts: usize,
    pending: String,
}

impl TrackerReader<TcpStream> {
    pub fn connect(
        addr: &str,
        layout: TrackerLayout,
        max_attempts: usize,
        read_timeout: Duration,
    ) -> Result<Self, TrackerError> {
        let stream = TcpStream::connect(addr).map_err(|source| TrackerError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        stream.set_read_timeout(Some(read_timeout))?;
        debug!(addr, "connected to tracker");
        Ok(Self::new(stream, layout, max_attempts))
    }
}

impl<R: Read> TrackerReader<R> {
    pub fn new(source: R, layout: TrackerLayout, max_attempts: usize) -> Self {
        Self {
            source,
            layout,
            max_attempts: max_attempts.max(1),
            pending: String::new(),
        }
    }

    pub fn layout(&self) -> &TrackerLayout {
        &self.layout
    }

    /// One read from the source followed by a parse of whatever is buffered.
    pub fn read_attempt(&mut self) -> Result<ReadOutcome, TrackerError> {
        let mut chunk = [0u8; READ_CHUNK];
        let len = match self.source.read(&mut chunk) {
            Ok(0) => return Ok(ReadOutcome::Closed),
            Ok(len) => len,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Ok(ReadOutcome::Incomplete);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(ReadOutcome::Incomplete),
            Err(e) => return Err(e.into()),
        };
        self.pending.push_str(&String::from_utf8_lossy(&chunk[..len]));
        Ok(self.take_line())
    }

    fn take_line(&mut self) -> ReadOutcome {
        let Some(end) = self.pending.rfind('\n') else {
            if let Some(start) = self.pending.rfind(LINE_START) {
                self.pending.replace_range(..start, "");
            }
            if self.pending.len() > MAX_PENDING {
                self.pending.clear();
            }
            return ReadOutcome::Incomplete;
        };

        let rest = self.pending.split_off(end + 1);
        let buffered = std::mem::replace(&mut self.pending, rest);
        let complete = buffered.trim_end_matches(['\n', '\r']);
        match complete.rfind(LINE_START) {
            Some(start) => match self.layout.parse(&complete[start..]) {
                Ok(frame) => ReadOutcome::Frame(frame),
                Err(e) => ReadOutcome::Malformed(e),
            },
            None => ReadOutcome::Malformed(MalformedTrackerFrame {
                line: complete.to_string(),
                reason: "no line start".to_string(),
            }),
        }
    }

    /// Reads until a frame arrives, the stream closes, or `max_attempts`
    /// reads produced nothing usable.
    pub fn next_frame(&mut self) -> Result<Option<TrackerFrame>, TrackerError> {
        for _ in 0..self.max_attempts {
            match self.read_attempt()? {
                ReadOutcome::Frame(frame) => return Ok(Some(frame)),
                ReadOutcome::Closed => return Ok(None),
                ReadOutcome::Malformed(e) => warn!(error = %e, "discarding tracker line"),
                ReadOutcome::Incomplete => {}
            }
        }
        Err(TrackerError::NoFrame {
            attempts: self.max_attempts,
        })
    }
}
