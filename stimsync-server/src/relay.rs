use std::fs;
use std::io::{self, Read};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use stimsync_core::{OffsetUpdate, SyncSquareSample, SyncTrace};
use tracing::{debug, info, warn};

use crate::error::TrackerError;
use crate::tracker::{TrackerFrame, TrackerReader};

/// Pushes closed-loop offsets to every screen's side channel.
///
/// The socket is non-blocking; a full buffer or unreachable screen is logged
/// and the update dropped.
pub struct OffsetRelay {
    socket: UdpSocket,
    targets: Vec<SocketAddr>,
}

impl OffsetRelay {
    pub fn new<'a>(targets: impl IntoIterator<Item = &'a str>) -> io::Result<Self> {
        let mut resolved = Vec::new();
        for target in targets {
            resolved.extend(target.to_socket_addrs()?);
        }
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            targets: resolved,
        })
    }

    pub fn targets(&self) -> &[SocketAddr] {
        &self.targets
    }

    /// Returns how many screens the datagram was handed to.
    pub fn send(&self, update: &OffsetUpdate) -> usize {
        let payload = match serde_json::to_vec(update) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "cannot encode offset update");
                return 0;
            }
        };
        let mut sent = 0;
        for target in &self.targets {
            match self.socket.send_to(&payload, target) {
                Ok(_) => sent += 1,
                Err(e) => warn!(%target, error = %e, "offset update dropped"),
            }
        }
        sent
    }
}

/// Turns tracker frames into heading offsets and records the tracker's view
/// of the sync square.
pub struct ClosedLoopDriver<R> {
    reader: TrackerReader<R>,
    relay: OffsetRelay,
    heading_origin: Option<f64>,
    trace: SyncTrace,
    frames: u64,
}

impl<R: Read> ClosedLoopDriver<R> {
    pub fn new(reader: TrackerReader<R>, relay: OffsetRelay) -> Self {
        Self {
            reader,
            relay,
            heading_origin: None,
            trace: SyncTrace::default(),
            frames: 0,
        }
    }

    /// Handles one tracker frame; `Ok(None)` once the tracker stream ends.
    pub fn step(&mut self) -> Result<Option<TrackerFrame>, TrackerError> {
        let Some(frame) = self.reader.next_frame()? else {
            return Ok(None);
        };
        let origin = *self.heading_origin.get_or_insert(frame.heading);
        self.relay.send(&OffsetUpdate::Theta {
            radians: frame.heading - origin,
        });
        self.trace.push(SyncSquareSample {
            timestamp: frame.timestamp,
            state: frame.sync_square,
        });
        self.frames += 1;
        Ok(Some(frame))
    }

    /// Runs until the tracker disconnects or `shutdown` is set.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<(), TrackerError> {
        info!(targets = self.relay.targets().len(), "closed loop started");
        while !shutdown.load(Ordering::Relaxed) {
            match self.step() {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(TrackerError::NoFrame { attempts }) => {
                    debug!(attempts, "tracker quiet");
                }
                Err(e) => return Err(e),
            }
        }
        info!(frames = self.frames, "closed loop finished");
        Ok(())
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn trace(&self) -> &SyncTrace {
        &self.trace
    }

    pub fn into_trace(self) -> SyncTrace {
        self.trace
    }

    pub fn save_trace(&self, path: &Path) -> Result<(), TrackerError> {
        let json = serde_json::to_vec(&self.trace).map_err(io::Error::from)?;
        fs::write(path, json).map_err(|source| TrackerError::Trace {
            path: path.to_path_buf(),
            source,
        })
    }
}
