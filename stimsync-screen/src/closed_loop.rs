use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use stimsync_core::{ClosedLoopOffset, OffsetUpdate};
use tracing::{debug, warn};

use crate::error::TransportError;

const READ_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct OffsetCells {
    theta: AtomicU64,
    x: AtomicU64,
    y: AtomicU64,
    z: AtomicU64,
}

/// Latest closed-loop correction, shared between the render loop and writers.
///
/// Every field is an independent last-write-wins cell. A reader racing a
/// position write may observe a mix of old and new coordinates.
#[derive(Debug, Clone, Default)]
pub struct ClosedLoopHandle {
    cells: Arc<OffsetCells>,
}

fn store(cell: &AtomicU64, value: f64) {
    cell.store(value.to_bits(), Ordering::Relaxed);
}

fn load(cell: &AtomicU64) -> f64 {
    f64::from_bits(cell.load(Ordering::Relaxed))
}

impl ClosedLoopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_theta_offset(&self, radians: f64) {
        store(&self.cells.theta, radians);
    }

    pub fn set_position(&self, x: f64, y: f64, z: f64) {
        store(&self.cells.x, x);
        store(&self.cells.y, y);
        store(&self.cells.z, z);
    }

    pub fn apply(&self, update: OffsetUpdate) {
        match update {
            OffsetUpdate::Theta { radians } => self.set_theta_offset(radians),
            OffsetUpdate::Position { x, y, z } => self.set_position(x, y, z),
        }
    }

    pub fn snapshot(&self) -> ClosedLoopOffset {
        ClosedLoopOffset {
            theta_offset: load(&self.cells.theta),
            position: [
                load(&self.cells.x),
                load(&self.cells.y),
                load(&self.cells.z),
            ],
        }
    }
}

/// Background UDP receiver feeding `OffsetUpdate` datagrams into a handle.
pub struct OffsetListener {
    local_addr: std::net::SocketAddr,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl OffsetListener {
    pub fn bind(addr: &str, handle: ClosedLoopHandle) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        let local_addr = socket.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&shutdown);
        let thread = thread::Builder::new()
            .name("offset-listener".to_string())
            .spawn(move || receive_loop(socket, handle, flag))?;

        debug!(addr = %local_addr, "offset listener bound");
        Ok(Self {
            local_addr,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }
}

fn receive_loop(socket: UdpSocket, handle: ClosedLoopHandle, shutdown: Arc<AtomicBool>) {
    let mut buf = [0u8; 1024];
    while !shutdown.load(Ordering::Relaxed) {
        let len = match socket.recv(&mut buf) {
            Ok(len) => len,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            Err(e) => {
                warn!(error = %e, "offset socket receive failed");
                continue;
            }
        };
        match serde_json::from_slice::<OffsetUpdate>(&buf[..len]) {
            Ok(update) => handle.apply(update),
            Err(e) => warn!(error = %e, len, "dropping malformed offset datagram"),
        }
    }
}

impl Drop for OffsetListener {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn handle_clones_share_latest_value() {
        let handle = ClosedLoopHandle::new();
        let writer = handle.clone();
        writer.set_theta_offset(0.25);
        writer.set_theta_offset(-1.5);
        writer.apply(OffsetUpdate::Position {
            x: 1.0,
            y: 2.0,
            z: 3.0,
        });

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.theta_offset, -1.5);
        assert_eq!(snapshot.position, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn listener_applies_datagrams_and_skips_garbage() {
        let handle = ClosedLoopHandle::new();
        let listener = OffsetListener::bind("127.0.0.1:0", handle.clone()).unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

        sender.send_to(b"not json", listener.local_addr()).unwrap();
        sender
            .send_to(br#"{"kind":"theta","radians":0.75}"#, listener.local_addr())
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while handle.snapshot().theta_offset != 0.75 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(handle.snapshot().theta_offset, 0.75);
    }
}
