use std::io::{BufRead, BufReader, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use stimsync_core::{Command, decode_batch};
use tracing::{debug, info, warn};

use crate::error::TransportError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Anything the render loop can pull whole command batches from.
pub trait CommandSource {
    /// Every batch received since the last call, oldest first. Never blocks.
    fn drain(&mut self) -> Vec<Vec<Command>>;
}

impl CommandSource for Receiver<Vec<Command>> {
    fn drain(&mut self) -> Vec<Vec<Command>> {
        self.try_iter().collect()
    }
}

/// TCP endpoint receiving newline-delimited JSON batches from the controller.
///
/// Each connection gets a reader thread that decodes complete lines and
/// queues them; the render loop takes them with [`CommandSource::drain`].
pub struct CommandInbox {
    local_addr: SocketAddr,
    batches: Receiver<Vec<Command>>,
    shutdown: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl CommandInbox {
    pub fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = channel::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&shutdown);
        let acceptor = thread::Builder::new()
            .name("command-inbox".to_string())
            .spawn(move || accept_loop(listener, tx, flag))?;

        info!(addr = %local_addr, "command inbox listening");
        Ok(Self {
            local_addr,
            batches: rx,
            shutdown,
            acceptor: Some(acceptor),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl CommandSource for CommandInbox {
    fn drain(&mut self) -> Vec<Vec<Command>> {
        self.batches.try_iter().collect()
    }
}

impl Drop for CommandInbox {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
    }
}

fn accept_loop(listener: TcpListener, tx: Sender<Vec<Command>>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "controller connected");
                let tx = tx.clone();
                let flag = Arc::clone(&shutdown);
                let spawned = thread::Builder::new()
                    .name(format!("command-reader-{peer}"))
                    .spawn(move || {
                        if let Err(e) = read_batches(stream, &tx, &flag) {
                            warn!(%peer, error = %e, "command connection failed");
                        }
                        debug!(%peer, "controller disconnected");
                    });
                if let Err(e) = spawned {
                    warn!(%peer, error = %e, "cannot spawn command reader");
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                warn!(error = %e, "accept failed");
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

fn read_batches(
    stream: TcpStream,
    tx: &Sender<Vec<Command>>,
    shutdown: &AtomicBool,
) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();

    while !shutdown.load(Ordering::Relaxed) {
        // A timed-out read keeps the partial line in `line`.
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => return Ok(()),
            Ok(_) if line.last() != Some(&b'\n') => return Ok(()),
            Ok(_) => {}
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => return Err(e),
        }

        let text = line.trim_ascii();
        if !text.is_empty() {
            match decode_batch(text) {
                Ok(batch) => {
                    if tx.send(batch).is_err() {
                        return Ok(());
                    }
                }
                Err(e) => warn!(error = %e, "dropping undecodable batch"),
            }
        }
        line.clear();
    }
    Ok(())
}
