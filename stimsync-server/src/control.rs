use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use stimsync_core::{Command, decode_batch, encode_batch};
use stimsync_timing::Clock;
use tracing::{debug, info, warn};

use crate::error::ControlError;
use crate::fanout::{FanoutReport, StimServer};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Control surface of the controller. Serves one client at a time; each
/// request line is answered with one `FanoutReport` line.
pub struct ControlListener {
    listener: TcpListener,
}

impl ControlListener {
    pub fn bind(addr: &str) -> Result<Self, ControlError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        info!(addr = %listener.local_addr()?, "control listener bound");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ControlError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts clients until `shutdown` is set.
    pub fn serve<C: Clock>(
        &self,
        server: &mut StimServer<C>,
        shutdown: &AtomicBool,
    ) -> Result<(), ControlError> {
        while !shutdown.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    info!(%peer, "controller client connected");
                    if let Err(e) = serve_client(stream, server, shutdown) {
                        warn!(%peer, error = %e, "controller client failed");
                    }
                    info!(%peer, "controller client disconnected");
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn serve_client<C: Clock>(
    stream: TcpStream,
    server: &mut StimServer<C>,
    shutdown: &AtomicBool,
) -> Result<(), ControlError> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();

    while !shutdown.load(Ordering::Relaxed) {
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => return Err(e.into()),
        }
        let text = line.trim_ascii();
        if !text.is_empty() {
            let report = match decode_batch(text) {
                Ok(batch) => {
                    debug!(batch_len = batch.len(), "control batch received");
                    server.handle_batch(batch)
                }
                Err(e) => {
                    warn!(error = %e, "rejecting control request");
                    FanoutReport::rejected(e.to_string())
                }
            };
            let mut reply = serde_json::to_vec(&report)?;
            reply.push(b'\n');
            writer.write_all(&reply)?;
        }
        line.clear();
    }
    Ok(())
}

/// Client side of the control surface.
pub struct ControlClient {
    reader: BufReader<TcpStream>,
}

impl ControlClient {
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self, ControlError> {
        let mut last_err = std::io::Error::from(ErrorKind::NotFound);
        for addr in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(timeout))?;
                    stream.set_write_timeout(Some(timeout))?;
                    return Ok(Self {
                        reader: BufReader::new(stream),
                    });
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err.into())
    }

    /// Sends a batch and waits for the controller's report.
    pub fn send_batch(&mut self, batch: &[Command]) -> Result<FanoutReport, ControlError> {
        let line = encode_batch(batch)?;
        self.reader.get_mut().write_all(&line)?;
        let mut reply = String::new();
        if self.reader.read_line(&mut reply)? == 0 {
            return Err(ControlError::Closed);
        }
        Ok(serde_json::from_str(&reply)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stimsync_timing::ManualClock;

    #[test]
    fn client_gets_one_report_per_request() {
        let listener = ControlListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let shutdown = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&shutdown);
        let serving = thread::spawn(move || {
            let mut server = StimServer::new(ManualClock::new(1.0), ["start_stim"]);
            listener.serve(&mut server, &flag)
        });

        let mut client = ControlClient::connect(&addr, Duration::from_secs(2)).unwrap();
        let report = client
            .send_batch(&[Command::new("start_stim"), Command::new("stop_stim")])
            .unwrap();
        assert_eq!(report.batch_len, 2);
        assert!(report.is_complete());

        client.reader.get_mut().write_all(b"{not json\n").unwrap();
        let mut reply = String::new();
        client.reader.read_line(&mut reply).unwrap();
        let rejected: FanoutReport = serde_json::from_str(&reply).unwrap();
        assert!(rejected.error.is_some());

        drop(client);
        shutdown.store(true, Ordering::Relaxed);
        serving.join().unwrap().unwrap();
    }
}
