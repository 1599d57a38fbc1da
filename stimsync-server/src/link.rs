use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::DeliveryFailure;

/// Outbound connection to one screen process.
pub trait ScreenLink: Send {
    fn name(&self) -> &str;

    /// Writes one encoded batch line. At most once; no retry.
    fn send(&mut self, line: &[u8]) -> Result<(), DeliveryFailure>;
}

/// Lazily connected TCP link. A failed write drops the connection and the
/// next batch reconnects.
#[derive(Debug)]
pub struct TcpScreenLink {
    name: String,
    addr: String,
    connect_timeout: Duration,
    write_timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpScreenLink {
    pub fn new(
        name: impl Into<String>,
        addr: impl Into<String>,
        connect_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            connect_timeout,
            write_timeout,
            stream: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn connect(&self) -> io::Result<TcpStream> {
        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "address did not resolve");
        for addr in self.addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_write_timeout(Some(self.write_timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        if self.stream.is_none() {
            let stream = self.connect()?;
            info!(screen = %self.name, addr = %self.addr, "connected to screen");
            self.stream = Some(stream);
        }
        match self.stream.as_mut() {
            Some(stream) => {
                stream.write_all(line)?;
                stream.flush()
            }
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }
}

impl ScreenLink for TcpScreenLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, line: &[u8]) -> Result<(), DeliveryFailure> {
        self.write_line(line).map_err(|source| {
            if self.stream.take().is_some() {
                debug!(screen = %self.name, "dropping screen connection");
            }
            DeliveryFailure {
                screen: self.name.clone(),
                source,
            }
        })
    }
}
