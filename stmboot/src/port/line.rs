//! Newline framing over a byte-level [`Port`].

use std::io::ErrorKind;
use std::time::{Duration, Instant};

use log::trace;

use crate::error::{Error, Result};
use crate::port::{Port, Transport};

/// Size of a single read from the port.
const READ_CHUNK: usize = 256;

/// [`Transport`] implementation that frames a [`Port`] into text lines.
///
/// Bytes after the last newline are kept for the next [`read_line`] call, so
/// a line split across reads (or across protocol stages) is never lost.
///
/// [`read_line`]: Transport::read_line
pub struct LineTransport<P: Port> {
    port: P,
    pending: Vec<u8>,
}

impl<P: Port> LineTransport<P> {
    /// Wrap an open port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            pending: Vec::new(),
        }
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the transport and return the underlying port.
    pub fn into_inner(self) -> P {
        self.port
    }

    /// Pop the first complete line out of the pending buffer.
    fn take_line(&mut self) -> Option<String> {
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

impl<P: Port> Transport for LineTransport<P> {
    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all_bytes(data)
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        if self.port.timeout() != timeout {
            self.port.set_timeout(timeout)?;
        }

        let start = Instant::now();
        let mut buf = [0u8; READ_CHUNK];
        let mut polled = false;

        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            // Poll the port at least once, even with a zero budget.
            if polled && start.elapsed() >= timeout {
                if !self.pending.is_empty() {
                    trace!("Holding {} bytes of partial line", self.pending.len());
                }
                return Ok(None);
            }
            polled = true;

            match self.port.read(&mut buf) {
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {},
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    fn discard_input(&mut self) -> Result<()> {
        self.pending.clear();
        self.port.clear_buffers()
    }
}
