//! Port abstraction for serial communication with the bootloader.
//!
//! Two layers live here:
//!
//! - [`Port`]: a byte-level duplex channel (serial port, mock, ...).
//! - [`Transport`]: the line-level contract the protocol layer needs, i.e.
//!   raw writes plus newline-framed reads with a per-call timeout.
//!
//! ```text
//! +-------------------------+
//! | Updater / Command Codec |
//! +------------+------------+
//!              |
//!              v
//! +------------+------------+
//! |  Transport (LineTransport)
//! +------------+------------+
//!              |
//!              v
//! +------------+------------+
//! |   Port (NativePort)     |
//! +-------------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

pub mod line;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Baud rate spoken by the bootloader.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Default per-read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Per-read timeout, independent of protocol stage budgets.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the per-read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Byte-level port used underneath [`Transport`].
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Discard pending input and output.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Line-oriented duplex channel required by the protocol layer.
pub trait Transport {
    /// Write raw bytes.
    fn write_bytes(&mut self, data: &[u8]) -> Result<()>;

    /// Read one newline-terminated line, without the terminator.
    ///
    /// Returns `Ok(None)` when no complete line arrived within `timeout`.
    /// Partial lines are never returned.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>>;

    /// Drop any input received so far.
    fn discard_input(&mut self) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        (**self).write_bytes(data)
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        (**self).read_line(timeout)
    }

    fn discard_input(&mut self) -> Result<()> {
        (**self).discard_input()
    }
}

pub use line::LineTransport;

#[cfg(feature = "native")]
pub use native::NativePort;
