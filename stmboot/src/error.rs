//! Error types for stmboot.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::updater::{Stage, UpdateState};

/// Result type for stmboot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for stmboot operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Firmware file does not exist.
    #[error("Firmware file does not exist: {}", .0.display())]
    FirmwareNotFound(PathBuf),

    /// Firmware image cannot be sent to the bootloader.
    #[error("Invalid firmware: {0}")]
    InvalidFirmware(String),

    /// The checksum implementation disagrees with a known-good vector.
    #[error(
        "Checksum self-test failed for {input:08X?}: expected {expected:#010x}, got {actual:#010x}"
    )]
    SelfTestFailed {
        /// Input words of the failing vector.
        input: &'static [u32],
        /// Expected checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// Bootloader did not announce itself after the initial echo.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Echo probe got no answer.
    #[error("Bootloader did not respond to {attempts} echo attempts")]
    ProbeFailed {
        /// Number of echo attempts made.
        attempts: usize,
    },

    /// A protocol stage did not receive its acknowledgement in time.
    #[error("{stage} timed out after {} ms", timeout.as_millis())]
    StageTimeout {
        /// Stage that was waiting.
        stage: Stage,
        /// Budget that elapsed.
        timeout: Duration,
    },

    /// Device did not confirm the firmware checksum.
    #[error("Firmware unverified: device rejected checksum {checksum:#010x} or did not respond")]
    ChecksumMismatch {
        /// Checksum sent to the device.
        checksum: u32,
    },

    /// An update step was called out of order.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// Step that was attempted.
        operation: &'static str,
        /// State the updater was in.
        state: UpdateState,
    },

    /// No serial port was found.
    #[error("No serial port found")]
    DeviceNotFound,

    /// Unsupported operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns the protocol stage this error aborted, if any.
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            Self::HandshakeFailed(_) => Some(Stage::Handshake),
            Self::ProbeFailed { .. } => Some(Stage::Probe),
            Self::StageTimeout { stage, .. } => Some(*stage),
            Self::ChecksumMismatch { .. } => Some(Stage::Verify),
            _ => None,
        }
    }
}
