//! # stmboot
//!
//! A library for updating firmware on STM32 boards through a custom UART
//! bootloader.
//!
//! This crate provides:
//!
//! - STM32 hardware-compatible CRC32 checksums
//! - 5-byte command frames and line-based response matching
//! - A serial transport with newline framing
//! - The update state machine (handshake, size, stream, verify)
//! - Serial port discovery
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use stmboot::{FirmwareImage, LineTransport, LogObserver, UpdateOptions, Updater};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Refuse to flash with a broken checksum engine
//!     stmboot::protocol::crc::self_test()?;
//!
//!     let image = FirmwareImage::from_file("app.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let config = stmboot::SerialConfig::new("/dev/ttyACM0", 115_200);
//!         let port = stmboot::NativePort::open(&config)?;
//!         let mut transport = LineTransport::new(port);
//!
//!         let mut updater =
//!             Updater::connect(&mut transport, LogObserver, UpdateOptions::default())?;
//!         let report = updater.run(&image)?;
//!         println!("Flashed {} bytes, CRC 0x{:08X}", report.size, report.checksum);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod host;
pub mod image;
pub mod observer;
pub mod port;
pub mod protocol;
pub mod updater;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    device::{DetectedPort, DeviceKind, format_port_list},
    error::{Error, Result},
    host::{auto_detect_port, discover_ports},
    image::FirmwareImage,
    observer::{LogObserver, NullObserver, UpdateObserver},
    port::{LineTransport, Port, SerialConfig, Transport},
    protocol::{Command, Opcode, WordOrder, stm32_crc32},
    updater::{Stage, StageTimeouts, UpdateOptions, UpdateReport, UpdateState, Updater},
};
