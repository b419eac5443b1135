//! Bootloader command frames.
//!
//! ## Frame Format
//!
//! Every host-to-device command is exactly five bytes:
//!
//! ```text
//! +--------+---------------------------+
//! | Opcode |   Argument (big-endian)   |
//! +--------+------+------+------+------+
//! |   1    |  b3  |  b2  |  b1  |  b0  |
//! +--------+------+------+------+------+
//! ```
//!
//! Firmware data sent after `UPDATE` is raw and never wrapped in a frame.

use byteorder::{BigEndian, ByteOrder};
use log::trace;

use crate::error::Result;
use crate::port::Transport;

/// Length of every command frame.
pub const FRAME_LEN: usize = 5;

/// Encoded command bytes.
pub type Frame = [u8; FRAME_LEN];

/// Bootloader opcodes (first frame byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Reserved, never sent (0x00).
    Invalid = 0x00,
    /// Liveness check (0x01).
    Echo = 0x01,
    /// Declare firmware size in bytes (0x02).
    SetSize = 0x02,
    /// Enter raw streaming mode (0x03).
    Update = 0x03,
    /// Verify the flashed image against a CRC32 (0x04).
    Check = 0x04,
    /// Jump to the application (0x05).
    Jump = 0x05,
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Invalid),
            0x01 => Ok(Self::Echo),
            0x02 => Ok(Self::SetSize),
            0x03 => Ok(Self::Update),
            0x04 => Ok(Self::Check),
            0x05 => Ok(Self::Jump),
            other => Err(other),
        }
    }
}

/// A command with its 32-bit argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    opcode: Opcode,
    argument: u32,
}

impl Command {
    /// Create a command from an opcode and argument.
    pub const fn new(opcode: Opcode, argument: u32) -> Self {
        Self { opcode, argument }
    }

    /// `ECHO(0)`.
    pub const fn echo() -> Self {
        Self::new(Opcode::Echo, 0)
    }

    /// `SETSIZE(len)`.
    pub const fn set_size(len: u32) -> Self {
        Self::new(Opcode::SetSize, len)
    }

    /// `UPDATE(0)`.
    pub const fn update() -> Self {
        Self::new(Opcode::Update, 0)
    }

    /// `CHECK(checksum)`.
    pub const fn check(checksum: u32) -> Self {
        Self::new(Opcode::Check, checksum)
    }

    /// `JUMP(address)`.
    pub const fn jump(address: u32) -> Self {
        Self::new(Opcode::Jump, address)
    }

    /// Get the opcode.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Get the argument.
    pub fn argument(&self) -> u32 {
        self.argument
    }

    /// Encode into the 5-byte wire frame.
    pub fn encode(&self) -> Frame {
        let mut frame = [0u8; FRAME_LEN];
        frame[0] = self.opcode as u8;
        BigEndian::write_u32(&mut frame[1..], self.argument);
        frame
    }

    /// Decode a wire frame. Returns `None` for unknown opcodes.
    pub fn decode(frame: &Frame) -> Option<Self> {
        let opcode = Opcode::try_from(frame[0]).ok()?;
        Some(Self::new(opcode, BigEndian::read_u32(&frame[1..])))
    }
}

/// Encode `command` and write it to `transport`.
pub fn send_command<T: Transport + ?Sized>(transport: &mut T, command: &Command) -> Result<()> {
    let frame = command.encode();
    trace!(
        "Sending {:?}({:#010X}): {:02X?}",
        command.opcode(),
        command.argument(),
        frame
    );
    transport.write_bytes(&frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_size_frame_is_big_endian() {
        let frame = Command::set_size(0x0000_0100).encode();
        assert_eq!(frame, [0x02, 0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_echo_frame() {
        assert_eq!(Command::echo().encode(), [0x01, 0, 0, 0, 0]);
    }

    #[test]
    fn test_update_frame() {
        assert_eq!(Command::update().encode(), [0x03, 0, 0, 0, 0]);
    }

    #[test]
    fn test_check_frame_carries_checksum() {
        let frame = Command::check(0xDF8A8A2B).encode();
        assert_eq!(frame, [0x04, 0xDF, 0x8A, 0x8A, 0x2B]);
    }

    #[test]
    fn test_jump_frame() {
        let frame = Command::jump(0x0800_4000).encode();
        assert_eq!(frame, [0x05, 0x08, 0x00, 0x40, 0x00]);
    }

    #[test]
    fn test_decode_known_frame() {
        let cmd = Command::decode(&[0x02, 0x00, 0x01, 0x00, 0x00]).unwrap();
        assert_eq!(cmd.opcode(), Opcode::SetSize);
        assert_eq!(cmd.argument(), 0x0001_0000);
    }

    #[test]
    fn test_decode_unknown_opcode() {
        assert!(Command::decode(&[0x42, 0, 0, 0, 0]).is_none());
        assert_eq!(Opcode::try_from(0x06), Err(0x06));
    }
}
