//! Protocol implementations.

pub mod command;
pub mod crc;
pub mod response;

// Re-export common types
pub use command::{Command, FRAME_LEN, Frame, Opcode, send_command};
pub use crc::{WordOrder, compute_checksum, stm32_crc32};
pub use response::{
    DEFAULT_RESPONSE_TIMEOUT, OK_TOKEN, READY_TOKEN, ResponseMatch, await_ok, await_response,
};
