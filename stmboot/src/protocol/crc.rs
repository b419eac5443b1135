//! STM32 hardware CRC32 implementation.
//!
//! The STM32 CRC peripheral consumes 32-bit words MSB first with the
//! Ethernet polynomial, no input/output reflection and no final XOR. It is
//! *not* the zlib CRC32, so crates such as `crc32fast` produce different
//! values for the same data.
//!
//! ```text
//! crc = 0xFFFFFFFF
//! for word in words:
//!     crc ^= word
//!     repeat 32: crc = (crc << 1) ^ (POLY if crc & 0x80000000 else 0)
//! ```

use std::fmt;
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder, LittleEndian, NativeEndian};

use crate::error::{Error, Result};

/// Initial value of the STM32 CRC unit.
pub const CRC32_INIT: u32 = 0xFFFF_FFFF;

/// CRC-32 (Ethernet) polynomial used by the STM32 CRC unit.
pub const CRC32_POLY: u32 = 0x04C1_1DB7;

/// Known-good `(input, checksum)` pairs checked before touching hardware.
pub const SELF_TEST_VECTORS: [(&[u32], u32); 4] = [
    (&[0x12345678], 0xDF8A8A2B),
    (&[0x8E09BAF6], 0x5C00CC44),
    (&[0x12345678, 0x8E09BAF6], 0x04F1F147),
    (&[0x8E09BAF6, 0x12345678], 0x90B2EE2D),
];

/// Compute the STM32 CRC32 over `words` with an explicit initial value and
/// polynomial.
///
/// State carries across words; it is never reset between them.
pub fn compute_checksum(words: &[u32], initial: u32, polynomial: u32) -> u32 {
    let mut crc = initial;
    for &word in words {
        crc ^= word;
        for _ in 0..32 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ polynomial
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Compute the STM32 CRC32 with the peripheral's reset configuration.
pub fn stm32_crc32(words: &[u32]) -> u32 {
    compute_checksum(words, CRC32_INIT, CRC32_POLY)
}

/// Verify [`stm32_crc32`] against [`SELF_TEST_VECTORS`].
///
/// A wrong checksum algorithm would certify corrupted firmware, so callers
/// must run this before any device communication.
pub fn self_test() -> Result<()> {
    for (input, expected) in SELF_TEST_VECTORS {
        let actual = stm32_crc32(input);
        if actual != expected {
            return Err(Error::SelfTestFailed {
                input,
                expected,
                actual,
            });
        }
    }
    Ok(())
}

/// Byte order used to group firmware bytes into 32-bit checksum words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum WordOrder {
    /// Little-endian words, as stored in Cortex-M flash.
    #[default]
    Little,
    /// Big-endian words.
    Big,
    /// Whatever the host CPU uses.
    Native,
}

impl WordOrder {
    /// Read one word from the first four bytes of `bytes`.
    fn read(self, bytes: &[u8]) -> u32 {
        match self {
            Self::Little => LittleEndian::read_u32(bytes),
            Self::Big => BigEndian::read_u32(bytes),
            Self::Native => NativeEndian::read_u32(bytes),
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Little => "little",
            Self::Big => "big",
            Self::Native => "native",
        }
    }
}

impl fmt::Display for WordOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WordOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "little" | "le" => Ok(Self::Little),
            "big" | "be" => Ok(Self::Big),
            "native" => Ok(Self::Native),
            other => Err(Error::Config(format!(
                "unknown word order '{other}' (expected little, big or native)"
            ))),
        }
    }
}

/// Group `bytes` into 32-bit words.
///
/// A trailing partial word (`bytes.len() % 4 != 0`) is ignored.
pub fn words_from_bytes(bytes: &[u8], order: WordOrder) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| order.read(chunk))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_word_vectors() {
        assert_eq!(stm32_crc32(&[0x12345678]), 0xDF8A8A2B);
        assert_eq!(stm32_crc32(&[0x8E09BAF6]), 0x5C00CC44);
    }

    #[test]
    fn test_state_carries_across_words() {
        assert_eq!(stm32_crc32(&[0x12345678, 0x8E09BAF6]), 0x04F1F147);
        assert_eq!(stm32_crc32(&[0x8E09BAF6, 0x12345678]), 0x90B2EE2D);
    }

    #[test]
    fn test_empty_input_returns_initial() {
        assert_eq!(stm32_crc32(&[]), CRC32_INIT);
        assert_eq!(compute_checksum(&[], 0x1234, CRC32_POLY), 0x1234);
    }

    #[test]
    fn test_self_test_passes() {
        assert!(self_test().is_ok());
    }

    #[test]
    fn test_custom_polynomial_changes_result() {
        let default = stm32_crc32(&[0x12345678]);
        let other = compute_checksum(&[0x12345678], CRC32_INIT, 0x1EDC6F41);
        assert_ne!(default, other);
    }

    #[test]
    fn test_words_from_bytes_little_endian() {
        let bytes = [0x78, 0x56, 0x34, 0x12, 0xF6, 0xBA, 0x09, 0x8E];
        let words = words_from_bytes(&bytes, WordOrder::Little);
        assert_eq!(words, vec![0x12345678, 0x8E09BAF6]);
        assert_eq!(stm32_crc32(&words), 0x04F1F147);
    }

    #[test]
    fn test_words_from_bytes_big_endian() {
        let bytes = [0x12, 0x34, 0x56, 0x78];
        assert_eq!(words_from_bytes(&bytes, WordOrder::Big), vec![0x12345678]);
    }

    #[test]
    fn test_words_from_bytes_native_matches_host() {
        let bytes = 0x12345678u32.to_ne_bytes();
        assert_eq!(words_from_bytes(&bytes, WordOrder::Native), vec![0x12345678]);
    }

    #[test]
    fn test_words_from_bytes_ignores_trailing_partial_word() {
        let bytes = [0x01, 0x00, 0x00, 0x00, 0xAA, 0xBB];
        assert_eq!(words_from_bytes(&bytes, WordOrder::Little), vec![1]);
        assert!(words_from_bytes(&bytes[..3], WordOrder::Little).is_empty());
    }

    #[test]
    fn test_word_order_from_str() {
        assert_eq!("little".parse::<WordOrder>().unwrap(), WordOrder::Little);
        assert_eq!("LE".parse::<WordOrder>().unwrap(), WordOrder::Little);
        assert_eq!("be".parse::<WordOrder>().unwrap(), WordOrder::Big);
        assert_eq!("Native".parse::<WordOrder>().unwrap(), WordOrder::Native);
        assert!("middle".parse::<WordOrder>().is_err());
    }

    #[test]
    fn test_word_order_display_roundtrips() {
        for order in [WordOrder::Little, WordOrder::Big, WordOrder::Native] {
            assert_eq!(order.to_string().parse::<WordOrder>().unwrap(), order);
        }
    }
}
