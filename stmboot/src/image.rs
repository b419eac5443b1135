//! Raw firmware images.
//!
//! The bootloader takes a plain binary: the image is loaded whole into
//! memory, its length is announced with `SETSIZE`, and it is streamed in
//! fixed-size chunks.

use std::fs;
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};
use crate::protocol::crc::{WordOrder, stm32_crc32, words_from_bytes};

/// Chunk size the bootloader acknowledges individually.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// A firmware image held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Load a firmware image from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::FirmwareNotFound(path.to_path_buf()));
        }

        debug!("Loading firmware from: {}", path.display());
        Self::from_bytes(fs::read(path)?)
    }

    /// Wrap in-memory firmware bytes.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::InvalidFirmware("image is empty".into()));
        }
        if u32::try_from(data.len()).is_err() {
            return Err(Error::InvalidFirmware(format!(
                "image is {} bytes, larger than the 32-bit size field",
                data.len()
            )));
        }
        Ok(Self { data })
    }

    /// Image bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always `false`; empty images are rejected on construction.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Image length as sent in `SETSIZE`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn size(&self) -> u32 {
        // Checked in from_bytes
        self.data.len() as u32
    }

    /// Number of chunks of `chunk_size` bytes needed for the image. A zero
    /// `chunk_size` counts as one byte.
    pub fn chunk_count(&self, chunk_size: usize) -> usize {
        self.data.len().div_ceil(chunk_size.max(1))
    }

    /// Split the image into consecutive chunks of at most `chunk_size` bytes.
    pub fn chunks(&self, chunk_size: usize) -> std::slice::Chunks<'_, u8> {
        self.data.chunks(chunk_size.max(1))
    }

    /// Image reinterpreted as 32-bit words. Trailing bytes that do not fill a
    /// whole word are not included.
    pub fn words(&self, order: WordOrder) -> Vec<u32> {
        words_from_bytes(&self.data, order)
    }

    /// STM32 CRC32 of the image words.
    pub fn checksum(&self, order: WordOrder) -> u32 {
        stm32_crc32(&self.words(order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(len: usize) -> FirmwareImage {
        #[allow(clippy::cast_possible_truncation)]
        let data = (0..len).map(|i| i as u8).collect();
        FirmwareImage::from_bytes(data).unwrap()
    }

    #[test]
    fn test_chunking_covers_image() {
        for len in [1, 2, 1023, 1024, 1025, 2048, 4097, 5 * 1024 - 1] {
            let img = image(len);
            let chunks: Vec<&[u8]> = img.chunks(DEFAULT_CHUNK_SIZE).collect();

            assert_eq!(chunks.len(), len.div_ceil(1024), "len {len}");
            assert_eq!(img.chunk_count(DEFAULT_CHUNK_SIZE), chunks.len());
            assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), len);

            let expected_last = if len % 1024 == 0 { 1024 } else { len % 1024 };
            assert_eq!(chunks.last().map(|c| c.len()), Some(expected_last));
            assert!(chunks[..chunks.len() - 1].iter().all(|c| c.len() == 1024));
        }
    }

    #[test]
    fn test_zero_chunk_size_does_not_panic() {
        let img = image(5);
        assert_eq!(img.chunk_count(0), 5);
        assert_eq!(img.chunks(0).count(), 5);
    }

    #[test]
    fn test_empty_image_rejected() {
        assert!(matches!(
            FirmwareImage::from_bytes(Vec::new()),
            Err(Error::InvalidFirmware(_))
        ));
    }

    #[test]
    fn test_size_matches_length() {
        let img = image(3000);
        assert_eq!(img.size(), 3000);
        assert_eq!(img.len(), 3000);
        assert!(!img.is_empty());
    }

    #[test]
    fn test_checksum_uses_word_order() {
        let img = FirmwareImage::from_bytes(vec![0x78, 0x56, 0x34, 0x12]).unwrap();
        assert_eq!(img.checksum(WordOrder::Little), 0xDF8A8A2B);
        assert_eq!(img.words(WordOrder::Big), vec![0x78563412]);
    }

    #[test]
    fn test_checksum_ignores_trailing_bytes() {
        let img = FirmwareImage::from_bytes(vec![0x78, 0x56, 0x34, 0x12, 0xFF]).unwrap();
        assert_eq!(img.checksum(WordOrder::Little), 0xDF8A8A2B);
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.bin");
        match FirmwareImage::from_file(&path) {
            Err(Error::FirmwareNotFound(p)) => assert_eq!(p, path),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_from_file_reads_whole_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.bin");
        fs::write(&path, vec![0xAB; 2500]).unwrap();

        let img = FirmwareImage::from_file(&path).unwrap();
        assert_eq!(img.len(), 2500);
        assert_eq!(img.chunk_count(DEFAULT_CHUNK_SIZE), 3);
    }
}
