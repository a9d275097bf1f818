//! Initramfs unpacker
//!
//! The boot loader hands the kernel a blob of length-prefixed images:
//! a 4-byte big-endian record length, then that many image bytes, with
//! the offset aligned up to the next 4-byte boundary between records.
//! A zero length or a length exceeding the remaining stream terminates
//! parsing.

use alloc::format;
use alloc::vec::Vec;

use nvm_core::{Cap, Pid};
use nvm_hal::Platform;

use crate::{Nvm, COLOUR_STATUS, COLOUR_WARN};

/// Split an initramfs blob into its image records.
pub fn parse_initramfs(data: &[u8]) -> Vec<&[u8]> {
    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset + 4 <= data.len() {
        let len = u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        offset += 4;
        if len == 0 || len > data.len() - offset {
            break;
        }
        records.push(&data[offset..offset + len]);
        offset += len;
        // Records are 4-byte aligned
        offset = (offset + 3) & !3;
    }
    records
}

impl<P: Platform> Nvm<P> {
    /// Unpack an initramfs blob and load every valid image.
    ///
    /// Records that fail magic validation (or find no free slot) are
    /// skipped with a diagnostic; the rest load with `caps` installed.
    /// Returns the pids that were started, in record order.
    pub fn load_initramfs(&mut self, data: &[u8], caps: &[Cap]) -> Vec<Pid> {
        self.platform.kprint(":: Loading initramfs..\n", COLOUR_STATUS);
        let records: Vec<Vec<u8>> = parse_initramfs(data)
            .into_iter()
            .map(|r| r.to_vec())
            .collect();

        let mut pids = Vec::new();
        for (index, record) in records.into_iter().enumerate() {
            match self.load_image(record, caps) {
                Ok(pid) => {
                    self.platform.kprint(
                        &format!(":: Loaded program {} as pid {}\n", index, pid.0),
                        COLOUR_STATUS,
                    );
                    pids.push(pid);
                }
                Err(err) => {
                    self.platform.kprint(
                        &format!(":: Skipping program {}: {}\n", index, err),
                        COLOUR_WARN,
                    );
                    self.platform
                        .debug_write(&format!("initramfs record {}: {}\n", index, err));
                }
            }
        }
        pids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use nvm_core::MAGIC;

    fn record(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(payload);
        // Writers pad records to the 4-byte boundary
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out
    }

    #[test]
    fn test_parses_aligned_records() {
        let mut blob = Vec::new();
        let first = [&MAGIC[..], &[0x00]].concat(); // 5 bytes, needs padding
        let second = [&MAGIC[..], &[0x01, 0x01, 0x01, 0x01]].concat(); // 8 bytes
        blob.extend_from_slice(&record(&first));
        blob.extend_from_slice(&record(&second));

        let records = parse_initramfs(&blob);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], &first[..]);
        assert_eq!(records[1], &second[..]);
    }

    #[test]
    fn test_zero_length_terminates() {
        let mut blob = record(&MAGIC);
        blob.extend_from_slice(&0u32.to_be_bytes());
        blob.extend_from_slice(&record(&MAGIC));

        // The zero-length record stops parsing; the trailing record is lost
        assert_eq!(parse_initramfs(&blob).len(), 1);
    }

    #[test]
    fn test_overlong_length_terminates() {
        let mut blob = record(&MAGIC);
        blob.extend_from_slice(&100u32.to_be_bytes());
        blob.push(0xAA);

        assert_eq!(parse_initramfs(&blob).len(), 1);
    }

    #[test]
    fn test_truncated_length_field_terminates() {
        let mut blob = record(&MAGIC);
        blob.extend_from_slice(&[0x00, 0x00]);
        assert_eq!(parse_initramfs(&blob).len(), 1);
    }

    #[test]
    fn test_empty_blob() {
        assert!(parse_initramfs(&[]).is_empty());
        assert!(parse_initramfs(&vec![0u8; 3]).is_empty());
    }
}
