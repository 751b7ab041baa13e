//! CRC32 checksums for row headers and payloads
//!
//! Every row carries two checksums:
//! - `header_crc` over the header fields that follow it
//! - `data_crc` over the payload bytes
//!
//! Any mismatch means the row is malformed and must not be applied.

use crc32fast::Hasher;

/// Computes a CRC32 (IEEE) checksum over `data`.
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Returns true if `data` hashes to `expected`.
pub fn verify_checksum(data: &[u8], expected: u32) -> bool {
    compute_checksum(data) == expected
}
