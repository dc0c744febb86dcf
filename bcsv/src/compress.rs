//! Compression envelope (spec §4.5): level 0 stores the payload raw, levels
//! 1..=12 run it through LZ4 block compression.
//!
//! `lz4_flex`'s block compressor (unlike the original C++ library, which
//! dials an LZ4-HC level 1..12) has a single speed/ratio point — there is no
//! high-compression mode to select between. Every nonzero level therefore
//! maps to the same compressor; the level is still round-tripped through the
//! file flags byte-for-byte so a file written at level 9 reports level 9 on
//! read, even though 1..=12 are compressed identically. See `DESIGN.md`.

use bcsv_base::{Error, Result};

/// Compresses `payload` at `level` (0 = store raw). Returns the bytes to
/// write as the packet's `COMPRESSED_PAYLOAD`.
pub(crate) fn compress(level: u8, payload: &[u8]) -> Vec<u8> {
    if level == 0 {
        payload.to_vec()
    } else {
        lz4_flex::block::compress(payload)
    }
}

/// Inverse of [`compress`]; `uncompressed_len` is the exact original length,
/// taken from the packet header rather than re-derived.
pub(crate) fn decompress(level: u8, compressed: &[u8], uncompressed_len: usize) -> Result<Vec<u8>> {
    if level == 0 {
        if compressed.len() != uncompressed_len {
            return Err(Error::corrupt(
                0,
                format!(
                    "stored (uncompressed) packet length mismatch: header says {uncompressed_len}, got {}",
                    compressed.len()
                ),
            ));
        }
        Ok(compressed.to_vec())
    } else {
        lz4_flex::block::decompress(compressed, uncompressed_len)
            .map_err(|e| Error::corrupt(0, format!("lz4 decompress failed: {e}")))
    }
}
