//! Packet framing (spec §3, §4.5): `[PKT_HEADER] [BYTE_INDEX]
//! [COMPRESSED_PAYLOAD]`, the unit of random access. The byte index is
//! `rows + 1` `u32` offsets into the *uncompressed* payload; offset `i` is
//! the start of row `i`, and the last entry is the total uncompressed
//! length. A writer may repeat an offset (`len == 0`) for a row it decided
//! not to re-emit (spec §4.5, §4.6); the byte index alone tells a reader
//! that without inspecting the payload.

use std::io::{Read, Write};

use bcsv_base::{Error, Result};

use crate::compress;
use crate::file::{map_read_err, write_u32};

fn read_u32(r: &mut impl Read) -> std::io::Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

/// One packet's fixed-size header fields, ahead of its byte index.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PacketHeader {
    pub rows: u32,
    pub uncompressed_len: u32,
    pub compressed_len: u32,
}

/// Writes `[PKT_HEADER] [BYTE_INDEX] [COMPRESSED_PAYLOAD]` at the writer's
/// current position and returns the absolute file offset the packet started
/// at (the value a catalog entry records).
pub(crate) fn write_packet(
    w: &mut (impl Write + std::io::Seek),
    byte_index: &[u32],
    uncompressed_payload: &[u8],
    compression_level: u8,
    path: &std::path::Path,
) -> Result<u64> {
    let file_offset = w.stream_position().map_err(|e| Error::io(path, e))?;
    let rows = (byte_index.len() - 1) as u32;
    let compressed = compress::compress(compression_level, uncompressed_payload);

    (|| -> std::io::Result<()> {
        write_u32(w, rows)?;
        write_u32(w, uncompressed_payload.len() as u32)?;
        write_u32(w, compressed.len() as u32)?;
        for off in byte_index {
            write_u32(w, *off)?;
        }
        w.write_all(&compressed)?;
        Ok(())
    })()
    .map_err(|e| Error::io(path, e))?;

    tracing::debug!(
        target: "bcsv",
        file_offset,
        rows,
        uncompressed_len = uncompressed_payload.len(),
        compressed_len = compressed.len(),
        "flushed packet"
    );
    Ok(file_offset)
}

/// Reads a packet starting at the reader's current position: header, byte
/// index, and decompressed payload.
pub(crate) fn read_packet(
    r: &mut impl Read,
    compression_level: u8,
    path: &std::path::Path,
) -> Result<(PacketHeader, Vec<u32>, Vec<u8>)> {
    let header = (|| -> std::io::Result<PacketHeader> {
        let rows = read_u32(r)?;
        let uncompressed_len = read_u32(r)?;
        let compressed_len = read_u32(r)?;
        Ok(PacketHeader {
            rows,
            uncompressed_len,
            compressed_len,
        })
    })()
    .map_err(|e| map_read_err(e, path))?;

    let mut byte_index = Vec::with_capacity(header.rows as usize + 1);
    for _ in 0..=header.rows {
        byte_index.push(read_u32(r).map_err(|e| map_read_err(e, path))?);
    }
    if byte_index.last().copied() != Some(header.uncompressed_len) {
        return Err(Error::corrupt(
            0,
            "packet byte index's final entry does not match its uncompressed length",
        ));
    }

    let mut compressed = vec![0u8; header.compressed_len as usize];
    r.read_exact(&mut compressed).map_err(|e| map_read_err(e, path))?;
    let payload = compress::decompress(compression_level, &compressed, header.uncompressed_len as usize)?;

    tracing::debug!(
        target: "bcsv",
        rows = header.rows,
        uncompressed_len = header.uncompressed_len,
        compressed_len = header.compressed_len,
        "loaded packet"
    );
    Ok((header, byte_index, payload))
}
