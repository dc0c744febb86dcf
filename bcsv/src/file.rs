//! The file envelope (spec §4.5, §6.1): magic, version, flags, the layout
//! block, and the footer/catalog that close the file out. Packet framing
//! itself lives in [`crate::packet`]; this module is the bit-exact format
//! surrounding it.

use std::io::{Read, Write};

use bcsv_base::{Error, Result};

use crate::column_type::ColumnType;
use crate::layout::Layout;

pub(crate) const MAGIC: &[u8; 4] = b"BCSV";
pub(crate) const VERSION_MAJOR: u8 = 1;
pub(crate) const VERSION_MINOR: u8 = 0;

/// The `u16` flags word (spec §6.1): bit 0 `ZERO_ORDER_HOLD`, bit 1
/// `DELTA_ENCODING`, bits 2-7 compression level, bits 8-15 reserved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileFlags {
    pub zero_order_hold: bool,
    pub delta_encoding: bool,
    pub compression_level: u8,
}

impl FileFlags {
    pub fn to_u16(self) -> u16 {
        let mut v: u16 = 0;
        if self.zero_order_hold {
            v |= 1 << 0;
        }
        if self.delta_encoding {
            v |= 1 << 1;
        }
        v |= (self.compression_level as u16 & 0x3f) << 2;
        v
    }

    pub fn from_u16(v: u16) -> FileFlags {
        FileFlags {
            zero_order_hold: v & (1 << 0) != 0,
            delta_encoding: v & (1 << 1) != 0,
            compression_level: ((v >> 2) & 0x3f) as u8,
        }
    }
}

/// A bad-magic/version `InvalidData` or a short read (`UnexpectedEof`) both
/// mean the file is corrupt, not that the I/O layer transiently failed (spec
/// §8 property 10).
pub(crate) fn map_read_err(e: std::io::Error, path: &std::path::Path) -> Error {
    match e.kind() {
        std::io::ErrorKind::InvalidData => Error::corrupt(0, e.to_string()),
        std::io::ErrorKind::UnexpectedEof => Error::corrupt(0, "unexpected end of file"),
        _ => Error::io(path, e),
    }
}

fn read_u8(r: &mut impl Read) -> std::io::Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

fn read_u16(r: &mut impl Read) -> std::io::Result<u16> {
    let mut b = [0u8; 2];
    r.read_exact(&mut b)?;
    Ok(u16::from_le_bytes(b))
}

fn read_u32(r: &mut impl Read) -> std::io::Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

pub(crate) fn read_u64(r: &mut impl Read) -> std::io::Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

pub(crate) fn write_u64(w: &mut impl Write, v: u64) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub(crate) fn write_u32(w: &mut impl Write, v: u32) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

/// `FILE_HEADER` (spec §6.1), excluding the layout block that follows it.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FileHeader {
    pub flags: FileFlags,
    pub packet_size: u32,
    pub row_codec_id: u8,
}

impl FileHeader {
    pub fn write(&self, w: &mut impl Write, path: &std::path::Path) -> Result<()> {
        (|| -> std::io::Result<()> {
            w.write_all(MAGIC)?;
            w.write_all(&[VERSION_MAJOR, VERSION_MINOR])?;
            w.write_all(&self.flags.to_u16().to_le_bytes())?;
            write_u32(w, self.packet_size)?;
            w.write_all(&[self.row_codec_id])?;
            Ok(())
        })()
        .map_err(|e| Error::io(path, e))
    }

    pub fn read(r: &mut impl Read, path: &std::path::Path) -> Result<FileHeader> {
        (|| -> std::io::Result<FileHeader> {
            let mut magic = [0u8; 4];
            r.read_exact(&mut magic)?;
            if &magic != MAGIC {
                return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "bad magic"));
            }
            let major = read_u8(r)?;
            let _minor = read_u8(r)?;
            if major > VERSION_MAJOR {
                return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "unsupported version"));
            }
            let flags = FileFlags::from_u16(read_u16(r)?);
            let packet_size = read_u32(r)?;
            let row_codec_id = read_u8(r)?;
            Ok(FileHeader {
                flags,
                packet_size,
                row_codec_id,
            })
        })()
        .map_err(|e| map_read_err(e, path))
    }
}

/// Writes the `LAYOUT_BLOCK` (spec §6.1): column count, then per-column
/// `(name length, name bytes, type tag)`.
pub(crate) fn write_layout_block(w: &mut impl Write, layout: &Layout, path: &std::path::Path) -> Result<()> {
    (|| -> std::io::Result<()> {
        let count = layout.column_count();
        w.write_all(&(count as u16).to_le_bytes())?;
        for i in 0..count {
            let name = layout.column_name(i).expect("index within column_count()");
            let ty = layout.column_type(i).expect("index within column_count()");
            let name_bytes = name.as_bytes();
            w.write_all(&(name_bytes.len() as u16).to_le_bytes())?;
            w.write_all(name_bytes)?;
            w.write_all(&[ty.tag()])?;
        }
        Ok(())
    })()
    .map_err(|e| Error::io(path, e))
}

pub(crate) fn read_layout_block(r: &mut impl Read, path: &std::path::Path) -> Result<Layout> {
    let count = read_u16(r).map_err(|e| map_read_err(e, path))?;
    let mut columns: Vec<(String, ColumnType)> = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_len = read_u16(r).map_err(|e| map_read_err(e, path))?;
        let mut name_bytes = vec![0u8; name_len as usize];
        r.read_exact(&mut name_bytes).map_err(|e| map_read_err(e, path))?;
        let name = String::from_utf8(name_bytes).map_err(|_| {
            Error::corrupt(0, "column name is not valid UTF-8")
        })?;
        let tag = read_u8(r).map_err(|e| map_read_err(e, path))?;
        let ty = ColumnType::from_tag(tag)?;
        columns.push((name, ty));
    }
    Layout::new(columns)
}

/// One `CATALOG` entry (spec §6.1): `(absolute file offset, first-row global
/// index, row count)`, one per packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CatalogEntry {
    pub file_offset: u64,
    pub first_row_index: u64,
    pub rows: u32,
}

pub(crate) fn write_catalog(w: &mut impl Write, entries: &[CatalogEntry]) -> std::io::Result<()> {
    for e in entries {
        write_u64(w, e.file_offset)?;
        write_u64(w, e.first_row_index)?;
        write_u32(w, e.rows)?;
    }
    Ok(())
}

pub(crate) fn read_catalog(r: &mut impl Read, entries: u32) -> std::io::Result<Vec<CatalogEntry>> {
    let mut out = Vec::with_capacity(entries as usize);
    for _ in 0..entries {
        let file_offset = read_u64(r)?;
        let first_row_index = read_u64(r)?;
        let rows = read_u32(r)?;
        out.push(CatalogEntry {
            file_offset,
            first_row_index,
            rows,
        });
    }
    Ok(out)
}

/// Re-reads `[0, end)` from the start of the stream and folds it through a
/// CRC-32, restoring the stream's original position afterward. Used at open
/// time to verify the footer's checksum over `[HEADER..CATALOG_end]` (spec
/// §6.1) and at close time would be redundant with the writer's own running
/// hash, so only readers call this.
pub(crate) fn compute_crc_prefix<S: Read + std::io::Seek>(s: &mut S, end: u64) -> std::io::Result<u32> {
    let resume_at = s.stream_position()?;
    s.seek(std::io::SeekFrom::Start(0))?;
    let mut hasher = crc32fast::Hasher::new();
    let mut remaining = end;
    let mut buf = [0u8; 8192];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        s.read_exact(&mut buf[..want])?;
        hasher.update(&buf[..want]);
        remaining -= want as u64;
    }
    s.seek(std::io::SeekFrom::Start(resume_at))?;
    Ok(hasher.finalize())
}

/// `FOOTER` (spec §6.1): catalog offset, entry count, and a CRC-32 checksum
/// over every byte from the start of the file up to (not including) the
/// footer itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Footer {
    pub catalog_offset: u64,
    pub catalog_entries: u32,
    pub crc32: u32,
}

pub(crate) const FOOTER_SIZE: u64 = 8 + 4 + 4;

impl Footer {
    pub fn write(&self, w: &mut impl Write) -> std::io::Result<()> {
        write_u64(w, self.catalog_offset)?;
        write_u32(w, self.catalog_entries)?;
        write_u32(w, self.crc32)?;
        Ok(())
    }

    pub fn read(r: &mut impl Read) -> std::io::Result<Footer> {
        let catalog_offset = read_u64(r)?;
        let catalog_entries = read_u32(r)?;
        let crc32 = read_u32(r)?;
        Ok(Footer {
            catalog_offset,
            catalog_entries,
            crc32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_roundtrip() {
        let flags = FileFlags {
            zero_order_hold: false,
            delta_encoding: true,
            compression_level: 9,
        };
        assert_eq!(FileFlags::from_u16(flags.to_u16()), flags);
    }

    #[test]
    fn layout_block_roundtrips() {
        let layout = Layout::new(vec![
            ("x".to_string(), ColumnType::Int32),
            ("s".to_string(), ColumnType::String),
        ])
        .unwrap();
        let mut buf = Vec::new();
        write_layout_block(&mut buf, &layout, std::path::Path::new("<mem>")).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let back = read_layout_block(&mut cursor, std::path::Path::new("<mem>")).unwrap();
        assert!(layout.is_compatible(&back));
        assert_eq!(back.column_name(0).unwrap(), "x");
        assert_eq!(back.column_name(1).unwrap(), "s");
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut buf = vec![0u8; 12];
        buf[0] = b'X';
        let mut cursor = std::io::Cursor::new(buf);
        let err = FileHeader::read(&mut cursor, std::path::Path::new("<mem>")).unwrap_err();
        assert!(matches!(err, Error::CorruptFile { .. }));
    }
}
