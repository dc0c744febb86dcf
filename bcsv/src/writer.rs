//! Builds packets row by row, compresses and flushes them, and maintains the
//! file-level packet catalog (spec §4.6).

use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bcsv_base::{Error, Result};

use crate::codec::{RowCodecDispatch, RowCodecId};
use crate::file::{self, CatalogEntry, FileFlags, FileHeader, Footer};
use crate::ioutil::{FileWriter, MemWriter};
use crate::layout::Layout;
use crate::row::Row;

/// Wraps a writer and feeds every byte written through a CRC-32, so the
/// footer checksum (spec §6.1) falls out of the writes the file already
/// makes rather than a second pass over the finished bytes.
struct HashingWriter<W> {
    inner: W,
    hasher: crc32fast::Hasher,
}

impl<W> HashingWriter<W> {
    fn new(inner: W) -> Self {
        HashingWriter {
            inner,
            hasher: crc32fast::Hasher::new(),
        }
    }

    fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Seek> Seek for HashingWriter<W> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

/// Writes a BCSV file packet by packet. Owns a reusable [`Row`] the caller
/// fills in via [`Writer::row`]; one Writer owns its file handle, row
/// buffer, and codec state for its whole lifetime (spec §5: single-threaded
/// per file).
pub struct Writer<W: crate::ioutil::Writer> {
    wr: HashingWriter<W>,
    path: PathBuf,
    layout: Layout,
    dispatch: RowCodecDispatch,
    compression_level: u8,
    packet_size: u32,
    row: Row,
    packet_payload: Vec<u8>,
    packet_byte_index: Vec<u32>,
    last_row: Option<Row>,
    catalog: Vec<CatalogEntry>,
    next_row_index: u64,
    closed: bool,
}

impl Writer<FileWriter> {
    /// Creates the parent directory if needed, opens `path` (failing if it
    /// already exists unless `overwrite` is set), and writes the file
    /// header and layout block. `flags` controls zero-order-hold/delta and
    /// carries the requested compression level; the row codec is selected
    /// from it via [`RowCodecDispatch::select`] (spec §4.4.4).
    pub fn open(
        path: impl AsRef<Path>,
        overwrite: bool,
        layout: &Layout,
        flags: FileFlags,
        packet_size: u32,
    ) -> Result<Writer<FileWriter>> {
        let path = path.as_ref().to_path_buf();
        let wr = FileWriter::open(path.clone(), overwrite).map_err(|e| Error::io(&path, e))?;
        Writer::open_with(wr, path, layout, flags, packet_size)
    }
}

impl Writer<MemWriter> {
    /// In-memory writer (no path on disk); used by tests that want to
    /// exercise the full packet/catalog machinery without touching a
    /// filesystem, the way the teacher workspace's `ioutil::MemWriter` does.
    pub fn in_memory(layout: &Layout, flags: FileFlags, packet_size: u32) -> Result<Writer<MemWriter>> {
        Writer::open_with(MemWriter::new(), PathBuf::from("<memory>"), layout, flags, packet_size)
    }
}

impl<W: crate::ioutil::Writer> Writer<W> {
    fn open_with(wr: W, path: PathBuf, layout: &Layout, flags: FileFlags, packet_size: u32) -> Result<Writer<W>> {
        if packet_size == 0 {
            return Err(Error::OutOfRange(0));
        }
        let mut wr = HashingWriter::new(wr);
        let dispatch = RowCodecDispatch::select(&flags, layout)?;
        let row_codec_id = dispatch.id();

        let header = FileHeader {
            flags,
            packet_size,
            row_codec_id: row_codec_id.tag(),
        };
        header.write(&mut wr, &path)?;
        file::write_layout_block(&mut wr, layout, &path)?;
        Ok(Writer {
            wr,
            path,
            layout: layout.clone(),
            dispatch,
            compression_level: flags.compression_level,
            packet_size,
            row: Row::new(layout),
            packet_payload: Vec::new(),
            packet_byte_index: vec![0],
            last_row: None,
            catalog: Vec::new(),
            next_row_index: 0,
            closed: false,
        })
    }

    /// Stable reference to the reusable row buffer; callers fill it in and
    /// then call [`Writer::write_row`].
    pub fn row(&mut self) -> &mut Row {
        &mut self.row
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    fn rows_in_current_packet(&self) -> u32 {
        (self.packet_byte_index.len() - 1) as u32
    }

    /// Serializes `self.row()` via the selected codec into the in-progress
    /// packet, appends a byte-index entry, and flushes the packet once it
    /// reaches `packet_size` rows. Rolls back the byte index (and truncates
    /// the payload back to its pre-row length) if serialization fails, so a
    /// failed row leaves no partial state in the output (spec §4.6, §7).
    pub fn write_row(&mut self) -> Result<()> {
        let before_len = self.packet_payload.len();

        let skip_as_repeat = self.dispatch.id() != RowCodecId::Flat001
            && self
                .last_row
                .as_ref()
                .is_some_and(|prev| prev.matches_content(&self.row));

        if !skip_as_repeat {
            if let Err(e) = self.dispatch.serialize(&self.row, &mut self.packet_payload) {
                self.packet_payload.truncate(before_len);
                return Err(e);
            }
        }
        self.packet_byte_index.push(self.packet_payload.len() as u32);

        if self.last_row.is_none() {
            self.last_row = Some(self.row.clone());
        } else {
            self.last_row.as_mut().unwrap().clone_from(&self.row);
        }
        self.next_row_index += 1;

        if self.rows_in_current_packet() >= self.packet_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Copies `row` into the writer's row buffer, then calls
    /// [`Writer::write_row`].
    pub fn write(&mut self, row: &Row) -> Result<()> {
        self.row.clone_from(row);
        self.write_row()
    }

    /// Compresses and writes the in-progress packet (if it has any rows),
    /// appends a catalog entry, and resets the codec for the next packet.
    /// A no-op if the current packet is empty.
    pub fn flush(&mut self) -> Result<()> {
        if self.rows_in_current_packet() == 0 {
            return Ok(());
        }
        let first_row_index = self.next_row_index - self.rows_in_current_packet() as u64;
        let file_offset = crate::packet::write_packet(
            &mut self.wr,
            &self.packet_byte_index,
            &self.packet_payload,
            self.compression_level,
            &self.path,
        )?;
        self.catalog.push(CatalogEntry {
            file_offset,
            first_row_index,
            rows: self.rows_in_current_packet(),
        });

        self.dispatch.reset();
        self.packet_payload.clear();
        self.packet_byte_index.clear();
        self.packet_byte_index.push(0);
        self.last_row = None;
        Ok(())
    }

    /// Final flush, then writes the catalog and footer and closes the file.
    /// Idempotent: calling `close` again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;

        let catalog_offset = self.wr.stream_position().map_err(|e| Error::io(&self.path, e))?;
        (|| -> std::io::Result<()> { file::write_catalog(&mut self.wr, &self.catalog) })()
            .map_err(|e| Error::io(&self.path, e))?;

        let crc = self.wr.hasher.clone().finalize();
        let footer = Footer {
            catalog_offset,
            catalog_entries: self.catalog.len() as u32,
            crc32: crc,
        };
        (|| -> std::io::Result<()> { footer.write(&mut self.wr) })().map_err(|e| Error::io(&self.path, e))?;
        self.wr.flush().map_err(|e| Error::io(&self.path, e))?;
        self.closed = true;
        Ok(())
    }
}

impl Writer<MemWriter> {
    /// Takes the bytes written so far (and the footer, once [`Writer::close`]
    /// has run). Used by tests to feed the result straight into a reader.
    pub fn into_bytes(self) -> Vec<u8> {
        self.wr.into_inner().into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_type::{ColumnType, Value};
    use crate::reader::Reader;
    use test_log::test;

    fn layout_xyz() -> Layout {
        Layout::new(vec![
            ("x".to_string(), ColumnType::Int32),
            ("y".to_string(), ColumnType::Double),
            ("s".to_string(), ColumnType::String),
        ])
        .unwrap()
    }

    #[test]
    fn s1_flat_three_columns_roundtrip() {
        let layout = layout_xyz();
        let flags = FileFlags::default();
        let mut w = Writer::in_memory(&layout, flags, 64).unwrap();

        let rows = [(7i32, 3.5f64, "hi"), (-1, 0.0, ""), (1 << 30, 1e-300, "\u{3b1}\u{3b2}\u{3b3}")];
        for (x, y, s) in rows {
            w.row().set(0, Value::I32(x)).unwrap();
            w.row().set(1, Value::F64(y)).unwrap();
            w.row().set(2, Value::Str(s.to_string())).unwrap();
            w.write_row().unwrap();
        }
        w.close().unwrap();

        let bytes = w.into_bytes();
        let mut r = Reader::from_bytes(bytes).unwrap();
        for (x, y, s) in rows {
            assert!(r.read_next().unwrap());
            assert_eq!(r.row().get(0).unwrap(), Value::I32(x));
            assert_eq!(r.row().get(1).unwrap(), Value::F64(y));
            assert_eq!(r.row().get(2).unwrap(), Value::Str(s.to_string()));
        }
        assert!(!r.read_next().unwrap());
    }

    #[test]
    fn writer_rejects_zero_packet_size() {
        let layout = layout_xyz();
        let err = Writer::in_memory(&layout, FileFlags::default(), 0).unwrap_err();
        assert!(matches!(err, Error::OutOfRange(0)));
    }

    #[test]
    fn close_is_idempotent() {
        let layout = Layout::new(vec![("x".to_string(), ColumnType::Int32)]).unwrap();
        let mut w = Writer::in_memory(&layout, FileFlags::default(), 4).unwrap();
        w.row().set(0, Value::I32(1)).unwrap();
        w.write_row().unwrap();
        w.close().unwrap();
        w.close().unwrap();
    }

    #[test]
    fn delta_repeat_rows_use_empty_byte_index_entry() {
        // Regression: the writer's byte-identical-repeat optimization (spec
        // §4.5/§4.6) emits a zero-length wire slice for DELTA the same way
        // it does for ZOH; the codec must replay its previous row rather
        // than trying to parse an empty header.
        let layout = Layout::new(vec![("k".to_string(), ColumnType::Int64)]).unwrap();
        let flags = FileFlags {
            zero_order_hold: false,
            delta_encoding: true,
            compression_level: 0,
        };
        let mut w = Writer::in_memory(&layout, flags, 8).unwrap();
        for v in [7i64, 7, 7, 9] {
            w.row().set(0, Value::I64(v)).unwrap();
            w.write_row().unwrap();
        }
        w.close().unwrap();
        let bytes = w.into_bytes();

        let mut r = Reader::from_bytes(bytes).unwrap();
        for v in [7i64, 7, 7, 9] {
            assert!(r.read_next().unwrap());
            assert_eq!(r.row().get(0).unwrap(), Value::I64(v));
        }
        assert!(!r.read_next().unwrap());
    }

    #[test]
    fn s6_open_writer_blocks_layout_mutation() {
        let layout = Layout::new(vec![("x".to_string(), ColumnType::Int32)]).unwrap();
        let w = Writer::in_memory(&layout, FileFlags::default(), 4).unwrap();
        let err = layout.add_column("y", ColumnType::Int32).unwrap_err();
        assert!(matches!(err, bcsv_base::Error::LayoutLocked { .. }));
        drop(w);
        layout.add_column("y", ColumnType::Int32).unwrap();
    }
}
