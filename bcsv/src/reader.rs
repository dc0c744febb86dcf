//! Sequential reader (spec §4.7): streams rows through the dispatched codec,
//! loading packets on demand and resetting codec state at each packet
//! boundary. A Sampler, if this crate grew one, would drive its main loop
//! by calling [`Reader::read_next`] in a loop.

use std::path::{Path, PathBuf};

use bcsv_base::{Error, Result};

use crate::codec::RowCodecDispatch;
use crate::file::{self, FileHeader, Footer, FOOTER_SIZE};
use crate::ioutil::{FileReader, MemReader};
use crate::layout::Layout;
use crate::row::Row;

pub struct Reader<R: crate::ioutil::Reader> {
    rd: R,
    path: PathBuf,
    layout: Layout,
    dispatch: RowCodecDispatch,
    compression_level: u8,
    row: Row,
    packet_byte_index: Vec<u32>,
    packet_payload: Vec<u8>,
    row_in_packet: usize,
    packet_exhausted: bool,
    row_pos: u64,
    /// Absolute file offset where the packet stream ends and the catalog
    /// begins; learned from the footer at open time so sequential reads
    /// never mistake catalog bytes for a truncated packet.
    packets_end: u64,
}

impl Reader<FileReader> {
    pub fn open(path: impl AsRef<Path>) -> Result<Reader<FileReader>> {
        let path = path.as_ref().to_path_buf();
        let rd = FileReader::open(path.clone()).map_err(|e| Error::io(&path, e))?;
        Reader::open_with(rd, path)
    }
}

impl Reader<MemReader> {
    /// Reads from an in-memory byte buffer; mirrors [`Writer::into_bytes`](crate::writer::Writer::into_bytes).
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Reader<MemReader>> {
        Reader::open_with(MemReader::from(bytes), PathBuf::from("<memory>"))
    }
}

impl<R: crate::ioutil::Reader> Reader<R> {
    fn open_with(mut rd: R, path: PathBuf) -> Result<Reader<R>> {
        use std::io::{Seek, SeekFrom};

        let header = FileHeader::read(&mut rd, &path)?;
        let layout = file::read_layout_block(&mut rd, &path)?;
        let row_codec_id = crate::codec::RowCodecId::from_tag(header.row_codec_id)?;
        let dispatch = RowCodecDispatch::with_id(row_codec_id, &layout)?;

        let packets_start = rd.stream_position().map_err(|e| Error::io(&path, e))?;
        let file_len = rd.seek(SeekFrom::End(0)).map_err(|e| Error::io(&path, e))?;
        if file_len < FOOTER_SIZE {
            return Err(Error::corrupt(file_len, "file is too short to contain a footer"));
        }
        rd.seek(SeekFrom::Start(file_len - FOOTER_SIZE)).map_err(|e| Error::io(&path, e))?;
        let footer = Footer::read(&mut rd).map_err(|e| file::map_read_err(e, &path))?;

        let crc = file::compute_crc_prefix(&mut rd, footer.catalog_offset).map_err(|e| file::map_read_err(e, &path))?;
        if crc != footer.crc32 {
            return Err(Error::corrupt(footer.catalog_offset, "footer CRC-32 mismatch"));
        }

        rd.seek(SeekFrom::Start(packets_start)).map_err(|e| Error::io(&path, e))?;
        Ok(Reader {
            rd,
            path,
            layout: layout.clone(),
            dispatch,
            compression_level: header.flags.compression_level,
            row: Row::new(&layout),
            packet_byte_index: vec![0],
            packet_payload: Vec::new(),
            row_in_packet: 0,
            packet_exhausted: true,
            row_pos: 0,
            packets_end: footer.catalog_offset,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn row(&self) -> &Row {
        &self.row
    }

    pub fn row_pos(&self) -> u64 {
        self.row_pos
    }

    fn rows_in_current_packet(&self) -> usize {
        self.packet_byte_index.len() - 1
    }

    fn load_next_packet(&mut self) -> Result<bool> {
        use std::io::Seek;
        let pos = self.rd.stream_position().map_err(|e| Error::io(&self.path, e))?;
        if pos >= self.packets_end {
            return Ok(false);
        }

        let (_header, byte_index, payload) = crate::packet::read_packet(&mut self.rd, self.compression_level, &self.path)?;
        self.packet_byte_index = byte_index;
        self.packet_payload = payload;
        self.row_in_packet = 0;
        self.packet_exhausted = false;
        self.dispatch.reset();
        Ok(true)
    }

    /// Advances to the next row, returning `false` at end of file. On
    /// success `row()` reflects the new row and `row_pos()` has advanced;
    /// on a decode error `row_pos` is left unchanged so a retry (without a
    /// fresh packet) fails identically (spec §7).
    pub fn read_next(&mut self) -> Result<bool> {
        if self.packet_exhausted || self.row_in_packet >= self.rows_in_current_packet() {
            if !self.load_next_packet()? {
                return Ok(false);
            }
        }
        let i = self.row_in_packet;
        let start = self.packet_byte_index[i] as usize;
        let end = self.packet_byte_index[i + 1] as usize;
        let wire = &self.packet_payload[start..end];
        self.dispatch.deserialize(wire, &mut self.row)?;
        self.row_in_packet += 1;
        if self.row_in_packet >= self.rows_in_current_packet() {
            self.packet_exhausted = true;
        }
        self.row_pos += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_type::{ColumnType, Value};
    use crate::file::FileFlags;
    use crate::writer::Writer;
    use test_log::test;

    #[test]
    fn s2_zoh_reads_back_through_sequential_reader() {
        let layout = Layout::new(vec![
            ("b".to_string(), ColumnType::Bool),
            ("k".to_string(), ColumnType::Int64),
        ])
        .unwrap();
        let flags = FileFlags {
            zero_order_hold: true,
            delta_encoding: false,
            compression_level: 0,
        };
        let mut w = Writer::in_memory(&layout, flags, 4).unwrap();
        for (b, k) in [(true, 100i64), (true, 100), (true, 100), (false, 100)] {
            w.row().set(0, Value::Bool(b)).unwrap();
            w.row().set(1, Value::I64(k)).unwrap();
            w.write_row().unwrap();
        }
        w.close().unwrap();
        let bytes = w.into_bytes();

        let mut r = Reader::from_bytes(bytes).unwrap();
        let expected = [(true, 100i64), (true, 100), (true, 100), (false, 100)];
        for (b, k) in expected {
            assert!(r.read_next().unwrap());
            assert_eq!(r.row().get(0).unwrap(), Value::Bool(b));
            assert_eq!(r.row().get(1).unwrap(), Value::I64(k));
        }
        assert!(!r.read_next().unwrap());
        assert_eq!(r.row_pos(), 4);
    }

    #[test]
    fn multi_packet_stream_resets_codec_each_packet() {
        let layout = Layout::new(vec![("v".to_string(), ColumnType::Int32)]).unwrap();
        let flags = FileFlags {
            zero_order_hold: false,
            delta_encoding: true,
            compression_level: 3,
        };
        let mut w = Writer::in_memory(&layout, flags, 2).unwrap();
        let values = [10i32, 20, 30, 40, 50];
        for v in values {
            w.row().set(0, Value::I32(v)).unwrap();
            w.write_row().unwrap();
        }
        w.close().unwrap();
        let bytes = w.into_bytes();

        let mut r = Reader::from_bytes(bytes).unwrap();
        for v in values {
            assert!(r.read_next().unwrap());
            assert_eq!(r.row().get(0).unwrap(), Value::I32(v));
        }
        assert!(!r.read_next().unwrap());
    }
}
