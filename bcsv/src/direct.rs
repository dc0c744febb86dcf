//! Random-access reader (spec §4.8): reads the header, layout, and full
//! catalog at open time, then binary-searches the catalog to jump straight
//! to the packet containing a requested row.

use std::path::{Path, PathBuf};

use bcsv_base::{Error, Result};

use crate::codec::RowCodecDispatch;
use crate::file::{self, CatalogEntry, FileHeader, Footer, FOOTER_SIZE};
use crate::ioutil::{FileReader, MemReader};
use crate::layout::Layout;
use crate::row::Row;

/// The most recently decompressed packet: its byte index plus payload,
/// identified by which catalog entry produced it. Keeping this one packet
/// around makes a forward walk through a packet's rows O(1) per row after
/// the first (spec §4.8's caching note).
struct PacketCache {
    catalog_index: usize,
    byte_index: Vec<u32>,
    payload: Vec<u8>,
}

pub struct DirectAccessReader<R: crate::ioutil::Reader> {
    rd: R,
    path: PathBuf,
    layout: Layout,
    dispatch: RowCodecDispatch,
    compression_level: u8,
    catalog: Vec<CatalogEntry>,
    row_count: u64,
    cache: Option<PacketCache>,
    row: Row,
}

impl DirectAccessReader<FileReader> {
    pub fn open(path: impl AsRef<Path>) -> Result<DirectAccessReader<FileReader>> {
        let path = path.as_ref().to_path_buf();
        let rd = FileReader::open(path.clone()).map_err(|e| Error::io(&path, e))?;
        DirectAccessReader::open_with(rd, path)
    }
}

impl DirectAccessReader<MemReader> {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<DirectAccessReader<MemReader>> {
        DirectAccessReader::open_with(MemReader::from(bytes), PathBuf::from("<memory>"))
    }
}

impl<R: crate::ioutil::Reader> DirectAccessReader<R> {
    fn open_with(mut rd: R, path: PathBuf) -> Result<DirectAccessReader<R>> {
        use std::io::{Seek, SeekFrom};

        let header = FileHeader::read(&mut rd, &path)?;
        let layout = file::read_layout_block(&mut rd, &path)?;
        let row_codec_id = crate::codec::RowCodecId::from_tag(header.row_codec_id)?;
        let dispatch = RowCodecDispatch::with_id(row_codec_id, &layout)?;

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

        rd.seek(SeekFrom::Start(footer.catalog_offset)).map_err(|e| Error::io(&path, e))?;
        let catalog = file::read_catalog(&mut rd, footer.catalog_entries).map_err(|e| file::map_read_err(e, &path))?;
        let row_count = catalog.iter().map(|e| e.rows as u64).sum();
        Ok(DirectAccessReader {
            rd,
            path,
            layout: layout.clone(),
            dispatch,
            compression_level: header.flags.compression_level,
            catalog,
            row_count,
            cache: None,
            row: Row::new(&layout),
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Binary-searches the catalog for the packet holding global row
    /// `index` and returns its position in `self.catalog`.
    fn packet_for(&self, index: u64) -> Option<usize> {
        if index >= self.row_count {
            return None;
        }
        // `partition_point` needs entries sorted by first_row_index, which
        // the writer guarantees by construction (spec §4.6).
        let pos = self.catalog.partition_point(|e| e.first_row_index <= index);
        Some(pos - 1)
    }

    fn load_packet(&mut self, catalog_index: usize) -> Result<()> {
        if self.cache.as_ref().is_some_and(|c| c.catalog_index == catalog_index) {
            return Ok(());
        }
        use std::io::{Seek, SeekFrom};
        let entry = self.catalog[catalog_index];
        self.rd
            .seek(SeekFrom::Start(entry.file_offset))
            .map_err(|e| Error::io(&self.path, e))?;
        let (_header, byte_index, payload) = crate::packet::read_packet(&mut self.rd, self.compression_level, &self.path)?;
        self.cache = Some(PacketCache {
            catalog_index,
            byte_index,
            payload,
        });
        Ok(())
    }

    /// Reads row `index` (0-based, global across the whole file) into the
    /// reader's row buffer and returns a reference to it.
    pub fn read(&mut self, index: u64) -> Result<&Row> {
        let catalog_index = self.packet_for(index).ok_or(Error::IndexOutOfRange {
            index,
            row_count: self.row_count,
        })?;
        self.load_packet(catalog_index)?;

        let entry = self.catalog[catalog_index];
        let offset_in_packet = (index - entry.first_row_index) as usize;

        // ZOH/DELTA need every row up to the target replayed in order to
        // reconstruct codec state; FLAT rows are independently addressable
        // but replaying costs nothing extra since FLAT's serialize has no
        // state to rebuild. Every read() starts its replay from the
        // packet's first row, so the codec is reset regardless of whether
        // this packet was already cached.
        self.dispatch.reset();
        let cache = self.cache.take().expect("just loaded");
        for i in 0..=offset_in_packet {
            let start = cache.byte_index[i] as usize;
            let end = cache.byte_index[i + 1] as usize;
            self.dispatch.deserialize(&cache.payload[start..end], &mut self.row)?;
        }
        self.cache = Some(cache);
        Ok(&self.row)
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
    fn s7_packet_load_sequence_and_direct_equals_sequential() {
        // Packet size 2, 5 rows -> packets of [2, 2, 1] rows; loaded in the
        // order 3 (random), then 0, 1, 1, 0 as different indices are read.
        let layout = Layout::new(vec![("v".to_string(), ColumnType::Int32)]).unwrap();
        let flags = FileFlags {
            zero_order_hold: false,
            delta_encoding: true,
            compression_level: 0,
        };
        let mut w = Writer::in_memory(&layout, flags, 2).unwrap();
        let values = [10i32, 20, 30, 40, 50];
        for v in values {
            w.row().set(0, Value::I32(v)).unwrap();
            w.write_row().unwrap();
        }
        w.close().unwrap();
        let bytes = w.into_bytes();

        let mut d = DirectAccessReader::from_bytes(bytes).unwrap();
        assert_eq!(d.row_count(), 5);

        for &i in &[3usize, 0, 1, 1, 0] {
            let row = d.read(i as u64).unwrap();
            assert_eq!(row.get(0).unwrap(), Value::I32(values[i]));
        }
    }

    #[test]
    fn direct_access_equals_sequential_iteration() {
        let layout = Layout::new(vec![
            ("b".to_string(), ColumnType::Bool),
            ("k".to_string(), ColumnType::Int64),
        ])
        .unwrap();
        let flags = FileFlags {
            zero_order_hold: true,
            delta_encoding: false,
            compression_level: 1,
        };
        let mut w = Writer::in_memory(&layout, flags, 3).unwrap();
        let rows = [(true, 1i64), (true, 1), (false, 2), (false, 2), (true, 99), (true, 99), (true, 0)];
        for (b, k) in rows {
            w.row().set(0, Value::Bool(b)).unwrap();
            w.row().set(1, Value::I64(k)).unwrap();
            w.write_row().unwrap();
        }
        w.close().unwrap();
        let bytes = w.into_bytes();

        let mut seq = crate::reader::Reader::from_bytes(bytes.clone()).unwrap();
        let mut direct = DirectAccessReader::from_bytes(bytes).unwrap();
        assert_eq!(direct.row_count(), rows.len() as u64);
        for i in 0..rows.len() as u64 {
            assert!(seq.read_next().unwrap());
            let via_seq = (seq.row().get(0).unwrap(), seq.row().get(1).unwrap());
            let via_direct = direct.read(i).unwrap();
            assert_eq!(via_direct.get(0).unwrap(), via_seq.0);
            assert_eq!(via_direct.get(1).unwrap(), via_seq.1);
        }
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let layout = Layout::new(vec![("v".to_string(), ColumnType::Int32)]).unwrap();
        let mut w = Writer::in_memory(&layout, FileFlags::default(), 4).unwrap();
        w.row().set(0, Value::I32(1)).unwrap();
        w.write_row().unwrap();
        w.close().unwrap();
        let bytes = w.into_bytes();

        let mut d = DirectAccessReader::from_bytes(bytes).unwrap();
        let err = d.read(5).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { .. }));
    }
}
