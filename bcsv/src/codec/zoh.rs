//! Zero-order-hold codec (spec §4.4.2): a per-row change header plus only
//! the columns that actually changed since the codec's own previous-row
//! copy. The first row of a packet is always a full emit.

use bcsv_base::{assign_range, Bitset, Error, Result};

use crate::codec::RowCodec;
use crate::column_type::ScalarType;
use crate::layout::{Layout, LayoutGuard};
use crate::row::Row;

pub(crate) struct ZohCodec {
    layout: Option<Layout>,
    guard: Option<LayoutGuard>,
    numeric_columns: Vec<(usize, ScalarType, usize)>,
    string_columns: Vec<usize>,
    bool_count: usize,
    column_count: usize,
    prev_bits: Bitset,
    prev_scalars: Vec<u8>,
    prev_strings: Vec<String>,
    first_row_in_packet: bool,
}

impl ZohCodec {
    pub fn new() -> ZohCodec {
        ZohCodec {
            layout: None,
            guard: None,
            numeric_columns: Vec::new(),
            string_columns: Vec::new(),
            bool_count: 0,
            column_count: 0,
            prev_bits: Bitset::new(0),
            prev_scalars: Vec::new(),
            prev_strings: Vec::new(),
            first_row_in_packet: true,
        }
    }
}

impl RowCodec for ZohCodec {
    fn setup(&mut self, layout: &Layout) -> Result<()> {
        let mut numeric_columns = Vec::new();
        for i in layout.numeric_columns_ordered() {
            let ty = layout.column_type(i)?;
            let st = ty.scalar_type().expect("numeric_columns_ordered() only yields scalar columns");
            let off = layout.column_offset(i)?;
            numeric_columns.push((i, st, off));
        }
        self.numeric_columns = numeric_columns;
        self.string_columns = layout.string_columns_ordered();
        self.bool_count = layout.bool_count();
        self.column_count = layout.column_count();
        self.prev_bits = Bitset::new(self.bool_count);
        self.prev_scalars = vec![0u8; layout.scalar_size()];
        self.prev_strings = vec![String::new(); layout.string_count()];
        self.first_row_in_packet = true;
        self.guard = Some(layout.acquire_guard());
        self.layout = Some(layout.clone());
        Ok(())
    }

    fn reset(&mut self) {
        self.prev_bits = Bitset::new(self.bool_count);
        for b in self.prev_scalars.iter_mut() {
            *b = 0;
        }
        for s in self.prev_strings.iter_mut() {
            s.clear();
        }
        self.first_row_in_packet = true;
    }

    fn serialize(&mut self, row: &Row, out: &mut Vec<u8>) -> Result<()> {
        let mut header = Bitset::new(self.column_count);
        assign_range(&mut header, 0, row.bits(), 0, self.bool_count);

        let mut payload = Vec::new();
        let mut bitpos = self.bool_count;
        for &(_col, st, off) in &self.numeric_columns {
            let width = st.byte_width();
            let cur = &row.scalars()[off..off + width];
            let changed = self.first_row_in_packet || cur != &self.prev_scalars[off..off + width];
            header.set(bitpos, changed)?;
            if changed {
                payload.extend_from_slice(cur);
            }
            bitpos += 1;
        }
        for (k, &col) in self.string_columns.iter().enumerate() {
            let cur = &row.strings()[k];
            let changed = self.first_row_in_packet || *cur != self.prev_strings[k];
            header.set(bitpos, changed)?;
            if changed {
                if cur.len() > 65_535 {
                    return Err(Error::StringTooLong {
                        index: col,
                        length: cur.len(),
                    });
                }
                payload.extend_from_slice(&(cur.len() as u16).to_le_bytes());
                payload.extend_from_slice(cur.as_bytes());
            }
            bitpos += 1;
        }

        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&payload);

        self.prev_bits = row.bits().clone();
        self.prev_scalars.copy_from_slice(row.scalars());
        self.prev_strings.clone_from_slice(row.strings());
        self.first_row_in_packet = false;
        Ok(())
    }

    fn deserialize(&mut self, wire: &[u8], row: &mut Row) -> Result<()> {
        if wire.is_empty() {
            *row.bits_mut() = self.prev_bits.clone();
            row.scalars_mut().copy_from_slice(&self.prev_scalars);
            row.strings_mut().clone_from_slice(&self.prev_strings);
            return Ok(());
        }

        let header_bytes = (self.column_count + 7) / 8;
        if wire.len() < header_bytes {
            return Err(Error::DecodeShort {
                need: header_bytes,
                have: wire.len(),
            });
        }
        let mut header = Bitset::new(self.column_count);
        header.read_from(&wire[..header_bytes])?;

        let mut bits = Bitset::new(self.bool_count);
        assign_range(&mut bits, 0, &header, 0, self.bool_count);
        *row.bits_mut() = bits;

        let mut pos = header_bytes;
        let mut bitpos = self.bool_count;
        for &(_col, st, off) in &self.numeric_columns {
            let width = st.byte_width();
            let changed = header.get(bitpos)?;
            if changed {
                let bytes = wire.get(pos..pos + width).ok_or(Error::DecodeShort {
                    need: pos + width,
                    have: wire.len(),
                })?;
                row.scalars_mut()[off..off + width].copy_from_slice(bytes);
                pos += width;
            } else {
                let prev = self.prev_scalars[off..off + width].to_vec();
                row.scalars_mut()[off..off + width].copy_from_slice(&prev);
            }
            bitpos += 1;
        }
        for (k, _col) in self.string_columns.iter().enumerate() {
            let changed = header.get(bitpos)?;
            if changed {
                if pos + 2 > wire.len() {
                    return Err(Error::DecodeShort {
                        need: pos + 2,
                        have: wire.len(),
                    });
                }
                let len = u16::from_le_bytes(wire[pos..pos + 2].try_into().unwrap()) as usize;
                pos += 2;
                let bytes = wire.get(pos..pos + len).ok_or(Error::DecodeShort {
                    need: pos + len,
                    have: wire.len(),
                })?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|_| Error::CorruptFile {
                        offset: pos as u64,
                        message: "string column is not valid UTF-8".to_string(),
                    })?
                    .to_string();
                row.strings_mut()[k] = s;
                pos += len;
            } else {
                row.strings_mut()[k] = self.prev_strings[k].clone();
            }
            bitpos += 1;
        }

        self.prev_bits = row.bits().clone();
        self.prev_scalars.copy_from_slice(row.scalars());
        self.prev_strings.clone_from_slice(row.strings());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_type::{ColumnType, Value};
    use test_log::test;

    #[test]
    fn s2_zoh_compression() {
        let layout = Layout::new(vec![
            ("b".to_string(), ColumnType::Bool),
            ("k".to_string(), ColumnType::Int64),
        ])
        .unwrap();
        let mut enc = ZohCodec::new();
        enc.setup(&layout).unwrap();
        let mut dec = ZohCodec::new();
        dec.setup(&layout).unwrap();

        let inputs = [(true, 100i64), (true, 100), (true, 100), (false, 100)];
        let mut wires = Vec::new();
        for (b, k) in inputs {
            let mut row = Row::new(&layout);
            row.set(0, Value::Bool(b)).unwrap();
            row.set(1, Value::I64(k)).unwrap();
            let mut buf = Vec::new();
            enc.serialize(&row, &mut buf).unwrap();
            wires.push(buf);
        }
        assert_eq!(wires[0].len(), 1 + 8); // full emit: header byte + 8-byte i64 payload
        assert_eq!(wires[1].len(), 1); // header only, no change flags set
        assert_eq!(wires[2].len(), 1);
        assert_eq!(wires[3].len(), 1);

        for (i, (b, k)) in inputs.iter().enumerate() {
            let mut row = Row::new(&layout);
            dec.deserialize(&wires[i], &mut row).unwrap();
            assert_eq!(row.get(0).unwrap(), Value::Bool(*b));
            assert_eq!(row.get(1).unwrap(), Value::I64(*k));
        }
    }

    #[test]
    fn empty_wire_replays_previous_state() {
        let layout = Layout::new(vec![("k".to_string(), ColumnType::Int32)]).unwrap();
        let mut enc = ZohCodec::new();
        enc.setup(&layout).unwrap();
        let mut dec = ZohCodec::new();
        dec.setup(&layout).unwrap();

        let mut row = Row::new(&layout);
        row.set(0, Value::I32(42)).unwrap();
        let mut buf = Vec::new();
        enc.serialize(&row, &mut buf).unwrap();
        let mut decoded = Row::new(&layout);
        dec.deserialize(&buf, &mut decoded).unwrap();

        let mut replay = Row::new(&layout);
        dec.deserialize(&[], &mut replay).unwrap();
        assert_eq!(replay.get(0).unwrap(), Value::I32(42));
    }

    #[test]
    fn reset_forces_full_emit_again() {
        let layout = Layout::new(vec![("k".to_string(), ColumnType::Int32)]).unwrap();
        let mut codec = ZohCodec::new();
        codec.setup(&layout).unwrap();
        let mut row = Row::new(&layout);
        row.set(0, Value::I32(5)).unwrap();
        let mut first = Vec::new();
        codec.serialize(&row, &mut first).unwrap();

        codec.reset();
        let mut second = Vec::new();
        codec.serialize(&row, &mut second).unwrap();
        assert_eq!(first, second);
    }
}
