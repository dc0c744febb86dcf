//! Dense per-row codec (spec §4.4.1): bits, then scalars, then string
//! lengths, then string payloads. No inter-row state.

use bcsv_base::{Bitset, Error, Result};

use crate::codec::RowCodec;
use crate::layout::{Layout, LayoutGuard};
use crate::row::Row;

pub(crate) struct FlatCodec {
    layout: Option<Layout>,
    guard: Option<LayoutGuard>,
}

impl FlatCodec {
    pub fn new() -> FlatCodec {
        FlatCodec {
            layout: None,
            guard: None,
        }
    }

    fn layout(&self) -> &Layout {
        self.layout.as_ref().expect("setup() called before use")
    }
}

impl RowCodec for FlatCodec {
    fn setup(&mut self, layout: &Layout) -> Result<()> {
        self.guard = Some(layout.acquire_guard());
        self.layout = Some(layout.clone());
        Ok(())
    }

    fn reset(&mut self) {
        // No inter-row state: a no-op, as the dispatch's is_delta()/is_zoh()
        // helpers are meant to let the writer skip calling this at all.
    }

    fn serialize(&mut self, row: &Row, out: &mut Vec<u8>) -> Result<()> {
        let layout = self.layout().clone();
        let bits_size = layout.wire_bits_size();
        let string_count = layout.string_count();

        let total_string_bytes: usize = row.strings().iter().map(|s| s.len()).sum();
        let start = out.len();
        out.reserve(bits_size + layout.wire_data_size() + 2 * string_count + total_string_bytes);

        let mut bits_buf = vec![0u8; bits_size];
        row.bits().write_to(&mut bits_buf)?;
        out.extend_from_slice(&bits_buf);

        out.extend_from_slice(row.scalars());

        for s in row.strings() {
            if s.len() > 65_535 {
                out.truncate(start);
                return Err(Error::StringTooLong {
                    index: 0,
                    length: s.len(),
                });
            }
            out.extend_from_slice(&(s.len() as u16).to_le_bytes());
        }
        for s in row.strings() {
            out.extend_from_slice(s.as_bytes());
        }
        Ok(())
    }

    fn deserialize(&mut self, wire: &[u8], row: &mut Row) -> Result<()> {
        let layout = self.layout().clone();
        let bits_size = layout.wire_bits_size();
        let scalars_size = layout.wire_data_size();
        let string_count = layout.string_count();
        let fixed = bits_size + scalars_size + 2 * string_count;
        if wire.len() < fixed {
            return Err(Error::DecodeShort {
                need: fixed,
                have: wire.len(),
            });
        }

        let mut bits = Bitset::new(layout.bool_count());
        bits.read_from(&wire[..bits_size])?;
        *row.bits_mut() = bits;

        let scalars_start = bits_size;
        row.scalars_mut().copy_from_slice(&wire[scalars_start..scalars_start + scalars_size]);

        let lengths_start = scalars_start + scalars_size;
        let mut lens = Vec::with_capacity(string_count);
        for k in 0..string_count {
            let off = lengths_start + 2 * k;
            lens.push(u16::from_le_bytes(wire[off..off + 2].try_into().unwrap()) as usize);
        }

        let mut payload_off = lengths_start + 2 * string_count;
        for (k, len) in lens.into_iter().enumerate() {
            let bytes = wire.get(payload_off..payload_off + len).ok_or(Error::DecodeShort {
                need: payload_off + len,
                have: wire.len(),
            })?;
            let s = std::str::from_utf8(bytes)
                .map_err(|_| Error::CorruptFile {
                    offset: payload_off as u64,
                    message: "string column is not valid UTF-8".to_string(),
                })?
                .to_string();
            row.strings_mut()[k] = s;
            payload_off += len;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_type::{ColumnType, Value};
    use test_log::test;

    #[test]
    fn round_trip_s1() {
        let layout = Layout::new(vec![
            ("x".to_string(), ColumnType::Int32),
            ("y".to_string(), ColumnType::Double),
            ("s".to_string(), ColumnType::String),
        ])
        .unwrap();
        let mut codec = FlatCodec::new();
        codec.setup(&layout).unwrap();

        let rows = [
            (7i32, 3.5f64, "hi"),
            (-1, 0.0, ""),
            (1 << 30, 1e-300, "\u{3b1}\u{3b2}\u{3b3}"),
        ];
        for (x, y, s) in rows {
            let mut row = Row::new(&layout);
            row.set(0, Value::I32(x)).unwrap();
            row.set(1, Value::F64(y)).unwrap();
            row.set(2, Value::Str(s.to_string())).unwrap();

            let mut buf = Vec::new();
            codec.serialize(&row, &mut buf).unwrap();
            assert_eq!(buf.len(), 0 + 12 + 2 + s.len());

            let mut decoded = Row::new(&layout);
            codec.deserialize(&buf, &mut decoded).unwrap();
            assert_eq!(decoded.get(0).unwrap(), Value::I32(x));
            assert_eq!(decoded.get(1).unwrap(), Value::F64(y));
            assert_eq!(decoded.get(2).unwrap(), Value::Str(s.to_string()));
        }
    }

    #[test]
    fn short_buffer_is_decode_short() {
        let layout = Layout::new(vec![("x".to_string(), ColumnType::Int32)]).unwrap();
        let mut codec = FlatCodec::new();
        codec.setup(&layout).unwrap();
        let mut row = Row::new(&layout);
        let err = codec.deserialize(&[0, 1], &mut row).unwrap_err();
        assert!(matches!(err, Error::DecodeShort { .. }));
    }
}
