//! Gradient-delta codec (spec §4.4.3, `DELTA002`): each numeric column gets
//! a small per-row code (`ZOH`, `FOC`, or `DELTA` at some byte width no
//! larger than the column's own), chosen by comparing against both the
//! codec's previous-row value and its running per-column gradient. Integer
//! deltas are zigzag-coded; float deltas are XOR-coded against the previous
//! bit pattern, which shrinks well for values that share high-order bits.
//!
//! Both previous-row state and the gradient are zero-initialized, so the
//! first row of a packet needs no special case: it naturally encodes as a
//! delta (or XOR) from zero. `FOC` is only considered from the third row of
//! a packet onward, since a gradient needs two prior rows to be meaningful.

use bcsv_base::{assign_range, Bitset, Error, Result};

use crate::codec::RowCodec;
use crate::column_type::ScalarType;
use crate::layout::{Layout, LayoutGuard};
use crate::row::Row;

const CODE_ZOH: u8 = 0;
const CODE_FOC: u8 = 1;

/// Delta byte-widths a column of this scalar byte width may use, in
/// ascending order: codes `2..=width+1` carry a `k-1`-byte delta (spec
/// §4.4.3), so every integer width from 1 up to the column's own is
/// available, not just powers of two.
fn candidates_for(width: usize) -> &'static [usize] {
    match width {
        1 => &[1],
        2 => &[1, 2],
        4 => &[1, 2, 3, 4],
        8 => &[1, 2, 3, 4, 5, 6, 7, 8],
        _ => unreachable!("scalar byte widths are 1, 2, 4, or 8"),
    }
}

fn load_width(bytes: &[u8], width: usize) -> u64 {
    match width {
        1 => bytes[0] as u64,
        2 => u16::from_le_bytes(bytes[..2].try_into().unwrap()) as u64,
        4 => u32::from_le_bytes(bytes[..4].try_into().unwrap()) as u64,
        8 => u64::from_le_bytes(bytes[..8].try_into().unwrap()),
        _ => unreachable!("scalar byte widths are 1, 2, 4, or 8"),
    }
}

fn store_width(out: &mut [u8], width: usize, value: u64) {
    match width {
        1 => out[0] = value as u8,
        2 => out[..2].copy_from_slice(&(value as u16).to_le_bytes()),
        4 => out[..4].copy_from_slice(&(value as u32).to_le_bytes()),
        8 => out[..8].copy_from_slice(&value.to_le_bytes()),
        _ => unreachable!("scalar byte widths are 1, 2, 4, or 8"),
    }
}

/// Reads `w` little-endian bytes (`1..=8`, any width, not just powers of
/// two) and zero-extends to `u64` — the decode half of the VLE delta field.
fn load_payload(bytes: &[u8], w: usize) -> u64 {
    let mut v = 0u64;
    for i in 0..w {
        v |= (bytes[i] as u64) << (8 * i);
    }
    v
}

/// Appends the low `w` little-endian bytes of `value` to `out`.
fn push_payload(out: &mut Vec<u8>, w: usize, value: u64) {
    for i in 0..w {
        out.push(((value >> (8 * i)) & 0xff) as u8);
    }
}

/// Smallest width in `candidates` whose byte count can hold `value`
/// losslessly (i.e. every bit above that width is zero).
fn min_width_for(candidates: &[usize], value: u64) -> usize {
    for &w in candidates {
        if w >= 8 || value < (1u64 << (8 * w)) {
            return w;
        }
    }
    *candidates.last().expect("candidates is never empty")
}

fn wrapping_sub_width(width: usize, cur: u64, prev: u64) -> u64 {
    match width {
        1 => (cur as u8).wrapping_sub(prev as u8) as u64,
        2 => (cur as u16).wrapping_sub(prev as u16) as u64,
        4 => (cur as u32).wrapping_sub(prev as u32) as u64,
        8 => cur.wrapping_sub(prev),
        _ => unreachable!("scalar byte widths are 1, 2, 4, or 8"),
    }
}

fn wrapping_add_width(width: usize, a: u64, b: u64) -> u64 {
    match width {
        1 => (a as u8).wrapping_add(b as u8) as u64,
        2 => (a as u16).wrapping_add(b as u16) as u64,
        4 => (a as u32).wrapping_add(b as u32) as u64,
        8 => a.wrapping_add(b),
        _ => unreachable!("scalar byte widths are 1, 2, 4, or 8"),
    }
}

fn float_add_width(width: usize, a: u64, b: u64) -> u64 {
    match width {
        4 => (f32::from_bits(a as u32) + f32::from_bits(b as u32)).to_bits() as u64,
        8 => (f64::from_bits(a) + f64::from_bits(b)).to_bits(),
        _ => unreachable!("floats are 4 or 8 bytes wide"),
    }
}

fn float_sub_width(width: usize, a: u64, b: u64) -> u64 {
    match width {
        4 => (f32::from_bits(a as u32) - f32::from_bits(b as u32)).to_bits() as u64,
        8 => (f64::from_bits(a) - f64::from_bits(b)).to_bits(),
        _ => unreachable!("floats are 4 or 8 bytes wide"),
    }
}

/// Protobuf-style zigzag, scaled to the column's own bit width so the
/// result never exceeds `width` bytes.
fn zigzag_width(width: usize, raw: u64) -> u64 {
    match width {
        1 => {
            let v = raw as i8;
            (((v << 1) ^ (v >> 7)) as u8) as u64
        }
        2 => {
            let v = raw as i16;
            (((v << 1) ^ (v >> 15)) as u16) as u64
        }
        4 => {
            let v = raw as i32;
            (((v << 1) ^ (v >> 31)) as u32) as u64
        }
        8 => {
            let v = raw as i64;
            ((v << 1) ^ (v >> 63)) as u64
        }
        _ => unreachable!("scalar byte widths are 1, 2, 4, or 8"),
    }
}

fn unzigzag_width(width: usize, zz: u64) -> u64 {
    match width {
        1 => {
            let z = zz as u8;
            (((z >> 1) as i8) ^ -((z & 1) as i8)) as u8 as u64
        }
        2 => {
            let z = zz as u16;
            (((z >> 1) as i16) ^ -((z & 1) as i16)) as u16 as u64
        }
        4 => {
            let z = zz as u32;
            (((z >> 1) as i32) ^ -((z & 1) as i32)) as u32 as u64
        }
        8 => {
            let z = zz;
            ((z >> 1) as i64 ^ -((z & 1) as i64)) as u64
        }
        _ => unreachable!("scalar byte widths are 1, 2, 4, or 8"),
    }
}

pub(crate) struct DeltaCodec {
    layout: Option<Layout>,
    guard: Option<LayoutGuard>,
    numeric_columns: Vec<(usize, ScalarType, usize)>,
    string_columns: Vec<usize>,
    bool_count: usize,
    header_bits: usize,
    rows_in_packet: usize,
    prev_bits: Bitset,
    prev_scalars: Vec<u8>,
    prev_gradient: Vec<u8>,
    prev_strings: Vec<String>,
}

impl DeltaCodec {
    pub fn new() -> DeltaCodec {
        DeltaCodec {
            layout: None,
            guard: None,
            numeric_columns: Vec::new(),
            string_columns: Vec::new(),
            bool_count: 0,
            header_bits: 0,
            rows_in_packet: 0,
            prev_bits: Bitset::new(0),
            prev_scalars: Vec::new(),
            prev_gradient: Vec::new(),
            prev_strings: Vec::new(),
        }
    }
}

impl RowCodec for DeltaCodec {
    fn setup(&mut self, layout: &Layout) -> Result<()> {
        let mut numeric_columns = Vec::new();
        let mut header_bits = layout.bool_count();
        for i in layout.numeric_columns_ordered() {
            let ty = layout.column_type(i)?;
            let st = ty.scalar_type().expect("numeric_columns_ordered() only yields scalar columns");
            let off = layout.column_offset(i)?;
            header_bits += st.delta_header_bits() as usize;
            numeric_columns.push((i, st, off));
        }
        self.numeric_columns = numeric_columns;
        self.string_columns = layout.string_columns_ordered();
        header_bits += self.string_columns.len();
        self.bool_count = layout.bool_count();
        self.header_bits = header_bits;
        self.prev_bits = Bitset::new(self.bool_count);
        self.prev_scalars = vec![0u8; layout.scalar_size()];
        self.prev_gradient = vec![0u8; layout.scalar_size()];
        self.prev_strings = vec![String::new(); layout.string_count()];
        self.rows_in_packet = 0;
        self.guard = Some(layout.acquire_guard());
        self.layout = Some(layout.clone());
        Ok(())
    }

    fn reset(&mut self) {
        self.prev_bits = Bitset::new(self.bool_count);
        for b in self.prev_scalars.iter_mut() {
            *b = 0;
        }
        for b in self.prev_gradient.iter_mut() {
            *b = 0;
        }
        for s in self.prev_strings.iter_mut() {
            s.clear();
        }
        self.rows_in_packet = 0;
    }

    fn serialize(&mut self, row: &Row, out: &mut Vec<u8>) -> Result<()> {
        let mut header = Bitset::new(self.header_bits);
        assign_range(&mut header, 0, row.bits(), 0, self.bool_count);

        let foc_eligible = self.rows_in_packet >= 2;
        let mut payload = Vec::new();
        let mut bitpos = self.bool_count;
        for &(_col, st, off) in &self.numeric_columns {
            let width = st.byte_width();
            let header_bits_w = st.delta_header_bits();
            let is_float = st.is_float();

            let cur_u = load_width(&row.scalars()[off..off + width], width);
            let prev_u = load_width(&self.prev_scalars[off..off + width], width);
            let grad_u = load_width(&self.prev_gradient[off..off + width], width);

            let code = if cur_u == prev_u {
                store_width(&mut self.prev_gradient[off..off + width], width, 0);
                CODE_ZOH
            } else if foc_eligible
                && (if is_float {
                    float_add_width(width, prev_u, grad_u)
                } else {
                    wrapping_add_width(width, prev_u, grad_u)
                }) == cur_u
            {
                // Gradient unchanged — prediction is consistent.
                CODE_FOC
            } else {
                let new_delta = if is_float {
                    float_sub_width(width, cur_u, prev_u)
                } else {
                    wrapping_sub_width(width, cur_u, prev_u)
                };
                let payload_val = if is_float { cur_u ^ prev_u } else { zigzag_width(width, new_delta) };
                let candidates = candidates_for(width);
                let w = min_width_for(candidates, payload_val);
                let idx = candidates.iter().position(|&x| x == w).expect("w came from candidates");
                push_payload(&mut payload, w, payload_val);
                store_width(&mut self.prev_gradient[off..off + width], width, new_delta);
                2 + idx as u8
            };
            header.encode(bitpos, header_bits_w, code)?;
            bitpos += header_bits_w as usize;
        }

        for (k, &col) in self.string_columns.iter().enumerate() {
            let cur = &row.strings()[k];
            let changed = *cur != self.prev_strings[k];
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
        self.rows_in_packet += 1;
        Ok(())
    }

    fn deserialize(&mut self, wire: &[u8], row: &mut Row) -> Result<()> {
        if wire.is_empty() {
            // Writer's byte-identical-repeat optimization (spec §4.5/§4.6):
            // every column was unchanged, which is exactly the state a full
            // emit of all-ZOH codes would produce, so the gradient zeros too.
            *row.bits_mut() = self.prev_bits.clone();
            row.scalars_mut().copy_from_slice(&self.prev_scalars);
            row.strings_mut().clone_from_slice(&self.prev_strings);
            for b in self.prev_gradient.iter_mut() {
                *b = 0;
            }
            self.rows_in_packet += 1;
            return Ok(());
        }
        let header_bytes = (self.header_bits + 7) / 8;
        if wire.len() < header_bytes {
            return Err(Error::DecodeShort {
                need: header_bytes,
                have: wire.len(),
            });
        }
        let mut header = Bitset::new(self.header_bits);
        if header_bytes > 0 {
            header.read_from(&wire[..header_bytes])?;
        }

        let mut bits = Bitset::new(self.bool_count);
        assign_range(&mut bits, 0, &header, 0, self.bool_count);
        *row.bits_mut() = bits;

        let mut pos = header_bytes;
        let mut bitpos = self.bool_count;
        for &(_col, st, off) in &self.numeric_columns {
            let width = st.byte_width();
            let header_bits_w = st.delta_header_bits();
            let is_float = st.is_float();
            let code = header.decode(bitpos, header_bits_w)?;
            bitpos += header_bits_w as usize;

            let prev_u = load_width(&self.prev_scalars[off..off + width], width);
            let grad_u = load_width(&self.prev_gradient[off..off + width], width);

            let (cur_u, new_delta) = match code {
                CODE_ZOH => (prev_u, wrapping_sub_width(width, prev_u, prev_u)),
                CODE_FOC => {
                    let cur = if is_float {
                        float_add_width(width, prev_u, grad_u)
                    } else {
                        wrapping_add_width(width, prev_u, grad_u)
                    };
                    (cur, grad_u)
                }
                c => {
                    let idx = (c - 2) as usize;
                    let candidates = candidates_for(width);
                    let w = *candidates.get(idx).ok_or_else(|| Error::CorruptFile {
                        offset: pos as u64,
                        message: format!("invalid delta code {c} for a {width}-byte column"),
                    })?;
                    if pos + w > wire.len() {
                        return Err(Error::DecodeShort {
                            need: pos + w,
                            have: wire.len(),
                        });
                    }
                    let payload_val = load_payload(&wire[pos..pos + w], w);
                    pos += w;
                    if is_float {
                        let cur = prev_u ^ payload_val;
                        let delta = float_sub_width(width, cur, prev_u);
                        (cur, delta)
                    } else {
                        let delta_bits = unzigzag_width(width, payload_val);
                        let cur = wrapping_add_width(width, prev_u, delta_bits);
                        (cur, delta_bits)
                    }
                }
            };
            store_width(&mut row.scalars_mut()[off..off + width], width, cur_u);
            store_width(&mut self.prev_gradient[off..off + width], width, new_delta);
        }

        for k in 0..self.string_columns.len() {
            let changed = header.get(bitpos)?;
            bitpos += 1;
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
        }

        self.prev_bits = row.bits().clone();
        self.prev_scalars.copy_from_slice(row.scalars());
        self.prev_strings.clone_from_slice(row.strings());
        self.rows_in_packet += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_type::{ColumnType, Value};
    use test_log::test;

    fn roundtrip(layout: &Layout, values: &[i64]) -> Vec<Vec<u8>> {
        let mut enc = DeltaCodec::new();
        enc.setup(layout).unwrap();
        let mut dec = DeltaCodec::new();
        dec.setup(layout).unwrap();

        let mut wires = Vec::new();
        for &v in values {
            let mut row = Row::new(layout);
            row.set(0, Value::I64(v)).unwrap();
            let mut buf = Vec::new();
            enc.serialize(&row, &mut buf).unwrap();
            wires.push(buf);
        }
        for (i, &v) in values.iter().enumerate() {
            let mut row = Row::new(layout);
            dec.deserialize(&wires[i], &mut row).unwrap();
            assert_eq!(row.get(0).unwrap(), Value::I64(v));
        }
        wires
    }

    #[test]
    fn s3_first_order_continue() {
        // A constant stride of 10 establishes a gradient by row 1 and should
        // collapse to FOC (header only, no payload) from row 2 onward.
        let layout = Layout::new(vec![("k".to_string(), ColumnType::Int64)]).unwrap();
        let wires = roundtrip(&layout, &[1000, 1010, 1020, 1030, 1040]);
        let foc_len = wires[2].len();
        assert_eq!(wires[3].len(), foc_len);
        assert_eq!(wires[4].len(), foc_len);
        assert!(foc_len <= wires[1].len());
    }

    #[test]
    fn foc_not_used_before_third_row() {
        // Even if row 1 happens to match a prediction from a zero gradient,
        // FOC must not fire before the third row.
        let layout = Layout::new(vec![("k".to_string(), ColumnType::Int64)]).unwrap();
        let mut enc = DeltaCodec::new();
        enc.setup(&layout).unwrap();
        let mut row0 = Row::new(&layout);
        row0.set(0, Value::I64(0)).unwrap();
        let mut buf0 = Vec::new();
        enc.serialize(&row0, &mut buf0).unwrap();
        assert_eq!(enc.rows_in_packet, 1);
    }

    #[test]
    fn s4_zoh_plateau() {
        // A run of identical values is pure ZOH: header only, no payload growth.
        let layout = Layout::new(vec![("k".to_string(), ColumnType::Int64)]).unwrap();
        let wires = roundtrip(&layout, &[5, 5, 5, 5]);
        let header_only_len = wires[1].len();
        assert_eq!(wires[2].len(), header_only_len);
        assert_eq!(wires[3].len(), header_only_len);
    }

    #[test]
    fn negative_and_wraparound_deltas_roundtrip() {
        let layout = Layout::new(vec![("k".to_string(), ColumnType::Int32)]).unwrap();
        roundtrip(&layout, &[0, i32::MAX as i64, i32::MIN as i64, -1, 1]);
    }

    #[test]
    fn float_delta_roundtrips() {
        let layout = Layout::new(vec![("f".to_string(), ColumnType::Double)]).unwrap();
        let mut enc = DeltaCodec::new();
        enc.setup(&layout).unwrap();
        let mut dec = DeltaCodec::new();
        dec.setup(&layout).unwrap();

        let values = [0.0f64, 1.5, 1.5, 1.5 + 0.25, 1.5 + 0.5, -3.25];
        let mut wires = Vec::new();
        for v in values {
            let mut row = Row::new(&layout);
            row.set(0, Value::F64(v)).unwrap();
            let mut buf = Vec::new();
            enc.serialize(&row, &mut buf).unwrap();
            wires.push(buf);
        }
        for (i, v) in values.iter().enumerate() {
            let mut row = Row::new(&layout);
            dec.deserialize(&wires[i], &mut row).unwrap();
            assert_eq!(row.get(0).unwrap(), Value::F64(*v));
        }
    }

    #[test]
    fn foc_emit_preserves_gradient_for_float_columns() {
        // IEEE-754 subtraction is not the exact inverse of the addition used
        // for FOC prediction: fl(fl(a+g)-a) can differ from g by a ulp. If an
        // FOC emit overwrote the gradient with that recomputed (and wrong)
        // value instead of leaving it untouched, the encoder and decoder
        // would disagree about the gradient from that point on, and a later
        // row could silently decode to the wrong value. These four values
        // are chosen so that happens if the gradient is touched on FOC.
        let layout = Layout::new(vec![("f".to_string(), ColumnType::Double)]).unwrap();
        let values = [923801.8757964515, -677630.6933919622, -2279063.262580376, -3880495.8317687903];
        let wires = roundtrip_f64(&layout, &values);
        assert_eq!(wires.len(), values.len());
    }

    fn roundtrip_f64(layout: &Layout, values: &[f64]) -> Vec<Vec<u8>> {
        let mut enc = DeltaCodec::new();
        enc.setup(layout).unwrap();
        let mut dec = DeltaCodec::new();
        dec.setup(layout).unwrap();

        let mut wires = Vec::new();
        for &v in values {
            let mut row = Row::new(layout);
            row.set(0, Value::F64(v)).unwrap();
            let mut buf = Vec::new();
            enc.serialize(&row, &mut buf).unwrap();
            wires.push(buf);
        }
        for (i, &v) in values.iter().enumerate() {
            let mut row = Row::new(layout);
            dec.deserialize(&wires[i], &mut row).unwrap();
            assert_eq!(row.get(0).unwrap(), Value::F64(v), "row {i} decoded incorrectly");
        }
        wires
    }

    #[test]
    fn unknown_delta_code_is_corrupt_file() {
        let layout = Layout::new(vec![("k".to_string(), ColumnType::Uint8)]).unwrap();
        let mut dec = DeltaCodec::new();
        dec.setup(&layout).unwrap();
        // A 1-byte column has only codes {0, 1, 2}; 3 is out of range.
        let mut header = Bitset::new(dec.header_bits);
        header.encode(0, ScalarType::U8.delta_header_bits(), 3).unwrap();
        let wire = header.to_bytes();
        let mut row = Row::new(&layout);
        let err = dec.deserialize(&wire, &mut row).unwrap_err();
        assert!(matches!(err, Error::CorruptFile { .. }));
    }
}
