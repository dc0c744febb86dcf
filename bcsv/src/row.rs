//! In-memory record storage (§3, §4.3): `bits | scalars | strings`, tied to
//! a `Layout`. `Row` owns its data; `RowView` is a zero-copy accessor over a
//! FLAT-serialized buffer, supporting in-place writes that don't change the
//! buffer's size.

use bcsv_base::{Bitset, Error, Result};

use crate::column_type::{ColumnType, Value};
use crate::layout::Layout;

/// One record against a `Layout`. Storage is split into three regions:
/// `bits` (bool values), `scalars` (fixed-width non-bool, non-string
/// columns, packed with no padding), and `strings` (owned UTF-8 values, one
/// per STRING column).
pub struct Row {
    layout: Layout,
    tracked: bool,
    bits: Bitset,
    change_map: Option<Bitset>,
    scalars: Vec<u8>,
    strings: Vec<String>,
}

impl Row {
    pub fn new(layout: &Layout) -> Row {
        Row::with_tracking(layout, false)
    }

    /// `tracked` enables the row's own change map (spec §4.3); this is
    /// independent of the per-row change detection a ZOH/DELTA codec does
    /// against its own previous-row state.
    pub fn with_tracking(layout: &Layout, tracked: bool) -> Row {
        let bits = Bitset::new(layout.bool_count());
        let change_map = tracked.then(|| Bitset::new(layout.column_count()));
        let scalars = vec![0u8; layout.scalar_size()];
        let strings = vec![String::new(); layout.string_count()];
        Row {
            layout: layout.clone(),
            tracked,
            bits,
            change_map,
            scalars,
            strings,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn is_tracked(&self) -> bool {
        self.tracked
    }

    pub fn clear(&mut self) {
        self.bits.reset_all();
        for b in self.scalars.iter_mut() {
            *b = 0;
        }
        for s in self.strings.iter_mut() {
            s.clear();
        }
        if let Some(cm) = &mut self.change_map {
            cm.reset_all();
        }
    }

    /// True iff column `i` was written with a different value since the
    /// last `clear()`. Only meaningful on a tracked row.
    pub fn changed(&self, i: usize) -> Result<bool> {
        match &self.change_map {
            Some(cm) => cm.get(i),
            None => Ok(false),
        }
    }

    fn string_slot(&self, i: usize) -> Result<usize> {
        self.layout
            .with_plan(|plan| plan.string_columns.iter().position(|&c| c == i))
            .ok_or(Error::TypeMismatch {
                expected: "STRING",
                got: "non-string column",
            })
    }

    pub fn get(&self, i: usize) -> Result<Value> {
        let ty = self.layout.column_type(i)?;
        match ty {
            ColumnType::Bool => {
                let bit_idx = self.layout.column_bool_index(i)?;
                Ok(Value::Bool(self.bits.get(bit_idx)?))
            }
            ColumnType::String => {
                let slot = self.string_slot(i)?;
                Ok(Value::Str(self.strings[slot].clone()))
            }
            scalar_ty => {
                let off = self.layout.column_offset(i)?;
                let width = scalar_ty.scalar_size().expect("scalar column has a fixed width");
                Ok(decode_scalar(scalar_ty, &self.scalars[off..off + width]))
            }
        }
    }

    pub fn set(&mut self, i: usize, value: Value) -> Result<()> {
        let ty = self.layout.column_type(i)?;
        let value_ty = value.column_type();
        if ty != value_ty {
            return Err(Error::TypeMismatch {
                expected: ty.name(),
                got: value_ty.name(),
            });
        }
        match (ty, value) {
            (ColumnType::Bool, Value::Bool(b)) => {
                let bit_idx = self.layout.column_bool_index(i)?;
                self.bits.set(bit_idx, b)?;
                // bool columns are always "changed": their bit IS the value.
                if let Some(cm) = &mut self.change_map {
                    cm.set(i, true)?;
                }
            }
            (ColumnType::String, Value::Str(mut s)) => {
                if s.len() > 65_535 {
                    let mut cut = 65_535;
                    while !s.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    tracing::debug!(
                        target: "bcsv",
                        column = i,
                        original_len = s.len(),
                        truncated_len = cut,
                        "string exceeds 65535 bytes, truncating"
                    );
                    s.truncate(cut);
                }
                let slot = self.string_slot(i)?;
                let changed = self.strings[slot] != s;
                self.strings[slot] = s;
                if changed {
                    if let Some(cm) = &mut self.change_map {
                        cm.set(i, true)?;
                    }
                }
            }
            (scalar_ty, value) => {
                let off = self.layout.column_offset(i)?;
                let width = scalar_ty.scalar_size().expect("scalar column has a fixed width");
                let mut buf = [0u8; 8];
                encode_scalar(scalar_ty, &value, &mut buf[..width]);
                let changed = self.scalars[off..off + width] != buf[..width];
                self.scalars[off..off + width].copy_from_slice(&buf[..width]);
                if changed {
                    if let Some(cm) = &mut self.change_map {
                        cm.set(i, true)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Read-only callback-driven iteration over `[start, start+count)` (spec
    /// §4.3), dispatched on each column's type tag via [`Value`].
    pub fn visit_const(&self, start: usize, count: usize, mut f: impl FnMut(usize, Value)) -> Result<()> {
        for i in start..start + count {
            f(i, self.get(i)?);
        }
        Ok(())
    }

    /// Read-only variant of [`visit_const`](Row::visit_const) over every column.
    pub fn visit_const_all(&self, f: impl FnMut(usize, Value)) -> Result<()> {
        self.visit_const(0, self.layout.column_count(), f)
    }

    /// Mutable callback-driven iteration over `[start, start+count)`: the
    /// callback returns each column's new value, written back through
    /// [`Row::set`] (so change tracking still applies).
    pub fn visit(&mut self, start: usize, count: usize, mut f: impl FnMut(usize, Value) -> Value) -> Result<()> {
        for i in start..start + count {
            let next = f(i, self.get(i)?);
            self.set(i, next)?;
        }
        Ok(())
    }

    /// Mutable variant of [`visit`](Row::visit) over every column.
    pub fn visit_all(&mut self, f: impl FnMut(usize, Value) -> Value) -> Result<()> {
        let count = self.layout.column_count();
        self.visit(0, count, f)
    }

    pub(crate) fn bits(&self) -> &Bitset {
        &self.bits
    }

    pub(crate) fn bits_mut(&mut self) -> &mut Bitset {
        &mut self.bits
    }

    pub(crate) fn scalars(&self) -> &[u8] {
        &self.scalars
    }

    pub(crate) fn scalars_mut(&mut self) -> &mut [u8] {
        &mut self.scalars
    }

    pub(crate) fn strings(&self) -> &[String] {
        &self.strings
    }

    pub(crate) fn strings_mut(&mut self) -> &mut Vec<String> {
        &mut self.strings
    }

    /// True iff every column holds the same value as `other` (bits, scalars,
    /// and strings all compare equal). Used by the Writer to detect an
    /// exact repeat of the previous row and skip emitting it entirely
    /// (spec §4.5: a zero-length byte-index entry).
    pub(crate) fn matches_content(&self, other: &Row) -> bool {
        self.bits == other.bits && self.scalars == other.scalars && self.strings == other.strings
    }
}

impl Clone for Row {
    fn clone(&self) -> Row {
        Row {
            layout: self.layout.clone(),
            tracked: self.tracked,
            bits: self.bits.clone(),
            change_map: self.change_map.clone(),
            scalars: self.scalars.clone(),
            strings: self.strings.clone(),
        }
    }
}

pub(crate) fn encode_scalar(ty: ColumnType, value: &Value, out: &mut [u8]) {
    match (ty, value) {
        (ColumnType::Uint8, Value::U8(v)) => out[0] = *v,
        (ColumnType::Int8, Value::I8(v)) => out[0] = *v as u8,
        (ColumnType::Uint16, Value::U16(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (ColumnType::Int16, Value::I16(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (ColumnType::Uint32, Value::U32(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (ColumnType::Int32, Value::I32(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (ColumnType::Uint64, Value::U64(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (ColumnType::Int64, Value::I64(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (ColumnType::Float, Value::F32(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (ColumnType::Double, Value::F64(v)) => out.copy_from_slice(&v.to_le_bytes()),
        _ => unreachable!("type-checked by caller"),
    }
}

pub(crate) fn decode_scalar(ty: ColumnType, bytes: &[u8]) -> Value {
    match ty {
        ColumnType::Uint8 => Value::U8(bytes[0]),
        ColumnType::Int8 => Value::I8(bytes[0] as i8),
        ColumnType::Uint16 => Value::U16(u16::from_le_bytes(bytes.try_into().unwrap())),
        ColumnType::Int16 => Value::I16(i16::from_le_bytes(bytes.try_into().unwrap())),
        ColumnType::Uint32 => Value::U32(u32::from_le_bytes(bytes.try_into().unwrap())),
        ColumnType::Int32 => Value::I32(i32::from_le_bytes(bytes.try_into().unwrap())),
        ColumnType::Uint64 => Value::U64(u64::from_le_bytes(bytes.try_into().unwrap())),
        ColumnType::Int64 => Value::I64(i64::from_le_bytes(bytes.try_into().unwrap())),
        ColumnType::Float => Value::F32(f32::from_le_bytes(bytes.try_into().unwrap())),
        ColumnType::Double => Value::F64(f64::from_le_bytes(bytes.try_into().unwrap())),
        ColumnType::Bool | ColumnType::String => unreachable!("handled separately"),
    }
}

/// Non-owning view over a FLAT-serialized row buffer (spec §4.3). Carries a
/// `Layout` handle plus the wire-format section offsets needed to locate
/// each column in place without copying. Holds the buffer mutably so
/// equal-length in-place writes (spec §4.3) are possible; zero-copy string
/// reads are therefore tied to `&self`'s lifetime rather than `'a` (the
/// buffer itself remains exclusively borrowed by the view for its whole
/// life either way).
pub struct RowView<'a> {
    layout: Layout,
    buf: &'a mut [u8],
    bits_offset: usize,
    scalars_offset: usize,
    lengths_offset: usize,
    strings_offset: usize,
}

impl<'a> RowView<'a> {
    pub fn new(layout: &Layout, buf: &'a mut [u8]) -> Result<RowView<'a>> {
        let need = layout.wire_fixed_size();
        if buf.len() < need {
            return Err(Error::DecodeShort {
                need,
                have: buf.len(),
            });
        }
        let bits_offset = 0;
        let scalars_offset = bits_offset + layout.wire_bits_size();
        let lengths_offset = scalars_offset + layout.wire_data_size();
        let strings_offset = lengths_offset + 2 * layout.string_count();
        Ok(RowView {
            layout: layout.clone(),
            buf,
            bits_offset,
            scalars_offset,
            lengths_offset,
            strings_offset,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn get_bool(&self, i: usize) -> Result<bool> {
        let bit_idx = self.layout.column_bool_index(i)?;
        let byte = self.buf[self.bits_offset + bit_idx / 8];
        Ok((byte >> (bit_idx % 8)) & 1 != 0)
    }

    /// Flips a single bool bit in place. A bool column's bit IS its value,
    /// so this never changes the buffer's size.
    pub fn set_bool(&mut self, i: usize, value: bool) -> Result<()> {
        let bit_idx = self.layout.column_bool_index(i)?;
        let byte_idx = self.bits_offset + bit_idx / 8;
        let mask = 1u8 << (bit_idx % 8);
        if value {
            self.buf[byte_idx] |= mask;
        } else {
            self.buf[byte_idx] &= !mask;
        }
        Ok(())
    }

    pub fn get_scalar(&self, i: usize) -> Result<Value> {
        let ty = self.layout.column_type(i)?;
        let off = self.layout.column_offset_wire(i)?;
        let width = ty.scalar_size().ok_or(Error::TypeMismatch {
            expected: "scalar",
            got: ty.name(),
        })?;
        let start = self.scalars_offset + off;
        Ok(decode_scalar(ty, &self.buf[start..start + width]))
    }

    /// Overwrites an existing scalar column in place. Every scalar type has
    /// a fixed wire width, so a type-matched write never changes the
    /// buffer's size; a type mismatch is rejected before anything is
    /// written.
    pub fn set_scalar(&mut self, i: usize, value: &Value) -> Result<()> {
        let ty = self.layout.column_type(i)?;
        let value_ty = value.column_type();
        if ty != value_ty {
            return Err(Error::TypeMismatch {
                expected: ty.name(),
                got: value_ty.name(),
            });
        }
        let off = self.layout.column_offset_wire(i)?;
        let width = ty.scalar_size().ok_or(Error::TypeMismatch {
            expected: "scalar",
            got: ty.name(),
        })?;
        let start = self.scalars_offset + off;
        let mut tmp = [0u8; 8];
        encode_scalar(ty, value, &mut tmp[..width]);
        self.buf[start..start + width].copy_from_slice(&tmp[..width]);
        Ok(())
    }

    /// Byte range `[offset, offset+len)` of string column `i`'s payload
    /// within `self.buf`, and which length-prefix slot it occupies.
    fn string_span(&self, i: usize) -> Result<(usize, usize, usize)> {
        let slot = self
            .layout
            .with_plan(|plan| plan.string_columns.iter().position(|&c| c == i))
            .ok_or(Error::TypeMismatch {
                expected: "STRING",
                got: "other",
            })?;
        // Walk preceding string lengths to find this string's byte offset.
        let mut payload_off = 0usize;
        let mut len = 0usize;
        for (k, _) in self.layout.with_plan(|plan| plan.string_columns.clone()).iter().enumerate() {
            let len_off = self.lengths_offset + 2 * k;
            let l = u16::from_le_bytes(self.buf[len_off..len_off + 2].try_into().unwrap()) as usize;
            if k == slot {
                len = l;
                break;
            }
            payload_off += l;
        }
        Ok((slot, self.strings_offset + payload_off, len))
    }

    pub fn get_string(&self, i: usize) -> Result<&str> {
        let (_slot, start, len) = self.string_span(i)?;
        let bytes = self
            .buf
            .get(start..start + len)
            .ok_or(Error::DecodeShort {
                need: start + len,
                have: self.buf.len(),
            })?;
        std::str::from_utf8(bytes).map_err(|_| Error::CorruptFile {
            offset: start as u64,
            message: "string column is not valid UTF-8".to_string(),
        })
    }

    /// Overwrites an existing string column in place. `value` must fit
    /// within the column's existing byte length (its length prefix can't be
    /// rewritten without shifting every later string); a shorter value is
    /// zero-padded, a longer one is rejected with `ViewSizeChange` (spec
    /// §4.3) rather than silently truncated.
    pub fn set_string(&mut self, i: usize, value: &str) -> Result<()> {
        let (_slot, start, len) = self.string_span(i)?;
        if value.len() > len {
            return Err(Error::ViewSizeChange);
        }
        let end = start + len;
        if end > self.buf.len() {
            return Err(Error::DecodeShort {
                need: end,
                have: self.buf.len(),
            });
        }
        let bytes = value.as_bytes();
        self.buf[start..start + bytes.len()].copy_from_slice(bytes);
        for b in &mut self.buf[start + bytes.len()..end] {
            *b = 0;
        }
        Ok(())
    }

    /// Verifies the buffer is large enough for the fixed sections; `deep`
    /// additionally walks every string to confirm its address lies inside
    /// the buffer.
    pub fn validate(&self, deep: bool) -> Result<()> {
        let need = self.layout.wire_fixed_size();
        if self.buf.len() < need {
            return Err(Error::DecodeShort {
                need,
                have: self.buf.len(),
            });
        }
        if deep {
            for i in self.layout.with_plan(|plan| plan.string_columns.clone()) {
                self.get_string(i)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_type::ColumnType;
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
    fn get_set_roundtrip() {
        let layout = layout_xyz();
        let mut row = Row::new(&layout);
        row.set(0, Value::I32(7)).unwrap();
        row.set(1, Value::F64(3.5)).unwrap();
        row.set(2, Value::Str("hi".to_string())).unwrap();
        assert_eq!(row.get(0).unwrap(), Value::I32(7));
        assert_eq!(row.get(1).unwrap(), Value::F64(3.5));
        assert_eq!(row.get(2).unwrap(), Value::Str("hi".to_string()));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let layout = layout_xyz();
        let mut row = Row::new(&layout);
        let err = row.set(0, Value::F64(1.0)).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn change_tracking_marks_modified_columns() {
        let layout = layout_xyz();
        let mut row = Row::with_tracking(&layout, true);
        assert!(!row.changed(0).unwrap());
        row.set(0, Value::I32(1)).unwrap();
        assert!(row.changed(0).unwrap());
        assert!(!row.changed(1).unwrap());
    }

    #[test]
    fn visit_const_iterates_a_range_in_type_order() {
        let layout = layout_xyz();
        let mut row = Row::new(&layout);
        row.set(0, Value::I32(7)).unwrap();
        row.set(1, Value::F64(3.5)).unwrap();
        row.set(2, Value::Str("hi".to_string())).unwrap();

        let mut seen = Vec::new();
        row.visit_const(1, 2, |i, v| seen.push((i, v))).unwrap();
        assert_eq!(seen, vec![(1, Value::F64(3.5)), (2, Value::Str("hi".to_string()))]);

        let mut seen_all = Vec::new();
        row.visit_const_all(|i, v| seen_all.push((i, v))).unwrap();
        assert_eq!(seen_all.len(), 3);
    }

    #[test]
    fn visit_writes_back_through_set_with_change_tracking() {
        let layout = layout_xyz();
        let mut row = Row::with_tracking(&layout, true);
        row.set(0, Value::I32(1)).unwrap();
        row.set(1, Value::F64(0.0)).unwrap();

        row.visit(0, 2, |_, v| match v {
            Value::I32(n) => Value::I32(n + 1),
            other => other,
        })
        .unwrap();

        assert_eq!(row.get(0).unwrap(), Value::I32(2));
        assert!(row.changed(0).unwrap());
    }

    #[test]
    fn string_over_max_length_is_truncated_not_rejected() {
        // spec §4.3: Row::set truncates an oversized string (with a
        // diagnostic) rather than rejecting it; StringTooLong is a codec
        // encode-time error, never raised this far up.
        let layout = Layout::new(vec![("s".to_string(), ColumnType::String)]).unwrap();
        let mut row = Row::new(&layout);
        let huge = "x".repeat(65_536);
        row.set(0, Value::Str(huge)).unwrap();
        match row.get(0).unwrap() {
            Value::Str(s) => assert_eq!(s.len(), 65_535),
            other => panic!("expected Value::Str, got {other:?}"),
        }
    }

    #[test]
    fn string_truncation_respects_utf8_boundary() {
        let layout = Layout::new(vec![("s".to_string(), ColumnType::String)]).unwrap();
        let mut row = Row::new(&layout);
        // A multi-byte char straddling the 65_535 cut point must not be split.
        let mut huge = "x".repeat(65_534);
        huge.push('€'); // 3-byte UTF-8 char starting at byte 65_534
        huge.push('y');
        row.set(0, Value::Str(huge)).unwrap();
        match row.get(0).unwrap() {
            Value::Str(s) => {
                assert!(s.len() <= 65_535);
                assert!(s.is_char_boundary(s.len()));
            }
            other => panic!("expected Value::Str, got {other:?}"),
        }
    }

    fn flat_bytes(layout: &Layout, row: &Row) -> Vec<u8> {
        use crate::codec::{FlatCodec, RowCodec};
        let mut codec = FlatCodec::new();
        codec.setup(layout).unwrap();
        let mut buf = Vec::new();
        codec.serialize(row, &mut buf).unwrap();
        buf
    }

    fn layout_bxs() -> Layout {
        Layout::new(vec![
            ("b".to_string(), ColumnType::Bool),
            ("x".to_string(), ColumnType::Int32),
            ("s".to_string(), ColumnType::String),
        ])
        .unwrap()
    }

    #[test]
    fn view_set_scalar_writes_in_place() {
        let layout = layout_bxs();
        let mut row = Row::new(&layout);
        row.set(0, Value::Bool(true)).unwrap();
        row.set(1, Value::I32(7)).unwrap();
        row.set(2, Value::Str("hi".to_string())).unwrap();
        let mut buf = flat_bytes(&layout, &row);

        let mut view = RowView::new(&layout, &mut buf).unwrap();
        assert_eq!(view.get_scalar(1).unwrap(), Value::I32(7));
        view.set_scalar(1, &Value::I32(-99)).unwrap();
        assert_eq!(view.get_scalar(1).unwrap(), Value::I32(-99));
    }

    #[test]
    fn view_set_scalar_rejects_type_mismatch() {
        let layout = layout_bxs();
        let mut row = Row::new(&layout);
        row.set(1, Value::I32(7)).unwrap();
        let mut buf = flat_bytes(&layout, &row);
        let mut view = RowView::new(&layout, &mut buf).unwrap();
        let err = view.set_scalar(1, &Value::F64(1.0)).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn view_set_bool_flips_bit_in_place() {
        let layout = layout_bxs();
        let mut row = Row::new(&layout);
        row.set(0, Value::Bool(false)).unwrap();
        let mut buf = flat_bytes(&layout, &row);
        let mut view = RowView::new(&layout, &mut buf).unwrap();
        assert_eq!(view.get_bool(0).unwrap(), false);
        view.set_bool(0, true).unwrap();
        assert_eq!(view.get_bool(0).unwrap(), true);
    }

    #[test]
    fn view_set_string_overwrites_equal_or_shorter_length() {
        let layout = layout_bxs();
        let mut row = Row::new(&layout);
        row.set(2, Value::Str("hello".to_string())).unwrap();
        let mut buf = flat_bytes(&layout, &row);

        let mut view = RowView::new(&layout, &mut buf).unwrap();
        view.set_string(2, "world").unwrap();
        assert_eq!(view.get_string(2).unwrap(), "world");

        view.set_string(2, "hi").unwrap();
        // shorter value is zero-padded; the stored length prefix is
        // unchanged so the extra bytes read back as NULs, not "rld".
        assert_eq!(view.get_string(2).unwrap().as_bytes()[..2], *b"hi");
    }

    #[test]
    fn view_set_string_rejects_size_change() {
        let layout = layout_bxs();
        let mut row = Row::new(&layout);
        row.set(2, Value::Str("hi".to_string())).unwrap();
        let mut buf = flat_bytes(&layout, &row);
        let mut view = RowView::new(&layout, &mut buf).unwrap();
        let err = view.set_string(2, "too long now").unwrap_err();
        assert!(matches!(err, Error::ViewSizeChange));
    }
}
