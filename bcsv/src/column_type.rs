//! The closed set of column types and their wire tags (§3, §6.1).

use bcsv_base::{Error, Result};

/// A column's declared type. Tag values are part of the on-disk format and
/// must never be renumbered once a file using them exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ColumnType {
    Bool = 0,
    Uint8 = 1,
    Uint16 = 2,
    Uint32 = 3,
    Uint64 = 4,
    Int8 = 5,
    Int16 = 6,
    Int32 = 7,
    Int64 = 8,
    Float = 9,
    Double = 10,
    String = 11,
}

impl ColumnType {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => ColumnType::Bool,
            1 => ColumnType::Uint8,
            2 => ColumnType::Uint16,
            3 => ColumnType::Uint32,
            4 => ColumnType::Uint64,
            5 => ColumnType::Int8,
            6 => ColumnType::Int16,
            7 => ColumnType::Int32,
            8 => ColumnType::Int64,
            9 => ColumnType::Float,
            10 => ColumnType::Double,
            11 => ColumnType::String,
            other => {
                return Err(Error::CorruptFile {
                    offset: 0,
                    message: format!("unknown column type tag {other}"),
                })
            }
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Bool => "BOOL",
            ColumnType::Uint8 => "UINT8",
            ColumnType::Uint16 => "UINT16",
            ColumnType::Uint32 => "UINT32",
            ColumnType::Uint64 => "UINT64",
            ColumnType::Int8 => "INT8",
            ColumnType::Int16 => "INT16",
            ColumnType::Int32 => "INT32",
            ColumnType::Int64 => "INT64",
            ColumnType::Float => "FLOAT",
            ColumnType::Double => "DOUBLE",
            ColumnType::String => "STRING",
        }
    }

    /// Fixed scalar byte width, or `None` for `Bool` (packed as a single bit)
    /// and `String` (variable length, prefixed on the wire).
    pub fn scalar_size(self) -> Option<usize> {
        match self {
            ColumnType::Bool => None,
            ColumnType::Uint8 | ColumnType::Int8 => Some(1),
            ColumnType::Uint16 | ColumnType::Int16 => Some(2),
            ColumnType::Uint32 | ColumnType::Int32 | ColumnType::Float => Some(4),
            ColumnType::Uint64 | ColumnType::Int64 | ColumnType::Double => Some(8),
            ColumnType::String => None,
        }
    }

    pub fn scalar_type(self) -> Option<ScalarType> {
        Some(match self {
            ColumnType::Uint8 => ScalarType::U8,
            ColumnType::Uint16 => ScalarType::U16,
            ColumnType::Uint32 => ScalarType::U32,
            ColumnType::Uint64 => ScalarType::U64,
            ColumnType::Int8 => ScalarType::I8,
            ColumnType::Int16 => ScalarType::I16,
            ColumnType::Int32 => ScalarType::I32,
            ColumnType::Int64 => ScalarType::I64,
            ColumnType::Float => ScalarType::F32,
            ColumnType::Double => ScalarType::F64,
            ColumnType::Bool | ColumnType::String => return None,
        })
    }
}

/// The ten non-bool, non-string scalar types, in the fixed order every
/// type-grouped wire section (ZOH/DELTA headers and payloads) iterates them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

pub const SCALAR_TYPE_ORDER: [ScalarType; 10] = [
    ScalarType::U8,
    ScalarType::U16,
    ScalarType::U32,
    ScalarType::U64,
    ScalarType::I8,
    ScalarType::I16,
    ScalarType::I32,
    ScalarType::I64,
    ScalarType::F32,
    ScalarType::F64,
];

impl ScalarType {
    pub fn byte_width(self) -> usize {
        match self {
            ScalarType::U8 | ScalarType::I8 => 1,
            ScalarType::U16 | ScalarType::I16 => 2,
            ScalarType::U32 | ScalarType::I32 | ScalarType::F32 => 4,
            ScalarType::U64 | ScalarType::I64 | ScalarType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarType::F32 | ScalarType::F64)
    }

    /// Bit width of the combined DELTA002 header code for a column of this
    /// type (spec §4.4.3): 1-byte types get 2 bits, 2-byte 2 bits, 4-byte 3
    /// bits, 8-byte 4 bits.
    pub fn delta_header_bits(self) -> u32 {
        match self.byte_width() {
            1 => 2,
            2 => 2,
            4 => 3,
            8 => 4,
            _ => unreachable!(),
        }
    }
}

/// A single column cell's value. Used at the `Row` API boundary; codecs work
/// directly against the row's raw storage regions instead.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Bool(_) => ColumnType::Bool,
            Value::U8(_) => ColumnType::Uint8,
            Value::U16(_) => ColumnType::Uint16,
            Value::U32(_) => ColumnType::Uint32,
            Value::U64(_) => ColumnType::Uint64,
            Value::I8(_) => ColumnType::Int8,
            Value::I16(_) => ColumnType::Int16,
            Value::I32(_) => ColumnType::Int32,
            Value::I64(_) => ColumnType::Int64,
            Value::F32(_) => ColumnType::Float,
            Value::F64(_) => ColumnType::Double,
            Value::Str(_) => ColumnType::String,
        }
    }

    pub fn default_for(ty: ColumnType) -> Value {
        match ty {
            ColumnType::Bool => Value::Bool(false),
            ColumnType::Uint8 => Value::U8(0),
            ColumnType::Uint16 => Value::U16(0),
            ColumnType::Uint32 => Value::U32(0),
            ColumnType::Uint64 => Value::U64(0),
            ColumnType::Int8 => Value::I8(0),
            ColumnType::Int16 => Value::I16(0),
            ColumnType::Int32 => Value::I32(0),
            ColumnType::Int64 => Value::I64(0),
            ColumnType::Float => Value::F32(0.0),
            ColumnType::Double => Value::F64(0.0),
            ColumnType::String => Value::Str(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_roundtrip() {
        for tag in 0u8..=11 {
            let ty = ColumnType::from_tag(tag).unwrap();
            assert_eq!(ty.tag(), tag);
        }
    }

    #[test]
    fn unknown_tag_is_corrupt_file() {
        assert!(ColumnType::from_tag(200).is_err());
    }

    #[test]
    fn delta_header_bit_widths() {
        assert_eq!(ScalarType::U8.delta_header_bits(), 2);
        assert_eq!(ScalarType::U16.delta_header_bits(), 2);
        assert_eq!(ScalarType::U32.delta_header_bits(), 3);
        assert_eq!(ScalarType::U64.delta_header_bits(), 4);
    }
}
