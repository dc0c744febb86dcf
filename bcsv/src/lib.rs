//! BCSV: a high-throughput binary columnar row-file format for time-series
//! and other append-mostly tabular data. Rows are packed `bits | scalars |
//! strings`, encoded by one of three interchangeable codecs (`FLAT001`,
//! `ZOH001`, `DELTA002`), and grouped into independently-compressed packets
//! a catalog makes randomly addressable (see `DESIGN.md`).
//!
//! CSV text import/export, a C FFI shim, and a predicate-evaluating Sampler
//! are out of scope for this crate; `Reader::read_next` is the hook a
//! Sampler would drive its main loop from.

mod codec;
mod column_type;
mod compress;
mod direct;
mod file;
pub mod ioutil;
mod layout;
mod packet;
mod reader;
mod row;
mod writer;

pub use bcsv_base::{Error, Result};

pub use column_type::{ColumnType, ScalarType, Value};
pub use direct::DirectAccessReader;
pub use file::FileFlags;
pub use layout::{Layout, LayoutGuard};
pub use reader::Reader;
pub use row::{Row, RowView};
pub use writer::Writer;
