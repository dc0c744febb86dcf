// Tagged error type: every public entry point in bcsv returns `Result<T>`
// so callers can match on the failure mode (spec requires this; unlike a
// blanket opaque wrapper, this lets `LayoutLocked` vs `CorruptFile` vs
// `DecodeShort` be handled differently). Each variant is logged when it's
// constructed, the way every error in this codebase always has been.

use std::path::{Path, PathBuf};
use tracing::error;

#[cfg(test)]
use test_log::test;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt file at offset {offset}: {message}")]
    CorruptFile { offset: u64, message: String },

    #[error("layout is locked by {count} active guard(s)")]
    LayoutLocked { count: u32 },

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("index out of range: {0}")]
    OutOfRange(usize),

    #[error("duplicate column name: {0}")]
    DuplicateColumnName(String),

    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("string too long: column {index} value is {length} bytes (max 65535)")]
    StringTooLong { index: usize, length: usize },

    #[error("buffer too short to decode: need {need} bytes, have {have}")]
    DecodeShort { need: usize, have: usize },

    #[error("row index {index} out of range (row count {row_count})")]
    IndexOutOfRange { index: u64, row_count: u64 },

    #[error("view write would change size")]
    ViewSizeChange,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Error {
        let err = Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        };
        error!(target: "bcsv", "{}", err);
        err
    }

    pub fn corrupt(offset: u64, message: impl Into<String>) -> Error {
        let err = Error::CorruptFile {
            offset,
            message: message.into(),
        };
        error!(target: "bcsv", "{}", err);
        err
    }
}

#[test]
fn test_io_error_carries_path() {
    let source = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
    let err = Error::io("/tmp/does-not-exist.bcsv", source);
    match err {
        Error::Io { path, .. } => assert_eq!(path, Path::new("/tmp/does-not-exist.bcsv")),
        other => panic!("wrong variant: {other:?}"),
    }
}

#[test]
fn test_corrupt_file_message() {
    let err = Error::corrupt(128, "bad magic");
    assert_eq!(err.to_string(), "corrupt file at offset 128: bad magic");
}
