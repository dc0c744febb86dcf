mod bitset;
mod error;

pub use bitset::{assign_range, equal_range, Bitset, BitsetSliceMut};
pub use error::{Error, Result};
