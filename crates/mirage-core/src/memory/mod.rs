//! Fail-soft access to foreign process memory

mod address;
pub mod array;
pub mod bucket_map;
pub mod layout;
mod process;
mod reader;
pub mod text;

#[cfg(test)]
pub mod mock;

pub use address::{Address, AddressWindow};
pub use array::{ArrayCursor, ArrayHandle, ArrayIter};
pub use bucket_map::{BucketMapLayout, ForeignMapDecoder};
pub use layout::{
    Endian, FieldRule, FromRecord, PrimitiveKind, ReadMemoryExt, Record, RecordLayout, Value,
};
pub use process::*;
pub use reader::{MemoryReader, ReadMemory, SharedReader};
pub use text::{TextEncoding, decode_text};

#[cfg(test)]
pub use mock::{MockMemoryBuilder, MockMemoryReader};
