//! Table-driven struct decoding
//!
//! A [`RecordLayout`] maps field names to `(offset, primitive kind)` pairs and
//! is loaded from the layout descriptor at runtime, so nothing here assumes a
//! particular build of the foreign process. Records are read as one byte run
//! and each field is decoded from that run with explicit endianness.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::address::Address;
use super::array::ArrayHandle;
use super::reader::ReadMemory;
use crate::config::memory::MAX_RECORD_SIZE;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    #[default]
    Little,
    Big,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PrimitiveKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    Bool,
    Pointer,
    /// Head/tail pointer pair
    ArrayHandle,
}

impl PrimitiveKind {
    pub fn width(self) -> usize {
        match self {
            Self::U8 | Self::I8 | Self::Bool => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 | Self::Pointer => 8,
            Self::ArrayHandle => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    pub offset: usize,
    pub kind: PrimitiveKind,
}

impl FieldRule {
    pub fn new(offset: usize, kind: PrimitiveKind) -> Self {
        Self { offset, kind }
    }

    /// One past the last byte, `None` on overflow
    fn end(&self) -> Option<usize> {
        self.offset.checked_add(self.kind.width())
    }
}

/// A decoded primitive
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Pointer(Address),
    Array(ArrayHandle),
}

impl Value {
    /// Integer view of any integral, boolean or pointer value
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::U8(v) => Some(v as u64),
            Value::I8(v) => Some(v as u64),
            Value::U16(v) => Some(v as u64),
            Value::I16(v) => Some(v as u64),
            Value::U32(v) => Some(v as u64),
            Value::I32(v) => Some(v as u64),
            Value::U64(v) => Some(v),
            Value::I64(v) => Some(v as u64),
            Value::Bool(v) => Some(v as u64),
            Value::Pointer(a) => Some(a.value()),
            Value::F32(_) | Value::F64(_) | Value::Array(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLayout {
    pub name: String,
    /// Bytes to read per record. Defaults to the end of the furthest field.
    #[serde(default)]
    pub size: Option<usize>,
    #[serde(default)]
    pub endian: Endian,
    pub fields: BTreeMap<String, FieldRule>,
}

impl RecordLayout {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            endian: Endian::Little,
            fields: BTreeMap::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, offset: usize, kind: PrimitiveKind) -> Self {
        self.fields.insert(name.into(), FieldRule::new(offset, kind));
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    /// Saturates to `usize::MAX` when a field end overflows
    pub fn byte_size(&self) -> usize {
        let extent = self
            .fields
            .values()
            .map(|rule| rule.end().unwrap_or(usize::MAX))
            .max()
            .unwrap_or(0);
        self.size.unwrap_or(extent).max(extent)
    }

    /// Reject layouts whose fields or declared size exceed [`MAX_RECORD_SIZE`]
    pub fn validate(&self) -> Result<()> {
        for (field, rule) in &self.fields {
            match rule.end() {
                Some(end) if end <= MAX_RECORD_SIZE => {}
                _ => {
                    return Err(Error::InvalidLayout(format!(
                        "{}.{} at offset {:#x} lies outside the {} byte record limit",
                        self.name, field, rule.offset, MAX_RECORD_SIZE
                    )));
                }
            }
        }
        if self.byte_size() > MAX_RECORD_SIZE {
            return Err(Error::InvalidLayout(format!(
                "{} declares {} bytes, limit is {}",
                self.name,
                self.byte_size(),
                MAX_RECORD_SIZE
            )));
        }
        Ok(())
    }

    pub fn rule(&self, field: &str) -> Result<FieldRule> {
        self.fields.get(field).copied().ok_or_else(|| Error::MissingField {
            record: self.name.clone(),
            field: field.to_string(),
        })
    }

    /// Check that every named field exists with the expected kind
    pub fn require(&self, fields: &[(&str, PrimitiveKind)]) -> Result<()> {
        for (field, kind) in fields {
            let rule = self.rule(field)?;
            if rule.kind != *kind {
                return Err(Error::InvalidLayout(format!(
                    "{}.{} must be {}, found {}",
                    self.name, field, kind, rule.kind
                )));
            }
        }
        Ok(())
    }
}

fn take<const N: usize>(bytes: &[u8], offset: usize, endian: Endian) -> Option<[u8; N]> {
    let mut out: [u8; N] = bytes.get(offset..offset.checked_add(N)?)?.try_into().ok()?;
    if endian == Endian::Big {
        out.reverse();
    }
    Some(out)
}

/// Decode one field from a record's bytes. `None` if the bytes are too short.
pub fn decode_field(bytes: &[u8], rule: FieldRule, endian: Endian) -> Option<Value> {
    let at = rule.offset;
    let value = match rule.kind {
        PrimitiveKind::U8 => Value::U8(*bytes.get(at)?),
        PrimitiveKind::I8 => Value::I8(*bytes.get(at)? as i8),
        PrimitiveKind::Bool => Value::Bool(*bytes.get(at)? != 0),
        PrimitiveKind::U16 => Value::U16(u16::from_le_bytes(take(bytes, at, endian)?)),
        PrimitiveKind::I16 => Value::I16(i16::from_le_bytes(take(bytes, at, endian)?)),
        PrimitiveKind::U32 => Value::U32(u32::from_le_bytes(take(bytes, at, endian)?)),
        PrimitiveKind::I32 => Value::I32(i32::from_le_bytes(take(bytes, at, endian)?)),
        PrimitiveKind::U64 => Value::U64(u64::from_le_bytes(take(bytes, at, endian)?)),
        PrimitiveKind::I64 => Value::I64(i64::from_le_bytes(take(bytes, at, endian)?)),
        PrimitiveKind::F32 => Value::F32(f32::from_le_bytes(take(bytes, at, endian)?)),
        PrimitiveKind::F64 => Value::F64(f64::from_le_bytes(take(bytes, at, endian)?)),
        PrimitiveKind::Pointer => {
            Value::Pointer(Address::new(u64::from_le_bytes(take(bytes, at, endian)?)))
        }
        PrimitiveKind::ArrayHandle => {
            let head = u64::from_le_bytes(take(bytes, at, endian)?);
            let tail = u64::from_le_bytes(take(bytes, at.checked_add(8)?, endian)?);
            Value::Array(ArrayHandle::new(Address::new(head), Address::new(tail)))
        }
    };
    Some(value)
}

/// Raw bytes of one foreign record plus the layout that describes them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub address: Address,
    layout: RecordLayout,
    bytes: Vec<u8>,
}

impl Record {
    pub fn from_bytes(address: Address, layout: &RecordLayout, bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < layout.byte_size() {
            return Err(Error::read_failed(
                address.value(),
                format!(
                    "record '{}' needs {} bytes, got {}",
                    layout.name,
                    layout.byte_size(),
                    bytes.len()
                ),
            ));
        }
        Ok(Self {
            address,
            layout: layout.clone(),
            bytes,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn get(&self, field: &str) -> Result<Value> {
        let rule = self.layout.rule(field)?;
        decode_field(&self.bytes, rule, self.layout.endian).ok_or_else(|| {
            Error::read_failed(self.address.value(), format!("field '{}' out of range", field))
        })
    }

    pub fn u32(&self, field: &str) -> Result<u32> {
        match self.get(field)? {
            Value::U32(v) => Ok(v),
            other => Err(self.kind_mismatch(field, "u32", other)),
        }
    }

    pub fn i32(&self, field: &str) -> Result<i32> {
        match self.get(field)? {
            Value::I32(v) => Ok(v),
            other => Err(self.kind_mismatch(field, "i32", other)),
        }
    }

    pub fn u64(&self, field: &str) -> Result<u64> {
        match self.get(field)? {
            Value::U64(v) => Ok(v),
            other => Err(self.kind_mismatch(field, "u64", other)),
        }
    }

    pub fn pointer(&self, field: &str) -> Result<Address> {
        match self.get(field)? {
            Value::Pointer(a) => Ok(a),
            other => Err(self.kind_mismatch(field, "pointer", other)),
        }
    }

    pub fn array(&self, field: &str) -> Result<ArrayHandle> {
        match self.get(field)? {
            Value::Array(handle) => Ok(handle),
            other => Err(self.kind_mismatch(field, "array_handle", other)),
        }
    }

    /// Any integral field widened to `u64`
    pub fn integer(&self, field: &str) -> Result<u64> {
        let value = self.get(field)?;
        value
            .as_u64()
            .ok_or_else(|| self.kind_mismatch(field, "integer", value))
    }

    fn kind_mismatch(&self, field: &str, expected: &str, found: Value) -> Error {
        Error::InvalidLayout(format!(
            "{}.{} expected {}, decoded {:?}",
            self.layout.name, field, expected, found
        ))
    }
}

/// Types that can be built from a decoded [`Record`]
pub trait FromRecord: Sized {
    fn from_record(record: &Record) -> Result<Self>;
}

/// Struct reads on top of [`ReadMemory`]
pub trait ReadMemoryExt: ReadMemory {
    fn read_record(&self, address: Address, layout: &RecordLayout) -> Result<Record> {
        layout.validate()?;
        let bytes = self.read_bytes(address, layout.byte_size())?;
        Record::from_bytes(address, layout, bytes)
    }

    fn read_struct<T: FromRecord>(&self, address: Address, layout: &RecordLayout) -> Result<T> {
        T::from_record(&self.read_record(address, layout)?)
    }
}

impl<R: ReadMemory + ?Sized> ReadMemoryExt for R {}
