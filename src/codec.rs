//! Fixed width encoding of typed item values.
//!
//! Every item has a [`Layout`] that is fixed at build time and knows its own encoded width.
//! Scalars are stored little-endian, strings as NUL-filled byte buffers of a fixed capacity,
//! arrays and structs as the concatenation of their members in declaration order. There is no
//! padding and no length prefix anywhere, the record header already carries the total length.

use crate::error::Error;
use alloc::string::String;
use alloc::vec::Vec;

/// Shape of an item's payload.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Layout {
    Bool,
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
    /// UTF-8 string with a fixed capacity in bytes. Unused capacity is filled with `\0`.
    Str(u16),
    /// Opaque byte buffer of a fixed length.
    Bytes(u16),
    /// `len` elements of the same layout.
    Array(&'static Layout, u16),
    /// Members in declaration order.
    Struct(&'static [Layout]),
}

impl Layout {
    /// Encoded width in bytes.
    pub const fn width(&self) -> usize {
        match self {
            Layout::Bool | Layout::U8 | Layout::I8 => 1,
            Layout::U16 | Layout::I16 => 2,
            Layout::U32 | Layout::I32 | Layout::F32 => 4,
            Layout::U64 | Layout::I64 | Layout::F64 => 8,
            Layout::Str(capacity) | Layout::Bytes(capacity) => *capacity as usize,
            Layout::Array(element, len) => element.width() * *len as usize,
            Layout::Struct(members) => {
                let mut width = 0;
                let mut i = 0;
                while i < members.len() {
                    width += members[i].width();
                    i += 1;
                }
                width
            }
        }
    }
}

/// A decoded item value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
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
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Struct(Vec<Value>),
}

/// Encodes `value` into exactly `layout.width()` bytes.
pub fn encode(layout: &Layout, value: &Value) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::with_capacity(layout.width());
    encode_into(layout, value, &mut buf)?;
    Ok(buf)
}

fn encode_into(layout: &Layout, value: &Value, buf: &mut Vec<u8>) -> Result<(), Error> {
    match (layout, value) {
        (Layout::Bool, Value::Bool(v)) => buf.push(*v as u8),
        (Layout::U8, Value::U8(v)) => buf.push(*v),
        (Layout::I8, Value::I8(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (Layout::U16, Value::U16(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (Layout::I16, Value::I16(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (Layout::U32, Value::U32(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (Layout::I32, Value::I32(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (Layout::U64, Value::U64(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (Layout::I64, Value::I64(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (Layout::F32, Value::F32(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (Layout::F64, Value::F64(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (Layout::Str(capacity), Value::Str(s)) => {
            encode_str(*capacity as usize, s.as_bytes(), buf)?;
        }
        (Layout::Bytes(len), Value::Bytes(bytes)) => {
            if bytes.len() != *len as usize {
                return Err(Error::ValueMismatch);
            }
            buf.extend_from_slice(bytes);
        }
        (Layout::Array(element, len), Value::Array(values)) => {
            if values.len() != *len as usize {
                return Err(Error::ValueMismatch);
            }
            for value in values {
                encode_into(element, value, buf)?;
            }
        }
        (Layout::Struct(members), Value::Struct(values)) => {
            if values.len() != members.len() {
                return Err(Error::ValueMismatch);
            }
            for (member, value) in members.iter().zip(values) {
                encode_into(member, value, buf)?;
            }
        }
        _ => return Err(Error::ValueMismatch),
    }
    Ok(())
}

/// Writes `s` followed by `\0` fill. A string of exactly `capacity` bytes is stored without
/// terminator.
pub(crate) fn encode_str(capacity: usize, s: &[u8], buf: &mut Vec<u8>) -> Result<(), Error> {
    if s.len() > capacity {
        return Err(Error::ValueMismatch);
    }
    buf.extend_from_slice(s);
    buf.resize(buf.len() + capacity - s.len(), b'\0');
    Ok(())
}

/// Reads a string up to the first `\0` or the end of the buffer.
pub(crate) fn decode_str(raw: &[u8]) -> Result<String, Error> {
    let end = raw.iter().position(|&b| b == b'\0').unwrap_or(raw.len());
    let s = core::str::from_utf8(&raw[..end]).map_err(|_| Error::CorruptedData)?;
    Ok(String::from(s))
}

/// Decodes a buffer of exactly `layout.width()` bytes.
///
/// Buffers coming out of the store always have the right width, anything else is a programming
/// error and reported as `ValueMismatch`.
pub fn decode(layout: &Layout, raw: &[u8]) -> Result<Value, Error> {
    if raw.len() != layout.width() {
        return Err(Error::ValueMismatch);
    }
    Ok(decode_unchecked(layout, raw)?.0)
}

// returns the value and the number of consumed bytes
fn decode_unchecked(layout: &Layout, raw: &[u8]) -> Result<(Value, usize), Error> {
    let width = layout.width();
    let raw = &raw[..width];
    let value = match layout {
        Layout::Bool => Value::Bool(raw[0] != 0),
        Layout::U8 => Value::U8(raw[0]),
        Layout::I8 => Value::I8(raw[0] as i8),
        Layout::U16 => Value::U16(u16::from_le_bytes([raw[0], raw[1]])),
        Layout::I16 => Value::I16(i16::from_le_bytes([raw[0], raw[1]])),
        Layout::U32 => Value::U32(u32::from_le_bytes(le_array(raw))),
        Layout::I32 => Value::I32(i32::from_le_bytes(le_array(raw))),
        Layout::U64 => Value::U64(u64::from_le_bytes(le_array(raw))),
        Layout::I64 => Value::I64(i64::from_le_bytes(le_array(raw))),
        Layout::F32 => Value::F32(f32::from_le_bytes(le_array(raw))),
        Layout::F64 => Value::F64(f64::from_le_bytes(le_array(raw))),
        Layout::Str(_) => Value::Str(decode_str(raw)?),
        Layout::Bytes(_) => Value::Bytes(raw.to_vec()),
        Layout::Array(element, len) => {
            let mut values = Vec::with_capacity(*len as usize);
            let mut offset = 0;
            for _ in 0..*len {
                let (value, consumed) = decode_unchecked(element, &raw[offset..])?;
                values.push(value);
                offset += consumed;
            }
            Value::Array(values)
        }
        Layout::Struct(members) => {
            let mut values = Vec::with_capacity(members.len());
            let mut offset = 0;
            for member in members.iter() {
                let (value, consumed) = decode_unchecked(member, &raw[offset..])?;
                values.push(value);
                offset += consumed;
            }
            Value::Struct(values)
        }
    };
    Ok((value, width))
}

fn le_array<const N: usize>(raw: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&raw[..N]);
    buf
}
