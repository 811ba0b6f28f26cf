//! Data section decoding.
//!
//! Implements the complete MaxMind DB data type specification: each value
//! begins with a control byte whose high 3 bits carry the type tag and low 5
//! bits carry a size (with escape codes for sizes >= 29 and an extended-type
//! escape for tags beyond the base 7). Containers recurse; pointers are
//! followed transparently and never escape to callers.
//!
//! # Supported Types
//!
//! - **Pointer**: reference to another data item (resolved during decode)
//! - **String**: UTF-8 text
//! - **Double**: 64-bit IEEE 754
//! - **Bytes**: raw byte arrays
//! - **Uint16 / Uint32 / Uint64 / Uint128**: variable-width big-endian
//! - **Map**: string-keyed pairs, encounter order preserved
//! - **Int32**: signed 32-bit
//! - **Array**: ordered lists
//! - **Bool**: payload-free boolean
//! - **Float**: 32-bit IEEE 754
//!
//! See: https://maxmind.github.io/MaxMind-DB/

use crate::error::{Error, Result};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// Container nesting / pointer chain limit. A well-formed database never gets
/// close; the cap turns a malicious file into `InvalidDataFormat` instead of
/// a stack overflow.
const MAX_DEPTH: usize = 512;

/// A decoded value from the data section.
///
/// Maps preserve the order in which keys were encountered on disk so that
/// repeated decodes of the same offset are byte-for-byte reproducible.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// UTF-8 string
    String(String),
    /// IEEE 754 double precision float
    Double(f64),
    /// Raw byte array
    Bytes(Vec<u8>),
    /// Unsigned 16-bit integer
    Uint16(u16),
    /// Unsigned 32-bit integer
    Uint32(u32),
    /// Key-value map (string keys only, unique within one map)
    Map(Vec<(String, DataValue)>),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 64-bit integer
    Uint64(u64),
    /// Unsigned 128-bit integer, represented exactly
    Uint128(u128),
    /// Array of values
    Array(Vec<DataValue>),
    /// Boolean value
    Bool(bool),
    /// IEEE 754 single precision float
    Float(f32),
}

impl DataValue {
    /// Look up a key in a `Map` value. Returns `None` for non-map values.
    pub fn get(&self, key: &str) -> Option<&DataValue> {
        match self {
            DataValue::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Widen any unsigned integer variant to `u64`.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            DataValue::Uint16(n) => Some(*n as u64),
            DataValue::Uint32(n) => Some(*n as u64),
            DataValue::Uint64(n) => Some(*n),
            _ => None,
        }
    }

    /// Borrow the string contents of a `String` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Convert to a `serde_json::Value` tree.
    ///
    /// `Bytes` become arrays of numbers and `Uint128` becomes a decimal
    /// string, since JSON has no native representation for either.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{json, Value};
        match self {
            DataValue::String(s) => Value::String(s.clone()),
            DataValue::Double(d) => json!(d),
            DataValue::Bytes(b) => json!(b),
            DataValue::Uint16(n) => json!(n),
            DataValue::Uint32(n) => json!(n),
            DataValue::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            DataValue::Int32(n) => json!(n),
            DataValue::Uint64(n) => json!(n),
            DataValue::Uint128(n) => Value::String(n.to_string()),
            DataValue::Array(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
            DataValue::Bool(b) => Value::Bool(*b),
            DataValue::Float(f) => json!(f),
        }
    }
}

impl Serialize for DataValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            DataValue::String(s) => serializer.serialize_str(s),
            DataValue::Double(d) => serializer.serialize_f64(*d),
            DataValue::Bytes(b) => serializer.serialize_bytes(b),
            DataValue::Uint16(n) => serializer.serialize_u16(*n),
            DataValue::Uint32(n) => serializer.serialize_u32(*n),
            DataValue::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            DataValue::Int32(n) => serializer.serialize_i32(*n),
            DataValue::Uint64(n) => serializer.serialize_u64(*n),
            DataValue::Uint128(n) => serializer.serialize_u128(*n),
            DataValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            DataValue::Bool(b) => serializer.serialize_bool(*b),
            DataValue::Float(f) => serializer.serialize_f32(*f),
        }
    }
}

// Base type tags (control byte high 3 bits)
const TYPE_EXTENDED: u8 = 0;
const TYPE_POINTER: u8 = 1;
const TYPE_STRING: u8 = 2;
const TYPE_DOUBLE: u8 = 3;
const TYPE_BYTES: u8 = 4;
const TYPE_UINT16: u8 = 5;
const TYPE_UINT32: u8 = 6;
const TYPE_MAP: u8 = 7;
// Extended tags (next byte + 7)
const TYPE_INT32: u8 = 8;
const TYPE_UINT64: u8 = 9;
const TYPE_UINT128: u8 = 10;
const TYPE_ARRAY: u8 = 11;
const TYPE_BOOL: u8 = 14;
const TYPE_FLOAT: u8 = 15;

/// Decoder over one data section.
///
/// The buffer is the data section itself; all offsets, including pointer
/// targets, are relative to its start.
pub struct Decoder<'a> {
    buffer: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Create a decoder for a data section slice.
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer }
    }

    /// Decode the value at `offset`, transparently resolving pointers.
    pub fn decode(&self, offset: u32) -> Result<DataValue> {
        let mut cursor = offset as usize;
        let mut chain = Vec::new();
        self.decode_at(&mut cursor, 0, &mut chain)
    }

    fn decode_at(
        &self,
        cursor: &mut usize,
        depth: usize,
        chain: &mut Vec<u32>,
    ) -> Result<DataValue> {
        if depth > MAX_DEPTH {
            return Err(Error::InvalidDataFormat(format!(
                "nesting deeper than {} levels",
                MAX_DEPTH
            )));
        }

        let ctrl = self.take_byte(cursor)?;
        let mut type_id = ctrl >> 5;
        let payload = ctrl & 0x1F;

        if type_id == TYPE_POINTER {
            return self.decode_pointer(cursor, payload, depth, chain);
        }

        if type_id == TYPE_EXTENDED {
            let ext = self.take_byte(cursor)?;
            type_id = ext.checked_add(7).ok_or_else(|| {
                Error::InvalidDataFormat(format!("extended type byte {} out of range", ext))
            })?;
        }

        // Size escapes apply to every non-pointer type; fixed-width types
        // then validate the width below.
        let size = self.decode_size(cursor, payload)?;

        match type_id {
            TYPE_STRING => self.decode_string(cursor, size),
            TYPE_DOUBLE => self.decode_double(cursor, size),
            TYPE_BYTES => self.decode_bytes(cursor, size),
            TYPE_UINT16 => Ok(DataValue::Uint16(self.decode_uint(cursor, size, 2)? as u16)),
            TYPE_UINT32 => Ok(DataValue::Uint32(self.decode_uint(cursor, size, 4)? as u32)),
            TYPE_MAP => self.decode_map(cursor, size, depth, chain),
            TYPE_INT32 => Ok(DataValue::Int32(
                self.decode_uint(cursor, size, 4)? as u32 as i32,
            )),
            TYPE_UINT64 => Ok(DataValue::Uint64(self.decode_uint(cursor, size, 8)? as u64)),
            TYPE_UINT128 => Ok(DataValue::Uint128(self.decode_uint(cursor, size, 16)?)),
            TYPE_ARRAY => self.decode_array(cursor, size, depth, chain),
            TYPE_BOOL => match size {
                0 => Ok(DataValue::Bool(false)),
                1 => Ok(DataValue::Bool(true)),
                n => Err(Error::InvalidDataFormat(format!(
                    "boolean with size {}",
                    n
                ))),
            },
            TYPE_FLOAT => self.decode_float(cursor, size),
            n => Err(Error::InvalidDataFormat(format!("unknown type tag {}", n))),
        }
    }

    /// Decode a pointer and follow it.
    ///
    /// The low 5 payload bits split into a 2-bit size class (bits 3-4) and 3
    /// value bits. Size classes 0..=2 carry a cumulative bias so each class
    /// starts where the previous one ends; class 3 is a plain 32-bit offset.
    fn decode_pointer(
        &self,
        cursor: &mut usize,
        payload: u8,
        depth: usize,
        chain: &mut Vec<u32>,
    ) -> Result<DataValue> {
        let size_class = (payload >> 3) & 0x3;
        let value_bits = (payload & 0x7) as u32;

        let target = match size_class {
            0 => {
                let b = self.take_bytes(cursor, 1)?;
                (value_bits << 8) | b[0] as u32
            }
            1 => {
                let b = self.take_bytes(cursor, 2)?;
                ((value_bits << 16) | (b[0] as u32) << 8 | b[1] as u32) + 2048
            }
            2 => {
                let b = self.take_bytes(cursor, 3)?;
                ((value_bits << 24) | (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32)
                    + 526_336
            }
            _ => {
                let b = self.take_bytes(cursor, 4)?;
                u32::from_be_bytes([b[0], b[1], b[2], b[3]])
            }
        };

        if chain.contains(&target) {
            return Err(Error::CorruptPointerCycle);
        }
        chain.push(target);

        let mut target_cursor = target as usize;
        let value = self.decode_at(&mut target_cursor, depth + 1, chain)?;

        chain.pop();
        Ok(value)
    }

    fn decode_string(&self, cursor: &mut usize, len: usize) -> Result<DataValue> {
        let bytes = self.take_bytes(cursor, len)?;
        let s = std::str::from_utf8(bytes)
            .map_err(|_| Error::InvalidDataFormat("string is not valid UTF-8".to_string()))?;
        Ok(DataValue::String(s.to_string()))
    }

    fn decode_bytes(&self, cursor: &mut usize, len: usize) -> Result<DataValue> {
        let bytes = self.take_bytes(cursor, len)?;
        Ok(DataValue::Bytes(bytes.to_vec()))
    }

    fn decode_double(&self, cursor: &mut usize, size: usize) -> Result<DataValue> {
        if size != 8 {
            return Err(Error::InvalidDataFormat(format!(
                "double with size {}",
                size
            )));
        }
        let b = self.take_bytes(cursor, 8)?;
        Ok(DataValue::Double(f64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ])))
    }

    fn decode_float(&self, cursor: &mut usize, size: usize) -> Result<DataValue> {
        if size != 4 {
            return Err(Error::InvalidDataFormat(format!(
                "float with size {}",
                size
            )));
        }
        let b = self.take_bytes(cursor, 4)?;
        Ok(DataValue::Float(f32::from_be_bytes([b[0], b[1], b[2], b[3]])))
    }

    /// Decode a variable-width big-endian unsigned integer of `size` bytes,
    /// capped at `max_width` bytes for the declaring type.
    fn decode_uint(&self, cursor: &mut usize, size: usize, max_width: usize) -> Result<u128> {
        if size > max_width {
            return Err(Error::InvalidDataFormat(format!(
                "integer of {} bytes exceeds {}-byte width",
                size, max_width
            )));
        }
        let bytes = self.take_bytes(cursor, size)?;
        let mut value: u128 = 0;
        for &b in bytes {
            value = (value << 8) | b as u128;
        }
        Ok(value)
    }

    fn decode_map(
        &self,
        cursor: &mut usize,
        count: usize,
        depth: usize,
        chain: &mut Vec<u32>,
    ) -> Result<DataValue> {
        let mut entries: Vec<(String, DataValue)> = Vec::with_capacity(count.min(64));

        for _ in 0..count {
            // Keys may themselves be pointers to strings; decode_at resolves
            // them transparently.
            let key = match self.decode_at(cursor, depth + 1, chain)? {
                DataValue::String(s) => s,
                other => {
                    return Err(Error::InvalidDataFormat(format!(
                        "map key is {:?}, expected string",
                        other
                    )))
                }
            };
            if entries.iter().any(|(k, _)| *k == key) {
                return Err(Error::InvalidDataFormat(format!(
                    "duplicate map key {:?}",
                    key
                )));
            }
            let value = self.decode_at(cursor, depth + 1, chain)?;
            entries.push((key, value));
        }

        Ok(DataValue::Map(entries))
    }

    fn decode_array(
        &self,
        cursor: &mut usize,
        count: usize,
        depth: usize,
        chain: &mut Vec<u32>,
    ) -> Result<DataValue> {
        let mut items = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            items.push(self.decode_at(cursor, depth + 1, chain)?);
        }
        Ok(DataValue::Array(items))
    }

    /// Decode the size field: values 0..=28 are literal, 29/30/31 pull 1-3
    /// extra bytes with cumulative bias.
    fn decode_size(&self, cursor: &mut usize, size_bits: u8) -> Result<usize> {
        match size_bits {
            0..=28 => Ok(size_bits as usize),
            29 => {
                let b = self.take_bytes(cursor, 1)?;
                Ok(29 + b[0] as usize)
            }
            30 => {
                let b = self.take_bytes(cursor, 2)?;
                Ok(29 + 256 + u16::from_be_bytes([b[0], b[1]]) as usize)
            }
            _ => {
                let b = self.take_bytes(cursor, 3)?;
                Ok(29 + 256 + 65536 + (((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize))
            }
        }
    }

    fn take_byte(&self, cursor: &mut usize) -> Result<u8> {
        let b = self.take_bytes(cursor, 1)?;
        Ok(b[0])
    }

    fn take_bytes(&self, cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
        let end = cursor.checked_add(len).ok_or_else(|| {
            Error::InvalidDataFormat("value length overflows the data section".to_string())
        })?;
        if end > self.buffer.len() {
            return Err(Error::InvalidDataFormat(format!(
                "read of {} bytes at offset {} runs past data section end {}",
                len,
                cursor,
                self.buffer.len()
            )));
        }
        let slice = &self.buffer[*cursor..end];
        *cursor = end;
        Ok(slice)
    }
}
