//! Opack encoder.
//!
//! Chooses the shortest representation for every value: small integers ride
//! in the tag byte, strings and blobs up to 32 bytes carry their length
//! inline, longer ones take the smallest length prefix that fits, and
//! collections switch to the terminated form past the inline range. The
//! width-forced integer variants bypass shortest-fit. Back-references are
//! never emitted; decoders accept payloads without them.

use super::tag;
use super::value::Value;

/// A growable encoding buffer.
pub struct Writer {
    buf: Vec<u8>,
}

/// Encode a value into a fresh byte vector.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut writer = Writer::new();
    writer.write_value(value);
    writer.into_bytes()
}

impl Writer {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume the writer and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Append one encoded value.
    pub fn write_value(&mut self, value: &Value) {
        match value {
            Value::Null => self.buf.push(tag::NULL),
            Value::Bool(true) => self.buf.push(tag::TRUE),
            Value::Bool(false) => self.buf.push(tag::FALSE),
            Value::Int(v) => self.write_int(*v),
            Value::Int8(v) => {
                self.buf.push(tag::INT8);
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::Int16(v) => {
                self.buf.push(tag::INT16LE);
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::Int32(v) => {
                self.buf.push(tag::INT32LE);
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::Int64(v) => {
                self.buf.push(tag::INT64LE);
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::Float32(v) => {
                self.buf.push(tag::FLOAT32LE);
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::Float64(v) => {
                self.buf.push(tag::FLOAT64LE);
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::Date(seconds) => {
                self.buf.push(tag::DATE);
                self.buf.extend_from_slice(&seconds.to_le_bytes());
            }
            Value::Uuid(bytes) => {
                self.buf.push(tag::UUID);
                self.buf.extend_from_slice(bytes);
            }
            Value::String(text) => self.write_string(text),
            Value::Bytes(bytes) => self.write_bytes(bytes),
            Value::Array(items) => {
                let inline = items.len() <= tag::INLINE_ARRAY_MAX;
                if inline {
                    self.buf.push(tag::ARRAY_LENGTH_START + items.len() as u8);
                } else {
                    self.buf.push(tag::ARRAY_TERMINATED);
                }
                for item in items {
                    self.write_value(item);
                }
                if !inline {
                    self.buf.push(tag::TERMINATOR);
                }
            }
            Value::Dictionary(pairs) => {
                let inline = pairs.len() <= tag::INLINE_DICTIONARY_MAX;
                if inline {
                    self.buf.push(tag::DICTIONARY_LENGTH_START + pairs.len() as u8);
                } else {
                    self.buf.push(tag::DICTIONARY_TERMINATED);
                }
                for (key, item) in pairs {
                    self.write_value(key);
                    self.write_value(item);
                }
                if !inline {
                    self.buf.push(tag::TERMINATOR);
                }
            }
        }
    }

    fn write_int(&mut self, value: i64) {
        if value == -1 {
            self.buf.push(tag::INTEGER_MINUS_ONE);
        } else if (0..=tag::INTEGER_RANGE_MAX).contains(&value) {
            self.buf.push(tag::INTEGER_RANGE_START + value as u8);
        } else if let Ok(v) = i8::try_from(value) {
            self.buf.push(tag::INT8);
            self.buf.extend_from_slice(&v.to_le_bytes());
        } else if let Ok(v) = i16::try_from(value) {
            self.buf.push(tag::INT16LE);
            self.buf.extend_from_slice(&v.to_le_bytes());
        } else if let Ok(v) = i32::try_from(value) {
            self.buf.push(tag::INT32LE);
            self.buf.extend_from_slice(&v.to_le_bytes());
        } else {
            self.buf.push(tag::INT64LE);
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
    }

    fn write_string(&mut self, text: &str) {
        let length = text.len();
        if length <= tag::INLINE_LENGTH_MAX {
            self.buf.push(tag::UTF8_LENGTH_START + length as u8);
        } else if let Ok(v) = u8::try_from(length) {
            self.buf.push(tag::UTF8_LENGTH8);
            self.buf.push(v);
        } else if let Ok(v) = u16::try_from(length) {
            self.buf.push(tag::UTF8_LENGTH16LE);
            self.buf.extend_from_slice(&v.to_le_bytes());
        } else if let Ok(v) = u32::try_from(length) {
            self.buf.push(tag::UTF8_LENGTH32LE);
            self.buf.extend_from_slice(&v.to_le_bytes());
        } else {
            self.buf.push(tag::UTF8_LENGTH64LE);
            self.buf.extend_from_slice(&(length as u64).to_le_bytes());
        }
        self.buf.extend_from_slice(text.as_bytes());
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        let length = bytes.len();
        if length <= tag::INLINE_LENGTH_MAX {
            self.buf.push(tag::DATA_LENGTH_START + length as u8);
        } else if let Ok(v) = u8::try_from(length) {
            self.buf.push(tag::DATA_LENGTH8);
            self.buf.push(v);
        } else if let Ok(v) = u16::try_from(length) {
            self.buf.push(tag::DATA_LENGTH16LE);
            self.buf.extend_from_slice(&v.to_le_bytes());
        } else if let Ok(v) = u32::try_from(length) {
            self.buf.push(tag::DATA_LENGTH32LE);
            self.buf.extend_from_slice(&v.to_le_bytes());
        } else {
            self.buf.push(tag::DATA_LENGTH64LE);
            self.buf.extend_from_slice(&(length as u64).to_le_bytes());
        }
        self.buf.extend_from_slice(bytes);
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}
