//! Opack decoder.
//!
//! A [`Reader`] walks a byte slice and produces a [`Value`] tree. Scalars are
//! recorded in encounter order so that back-reference tags (0xA0..=0xCF) can
//! replay them; byte blobs and containers are never recorded.

use crate::core::OpackError;

use super::tag;
use super::value::{Dictionary, Value};

/// Result of decoding one item: either a value or the collection terminator.
enum Item {
    Value(Value),
    Terminator,
}

/// A decoding cursor over an in-memory byte slice.
///
/// One reader decodes one top-level value; the back-reference table does not
/// carry across payloads.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    /// Scalars decoded so far, indexed by back-reference tags.
    seen: Vec<Value>,
}

/// Decode a complete opack value from `bytes`.
///
/// The entire slice must be consumed; leftover bytes are an error.
pub fn decode(bytes: &[u8]) -> Result<Value, OpackError> {
    let mut reader = Reader::new(bytes);
    let value = reader.decode_value()?;
    let remaining = reader.remaining();
    if remaining > 0 {
        return Err(OpackError::TrailingBytes(remaining));
    }
    Ok(value)
}

impl<'a> Reader<'a> {
    /// Create a reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0, seen: Vec::new() }
    }

    /// Remaining bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Decode the next value; a bare terminator is an error here.
    pub fn decode_value(&mut self) -> Result<Value, OpackError> {
        match self.decode_item()? {
            Item::Value(value) => Ok(value),
            Item::Terminator => Err(OpackError::UnexpectedTerminator),
        }
    }

    fn ensure(&self, length: usize) -> Result<(), OpackError> {
        if self.pos + length > self.buf.len() {
            return Err(OpackError::UnexpectedEof {
                needed: length,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8, OpackError> {
        self.ensure(1)?;
        let byte = self.buf[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    fn read_slice(&mut self, length: usize) -> Result<&'a [u8], OpackError> {
        self.ensure(length)?;
        let slice = &self.buf[self.pos..self.pos + length];
        self.pos += length;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], OpackError> {
        let slice = self.read_slice(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    /// Record a scalar in the back-reference table and pass it through.
    fn track(&mut self, value: Value) -> Value {
        self.seen.push(value.clone());
        value
    }

    /// Length field for the prefixed string and blob forms.
    fn read_length(&mut self, width: usize) -> Result<usize, OpackError> {
        let length = match width {
            1 => u64::from(self.read_byte()?),
            2 => u64::from(u16::from_le_bytes(self.read_array::<2>()?)),
            4 => u64::from(u32::from_le_bytes(self.read_array::<4>()?)),
            _ => u64::from_le_bytes(self.read_array::<8>()?),
        };
        usize::try_from(length).map_err(|_| OpackError::UnexpectedEof {
            needed: usize::MAX,
            remaining: self.remaining(),
        })
    }

    fn read_string(&mut self, length: usize) -> Result<Value, OpackError> {
        let bytes = self.read_slice(length)?;
        let text = std::str::from_utf8(bytes).map_err(|_| OpackError::InvalidUtf8)?;
        Ok(self.track(Value::String(text.to_owned())))
    }

    /// Distance from the cursor to the next occurrence of `delimiter`.
    fn find(&self, delimiter: u8) -> Result<usize, OpackError> {
        self.buf[self.pos..]
            .iter()
            .position(|&b| b == delimiter)
            .ok_or(OpackError::UnexpectedEof {
                needed: 1,
                remaining: 0,
            })
    }

    fn decode_item(&mut self) -> Result<Item, OpackError> {
        let tag = self.read_byte()?;
        let value = match tag {
            tag::INVALID => return Err(OpackError::InvalidTag(tag)),
            tag::TRUE => self.track(Value::Bool(true)),
            tag::FALSE => self.track(Value::Bool(false)),
            tag::TERMINATOR => return Ok(Item::Terminator),
            tag::NULL => Value::Null,
            tag::UUID => {
                let bytes = self.read_array::<16>()?;
                self.track(Value::Uuid(bytes))
            }
            tag::DATE => {
                let seconds = f64::from_le_bytes(self.read_array::<8>()?);
                self.track(Value::Date(seconds))
            }
            tag::INTEGER_MINUS_ONE => self.track(Value::Int(-1)),
            tag::INTEGER_RANGE_START..=tag::INTEGER_RANGE_STOP => {
                self.track(Value::Int(i64::from(tag - tag::INTEGER_RANGE_START)))
            }
            tag::INT8 => {
                let v = i8::from_le_bytes(self.read_array::<1>()?);
                self.track(Value::Int(i64::from(v)))
            }
            tag::INT16LE => {
                let v = i16::from_le_bytes(self.read_array::<2>()?);
                self.track(Value::Int(i64::from(v)))
            }
            tag::INT32LE => {
                let v = i32::from_le_bytes(self.read_array::<4>()?);
                self.track(Value::Int(i64::from(v)))
            }
            tag::INT64LE => {
                let v = i64::from_le_bytes(self.read_array::<8>()?);
                self.track(Value::Int(v))
            }
            tag::FLOAT32LE => {
                let v = f32::from_le_bytes(self.read_array::<4>()?);
                self.track(Value::Float32(v))
            }
            tag::FLOAT64LE => {
                let v = f64::from_le_bytes(self.read_array::<8>()?);
                self.track(Value::Float64(v))
            }
            tag::UTF8_LENGTH_START..=tag::UTF8_LENGTH_STOP => {
                let length = usize::from(tag - tag::UTF8_LENGTH_START);
                self.read_string(length)?
            }
            tag::UTF8_LENGTH8 => {
                let length = self.read_length(1)?;
                self.read_string(length)?
            }
            tag::UTF8_LENGTH16LE => {
                let length = self.read_length(2)?;
                self.read_string(length)?
            }
            tag::UTF8_LENGTH32LE => {
                let length = self.read_length(4)?;
                self.read_string(length)?
            }
            tag::UTF8_LENGTH64LE => {
                let length = self.read_length(8)?;
                self.read_string(length)?
            }
            tag::UTF8_NULL_TERMINATED => {
                let length = self.find(0x00)?;
                let value = self.read_string(length)?;
                self.pos += 1; // consume the NUL
                value
            }
            tag::DATA_LENGTH_START..=tag::DATA_LENGTH_STOP => {
                let length = usize::from(tag - tag::DATA_LENGTH_START);
                Value::Bytes(self.read_slice(length)?.to_vec())
            }
            tag::DATA_LENGTH8 => {
                let length = self.read_length(1)?;
                Value::Bytes(self.read_slice(length)?.to_vec())
            }
            tag::DATA_LENGTH16LE => {
                let length = self.read_length(2)?;
                Value::Bytes(self.read_slice(length)?.to_vec())
            }
            tag::DATA_LENGTH32LE => {
                let length = self.read_length(4)?;
                Value::Bytes(self.read_slice(length)?.to_vec())
            }
            tag::DATA_LENGTH64LE => {
                let length = self.read_length(8)?;
                Value::Bytes(self.read_slice(length)?.to_vec())
            }
            tag::DATA_TERMINATED => {
                let length = self.find(tag::TERMINATOR)?;
                let value = Value::Bytes(self.read_slice(length)?.to_vec());
                self.pos += 1; // consume the terminator
                value
            }
            tag::COMPRESSION_START..=tag::COMPRESSION_STOP => {
                let index = usize::from(tag - tag::COMPRESSION_START);
                self.seen
                    .get(index)
                    .cloned()
                    .ok_or(OpackError::BackReferenceOutOfRange(index))?
            }
            tag::ARRAY_LENGTH_START..=tag::ARRAY_LENGTH_STOP => {
                let length = usize::from(tag - tag::ARRAY_LENGTH_START);
                let mut items = Vec::with_capacity(length);
                for _ in 0..length {
                    items.push(self.decode_value()?);
                }
                Value::Array(items)
            }
            tag::ARRAY_TERMINATED => {
                let mut items = Vec::new();
                loop {
                    match self.decode_item()? {
                        Item::Value(value) => items.push(value),
                        Item::Terminator => break,
                    }
                }
                Value::Array(items)
            }
            tag::DICTIONARY_LENGTH_START..=tag::DICTIONARY_LENGTH_STOP => {
                let length = usize::from(tag - tag::DICTIONARY_LENGTH_START);
                let mut pairs = Dictionary::with_capacity(length);
                for _ in 0..length {
                    let key = self.decode_value()?;
                    let value = self.decode_value()?;
                    pairs.push((key, value));
                }
                Value::Dictionary(pairs)
            }
            tag::DICTIONARY_TERMINATED => {
                let mut pairs = Dictionary::new();
                loop {
                    let key = match self.decode_item()? {
                        Item::Value(value) => value,
                        Item::Terminator => break,
                    };
                    let value = match self.decode_item()? {
                        Item::Value(value) => value,
                        Item::Terminator => return Err(OpackError::OddDictionary),
                    };
                    pairs.push((key, value));
                }
                Value::Dictionary(pairs)
            }
            other => return Err(OpackError::InvalidTag(other)),
        };
        Ok(Item::Value(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_scalars() {
        assert_eq!(decode(&[0x01]).unwrap(), Value::Bool(true));
        assert_eq!(decode(&[0x02]).unwrap(), Value::Bool(false));
        assert_eq!(decode(&[0x04]).unwrap(), Value::Null);
        assert_eq!(decode(&[0x07]).unwrap(), Value::Int(-1));
        assert_eq!(decode(&[0x08]).unwrap(), Value::Int(0));
        assert_eq!(decode(&[0x2E]).unwrap(), Value::Int(38));
    }

    #[test]
    fn test_decode_fixed_width_integers() {
        assert_eq!(decode(&[0x30, 0xFF]).unwrap(), Value::Int(-1));
        assert_eq!(decode(&[0x31, 0x00, 0x80]).unwrap(), Value::Int(-32768));
        assert_eq!(
            decode(&[0x32, 0x00, 0x00, 0x00, 0x80]).unwrap(),
            Value::Int(i64::from(i32::MIN))
        );
        assert_eq!(
            decode(&[0x33, 1, 0, 0, 0, 0, 0, 0, 0]).unwrap(),
            Value::Int(1)
        );
    }

    #[test]
    fn test_decode_strings() {
        assert_eq!(decode(&[0x40]).unwrap(), Value::String(String::new()));
        assert_eq!(decode(&[0x42, b'h', b'i']).unwrap(), Value::from("hi"));
        assert_eq!(
            decode(&[0x61, 0x02, b'h', b'i']).unwrap(),
            Value::from("hi")
        );
        assert_eq!(
            decode(&[0x6F, b'h', b'i', 0x00]).unwrap(),
            Value::from("hi")
        );
    }

    #[test]
    fn test_decode_terminated_blob() {
        assert_eq!(
            decode(&[0x9F, 0x10, 0x20, 0x03]).unwrap(),
            Value::Bytes(vec![0x10, 0x20])
        );
    }

    #[test]
    fn test_decode_containers() {
        // [1, "a"]
        assert_eq!(
            decode(&[0xD2, 0x09, 0x41, b'a']).unwrap(),
            Value::Array(vec![Value::Int(1), Value::from("a")])
        );
        // terminated array
        assert_eq!(
            decode(&[0xDF, 0x09, 0x0A, 0x03]).unwrap(),
            Value::Array(vec![Value::Int(1), Value::Int(2)])
        );
        // {"k": 5}
        assert_eq!(
            decode(&[0xE1, 0x41, b'k', 0x0D]).unwrap(),
            Value::Dictionary(vec![(Value::from("k"), Value::Int(5))])
        );
        // terminated dictionary
        assert_eq!(
            decode(&[0xEF, 0x41, b'k', 0x0D, 0x03]).unwrap(),
            Value::Dictionary(vec![(Value::from("k"), Value::Int(5))])
        );
    }

    #[test]
    fn test_decode_back_reference() {
        // ["ab", <ref 0>] — the second element replays the first string
        let value = decode(&[0xD2, 0x42, b'a', b'b', 0xA0]).unwrap();
        assert_eq!(
            value,
            Value::Array(vec![Value::from("ab"), Value::from("ab")])
        );
    }

    #[test]
    fn test_back_reference_skips_blobs() {
        // A blob is not recorded; the first recorded scalar is the integer.
        let value = decode(&[0xD3, 0x71, 0xAA, 0x0C, 0xA0]).unwrap();
        assert_eq!(
            value,
            Value::Array(vec![Value::Bytes(vec![0xAA]), Value::Int(4), Value::Int(4)])
        );
    }

    #[test]
    fn test_reject_malformed() {
        // invalid tag
        assert_eq!(decode(&[0x00]), Err(OpackError::InvalidTag(0x00)));
        // unassigned tag
        assert_eq!(decode(&[0x2F]), Err(OpackError::InvalidTag(0x2F)));
        // truncated string
        assert!(matches!(
            decode(&[0x42, b'h']),
            Err(OpackError::UnexpectedEof { .. })
        ));
        // invalid utf-8
        assert_eq!(decode(&[0x41, 0xFF]), Err(OpackError::InvalidUtf8));
        // back-reference before any scalar
        assert_eq!(decode(&[0xA0]), Err(OpackError::BackReferenceOutOfRange(0)));
        // dangling dictionary key
        assert_eq!(
            decode(&[0xEF, 0x41, b'k', 0x03]),
            Err(OpackError::OddDictionary)
        );
        // bare terminator
        assert_eq!(decode(&[0x03]), Err(OpackError::UnexpectedTerminator));
        // trailing bytes
        assert_eq!(decode(&[0x04, 0x04]), Err(OpackError::TrailingBytes(1)));
    }
}
