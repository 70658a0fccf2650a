//! The dynamic value model for opack payloads.

/// Key-value pairs of a dictionary, in encounter order.
///
/// Keys may be any value (in practice strings), so a pair list is used
/// instead of a hash map; lookups go through [`Value::get`].
pub type Dictionary = Vec<(Value, Value)>;

/// A single opack value.
///
/// Integers decoded off the wire always normalize to [`Value::Int`]. The
/// width-forced variants exist for encoding: a field that must occupy a fixed
/// wire width regardless of magnitude (request ids and statuses are always
/// 64-bit) is expressed as `Int64`, overriding the shortest-fit rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer, encoded with the smallest representation that fits.
    Int(i64),
    /// Integer forced to 8-bit wire width.
    Int8(i8),
    /// Integer forced to 16-bit wire width.
    Int16(i16),
    /// Integer forced to 32-bit wire width.
    Int32(i32),
    /// Integer forced to 64-bit wire width.
    Int64(i64),
    /// 32-bit float.
    Float32(f32),
    /// 64-bit float.
    Float64(f64),
    /// Seconds since 2001-01-01 UTC.
    Date(f64),
    /// UUID, 16 big-endian bytes.
    Uuid([u8; 16]),
    /// UTF-8 string.
    String(String),
    /// Opaque byte blob.
    Bytes(Vec<u8>),
    /// Ordered list of values.
    Array(Vec<Value>),
    /// Ordered key-value pairs.
    Dictionary(Dictionary),
}

impl Value {
    /// Integer content of any integer variant, regardless of wire width.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) | Self::Int64(v) => Some(*v),
            Self::Int8(v) => Some(i64::from(*v)),
            Self::Int16(v) => Some(i64::from(*v)),
            Self::Int32(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// String content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Blob content, if this is a byte blob.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Boolean content, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Array content, if this is an array.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Dictionary content, if this is a dictionary.
    pub fn as_dictionary(&self) -> Option<&Dictionary> {
        match self {
            Self::Dictionary(pairs) => Some(pairs),
            _ => None,
        }
    }

    /// Look up a string key in a dictionary value.
    ///
    /// Returns `None` if this is not a dictionary or the key is absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dictionary()?
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }

    /// True if this value is a dictionary with no entries.
    pub fn is_empty_dictionary(&self) -> bool {
        matches!(self, Self::Dictionary(pairs) if pairs.is_empty())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dictionary_lookup() {
        let dict = Value::Dictionary(vec![
            (Value::from("streamId"), Value::from(42i64)),
            (Value::from("type"), Value::from("ipcamera.recording")),
        ]);

        assert_eq!(dict.get("streamId").and_then(Value::as_i64), Some(42));
        assert_eq!(
            dict.get("type").and_then(Value::as_str),
            Some("ipcamera.recording")
        );
        assert!(dict.get("missing").is_none());
    }

    #[test]
    fn test_as_i64_accepts_all_widths() {
        assert_eq!(Value::Int8(-5).as_i64(), Some(-5));
        assert_eq!(Value::Int16(300).as_i64(), Some(300));
        assert_eq!(Value::Int32(70_000).as_i64(), Some(70_000));
        assert_eq!(Value::Int64(1 << 40).as_i64(), Some(1 << 40));
        assert_eq!(Value::from("nope").as_i64(), None);
    }
}
