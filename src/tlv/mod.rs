//! TLV8 codec for the setup characteristic control plane.
//!
//! Type-length-value items with one-byte types and lengths. Values longer
//! than 255 bytes are split into consecutive fragments of the same type and
//! coalesced again on decode. This codec is only used to negotiate session
//! setup; stream payloads use [`crate::opack`].

use crate::core::TlvError;

/// Encode items in order, fragmenting values longer than 255 bytes.
pub fn encode(items: &[(u8, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for &(item_type, value) in items {
        if value.is_empty() {
            out.push(item_type);
            out.push(0);
            continue;
        }
        for fragment in value.chunks(255) {
            out.push(item_type);
            out.push(fragment.len() as u8);
            out.extend_from_slice(fragment);
        }
    }
    out
}

/// Decode items in order, coalescing consecutive fragments of one type.
pub fn decode(bytes: &[u8]) -> Result<Vec<(u8, Vec<u8>)>, TlvError> {
    let mut items: Vec<(u8, Vec<u8>)> = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        if pos + 2 > bytes.len() {
            return Err(TlvError::Truncated {
                needed: 2,
                remaining: bytes.len() - pos,
            });
        }
        let item_type = bytes[pos];
        let length = usize::from(bytes[pos + 1]);
        pos += 2;

        if pos + length > bytes.len() {
            return Err(TlvError::Truncated {
                needed: length,
                remaining: bytes.len() - pos,
            });
        }
        let value = &bytes[pos..pos + length];
        pos += length;

        // A 255-byte fragment may be continued by the next item of the
        // same type.
        match items.last_mut() {
            Some((last_type, last_value))
                if *last_type == item_type && last_value.len() % 255 == 0
                    && !last_value.is_empty() =>
            {
                last_value.extend_from_slice(value);
            }
            _ => items.push((item_type, value.to_vec())),
        }
    }

    Ok(items)
}

/// First item of the given type, if present.
pub fn find(items: &[(u8, Vec<u8>)], item_type: u8) -> Option<&[u8]> {
    items
        .iter()
        .find(|(t, _)| *t == item_type)
        .map(|(_, v)| v.as_slice())
}
