//! Packs short uppercase/digit tags into 32-bit type identifiers.
//!
//! A tag is 1 to 4 characters from `A-Z`/`0-9`, packed little-endian with one
//! byte per character. Unused trailing bytes are zero, so `"NODE"` and `"N"`
//! are both valid while the empty tag is not.

use crate::BufferError;

/// Packs `tag` into a 32-bit type identifier.
pub fn encode(tag: &str) -> Result<u32, BufferError> {
    let length = tag.len();
    if length == 0 || length > 4 {
        return Err(BufferError::InvalidTypeIdLength { length });
    }
    let mut type_id = 0_u32;
    for (index, byte) in tag.bytes().enumerate() {
        if !byte.is_ascii_uppercase() && !byte.is_ascii_digit() {
            return Err(BufferError::InvalidTypeIdChar {
                tag: tag.to_owned(),
                character: byte as char,
            });
        }
        type_id |= u32::from(byte) << (index * 8);
    }
    Ok(type_id)
}

/// Unpacks `type_id` back into its tag.
///
/// Structurally invalid identifiers decode to `"????"`; use [`is_valid`] to
/// distinguish them.
pub fn decode(type_id: u32) -> String {
    try_decode(type_id).unwrap_or_else(|| "????".to_owned())
}

/// Returns whether `type_id` is a structurally valid packed tag.
pub fn is_valid(type_id: u32) -> bool {
    try_decode(type_id).is_some()
}

fn try_decode(type_id: u32) -> Option<String> {
    let mut tag = String::with_capacity(4);
    let mut terminated = false;
    for index in 0..4 {
        let byte = ((type_id >> (index * 8)) & 0xff) as u8;
        if byte == 0 {
            // A zero byte ends the tag; a leading zero means no tag at all.
            if index == 0 {
                return None;
            }
            terminated = true;
            continue;
        }
        if terminated || (!byte.is_ascii_uppercase() && !byte.is_ascii_digit()) {
            return None;
        }
        tag.push(byte as char);
    }
    Some(tag)
}
