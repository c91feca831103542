/// Errors produced by the typed buffer layer.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// A type tag contained a character outside `A-Z`/`0-9`.
    #[error("invalid character {character:?} in type tag {tag:?}")]
    InvalidTypeIdChar {
        /// The offending tag.
        tag: String,
        /// The first character outside the allowed range.
        character: char,
    },

    /// A type tag was empty or longer than four characters.
    #[error("invalid type tag length {length}, tags are 1 to 4 characters")]
    InvalidTypeIdLength {
        /// Length of the rejected tag in bytes.
        length: usize,
    },

    /// An existing buffer does not carry the type id the struct type expects.
    ///
    /// This also covers buffers failing the basic size checks (shorter than
    /// the header or not a multiple of 8 bytes), whose extracted type id is 0.
    #[error("type id mismatch: buffer holds {actual:#010x}, expected {expected:#010x}")]
    TypeIdMismatch {
        /// The type id the struct type was declared with.
        expected: u32,
        /// The type id extracted from the buffer header.
        actual: u32,
    },

    /// A struct type declared more properties than the two bitmask words can
    /// track.
    #[error("struct type {tag:?} declares {count} properties, the limit is 64")]
    TooManyProperties {
        /// The struct type's tag.
        tag: String,
        /// Number of declared properties.
        count: usize,
    },
}
