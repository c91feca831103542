//! Declarative property schemas and their computed buffer layouts.
//!
//! A concrete struct type declares its ordered property list once as a slice
//! of [`PropertySpec`]s; [`StructLayout::compute`] turns that into the byte
//! placement every view over a buffer of that type agrees on. Derived types
//! append to the base type's list: concatenate the base specs with the
//! extension's and compute a layout for the combined slice.

use crate::{BufferError, type_id};

/// Byte length of the fixed buffer header.
pub const HEADER_BYTES: usize = 40;

/// Maximum number of properties per struct type (two 32-bit mask words).
pub const MAX_PROPERTIES: usize = 64;

/// Maximum string length in UTF-16 code units; longer writes are truncated.
pub const MAX_STRING_LEN: usize = 255;

/// Byte size of a string slot: a 2-byte length plus 255 16-bit code units.
const STRING_SLOT_BYTES: usize = 512;

/// The scalar kinds a property can hold.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PropKind {
    /// IEEE-754 double, 8 bytes, 8-byte aligned.
    Number,
    /// Signed 32-bit integer, 4 bytes, 4-byte aligned.
    Int32,
    /// Boolean stored as 0/1 in an int32 slot.
    Boolean,
    /// Length-prefixed UTF-16 string, 512-byte slot, 2-byte aligned.
    String,
}

impl PropKind {
    fn alignment(self) -> usize {
        match self {
            PropKind::Number => 8,
            PropKind::Int32 | PropKind::Boolean => 4,
            PropKind::String => 2,
        }
    }

    fn byte_size(self) -> usize {
        match self {
            PropKind::Number => 8,
            PropKind::Int32 | PropKind::Boolean => 4,
            PropKind::String => STRING_SLOT_BYTES,
        }
    }
}

/// A declared property, before layout computation.
#[derive(Clone, Copy, Debug)]
pub struct PropertySpec {
    /// Property name, unique within a struct type.
    pub name: &'static str,
    /// The scalar kind.
    pub kind: PropKind,
    /// Whether the property may hold [`Value::Undefined`](crate::Value).
    pub allow_undefined: bool,
}

impl PropertySpec {
    /// Declares a property of the given kind.
    pub const fn new(name: &'static str, kind: PropKind) -> Self {
        Self {
            name,
            kind,
            allow_undefined: false,
        }
    }

    /// Declares a number property.
    pub const fn number(name: &'static str) -> Self {
        Self::new(name, PropKind::Number)
    }

    /// Declares an int32 property.
    pub const fn int32(name: &'static str) -> Self {
        Self::new(name, PropKind::Int32)
    }

    /// Declares a boolean property.
    pub const fn boolean(name: &'static str) -> Self {
        Self::new(name, PropKind::Boolean)
    }

    /// Declares a string property.
    pub const fn string(name: &'static str) -> Self {
        Self::new(name, PropKind::String)
    }

    /// Marks the property as nullable.
    pub const fn nullable(mut self) -> Self {
        self.allow_undefined = true;
        self
    }
}

/// A property with its computed placement.
#[derive(Clone, Debug)]
pub struct PropertyLayout {
    /// Position in declaration order; also the bit index in the dirty and
    /// undefined masks.
    pub prop_num: u32,
    /// Property name.
    pub name: &'static str,
    /// The scalar kind.
    pub kind: PropKind,
    /// Offset of the property's slot from the start of the buffer.
    pub byte_offset: usize,
    /// Size of the property's slot.
    pub byte_size: usize,
    /// Whether the property may be undefined.
    pub allow_undefined: bool,
}

/// The computed layout of a concrete struct type, shared by every view.
#[derive(Debug)]
pub struct StructLayout {
    type_tag: &'static str,
    type_id: u32,
    properties: Vec<PropertyLayout>,
    byte_len: usize,
}

impl StructLayout {
    /// Computes the layout for a struct type tagged `tag` with the given
    /// ordered property list.
    pub fn compute(tag: &'static str, specs: &[PropertySpec]) -> Result<Self, BufferError> {
        let type_id = type_id::encode(tag)?;
        if specs.len() > MAX_PROPERTIES {
            return Err(BufferError::TooManyProperties {
                tag: tag.to_owned(),
                count: specs.len(),
            });
        }

        let mut properties = Vec::with_capacity(specs.len());
        let mut offset = HEADER_BYTES;
        for (index, spec) in specs.iter().enumerate() {
            offset = offset.next_multiple_of(spec.kind.alignment());
            properties.push(PropertyLayout {
                prop_num: index as u32,
                name: spec.name,
                kind: spec.kind,
                byte_offset: offset,
                byte_size: spec.kind.byte_size(),
                allow_undefined: spec.allow_undefined,
            });
            offset += spec.kind.byte_size();
        }

        Ok(Self {
            type_tag: tag,
            type_id,
            properties,
            byte_len: offset.next_multiple_of(8),
        })
    }

    /// The struct type's tag.
    pub fn type_tag(&self) -> &'static str {
        self.type_tag
    }

    /// The struct type's packed 32-bit type id.
    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    /// Total buffer size for this type.
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// The properties in declaration order.
    pub fn properties(&self) -> &[PropertyLayout] {
        &self.properties
    }

    /// Looks a property up by name.
    pub fn property(&self, name: &str) -> Option<&PropertyLayout> {
        self.properties.iter().find(|property| property.name == name)
    }
}
