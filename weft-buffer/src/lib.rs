//! Typed, schema-driven views over shared buffers.
//!
//! A [`BufferStruct`] projects a declared property layout onto a
//! [`SharedBuffer`](weft_shm::SharedBuffer): a fixed 40-byte header (type id,
//! notify word, lock word, unique id, dirty and undefined bitmasks) followed
//! by a property region whose placement is computed once per concrete struct
//! type by [`StructLayout::compute`].
//!
//! Two workers holding views over the same buffer coordinate through the
//! header: the lock word carries a spinning/parking mutex, the notify word a
//! futex-style wake channel, and the dirty bitmask records which properties
//! changed since the peer last looked.

#![forbid(unsafe_code)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod buffer_struct;
mod error;
mod schema;
pub mod type_id;
mod value;

pub use buffer_struct::BufferStruct;
pub use error::BufferError;
pub use schema::{
    HEADER_BYTES, MAX_PROPERTIES, MAX_STRING_LEN, PropKind, PropertyLayout, PropertySpec,
    StructLayout,
};
pub use value::Value;
