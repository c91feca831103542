//! The weft cross-thread data-sharing runtime.
//!
//! Cooperating worker threads exchange asynchronous messages and share
//! long-lived objects whose scalar properties are kept eventually consistent
//! over a shared atomic buffer.
//!
//! - [`shm`]: the shared buffer primitive (atomic words plus futex-style
//!   wait/notify).
//! - [`buffer`]: type-id codec, property schemas and the typed
//!   [`BufferStruct`] view with its lock and notify protocols.
//! - [`protocol`]: the control-message wire definitions.
//! - [`runtime`]: [`SharedObject`] and the per-worker [`Router`].

#![forbid(unsafe_code)]

#[doc(inline)]
pub use weft_buffer as buffer;
#[doc(inline)]
pub use weft_protocol as protocol;
#[doc(inline)]
pub use weft_runtime as runtime;
#[doc(inline)]
pub use weft_shm as shm;

pub use weft_buffer::{BufferStruct, PropKind, PropertySpec, StructLayout, Value};
pub use weft_runtime::{
    CloseOutcome, Endpoint, Error, Packet, Router, RouterOptions, SharedObject,
};
pub use weft_shm::{SharedBuffer, WaitOutcome};
