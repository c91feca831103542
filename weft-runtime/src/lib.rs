//! Shared objects and the per-worker router of the weft data-sharing
//! runtime.
//!
//! Each cooperating worker is a single-threaded cooperative executor (an OS
//! thread driving a current-thread async runtime) with exactly one
//! [`Router`]. Workers exchange arbitrary JSON messages and long-lived
//! [`SharedObject`]s whose scalar properties stay eventually consistent
//! through a shared atomic buffer, with last-writer-wins semantics.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::LazyLock;
//!
//! use weft_buffer::{PropertySpec, StructLayout};
//! use weft_runtime::{Endpoint, Router, RouterOptions, SharedObject};
//!
//! static GAUGE: LazyLock<StructLayout> = LazyLock::new(|| {
//!     StructLayout::compute("GAUG", &[PropertySpec::number("value")]).unwrap()
//! });
//!
//! # async fn example() -> Result<(), weft_runtime::Error> {
//! let (to_child, from_parent) = Endpoint::pair();
//! // ... hand `from_parent` to the spawned worker ...
//! # drop(from_parent);
//!
//! let router = Router::init(RouterOptions::new(1, "main"))?;
//! router.register_worker("child", to_child);
//!
//! let gauge = SharedObject::new(&router, &GAUGE, &[("value", 1.0.into())]);
//! router.share_objects("child", std::slice::from_ref(&gauge)).await?;
//! gauge.set("value", 2.0);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod error;
mod object;
mod router;
mod transport;

pub use error::{Error, Result};
pub use object::{EVENT_AFTER_DESTROY, EVENT_BEFORE_DESTROY, ListenerId, SharedObject};
pub use router::{CloseOutcome, DEFAULT_CLOSE_TIMEOUT, PARENT_WORKER_NAME, Router, RouterOptions};
pub use transport::{Endpoint, Packet};
