/// A result with the runtime [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the weft runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No router has been initialized on this worker.
    #[error("no router is initialized on this worker")]
    NotInitialized,

    /// A router is already initialized on this worker.
    #[error("a router is already initialized on this worker")]
    AlreadyInitialized,

    /// A send or close targeted a peer that was never registered.
    #[error("worker {0:?} is not registered")]
    UnknownWorker(String),

    /// A response arrived for an async message id with no pending request.
    #[error("response received for unknown async message id {0}")]
    UnknownAsyncResponse(u64),

    /// An operation needed the buffer of a destroyed shared object.
    #[error("shared object used after destruction")]
    UseAfterDestroy,

    /// A `shareObjects` message arrived but the factory produced no object.
    #[error("shared-object factory produced nothing for incoming type {type_tag:?}")]
    FactoryFailure {
        /// Decoded type tag of the buffer the factory rejected.
        type_tag: String,
    },

    /// The peer closed before the pending request was answered.
    #[error("worker {0:?} closed before responding")]
    WorkerClosed(String),

    /// The peer's handler failed; its error message travelled back in the
    /// response.
    #[error("peer returned an error: {message}")]
    Remote {
        /// The remote error message.
        message: String,
    },

    /// A typed-buffer operation failed.
    #[error(transparent)]
    Buffer(#[from] weft_buffer::BufferError),
}
