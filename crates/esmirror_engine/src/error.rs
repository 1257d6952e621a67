//! Error types for the mirror engine.

use thiserror::Error;

/// Result type for mirror operations.
pub type MirrorResult<T> = Result<T, MirrorError>;

/// Errors that can occur during bulk synchronization or scroll paging.
///
/// Every variant is fatal to the current session. There is no client-side
/// retry at this layer: conflict retries are expressed inside the encoded
/// compare-and-act scripts, and a caller who sees a transport failure re-runs
/// the whole synchronization, which is safe because replaying conditional
/// mutations is a no-op once their preconditions no longer hold.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Network or transport-level failure (connection failure, non-success
    /// HTTP status). Propagated unchanged to the caller.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote engine reported an error field in an otherwise well-formed
    /// response. Carries the raw body for diagnosis.
    #[error("search engine error: {body}")]
    Engine {
        /// The raw response body.
        body: String,
    },

    /// Malformed or unexpected response shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The caller read past the declared total number of hits.
    #[error("attempt to read past total number of hits of {total}")]
    Exhausted {
        /// The declared total for the scroll.
        total: u64,
    },

    /// Buffer pool invariant violation; never expected in correct use.
    #[error("unable to checkout from batch pool")]
    PoolExhausted,

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,
}

impl MirrorError {
    /// Wraps a malformed-response decode failure.
    pub fn malformed(err: impl std::fmt::Display) -> Self {
        Self::Protocol(format!("malformed response: {err}"))
    }
}
