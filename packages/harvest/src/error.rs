//! Typed errors for the harvesting library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.

use thiserror::Error;

/// Errors in the postback protocol layer.
///
/// `MalformedResponse` is retryable at the request level. The token
/// sequencing variants indicate a bug in caller sequencing and are fatal
/// for the traversal that raised them.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A required hidden state field was absent from the response
    #[error("malformed response: {reason}")]
    MalformedResponse { reason: String },

    /// An action was built without any extracted token
    #[error("no state token supplied for {action}")]
    MissingToken { action: &'static str },

    /// A token older than the newest one consumed was supplied
    #[error("stale state token: sequence {got} after {newest}")]
    StaleToken { got: u64, newest: u64 },
}

/// Errors raised by the HTTP transport.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Request-level failure (connect, TLS, body read)
    #[error("HTTP error: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Non-success status code
    #[error("HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    /// Per-request timeout elapsed
    #[error("timeout fetching {url}")]
    Timeout { url: String },

    /// The run was cancelled before the request could start
    #[error("operation cancelled")]
    Cancelled,
}

/// Errors that can occur across a harvest run.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Postback protocol violation
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport failure
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Checkpoint file could not be read or written
    #[error("checkpoint error: {0}")]
    Checkpoint(#[source] std::io::Error),

    /// Output store could not be read or written
    #[error("output store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// No search unit reached a terminal Done state in Phase 1
    #[error("discovery failed: none of {attempted} traversals succeeded")]
    NoTraversalSucceeded { attempted: usize },
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Result type alias for transport operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for harvest operations.
pub type Result<T> = std::result::Result<T, HarvestError>;
