//! Error types for provider invocations and relay requests.

use std::time::Duration;

use thiserror::Error;

/// Why a single provider invocation produced no usable reply.
///
/// These never abort a fan-out. They are rendered inline into the
/// provider's reply text by [`crate::invoker::render_reply`].
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The subprocess ran past the configured timeout and was killed.
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    /// The subprocess could not be started.
    #[error("{0}")]
    Launch(#[from] std::io::Error),
    /// Nothing on stdout; carries the trimmed, truncated stderr.
    #[error("{0}")]
    Stderr(String),
    /// Nothing on stdout or stderr.
    #[error("(no output)")]
    NoOutput,
    /// The task running the invocation panicked or was cancelled.
    #[error("{0}")]
    Join(String),
    /// The worker pool was closed before a slot became free.
    #[error("relay is shutting down")]
    PoolClosed,
}

/// Request-level failures. Only the `invalid_request` class aborts a
/// request before any provider is invoked.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("empty query")]
    EmptyQuery,
    #[error("invalid provider '{0}'")]
    InvalidProvider(String),
    #[error("session_id required")]
    MissingSession,
    #[error("storage unavailable: {0}")]
    Storage(String),
}

impl RelayError {
    pub fn is_invalid_request(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }

    /// Stable machine-readable kind for API responses.
    pub fn kind(&self) -> &'static str {
        if self.is_invalid_request() {
            "invalid_request"
        } else {
            "storage"
        }
    }
}
