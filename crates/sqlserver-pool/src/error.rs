//! Pool error type.

use thiserror::Error;

/// Errors raised by pool operations.
///
/// `E` is the manager's error type; it surfaces unchanged so callers keep
/// their own taxonomy.
#[derive(Debug, Error)]
pub enum PoolError<E> {
    /// The pool is shutting down; no new leases are granted.
    #[error("pool is shut down")]
    Closed,

    /// No connection became available within the acquire timeout.
    #[error("no connection available within {0:?}")]
    AcquireTimeout(std::time::Duration),

    /// The configuration is inconsistent.
    #[error("pool configuration error: {0}")]
    Configuration(String),

    /// Establishing a new connection failed.
    #[error("failed to open connection: {0}")]
    Create(#[source] E),

    /// The retried operation failed.
    #[error(transparent)]
    Operation(E),
}
