//! The connection manager contract.

use async_trait::async_trait;

/// How the retry layer should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// The operation may succeed on a fresh connection: closed sockets,
    /// transient network and server conditions.
    Retryable,
    /// Retrying cannot help: timeouts, authentication failures, constraint
    /// violations, programmer errors.
    Fatal,
}

/// Creates, validates and classifies connections for a [`crate::Pool`].
///
/// The pool itself knows nothing about the protocol behind a connection;
/// everything protocol-specific funnels through this trait. Closing is
/// dropping: a connection type that needs teardown work does it in `Drop`.
#[async_trait]
pub trait Manager: Send + Sync + 'static {
    /// The pooled connection type.
    type Connection: Send + 'static;
    /// The error produced by connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a new connection.
    async fn create(&self) -> Result<Self::Connection, Self::Error>;

    /// Check that an idle connection still works, typically by running a
    /// cheap query. Called before hand-off when validation is enabled.
    async fn validate(&self, conn: &mut Self::Connection) -> Result<(), Self::Error>;

    /// Cheap liveness check without I/O (socket state, poisoned flag).
    fn is_open(&self, conn: &Self::Connection) -> bool;

    /// Classify an error for the retry layer.
    fn classify(&self, error: &Self::Error) -> ErrorDisposition {
        let _ = error;
        ErrorDisposition::Fatal
    }
}
