//! Client error taxonomy.

use thiserror::Error;

use tds_wire::ServerMessage;

/// Details of a server-reported error (severity ≥ 11).
#[derive(Debug, Clone)]
pub struct ServerError {
    /// Error number.
    pub number: i32,
    /// Severity class; ≥ 20 terminates the connection.
    pub severity: u8,
    /// State.
    pub state: u8,
    /// Message text.
    pub message: String,
    /// Reporting server, when named.
    pub server: Option<String>,
    /// Originating procedure, when any.
    pub procedure: Option<String>,
    /// Line within the batch or procedure.
    pub line: i32,
    /// Informational messages and warnings that preceded the error.
    pub diagnostics: Vec<ServerMessage>,
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "error {} (severity {}, state {}): {}",
            self.number, self.severity, self.state, self.message
        )?;
        if let Some(procedure) = &self.procedure {
            write!(f, " in {procedure}")?;
        }
        write!(f, " at line {}", self.line)
    }
}

impl std::error::Error for ServerError {}

impl From<ServerMessage> for ServerError {
    fn from(message: ServerMessage) -> Self {
        Self {
            number: message.number,
            severity: message.severity,
            state: message.state,
            message: message.message,
            server: (!message.server.is_empty()).then_some(message.server),
            procedure: (!message.procedure.is_empty()).then_some(message.procedure),
            line: message.line,
            diagnostics: Vec::new(),
        }
    }
}

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum Error {
    /// The socket ended unexpectedly. Retryable.
    #[error("connection closed")]
    ConnectionClosed,

    /// A classified transient network or server condition. Retryable.
    #[error("transient error {number}: {message}")]
    Transient {
        /// Server error number (0 for network-level conditions).
        number: i32,
        /// Description.
        message: String,
    },

    /// An operation deadline elapsed. Not retryable; the connection stays
    /// usable.
    #[error("operation timed out")]
    Timeout,

    /// The peer violated the protocol. Fatal to the connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server reported an error with severity ≥ 11.
    #[error(transparent)]
    Server(Box<ServerError>),

    /// The login was rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// TLS negotiation or handshake failed.
    #[error("tls error: {0}")]
    Tls(String),

    /// The request was cancelled at the caller's demand.
    #[error("request cancelled")]
    Cancelled,

    /// The pool could not produce a connection in time.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// The client is shutting down.
    #[error("shutdown in progress")]
    ShutdownInProgress,

    /// A value could not be converted to the requested type.
    #[error("cannot convert column {column:?} from {from} to {to}")]
    Conversion {
        /// Column name or ordinal.
        column: String,
        /// Source SQL type.
        from: &'static str,
        /// Requested Rust type.
        to: &'static str,
    },

    /// The configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Server error numbers that are worth retrying on a fresh connection:
/// deadlock victim, lock timeout, and the cloud throttling/failover family.
const TRANSIENT_SERVER_ERRORS: &[i32] = &[
    1205, 1222, 4060, 10928, 10929, 40197, 40501, 40613, 49918, 49919, 49920,
];

impl Error {
    /// Whether a server error number is in the transient set.
    #[must_use]
    pub fn is_transient_server_error(number: i32) -> bool {
        TRANSIENT_SERVER_ERRORS.contains(&number)
    }

    /// Whether the pool's retry layer may re-run the operation.
    ///
    /// Timeouts, authentication failures and ordinary server errors are
    /// never retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionClosed | Self::Transient { .. } | Self::Io(_) => true,
            Self::Server(server) => Self::is_transient_server_error(server.number),
            _ => false,
        }
    }

    /// Severity of the underlying server error, if any.
    #[must_use]
    pub fn severity(&self) -> Option<u8> {
        match self {
            Self::Server(server) => Some(server.severity),
            _ => None,
        }
    }

    pub(crate) fn from_framing(error: sqlserver_framing::FramingError) -> Self {
        match error {
            sqlserver_framing::FramingError::Io(e) => Self::Io(e),
            sqlserver_framing::FramingError::ConnectionClosed => Self::ConnectionClosed,
            other => Self::Protocol(other.to_string()),
        }
    }

    pub(crate) fn from_server_message(
        message: ServerMessage,
        diagnostics: Vec<ServerMessage>,
    ) -> Self {
        let mut server = ServerError::from(message);
        server.diagnostics = diagnostics;
        Self::Server(Box::new(server))
    }
}

impl From<tds_wire::WireError> for Error {
    fn from(error: tds_wire::WireError) -> Self {
        Self::Protocol(error.to_string())
    }
}

impl From<sqlserver_tls::TlsError> for Error {
    fn from(error: sqlserver_tls::TlsError) -> Self {
        Self::Tls(error.to_string())
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(number: i32) -> Error {
        Error::Server(Box::new(ServerError {
            number,
            severity: 16,
            state: 1,
            message: "test".into(),
            server: None,
            procedure: None,
            line: 1,
            diagnostics: Vec::new(),
        }))
    }

    #[test]
    fn transient_classification() {
        assert!(Error::ConnectionClosed.is_retryable());
        assert!(server_error(1205).is_retryable()); // deadlock victim
        assert!(server_error(40613).is_retryable()); // database unavailable
        assert!(
            Error::Transient {
                number: 0,
                message: "reset".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn non_retryable_kinds() {
        assert!(!Error::Timeout.is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::Authentication("nope".into()).is_retryable());
        assert!(!server_error(2627).is_retryable()); // unique violation
        assert!(!server_error(102).is_retryable()); // syntax error
    }

    #[test]
    fn server_error_display() {
        let err = server_error(208);
        assert!(err.to_string().contains("error 208"));
        assert_eq!(err.severity(), Some(16));
    }
}
