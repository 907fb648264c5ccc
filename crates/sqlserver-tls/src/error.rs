//! TLS error type.

use thiserror::Error;

/// Errors raised while establishing an encrypted tunnel.
#[derive(Debug, Error)]
pub enum TlsError {
    /// The server name is not a valid DNS name for SNI.
    #[error("invalid server name {0:?}")]
    InvalidServerName(String),

    /// A custom root certificate could not be loaded.
    #[error("invalid root certificate: {0}")]
    InvalidCertificate(String),

    /// The TLS handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Transport I/O failed during the handshake.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
