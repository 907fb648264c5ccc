//! # sqlserver-tls
//!
//! TLS support for SQL Server connections: a rustls connector with Mozilla
//! roots (or a development-only trust override), and the Prelogin framing
//! adapter the TDS 7.x handshake requires, where TLS records travel inside
//! Prelogin packets until the tunnel is up.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connector;
pub mod error;
pub mod handshake;

pub use connector::{TlsConnector, TlsOptions};
pub use error::TlsError;
pub use handshake::HandshakeFrames;

/// A TLS stream over a handshake-framed transport, as used by TDS 7.x
/// connections after encryption is negotiated.
pub type TlsStream<S> = tokio_rustls::client::TlsStream<HandshakeFrames<S>>;
