//! # sqlserver-framing
//!
//! Async packet framing for the TDS protocol: a tokio-util codec for the
//! 8-byte-header packet layer, reassembly of multi-packet messages, and a
//! [`MessageStream`] that sends and receives whole logical messages over any
//! `AsyncRead + AsyncWrite` transport.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod error;
pub mod message;
pub mod transport;

pub use codec::{Packet, PacketCodec};
pub use error::FramingError;
pub use message::{Message, Reassembly};
pub use transport::MessageStream;
