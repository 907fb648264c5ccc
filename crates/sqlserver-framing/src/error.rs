//! Framing error type.

use thiserror::Error;

/// Errors raised by the packet transport.
#[derive(Debug, Error)]
pub enum FramingError {
    /// Transport I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The byte stream violated the packet grammar.
    #[error(transparent)]
    Wire(#[from] tds_wire::WireError),

    /// An outbound packet exceeded the negotiated size.
    #[error("packet of {size} bytes exceeds the negotiated {max}")]
    PacketTooLarge {
        /// Attempted packet size.
        size: usize,
        /// Negotiated maximum.
        max: usize,
    },

    /// Packet ids within one message were neither ascending nor constant.
    #[error("packet id {actual} does not follow {previous}")]
    PacketIdMismatch {
        /// Previous packet's id.
        previous: u8,
        /// Offending packet's id.
        actual: u8,
    },

    /// A message mixed packets of different types.
    #[error("message started as {started:?} but continued as {continued:?}")]
    TypeMismatch {
        /// Type of the first packet.
        started: tds_wire::PacketType,
        /// Type of the offending packet.
        continued: tds_wire::PacketType,
    },

    /// The peer closed the stream mid-message.
    #[error("connection closed mid-message")]
    ConnectionClosed,
}
