//! Wire protocol error type.

use thiserror::Error;

/// Errors raised while encoding or decoding TDS wire data.
///
/// Every variant is fatal to the enclosing request: once the byte stream is
/// out of step there is no way to resynchronise short of tearing the
/// connection down.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The buffer ended before a declared length was satisfied.
    #[error("truncated stream: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes the decoder still needed.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },

    /// A packet header carried an unknown type byte.
    #[error("invalid packet type 0x{0:02X}")]
    InvalidPacketType(u8),

    /// A packet header carried undefined status bits.
    #[error("invalid packet status 0x{0:02X}")]
    InvalidPacketStatus(u8),

    /// A packet declared a total length shorter than its own header.
    #[error("packet length {0} is shorter than the 8-byte header")]
    PacketTooShort(u16),

    /// A token tag the parser does not understand.
    #[error("unknown token tag 0x{0:02X}")]
    UnknownToken(u8),

    /// A column or parameter used a DATATYPE byte outside the known set.
    #[error("unknown data type 0x{0:02X}")]
    UnknownDataType(u8),

    /// A prelogin option outside the known set.
    #[error("invalid prelogin option 0x{0:02X}")]
    InvalidPreloginOption(u8),

    /// A ROW or NBCROW token arrived before any COLMETADATA.
    #[error("row data arrived before column metadata")]
    RowWithoutMetadata,

    /// Structurally invalid data inside an otherwise well-framed region.
    #[error("malformed {what}: {detail}")]
    Malformed {
        /// The structure being decoded.
        what: &'static str,
        /// What was wrong with it.
        detail: String,
    },
}

impl WireError {
    pub(crate) fn malformed(what: &'static str, detail: impl Into<String>) -> Self {
        Self::Malformed {
            what,
            detail: detail.into(),
        }
    }
}
