//! TDS packet header.
//!
//! Every transmission unit on a TDS connection starts with the same 8-byte
//! header; the payload that follows is `length - 8` bytes. A logical message
//! is a run of packets of one type terminated by the end-of-message status
//! bit.

use bitflags::bitflags;
use bytes::{Buf, BufMut};

use crate::error::WireError;

/// Size of the packet header in bytes.
pub const HEADER_LEN: usize = 8;

/// Default negotiated packet size.
pub const DEFAULT_PACKET_SIZE: usize = 4096;

/// Smallest packet size a client may request.
pub const MIN_PACKET_SIZE: usize = 512;

/// Largest packet size a client may request.
pub const MAX_PACKET_SIZE: usize = 32767;

/// Message type carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Ad-hoc SQL batch request.
    SqlBatch = 0x01,
    /// Remote procedure call request.
    Rpc = 0x03,
    /// Tabular response from the server.
    TabularResult = 0x04,
    /// Attention (request cancellation) signal.
    Attention = 0x06,
    /// Bulk load data.
    BulkLoad = 0x07,
    /// Transaction manager request.
    TransactionManager = 0x0E,
    /// TDS 7.x login record.
    Login7 = 0x10,
    /// Pre-login negotiation.
    Prelogin = 0x12,
}

impl PacketType {
    /// Decode the header type byte.
    pub fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0x01 => Ok(Self::SqlBatch),
            0x03 => Ok(Self::Rpc),
            0x04 => Ok(Self::TabularResult),
            0x06 => Ok(Self::Attention),
            0x07 => Ok(Self::BulkLoad),
            0x0E => Ok(Self::TransactionManager),
            0x10 => Ok(Self::Login7),
            0x12 => Ok(Self::Prelogin),
            other => Err(WireError::InvalidPacketType(other)),
        }
    }
}

bitflags! {
    /// Status bits in the second header byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketStatus: u8 {
        /// Last packet of the message.
        const END_OF_MESSAGE = 0x01;
        /// The whole message must be discarded.
        const IGNORE = 0x02;
        /// Reset connection state before processing (first packet only).
        const RESET_CONNECTION = 0x08;
        /// Reset connection state but keep the open transaction.
        const RESET_KEEP_TRANSACTION = 0x10;
    }
}

/// The 8-byte header preceding every packet payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Message type.
    pub ty: PacketType,
    /// Status bits.
    pub status: PacketStatus,
    /// Total packet length including this header (big-endian on the wire).
    pub length: u16,
    /// Server process id, 0 from the client.
    pub spid: u16,
    /// Sequence number, ascending modulo 256 within a message.
    pub packet_id: u8,
    /// Unused, always 0.
    pub window: u8,
}

impl PacketHeader {
    /// Build a header with zeroed spid/window.
    #[must_use]
    pub const fn new(ty: PacketType, status: PacketStatus, length: u16) -> Self {
        Self {
            ty,
            status,
            length,
            spid: 0,
            packet_id: 0,
            window: 0,
        }
    }

    /// Decode a header from the front of `src`.
    pub fn decode(src: &mut impl Buf) -> Result<Self, WireError> {
        if src.remaining() < HEADER_LEN {
            return Err(WireError::Truncated {
                needed: HEADER_LEN,
                available: src.remaining(),
            });
        }

        let ty = PacketType::from_u8(src.get_u8())?;
        let status_raw = src.get_u8();
        let status = PacketStatus::from_bits(status_raw)
            .ok_or(WireError::InvalidPacketStatus(status_raw))?;
        let length = src.get_u16();
        if (length as usize) < HEADER_LEN {
            return Err(WireError::PacketTooShort(length));
        }
        let spid = src.get_u16();
        let packet_id = src.get_u8();
        let window = src.get_u8();

        Ok(Self {
            ty,
            status,
            length,
            spid,
            packet_id,
            window,
        })
    }

    /// Encode the header into `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.ty as u8);
        dst.put_u8(self.status.bits());
        dst.put_u16(self.length);
        dst.put_u16(self.spid);
        dst.put_u8(self.packet_id);
        dst.put_u8(self.window);
    }

    /// Payload length (total minus header).
    #[must_use]
    pub const fn payload_len(&self) -> usize {
        self.length as usize - HEADER_LEN
    }

    /// Whether this packet finishes its message.
    #[must_use]
    pub const fn is_end_of_message(&self) -> bool {
        self.status.contains(PacketStatus::END_OF_MESSAGE)
    }
}
