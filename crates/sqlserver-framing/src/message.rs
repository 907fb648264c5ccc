//! Message reassembly.
//!
//! A logical message is a contiguous run of packets of one type, terminated
//! by the end-of-message bit. The reassembler enforces the packet-id and
//! type invariants and honours the Ignore status bit.

use bytes::{Bytes, BytesMut};
use tds_wire::packet::{PacketStatus, PacketType};

use crate::codec::Packet;
use crate::error::FramingError;

/// One complete logical message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Type shared by all of the message's packets.
    pub ty: PacketType,
    /// Concatenated packet payloads.
    pub payload: Bytes,
}

impl Message {
    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Accumulates packets into messages.
#[derive(Debug, Default)]
pub struct Reassembly {
    buffer: BytesMut,
    ty: Option<PacketType>,
    last_id: Option<u8>,
}

impl Reassembly {
    /// New, empty reassembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a partial message is buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.ty.is_some()
    }

    /// Drop any partial message.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.ty = None;
        self.last_id = None;
    }

    /// Feed one packet; returns the completed message on end-of-message.
    pub fn push(&mut self, packet: Packet) -> Result<Option<Message>, FramingError> {
        if let Some(started) = self.ty {
            if started != packet.header.ty {
                return Err(FramingError::TypeMismatch {
                    started,
                    continued: packet.header.ty,
                });
            }
        } else {
            self.ty = Some(packet.header.ty);
        }

        // Ids must ascend modulo 256; some servers keep a constant id on
        // every packet of a message, which is also accepted.
        if let Some(previous) = self.last_id {
            let next = previous.wrapping_add(1);
            if packet.header.packet_id != next && packet.header.packet_id != previous {
                return Err(FramingError::PacketIdMismatch {
                    previous,
                    actual: packet.header.packet_id,
                });
            }
        }
        self.last_id = Some(packet.header.packet_id);

        let ignored = packet.header.status.contains(PacketStatus::IGNORE);
        if !ignored {
            self.buffer.extend_from_slice(&packet.payload);
        }

        if packet.header.is_end_of_message() {
            if ignored {
                // Ignore on the final packet cancels the whole message.
                tracing::debug!(ty = ?self.ty, "discarding ignored message");
                self.clear();
                return Ok(None);
            }
            let message = Message {
                ty: self.ty.take().unwrap_or(packet.header.ty),
                payload: self.buffer.split().freeze(),
            };
            self.last_id = None;
            tracing::trace!(ty = ?message.ty, len = message.len(), "message complete");
            return Ok(Some(message));
        }

        Ok(None)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_wire::packet::PacketHeader;

    fn packet(ty: PacketType, status: PacketStatus, id: u8, payload: &'static [u8]) -> Packet {
        let mut header = PacketHeader::new(ty, status, 0);
        header.packet_id = id;
        Packet::new(header, Bytes::from_static(payload))
    }

    #[test]
    fn single_packet_message() {
        let mut reassembly = Reassembly::new();
        let message = reassembly
            .push(packet(
                PacketType::TabularResult,
                PacketStatus::END_OF_MESSAGE,
                1,
                b"hello",
            ))
            .unwrap()
            .unwrap();
        assert_eq!(message.ty, PacketType::TabularResult);
        assert_eq!(&message.payload[..], b"hello");
        assert!(!reassembly.has_partial());
    }

    #[test]
    fn multi_packet_concatenation() {
        let mut reassembly = Reassembly::new();
        assert!(reassembly
            .push(packet(PacketType::TabularResult, PacketStatus::empty(), 1, b"ab"))
            .unwrap()
            .is_none());
        assert!(reassembly.has_partial());
        assert!(reassembly
            .push(packet(PacketType::TabularResult, PacketStatus::empty(), 2, b"cd"))
            .unwrap()
            .is_none());
        let message = reassembly
            .push(packet(
                PacketType::TabularResult,
                PacketStatus::END_OF_MESSAGE,
                3,
                b"e",
            ))
            .unwrap()
            .unwrap();
        assert_eq!(&message.payload[..], b"abcde");
    }

    #[test]
    fn constant_packet_ids_accepted() {
        let mut reassembly = Reassembly::new();
        reassembly
            .push(packet(PacketType::TabularResult, PacketStatus::empty(), 1, b"a"))
            .unwrap();
        assert!(reassembly
            .push(packet(
                PacketType::TabularResult,
                PacketStatus::END_OF_MESSAGE,
                1,
                b"b",
            ))
            .unwrap()
            .is_some());
    }

    #[test]
    fn skipping_packet_id_is_fatal() {
        let mut reassembly = Reassembly::new();
        reassembly
            .push(packet(PacketType::TabularResult, PacketStatus::empty(), 1, b"a"))
            .unwrap();
        let err = reassembly
            .push(packet(PacketType::TabularResult, PacketStatus::empty(), 3, b"b"))
            .unwrap_err();
        assert!(matches!(
            err,
            FramingError::PacketIdMismatch { previous: 1, actual: 3 }
        ));
    }

    #[test]
    fn mixed_types_are_fatal() {
        let mut reassembly = Reassembly::new();
        reassembly
            .push(packet(PacketType::TabularResult, PacketStatus::empty(), 1, b"a"))
            .unwrap();
        assert!(reassembly
            .push(packet(PacketType::SqlBatch, PacketStatus::empty(), 2, b"b"))
            .is_err());
    }

    #[test]
    fn ignored_final_packet_discards_message() {
        let mut reassembly = Reassembly::new();
        reassembly
            .push(packet(PacketType::TabularResult, PacketStatus::empty(), 1, b"partial"))
            .unwrap();
        let result = reassembly
            .push(packet(
                PacketType::TabularResult,
                PacketStatus::END_OF_MESSAGE | PacketStatus::IGNORE,
                2,
                b"",
            ))
            .unwrap();
        assert!(result.is_none());
        assert!(!reassembly.has_partial());
    }

    #[test]
    fn id_wraps_modulo_256() {
        let mut reassembly = Reassembly::new();
        reassembly
            .push(packet(PacketType::TabularResult, PacketStatus::empty(), 255, b"a"))
            .unwrap();
        assert!(reassembly
            .push(packet(
                PacketType::TabularResult,
                PacketStatus::END_OF_MESSAGE,
                0,
                b"b",
            ))
            .unwrap()
            .is_some());
    }
}
