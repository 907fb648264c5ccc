//! tokio-util codec for single TDS packets.

use bytes::{Bytes, BytesMut};
use tds_wire::packet::{PacketHeader, HEADER_LEN};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FramingError;

/// One framed packet: header plus payload.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Decoded header; `length` always matches the payload.
    pub header: PacketHeader,
    /// Payload bytes (no header).
    pub payload: Bytes,
}

impl Packet {
    /// Build a packet, fixing up the header length.
    #[must_use]
    pub fn new(mut header: PacketHeader, payload: Bytes) -> Self {
        header.length = (HEADER_LEN + payload.len()) as u16;
        Self { header, payload }
    }
}

/// Codec turning a byte stream into [`Packet`]s and back.
///
/// The decoder accepts anything up to the u16 length ceiling so a peer that
/// negotiated a larger size than ours cannot wedge the stream; the send-side
/// size discipline lives in the message writer.
#[derive(Debug, Default)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, FramingError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        // Length is big-endian at offset 2; peek before committing.
        let length = u16::from_be_bytes([src[2], src[3]]) as usize;
        if length < HEADER_LEN {
            return Err(tds_wire::WireError::PacketTooShort(length as u16).into());
        }
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let raw = src.split_to(length).freeze();
        let mut cursor = raw.clone();
        let header = PacketHeader::decode(&mut cursor)?;
        let payload = raw.slice(HEADER_LEN..);

        tracing::trace!(
            ty = ?header.ty,
            length,
            packet_id = header.packet_id,
            eom = header.is_end_of_message(),
            "decoded packet"
        );

        Ok(Some(Packet { header, payload }))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = FramingError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), FramingError> {
        let total = HEADER_LEN + item.payload.len();
        dst.reserve(total);

        let mut header = item.header;
        header.length = total as u16;
        header.encode(dst);
        dst.extend_from_slice(&item.payload);

        tracing::trace!(
            ty = ?header.ty,
            length = total,
            packet_id = header.packet_id,
            eom = header.is_end_of_message(),
            "encoded packet"
        );

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use tds_wire::packet::{PacketStatus, PacketType};

    #[test]
    fn decode_complete_packet() {
        let mut codec = PacketCodec;
        let mut data = BytesMut::new();
        data.put_u8(PacketType::SqlBatch as u8);
        data.put_u8(PacketStatus::END_OF_MESSAGE.bits());
        data.put_u16(12);
        data.put_u16(0);
        data.put_u8(1);
        data.put_u8(0);
        data.put_slice(b"body");

        let packet = codec.decode(&mut data).unwrap().unwrap();
        assert_eq!(packet.header.ty, PacketType::SqlBatch);
        assert!(packet.header.is_end_of_message());
        assert_eq!(&packet.payload[..], b"body");
        assert!(data.is_empty());
    }

    #[test]
    fn decode_waits_for_full_packet() {
        let mut codec = PacketCodec;
        let mut data = BytesMut::new();
        data.put_u8(PacketType::TabularResult as u8);
        data.put_u8(0);
        data.put_u16(12);
        data.put_u16(0);
        data.put_u8(1);
        data.put_u8(0);
        // 4 payload bytes missing

        assert!(codec.decode(&mut data).unwrap().is_none());
        assert_eq!(data.len(), HEADER_LEN);
    }

    #[test]
    fn decode_rejects_short_length() {
        let mut codec = PacketCodec;
        let mut data = BytesMut::new();
        data.put_u8(PacketType::TabularResult as u8);
        data.put_u8(0);
        data.put_u16(4); // shorter than the header itself
        data.put_u16(0);
        data.put_u8(1);
        data.put_u8(0);

        assert!(codec.decode(&mut data).is_err());
    }

    #[test]
    fn encode_fixes_length() {
        let mut codec = PacketCodec;
        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 0);
        let packet = Packet::new(header, Bytes::from_static(b"test"));

        let mut dst = BytesMut::new();
        codec.encode(packet, &mut dst).unwrap();
        assert_eq!(dst.len(), 12);
        assert_eq!(u16::from_be_bytes([dst[2], dst[3]]), 12);
    }
}
