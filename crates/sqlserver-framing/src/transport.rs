//! Framed message transport over any async byte stream.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tds_wire::packet::{
    PacketHeader, PacketStatus, PacketType, DEFAULT_PACKET_SIZE, HEADER_LEN, MAX_PACKET_SIZE,
    MIN_PACKET_SIZE,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::codec::{Packet, PacketCodec};
use crate::error::FramingError;
use crate::message::{Message, Reassembly};

/// Sends and receives logical messages over a byte stream.
///
/// Outbound messages are split at the negotiated packet size with ascending
/// packet ids and the end-of-message bit on the last packet; inbound packets
/// are reassembled until end-of-message.
pub struct MessageStream<T> {
    framed: Framed<T, PacketCodec>,
    reassembly: Reassembly,
    packet_size: usize,
}

impl<T> MessageStream<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a transport with the default packet size.
    pub fn new(transport: T) -> Self {
        Self {
            framed: Framed::new(transport, PacketCodec),
            reassembly: Reassembly::new(),
            packet_size: DEFAULT_PACKET_SIZE,
        }
    }

    /// The packet size outbound messages are split at.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Apply a newly negotiated packet size (clamped to the legal range).
    pub fn set_packet_size(&mut self, size: usize) {
        self.packet_size = size.clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE);
    }

    /// Consume the stream, returning the transport.
    pub fn into_inner(self) -> T {
        self.framed.into_inner()
    }

    /// Send one logical message.
    pub async fn send(&mut self, ty: PacketType, body: Bytes) -> Result<(), FramingError> {
        self.send_with_reset(ty, body, false).await
    }

    /// Send one logical message, optionally asking the server to reset
    /// session state first (flag valid on the first packet only).
    pub async fn send_with_reset(
        &mut self,
        ty: PacketType,
        body: Bytes,
        reset_connection: bool,
    ) -> Result<(), FramingError> {
        let max_payload = self.packet_size - HEADER_LEN;
        let chunk_count = body.len().div_ceil(max_payload).max(1);

        let mut offset = 0usize;
        let mut packet_id: u8 = 1;
        let mut first = true;
        loop {
            let end = (offset + max_payload).min(body.len());
            let chunk = body.slice(offset..end);
            let is_last = end == body.len();

            let mut status = if is_last {
                PacketStatus::END_OF_MESSAGE
            } else {
                PacketStatus::empty()
            };
            if first && reset_connection {
                status |= PacketStatus::RESET_CONNECTION;
            }

            let mut header = PacketHeader::new(ty, status, 0);
            header.packet_id = packet_id;
            self.framed.feed(Packet::new(header, chunk)).await?;

            if is_last {
                break;
            }
            offset = end;
            packet_id = packet_id.wrapping_add(1);
            first = false;
        }

        self.framed.flush().await?;
        tracing::trace!(?ty, bytes = body.len(), packets = chunk_count, "sent message");
        Ok(())
    }

    /// Send an Attention signal (empty message of type 0x06).
    pub async fn send_attention(&mut self) -> Result<(), FramingError> {
        tracing::debug!("sending attention");
        self.send(PacketType::Attention, Bytes::new()).await
    }

    /// Receive the next complete message; `None` on a clean end of stream.
    ///
    /// A stream that ends with a partial message buffered is an error: the
    /// peer died mid-message.
    pub async fn recv(&mut self) -> Result<Option<Message>, FramingError> {
        loop {
            match self.framed.next().await {
                Some(Ok(packet)) => {
                    if let Some(message) = self.reassembly.push(packet)? {
                        return Ok(Some(message));
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    if self.reassembly.has_partial() {
                        self.reassembly.clear();
                        return Err(FramingError::ConnectionClosed);
                    }
                    return Ok(None);
                }
            }
        }
    }
}

impl<T> std::fmt::Debug for MessageStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("packet_size", &self.packet_size)
            .field("partial", &self.reassembly.has_partial())
            .finish_non_exhaustive()
    }
}
