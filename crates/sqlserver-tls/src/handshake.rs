//! Prelogin framing for the TDS 7.x TLS handshake.
//!
//! Until the handshake completes, every TLS record the client sends must be
//! wrapped in a TDS Prelogin packet, and the server's records arrive wrapped
//! the same way. [`HandshakeFrames`] does that wrapping transparently; once
//! [`HandshakeFrames::handshake_complete`] is called it becomes a plain
//! pass-through and TLS records travel bare.

use std::cmp;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

const HEADER_LEN: usize = 8;
const PACKET_TYPE_PRELOGIN: u8 = 0x12;
const STATUS_END_OF_MESSAGE: u8 = 0x01;

/// Stream adapter framing TLS handshake records in Prelogin packets.
pub struct HandshakeFrames<S> {
    stream: S,
    wrapping: bool,

    // Inbound: header being collected, then payload byte budget.
    header: [u8; HEADER_LEN],
    header_filled: usize,
    payload_remaining: usize,

    // Outbound: one packet being accumulated; the header slot is written
    // on flush once the record length is known.
    out: Vec<u8>,
    out_pos: usize,
    out_framed: bool,
}

impl<S> HandshakeFrames<S> {
    /// Wrap a transport; framing is active until the handshake completes.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            wrapping: true,
            header: [0u8; HEADER_LEN],
            header_filled: 0,
            payload_remaining: 0,
            out: vec![0u8; HEADER_LEN],
            out_pos: HEADER_LEN,
            out_framed: false,
        }
    }

    /// Stop framing; the stream becomes a transparent pass-through.
    pub fn handshake_complete(&mut self) {
        self.wrapping = false;
    }

    /// The wrapped transport.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Unwrap the transport.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for HandshakeFrames<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.wrapping {
            return Pin::new(&mut this.stream).poll_read(cx, buf);
        }

        // Collect a packet header first.
        while this.payload_remaining == 0 {
            while this.header_filled < HEADER_LEN {
                let mut header_buf = ReadBuf::new(&mut this.header[this.header_filled..]);
                match Pin::new(&mut this.stream).poll_read(cx, &mut header_buf)? {
                    Poll::Ready(()) => {
                        let n = header_buf.filled().len();
                        if n == 0 {
                            return Poll::Ready(Ok(())); // EOF
                        }
                        this.header_filled += n;
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }

            if this.header[0] != PACKET_TYPE_PRELOGIN {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "expected prelogin packet during handshake, got type 0x{:02X}",
                        this.header[0]
                    ),
                )));
            }

            let length = u16::from_be_bytes([this.header[2], this.header[3]]) as usize;
            this.payload_remaining = length.saturating_sub(HEADER_LEN);
            this.header_filled = 0;
            // A zero-payload packet just loops for the next header.
        }

        // Hand out payload bytes, which are raw TLS records.
        let want = cmp::min(this.payload_remaining, buf.remaining());
        let mut scratch = vec![0u8; want];
        let mut scratch_buf = ReadBuf::new(&mut scratch);
        match Pin::new(&mut this.stream).poll_read(cx, &mut scratch_buf)? {
            Poll::Ready(()) => {
                let n = scratch_buf.filled().len();
                buf.put_slice(&scratch[..n]);
                this.payload_remaining -= n;
                Poll::Ready(Ok(()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for HandshakeFrames<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if !this.wrapping {
            return Pin::new(&mut this.stream).poll_write(cx, buf);
        }

        // Buffer handshake bytes; the packet is framed and sent on flush.
        this.out.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.wrapping && this.out.len() > HEADER_LEN {
            if !this.out_framed {
                let total = this.out.len();
                this.out[0] = PACKET_TYPE_PRELOGIN;
                this.out[1] = STATUS_END_OF_MESSAGE;
                this.out[2] = (total >> 8) as u8;
                this.out[3] = total as u8;
                this.out[4] = 0; // spid
                this.out[5] = 0;
                this.out[6] = 1; // packet id
                this.out[7] = 0; // window
                this.out_framed = true;
                this.out_pos = 0;
            }

            while this.out_pos < this.out.len() {
                match Pin::new(&mut this.stream).poll_write(cx, &this.out[this.out_pos..])? {
                    Poll::Ready(n) => this.out_pos += n,
                    Poll::Pending => return Poll::Pending,
                }
            }

            this.out.truncate(HEADER_LEN);
            this.out_pos = HEADER_LEN;
            this.out_framed = false;
        }

        Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

impl<S> std::fmt::Debug for HandshakeFrames<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeFrames")
            .field("wrapping", &self.wrapping)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn writes_are_framed_until_complete() {
        let (near, mut far) = tokio::io::duplex(4096);
        let mut frames = HandshakeFrames::new(near);

        frames.write_all(b"tls-hello").await.unwrap();
        frames.flush().await.unwrap();

        let mut raw = vec![0u8; HEADER_LEN + 9];
        far.read_exact(&mut raw).await.unwrap();
        assert_eq!(raw[0], PACKET_TYPE_PRELOGIN);
        assert_eq!(raw[1], STATUS_END_OF_MESSAGE);
        assert_eq!(u16::from_be_bytes([raw[2], raw[3]]) as usize, raw.len());
        assert_eq!(&raw[HEADER_LEN..], b"tls-hello");
    }

    #[tokio::test]
    async fn reads_unwrap_prelogin_packets() {
        let (near, mut far) = tokio::io::duplex(4096);
        let mut frames = HandshakeFrames::new(near);

        let payload = b"server-hello";
        let total = (HEADER_LEN + payload.len()) as u16;
        let mut packet = vec![PACKET_TYPE_PRELOGIN, STATUS_END_OF_MESSAGE];
        packet.extend_from_slice(&total.to_be_bytes());
        packet.extend_from_slice(&[0, 0, 1, 0]);
        packet.extend_from_slice(payload);
        far.write_all(&packet).await.unwrap();

        let mut got = vec![0u8; payload.len()];
        frames.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, payload);
    }

    #[tokio::test]
    async fn pass_through_after_completion() {
        let (near, mut far) = tokio::io::duplex(4096);
        let mut frames = HandshakeFrames::new(near);
        frames.handshake_complete();

        frames.write_all(b"raw").await.unwrap();
        frames.flush().await.unwrap();

        let mut got = [0u8; 3];
        far.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"raw");
    }

    #[tokio::test]
    async fn non_prelogin_packet_is_invalid_data() {
        let (near, mut far) = tokio::io::duplex(4096);
        let mut frames = HandshakeFrames::new(near);

        let mut packet = vec![0x04, STATUS_END_OF_MESSAGE]; // tabular, not prelogin
        packet.extend_from_slice(&12u16.to_be_bytes());
        packet.extend_from_slice(&[0, 0, 1, 0]);
        packet.extend_from_slice(b"nope");
        far.write_all(&packet).await.unwrap();

        let mut got = [0u8; 4];
        let err = frames.read_exact(&mut got).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
