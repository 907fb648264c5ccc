//! The ALL_HEADERS prefix carried by SQLBatch, RPC and Transaction Manager
//! request bodies (TDS 7.2+).

use bytes::{BufMut, BytesMut};

/// Total ALL_HEADERS length with the single transaction-descriptor header.
pub const ALL_HEADERS_LEN: usize = 22;

/// Write the ALL_HEADERS section.
///
/// `transaction_descriptor` is 0 in auto-commit mode, otherwise the 8-byte
/// value from the most recent BeginTransaction ENVCHANGE. The outstanding
/// request count is always 1: requests are strictly serialised per
/// connection (no MARS).
pub fn write_all_headers(dst: &mut BytesMut, transaction_descriptor: u64) {
    dst.put_u32_le(ALL_HEADERS_LEN as u32);
    dst.put_u32_le(18); // this header's length
    dst.put_u16_le(0x0002); // transaction descriptor header
    dst.put_u64_le(transaction_descriptor);
    dst.put_u32_le(1); // outstanding requests
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let mut buf = BytesMut::new();
        write_all_headers(&mut buf, 0x0102_0304_0506_0708);

        assert_eq!(buf.len(), ALL_HEADERS_LEN);
        assert_eq!(&buf[0..4], &[22, 0, 0, 0]);
        assert_eq!(&buf[4..8], &[18, 0, 0, 0]);
        assert_eq!(&buf[8..10], &[0x02, 0x00]);
        assert_eq!(&buf[10..18], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&buf[18..22], &[1, 0, 0, 0]);
    }
}
