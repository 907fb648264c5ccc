//! SQL batch request body (packet type 0x01).

use bytes::{Bytes, BytesMut};

use crate::codec::{utf16_byte_len, write_utf16};
use crate::headers::{write_all_headers, ALL_HEADERS_LEN};

/// Encode a SQL batch body: ALL_HEADERS, then the text as UTF-16LE.
///
/// `transaction_descriptor` is 0 outside an explicit transaction.
#[must_use]
pub fn encode_batch(sql: &str, transaction_descriptor: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(ALL_HEADERS_LEN + utf16_byte_len(sql));
    write_all_headers(&mut buf, transaction_descriptor);
    write_utf16(&mut buf, sql);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_body() {
        let body = encode_batch("SELECT 1", 0);
        assert_eq!(body.len(), ALL_HEADERS_LEN + 16);
        // SQL text follows the headers, UTF-16LE.
        assert_eq!(body[ALL_HEADERS_LEN], b'S');
        assert_eq!(body[ALL_HEADERS_LEN + 1], 0);
    }

    #[test]
    fn empty_batch_still_has_headers() {
        assert_eq!(encode_batch("", 7).len(), ALL_HEADERS_LEN);
    }

    #[test]
    fn transaction_descriptor_is_embedded() {
        let body = encode_batch("", 0xAABB);
        assert_eq!(&body[10..12], &[0xBB, 0xAA]);
    }
}
