//! Primitive readers and writers for the TDS body encodings.
//!
//! Integers in message bodies are little-endian (the packet length in the
//! header is the one big-endian exception). Strings are UCS-2 LE with the
//! length counted in characters for `B_VARCHAR`/`US_VARCHAR`.

use bytes::{Buf, BufMut, Bytes};

use crate::error::WireError;

/// Fail with [`WireError::Truncated`] unless `needed` bytes remain.
pub(crate) fn ensure(src: &impl Buf, needed: usize) -> Result<(), WireError> {
    if src.remaining() < needed {
        Err(WireError::Truncated {
            needed,
            available: src.remaining(),
        })
    } else {
        Ok(())
    }
}

/// Decode UTF-16LE bytes to a `String`.
///
/// Unpaired surrogates become U+FFFD; a trailing odd byte is dropped. This
/// never fails: a garbled string cell must not poison the whole row.
#[must_use]
pub fn utf16_le_to_string(data: &[u8]) -> String {
    let units = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Read `char_count` UTF-16 code units.
pub fn read_utf16(src: &mut impl Buf, char_count: usize) -> Result<String, WireError> {
    ensure(src, char_count * 2)?;
    let mut raw = vec![0u8; char_count * 2];
    src.copy_to_slice(&mut raw);
    Ok(utf16_le_to_string(&raw))
}

/// Read a `B_VARCHAR`: 1-byte character count, then UTF-16LE data.
pub fn read_b_varchar(src: &mut impl Buf) -> Result<String, WireError> {
    ensure(src, 1)?;
    let chars = src.get_u8() as usize;
    read_utf16(src, chars)
}

/// Read a `US_VARCHAR`: 2-byte character count, then UTF-16LE data.
pub fn read_us_varchar(src: &mut impl Buf) -> Result<String, WireError> {
    ensure(src, 2)?;
    let chars = src.get_u16_le() as usize;
    read_utf16(src, chars)
}

/// Read a `B_VARBYTE`: 1-byte byte count, then raw bytes.
pub fn read_b_varbyte(src: &mut impl Buf) -> Result<Bytes, WireError> {
    ensure(src, 1)?;
    let len = src.get_u8() as usize;
    ensure(src, len)?;
    Ok(src.copy_to_bytes(len))
}

/// Read a `US_VARBYTE`: 2-byte byte count, then raw bytes.
pub fn read_us_varbyte(src: &mut impl Buf) -> Result<Bytes, WireError> {
    ensure(src, 2)?;
    let len = src.get_u16_le() as usize;
    ensure(src, len)?;
    Ok(src.copy_to_bytes(len))
}

/// Read an unsigned little-endian integer of `width` bytes (1..=8).
///
/// The 3-, 4- and 5-byte widths carry DATE days and TIME ticks.
pub fn read_uint_le(src: &mut impl Buf, width: usize) -> Result<u64, WireError> {
    debug_assert!((1..=8).contains(&width));
    ensure(src, width)?;
    let mut value = 0u64;
    for shift in 0..width {
        value |= u64::from(src.get_u8()) << (shift * 8);
    }
    Ok(value)
}

/// Write an unsigned little-endian integer using `width` bytes.
pub fn write_uint_le(dst: &mut impl BufMut, value: u64, width: usize) {
    debug_assert!((1..=8).contains(&width));
    for shift in 0..width {
        dst.put_u8((value >> (shift * 8)) as u8);
    }
}

/// Write a string as UTF-16LE without a length prefix.
pub fn write_utf16(dst: &mut impl BufMut, s: &str) {
    for unit in s.encode_utf16() {
        dst.put_u16_le(unit);
    }
}

/// Number of bytes `s` occupies as UTF-16LE.
#[must_use]
pub fn utf16_byte_len(s: &str) -> usize {
    s.encode_utf16().count() * 2
}

/// Write a `B_VARCHAR`, truncating at 255 characters.
pub fn write_b_varchar(dst: &mut impl BufMut, s: &str) {
    let units: Vec<u16> = s.encode_utf16().collect();
    let len = units.len().min(255);
    dst.put_u8(len as u8);
    for &unit in &units[..len] {
        dst.put_u16_le(unit);
    }
}

/// Write a `US_VARCHAR`, truncating at 65535 characters.
pub fn write_us_varchar(dst: &mut impl BufMut, s: &str) {
    let units: Vec<u16> = s.encode_utf16().collect();
    let len = units.len().min(65535);
    dst.put_u16_le(len as u16);
    for &unit in &units[..len] {
        dst.put_u16_le(unit);
    }
}

/// Read a GUID in SQL Server's mixed-endian layout.
///
/// The first three RFC 4122 fields are little-endian on the wire, the final
/// eight bytes are in order.
pub fn read_guid(src: &mut impl Buf) -> Result<uuid::Uuid, WireError> {
    ensure(src, 16)?;
    let mut raw = [0u8; 16];
    src.copy_to_slice(&mut raw);
    let mut be = [0u8; 16];
    be[0] = raw[3];
    be[1] = raw[2];
    be[2] = raw[1];
    be[3] = raw[0];
    be[4] = raw[5];
    be[5] = raw[4];
    be[6] = raw[7];
    be[7] = raw[6];
    be[8..].copy_from_slice(&raw[8..]);
    Ok(uuid::Uuid::from_bytes(be))
}

/// Write a GUID in SQL Server's mixed-endian layout.
pub fn write_guid(dst: &mut impl BufMut, guid: &uuid::Uuid) {
    let be = guid.as_bytes();
    dst.put_slice(&[be[3], be[2], be[1], be[0]]);
    dst.put_slice(&[be[5], be[4]]);
    dst.put_slice(&[be[7], be[6]]);
    dst.put_slice(&be[8..]);
}
