//! Column collation and the LCID → character encoding mapping.

use bytes::{Buf, BufMut};
use encoding_rs::Encoding;

use crate::codec::ensure;
use crate::error::WireError;

/// UTF-8 collations (SQL Server 2019+) set bit 27 of the LCID word.
const UTF8_FLAG: u32 = 0x0800_0000;

/// The 5-byte collation descriptor attached to CHAR-family columns.
///
/// Wire layout: a little-endian u32 packing the LCID (low 20 bits) with
/// collation flags, followed by a 1-byte sort id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collation {
    /// Packed LCID + flags word.
    pub info: u32,
    /// Sort id (non-zero for SQL collations).
    pub sort_id: u8,
}

/// Latin1_General_CI_AS, the conventional default for parameters.
pub const DEFAULT_COLLATION: Collation = Collation {
    info: 0x00D0_0409,
    sort_id: 0x34,
};

impl Collation {
    /// Wire size of a collation descriptor.
    pub const WIRE_LEN: usize = 5;

    /// Decode from the wire.
    pub fn decode(src: &mut impl Buf) -> Result<Self, WireError> {
        ensure(src, Self::WIRE_LEN)?;
        let info = src.get_u32_le();
        let sort_id = src.get_u8();
        Ok(Self { info, sort_id })
    }

    /// Encode to the wire.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.info);
        dst.put_u8(self.sort_id);
    }

    /// Locale id portion of the descriptor.
    #[must_use]
    pub const fn lcid(&self) -> u32 {
        self.info & 0x000F_FFFF
    }

    /// Whether this is a UTF-8 collation.
    #[must_use]
    pub const fn is_utf8(&self) -> bool {
        self.info & UTF8_FLAG != 0
    }

    /// The character encoding this collation implies for single-byte data.
    #[must_use]
    pub fn encoding(&self) -> &'static Encoding {
        if self.is_utf8() {
            return encoding_rs::UTF_8;
        }
        encoding_for_code_page(code_page_for_lcid(self.lcid()))
    }
}

/// Windows code page for a locale id.
///
/// Keyed on the primary language (low 10 bits); Chinese and the
/// Croatian/Serbian group need the sublanguage to pick a page.
fn code_page_for_lcid(lcid: u32) -> u16 {
    let primary = lcid & 0x3FF;
    let sublang = (lcid >> 10) & 0x3F;

    match primary {
        0x01 | 0x20 | 0x29 => 1256, // Arabic, Urdu, Farsi
        0x04 => match sublang {
            // Taiwan, Hong Kong, Macau use Traditional
            0x01 | 0x03 | 0x05 => 950,
            _ => 936,
        },
        0x05 | 0x0E | 0x15 | 0x18 | 0x1B | 0x1C | 0x24 => 1250, // Central European
        0x08 => 1253,                                           // Greek
        0x0D => 1255,                                           // Hebrew
        0x11 => 932,                                            // Japanese
        0x12 => 949,                                            // Korean
        0x19 | 0x22 | 0x23 | 0x2F => 1251,                      // Cyrillic
        0x1A => match sublang {
            // Serbian (Cyrillic)
            0x03 => 1251,
            _ => 1250,
        },
        0x1E => 874,                 // Thai
        0x1F | 0x2C => 1254,         // Turkish, Azerbaijani
        0x25 | 0x26 | 0x27 => 1257,  // Baltic
        0x2A => 1258,                // Vietnamese
        _ => 1252,                   // Western European and everything unlisted
    }
}

fn encoding_for_code_page(code_page: u16) -> &'static Encoding {
    match code_page {
        874 => encoding_rs::WINDOWS_874,
        932 => encoding_rs::SHIFT_JIS,
        936 => encoding_rs::GB18030,
        949 => encoding_rs::EUC_KR,
        950 => encoding_rs::BIG5,
        1250 => encoding_rs::WINDOWS_1250,
        1251 => encoding_rs::WINDOWS_1251,
        1253 => encoding_rs::WINDOWS_1253,
        1254 => encoding_rs::WINDOWS_1254,
        1255 => encoding_rs::WINDOWS_1255,
        1256 => encoding_rs::WINDOWS_1256,
        1257 => encoding_rs::WINDOWS_1257,
        1258 => encoding_rs::WINDOWS_1258,
        _ => encoding_rs::WINDOWS_1252,
    }
}

/// Decode single-byte (MBCS) character data under a collation.
///
/// A declared non-UTF-8 collation is authoritative: its code page decodes
/// the bytes even when they would also parse as UTF-8 (Windows-1252
/// `0xC3 0xA9` is two characters, not one). UTF-8 is only the path for
/// columns with no collation or a UTF-8-flagged one. A lossy conversion is
/// the last resort so one bad cell cannot fail a row.
#[must_use]
pub fn decode_mbcs(data: &[u8], collation: Option<&Collation>) -> String {
    if let Some(coll) = collation {
        if !coll.is_utf8() {
            let (decoded, _, had_errors) = coll.encoding().decode(data);
            if !had_errors {
                return decoded.into_owned();
            }
            tracing::debug!(
                lcid = coll.lcid(),
                "collation decode failed, trying UTF-8"
            );
        }
    }

    if let Ok(s) = std::str::from_utf8(data) {
        return s.to_owned();
    }

    String::from_utf8_lossy(data).into_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn wire_roundtrip() {
        let mut buf = BytesMut::new();
        DEFAULT_COLLATION.encode(&mut buf);
        assert_eq!(&buf[..], &[0x09, 0x04, 0xD0, 0x00, 0x34]);

        let mut cursor = buf.freeze();
        assert_eq!(Collation::decode(&mut cursor).unwrap(), DEFAULT_COLLATION);
    }

    #[test]
    fn lcid_encodings() {
        let coll = |lcid: u32| Collation { info: lcid, sort_id: 0 };
        assert_eq!(coll(0x0411).encoding(), encoding_rs::SHIFT_JIS);
        assert_eq!(coll(0x0804).encoding(), encoding_rs::GB18030);
        assert_eq!(coll(0x0404).encoding(), encoding_rs::BIG5);
        assert_eq!(coll(0x0419).encoding(), encoding_rs::WINDOWS_1251);
        assert_eq!(coll(0x0409).encoding(), encoding_rs::WINDOWS_1252);
        assert_eq!(coll(0x041E).encoding(), encoding_rs::WINDOWS_874);
    }

    #[test]
    fn utf8_flag_wins() {
        let coll = Collation {
            info: 0x0411 | UTF8_FLAG,
            sort_id: 0,
        };
        assert!(coll.is_utf8());
        assert_eq!(coll.encoding(), encoding_rs::UTF_8);
    }

    #[test]
    fn mbcs_decode_follows_the_collation() {
        assert_eq!(decode_mbcs(b"plain ascii", None), "plain ascii");

        // 0xE9 is é in Windows-1252 but invalid UTF-8 on its own.
        let coll = Collation { info: 0x0409, sort_id: 0 };
        assert_eq!(decode_mbcs(&[0x63, 0x61, 0x66, 0xE9], Some(&coll)), "café");
    }

    #[test]
    fn declared_code_page_wins_over_utf8_lookalikes() {
        // 0xC3 0xA9 is "é" as UTF-8 but two characters under Windows-1252;
        // the declared collation decides.
        let coll = Collation { info: 0x0409, sort_id: 0 };
        assert_eq!(decode_mbcs(&[0xC3, 0xA9], Some(&coll)), "Ã©");

        // With a UTF-8 collation the same bytes are one character.
        let utf8 = Collation {
            info: 0x0409 | UTF8_FLAG,
            sort_id: 0,
        };
        assert_eq!(decode_mbcs(&[0xC3, 0xA9], Some(&utf8)), "é");
    }
}
