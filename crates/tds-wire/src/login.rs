//! Login7 record (packet type 0x10).
//!
//! A 94-byte fixed header followed by an offset/length table into a UTF-16LE
//! string area. The password travels obfuscated (nibble swap then XOR 0xA5);
//! that is not encryption, which is why the login rides inside TLS whenever
//! the negotiation allows it.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::write_utf16;
use crate::prelogin::TDS_7_4;

/// Fixed header length of the Login7 record.
pub const LOGIN7_HEADER_LEN: usize = 94;

/// Login7 record builder.
#[derive(Debug, Clone)]
pub struct Login7 {
    /// Requested TDS version.
    pub tds_version: u32,
    /// Requested packet size.
    pub packet_size: u32,
    /// Client program version.
    pub client_version: u32,
    /// Client process id.
    pub client_pid: u32,
    /// Client machine name.
    pub hostname: String,
    /// SQL login name.
    pub username: String,
    /// SQL login password.
    pub password: String,
    /// Application name reported to the server.
    pub app_name: String,
    /// Server name as the client addressed it.
    pub server_name: String,
    /// Client library name.
    pub library_name: String,
    /// Initial language (empty for server default).
    pub language: String,
    /// Initial database (empty for the login's default).
    pub database: String,
    /// Client timezone offset in minutes.
    pub timezone: i32,
    /// Client locale id.
    pub lcid: u32,
    /// Ask for a read-only routing target.
    pub read_only_intent: bool,
}

impl Default for Login7 {
    fn default() -> Self {
        Self {
            tds_version: TDS_7_4,
            packet_size: 4096,
            client_version: 0,
            client_pid: std::process::id(),
            hostname: String::new(),
            username: String::new(),
            password: String::new(),
            app_name: String::from("sqlserver-client"),
            server_name: String::new(),
            library_name: String::from("sqlserver-client"),
            language: String::new(),
            database: String::new(),
            timezone: 0,
            lcid: 0x0409,
            read_only_intent: false,
        }
    }
}

impl Login7 {
    /// OptionFlags1: fUseDB | fInitDBFatal.
    const OPTION_FLAGS_1: u8 = 0x60;
    /// OptionFlags2: fLanguageFatal | fODBC.
    const OPTION_FLAGS_2: u8 = 0x03;
    /// OptionFlags3: fUnknownCollationHandling.
    const OPTION_FLAGS_3: u8 = 0x08;

    /// Encode the record.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        // String area entries in wire order. The password is obfuscated;
        // everything else is plain UTF-16LE.
        struct Entry<'a> {
            text: &'a str,
            obfuscate: bool,
        }
        let entries = [
            Entry { text: &self.hostname, obfuscate: false },
            Entry { text: &self.username, obfuscate: false },
            Entry { text: &self.password, obfuscate: true },
            Entry { text: &self.app_name, obfuscate: false },
            Entry { text: &self.server_name, obfuscate: false },
            Entry { text: "", obfuscate: false }, // unused / extension
            Entry { text: &self.library_name, obfuscate: false },
            Entry { text: &self.language, obfuscate: false },
            Entry { text: &self.database, obfuscate: false },
        ];

        let mut string_area = BytesMut::new();
        let mut table: Vec<(u16, u16)> = Vec::with_capacity(entries.len());
        let mut offset = LOGIN7_HEADER_LEN as u16;
        for entry in &entries {
            let chars = entry.text.encode_utf16().count() as u16;
            table.push((offset, chars));
            if entry.obfuscate {
                write_obfuscated_password(&mut string_area, entry.text);
            } else {
                write_utf16(&mut string_area, entry.text);
            }
            offset += chars * 2;
        }
        // SSPI, attach-db and change-password are unused: zero-length
        // entries pointing at the current end of the string area.
        let tail_offset = offset;

        let total_len = LOGIN7_HEADER_LEN + string_area.len();
        let mut buf = BytesMut::with_capacity(total_len);

        buf.put_u32_le(total_len as u32);
        buf.put_u32_le(self.tds_version);
        buf.put_u32_le(self.packet_size);
        buf.put_u32_le(self.client_version);
        buf.put_u32_le(self.client_pid);
        buf.put_u32_le(0); // connection id
        buf.put_u8(Self::OPTION_FLAGS_1);
        buf.put_u8(Self::OPTION_FLAGS_2);
        buf.put_u8(if self.read_only_intent { 0x20 } else { 0x00 }); // type flags
        buf.put_u8(Self::OPTION_FLAGS_3);
        buf.put_i32_le(self.timezone);
        buf.put_u32_le(self.lcid);

        for (entry_offset, chars) in &table {
            buf.put_u16_le(*entry_offset);
            buf.put_u16_le(*chars);
        }

        buf.put_slice(&[0u8; 6]); // client MAC, zeroed

        buf.put_u16_le(tail_offset); // SSPI
        buf.put_u16_le(0);
        buf.put_u16_le(tail_offset); // attach-db file
        buf.put_u16_le(0);
        buf.put_u16_le(tail_offset); // change password
        buf.put_u16_le(0);
        buf.put_u32_le(0); // long SSPI length

        buf.put_slice(&string_area);
        buf.freeze()
    }
}

/// Obfuscate a password per the Login7 rules: for each UTF-16 byte, swap the
/// nibbles, then XOR with 0xA5.
fn write_obfuscated_password(dst: &mut impl BufMut, password: &str) {
    for unit in password.encode_utf16() {
        for byte in unit.to_le_bytes() {
            dst.put_u8(byte.rotate_right(4) ^ 0xA5);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let login = Login7 {
            hostname: "box".into(),
            username: "sa".into(),
            password: "secret".into(),
            database: "app".into(),
            ..Login7::default()
        };
        let encoded = login.encode();

        // Declared length covers the whole record.
        let declared = u32::from_le_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(declared as usize, encoded.len());

        // TDS version word.
        let version = u32::from_le_bytes([encoded[4], encoded[5], encoded[6], encoded[7]]);
        assert_eq!(version, TDS_7_4);

        // First string entry (hostname) starts right after the fixed header.
        let host_offset = u16::from_le_bytes([encoded[36], encoded[37]]) as usize;
        let host_chars = u16::from_le_bytes([encoded[38], encoded[39]]) as usize;
        assert_eq!(host_offset, LOGIN7_HEADER_LEN);
        assert_eq!(host_chars, 3);
        assert_eq!(&encoded[host_offset..host_offset + 2], &[b'b', 0]);
    }

    #[test]
    fn password_obfuscation() {
        let mut buf = BytesMut::new();
        write_obfuscated_password(&mut buf, "a");
        // 'a' = 0x0061: 0x61 -> nibble swap 0x16 -> XOR 0xA5 = 0xB3;
        //               0x00 -> 0x00 -> 0xA5.
        assert_eq!(&buf[..], &[0xB3, 0xA5]);
    }

    #[test]
    fn password_is_not_plaintext() {
        let login = Login7 {
            username: "u".into(),
            password: "hunter2".into(),
            ..Login7::default()
        };
        let encoded = login.encode();
        let plain: Vec<u8> = "hunter2"
            .encode_utf16()
            .flat_map(|c| c.to_le_bytes())
            .collect();
        assert!(!encoded.windows(plain.len()).any(|w| w == plain.as_slice()));
    }

    #[test]
    fn read_only_intent_sets_type_flag() {
        let login = Login7 {
            read_only_intent: true,
            ..Login7::default()
        };
        let encoded = login.encode();
        assert_eq!(encoded[26] & 0x20, 0x20);
    }
}
