//! Prelogin message (packet type 0x12).
//!
//! The first exchange on a connection. Both directions use the same shape:
//! a table of `(option, offset, length)` entries terminated by 0xFF, with
//! the option payloads packed behind the table. Offsets are absolute within
//! the message payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;

/// TDS 7.4, the protocol version this client requests.
pub const TDS_7_4: u32 = 0x7400_0004;

/// Prelogin option tags.
mod option {
    pub const VERSION: u8 = 0x00;
    pub const ENCRYPTION: u8 = 0x01;
    pub const INSTANCE: u8 = 0x02;
    pub const THREAD_ID: u8 = 0x03;
    pub const MARS: u8 = 0x04;
    pub const TRACE_ID: u8 = 0x05;
    pub const FED_AUTH_REQUIRED: u8 = 0x06;
    pub const TERMINATOR: u8 = 0xFF;
}

/// Encryption negotiation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Encryption {
    /// Encrypt the login only.
    Off = 0x00,
    /// Encrypt everything.
    #[default]
    On = 0x01,
    /// The peer cannot encrypt at all.
    NotSupported = 0x02,
    /// Encryption is mandatory.
    Required = 0x03,
}

impl Encryption {
    /// Decode the negotiation byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => Self::On,
            0x02 => Self::NotSupported,
            0x03 => Self::Required,
            _ => Self::Off,
        }
    }
}

/// Distributed trace identity sent in the TRACEID option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceId {
    /// Activity id GUID bytes.
    pub activity_id: [u8; 16],
    /// Activity sequence number.
    pub sequence: u32,
}

/// Prelogin request/response.
///
/// On the client side `version` holds the requested TDS version; in a
/// decoded server response it holds the server's product version word
/// (the real TDS version arrives later, in LOGINACK).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prelogin {
    /// Version word plus sub-build.
    pub version: (u32, u16),
    /// Encryption stance.
    pub encryption: Encryption,
    /// Named instance to reach, if any.
    pub instance: Option<String>,
    /// Client thread id, informational.
    pub thread_id: Option<u32>,
    /// MARS requested (always declined by this client).
    pub mars: bool,
    /// Distributed tracing identity.
    pub trace_id: Option<TraceId>,
    /// Federated authentication required by the peer.
    pub fed_auth_required: bool,
}

impl Default for Prelogin {
    fn default() -> Self {
        Self {
            version: (TDS_7_4, 0),
            encryption: Encryption::default(),
            instance: None,
            thread_id: None,
            mars: false,
            trace_id: None,
            fed_auth_required: false,
        }
    }
}

impl Prelogin {
    /// A client prelogin with the given encryption stance.
    #[must_use]
    pub fn client(encryption: Encryption) -> Self {
        Self {
            encryption,
            ..Self::default()
        }
    }

    /// Encode the message payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut options: Vec<(u8, Vec<u8>)> = Vec::with_capacity(7);

        let mut version = Vec::with_capacity(6);
        version.extend_from_slice(&self.version.0.to_be_bytes());
        version.extend_from_slice(&self.version.1.to_le_bytes());
        options.push((option::VERSION, version));

        options.push((option::ENCRYPTION, vec![self.encryption as u8]));

        if let Some(ref instance) = self.instance {
            let mut data = instance.as_bytes().to_vec();
            data.push(0);
            options.push((option::INSTANCE, data));
        }

        if let Some(thread_id) = self.thread_id {
            options.push((option::THREAD_ID, thread_id.to_be_bytes().to_vec()));
        }

        options.push((option::MARS, vec![u8::from(self.mars)]));

        if let Some(ref trace) = self.trace_id {
            let mut data = Vec::with_capacity(36);
            data.extend_from_slice(&trace.activity_id);
            data.extend_from_slice(&trace.sequence.to_le_bytes());
            data.extend_from_slice(&[0u8; 16]); // connection id, zero from clients
            options.push((option::TRACE_ID, data));
        }

        if self.fed_auth_required {
            options.push((option::FED_AUTH_REQUIRED, vec![0x01]));
        }

        let table_len = options.len() * 5 + 1;
        let payload_len: usize = options.iter().map(|(_, data)| data.len()).sum();
        let mut buf = BytesMut::with_capacity(table_len + payload_len);

        let mut offset = table_len as u16;
        for (tag, data) in &options {
            buf.put_u8(*tag);
            buf.put_u16(offset);
            buf.put_u16(data.len() as u16);
            offset += data.len() as u16;
        }
        buf.put_u8(option::TERMINATOR);
        for (_, data) in &options {
            buf.put_slice(data);
        }

        buf.freeze()
    }

    /// Decode a prelogin payload (either direction).
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut table = &payload[..];
        let mut entries = Vec::new();
        loop {
            if !table.has_remaining() {
                return Err(WireError::Truncated {
                    needed: 1,
                    available: 0,
                });
            }
            let tag = table.get_u8();
            if tag == option::TERMINATOR {
                break;
            }
            if table.remaining() < 4 {
                return Err(WireError::Truncated {
                    needed: 4,
                    available: table.remaining(),
                });
            }
            let offset = table.get_u16() as usize;
            let length = table.get_u16() as usize;
            entries.push((tag, offset, length));
        }

        let mut prelogin = Self {
            mars: false,
            ..Self::default()
        };

        for (tag, offset, length) in entries {
            let Some(data) = payload.get(offset..offset + length) else {
                // An option pointing outside the payload is a peer bug; skip it.
                continue;
            };
            match tag {
                option::VERSION if length >= 6 => {
                    let word = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                    let sub = u16::from_le_bytes([data[4], data[5]]);
                    prelogin.version = (word, sub);
                }
                option::ENCRYPTION if length >= 1 => {
                    prelogin.encryption = Encryption::from_u8(data[0]);
                }
                option::INSTANCE if length > 0 => {
                    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                    if end > 0 {
                        if let Ok(s) = std::str::from_utf8(&data[..end]) {
                            prelogin.instance = Some(s.to_owned());
                        }
                    }
                }
                option::THREAD_ID if length >= 4 => {
                    prelogin.thread_id =
                        Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
                }
                option::MARS if length >= 1 => {
                    prelogin.mars = data[0] != 0;
                }
                option::FED_AUTH_REQUIRED if length >= 1 => {
                    prelogin.fed_auth_required = data[0] != 0;
                }
                // Unknown options (e.g. NONCE from newer servers) are skipped.
                _ => {}
            }
        }

        Ok(prelogin)
    }
}
