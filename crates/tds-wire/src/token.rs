//! Response token stream.
//!
//! A tabular response is a flat sequence of tagged tokens. Most are
//! self-delimiting; ROW and NBCROW can only be parsed against the column
//! layout installed by the preceding COLMETADATA, so the reader carries that
//! state.

use std::sync::Arc;

use bytes::{Buf, Bytes};

use crate::codec::{ensure, read_b_varbyte, read_b_varchar, read_us_varchar};
use crate::decode::{decode_value, NullBitmap};
use crate::error::WireError;
use crate::meta::{decode_colmetadata, ColumnMeta, TypeMeta};
use crate::value::Value;

/// Token tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenTag {
    /// RETURNSTATUS.
    ReturnStatus = 0x79,
    /// COLMETADATA.
    ColMetaData = 0x81,
    /// TABNAME.
    TabName = 0xA4,
    /// COLINFO.
    ColInfo = 0xA5,
    /// ORDER.
    Order = 0xA9,
    /// ERROR.
    Error = 0xAA,
    /// INFO.
    Info = 0xAB,
    /// RETURNVALUE.
    ReturnValue = 0xAC,
    /// LOGINACK.
    LoginAck = 0xAD,
    /// FEATUREEXTACK.
    FeatureExtAck = 0xAE,
    /// ROW.
    Row = 0xD1,
    /// NBCROW.
    NbcRow = 0xD2,
    /// ENVCHANGE.
    EnvChange = 0xE3,
    /// DONE.
    Done = 0xFD,
    /// DONEPROC.
    DoneProc = 0xFE,
    /// DONEINPROC.
    DoneInProc = 0xFF,
}

impl TokenTag {
    /// Decode a token tag byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x79 => Some(Self::ReturnStatus),
            0x81 => Some(Self::ColMetaData),
            0xA4 => Some(Self::TabName),
            0xA5 => Some(Self::ColInfo),
            0xA9 => Some(Self::Order),
            0xAA => Some(Self::Error),
            0xAB => Some(Self::Info),
            0xAC => Some(Self::ReturnValue),
            0xAD => Some(Self::LoginAck),
            0xAE => Some(Self::FeatureExtAck),
            0xD1 => Some(Self::Row),
            0xD2 => Some(Self::NbcRow),
            0xE3 => Some(Self::EnvChange),
            0xFD => Some(Self::Done),
            0xFE => Some(Self::DoneProc),
            0xFF => Some(Self::DoneInProc),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// Status word of the DONE token family.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DoneStatus: u16 {
        /// More result sets follow.
        const MORE = 0x0001;
        /// The statement produced an error.
        const ERROR = 0x0002;
        /// A transaction is open.
        const IN_XACT = 0x0004;
        /// The row count is meaningful.
        const COUNT = 0x0010;
        /// Acknowledges an Attention.
        const ATTENTION = 0x0020;
        /// Server-side error terminated the batch.
        const SRV_ERROR = 0x0100;
    }
}

/// DONE / DONEPROC / DONEINPROC body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Done {
    /// Status bits.
    pub status: DoneStatus,
    /// Token of the current command (informational).
    pub cur_cmd: u16,
    /// Affected/returned row count when `COUNT` is set.
    pub row_count: u64,
}

impl Done {
    /// Whether this is the final DONE of the response.
    #[must_use]
    pub fn is_final(&self) -> bool {
        !self.status.contains(DoneStatus::MORE)
    }

    /// Whether this DONE acknowledges an Attention.
    #[must_use]
    pub fn is_attention_ack(&self) -> bool {
        self.status.contains(DoneStatus::ATTENTION)
    }

    fn decode(src: &mut impl Buf) -> Result<Self, WireError> {
        ensure(src, 12)?;
        Ok(Self {
            status: DoneStatus::from_bits_truncate(src.get_u16_le()),
            cur_cmd: src.get_u16_le(),
            row_count: src.get_u64_le(),
        })
    }
}

/// An ERROR or INFO token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    /// Message number.
    pub number: i32,
    /// State.
    pub state: u8,
    /// Severity class; 11 and above is an error.
    pub severity: u8,
    /// Message text.
    pub message: String,
    /// Reporting server name.
    pub server: String,
    /// Originating procedure, if any.
    pub procedure: String,
    /// Line within the batch or procedure.
    pub line: i32,
}

impl ServerMessage {
    /// Severity at or above which a message is an error, not a warning.
    pub const ERROR_SEVERITY: u8 = 11;

    /// Severity at or above which the connection is no longer usable.
    pub const FATAL_SEVERITY: u8 = 20;

    /// Whether this message is an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity >= Self::ERROR_SEVERITY
    }

    /// Whether this error terminates the connection.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.severity >= Self::FATAL_SEVERITY
    }

    fn decode(src: &mut impl Buf) -> Result<Self, WireError> {
        ensure(src, 2)?;
        let _length = src.get_u16_le();
        ensure(src, 6)?;
        let number = src.get_i32_le();
        let state = src.get_u8();
        let severity = src.get_u8();
        let message = read_us_varchar(src)?;
        let server = read_b_varchar(src)?;
        let procedure = read_b_varchar(src)?;
        ensure(src, 4)?;
        let line = src.get_i32_le();
        Ok(Self {
            number,
            state,
            severity,
            message,
            server,
            procedure,
            line,
        })
    }
}

/// LOGINACK token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAck {
    /// Interface byte (1 = SQL_TSQL).
    pub interface: u8,
    /// Negotiated TDS version.
    pub tds_version: u32,
    /// Server program name.
    pub program: String,
    /// Server program version.
    pub version: u32,
}

impl LoginAck {
    fn decode(src: &mut impl Buf) -> Result<Self, WireError> {
        ensure(src, 2)?;
        let _length = src.get_u16_le();
        ensure(src, 5)?;
        let interface = src.get_u8();
        let tds_version = src.get_u32_le();
        let program = read_b_varchar(src)?;
        ensure(src, 4)?;
        let version = src.get_u32_le();
        Ok(Self {
            interface,
            tds_version,
            program,
            version,
        })
    }
}

/// Typed ENVCHANGE notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChange {
    /// Current database switched.
    Database {
        /// Previous database.
        old: String,
        /// New database.
        new: String,
    },
    /// Language changed.
    Language(String),
    /// Character set changed (pre-2000 servers).
    CharacterSet(String),
    /// Negotiated packet size changed.
    PacketSize(u32),
    /// Server asks the client to send its locale.
    SendLocale(String),
    /// Column collation default changed.
    Collation(Bytes),
    /// A transaction began; carries the 8-byte descriptor.
    BeginTransaction(u64),
    /// The transaction committed.
    CommitTransaction,
    /// The transaction rolled back.
    RollbackTransaction,
    /// Real-time log shipping notification.
    RealTimeLogShipping,
    /// Acknowledges a connection reset.
    ResetConnectionAck,
    /// The server redirects the client elsewhere.
    Routing {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
    },
    /// Any type this client has no use for.
    Other {
        /// Raw ENVCHANGE type byte.
        kind: u8,
    },
}

impl EnvChange {
    fn decode(src: &mut impl Buf) -> Result<Self, WireError> {
        ensure(src, 2)?;
        let length = src.get_u16_le() as usize;
        ensure(src, length)?;
        let mut body = src.copy_to_bytes(length);

        ensure(&body, 1)?;
        let kind = body.get_u8();
        let change = match kind {
            1 => {
                let new = read_b_varchar(&mut body)?;
                let old = read_b_varchar(&mut body)?;
                Self::Database { old, new }
            }
            2 => Self::Language(read_b_varchar(&mut body)?),
            3 => Self::CharacterSet(read_b_varchar(&mut body)?),
            4 => {
                let new = read_b_varchar(&mut body)?;
                let size = new.parse::<u32>().map_err(|_| {
                    WireError::malformed("ENVCHANGE", format!("packet size {new:?}"))
                })?;
                Self::PacketSize(size)
            }
            5 => Self::SendLocale(read_b_varchar(&mut body)?),
            7 => Self::Collation(read_b_varbyte(&mut body)?),
            8 => {
                let new = read_b_varbyte(&mut body)?;
                if new.len() != 8 {
                    return Err(WireError::malformed(
                        "ENVCHANGE",
                        format!("{}-byte transaction descriptor", new.len()),
                    ));
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&new);
                Self::BeginTransaction(u64::from_le_bytes(raw))
            }
            9 => Self::CommitTransaction,
            10 => Self::RollbackTransaction,
            13 => Self::RealTimeLogShipping,
            18 => Self::ResetConnectionAck,
            20 => {
                ensure(&body, 2)?;
                let _value_len = body.get_u16_le();
                ensure(&body, 5)?;
                let _protocol = body.get_u8();
                let port = body.get_u16_le();
                let host = read_us_varchar(&mut body)?;
                Self::Routing { host, port }
            }
            other => Self::Other { kind: other },
        };
        Ok(change)
    }
}

/// RETURNVALUE token: an OUT parameter or function result.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnValue {
    /// Parameter ordinal.
    pub ordinal: u16,
    /// Parameter name (with `@`).
    pub name: String,
    /// Status byte (1 = output parameter).
    pub status: u8,
    /// Wire type of the value.
    pub meta: TypeMeta,
    /// The value itself.
    pub value: Value,
}

impl ReturnValue {
    fn decode(src: &mut Bytes) -> Result<Self, WireError> {
        ensure(src, 2)?;
        let ordinal = src.get_u16_le();
        let name = read_b_varchar(src)?;
        ensure(src, 7)?;
        let status = src.get_u8();
        let _user_type = src.get_u32_le();
        let _flags = src.get_u16_le();
        let meta = TypeMeta::decode(src)?;
        let value = decode_value(src, &meta)?;
        Ok(Self {
            ordinal,
            name,
            status,
            meta,
            value,
        })
    }
}

/// One feature acknowledgement from FEATUREEXTACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureAck {
    /// Feature id.
    pub feature: u8,
    /// Feature-specific data.
    pub data: Bytes,
}

/// A parsed response token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A new result set's column layout.
    Columns(Arc<[ColumnMeta]>),
    /// One row of the current result set (NBCROW is normalised here too).
    Row(Vec<Value>),
    /// Statement completion.
    Done(Done),
    /// Stored procedure completion.
    DoneProc(Done),
    /// Completion of a statement inside a procedure.
    DoneInProc(Done),
    /// Server error message.
    Error(ServerMessage),
    /// Server informational message.
    Info(ServerMessage),
    /// Login acknowledgement.
    LoginAck(LoginAck),
    /// Session environment change.
    EnvChange(EnvChange),
    /// Procedure return status.
    ReturnStatus(i32),
    /// OUT parameter value.
    ReturnValue(ReturnValue),
    /// Ordering columns of the current result set.
    Order(Vec<u16>),
    /// Negotiated feature extensions.
    FeatureAck(Vec<FeatureAck>),
    /// Base table names for deprecated LOB columns.
    TableName(Vec<String>),
    /// Raw COLINFO payload (browse-mode metadata).
    ColumnInfo(Bytes),
}

/// Streaming token parser over one response payload.
pub struct TokenReader {
    buf: Bytes,
    columns: Option<Arc<[ColumnMeta]>>,
}

impl TokenReader {
    /// Parse tokens out of a complete response payload.
    #[must_use]
    pub fn new(payload: Bytes) -> Self {
        Self {
            buf: payload,
            columns: None,
        }
    }

    /// The column layout currently in effect.
    #[must_use]
    pub fn columns(&self) -> Option<&Arc<[ColumnMeta]>> {
        self.columns.as_ref()
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// The unparsed tail of the payload.
    ///
    /// Used by the cancellation drain, which must keep scanning for the
    /// attention-acknowledging DONE even when the server truncated the
    /// stream mid-token.
    #[must_use]
    pub fn remainder(&self) -> Bytes {
        self.buf.clone()
    }

    /// Parse the next token; `None` at end of payload.
    pub fn next(&mut self) -> Result<Option<Token>, WireError> {
        if !self.buf.has_remaining() {
            return Ok(None);
        }

        let raw = self.buf.get_u8();
        let tag = TokenTag::from_u8(raw).ok_or(WireError::UnknownToken(raw))?;
        let token = match tag {
            TokenTag::ColMetaData => {
                let columns: Arc<[ColumnMeta]> = decode_colmetadata(&mut self.buf)?.into();
                self.columns = Some(Arc::clone(&columns));
                Token::Columns(columns)
            }
            TokenTag::Row => {
                let columns = self
                    .columns
                    .clone()
                    .ok_or(WireError::RowWithoutMetadata)?;
                let mut values = Vec::with_capacity(columns.len());
                for column in columns.iter() {
                    values.push(decode_value(&mut self.buf, &column.meta)?);
                }
                Token::Row(values)
            }
            TokenTag::NbcRow => {
                let columns = self
                    .columns
                    .clone()
                    .ok_or(WireError::RowWithoutMetadata)?;
                let bitmap = NullBitmap::read(&mut self.buf, columns.len())?;
                let mut values = Vec::with_capacity(columns.len());
                for (index, column) in columns.iter().enumerate() {
                    if bitmap.is_null(index) {
                        values.push(Value::Null);
                    } else {
                        values.push(decode_value(&mut self.buf, &column.meta)?);
                    }
                }
                Token::Row(values)
            }
            TokenTag::Done => Token::Done(Done::decode(&mut self.buf)?),
            TokenTag::DoneProc => Token::DoneProc(Done::decode(&mut self.buf)?),
            TokenTag::DoneInProc => Token::DoneInProc(Done::decode(&mut self.buf)?),
            TokenTag::Error => Token::Error(ServerMessage::decode(&mut self.buf)?),
            TokenTag::Info => Token::Info(ServerMessage::decode(&mut self.buf)?),
            TokenTag::LoginAck => Token::LoginAck(LoginAck::decode(&mut self.buf)?),
            TokenTag::EnvChange => Token::EnvChange(EnvChange::decode(&mut self.buf)?),
            TokenTag::ReturnStatus => {
                ensure(&self.buf, 4)?;
                Token::ReturnStatus(self.buf.get_i32_le())
            }
            TokenTag::ReturnValue => Token::ReturnValue(ReturnValue::decode(&mut self.buf)?),
            TokenTag::Order => {
                ensure(&self.buf, 2)?;
                let length = self.buf.get_u16_le() as usize;
                ensure(&self.buf, length)?;
                let mut body = self.buf.copy_to_bytes(length);
                let mut columns = Vec::with_capacity(length / 2);
                while body.remaining() >= 2 {
                    columns.push(body.get_u16_le());
                }
                Token::Order(columns)
            }
            TokenTag::FeatureExtAck => {
                let mut features = Vec::new();
                loop {
                    ensure(&self.buf, 1)?;
                    let feature = self.buf.get_u8();
                    if feature == 0xFF {
                        break;
                    }
                    ensure(&self.buf, 4)?;
                    let len = self.buf.get_u32_le() as usize;
                    ensure(&self.buf, len)?;
                    let data = self.buf.copy_to_bytes(len);
                    features.push(FeatureAck { feature, data });
                }
                Token::FeatureAck(features)
            }
            TokenTag::TabName => {
                ensure(&self.buf, 2)?;
                let length = self.buf.get_u16_le() as usize;
                ensure(&self.buf, length)?;
                let mut body = self.buf.copy_to_bytes(length);
                let mut tables = Vec::new();
                while body.has_remaining() {
                    let parts = body.get_u8();
                    let mut joined = String::new();
                    for i in 0..parts {
                        if i > 0 {
                            joined.push('.');
                        }
                        joined.push_str(&read_us_varchar(&mut body)?);
                    }
                    tables.push(joined);
                }
                Token::TableName(tables)
            }
            TokenTag::ColInfo => {
                ensure(&self.buf, 2)?;
                let length = self.buf.get_u16_le() as usize;
                ensure(&self.buf, length)?;
                Token::ColumnInfo(self.buf.copy_to_bytes(length))
            }
        };

        Ok(Some(token))
    }
}
