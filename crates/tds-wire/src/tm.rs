//! Transaction Manager request bodies (packet type 0x0E).

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::write_b_varchar;
use crate::headers::write_all_headers;

/// Transaction isolation levels, wire numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum IsolationLevel {
    /// READ UNCOMMITTED.
    ReadUncommitted = 1,
    /// READ COMMITTED (the server default).
    #[default]
    ReadCommitted = 2,
    /// REPEATABLE READ.
    RepeatableRead = 3,
    /// SERIALIZABLE.
    Serializable = 4,
    /// SNAPSHOT.
    Snapshot = 5,
}

impl IsolationLevel {
    /// Name as it appears in T-SQL.
    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
            Self::Snapshot => "SNAPSHOT",
        }
    }
}

/// Request type words.
const TM_BEGIN_XACT: u16 = 5;
const TM_COMMIT_XACT: u16 = 7;
const TM_ROLLBACK_XACT: u16 = 8;
const TM_SAVE_XACT: u16 = 9;

/// A transaction manager request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TmRequest {
    /// Begin a transaction; the server answers with a BeginTransaction
    /// ENVCHANGE carrying the descriptor.
    Begin(IsolationLevel),
    /// Commit the current transaction.
    Commit,
    /// Roll the current transaction back.
    Rollback,
    /// Create a savepoint.
    Save(String),
}

impl TmRequest {
    /// Encode the request body.
    ///
    /// `transaction_descriptor` is 0 for Begin and the active descriptor for
    /// Commit/Rollback/Save.
    #[must_use]
    pub fn encode(&self, transaction_descriptor: u64) -> Bytes {
        let mut buf = BytesMut::with_capacity(32);
        write_all_headers(&mut buf, transaction_descriptor);

        match self {
            Self::Begin(isolation) => {
                buf.put_u16_le(TM_BEGIN_XACT);
                buf.put_u8(*isolation as u8);
                buf.put_u8(0); // unnamed transaction
            }
            Self::Commit => {
                buf.put_u16_le(TM_COMMIT_XACT);
                buf.put_u8(0); // unnamed
                buf.put_u8(0); // no begin piggybacked
            }
            Self::Rollback => {
                buf.put_u16_le(TM_ROLLBACK_XACT);
                buf.put_u8(0);
                buf.put_u8(0);
            }
            Self::Save(name) => {
                buf.put_u16_le(TM_SAVE_XACT);
                write_b_varchar(&mut buf, name);
            }
        }

        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::ALL_HEADERS_LEN;

    #[test]
    fn begin_carries_isolation() {
        let body = TmRequest::Begin(IsolationLevel::Serializable).encode(0);
        assert_eq!(&body[ALL_HEADERS_LEN..ALL_HEADERS_LEN + 2], &[5, 0]);
        assert_eq!(body[ALL_HEADERS_LEN + 2], 4);
    }

    #[test]
    fn commit_uses_active_descriptor() {
        let body = TmRequest::Commit.encode(0x1122);
        assert_eq!(&body[10..12], &[0x22, 0x11]);
        assert_eq!(&body[ALL_HEADERS_LEN..ALL_HEADERS_LEN + 2], &[7, 0]);
    }

    #[test]
    fn savepoint_name() {
        let body = TmRequest::Save("sp1".into()).encode(1);
        assert_eq!(&body[ALL_HEADERS_LEN..ALL_HEADERS_LEN + 2], &[9, 0]);
        assert_eq!(body[ALL_HEADERS_LEN + 2], 3); // name chars
    }

    #[test]
    fn isolation_sql_names() {
        assert_eq!(IsolationLevel::Snapshot.as_sql(), "SNAPSHOT");
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
    }
}
