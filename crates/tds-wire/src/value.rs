//! The tagged value model for column and parameter data.

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

/// A decoded SQL value.
///
/// One variant per wire family; `Variant` wraps the inner value of a
/// `sql_variant` column so callers can see both the variant-ness and the
/// payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL.
    Null,
    /// BIT.
    Bit(bool),
    /// TINYINT.
    TinyInt(u8),
    /// SMALLINT.
    SmallInt(i16),
    /// INT.
    Int(i32),
    /// BIGINT.
    BigInt(i64),
    /// REAL.
    Real(f32),
    /// FLOAT.
    Float(f64),
    /// DECIMAL / NUMERIC / MONEY / SMALLMONEY.
    Decimal(Decimal),
    /// CHAR / VARCHAR / NCHAR / NVARCHAR / TEXT / NTEXT.
    String(String),
    /// BINARY / VARBINARY / IMAGE / UDT payloads.
    Binary(Bytes),
    /// UNIQUEIDENTIFIER.
    Guid(Uuid),
    /// DATE.
    Date(NaiveDate),
    /// TIME(n).
    Time(NaiveTime),
    /// DATETIME / SMALLDATETIME / DATETIME2(n).
    DateTime(NaiveDateTime),
    /// DATETIMEOFFSET(n).
    DateTimeOffset(DateTime<FixedOffset>),
    /// XML.
    Xml(String),
    /// SQL_VARIANT wrapping its base-typed value.
    Variant(Box<Value>),
}

impl Value {
    /// Peel a `Variant` wrapper (recursively, though the wire never nests).
    #[must_use]
    pub fn base(&self) -> &Value {
        match self {
            Self::Variant(inner) => inner.base(),
            other => other,
        }
    }

    /// Whether this is NULL (a variant of NULL counts).
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self.base(), Self::Null)
    }

    /// Read as a bool.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self.base() {
            Self::Bit(v) => Some(*v),
            _ => None,
        }
    }

    /// Read as i32, widening smaller integers.
    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        match self.base() {
            Self::TinyInt(v) => Some(i32::from(*v)),
            Self::SmallInt(v) => Some(i32::from(*v)),
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Read as i64, widening smaller integers.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self.base() {
            Self::TinyInt(v) => Some(i64::from(*v)),
            Self::SmallInt(v) => Some(i64::from(*v)),
            Self::Int(v) => Some(i64::from(*v)),
            Self::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Read as f64, widening REAL.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self.base() {
            Self::Real(v) => Some(f64::from(*v)),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Read as a string slice.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self.base() {
            Self::String(v) | Self::Xml(v) => Some(v),
            _ => None,
        }
    }

    /// Read as raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self.base() {
            Self::Binary(v) => Some(v),
            _ => None,
        }
    }

    /// Read as a decimal.
    #[must_use]
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self.base() {
            Self::Decimal(v) => Some(*v),
            _ => None,
        }
    }

    /// Read as a GUID.
    #[must_use]
    pub fn as_guid(&self) -> Option<Uuid> {
        match self.base() {
            Self::Guid(v) => Some(*v),
            _ => None,
        }
    }

    /// Read as a date.
    #[must_use]
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self.base() {
            Self::Date(v) => Some(*v),
            Self::DateTime(v) => Some(v.date()),
            _ => None,
        }
    }

    /// Read as a time of day.
    #[must_use]
    pub fn as_time(&self) -> Option<NaiveTime> {
        match self.base() {
            Self::Time(v) => Some(*v),
            Self::DateTime(v) => Some(v.time()),
            _ => None,
        }
    }

    /// Read as a naive datetime.
    #[must_use]
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self.base() {
            Self::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    /// Read as an offset datetime.
    #[must_use]
    pub fn as_datetime_offset(&self) -> Option<DateTime<FixedOffset>> {
        match self.base() {
            Self::DateTimeOffset(v) => Some(*v),
            _ => None,
        }
    }

    /// SQL-ish name of the carried type, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bit(_) => "BIT",
            Self::TinyInt(_) => "TINYINT",
            Self::SmallInt(_) => "SMALLINT",
            Self::Int(_) => "INT",
            Self::BigInt(_) => "BIGINT",
            Self::Real(_) => "REAL",
            Self::Float(_) => "FLOAT",
            Self::Decimal(_) => "DECIMAL",
            Self::String(_) => "NVARCHAR",
            Self::Binary(_) => "VARBINARY",
            Self::Guid(_) => "UNIQUEIDENTIFIER",
            Self::Date(_) => "DATE",
            Self::Time(_) => "TIME",
            Self::DateTime(_) => "DATETIME2",
            Self::DateTimeOffset(_) => "DATETIMEOFFSET",
            Self::Xml(_) => "XML",
            Self::Variant(_) => "SQL_VARIANT",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bit(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Self::TinyInt(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Self::SmallInt(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Real(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Self::Binary(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(v))
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Guid(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Self::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Self::DateTimeOffset(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
