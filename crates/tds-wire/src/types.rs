//! SQL Server data type identifiers and column flags.

use crate::error::WireError;

/// DATATYPE byte as it appears in TYPE_INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    /// NULL placeholder type.
    Null = 0x1F,
    /// TINYINT.
    Int1 = 0x30,
    /// BIT.
    Bit = 0x32,
    /// SMALLINT.
    Int2 = 0x34,
    /// INT.
    Int4 = 0x38,
    /// SMALLDATETIME.
    DateTime4 = 0x3A,
    /// REAL.
    Float4 = 0x3B,
    /// MONEY.
    Money = 0x3C,
    /// DATETIME.
    DateTime = 0x3D,
    /// FLOAT.
    Float8 = 0x3E,
    /// SMALLMONEY.
    Money4 = 0x7A,
    /// BIGINT.
    Int8 = 0x7F,

    /// UNIQUEIDENTIFIER, nullable wrapper.
    Guid = 0x24,
    /// Nullable integer of 1/2/4/8 bytes.
    IntN = 0x26,
    /// Legacy DECIMAL.
    Decimal = 0x37,
    /// Legacy NUMERIC.
    Numeric = 0x3F,
    /// Nullable BIT.
    BitN = 0x68,
    /// DECIMAL.
    DecimalN = 0x6A,
    /// NUMERIC.
    NumericN = 0x6C,
    /// Nullable float of 4/8 bytes.
    FloatN = 0x6D,
    /// Nullable money of 4/8 bytes.
    MoneyN = 0x6E,
    /// Nullable DATETIME/SMALLDATETIME.
    DateTimeN = 0x6F,

    /// Legacy CHAR.
    Char = 0x2F,
    /// Legacy VARCHAR.
    VarChar = 0x27,
    /// Legacy BINARY.
    Binary = 0x2D,
    /// Legacy VARBINARY.
    VarBinary = 0x25,

    /// VARBINARY with 2-byte length (or MAX).
    BigVarBinary = 0xA5,
    /// VARCHAR with 2-byte length (or MAX).
    BigVarChar = 0xA7,
    /// BINARY with 2-byte length.
    BigBinary = 0xAD,
    /// CHAR with 2-byte length.
    BigChar = 0xAF,
    /// NCHAR.
    NChar = 0xEF,
    /// NVARCHAR (or NVARCHAR(MAX)).
    NVarChar = 0xE7,

    /// TEXT (deprecated LOB).
    Text = 0x23,
    /// IMAGE (deprecated LOB).
    Image = 0x22,
    /// NTEXT (deprecated LOB).
    NText = 0x63,

    /// DATE.
    Date = 0x28,
    /// TIME(n).
    Time = 0x29,
    /// DATETIME2(n).
    DateTime2 = 0x2A,
    /// DATETIMEOFFSET(n).
    DateTimeOffset = 0x2B,

    /// SQL_VARIANT.
    Variant = 0x62,
    /// CLR user-defined type.
    Udt = 0xF0,
    /// XML.
    Xml = 0xF1,
}

/// Sentinel in a 2-byte max-length field marking a MAX (PLP) type.
pub const PLP_MARKER: u16 = 0xFFFF;

impl DataType {
    /// Decode a DATATYPE byte.
    pub fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0x1F => Ok(Self::Null),
            0x30 => Ok(Self::Int1),
            0x32 => Ok(Self::Bit),
            0x34 => Ok(Self::Int2),
            0x38 => Ok(Self::Int4),
            0x3A => Ok(Self::DateTime4),
            0x3B => Ok(Self::Float4),
            0x3C => Ok(Self::Money),
            0x3D => Ok(Self::DateTime),
            0x3E => Ok(Self::Float8),
            0x7A => Ok(Self::Money4),
            0x7F => Ok(Self::Int8),
            0x24 => Ok(Self::Guid),
            0x26 => Ok(Self::IntN),
            0x37 => Ok(Self::Decimal),
            0x3F => Ok(Self::Numeric),
            0x68 => Ok(Self::BitN),
            0x6A => Ok(Self::DecimalN),
            0x6C => Ok(Self::NumericN),
            0x6D => Ok(Self::FloatN),
            0x6E => Ok(Self::MoneyN),
            0x6F => Ok(Self::DateTimeN),
            0x2F => Ok(Self::Char),
            0x27 => Ok(Self::VarChar),
            0x2D => Ok(Self::Binary),
            0x25 => Ok(Self::VarBinary),
            0xA5 => Ok(Self::BigVarBinary),
            0xA7 => Ok(Self::BigVarChar),
            0xAD => Ok(Self::BigBinary),
            0xAF => Ok(Self::BigChar),
            0xEF => Ok(Self::NChar),
            0xE7 => Ok(Self::NVarChar),
            0x23 => Ok(Self::Text),
            0x22 => Ok(Self::Image),
            0x63 => Ok(Self::NText),
            0x28 => Ok(Self::Date),
            0x29 => Ok(Self::Time),
            0x2A => Ok(Self::DateTime2),
            0x2B => Ok(Self::DateTimeOffset),
            0x62 => Ok(Self::Variant),
            0xF0 => Ok(Self::Udt),
            0xF1 => Ok(Self::Xml),
            other => Err(WireError::UnknownDataType(other)),
        }
    }

    /// Fixed wire size in bytes, for types without a length prefix.
    #[must_use]
    pub const fn fixed_len(&self) -> Option<usize> {
        match self {
            Self::Null => Some(0),
            Self::Int1 | Self::Bit => Some(1),
            Self::Int2 => Some(2),
            Self::Int4 | Self::Float4 | Self::Money4 | Self::DateTime4 => Some(4),
            Self::Int8 | Self::Float8 | Self::Money | Self::DateTime => Some(8),
            _ => None,
        }
    }

    /// Types whose TYPE_INFO carries a 1-byte max length.
    #[must_use]
    pub const fn is_byte_len(&self) -> bool {
        matches!(
            self,
            Self::Guid
                | Self::IntN
                | Self::BitN
                | Self::FloatN
                | Self::MoneyN
                | Self::DateTimeN
                | Self::Decimal
                | Self::Numeric
                | Self::DecimalN
                | Self::NumericN
                | Self::Char
                | Self::VarChar
                | Self::Binary
                | Self::VarBinary
        )
    }

    /// Types whose TYPE_INFO carries a 2-byte max length.
    #[must_use]
    pub const fn is_short_len(&self) -> bool {
        matches!(
            self,
            Self::BigVarBinary
                | Self::BigVarChar
                | Self::BigBinary
                | Self::BigChar
                | Self::NChar
                | Self::NVarChar
        )
    }

    /// Deprecated LOB types with a 4-byte length and text pointers.
    #[must_use]
    pub const fn is_long_len(&self) -> bool {
        matches!(self, Self::Text | Self::Image | Self::NText)
    }

    /// Types that decode UTF-16LE data.
    #[must_use]
    pub const fn is_unicode(&self) -> bool {
        matches!(self, Self::NChar | Self::NVarChar | Self::NText | Self::Xml)
    }

    /// Types whose TYPE_INFO carries a 5-byte collation.
    #[must_use]
    pub const fn has_collation(&self) -> bool {
        matches!(
            self,
            Self::Char
                | Self::VarChar
                | Self::BigChar
                | Self::BigVarChar
                | Self::NChar
                | Self::NVarChar
                | Self::Text
                | Self::NText
        )
    }

    /// Types whose TYPE_INFO carries a scale byte.
    #[must_use]
    pub const fn has_scale(&self) -> bool {
        matches!(self, Self::Time | Self::DateTime2 | Self::DateTimeOffset)
    }

    /// Types in the DECIMAL/NUMERIC family.
    #[must_use]
    pub const fn is_decimal(&self) -> bool {
        matches!(
            self,
            Self::Decimal | Self::Numeric | Self::DecimalN | Self::NumericN
        )
    }
}

/// Flags word from a COLMETADATA column record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnFlags {
    /// Column accepts NULL.
    pub nullable: bool,
    /// Comparisons are case sensitive.
    pub case_sensitive: bool,
    /// Identity column.
    pub identity: bool,
    /// Computed column.
    pub computed: bool,
    /// Member of a sparse column set.
    pub sparse: bool,
    /// Hidden from SELECT *.
    pub hidden: bool,
    /// Part of a key.
    pub key: bool,
    /// Nullability unknown at plan time.
    pub nullable_unknown: bool,
}

impl ColumnFlags {
    /// Parse the 2-byte flags word.
    #[must_use]
    pub fn from_bits(bits: u16) -> Self {
        Self {
            nullable: bits & 0x0001 != 0,
            case_sensitive: bits & 0x0002 != 0,
            identity: bits & 0x0010 != 0,
            computed: bits & 0x0020 != 0,
            sparse: bits & 0x0200 != 0,
            hidden: bits & 0x2000 != 0,
            key: bits & 0x4000 != 0,
            nullable_unknown: bits & 0x8000 != 0,
        }
    }

    /// Encode back to the flags word.
    #[must_use]
    pub fn to_bits(&self) -> u16 {
        let mut bits = 0u16;
        if self.nullable {
            bits |= 0x0001;
        }
        if self.case_sensitive {
            bits |= 0x0002;
        }
        if self.identity {
            bits |= 0x0010;
        }
        if self.computed {
            bits |= 0x0020;
        }
        if self.sparse {
            bits |= 0x0200;
        }
        if self.hidden {
            bits |= 0x2000;
        }
        if self.key {
            bits |= 0x4000;
        }
        if self.nullable_unknown {
            bits |= 0x8000;
        }
        bits
    }
}
