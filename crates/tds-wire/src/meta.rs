//! TYPE_INFO and COLMETADATA decoding.

use bytes::Buf;

use crate::codec::{ensure, read_b_varchar, read_us_varchar};
use crate::collation::Collation;
use crate::error::WireError;
use crate::types::{ColumnFlags, DataType, PLP_MARKER};

/// Wire type descriptor: everything needed to parse or serialise one value.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeMeta {
    /// The DATATYPE byte.
    pub ty: DataType,
    /// Declared maximum length for variable types (`0xFFFF` marks MAX).
    pub max_length: Option<u32>,
    /// Precision for decimal types.
    pub precision: Option<u8>,
    /// Scale for decimal and scaled date/time types.
    pub scale: Option<u8>,
    /// Collation for character types.
    pub collation: Option<Collation>,
}

impl TypeMeta {
    /// A descriptor with only the type byte set.
    #[must_use]
    pub fn plain(ty: DataType) -> Self {
        Self {
            ty,
            max_length: None,
            precision: None,
            scale: None,
            collation: None,
        }
    }

    /// Whether values of this type use PLP (chunked) encoding.
    #[must_use]
    pub fn is_plp(&self) -> bool {
        match self.ty {
            DataType::Xml | DataType::Udt => true,
            DataType::NVarChar | DataType::BigVarChar | DataType::BigVarBinary => {
                self.max_length == Some(u32::from(PLP_MARKER))
            }
            _ => false,
        }
    }

    /// Decode a TYPE_INFO record (type byte plus family-specific fields).
    pub fn decode(src: &mut impl Buf) -> Result<Self, WireError> {
        ensure(src, 1)?;
        let ty = DataType::from_u8(src.get_u8())?;
        let mut meta = Self::plain(ty);

        if ty.fixed_len().is_some() {
            return Ok(meta);
        }

        if ty.is_byte_len() {
            ensure(src, 1)?;
            meta.max_length = Some(u32::from(src.get_u8()));
            if ty.is_decimal() {
                ensure(src, 2)?;
                meta.precision = Some(src.get_u8());
                meta.scale = Some(src.get_u8());
            }
            if ty.has_collation() {
                meta.collation = Some(Collation::decode(src)?);
            }
            return Ok(meta);
        }

        if ty.is_short_len() {
            ensure(src, 2)?;
            meta.max_length = Some(u32::from(src.get_u16_le()));
            if ty.has_collation() {
                meta.collation = Some(Collation::decode(src)?);
            }
            return Ok(meta);
        }

        if ty.is_long_len() {
            ensure(src, 4)?;
            meta.max_length = Some(src.get_u32_le());
            if ty.has_collation() {
                meta.collation = Some(Collation::decode(src)?);
            }
            return Ok(meta);
        }

        match ty {
            DataType::Date => {}
            DataType::Time | DataType::DateTime2 | DataType::DateTimeOffset => {
                ensure(src, 1)?;
                meta.scale = Some(src.get_u8());
            }
            DataType::Variant => {
                ensure(src, 4)?;
                meta.max_length = Some(src.get_u32_le());
            }
            DataType::Xml => {
                // Optional schema collection: dbname, owning schema, collection.
                ensure(src, 1)?;
                if src.get_u8() != 0 {
                    let _db = read_b_varchar(src)?;
                    let _schema = read_b_varchar(src)?;
                    let _collection = read_us_varchar(src)?;
                }
            }
            DataType::Udt => {
                ensure(src, 2)?;
                meta.max_length = Some(u32::from(src.get_u16_le()));
                let _db = read_b_varchar(src)?;
                let _schema = read_b_varchar(src)?;
                let _type_name = read_b_varchar(src)?;
                let _assembly = read_us_varchar(src)?;
            }
            _ => {
                return Err(WireError::malformed(
                    "TYPE_INFO",
                    format!("no length rule for {ty:?}"),
                ));
            }
        }

        Ok(meta)
    }
}

/// One column of a result set, from a COLMETADATA token.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    /// Column name (may be empty for computed expressions).
    pub name: String,
    /// Position in the result set, 0-based.
    pub ordinal: usize,
    /// Server user type id.
    pub user_type: u32,
    /// Column flags.
    pub flags: ColumnFlags,
    /// Wire type descriptor.
    pub meta: TypeMeta,
    /// Owning table parts for deprecated LOB columns.
    pub table_name: Option<String>,
}

impl ColumnMeta {
    /// Whether the column may carry NULL.
    #[must_use]
    pub fn nullable(&self) -> bool {
        self.flags.nullable
    }
}

/// Decode the body of a COLMETADATA token (after the 0x81 tag).
///
/// A count of 0xFFFF means "no metadata" and yields an empty column list.
pub fn decode_colmetadata(src: &mut impl Buf) -> Result<Vec<ColumnMeta>, WireError> {
    ensure(src, 2)?;
    let count = src.get_u16_le();
    if count == 0xFFFF {
        return Ok(Vec::new());
    }

    let mut columns = Vec::with_capacity(count as usize);
    for ordinal in 0..count as usize {
        ensure(src, 6)?;
        let user_type = src.get_u32_le();
        let flags = ColumnFlags::from_bits(src.get_u16_le());
        let meta = TypeMeta::decode(src)?;

        // Deprecated LOB columns name their base table before the column name.
        let table_name = if meta.ty.is_long_len() {
            ensure(src, 1)?;
            let parts = src.get_u8();
            let mut joined = String::new();
            for i in 0..parts {
                if i > 0 {
                    joined.push('.');
                }
                joined.push_str(&read_us_varchar(src)?);
            }
            Some(joined)
        } else {
            None
        };

        let name = read_b_varchar(src)?;

        columns.push(ColumnMeta {
            name,
            ordinal,
            user_type,
            flags,
            meta,
            table_name,
        });
    }

    Ok(columns)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn colmetadata_int_nvarchar() -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u16_le(2); // column count

        // Column 0: INT NOT NULL, named "id"
        buf.put_u32_le(0); // user type
        buf.put_u16_le(0x0000); // flags
        buf.put_u8(0x38); // INT4
        buf.put_u8(2); // name length in chars
        buf.put_u16_le(u16::from(b'i'));
        buf.put_u16_le(u16::from(b'd'));

        // Column 1: NVARCHAR(50) NULL, named "name"
        buf.put_u32_le(0);
        buf.put_u16_le(0x0001); // nullable
        buf.put_u8(0xE7); // NVARCHAR
        buf.put_u16_le(100); // max length in bytes
        buf.put_slice(&[0x09, 0x04, 0xD0, 0x00, 0x34]); // collation
        buf.put_u8(4);
        for c in "name".encode_utf16() {
            buf.put_u16_le(c);
        }

        buf
    }

    #[test]
    fn decode_two_columns() {
        let mut cursor = colmetadata_int_nvarchar().freeze();
        let columns = decode_colmetadata(&mut cursor).unwrap();
        assert!(!cursor.has_remaining());

        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].name, "id");
        assert_eq!(columns[0].meta.ty, DataType::Int4);
        assert!(!columns[0].nullable());

        assert_eq!(columns[1].name, "name");
        assert_eq!(columns[1].ordinal, 1);
        assert_eq!(columns[1].meta.ty, DataType::NVarChar);
        assert_eq!(columns[1].meta.max_length, Some(100));
        assert!(columns[1].nullable());
        assert!(columns[1].meta.collation.is_some());
    }

    #[test]
    fn no_metadata_sentinel() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(0xFFFF);
        let mut cursor = buf.freeze();
        assert!(decode_colmetadata(&mut cursor).unwrap().is_empty());
    }

    #[test]
    fn nvarchar_max_is_plp() {
        let meta = TypeMeta {
            ty: DataType::NVarChar,
            max_length: Some(0xFFFF),
            precision: None,
            scale: None,
            collation: None,
        };
        assert!(meta.is_plp());

        let bounded = TypeMeta {
            max_length: Some(100),
            ..meta
        };
        assert!(!bounded.is_plp());
    }

    #[test]
    fn decimal_type_info() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x6C); // NUMERICN
        buf.put_u8(9); // max length
        buf.put_u8(18); // precision
        buf.put_u8(4); // scale
        let mut cursor = buf.freeze();

        let meta = TypeMeta::decode(&mut cursor).unwrap();
        assert_eq!(meta.ty, DataType::NumericN);
        assert_eq!(meta.precision, Some(18));
        assert_eq!(meta.scale, Some(4));
    }

    #[test]
    fn time_scale() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x29); // TIME
        buf.put_u8(3); // scale
        let mut cursor = buf.freeze();

        let meta = TypeMeta::decode(&mut cursor).unwrap();
        assert_eq!(meta.ty, DataType::Time);
        assert_eq!(meta.scale, Some(3));
    }
}
