//! Parameter encoding: TYPE_INFO and value bytes for RPC requests.

use bytes::{BufMut, BytesMut};

use crate::codec::{utf16_byte_len, write_guid, write_uint_le, write_utf16};
use crate::collation::DEFAULT_COLLATION;
use crate::decode::PLP_NULL;
use crate::error::WireError;
use crate::meta::TypeMeta;
use crate::types::{DataType, PLP_MARKER};
use crate::value::Value;

/// Largest NVARCHAR parameter (in bytes) before switching to NVARCHAR(MAX).
const NVARCHAR_BOUND: usize = 8000;

/// Largest VARBINARY parameter before switching to VARBINARY(MAX).
const VARBINARY_BOUND: usize = 8000;

/// Pick a wire type for a parameter value.
///
/// Integers and floats go out as their nullable N-variants so NULL stays
/// expressible; strings become NVARCHAR (MAX above 8000 bytes).
#[must_use]
pub fn infer_meta(value: &Value) -> TypeMeta {
    match value.base() {
        Value::Null => nvarchar_meta(2),
        Value::Bit(_) => sized(DataType::BitN, 1),
        Value::TinyInt(_) => sized(DataType::IntN, 1),
        Value::SmallInt(_) => sized(DataType::IntN, 2),
        Value::Int(_) => sized(DataType::IntN, 4),
        Value::BigInt(_) => sized(DataType::IntN, 8),
        Value::Real(_) => sized(DataType::FloatN, 4),
        Value::Float(_) => sized(DataType::FloatN, 8),
        Value::Decimal(d) => TypeMeta {
            ty: DataType::DecimalN,
            max_length: Some(17),
            precision: Some(38),
            scale: Some(d.scale() as u8),
            collation: None,
        },
        Value::String(s) => nvarchar_meta(utf16_byte_len(s)),
        Value::Xml(s) => nvarchar_meta(utf16_byte_len(s).max(NVARCHAR_BOUND + 1)),
        Value::Binary(b) => TypeMeta {
            ty: DataType::BigVarBinary,
            max_length: Some(if b.len() > VARBINARY_BOUND {
                u32::from(PLP_MARKER)
            } else {
                b.len().max(1) as u32
            }),
            precision: None,
            scale: None,
            collation: None,
        },
        Value::Guid(_) => sized(DataType::Guid, 16),
        Value::Date(_) => TypeMeta::plain(DataType::Date),
        Value::Time(_) => scaled(DataType::Time, 7),
        Value::DateTime(_) => scaled(DataType::DateTime2, 7),
        Value::DateTimeOffset(_) => scaled(DataType::DateTimeOffset, 7),
        Value::Variant(_) => unreachable!("base() peels variants"),
    }
}

fn sized(ty: DataType, len: u32) -> TypeMeta {
    TypeMeta {
        ty,
        max_length: Some(len),
        precision: None,
        scale: None,
        collation: None,
    }
}

fn scaled(ty: DataType, scale: u8) -> TypeMeta {
    TypeMeta {
        ty,
        max_length: None,
        precision: None,
        scale: Some(scale),
        collation: None,
    }
}

fn nvarchar_meta(byte_len: usize) -> TypeMeta {
    TypeMeta {
        ty: DataType::NVarChar,
        max_length: Some(if byte_len > NVARCHAR_BOUND {
            u32::from(PLP_MARKER)
        } else {
            byte_len.max(2) as u32
        }),
        precision: None,
        scale: None,
        collation: Some(DEFAULT_COLLATION),
    }
}

/// Write a TYPE_INFO record for a parameter.
pub fn write_type_info(dst: &mut BytesMut, meta: &TypeMeta) {
    dst.put_u8(meta.ty as u8);

    if meta.ty.fixed_len().is_some() {
        return;
    }

    if meta.ty.is_byte_len() {
        dst.put_u8(meta.max_length.unwrap_or(0) as u8);
        if meta.ty.is_decimal() {
            dst.put_u8(meta.precision.unwrap_or(38));
            dst.put_u8(meta.scale.unwrap_or(0));
        }
        return;
    }

    if meta.ty.is_short_len() {
        dst.put_u16_le(meta.max_length.unwrap_or(u32::from(PLP_MARKER)) as u16);
        if meta.ty.has_collation() {
            meta.collation.unwrap_or(DEFAULT_COLLATION).encode(dst);
        }
        return;
    }

    match meta.ty {
        DataType::Date => {}
        DataType::Time | DataType::DateTime2 | DataType::DateTimeOffset => {
            dst.put_u8(meta.scale.unwrap_or(7));
        }
        _ => debug_assert!(false, "unsupported parameter type {:?}", meta.ty),
    }
}

/// Write a parameter value with the length framing its family requires.
pub fn write_value(dst: &mut BytesMut, meta: &TypeMeta, value: &Value) -> Result<(), WireError> {
    let value = value.base();

    if value.is_null() {
        write_null(dst, meta);
        return Ok(());
    }

    match meta.ty {
        DataType::IntN => {
            let v = value
                .as_i64()
                .ok_or_else(|| mismatch(meta, value))?;
            let width = meta.max_length.unwrap_or(8) as usize;
            dst.put_u8(width as u8);
            write_uint_le(dst, v as u64, width);
        }
        DataType::FloatN => match (meta.max_length, value) {
            (Some(4), Value::Real(v)) => {
                dst.put_u8(4);
                dst.put_f32_le(*v);
            }
            (_, v) => {
                let v = v.as_f64().ok_or_else(|| mismatch(meta, value))?;
                dst.put_u8(8);
                dst.put_f64_le(v);
            }
        },
        DataType::BitN => {
            let v = value.as_bool().ok_or_else(|| mismatch(meta, value))?;
            dst.put_u8(1);
            dst.put_u8(u8::from(v));
        }
        DataType::Guid => {
            let v = value.as_guid().ok_or_else(|| mismatch(meta, value))?;
            dst.put_u8(16);
            write_guid(dst, &v);
        }
        DataType::DecimalN | DataType::NumericN => {
            let v = value.as_decimal().ok_or_else(|| mismatch(meta, value))?;
            let magnitude = v.mantissa().unsigned_abs();
            let mag_len = decimal_len(meta.precision.unwrap_or(38));
            dst.put_u8(1 + mag_len as u8);
            dst.put_u8(u8::from(v.mantissa() >= 0));
            dst.put_slice(&magnitude.to_le_bytes()[..mag_len]);
        }
        DataType::NVarChar => {
            let s = value.as_str().ok_or_else(|| mismatch(meta, value))?;
            if meta.is_plp() {
                let mut raw = BytesMut::with_capacity(utf16_byte_len(s));
                write_utf16(&mut raw, s);
                write_plp_chunks(dst, &raw);
            } else {
                dst.put_u16_le(utf16_byte_len(s) as u16);
                write_utf16(dst, s);
            }
        }
        DataType::BigVarBinary => {
            let b = value.as_bytes().ok_or_else(|| mismatch(meta, value))?;
            if meta.is_plp() {
                write_plp_chunks(dst, b);
            } else {
                dst.put_u16_le(b.len() as u16);
                dst.put_slice(b);
            }
        }
        DataType::Date => {
            let v = value.as_date().ok_or_else(|| mismatch(meta, value))?;
            dst.put_u8(3);
            write_uint_le(dst, days_since_year_one(v), 3);
        }
        DataType::Time => {
            let v = value.as_time().ok_or_else(|| mismatch(meta, value))?;
            dst.put_u8(5);
            write_uint_le(dst, ticks_scale7(v), 5);
        }
        DataType::DateTime2 => {
            let v = value.as_datetime().ok_or_else(|| mismatch(meta, value))?;
            dst.put_u8(8);
            write_uint_le(dst, ticks_scale7(v.time()), 5);
            write_uint_le(dst, days_since_year_one(v.date()), 3);
        }
        DataType::DateTimeOffset => {
            let v = value
                .as_datetime_offset()
                .ok_or_else(|| mismatch(meta, value))?;
            let utc = v.naive_utc();
            dst.put_u8(10);
            write_uint_le(dst, ticks_scale7(utc.time()), 5);
            write_uint_le(dst, days_since_year_one(utc.date()), 3);
            dst.put_i16_le((v.offset().local_minus_utc() / 60) as i16);
        }
        _ => return Err(mismatch(meta, value)),
    }

    Ok(())
}

fn write_null(dst: &mut BytesMut, meta: &TypeMeta) {
    match meta.ty {
        DataType::NVarChar | DataType::BigVarChar | DataType::BigVarBinary => {
            if meta.is_plp() {
                dst.put_u64_le(PLP_NULL);
            } else {
                dst.put_u16_le(0xFFFF);
            }
        }
        _ => dst.put_u8(0),
    }
}

fn mismatch(meta: &TypeMeta, value: &Value) -> WireError {
    WireError::malformed(
        "parameter",
        format!("{} value for {:?}", value.type_name(), meta.ty),
    )
}

/// Magnitude bytes for a decimal of the given precision.
fn decimal_len(precision: u8) -> usize {
    match precision {
        0..=9 => 4,
        10..=19 => 8,
        20..=28 => 12,
        _ => 16,
    }
}

fn write_plp_chunks(dst: &mut BytesMut, data: &[u8]) {
    dst.put_u64_le(data.len() as u64);
    if !data.is_empty() {
        dst.put_u32_le(data.len() as u32);
        dst.put_slice(data);
    }
    dst.put_u32_le(0);
}

fn days_since_year_one(date: chrono::NaiveDate) -> u64 {
    let epoch = chrono::NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or_default();
    date.signed_duration_since(epoch).num_days().max(0) as u64
}

fn ticks_scale7(time: chrono::NaiveTime) -> u64 {
    use chrono::Timelike;
    u64::from(time.num_seconds_from_midnight()) * 10_000_000
        + u64::from(time.nanosecond()) / 100
}

/// SQL type name for an sp_executesql declaration.
#[must_use]
pub fn declare_type(meta: &TypeMeta) -> String {
    match meta.ty {
        DataType::IntN => match meta.max_length {
            Some(1) => "tinyint".into(),
            Some(2) => "smallint".into(),
            Some(8) => "bigint".into(),
            _ => "int".into(),
        },
        DataType::BitN => "bit".into(),
        DataType::FloatN => match meta.max_length {
            Some(4) => "real".into(),
            _ => "float".into(),
        },
        DataType::DecimalN | DataType::NumericN => format!(
            "decimal({}, {})",
            meta.precision.unwrap_or(38),
            meta.scale.unwrap_or(0)
        ),
        DataType::NVarChar => {
            if meta.is_plp() {
                "nvarchar(max)".into()
            } else {
                format!("nvarchar({})", (meta.max_length.unwrap_or(8000) / 2).max(1))
            }
        }
        DataType::BigVarBinary => {
            if meta.is_plp() {
                "varbinary(max)".into()
            } else {
                format!("varbinary({})", meta.max_length.unwrap_or(8000).max(1))
            }
        }
        DataType::Guid => "uniqueidentifier".into(),
        DataType::Date => "date".into(),
        DataType::Time => format!("time({})", meta.scale.unwrap_or(7)),
        DataType::DateTime2 => format!("datetime2({})", meta.scale.unwrap_or(7)),
        DataType::DateTimeOffset => format!("datetimeoffset({})", meta.scale.unwrap_or(7)),
        _ => "sql_variant".into(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::decode::decode_value;
    use bytes::{Buf, Bytes};
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use rust_decimal::Decimal;

    fn roundtrip(value: Value) -> Value {
        let meta = infer_meta(&value);
        let mut buf = BytesMut::new();
        write_value(&mut buf, &meta, &value).unwrap();
        let mut src: Bytes = buf.freeze();
        let decoded = decode_value(&mut src, &meta).unwrap();
        assert!(!src.has_remaining(), "trailing bytes after {value:?}");
        decoded
    }

    #[test]
    fn integers_roundtrip() {
        assert_eq!(roundtrip(Value::TinyInt(255)), Value::TinyInt(255));
        assert_eq!(roundtrip(Value::SmallInt(-32768)), Value::SmallInt(-32768));
        assert_eq!(roundtrip(Value::Int(-1)), Value::Int(-1));
        assert_eq!(roundtrip(Value::BigInt(i64::MIN)), Value::BigInt(i64::MIN));
    }

    #[test]
    fn floats_roundtrip() {
        assert_eq!(roundtrip(Value::Real(1.5)), Value::Real(1.5));
        assert_eq!(roundtrip(Value::Float(-0.25)), Value::Float(-0.25));
    }

    #[test]
    fn strings_roundtrip() {
        assert_eq!(
            roundtrip(Value::String("héllo wörld".into())),
            Value::String("héllo wörld".into())
        );
        // Past the 8000-byte bound the value goes PLP.
        let long = "x".repeat(5000);
        assert_eq!(roundtrip(Value::String(long.clone())), Value::String(long));
    }

    #[test]
    fn decimal_roundtrip() {
        let d = Decimal::new(-123_456_789, 4);
        assert_eq!(roundtrip(Value::Decimal(d)), Value::Decimal(d));
    }

    #[test]
    fn guid_roundtrip() {
        let g = uuid::Uuid::parse_str("6F9619FF-8B86-D011-B42D-00C04FC964FF").unwrap();
        assert_eq!(roundtrip(Value::Guid(g)), Value::Guid(g));
    }

    #[test]
    fn dates_roundtrip() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(roundtrip(Value::Date(date)), Value::Date(date));

        let time = NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap();
        assert_eq!(roundtrip(Value::Time(time)), Value::Time(time));

        let dt = date.and_time(time);
        assert_eq!(roundtrip(Value::DateTime(dt)), Value::DateTime(dt));

        let dto = chrono::FixedOffset::east_opt(5 * 3600 + 1800)
            .unwrap()
            .with_ymd_and_hms(2024, 6, 1, 12, 30, 0)
            .unwrap();
        assert_eq!(roundtrip(Value::DateTimeOffset(dto)), Value::DateTimeOffset(dto));
    }

    #[test]
    fn nulls_use_family_sentinels() {
        let mut buf = BytesMut::new();
        write_value(&mut buf, &sized(DataType::IntN, 4), &Value::Null).unwrap();
        assert_eq!(&buf[..], &[0x00]);

        let mut buf = BytesMut::new();
        write_value(&mut buf, &nvarchar_meta(10), &Value::Null).unwrap();
        assert_eq!(&buf[..], &[0xFF, 0xFF]);

        let mut buf = BytesMut::new();
        write_value(&mut buf, &nvarchar_meta(NVARCHAR_BOUND + 1), &Value::Null).unwrap();
        assert_eq!(&buf[..], &PLP_NULL.to_le_bytes());
    }

    #[test]
    fn declarations() {
        assert_eq!(declare_type(&sized(DataType::IntN, 4)), "int");
        assert_eq!(declare_type(&sized(DataType::IntN, 8)), "bigint");
        assert_eq!(declare_type(&nvarchar_meta(10)), "nvarchar(5)");
        assert_eq!(
            declare_type(&nvarchar_meta(NVARCHAR_BOUND + 1)),
            "nvarchar(max)"
        );
        assert_eq!(
            declare_type(&infer_meta(&Value::Decimal(Decimal::new(1, 2)))),
            "decimal(38, 2)"
        );
        assert_eq!(declare_type(&infer_meta(&Value::Date(
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
        ))), "date");
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let mut buf = BytesMut::new();
        let err = write_value(&mut buf, &sized(DataType::IntN, 4), &Value::String("x".into()));
        assert!(err.is_err());
    }
}
