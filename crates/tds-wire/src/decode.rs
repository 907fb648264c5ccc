//! Wire value decoding.
//!
//! [`decode_value`] turns the bytes of one cell into a [`Value`] according to
//! its [`TypeMeta`]. Each variable-length family carries its own NULL
//! sentinel: a zero length byte, `0xFFFF` for short-length types, or the
//! all-ones PLP total.

// Constant epochs (0001-01-01, 1900-01-01) are valid dates.
#![allow(clippy::expect_used)]

use bytes::{Buf, Bytes};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;

use crate::codec::{ensure, read_guid, read_uint_le, utf16_le_to_string};
use crate::collation::{decode_mbcs, Collation};
use crate::error::WireError;
use crate::meta::TypeMeta;
use crate::types::DataType;
use crate::value::Value;

/// PLP total meaning NULL.
pub const PLP_NULL: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// PLP total meaning "length unknown until the terminator".
pub const PLP_UNKNOWN: u64 = 0xFFFF_FFFF_FFFF_FFFE;

/// NULL sentinel for short-length (2-byte) value lengths.
const SHORT_NULL: u16 = 0xFFFF;

/// Days-since-0001-01-01 to a date.
fn date_from_days(days: u64) -> Result<NaiveDate, WireError> {
    let epoch = NaiveDate::from_ymd_opt(1, 1, 1).expect("valid epoch");
    epoch
        .checked_add_signed(Duration::days(days as i64))
        .ok_or_else(|| WireError::malformed("DATE", format!("{days} days out of range")))
}

/// 1900-01-01, the DATETIME/SMALLDATETIME epoch.
fn epoch_1900() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).expect("valid epoch")
}

/// Bytes used for TIME ticks at a given scale.
pub(crate) fn time_width(scale: u8) -> usize {
    match scale {
        0..=2 => 3,
        3..=4 => 4,
        _ => 5,
    }
}

/// 10^-`scale` second ticks since midnight to a time of day.
fn time_from_ticks(ticks: u64, scale: u8) -> Result<NaiveTime, WireError> {
    let ns_per_tick = 10u64.pow(9 - u32::from(scale.min(7)));
    let total_ns = ticks
        .checked_mul(ns_per_tick)
        .ok_or_else(|| WireError::malformed("TIME", format!("{ticks} ticks overflow")))?;
    let secs = (total_ns / 1_000_000_000) as u32;
    let nanos = (total_ns % 1_000_000_000) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
        .ok_or_else(|| WireError::malformed("TIME", format!("{ticks} ticks past midnight")))
}

fn datetime_from_wire(days: i32, third_seconds: u32) -> Result<NaiveDateTime, WireError> {
    let date = epoch_1900()
        .checked_add_signed(Duration::days(i64::from(days)))
        .ok_or_else(|| WireError::malformed("DATETIME", format!("{days} days out of range")))?;
    // Ticks are counts of 1/300 s; 1 tick = 10^7/3 ns.
    let ns = u64::from(third_seconds) * 10_000_000 / 3;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(
        (ns / 1_000_000_000) as u32,
        (ns % 1_000_000_000) as u32,
    )
    .ok_or_else(|| WireError::malformed("DATETIME", "time past midnight".to_string()))?;
    Ok(date.and_time(time))
}

fn smalldatetime_from_wire(days: u16, minutes: u16) -> Result<NaiveDateTime, WireError> {
    let date = epoch_1900()
        .checked_add_signed(Duration::days(i64::from(days)))
        .ok_or_else(|| WireError::malformed("SMALLDATETIME", format!("{days} days out of range")))?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(u32::from(minutes) * 60, 0)
        .ok_or_else(|| WireError::malformed("SMALLDATETIME", format!("{minutes} minutes")))?;
    Ok(date.and_time(time))
}

/// Decimal values always surface as [`Value::Decimal`]. `rust_decimal`
/// carries at most 28 fractional digits; a wire scale past that cannot be
/// represented without silently changing the value, so it is rejected.
fn decimal_from_wire(sign: u8, magnitude: u128, scale: u8) -> Result<Value, WireError> {
    if scale > 28 {
        return Err(WireError::malformed(
            "DECIMAL",
            format!("scale {scale} exceeds the representable maximum of 28"),
        ));
    }
    let mut decimal = Decimal::from_i128_with_scale(magnitude as i128, u32::from(scale));
    if sign == 0 {
        decimal.set_sign_negative(true);
    }
    Ok(Value::Decimal(decimal))
}

fn money_from_cents(cents: i64) -> Value {
    Value::Decimal(Decimal::from_i128_with_scale(i128::from(cents), 4))
}

/// Read a complete PLP stream; `None` is the NULL value.
///
/// When the declared total is known it must equal the sum of the chunk
/// lengths; the stream always ends with a zero-length chunk.
pub fn read_plp(src: &mut Bytes) -> Result<Option<Vec<u8>>, WireError> {
    ensure(src, 8)?;
    let total = src.get_u64_le();
    if total == PLP_NULL {
        return Ok(None);
    }

    let mut data = if total == PLP_UNKNOWN {
        Vec::new()
    } else {
        Vec::with_capacity(usize::try_from(total).unwrap_or(0))
    };

    loop {
        ensure(src, 4)?;
        let chunk_len = src.get_u32_le() as usize;
        if chunk_len == 0 {
            break;
        }
        ensure(src, chunk_len)?;
        data.extend_from_slice(&src[..chunk_len]);
        src.advance(chunk_len);
    }

    if total != PLP_UNKNOWN && data.len() as u64 != total {
        return Err(WireError::malformed(
            "PLP stream",
            format!("declared {total} bytes, chunks carried {}", data.len()),
        ));
    }

    Ok(Some(data))
}

/// The null bitmap leading an NBCROW: one bit per column, LSB first.
#[derive(Debug, Clone)]
pub struct NullBitmap {
    bits: Vec<u8>,
}

impl NullBitmap {
    /// Bytes a bitmap spans for `columns` columns.
    #[must_use]
    pub fn wire_len(columns: usize) -> usize {
        columns.div_ceil(8)
    }

    /// Read the bitmap for `columns` columns.
    pub fn read(src: &mut impl Buf, columns: usize) -> Result<Self, WireError> {
        let len = Self::wire_len(columns);
        ensure(src, len)?;
        let mut bits = vec![0u8; len];
        src.copy_to_slice(&mut bits);
        Ok(Self { bits })
    }

    /// Whether column `index` is NULL (and absent from the payload).
    #[must_use]
    pub fn is_null(&self, index: usize) -> bool {
        self.bits
            .get(index / 8)
            .is_some_and(|byte| byte & (1 << (index % 8)) != 0)
    }
}

/// Decode one value according to its type descriptor.
pub fn decode_value(src: &mut Bytes, meta: &TypeMeta) -> Result<Value, WireError> {
    match meta.ty {
        DataType::Null => Ok(Value::Null),

        DataType::Bit => {
            ensure(src, 1)?;
            Ok(Value::Bit(src.get_u8() != 0))
        }
        DataType::Int1 => {
            ensure(src, 1)?;
            Ok(Value::TinyInt(src.get_u8()))
        }
        DataType::Int2 => {
            ensure(src, 2)?;
            Ok(Value::SmallInt(src.get_i16_le()))
        }
        DataType::Int4 => {
            ensure(src, 4)?;
            Ok(Value::Int(src.get_i32_le()))
        }
        DataType::Int8 => {
            ensure(src, 8)?;
            Ok(Value::BigInt(src.get_i64_le()))
        }
        DataType::Float4 => {
            ensure(src, 4)?;
            Ok(Value::Real(src.get_f32_le()))
        }
        DataType::Float8 => {
            ensure(src, 8)?;
            Ok(Value::Float(src.get_f64_le()))
        }
        DataType::Money => {
            ensure(src, 8)?;
            let high = i64::from(src.get_i32_le());
            let low = i64::from(src.get_u32_le());
            Ok(money_from_cents((high << 32) | low))
        }
        DataType::Money4 => {
            ensure(src, 4)?;
            Ok(money_from_cents(i64::from(src.get_i32_le())))
        }
        DataType::DateTime => {
            ensure(src, 8)?;
            let days = src.get_i32_le();
            let ticks = src.get_u32_le();
            Ok(Value::DateTime(datetime_from_wire(days, ticks)?))
        }
        DataType::DateTime4 => {
            ensure(src, 4)?;
            let days = src.get_u16_le();
            let minutes = src.get_u16_le();
            Ok(Value::DateTime(smalldatetime_from_wire(days, minutes)?))
        }

        DataType::IntN => {
            ensure(src, 1)?;
            let len = src.get_u8();
            ensure(src, len as usize)?;
            match len {
                0 => Ok(Value::Null),
                1 => Ok(Value::TinyInt(src.get_u8())),
                2 => Ok(Value::SmallInt(src.get_i16_le())),
                4 => Ok(Value::Int(src.get_i32_le())),
                8 => Ok(Value::BigInt(src.get_i64_le())),
                other => Err(WireError::malformed("INTN", format!("length {other}"))),
            }
        }
        DataType::FloatN => {
            ensure(src, 1)?;
            let len = src.get_u8();
            ensure(src, len as usize)?;
            match len {
                0 => Ok(Value::Null),
                4 => Ok(Value::Real(src.get_f32_le())),
                8 => Ok(Value::Float(src.get_f64_le())),
                other => Err(WireError::malformed("FLTN", format!("length {other}"))),
            }
        }
        DataType::BitN => {
            ensure(src, 1)?;
            let len = src.get_u8();
            ensure(src, len as usize)?;
            match len {
                0 => Ok(Value::Null),
                1 => Ok(Value::Bit(src.get_u8() != 0)),
                other => Err(WireError::malformed("BITN", format!("length {other}"))),
            }
        }
        DataType::MoneyN => {
            ensure(src, 1)?;
            let len = src.get_u8();
            ensure(src, len as usize)?;
            match len {
                0 => Ok(Value::Null),
                4 => Ok(money_from_cents(i64::from(src.get_i32_le()))),
                8 => {
                    let high = i64::from(src.get_i32_le());
                    let low = i64::from(src.get_u32_le());
                    Ok(money_from_cents((high << 32) | low))
                }
                other => Err(WireError::malformed("MONEYN", format!("length {other}"))),
            }
        }
        DataType::DateTimeN => {
            ensure(src, 1)?;
            let len = src.get_u8();
            ensure(src, len as usize)?;
            match len {
                0 => Ok(Value::Null),
                4 => {
                    let days = src.get_u16_le();
                    let minutes = src.get_u16_le();
                    Ok(Value::DateTime(smalldatetime_from_wire(days, minutes)?))
                }
                8 => {
                    let days = src.get_i32_le();
                    let ticks = src.get_u32_le();
                    Ok(Value::DateTime(datetime_from_wire(days, ticks)?))
                }
                other => Err(WireError::malformed("DATETIMN", format!("length {other}"))),
            }
        }
        DataType::Guid => {
            ensure(src, 1)?;
            let len = src.get_u8();
            match len {
                0 => Ok(Value::Null),
                16 => Ok(Value::Guid(read_guid(src)?)),
                other => Err(WireError::malformed("GUID", format!("length {other}"))),
            }
        }

        DataType::Decimal | DataType::Numeric | DataType::DecimalN | DataType::NumericN => {
            ensure(src, 1)?;
            let len = src.get_u8() as usize;
            if len == 0 {
                return Ok(Value::Null);
            }
            ensure(src, len)?;
            let sign = src.get_u8();
            let mag_len = len - 1;
            if mag_len > 16 {
                return Err(WireError::malformed(
                    "DECIMAL",
                    format!("{mag_len}-byte magnitude"),
                ));
            }
            let mut raw = [0u8; 16];
            src.copy_to_slice(&mut raw[..mag_len]);
            let magnitude = u128::from_le_bytes(raw);
            decimal_from_wire(sign, magnitude, meta.scale.unwrap_or(0))
        }

        DataType::Char | DataType::VarChar => {
            ensure(src, 1)?;
            let len = src.get_u8() as usize;
            if len == 0 {
                return Ok(Value::Null);
            }
            ensure(src, len)?;
            let data = src.copy_to_bytes(len);
            Ok(Value::String(decode_mbcs(&data, meta.collation.as_ref())))
        }
        DataType::Binary | DataType::VarBinary => {
            ensure(src, 1)?;
            let len = src.get_u8() as usize;
            if len == 0 {
                return Ok(Value::Null);
            }
            ensure(src, len)?;
            Ok(Value::Binary(src.copy_to_bytes(len)))
        }

        DataType::BigChar | DataType::BigVarChar => {
            if meta.is_plp() {
                return Ok(match read_plp(src)? {
                    Some(data) => Value::String(decode_mbcs(&data, meta.collation.as_ref())),
                    None => Value::Null,
                });
            }
            ensure(src, 2)?;
            let len = src.get_u16_le();
            if len == SHORT_NULL {
                return Ok(Value::Null);
            }
            ensure(src, len as usize)?;
            let data = src.copy_to_bytes(len as usize);
            Ok(Value::String(decode_mbcs(&data, meta.collation.as_ref())))
        }
        DataType::NChar | DataType::NVarChar => {
            if meta.is_plp() {
                return Ok(match read_plp(src)? {
                    Some(data) => Value::String(utf16_le_to_string(&data)),
                    None => Value::Null,
                });
            }
            ensure(src, 2)?;
            let len = src.get_u16_le();
            if len == SHORT_NULL {
                return Ok(Value::Null);
            }
            ensure(src, len as usize)?;
            let data = src.copy_to_bytes(len as usize);
            Ok(Value::String(utf16_le_to_string(&data)))
        }
        DataType::BigBinary | DataType::BigVarBinary => {
            if meta.is_plp() {
                return Ok(match read_plp(src)? {
                    Some(data) => Value::Binary(Bytes::from(data)),
                    None => Value::Null,
                });
            }
            ensure(src, 2)?;
            let len = src.get_u16_le();
            if len == SHORT_NULL {
                return Ok(Value::Null);
            }
            ensure(src, len as usize)?;
            Ok(Value::Binary(src.copy_to_bytes(len as usize)))
        }

        DataType::Text | DataType::NText | DataType::Image => {
            // Text pointer, timestamp, then a 4-byte length and the data.
            ensure(src, 1)?;
            let ptr_len = src.get_u8() as usize;
            if ptr_len == 0 {
                return Ok(Value::Null);
            }
            ensure(src, ptr_len + 8 + 4)?;
            src.advance(ptr_len + 8);
            let len = src.get_u32_le() as usize;
            ensure(src, len)?;
            let data = src.copy_to_bytes(len);
            Ok(match meta.ty {
                DataType::Text => Value::String(decode_mbcs(&data, meta.collation.as_ref())),
                DataType::NText => Value::String(utf16_le_to_string(&data)),
                _ => Value::Binary(data),
            })
        }

        DataType::Date => {
            ensure(src, 1)?;
            let len = src.get_u8();
            match len {
                0 => Ok(Value::Null),
                3 => Ok(Value::Date(date_from_days(read_uint_le(src, 3)?)?)),
                other => Err(WireError::malformed("DATE", format!("length {other}"))),
            }
        }
        DataType::Time => {
            ensure(src, 1)?;
            let len = src.get_u8() as usize;
            if len == 0 {
                return Ok(Value::Null);
            }
            let scale = meta.scale.unwrap_or(7);
            let ticks = read_uint_le(src, len)?;
            Ok(Value::Time(time_from_ticks(ticks, scale)?))
        }
        DataType::DateTime2 => {
            ensure(src, 1)?;
            let len = src.get_u8() as usize;
            if len == 0 {
                return Ok(Value::Null);
            }
            if len < 4 {
                return Err(WireError::malformed("DATETIME2", format!("length {len}")));
            }
            let scale = meta.scale.unwrap_or(7);
            let ticks = read_uint_le(src, len - 3)?;
            let days = read_uint_le(src, 3)?;
            let time = time_from_ticks(ticks, scale)?;
            Ok(Value::DateTime(date_from_days(days)?.and_time(time)))
        }
        DataType::DateTimeOffset => {
            ensure(src, 1)?;
            let len = src.get_u8() as usize;
            if len == 0 {
                return Ok(Value::Null);
            }
            if len < 6 {
                return Err(WireError::malformed(
                    "DATETIMEOFFSET",
                    format!("length {len}"),
                ));
            }
            let scale = meta.scale.unwrap_or(7);
            let ticks = read_uint_le(src, len - 5)?;
            let days = read_uint_le(src, 3)?;
            ensure(src, 2)?;
            let offset_minutes = src.get_i16_le();
            if !(-840..=840).contains(&offset_minutes) {
                return Err(WireError::malformed(
                    "DATETIMEOFFSET",
                    format!("offset {offset_minutes} minutes"),
                ));
            }
            // The stored date/time is UTC; the offset is presentation only.
            let utc = date_from_days(days)?.and_time(time_from_ticks(ticks, scale)?);
            let offset = FixedOffset::east_opt(i32::from(offset_minutes) * 60).ok_or_else(|| {
                WireError::malformed("DATETIMEOFFSET", format!("offset {offset_minutes}"))
            })?;
            Ok(Value::DateTimeOffset(
                DateTime::<FixedOffset>::from_naive_utc_and_offset(utc, offset),
            ))
        }

        DataType::Variant => decode_variant(src),

        DataType::Xml => Ok(match read_plp(src)? {
            Some(data) => Value::Xml(utf16_le_to_string(&data)),
            None => Value::Null,
        }),
        DataType::Udt => Ok(match read_plp(src)? {
            Some(data) => Value::Binary(Bytes::from(data)),
            None => Value::Null,
        }),
    }
}

/// Decode a `sql_variant` cell.
///
/// Layout: u32 total length (0 = NULL), base type byte, property length
/// byte, properties, then the value bytes. The value carries no inner
/// length prefix: it is exactly `total - 2 - prop_len` bytes.
fn decode_variant(src: &mut Bytes) -> Result<Value, WireError> {
    ensure(src, 4)?;
    let total = src.get_u32_le() as usize;
    if total == 0 {
        return Ok(Value::Null);
    }
    ensure(src, total)?;
    let mut body = src.split_to(total);

    ensure(&body, 2)?;
    let base = DataType::from_u8(body.get_u8())?;
    let prop_len = body.get_u8() as usize;
    ensure(&body, prop_len)?;

    let inner = match base {
        DataType::Bit
        | DataType::Int1
        | DataType::Int2
        | DataType::Int4
        | DataType::Int8
        | DataType::Float4
        | DataType::Float8
        | DataType::Money
        | DataType::Money4
        | DataType::DateTime
        | DataType::DateTime4 => {
            body.advance(prop_len);
            decode_value(&mut body, &TypeMeta::plain(base))?
        }
        DataType::Guid => {
            body.advance(prop_len);
            Value::Guid(read_guid(&mut body)?)
        }
        DataType::Date => {
            body.advance(prop_len);
            Value::Date(date_from_days(read_uint_le(&mut body, 3)?)?)
        }
        DataType::Time | DataType::DateTime2 | DataType::DateTimeOffset => {
            ensure(&body, 1)?;
            let scale = body.get_u8();
            body.advance(prop_len.saturating_sub(1));
            let meta = TypeMeta {
                scale: Some(scale),
                ..TypeMeta::plain(base)
            };
            // The variant value is not length-prefixed; synthesise the
            // prefix decode_value expects from the remaining byte count.
            let mut prefixed = Vec::with_capacity(body.remaining() + 1);
            prefixed.push(body.remaining() as u8);
            prefixed.extend_from_slice(&body);
            body.advance(body.remaining());
            decode_value(&mut Bytes::from(prefixed), &meta)?
        }
        DataType::Decimal | DataType::Numeric | DataType::DecimalN | DataType::NumericN => {
            ensure(&body, 2)?;
            let _precision = body.get_u8();
            let scale = body.get_u8();
            body.advance(prop_len.saturating_sub(2));
            ensure(&body, 1)?;
            let sign = body.get_u8();
            let mag_len = body.remaining();
            if mag_len > 16 {
                return Err(WireError::malformed(
                    "sql_variant DECIMAL",
                    format!("{mag_len}-byte magnitude"),
                ));
            }
            let mut raw = [0u8; 16];
            body.copy_to_slice(&mut raw[..mag_len]);
            decimal_from_wire(sign, u128::from_le_bytes(raw), scale)?
        }
        DataType::BigChar | DataType::BigVarChar => {
            let collation = Collation::decode(&mut body)?;
            // The 2-byte declared max length is a property, not the value length.
            ensure(&body, 2)?;
            let _max_len = body.get_u16_le();
            let data = body.copy_to_bytes(body.remaining());
            Value::String(decode_mbcs(&data, Some(&collation)))
        }
        DataType::NChar | DataType::NVarChar => {
            let _collation = Collation::decode(&mut body)?;
            ensure(&body, 2)?;
            let _max_len = body.get_u16_le();
            // No inner length prefix: everything left is the UTF-16 value.
            tracing::debug!(
                remaining = body.remaining(),
                "sql_variant nvarchar without inner length prefix"
            );
            let data = body.copy_to_bytes(body.remaining());
            Value::String(utf16_le_to_string(&data))
        }
        DataType::BigBinary | DataType::BigVarBinary => {
            ensure(&body, 2)?;
            let _max_len = body.get_u16_le();
            Value::Binary(body.copy_to_bytes(body.remaining()))
        }
        other => {
            return Err(WireError::malformed(
                "sql_variant",
                format!("unsupported base type {other:?}"),
            ));
        }
    };

    if body.has_remaining() {
        return Err(WireError::malformed(
            "sql_variant",
            format!("{} trailing bytes after value", body.remaining()),
        ));
    }

    Ok(Value::Variant(Box::new(inner)))
}
