//! Result rows and typed value access.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tds_wire::{ColumnMeta, Value};
use uuid::Uuid;

use crate::error::Error;

/// One row of a result set: the shared column layout plus decoded values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[ColumnMeta]>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[ColumnMeta]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// The column layout.
    #[must_use]
    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The raw value at `index`.
    #[must_use]
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// The raw value of the named column.
    #[must_use]
    pub fn value_by_name(&self, name: &str) -> Option<&Value> {
        let index = self
            .columns
            .iter()
            .position(|column| column.name.eq_ignore_ascii_case(name))?;
        self.values.get(index)
    }

    /// Whether the value at `index` is NULL.
    #[must_use]
    pub fn is_null(&self, index: usize) -> bool {
        self.values.get(index).is_none_or(Value::is_null)
    }

    /// Convert the value at `index` to `T`.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T, Error> {
        let value = self.values.get(index).ok_or_else(|| Error::Conversion {
            column: index.to_string(),
            from: "missing column",
            to: std::any::type_name::<T>(),
        })?;
        T::from_value(value).ok_or_else(|| Error::Conversion {
            column: self
                .columns
                .get(index)
                .map_or_else(|| index.to_string(), |column| column.name.clone()),
            from: value.type_name(),
            to: std::any::type_name::<T>(),
        })
    }

    /// Convert the named column's value to `T`.
    pub fn get_by_name<T: FromValue>(&self, name: &str) -> Result<T, Error> {
        let index = self
            .columns
            .iter()
            .position(|column| column.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::Conversion {
                column: name.to_owned(),
                from: "missing column",
                to: std::any::type_name::<T>(),
            })?;
        self.get(index)
    }

    /// Iterate the raw values.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    /// Take ownership of the values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Conversion from a decoded [`Value`] into a Rust type.
pub trait FromValue: Sized {
    /// Convert, returning `None` when the value does not fit.
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for u8 {
    fn from_value(value: &Value) -> Option<Self> {
        match value.base() {
            Value::TinyInt(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for i16 {
    fn from_value(value: &Value) -> Option<Self> {
        match value.base() {
            Value::TinyInt(v) => Some(i16::from(*v)),
            Value::SmallInt(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i32()
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Option<Self> {
        match value.base() {
            Value::Real(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
}

impl FromValue for Bytes {
    fn from_value(value: &Value) -> Option<Self> {
        match value.base() {
            Value::Binary(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bytes().map(<[u8]>::to_vec)
    }
}

impl FromValue for Decimal {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_decimal()
    }
}

impl FromValue for Uuid {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_guid()
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_date()
    }
}

impl FromValue for NaiveTime {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_time()
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_datetime()
    }
}

impl FromValue for DateTime<FixedOffset> {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_datetime_offset()
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Option<Self> {
        if value.is_null() {
            Some(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_wire::meta::TypeMeta;
    use tds_wire::{ColumnFlags, DataType};

    fn columns(names: &[&str]) -> Arc<[ColumnMeta]> {
        names
            .iter()
            .enumerate()
            .map(|(ordinal, name)| ColumnMeta {
                name: (*name).to_owned(),
                ordinal,
                user_type: 0,
                flags: ColumnFlags::default(),
                meta: TypeMeta::plain(DataType::Int4),
                table_name: None,
            })
            .collect()
    }

    #[test]
    fn typed_access() {
        let row = Row::new(columns(&["id", "name"]), vec![
            Value::Int(7),
            Value::String("alice".into()),
        ]);

        assert_eq!(row.get::<i32>(0).unwrap(), 7);
        assert_eq!(row.get::<i64>(0).unwrap(), 7);
        assert_eq!(row.get_by_name::<String>("NAME").unwrap(), "alice");
        assert!(row.get::<bool>(0).is_err());
    }

    #[test]
    fn nulls_through_option() {
        let row = Row::new(columns(&["a"]), vec![Value::Null]);
        assert_eq!(row.get::<Option<i32>>(0).unwrap(), None);
        assert!(row.is_null(0));
        assert!(row.get::<i32>(0).is_err());
    }

    #[test]
    fn conversion_error_names_column() {
        let row = Row::new(columns(&["total"]), vec![Value::String("x".into())]);
        let err = row.get::<i32>(0).unwrap_err();
        assert!(err.to_string().contains("total"));
    }
}
