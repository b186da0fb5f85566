use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{OrmError, Result, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
    Timestamp,
}

impl DataType {
    pub fn is_compatible(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Integer, Value::Integer(_)) => true,
            (Self::Float, Value::Float(_)) => true,
            (Self::Float, Value::Integer(_)) => true,
            (Self::Text, Value::Text(_)) => true,
            (Self::Boolean, Value::Boolean(_)) => true,
            (Self::Timestamp, Value::Timestamp(_)) => true,
            _ => false,
        }
    }

    /// Integral types are the only ones an identity is generated for.
    pub fn is_integral(&self) -> bool {
        matches!(self, Self::Integer)
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, Self::Text)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "INTEGER"),
            Self::Float => write!(f, "FLOAT"),
            Self::Text => write!(f, "TEXT"),
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Timestamp => write!(f, "TIMESTAMP"),
        }
    }
}

/// Conversion contract between a Rust field type and [`Value`].
///
/// Every scalar field of an entity must implement it; the derive macro reads
/// `data_type()` and `nullable()` when it reflects the struct into a schema.
pub trait PersistValue: Sized {
    fn data_type() -> DataType;

    fn nullable() -> bool {
        false
    }

    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch(expected: DataType, value: &Value) -> OrmError {
    OrmError::TypeMismatch(format!(
        "expected {}, got {}",
        expected,
        value.type_name()
    ))
}

impl PersistValue for i64 {
    fn data_type() -> DataType {
        DataType::Integer
    }

    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Integer(i) => Ok(i),
            other => Err(mismatch(DataType::Integer, &other)),
        }
    }
}

impl PersistValue for i32 {
    fn data_type() -> DataType {
        DataType::Integer
    }

    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Integer(i) => i32::try_from(i).map_err(|_| {
                OrmError::TypeMismatch(format!("integer {} does not fit in i32", i))
            }),
            other => Err(mismatch(DataType::Integer, &other)),
        }
    }
}

impl PersistValue for u32 {
    fn data_type() -> DataType {
        DataType::Integer
    }

    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Integer(i) => u32::try_from(i).map_err(|_| {
                OrmError::TypeMismatch(format!("integer {} does not fit in u32", i))
            }),
            other => Err(mismatch(DataType::Integer, &other)),
        }
    }
}

impl PersistValue for f64 {
    fn data_type() -> DataType {
        DataType::Float
    }

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Integer(i) => Ok(i as f64),
            other => Err(mismatch(DataType::Float, &other)),
        }
    }
}

impl PersistValue for f32 {
    fn data_type() -> DataType {
        DataType::Float
    }

    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float(f) => Ok(f as f32),
            Value::Integer(i) => Ok(i as f32),
            other => Err(mismatch(DataType::Float, &other)),
        }
    }
}

impl PersistValue for bool {
    fn data_type() -> DataType {
        DataType::Boolean
    }

    fn to_value(&self) -> Value {
        Value::Boolean(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Boolean(b) => Ok(b),
            other => Err(mismatch(DataType::Boolean, &other)),
        }
    }
}

impl PersistValue for String {
    fn data_type() -> DataType {
        DataType::Text
    }

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(mismatch(DataType::Text, &other)),
        }
    }
}

impl PersistValue for DateTime<Utc> {
    fn data_type() -> DataType {
        DataType::Timestamp
    }

    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Timestamp(t) => Ok(t),
            other => Err(mismatch(DataType::Timestamp, &other)),
        }
    }
}

impl<T: PersistValue> PersistValue for Option<T> {
    fn data_type() -> DataType {
        T::data_type()
    }

    fn nullable() -> bool {
        true
    }

    fn to_value(&self) -> Value {
        match self {
            Some(value) => value.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_compatibility() {
        let int_type = DataType::Integer;
        assert!(int_type.is_compatible(&Value::Integer(42)));
        assert!(int_type.is_compatible(&Value::Null));
        assert!(!int_type.is_compatible(&Value::Text("hello".into())));
        assert!(DataType::Float.is_compatible(&Value::Integer(1)));
    }

    #[test]
    fn test_persist_value_conversions() {
        assert_eq!(42i64.to_value(), Value::Integer(42));
        assert_eq!(i64::from_value(Value::Integer(7)).unwrap(), 7);
        assert!(i64::from_value(Value::Text("7".into())).is_err());
        assert!(i32::from_value(Value::Integer(i64::MAX)).is_err());
        assert_eq!(Option::<String>::from_value(Value::Null).unwrap(), None);
        assert!(<Option<i64> as PersistValue>::nullable());
        assert!(!<i64 as PersistValue>::nullable());
    }
}
