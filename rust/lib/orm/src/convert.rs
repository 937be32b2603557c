//! Scalar coercion between native field types and driver values.
//!
//! Every mapped field type implements [`Scalar`]. Reading goes through one
//! coercion function per value kind, so a column stored with a different
//! affinity (an integer in a text column, a date kept as text) still loads.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use treeorm_sql::Value;
use treeorm_sql::traits::TIME_FORMAT;

use crate::error::OrmError;
use crate::model::DataType;

/// Native type of a described field, before it is mapped to a column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeType {
    Bool,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    String,
    Bytes,
    DateTime,
    /// A type with no column mapping; registration rejects it.
    Unsupported(&'static str),
}

impl NativeType {
    pub fn data_type(self) -> Option<DataType> {
        match self {
            NativeType::Bool => Some(DataType::Bool),
            NativeType::I32 | NativeType::U32 => Some(DataType::Int32),
            NativeType::I64 | NativeType::U64 => Some(DataType::Int64),
            NativeType::F32 | NativeType::F64 => Some(DataType::Float),
            NativeType::String => Some(DataType::String),
            NativeType::Bytes => Some(DataType::Blob),
            NativeType::DateTime => Some(DataType::DateTime),
            NativeType::Unsupported(_) => None,
        }
    }
}

/// A Rust type that can be stored in a single column.
pub trait Scalar: Sized + Send + Sync + 'static {
    const NATIVE: NativeType;
    const NULLABLE: bool = false;

    fn to_value(&self) -> Value;

    fn from_value(value: &Value) -> Result<Self, OrmError>;
}

fn cannot(value: &Value, target: &str) -> OrmError {
    OrmError::Conversion(format!("cannot convert {} value {:?} to {}", value.kind(), value, target))
}

fn utf8(bytes: &[u8], target: &str) -> Result<String, OrmError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| OrmError::Conversion(format!("{target}: blob is not utf-8: {e}")))
}

pub fn to_bool(value: &Value) -> Result<bool, OrmError> {
    match value {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(*b),
        Value::Integer(i) => Ok(*i != 0),
        Value::Text(s) => parse_bool(s).ok_or_else(|| cannot(value, "bool")),
        Value::Blob(b) if b.len() == 1 => Ok(b[0] != 0),
        Value::Blob(b) => parse_bool(&utf8(b, "bool")?).ok_or_else(|| cannot(value, "bool")),
        _ => Err(cannot(value, "bool")),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

pub fn to_i64(value: &Value) -> Result<i64, OrmError> {
    match value {
        Value::Null => Ok(0),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Integer(i) => Ok(*i),
        Value::Text(s) => s.trim().parse().map_err(|_| cannot(value, "integer")),
        Value::Blob(b) => utf8(b, "integer")?
            .trim()
            .parse()
            .map_err(|_| cannot(value, "integer")),
        _ => Err(cannot(value, "integer")),
    }
}

pub fn to_f64(value: &Value) -> Result<f64, OrmError> {
    match value {
        Value::Null => Ok(0.0),
        Value::Integer(i) => Ok(*i as f64),
        Value::Real(f) => Ok(*f),
        Value::Text(s) => s.trim().parse().map_err(|_| cannot(value, "float")),
        Value::Blob(b) => utf8(b, "float")?
            .trim()
            .parse()
            .map_err(|_| cannot(value, "float")),
        _ => Err(cannot(value, "float")),
    }
}

pub fn to_text(value: &Value) -> Result<String, OrmError> {
    match value {
        Value::Null => Ok(String::new()),
        Value::Text(s) => Ok(s.clone()),
        Value::Blob(b) => utf8(b, "string"),
        _ => Err(cannot(value, "string")),
    }
}

pub fn to_blob(value: &Value) -> Result<Vec<u8>, OrmError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Blob(b) => Ok(b.clone()),
        Value::Text(s) => Ok(s.as_bytes().to_vec()),
        _ => Err(cannot(value, "blob")),
    }
}

pub fn to_timestamp(value: &Value) -> Result<NaiveDateTime, OrmError> {
    match value {
        Value::Null => Ok(DateTime::<Utc>::UNIX_EPOCH.naive_utc()),
        Value::Timestamp(t) => Ok(*t),
        Value::Text(s) => parse_timestamp(s),
        Value::Blob(b) => parse_timestamp(&utf8(b, "timestamp")?),
        Value::Integer(secs) => DateTime::<Utc>::from_timestamp(*secs, 0)
            .map(|t| t.naive_utc())
            .ok_or_else(|| cannot(value, "timestamp")),
        _ => Err(cannot(value, "timestamp")),
    }
}

/// Zero dates such as `0000-00-00 00:00:00` load as the epoch.
fn is_zero_date(s: &str) -> bool {
    let mut has_digit = false;
    for c in s.chars() {
        if c.is_ascii_digit() {
            if c != '0' {
                return false;
            }
            has_digit = true;
        } else if !(c.is_ascii_punctuation() || c.is_whitespace()) {
            return false;
        }
    }
    has_digit
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, OrmError> {
    let invalid = || OrmError::Conversion(format!("invalid time string: {s:?}"));
    if is_zero_date(s) {
        return Ok(DateTime::<Utc>::UNIX_EPOCH.naive_utc());
    }
    match s.len() {
        10 => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(|d| d.and_time(chrono::NaiveTime::MIN))
            .map_err(|_| invalid()),
        19 => NaiveDateTime::parse_from_str(s, TIME_FORMAT).map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

impl Scalar for bool {
    const NATIVE: NativeType = NativeType::Bool;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: &Value) -> Result<Self, OrmError> {
        to_bool(value)
    }
}

impl Scalar for i64 {
    const NATIVE: NativeType = NativeType::I64;

    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }

    fn from_value(value: &Value) -> Result<Self, OrmError> {
        to_i64(value)
    }
}

// Unsigned 64-bit values are stored bit-for-bit in the signed column.
impl Scalar for u64 {
    const NATIVE: NativeType = NativeType::U64;

    fn to_value(&self) -> Value {
        Value::Integer(*self as i64)
    }

    fn from_value(value: &Value) -> Result<Self, OrmError> {
        to_i64(value).map(|i| i as u64)
    }
}

macro_rules! narrow_int_scalar {
    ($ty:ty, $native:expr) => {
        impl Scalar for $ty {
            const NATIVE: NativeType = $native;

            fn to_value(&self) -> Value {
                Value::Integer(i64::from(*self))
            }

            fn from_value(value: &Value) -> Result<Self, OrmError> {
                let wide = to_i64(value)?;
                <$ty>::try_from(wide).map_err(|_| {
                    OrmError::Conversion(format!("{} out of range for {}", wide, stringify!($ty)))
                })
            }
        }
    };
}

narrow_int_scalar!(i32, NativeType::I32);
narrow_int_scalar!(u32, NativeType::U32);
narrow_int_scalar!(i16, NativeType::Unsupported("i16"));
narrow_int_scalar!(u16, NativeType::Unsupported("u16"));
narrow_int_scalar!(i8, NativeType::Unsupported("i8"));
narrow_int_scalar!(u8, NativeType::Unsupported("u8"));

impl Scalar for f64 {
    const NATIVE: NativeType = NativeType::F64;

    fn to_value(&self) -> Value {
        Value::Real(*self)
    }

    fn from_value(value: &Value) -> Result<Self, OrmError> {
        to_f64(value)
    }
}

impl Scalar for f32 {
    const NATIVE: NativeType = NativeType::F32;

    fn to_value(&self) -> Value {
        Value::Real(f64::from(*self))
    }

    fn from_value(value: &Value) -> Result<Self, OrmError> {
        to_f64(value).map(|f| f as f32)
    }
}

impl Scalar for String {
    const NATIVE: NativeType = NativeType::String;

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: &Value) -> Result<Self, OrmError> {
        to_text(value)
    }
}

impl Scalar for Vec<u8> {
    const NATIVE: NativeType = NativeType::Bytes;

    fn to_value(&self) -> Value {
        Value::Blob(self.clone())
    }

    fn from_value(value: &Value) -> Result<Self, OrmError> {
        to_blob(value)
    }
}

impl Scalar for NaiveDateTime {
    const NATIVE: NativeType = NativeType::DateTime;

    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }

    fn from_value(value: &Value) -> Result<Self, OrmError> {
        to_timestamp(value)
    }
}

impl Scalar for DateTime<Utc> {
    const NATIVE: NativeType = NativeType::DateTime;

    fn to_value(&self) -> Value {
        Value::Timestamp(self.naive_utc())
    }

    fn from_value(value: &Value) -> Result<Self, OrmError> {
        to_timestamp(value).map(|t| Utc.from_utc_datetime(&t))
    }
}

impl<T: Scalar> Scalar for Option<T> {
    const NATIVE: NativeType = T::NATIVE;
    const NULLABLE: bool = true;

    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: &Value) -> Result<Self, OrmError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
