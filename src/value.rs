use std::borrow::Cow;
use std::fmt::{self, Write};

use serde_json::{Value, json};

use crate::guid::Guid;

/// A decoded payload field.
///
/// Borrowed variants point into the record payload and live as long as the bound view.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'a> {
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Real32(f32),
    Real64(f64),
    Bool(bool),
    Guid(Guid),
    /// A pointer-sized value, widened to 64 bits.
    Pointer(u64),
    /// A varint-encoded unsigned integer.
    VarUInt(u64),
    String(Cow<'a, str>),
    Binary(&'a [u8]),
}

impl<'a> FieldValue<'a> {
    /// Integral variants, widened to `i64` when lossless.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            FieldValue::Int8(v) => Some(i64::from(v)),
            FieldValue::UInt8(v) => Some(i64::from(v)),
            FieldValue::Int16(v) => Some(i64::from(v)),
            FieldValue::UInt16(v) => Some(i64::from(v)),
            FieldValue::Int32(v) => Some(i64::from(v)),
            FieldValue::UInt32(v) => Some(i64::from(v)),
            FieldValue::Int64(v) => Some(v),
            FieldValue::UInt64(v) | FieldValue::Pointer(v) | FieldValue::VarUInt(v) => {
                i64::try_from(v).ok()
            }
            _ => None,
        }
    }

    /// Integral variants, widened to `u64` when non-negative.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            FieldValue::UInt64(v) | FieldValue::Pointer(v) | FieldValue::VarUInt(v) => Some(v),
            _ => self.as_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            FieldValue::Real32(v) => Some(f64::from(v)),
            FieldValue::Real64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(&**s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match *self {
            FieldValue::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Int8(v) => json!(v),
            FieldValue::UInt8(v) => json!(v),
            FieldValue::Int16(v) => json!(v),
            FieldValue::UInt16(v) => json!(v),
            FieldValue::Int32(v) => json!(v),
            FieldValue::UInt32(v) => json!(v),
            FieldValue::Int64(v) => json!(v),
            FieldValue::UInt64(v) | FieldValue::VarUInt(v) => json!(v),
            FieldValue::Real32(v) => json!(v),
            FieldValue::Real64(v) => json!(v),
            FieldValue::Bool(v) => json!(v),
            FieldValue::Guid(_) | FieldValue::Pointer(_) | FieldValue::Binary(_) => {
                Value::String(self.to_string())
            }
            FieldValue::String(s) => Value::String(s.to_string()),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(2 + bytes.len() * 2);
    s.push_str("0x");
    for b in bytes {
        write!(s, "{:02X}", b).expect("writing to a String cannot fail");
    }
    s
}

impl fmt::Display for FieldValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int8(v) => write!(f, "{}", v),
            FieldValue::UInt8(v) => write!(f, "{}", v),
            FieldValue::Int16(v) => write!(f, "{}", v),
            FieldValue::UInt16(v) => write!(f, "{}", v),
            FieldValue::Int32(v) => write!(f, "{}", v),
            FieldValue::UInt32(v) => write!(f, "{}", v),
            FieldValue::Int64(v) => write!(f, "{}", v),
            FieldValue::UInt64(v) | FieldValue::VarUInt(v) => write!(f, "{}", v),
            FieldValue::Real32(v) => write!(f, "{}", v),
            FieldValue::Real64(v) => write!(f, "{}", v),
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::Guid(v) => write!(f, "{}", v),
            FieldValue::Pointer(v) => write!(f, "0x{:X}", v),
            FieldValue::String(s) => f.write_str(s),
            FieldValue::Binary(b) => f.write_str(&hex(b)),
        }
    }
}

/// Conversion from a decoded field into a concrete Rust type.
pub trait FromFieldValue<'a>: Sized {
    /// Human readable name of the accepted field kind, used in type-mismatch errors.
    const EXPECTED: &'static str;

    fn from_field_value(value: FieldValue<'a>) -> Option<Self>;
}

from_field_value!(i8, "an int8", Int8);
from_field_value!(u8, "a uint8", UInt8);
from_field_value!(i16, "an int16", Int16);
from_field_value!(u16, "a uint16", UInt16);
from_field_value!(i32, "an int32", Int32);
from_field_value!(u32, "a uint32", UInt32);
from_field_value!(i64, "an int64", Int64);
from_field_value!(u64, "an unsigned 64-bit value", UInt64, Pointer, VarUInt);
from_field_value!(f32, "a float", Real32);
from_field_value!(f64, "a double", Real64);
from_field_value!(bool, "a boolean", Bool);
from_field_value!(Guid, "a GUID", Guid);

impl<'a> FromFieldValue<'a> for Cow<'a, str> {
    const EXPECTED: &'static str = "a string";

    fn from_field_value(value: FieldValue<'a>) -> Option<Self> {
        match value {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl<'a> FromFieldValue<'a> for &'a [u8] {
    const EXPECTED: &'static str = "a byte array";

    fn from_field_value(value: FieldValue<'a>) -> Option<Self> {
        match value {
            FieldValue::Binary(b) => Some(b),
            _ => None,
        }
    }
}

impl<'a> FromFieldValue<'a> for String {
    const EXPECTED: &'static str = "a string";

    fn from_field_value(value: FieldValue<'a>) -> Option<Self> {
        match value {
            FieldValue::String(s) => Some(s.into_owned()),
            _ => None,
        }
    }
}
