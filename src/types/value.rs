//! Dynamically typed values.

use std::borrow::Cow;
use std::fmt::Write;

use rust_decimal::Decimal;

use crate::opts::StringType;
use crate::protocol::types::{Oid, oid};

/// A parameter or result value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Numeric(Decimal),
    Text(String),
    Char(char),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The wire type this value is sent as when the caller names none.
    pub fn natural_oid(&self, string_type: StringType) -> Oid {
        match self {
            Value::Null => oid::UNSPECIFIED,
            Value::Bool(_) => oid::BOOL,
            Value::Int2(_) => oid::INT2,
            Value::Int4(_) => oid::INT4,
            Value::Int8(_) => oid::INT8,
            Value::Float4(_) => oid::FLOAT4,
            Value::Float8(_) => oid::FLOAT8,
            Value::Numeric(_) => oid::NUMERIC,
            Value::Text(_) | Value::Char(_) => match string_type {
                StringType::Varchar => oid::VARCHAR,
                StringType::Unspecified => oid::UNSPECIFIED,
            },
            Value::Bytes(_) => oid::BYTEA,
        }
    }

    /// Text form as the server parses it. `None` for NULL.
    pub fn to_text(&self) -> Option<Cow<'_, str>> {
        let text = match self {
            Value::Null => return None,
            Value::Bool(true) => Cow::Borrowed("t"),
            Value::Bool(false) => Cow::Borrowed("f"),
            Value::Int2(v) => Cow::Owned(v.to_string()),
            Value::Int4(v) => Cow::Owned(v.to_string()),
            Value::Int8(v) => Cow::Owned(v.to_string()),
            Value::Float4(v) => Cow::Owned(float_text(f64::from(*v), v.to_string())),
            Value::Float8(v) => Cow::Owned(float_text(*v, v.to_string())),
            Value::Numeric(v) => Cow::Owned(v.to_string()),
            Value::Text(s) => Cow::Borrowed(s.as_str()),
            Value::Char(c) => Cow::Owned(c.to_string()),
            Value::Bytes(b) => {
                let mut s = String::with_capacity(2 + b.len() * 2);
                s.push_str("\\x");
                for byte in b {
                    let _ = write!(s, "{:02x}", byte);
                }
                Cow::Owned(s)
            }
        };
        Some(text)
    }

    /// The literal used in error messages, if the value has one.
    pub(crate) fn literal(&self) -> Option<String> {
        match self {
            Value::Bytes(_) | Value::Null => None,
            _ => self.to_text().map(Cow::into_owned),
        }
    }
}

/// `Infinity`, `-Infinity` and `NaN` are spelled the way the server spells them.
pub(crate) fn float_text(v: f64, finite: String) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "Infinity".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        finite
    }
}

macro_rules! impl_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from!(
    bool => Bool,
    i16 => Int2,
    i32 => Int4,
    i64 => Int8,
    f32 => Float4,
    f64 => Float8,
    Decimal => Numeric,
    String => Text,
    &str => Text,
    char => Char,
    Vec<u8> => Bytes,
    &[u8] => Bytes,
);

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_oid() {
        assert_eq!(Value::from(1_i32).natural_oid(StringType::Varchar), oid::INT4);
        assert_eq!(Value::from("a").natural_oid(StringType::Varchar), oid::VARCHAR);
        assert_eq!(Value::from('a').natural_oid(StringType::Unspecified), 0);
        assert_eq!(Value::Null.natural_oid(StringType::Varchar), 0);
    }

    #[test]
    fn test_float_text() {
        assert_eq!(Value::from(f64::NAN).to_text().unwrap(), "NaN");
        assert_eq!(Value::from(f32::INFINITY).to_text().unwrap(), "Infinity");
        assert_eq!(Value::from(f64::NEG_INFINITY).to_text().unwrap(), "-Infinity");
        assert_eq!(Value::from(1.5_f64).to_text().unwrap(), "1.5");
    }

    #[test]
    fn test_bytes_text() {
        assert_eq!(Value::from(&[0xde_u8, 0xad][..]).to_text().unwrap(), "\\xdead");
        assert_eq!(Value::Null.to_text(), None);
    }
}
