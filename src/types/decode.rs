//! Decoding result columns into Rust types.

use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};

use super::value::Value;
use super::{FromWireValue, codec, coerce};

fn value(oid: Oid, format: FormatCode, bytes: &[u8]) -> Result<Value> {
    codec::decode(oid, format, bytes)
}

impl FromWireValue<'_> for Value {
    fn from_null() -> Result<Self> {
        Ok(Value::Null)
    }

    fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
        value(oid, FormatCode::Text, bytes)
    }

    fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
        value(oid, FormatCode::Binary, bytes)
    }
}

/// Decode through `Value`, then convert with `$convert`.
macro_rules! via_value {
    ($t:ty, |$v:ident| $convert:expr) => {
        impl FromWireValue<'_> for $t {
            fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
                let $v = value(oid, FormatCode::Text, bytes)?;
                $convert
            }

            fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
                let $v = value(oid, FormatCode::Binary, bytes)?;
                $convert
            }
        }
    };
}

via_value!(bool, |v| coerce::to_bool(&v));
via_value!(i16, |v| coerce::narrow(&v, "int2"));
via_value!(i32, |v| coerce::narrow(&v, "int4"));
via_value!(i64, |v| coerce::to_i64(&v, "int8"));
via_value!(f32, |v| coerce::to_f32(&v, "float4"));
via_value!(f64, |v| coerce::to_f64(&v, "float8"));
via_value!(Decimal, |v| coerce::to_decimal(&v));
via_value!(String, |v| match v.to_text() {
    Some(text) => Ok(text.into_owned()),
    None => Err(Error::Decode("unexpected NULL value".into())),
});
via_value!(Vec<u8>, |v| match v {
    Value::Bytes(b) => Ok(b),
    Value::Text(s) => Ok(s.into_bytes()),
    other => Err(Error::CannotCoerce {
        value: other.literal(),
        target: "bytea",
    }),
});

impl<'a> FromWireValue<'a> for &'a str {
    fn from_text(_oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        simdutf8::compat::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))
    }

    fn from_binary(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        // The binary form of these types is their UTF-8 text
        match oid {
            oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME | oid::JSON | oid::UNKNOWN => {
                Self::from_text(oid, bytes)
            }
            _ => Err(Error::Decode(format!(
                "cannot borrow binary value of oid {} as str",
                oid
            ))),
        }
    }
}

impl<'a> FromWireValue<'a> for &'a [u8] {
    fn from_text(_oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        Ok(bytes)
    }

    fn from_binary(_oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        Ok(bytes)
    }
}
