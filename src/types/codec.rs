//! Per-type encode and decode functions, looked up by wire type.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};

use super::coerce;
use super::numeric::numeric_to_string;
use super::value::Value;

type EncodeText = fn(&Value, &mut String) -> Result<()>;
type EncodeBinary = fn(&Value, &mut Vec<u8>) -> Result<()>;
type Decode = fn(&[u8]) -> Result<Value>;

/// Codec for one wire type.
pub struct Codec {
    pub oid: Oid,
    pub name: &'static str,
    /// Result columns of this type may be requested in binary
    pub binary_results: bool,
    /// Parameters of this type are sent in binary when allowed
    pub binary_params: bool,
    pub encode_text: EncodeText,
    pub encode_binary: EncodeBinary,
    pub decode_text: Decode,
    pub decode_binary: Decode,
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("oid", &self.oid)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

macro_rules! codec {
    ($oid:expr, $name:literal, $bin_results:literal, $bin_params:literal,
     $enc_text:expr, $enc_bin:expr, $dec_text:expr, $dec_bin:expr) => {
        Codec {
            oid: $oid,
            name: $name,
            binary_results: $bin_results,
            binary_params: $bin_params,
            encode_text: $enc_text,
            encode_binary: $enc_bin,
            decode_text: $dec_text,
            decode_binary: $dec_bin,
        }
    };
}

static CODECS: &[Codec] = &[
    codec!(oid::BOOL, "bool", true, true, text_bool, bin_bool, dec_text_bool, dec_bin_bool),
    codec!(oid::BYTEA, "bytea", true, true, text_bytea, bin_bytea, dec_text_bytea, dec_bin_bytes),
    codec!(oid::NAME, "name", true, false, text_any, no_binary, dec_text, dec_bin_text),
    codec!(oid::INT8, "int8", true, true, text_int8, bin_int8, dec_text_int8, dec_bin_int8),
    codec!(oid::INT2, "int2", true, true, text_int2, bin_int2, dec_text_int2, dec_bin_int2),
    codec!(oid::INT4, "int4", true, true, text_int4, bin_int4, dec_text_int4, dec_bin_int4),
    codec!(oid::TEXT, "text", true, false, text_any, no_binary, dec_text, dec_bin_text),
    codec!(oid::OID, "oid", true, true, text_oid, bin_oid, dec_text_int8, dec_bin_oid),
    codec!(oid::JSON, "json", true, false, text_any, no_binary, dec_text, dec_bin_text),
    codec!(oid::FLOAT4, "float4", true, true, text_float4, bin_float4, dec_text_float4, dec_bin_float4),
    codec!(oid::FLOAT8, "float8", true, true, text_float8, bin_float8, dec_text_float8, dec_bin_float8),
    codec!(oid::UNKNOWN, "unknown", false, false, text_any, no_binary, dec_text, dec_bin_text),
    codec!(oid::BPCHAR, "bpchar", true, false, text_any, no_binary, dec_text, dec_bin_text),
    codec!(oid::VARCHAR, "varchar", true, false, text_any, no_binary, dec_text, dec_bin_text),
    codec!(oid::DATE, "date", false, false, text_any, no_binary, dec_text, no_decode),
    codec!(oid::TIME, "time", false, false, text_any, no_binary, dec_text, no_decode),
    codec!(oid::TIMESTAMP, "timestamp", false, false, text_any, no_binary, dec_text, no_decode),
    codec!(oid::TIMESTAMPTZ, "timestamptz", false, false, text_any, no_binary, dec_text, no_decode),
    codec!(oid::NUMERIC, "numeric", true, false, text_numeric, no_binary, dec_text_numeric, dec_bin_numeric),
    codec!(oid::UUID, "uuid", true, false, text_any, no_binary, dec_text, dec_bin_uuid),
    codec!(oid::JSONB, "jsonb", false, false, text_any, no_binary, dec_text, no_decode),
];

/// Codec for `oid`, if it is a built-in type.
pub fn lookup(oid: Oid) -> Option<&'static Codec> {
    CODECS.iter().find(|c| c.oid == oid)
}

/// Write `value` as a length-prefixed parameter for wire type `target`.
///
/// Binary is used only when `binary_ok` and the codec supports binary
/// parameters; unknown and unspecified types always travel as text. On
/// error nothing is left in `buf`.
pub fn encode(value: &Value, target: Oid, binary_ok: bool, buf: &mut Vec<u8>) -> Result<FormatCode> {
    if value.is_null() {
        buf.extend_from_slice(&(-1_i32).to_be_bytes());
        return Ok(FormatCode::Text);
    }

    let start = buf.len();
    buf.extend_from_slice(&[0; 4]);

    let result = match lookup(target) {
        Some(codec) if binary_ok && codec.binary_params => {
            (codec.encode_binary)(value, buf).map(|()| FormatCode::Binary)
        }
        Some(codec) => {
            let mut text = String::new();
            (codec.encode_text)(value, &mut text).map(|()| {
                buf.extend_from_slice(text.as_bytes());
                FormatCode::Text
            })
        }
        None => {
            if let Some(text) = value.to_text() {
                buf.extend_from_slice(text.as_bytes());
            }
            Ok(FormatCode::Text)
        }
    };

    let len = result.and_then(|format| {
        i32::try_from(buf.len() - start - 4)
            .map(|len| (format, len))
            .map_err(|_| Error::InvalidUsage("parameter value exceeds 2 GiB".into()))
    });
    match len {
        Ok((format, len)) => {
            if let Some(slot) = buf.get_mut(start..start + 4) {
                slot.copy_from_slice(&len.to_be_bytes());
            }
            Ok(format)
        }
        Err(e) => {
            buf.truncate(start);
            Err(e)
        }
    }
}

/// Decode a non-NULL column value of wire type `oid`.
pub fn decode(oid: Oid, format: FormatCode, bytes: &[u8]) -> Result<Value> {
    match (lookup(oid), format) {
        (Some(codec), FormatCode::Text) => (codec.decode_text)(bytes),
        (Some(codec), FormatCode::Binary) => (codec.decode_binary)(bytes),
        (None, FormatCode::Text) => dec_text(bytes),
        (None, FormatCode::Binary) => Ok(Value::Bytes(bytes.to_vec())),
    }
}

// === Text encoders ===

fn text_any(value: &Value, out: &mut String) -> Result<()> {
    if let Some(text) = value.to_text() {
        out.push_str(&text);
    }
    Ok(())
}

fn text_bool(value: &Value, out: &mut String) -> Result<()> {
    out.push(if coerce::to_bool(value)? { 't' } else { 'f' });
    Ok(())
}

fn text_bytea(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Bytes(_) | Value::Text(_) => text_any(value, out),
        _ => Err(Error::CannotCoerce {
            value: value.literal(),
            target: "bytea",
        }),
    }
}

macro_rules! text_int {
    ($name:ident, $t:ty, $target:literal) => {
        fn $name(value: &Value, out: &mut String) -> Result<()> {
            let v: $t = coerce::narrow(value, $target)?;
            out.push_str(&v.to_string());
            Ok(())
        }
    };
}

text_int!(text_int2, i16, "int2");
text_int!(text_int4, i32, "int4");
text_int!(text_int8, i64, "int8");
text_int!(text_oid, u32, "oid");

fn text_float4(value: &Value, out: &mut String) -> Result<()> {
    let v = coerce::to_f32(value, "float4")?;
    text_any(&Value::Float4(v), out)
}

fn text_float8(value: &Value, out: &mut String) -> Result<()> {
    let v = coerce::to_f64(value, "float8")?;
    text_any(&Value::Float8(v), out)
}

fn text_numeric(value: &Value, out: &mut String) -> Result<()> {
    match value {
        // The server's numeric accepts the float specials
        Value::Float4(v) if !v.is_finite() => text_any(value, out),
        Value::Float8(v) if !v.is_finite() => text_any(value, out),
        _ => {
            out.push_str(&coerce::to_decimal(value)?.to_string());
            Ok(())
        }
    }
}

// === Binary encoders ===

fn no_binary(_: &Value, _: &mut Vec<u8>) -> Result<()> {
    Err(Error::InvalidUsage("type has no binary parameter format".into()))
}

fn bin_bool(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    buf.push(u8::from(coerce::to_bool(value)?));
    Ok(())
}

fn bin_bytea(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Bytes(b) => buf.extend_from_slice(b),
        Value::Text(s) => buf.extend_from_slice(s.as_bytes()),
        _ => {
            return Err(Error::CannotCoerce {
                value: value.literal(),
                target: "bytea",
            });
        }
    }
    Ok(())
}

macro_rules! bin_int {
    ($name:ident, $t:ty, $target:literal) => {
        fn $name(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
            let v: $t = coerce::narrow(value, $target)?;
            buf.extend_from_slice(&v.to_be_bytes());
            Ok(())
        }
    };
}

bin_int!(bin_int2, i16, "int2");
bin_int!(bin_int4, i32, "int4");
bin_int!(bin_int8, i64, "int8");
bin_int!(bin_oid, u32, "oid");

fn bin_float4(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    let v = coerce::to_f32(value, "float4")?;
    buf.extend_from_slice(&v.to_be_bytes());
    Ok(())
}

fn bin_float8(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    let v = coerce::to_f64(value, "float8")?;
    buf.extend_from_slice(&v.to_be_bytes());
    Ok(())
}

// === Text decoders ===

fn utf8(bytes: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))
}

fn dec_text(bytes: &[u8]) -> Result<Value> {
    Ok(Value::Text(utf8(bytes)?.to_string()))
}

fn dec_text_bool(bytes: &[u8]) -> Result<Value> {
    let s = utf8(bytes)?;
    coerce::parse_bool(s)
        .map(Value::Bool)
        .ok_or_else(|| Error::coerce(s, "boolean"))
}

macro_rules! dec_text_int {
    ($name:ident, $variant:ident) => {
        fn $name(bytes: &[u8]) -> Result<Value> {
            let s = utf8(bytes)?;
            s.parse()
                .map(Value::$variant)
                .map_err(|e| Error::Decode(format!("invalid {}: {}: {}", stringify!($variant), s, e)))
        }
    };
}

dec_text_int!(dec_text_int2, Int2);
dec_text_int!(dec_text_int4, Int4);
dec_text_int!(dec_text_int8, Int8);

fn dec_text_float4(bytes: &[u8]) -> Result<Value> {
    let s = utf8(bytes)?;
    let wide = coerce::parse_float(s).ok_or_else(|| Error::Decode(format!("invalid float4: {}", s)))?;
    coerce::narrow_float(wide)
        .map(Value::Float4)
        .ok_or_else(|| Error::NumericOutOfRange {
            value: s.to_string(),
            target: "float4",
        })
}

fn dec_text_float8(bytes: &[u8]) -> Result<Value> {
    let s = utf8(bytes)?;
    coerce::parse_float(s)
        .map(Value::Float8)
        .ok_or_else(|| Error::Decode(format!("invalid float8: {}", s)))
}

/// Values outside `Decimal`'s range (and the specials) stay textual.
fn numeric_value(s: &str) -> Value {
    match Decimal::from_str(s) {
        Ok(d) => Value::Numeric(d),
        Err(_) => Value::Text(s.to_string()),
    }
}

fn dec_text_numeric(bytes: &[u8]) -> Result<Value> {
    Ok(numeric_value(utf8(bytes)?))
}

fn dec_text_bytea(bytes: &[u8]) -> Result<Value> {
    let Some(hex) = bytes.strip_prefix(b"\\x") else {
        return Ok(Value::Bytes(bytes.to_vec()));
    };
    if hex.len() % 2 != 0 {
        return Err(Error::Decode("odd-length bytea hex value".into()));
    }
    let nibble = |c: u8| -> Result<u8> {
        match c {
            b'0'..=b'9' => Ok(c - b'0'),
            b'a'..=b'f' => Ok(c - b'a' + 10),
            b'A'..=b'F' => Ok(c - b'A' + 10),
            _ => Err(Error::Decode(format!("invalid hex digit '{}'", c as char))),
        }
    };
    hex.chunks_exact(2)
        .map(|pair| Ok((nibble(pair[0])? << 4) | nibble(pair[1])?))
        .collect::<Result<Vec<u8>>>()
        .map(Value::Bytes)
}

// === Binary decoders ===

fn no_decode(_: &[u8]) -> Result<Value> {
    Err(Error::Decode("type has no binary result format".into()))
}

fn fixed<const N: usize>(bytes: &[u8], name: &str) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| Error::Decode(format!("invalid {} length: {}", name, bytes.len())))
}

fn dec_bin_bool(bytes: &[u8]) -> Result<Value> {
    let [b] = fixed::<1>(bytes, "bool")?;
    Ok(Value::Bool(b != 0))
}

fn dec_bin_bytes(bytes: &[u8]) -> Result<Value> {
    Ok(Value::Bytes(bytes.to_vec()))
}

fn dec_bin_text(bytes: &[u8]) -> Result<Value> {
    dec_text(bytes)
}

fn dec_bin_int2(bytes: &[u8]) -> Result<Value> {
    Ok(Value::Int2(i16::from_be_bytes(fixed(bytes, "int2")?)))
}

fn dec_bin_int4(bytes: &[u8]) -> Result<Value> {
    Ok(Value::Int4(i32::from_be_bytes(fixed(bytes, "int4")?)))
}

fn dec_bin_int8(bytes: &[u8]) -> Result<Value> {
    Ok(Value::Int8(i64::from_be_bytes(fixed(bytes, "int8")?)))
}

fn dec_bin_oid(bytes: &[u8]) -> Result<Value> {
    Ok(Value::Int8(i64::from(u32::from_be_bytes(fixed(bytes, "oid")?))))
}

fn dec_bin_float4(bytes: &[u8]) -> Result<Value> {
    Ok(Value::Float4(f32::from_be_bytes(fixed(bytes, "float4")?)))
}

fn dec_bin_float8(bytes: &[u8]) -> Result<Value> {
    Ok(Value::Float8(f64::from_be_bytes(fixed(bytes, "float8")?)))
}

fn dec_bin_numeric(bytes: &[u8]) -> Result<Value> {
    Ok(numeric_value(&numeric_to_string(bytes)?))
}

fn dec_bin_uuid(bytes: &[u8]) -> Result<Value> {
    let b: [u8; 16] = fixed(bytes, "uuid")?;
    let hex: String = b.iter().map(|byte| format!("{:02x}", byte)).collect();
    Ok(Value::Text(format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: &Value, target: Oid, binary_ok: bool) -> (FormatCode, Vec<u8>) {
        let mut buf = Vec::new();
        let format = encode(value, target, binary_ok, &mut buf).unwrap();
        (format, buf)
    }

    #[test]
    fn test_lookup() {
        assert_eq!(lookup(oid::INT4).unwrap().name, "int4");
        assert!(lookup(oid::NUMERIC).unwrap().binary_results);
        assert!(!lookup(oid::NUMERIC).unwrap().binary_params);
        assert!(lookup(99999).is_none());
    }

    #[test]
    fn test_encode_binary_int() {
        let (format, buf) = encoded(&Value::from(7_i32), oid::INT8, true);
        assert_eq!(format, FormatCode::Binary);
        assert_eq!(buf, [0, 0, 0, 8, 0, 0, 0, 0, 0, 0, 0, 7]);
    }

    #[test]
    fn test_encode_text_when_binary_disallowed() {
        let (format, buf) = encoded(&Value::from(7_i32), oid::INT4, false);
        assert_eq!(format, FormatCode::Text);
        assert_eq!(buf, [0, 0, 0, 1, b'7']);
    }

    #[test]
    fn test_encode_null() {
        let (format, buf) = encoded(&Value::Null, oid::INT4, true);
        assert_eq!(format, FormatCode::Text);
        assert_eq!(buf, [0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_encode_bool_from_string() {
        let (format, buf) = encoded(&Value::from("yes"), oid::BOOL, true);
        assert_eq!(format, FormatCode::Binary);
        assert_eq!(buf, [0, 0, 0, 1, 1]);

        let mut buf = vec![9];
        let err = encode(&Value::from("X"), oid::BOOL, true, &mut buf).unwrap_err();
        assert_eq!(err.to_string(), "Cannot cast to boolean: \"X\"");
        assert_eq!(buf, [9]);
    }

    #[test]
    fn test_numeric_always_text() {
        let (format, buf) = encoded(&Value::from(Decimal::new(314, 2)), oid::NUMERIC, true);
        assert_eq!(format, FormatCode::Text);
        assert_eq!(&buf[4..], b"3.14");

        let (_, buf) = encoded(&Value::from(f64::NAN), oid::NUMERIC, true);
        assert_eq!(&buf[4..], b"NaN");
    }

    #[test]
    fn test_strings_always_text() {
        let (format, buf) = encoded(&Value::from("héllo"), oid::VARCHAR, true);
        assert_eq!(format, FormatCode::Text);
        assert_eq!(&buf[4..], "héllo".as_bytes());

        let (format, _) = encoded(&Value::from("x"), oid::UNSPECIFIED, true);
        assert_eq!(format, FormatCode::Text);
    }

    #[test]
    fn test_float_specials_roundtrip_text() {
        for v in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let (format, buf) = encoded(&Value::Float8(v), oid::FLOAT8, false);
            assert_eq!(format, FormatCode::Text);
            let back = decode(oid::FLOAT8, FormatCode::Text, &buf[4..]).unwrap();
            match back {
                Value::Float8(b) if v.is_nan() => assert!(b.is_nan()),
                Value::Float8(b) => assert_eq!(b, v),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_decode_numeric_special_stays_text() {
        let v = decode(oid::NUMERIC, FormatCode::Text, b"NaN").unwrap();
        assert_eq!(v, Value::Text("NaN".into()));
        let v = decode(oid::NUMERIC, FormatCode::Text, b"-12.50").unwrap();
        assert_eq!(v, Value::Numeric(Decimal::new(-1250, 2)));
    }

    #[test]
    fn test_decode_bytea_hex() {
        let v = decode(oid::BYTEA, FormatCode::Text, b"\\xDEad").unwrap();
        assert_eq!(v, Value::Bytes(vec![0xde, 0xad]));
        assert!(decode(oid::BYTEA, FormatCode::Text, b"\\xzz").is_err());
    }

    #[test]
    fn test_decode_uuid_binary() {
        let bytes: Vec<u8> = (0..16).collect();
        let v = decode(oid::UUID, FormatCode::Binary, &bytes).unwrap();
        assert_eq!(
            v,
            Value::Text("00010203-0405-0607-0809-0a0b0c0d0e0f".into())
        );
    }

    #[test]
    fn test_decode_unknown_oid() {
        assert_eq!(
            decode(424242, FormatCode::Text, b"abc").unwrap(),
            Value::Text("abc".into())
        );
    }
}
