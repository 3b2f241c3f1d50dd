//! Conversions between values of different wire types.
//!
//! These rules decide what a parameter may be sent as, and what a result
//! column may be read as. None of them fall back to a default: a value that
//! has no exact counterpart in the target type is an error.

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{Error, Result};

use super::value::Value;

fn coerce_error(value: &Value, target: &'static str) -> Error {
    Error::CannotCoerce {
        value: value.literal(),
        target,
    }
}

/// Parse the boolean vocabulary: t/f, true/false, y/n, yes/no, on/off, 1/0.
///
/// Case-insensitive; surrounding whitespace is ignored.
pub fn parse_bool(s: &str) -> Option<bool> {
    let s = s.trim();
    const TRUE: [&str; 6] = ["t", "true", "y", "yes", "on", "1"];
    const FALSE: [&str; 6] = ["f", "false", "n", "no", "off", "0"];
    if TRUE.iter().any(|w| s.eq_ignore_ascii_case(w)) {
        Some(true)
    } else if FALSE.iter().any(|w| s.eq_ignore_ascii_case(w)) {
        Some(false)
    } else {
        None
    }
}

/// Numbers equal to 0 or 1 and the boolean vocabulary convert; nothing else does.
pub fn to_bool(value: &Value) -> Result<bool> {
    let b = match value {
        Value::Bool(b) => Some(*b),
        Value::Int2(v) => int_bool(i64::from(*v)),
        Value::Int4(v) => int_bool(i64::from(*v)),
        Value::Int8(v) => int_bool(*v),
        Value::Float4(v) => float_bool(f64::from(*v)),
        Value::Float8(v) => float_bool(*v),
        Value::Numeric(v) => {
            if v.is_zero() {
                Some(false)
            } else if *v == Decimal::ONE {
                Some(true)
            } else {
                None
            }
        }
        Value::Text(s) => parse_bool(s),
        Value::Char(c) => parse_bool(c.encode_utf8(&mut [0; 4])),
        Value::Bytes(_) | Value::Null => None,
    };
    b.ok_or_else(|| coerce_error(value, "boolean"))
}

fn int_bool(v: i64) -> Option<bool> {
    match v {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    }
}

fn float_bool(v: f64) -> Option<bool> {
    if v == 0.0 {
        Some(false)
    } else if v == 1.0 {
        Some(true)
    } else {
        None
    }
}

/// Integral values only; `target` names the type in errors.
pub fn to_i64(value: &Value, target: &'static str) -> Result<i64> {
    match value {
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Int2(v) => Ok(i64::from(*v)),
        Value::Int4(v) => Ok(i64::from(*v)),
        Value::Int8(v) => Ok(*v),
        Value::Float4(v) => float_to_i64(f64::from(*v), value, target),
        Value::Float8(v) => float_to_i64(*v, value, target),
        Value::Numeric(d) => decimal_to_i64(*d, value, target),
        Value::Text(s) => {
            let s = s.trim();
            if let Ok(v) = s.parse::<i64>() {
                return Ok(v);
            }
            match parse_decimal(s) {
                Some(d) => decimal_to_i64(d, value, target),
                None => Err(coerce_error(value, target)),
            }
        }
        Value::Char(c) => c
            .to_digit(10)
            .map(i64::from)
            .ok_or_else(|| coerce_error(value, target)),
        Value::Bytes(_) | Value::Null => Err(coerce_error(value, target)),
    }
}

fn float_to_i64(v: f64, value: &Value, target: &'static str) -> Result<i64> {
    if !v.is_finite() || v.fract() != 0.0 {
        return Err(coerce_error(value, target));
    }
    if v < i64::MIN as f64 || v >= i64::MAX as f64 {
        return Err(out_of_range(value, target));
    }
    Ok(v as i64)
}

fn decimal_to_i64(d: Decimal, value: &Value, target: &'static str) -> Result<i64> {
    if !d.fract().is_zero() {
        return Err(coerce_error(value, target));
    }
    d.to_i64().ok_or_else(|| out_of_range(value, target))
}

fn out_of_range(value: &Value, target: &'static str) -> Error {
    Error::NumericOutOfRange {
        value: value.literal().unwrap_or_default(),
        target,
    }
}

/// Narrow to a smaller integer type.
pub fn narrow<T: TryFrom<i64>>(value: &Value, target: &'static str) -> Result<T> {
    T::try_from(to_i64(value, target)?).map_err(|_| out_of_range(value, target))
}

/// Parse a float, including the `NaN`, `Infinity` and `-Infinity` tokens.
pub fn parse_float(s: &str) -> Option<f64> {
    let s = s.trim();
    match special_float_token(s) {
        Some("NaN") => Some(f64::NAN),
        Some("Infinity") => Some(f64::INFINITY),
        Some(_) => Some(f64::NEG_INFINITY),
        None => s.parse().ok().filter(|v: &f64| v.is_finite()),
    }
}

pub fn to_f64(value: &Value, target: &'static str) -> Result<f64> {
    match value {
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Int2(v) => Ok(f64::from(*v)),
        Value::Int4(v) => Ok(f64::from(*v)),
        Value::Int8(v) => Ok(*v as f64),
        Value::Float4(v) => Ok(f64::from(*v)),
        Value::Float8(v) => Ok(*v),
        Value::Numeric(d) => d.to_f64().ok_or_else(|| coerce_error(value, target)),
        Value::Text(s) => parse_float(s).ok_or_else(|| coerce_error(value, target)),
        Value::Char(_) | Value::Bytes(_) | Value::Null => Err(coerce_error(value, target)),
    }
}

/// Narrow to f32. A finite value beyond the f32 range is an error.
pub fn to_f32(value: &Value, target: &'static str) -> Result<f32> {
    let wide = to_f64(value, target)?;
    narrow_float(wide).ok_or_else(|| out_of_range(value, target))
}

/// `None` when a finite `v` would become infinite as f32.
pub fn narrow_float(v: f64) -> Option<f32> {
    let narrowed = v as f32;
    if v.is_finite() && narrowed.is_infinite() {
        None
    } else {
        Some(narrowed)
    }
}

/// Plain decimal or scientific notation, without the float specials.
fn is_numeric_literal(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'))
        && s.parse::<f64>().is_ok()
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

/// Exact decimal value. Float specials have no decimal form.
pub fn to_decimal(value: &Value) -> Result<Decimal> {
    const TARGET: &str = "Decimal";
    match value {
        Value::Bool(b) => Ok(if *b { Decimal::ONE } else { Decimal::ZERO }),
        Value::Int2(v) => Ok(Decimal::from(*v)),
        Value::Int4(v) => Ok(Decimal::from(*v)),
        Value::Int8(v) => Ok(Decimal::from(*v)),
        Value::Float4(_) | Value::Float8(_) => {
            let text = value.literal().unwrap_or_default();
            match parse_decimal(&text) {
                Some(d) => Ok(d),
                None => Err(Error::NumericOutOfRange {
                    value: text,
                    target: TARGET,
                }),
            }
        }
        Value::Numeric(d) => Ok(*d),
        Value::Text(s) => {
            let s = s.trim();
            if let Some(special) = special_float_token(s) {
                return Err(Error::NumericOutOfRange {
                    value: special.to_string(),
                    target: TARGET,
                });
            }
            match parse_decimal(s) {
                Some(d) => Ok(d),
                None if is_numeric_literal(s) => Err(Error::NumericOutOfRange {
                    value: s.to_string(),
                    target: TARGET,
                }),
                None => Err(coerce_error(value, TARGET)),
            }
        }
        Value::Char(_) | Value::Bytes(_) | Value::Null => Err(coerce_error(value, TARGET)),
    }
}

fn special_float_token(s: &str) -> Option<&'static str> {
    match s {
        "NaN" => Some("NaN"),
        "Infinity" | "+Infinity" => Some("Infinity"),
        "-Infinity" => Some("-Infinity"),
        _ => None,
    }
}

/// Round half away from zero to `scale` digits and pad to exactly `scale`.
pub fn rescale(d: Decimal, scale: u32) -> Decimal {
    let mut d = d.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    d.rescale(scale);
    d
}
