//! NUMERIC binary format.
//!
//! Header of four big-endian 16-bit fields (ndigits, weight, sign, dscale)
//! followed by `ndigits` base-10000 digits. `weight` is the power of 10000
//! of the first digit.

use std::fmt::Write;

use crate::error::{Error, Result};
use crate::protocol::codec::{read_i16, read_u16};

const SIGN_NEG: u16 = 0x4000;
const SIGN_NAN: u16 = 0xC000;
const SIGN_PINF: u16 = 0xD000;
const SIGN_NINF: u16 = 0xF000;

fn truncated(_: Error) -> Error {
    Error::Decode("truncated NUMERIC value".into())
}

/// Render a binary NUMERIC as its text form (`NaN`, `Infinity` and
/// `-Infinity` included).
pub fn numeric_to_string(bytes: &[u8]) -> Result<String> {
    let (ndigits, rest) = read_i16(bytes).map_err(truncated)?;
    let (weight, rest) = read_i16(rest).map_err(truncated)?;
    let (sign, rest) = read_u16(rest).map_err(truncated)?;
    let (dscale, mut rest) = read_u16(rest).map_err(truncated)?;

    match sign {
        SIGN_NAN => return Ok("NaN".to_string()),
        SIGN_PINF => return Ok("Infinity".to_string()),
        SIGN_NINF => return Ok("-Infinity".to_string()),
        0 | SIGN_NEG => {}
        _ => return Err(Error::Decode(format!("invalid NUMERIC sign: {:#x}", sign))),
    }

    let ndigits = usize::try_from(ndigits)
        .map_err(|_| Error::Decode(format!("invalid NUMERIC digit count: {}", ndigits)))?;
    let mut digits = Vec::with_capacity(ndigits);
    for _ in 0..ndigits {
        let (d, r) = read_i16(rest).map_err(truncated)?;
        if !(0..10000).contains(&d) {
            return Err(Error::Decode(format!("invalid NUMERIC digit: {}", d)));
        }
        digits.push(d);
        rest = r;
    }

    let weight = i32::from(weight);
    let group = |i: i32| -> i16 {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == SIGN_NEG && !digits.iter().all(|&d| d == 0) {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        let _ = write!(out, "{}", group(0));
        for i in 1..=weight {
            let _ = write!(out, "{:04}", group(i));
        }
    }

    if dscale > 0 {
        out.push('.');
        let start = out.len();
        let mut i = weight + 1;
        while out.len() - start < usize::from(dscale) {
            let _ = write!(out, "{:04}", group(i));
            i += 1;
        }
        out.truncate(start + usize::from(dscale));
    }

    Ok(out)
}
