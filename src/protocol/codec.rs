//! Wire encoding and decoding primitives.
//!
//! All integers are big-endian. Every message after startup is framed as a
//! type byte, an i32 length that counts itself, and the payload.

use zerocopy::FromBytes;

use crate::error::{Error, Result};

use super::types::{I16BE, I32BE, U16BE, U32BE};

/// Largest message the session accepts from the server.
pub const MAX_MESSAGE_LEN: usize = 1 << 30;

macro_rules! read_be {
    ($(#[$doc:meta])* $fn_name:ident, $native:ty, $wrapper:ty, $len:literal) => {
        $(#[$doc])*
        #[inline]
        pub fn $fn_name(data: &[u8]) -> Result<($native, &[u8])> {
            let (head, rest) = data.split_at_checked($len).ok_or_else(|| {
                Error::Protocol(format!(
                    concat!(stringify!($fn_name), ": buffer too short: {} < ", $len),
                    data.len()
                ))
            })?;
            let value = <$wrapper>::read_from_bytes(head)
                .map_err(|e| Error::Protocol(format!(concat!(stringify!($fn_name), ": {:?}"), e)))?
                .get();
            Ok((value, rest))
        }
    };
}

read_be!(
    /// Read a big-endian i16.
    read_i16, i16, I16BE, 2
);
read_be!(
    /// Read a big-endian u16.
    read_u16, u16, U16BE, 2
);
read_be!(
    /// Read a big-endian i32.
    read_i32, i32, I32BE, 4
);
read_be!(
    /// Read a big-endian u32.
    read_u32, u32, U32BE, 4
);

/// Read one byte.
#[inline]
pub fn read_u8(data: &[u8]) -> Result<(u8, &[u8])> {
    match data.split_first() {
        Some((&b, rest)) => Ok((b, rest)),
        None => Err(Error::Protocol("read_u8: empty buffer".into())),
    }
}

/// Read a null-terminated string, returning the bytes without the terminator.
#[inline]
pub fn read_cstring(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let pos = memchr::memchr(0, data)
        .ok_or_else(|| Error::Protocol("read_cstring: no null terminator found".into()))?;
    let (s, rest) = data.split_at(pos);
    Ok((s, rest.get(1..).unwrap_or_default()))
}

/// Read a null-terminated UTF-8 string.
#[inline]
pub fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let (bytes, rest) = read_cstring(data)?;
    let s = simdutf8::basic::from_utf8(bytes)
        .map_err(|e| Error::Protocol(format!("read_cstr: invalid UTF-8: {e}")))?;
    Ok((s, rest))
}

/// Decode a 5-byte message header into the type byte and payload length.
pub fn read_header(header: [u8; 5]) -> Result<(u8, usize)> {
    let [type_byte, a, b, c, d] = header;
    let length = i32::from_be_bytes([a, b, c, d]);
    let payload_len = usize::try_from(length)
        .ok()
        .and_then(|len| len.checked_sub(4))
        .ok_or_else(|| {
            Error::Protocol(format!(
                "Invalid length {} for message '{}'",
                length, type_byte as char
            ))
        })?;
    if payload_len > MAX_MESSAGE_LEN {
        return Err(Error::Protocol(format!(
            "Message '{}' too large: {} bytes",
            type_byte as char, payload_len
        )));
    }
    Ok((type_byte, payload_len))
}

/// Write a big-endian i16.
#[inline]
pub fn write_i16(out: &mut Vec<u8>, value: i16) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write a big-endian u16.
#[inline]
pub fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write a big-endian i32.
#[inline]
pub fn write_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write a big-endian u32.
#[inline]
pub fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write a null-terminated string.
///
/// A NUL inside `s` would end the string early on the server, so it is rejected.
#[inline]
pub fn write_cstr(out: &mut Vec<u8>, s: &str) -> Result<()> {
    if let Some(pos) = memchr::memchr(0, s.as_bytes()) {
        return Err(Error::InvalidUsage(format!(
            "string contains a NUL byte at offset {}",
            pos
        )));
    }
    out.extend_from_slice(s.as_bytes());
    out.push(0);
    Ok(())
}

/// Builds one framed message, back-filling the length on `finish`.
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Start a message with the given type byte.
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        let start = buf.len();
        buf.extend_from_slice(&[0; 4]);
        Self { buf, start }
    }

    /// Raw access for writers that emit pre-encoded sections.
    pub fn buf(&mut self) -> &mut Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        write_i16(self.buf, value);
    }

    pub fn write_u16(&mut self, value: u16) {
        write_u16(self.buf, value);
    }

    pub fn write_i32(&mut self, value: i32) {
        write_i32(self.buf, value);
    }

    pub fn write_u32(&mut self, value: u32) {
        write_u32(self.buf, value);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn write_cstr(&mut self, s: &str) -> Result<()> {
        write_cstr(self.buf, s)
    }

    /// Fill in the length field.
    ///
    /// Fails when the message does not fit the i32 length.
    pub fn finish(self) -> Result<()> {
        let size = self.buf.len() - self.start;
        let len = i32::try_from(size)
            .map_err(|_| Error::InvalidUsage(format!("message of {} bytes is too large", size)))?;
        if let Some(slot) = self.buf.get_mut(self.start..self.start + 4) {
            slot.copy_from_slice(&len.to_be_bytes());
        }
        Ok(())
    }
}
