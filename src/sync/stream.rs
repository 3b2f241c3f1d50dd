use std::io::{BufReader, Read, Write};

use crate::buffer_set::BufferSet;
use crate::error::Result;
use crate::protocol::codec::read_header;

/// A caller-supplied connected byte stream with buffered reads.
pub struct Stream<S> {
    inner: BufReader<S>,
}

impl<S: Read + Write> Stream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufReader::new(stream),
        }
    }

    pub fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.inner.get_mut().write_all(buf)
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.inner.get_mut().flush()
    }

    /// Read one framed message into `buffer_set`.
    pub fn read_message(&mut self, buffer_set: &mut BufferSet) -> Result<()> {
        let mut header = [0u8; 5];
        self.inner.read_exact(&mut header)?;
        let (type_byte, payload_len) = read_header(header)?;

        buffer_set.type_byte = type_byte;
        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.resize(payload_len, 0);
        self.inner.read_exact(&mut buffer_set.read_buffer)?;
        Ok(())
    }

    pub fn get_ref(&self) -> &S {
        self.inner.get_ref()
    }

    /// The stream, dropping any buffered unread bytes.
    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }
}
