//! Buffers shared between the state machines and the I/O drivers.

/// Reusable buffers owned by a connection.
///
/// State machines write outgoing messages into `write_buffer` and read the
/// payload of the last incoming message from `read_buffer`. Drivers only move
/// bytes between these buffers and the stream.
#[derive(Debug)]
pub struct BufferSet {
    /// Payload of the last message read (without type byte and length)
    pub read_buffer: Vec<u8>,
    /// Messages waiting to be written
    pub write_buffer: Vec<u8>,
    /// RowDescription payload of the current result set
    pub column_buffer: Vec<u8>,
    /// Type byte of the last message read
    pub type_byte: u8,
}

impl BufferSet {
    pub fn new() -> Self {
        Self {
            read_buffer: Vec::with_capacity(8192),
            write_buffer: Vec::with_capacity(8192),
            column_buffer: Vec::with_capacity(512),
            type_byte: 0,
        }
    }

    /// Store a RowDescription payload for the rows that follow.
    pub fn set_columns(&mut self, payload: &[u8]) {
        self.column_buffer.clear();
        self.column_buffer.extend_from_slice(payload);
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}
