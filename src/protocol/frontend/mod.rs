//! Frontend (client → server) messages.

pub mod extended;
pub mod simple;

pub use extended::{
    write_bind, write_close_statement, write_describe_portal, write_describe_statement,
    write_execute, write_parse, write_sync,
};
pub use simple::write_query;

/// Frontend message type bytes.
pub mod msg_type {
    /// Query (simple query protocol)
    pub const QUERY: u8 = b'Q';
    /// Parse
    pub const PARSE: u8 = b'P';
    /// Bind
    pub const BIND: u8 = b'B';
    /// Execute
    pub const EXECUTE: u8 = b'E';
    /// Describe
    pub const DESCRIBE: u8 = b'D';
    /// Close
    pub const CLOSE: u8 = b'C';
    /// Sync
    pub const SYNC: u8 = b'S';
}

/// Target of a Describe or Close message.
pub mod target {
    /// Prepared statement
    pub const STATEMENT: u8 = b'S';
    /// Portal
    pub const PORTAL: u8 = b'P';
}
