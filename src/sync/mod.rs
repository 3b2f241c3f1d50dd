//! Synchronous driver over a blocking `Read + Write` stream.

mod conn;
mod stream;

pub use conn::Conn;
