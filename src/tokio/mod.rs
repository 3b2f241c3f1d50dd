//! Asynchronous driver over a tokio `AsyncRead + AsyncWrite` stream.

mod conn;
mod stream;

pub use conn::Conn;
