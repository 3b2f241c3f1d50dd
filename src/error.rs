//! Error types for zero-pgx.

use std::num::ParseIntError;

use thiserror::Error;

/// Result type for zero-pgx operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Fields of a server ErrorResponse or NoticeResponse.
#[derive(Debug, Clone, Default)]
pub struct ErrorFields {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// Non-localized severity
    pub severity_non_localized: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    /// Context/stack trace
    pub where_: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Data type name
    pub data_type: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
    /// Source routine name
    pub routine: Option<String>,
}

impl ErrorFields {
    /// Severity, preferring the non-localized form.
    pub fn severity(&self) -> Option<&str> {
        self.severity_non_localized
            .as_deref()
            .or(self.severity.as_deref())
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = self.severity() {
            write!(f, "{}: ", severity)?;
        }
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(position) = self.position {
            write!(f, " at position {}", position)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// Error type for zero-pgx.
#[derive(Debug, Error)]
pub enum Error {
    /// Unterminated quote, identifier, dollar quote or comment in SQL text
    #[error("SQL syntax error at offset {position}: {message}")]
    Syntax {
        /// What was left open
        message: String,
        /// Byte offset where the open construct starts
        position: usize,
    },

    /// Command completion tag with a count that is not a base-10 integer
    #[error("Unable to parse the count in command completion tag: {tag}")]
    MalformedTag {
        /// The raw tag sent by the server
        tag: String,
        /// The underlying integer parse failure
        #[source]
        source: ParseIntError,
    },

    /// A value cannot be converted to the requested wire type
    #[error("{}", cannot_coerce_message(.value, .target))]
    CannotCoerce {
        /// The rejected literal, when the value has a textual form
        value: Option<String>,
        /// Name of the target type
        target: &'static str,
    },

    /// A value has no representation in the target numeric type
    #[error("Bad value for type {target} : {value}")]
    NumericOutOfRange {
        /// The rejected literal
        value: String,
        /// Name of the target type
        target: &'static str,
    },

    /// A stream parameter did not match its declared length
    #[error("Stream length mismatch: declared {declared} bytes, {}", stream_detail(.actual))]
    StreamLength {
        /// Length declared by the caller
        declared: i64,
        /// Bytes actually available, if the stream was read
        actual: Option<u64>,
    },

    /// Protocol error (malformed message, unexpected response, etc.)
    ///
    /// The connection cannot be used afterwards.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error reported by the server
    #[error("PostgreSQL error: {0}")]
    Server(ErrorFields),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection is broken and cannot be reused
    #[error("Connection is broken")]
    ConnectionBroken,

    /// Invalid usage (e.g., wrong number of parameters)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// A result value cannot be decoded into the requested type
    #[error("Decode error: {0}")]
    Decode(String),

    /// A batch failed after some of its rows completed
    #[error("Batch entry {} failed: {source}", .completed.len())]
    Batch {
        /// Per-row counts of the rows that completed before the failure
        completed: Vec<Option<u64>>,
        /// The failure
        #[source]
        source: Box<Error>,
    },
}

fn cannot_coerce_message(value: &Option<String>, target: &str) -> String {
    match value {
        Some(value) => format!("Cannot cast to {}: \"{}\"", target, value),
        None => format!("Cannot cast to {}", target),
    }
}

fn stream_detail(actual: &Option<u64>) -> String {
    match actual {
        Some(actual) => format!("stream provided {}", actual),
        None => "length is out of range".to_string(),
    }
}

impl Error {
    /// Returns true if the error indicates the connection is broken and cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::ConnectionBroken | Error::Protocol(_) => true,
            Error::Server(fields) => matches!(fields.severity(), Some("FATAL") | Some("PANIC")),
            Error::Batch { source, .. } => source.is_connection_broken(),
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.code.as_deref(),
            Error::Batch { source, .. } => source.sqlstate(),
            _ => None,
        }
    }

    pub(crate) fn coerce(value: impl Into<String>, target: &'static str) -> Self {
        Error::CannotCoerce {
            value: Some(value.into()),
            target,
        }
    }
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized>
    From<zerocopy::error::CastError<Src, Dst>> for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::Protocol(format!("zerocopy cast error: {err:?}"))
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}
