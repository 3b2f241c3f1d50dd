//! Extended query protocol core for PostgreSQL.
//!
//! # Features
//!
//! - **Sans-I/O state machines**: Protocol logic is separated from I/O
//! - **Statement promotion**: SQL executed often enough becomes a named
//!   server-side statement, with invalidation when parameter types change
//! - **Batch rewriting**: single-row INSERT batches become multi-row INSERTs
//! - **Sync and async APIs**: blocking `Read + Write` or tokio streams
//!
//! The caller brings a connected, authenticated stream.
//!
//! # Example
//!
//! ```no_run
//! use zero_pgx::sync::Conn;
//! use zero_pgx::Opts;
//!
//! fn main() -> zero_pgx::Result<()> {
//!     let stream = std::net::TcpStream::connect("localhost:5432")?;
//!     // ... startup and authentication happen elsewhere ...
//!     let mut conn = Conn::new(stream, Opts::default())?;
//!
//!     let stmt = conn.prepare("SELECT id, name FROM users WHERE id > ?")?;
//!     let frame = conn.bind(&stmt, &(10,))?;
//!     let rows: Vec<(i32, String)> = conn.execute_collect(&frame)?;
//!     println!("Rows: {:?}", rows);
//!     Ok(())
//! }
//! ```

pub mod bind;
pub mod buffer_set;
pub mod cache;
pub mod command_tag;
pub mod error;
pub mod handler;
pub mod opts;
pub mod protocol;
pub mod rewrite;
pub mod row;
pub mod session;
pub mod sql;
pub mod state;
pub mod types;

#[cfg(feature = "sync")]
pub mod sync;

#[cfg(feature = "tokio")]
pub mod tokio;

pub use bind::{BindFrame, Param, StatementRef, ToParam, ToParams};
pub use cache::PromotionState;
pub use command_tag::{CommandKind, CommandTag};
pub use error::{Error, ErrorFields, Result};
pub use handler::{CollectHandler, DropHandler, FirstRowHandler, ResultHandler};
pub use opts::{Opts, QueryMode, StringType};
pub use protocol::types::{FormatCode, Oid, TransactionStatus};
pub use row::FromRow;
pub use session::Session;
pub use types::{BuiltinTypes, FromWireValue, TypeLookup, Value};
