//! Value codec: host values, wire encoders and decoders, and coercion rules.

pub mod codec;
pub mod coerce;
mod decode;
mod lookup;
mod numeric;
mod value;

pub use lookup::{BuiltinTypes, TypeLookup};
pub use value::Value;

use crate::error::{Error, Result};
use crate::protocol::types::Oid;

/// Decoding a result column into a Rust type.
///
/// - `from_null()` handles SQL NULL
/// - `from_text()` decodes the text format
/// - `from_binary()` decodes the binary format
///
/// The OID lets implementations reject incompatible types with a clear error.
pub trait FromWireValue<'a>: Sized {
    /// Only types that can represent NULL override this.
    fn from_null() -> Result<Self> {
        Err(Error::Decode("unexpected NULL value".into()))
    }

    fn from_text(oid: Oid, bytes: &'a [u8]) -> Result<Self>;

    fn from_binary(oid: Oid, bytes: &'a [u8]) -> Result<Self>;
}

impl<'a, T: FromWireValue<'a>> FromWireValue<'a> for Option<T> {
    fn from_null() -> Result<Self> {
        Ok(None)
    }

    fn from_text(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        T::from_text(oid, bytes).map(Some)
    }

    fn from_binary(oid: Oid, bytes: &'a [u8]) -> Result<Self> {
        T::from_binary(oid, bytes).map(Some)
    }
}
