//! Type metadata consulted for format negotiation and literal inlining.

use crate::protocol::types::Oid;

use super::codec;

/// Source of type names and binary-format support.
///
/// Sessions use [`BuiltinTypes`] unless the caller supplies a lookup that
/// knows about extension or user-defined types.
pub trait TypeLookup {
    fn type_name(&self, oid: Oid) -> Option<&str>;

    /// Whether result columns of this type may be requested in binary.
    fn supports_binary(&self, oid: Oid) -> bool;
}

/// Lookup over the built-in codec table.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinTypes;

impl TypeLookup for BuiltinTypes {
    fn type_name(&self, oid: Oid) -> Option<&str> {
        codec::lookup(oid).map(|c| c.name)
    }

    fn supports_binary(&self, oid: Oid) -> bool {
        codec::lookup(oid).is_some_and(|c| c.binary_results)
    }
}
