//! Common wire protocol types.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Wire type identifier assigned by the server.
pub type Oid = u32;

/// Wire type identifiers of the built-in types.
pub mod oid {
    use super::Oid;

    /// No type given; the server infers it
    pub const UNSPECIFIED: Oid = 0;
    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const NAME: Oid = 19;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const OID: Oid = 26;
    pub const JSON: Oid = 114;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const UNKNOWN: Oid = 705;
    pub const BPCHAR: Oid = 1042;
    pub const VARCHAR: Oid = 1043;
    pub const DATE: Oid = 1082;
    pub const TIME: Oid = 1083;
    pub const TIMESTAMP: Oid = 1114;
    pub const TIMESTAMPTZ: Oid = 1184;
    pub const NUMERIC: Oid = 1700;
    pub const UUID: Oid = 2950;
    pub const JSONB: Oid = 3802;
}

/// Data format code for parameters and result columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum FormatCode {
    /// Text format
    #[default]
    Text = 0,
    /// Binary format
    Binary = 1,
}

impl FormatCode {
    /// Decode a raw format code. Unknown codes fall back to text.
    pub fn from_u16(value: u16) -> Self {
        if value == 1 {
            FormatCode::Binary
        } else {
            FormatCode::Text
        }
    }
}

/// Transaction status indicator from ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Not in a transaction block
    #[default]
    Idle = b'I',
    /// In a transaction block
    InTransaction = b'T',
    /// In a failed transaction block
    Failed = b'E',
}

impl TransactionStatus {
    /// Decode the status byte.
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            b'I' => Some(TransactionStatus::Idle),
            b'T' => Some(TransactionStatus::InTransaction),
            b'E' => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    /// Returns true if currently in a transaction (either active or failed).
    pub fn in_transaction(self) -> bool {
        matches!(
            self,
            TransactionStatus::InTransaction | TransactionStatus::Failed
        )
    }
}

macro_rules! be_int {
    ($(#[$doc:meta])* $name:ident, $native:ty, $len:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
        #[repr(C)]
        pub struct $name([u8; $len]);

        impl $name {
            /// Wrap a native value.
            pub const fn new(value: $native) -> Self {
                Self(value.to_be_bytes())
            }

            /// Native value.
            pub const fn get(self) -> $native {
                <$native>::from_be_bytes(self.0)
            }
        }
    };
}

be_int!(
    /// Big-endian u16 usable inside zerocopy structs.
    U16BE, u16, 2
);
be_int!(
    /// Big-endian i16 usable inside zerocopy structs.
    I16BE, i16, 2
);
be_int!(
    /// Big-endian u32 usable inside zerocopy structs.
    U32BE, u32, 4
);
be_int!(
    /// Big-endian i32 usable inside zerocopy structs.
    I32BE, i32, 4
);
