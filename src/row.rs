//! Decoding rows into Rust types.

use crate::error::{Error, Result};
use crate::protocol::backend::query::{DataRow, FieldDescription};
use crate::protocol::types::FormatCode;
use crate::types::{FromWireValue, Value};

/// Decoding a row into a Rust type.
pub trait FromRow<'a>: Sized {
    fn from_row(cols: &[FieldDescription<'_>], row: DataRow<'a>) -> Result<Self>;
}

/// Decode one column value in the format it arrived in.
fn decode_column<'a, T: FromWireValue<'a>>(
    field: &FieldDescription<'_>,
    value: Option<&'a [u8]>,
) -> Result<T> {
    match value {
        None => T::from_null(),
        Some(bytes) => {
            let oid = field.type_oid();
            match field.format() {
                FormatCode::Text => T::from_text(oid, bytes),
                FormatCode::Binary => T::from_binary(oid, bytes),
            }
        }
    }
}

fn next_value<'a>(
    iter: &mut crate::protocol::backend::query::DataRowIter<'a>,
) -> Result<Option<&'a [u8]>> {
    iter.next()
        .unwrap_or_else(|| Err(Error::Decode("row has fewer values than columns".into())))
}

impl FromRow<'_> for () {
    fn from_row(_cols: &[FieldDescription<'_>], _row: DataRow<'_>) -> Result<Self> {
        Ok(())
    }
}

/// Every column as a dynamically typed value.
impl FromRow<'_> for Vec<Value> {
    fn from_row(cols: &[FieldDescription<'_>], row: DataRow<'_>) -> Result<Self> {
        let mut iter = row.iter();
        cols.iter()
            .map(|field| decode_column(field, next_value(&mut iter)?))
            .collect()
    }
}

macro_rules! impl_from_row_tuple {
    ($count:literal: $($idx:tt => $T:ident),+) => {
        impl<'a, $($T: FromWireValue<'a>),+> FromRow<'a> for ($($T,)+) {
            fn from_row(cols: &[FieldDescription<'_>], row: DataRow<'a>) -> Result<Self> {
                if cols.len() < $count {
                    return Err(Error::Decode(format!(
                        "expected {} columns, got {}",
                        $count,
                        cols.len()
                    )));
                }
                let mut iter = row.iter();
                Ok(($(
                    decode_column::<$T>(&cols[$idx], next_value(&mut iter)?)?,
                )+))
            }
        }
    };
}

impl_from_row_tuple!(1: 0 => T1);
impl_from_row_tuple!(2: 0 => T1, 1 => T2);
impl_from_row_tuple!(3: 0 => T1, 1 => T2, 2 => T3);
impl_from_row_tuple!(4: 0 => T1, 1 => T2, 2 => T3, 3 => T4);
impl_from_row_tuple!(5: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5);
impl_from_row_tuple!(6: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6);
impl_from_row_tuple!(7: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7);
impl_from_row_tuple!(8: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8);
impl_from_row_tuple!(9: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8, 8 => T9);
impl_from_row_tuple!(10: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8, 8 => T9, 9 => T10);
impl_from_row_tuple!(11: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8, 8 => T9, 9 => T10, 10 => T11);
impl_from_row_tuple!(12: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8, 8 => T9, 9 => T10, 10 => T11, 11 => T12);
