//! Result-related backend messages.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_cstr, read_i32, read_u16, write_u16};
use crate::protocol::types::{FormatCode, I16BE, I32BE, Oid, U16BE, U32BE};

/// Fixed-size tail of a field description (18 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FieldDescriptionTail {
    /// Table OID (0 if not a table column)
    pub table_oid: U32BE,
    /// Column attribute number (0 if not a table column)
    pub column_id: I16BE,
    /// Data type OID
    pub type_oid: U32BE,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: I16BE,
    /// Type modifier
    pub type_modifier: I32BE,
    /// Format code (0=text, 1=binary)
    pub format: U16BE,
}

/// Field description within a RowDescription.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescription<'a> {
    /// Column name
    pub name: &'a str,
    /// Fixed-size metadata
    pub tail: &'a FieldDescriptionTail,
}

impl FieldDescription<'_> {
    /// Data type OID
    pub fn type_oid(&self) -> Oid {
        self.tail.type_oid.get()
    }

    /// Format the column values arrive in
    pub fn format(&self) -> FormatCode {
        FormatCode::from_u16(self.tail.format.get())
    }
}

/// RowDescription: the columns of a result set.
#[derive(Debug)]
pub struct RowDescription<'a> {
    fields: Vec<FieldDescription<'a>>,
}

impl<'a> RowDescription<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (count, mut data) = read_u16(payload)?;
        let mut fields = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let (name, rest) = read_cstr(data)?;
            let (tail, rest) = FieldDescriptionTail::ref_from_prefix(rest)
                .map_err(|e| Error::Protocol(format!("FieldDescription tail: {e:?}")))?;
            fields.push(FieldDescription { name, tail });
            data = rest;
        }

        Ok(Self { fields })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldDescription<'a>] {
        &self.fields
    }
}

/// Write a RowDescription payload for `columns`, forcing each column's format.
///
/// Used when a cached statement is bound again without a Describe: the
/// server does not resend the columns, so they are rebuilt locally.
pub fn encode_row_description<'c>(
    out: &mut Vec<u8>,
    columns: impl ExactSizeIterator<Item = (&'c str, FieldDescriptionTail, FormatCode)>,
) {
    out.clear();
    write_u16(out, columns.len() as u16);
    for (name, mut tail, format) in columns {
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        tail.format = U16BE::new(format as u16);
        out.extend_from_slice(tail.as_bytes());
    }
}

/// DataRow: one row of column values.
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    num_columns: u16,
    columns_data: &'a [u8],
}

impl<'a> DataRow<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (num_columns, columns_data) = read_u16(payload)?;
        Ok(Self {
            num_columns,
            columns_data,
        })
    }

    pub fn len(&self) -> usize {
        self.num_columns as usize
    }

    pub fn is_empty(&self) -> bool {
        self.num_columns == 0
    }

    /// Iterate over column values; `None` is SQL NULL.
    pub fn iter(&self) -> DataRowIter<'a> {
        DataRowIter {
            remaining: self.columns_data,
            left: self.num_columns,
        }
    }
}

/// Iterator over the values of a DataRow.
#[derive(Debug, Clone)]
pub struct DataRowIter<'a> {
    remaining: &'a [u8],
    left: u16,
}

impl<'a> Iterator for DataRowIter<'a> {
    type Item = Result<Option<&'a [u8]>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.left == 0 {
            return None;
        }
        self.left -= 1;
        Some(self.next_value())
    }
}

impl<'a> DataRowIter<'a> {
    fn next_value(&mut self) -> Result<Option<&'a [u8]>> {
        let (len, rest) = read_i32(self.remaining)?;
        if len < 0 {
            self.remaining = rest;
            return Ok(None);
        }
        let (value, rest) = rest
            .split_at_checked(len as usize)
            .ok_or_else(|| Error::Protocol(format!("DataRow value of {} bytes truncated", len)))?;
        self.remaining = rest;
        Ok(Some(value))
    }
}

/// CommandComplete: a statement finished; carries the command tag.
#[derive(Debug, Clone, Copy)]
pub struct CommandComplete<'a> {
    /// Command tag (e.g. "SELECT 5", "INSERT 0 1")
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (tag, _) = read_cstr(payload)?;
        Ok(Self { tag })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int4_tail(format: u16) -> FieldDescriptionTail {
        FieldDescriptionTail {
            table_oid: U32BE::new(0),
            column_id: I16BE::new(0),
            type_oid: U32BE::new(23),
            type_size: I16BE::new(4),
            type_modifier: I32BE::new(-1),
            format: U16BE::new(format),
        }
    }

    #[test]
    fn test_tail_size() {
        assert_eq!(std::mem::size_of::<FieldDescriptionTail>(), 18);
    }

    #[test]
    fn test_row_description_roundtrip() {
        let mut payload = Vec::new();
        encode_row_description(
            &mut payload,
            [("id", int4_tail(0), FormatCode::Binary)].into_iter(),
        );
        let desc = RowDescription::parse(&payload).unwrap();
        assert_eq!(desc.len(), 1);
        assert_eq!(desc.fields()[0].name, "id");
        assert_eq!(desc.fields()[0].type_oid(), 23);
        assert_eq!(desc.fields()[0].format(), FormatCode::Binary);
    }

    #[test]
    fn test_row_description_truncated() {
        let mut payload = Vec::new();
        encode_row_description(
            &mut payload,
            [("id", int4_tail(0), FormatCode::Text)].into_iter(),
        );
        payload.pop();
        assert!(RowDescription::parse(&payload).is_err());
    }

    #[test]
    fn test_data_row() {
        let payload = [0, 2, 0, 0, 0, 2, b'4', b'2', 0xff, 0xff, 0xff, 0xff];
        let row = DataRow::parse(&payload).unwrap();
        let values: Vec<_> = row.iter().collect::<Result<_>>().unwrap();
        assert_eq!(values, vec![Some(&b"42"[..]), None]);
    }

    #[test]
    fn test_data_row_truncated_value() {
        let payload = [0, 1, 0, 0, 0, 9, b'4'];
        let row = DataRow::parse(&payload).unwrap();
        assert!(row.iter().next().unwrap().is_err());
    }

    #[test]
    fn test_command_complete() {
        let cc = CommandComplete::parse(b"INSERT 0 1\0").unwrap();
        assert_eq!(cc.tag, "INSERT 0 1");
    }
}
