//! ErrorResponse and NoticeResponse.

use crate::error::{Error, ErrorFields, Result};
use crate::protocol::codec::{read_cstr, read_u8};

/// Field type codes that are kept; others are skipped.
mod field {
    pub const SEVERITY: u8 = b'S';
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    pub const CODE: u8 = b'C';
    pub const MESSAGE: u8 = b'M';
    pub const DETAIL: u8 = b'D';
    pub const HINT: u8 = b'H';
    pub const POSITION: u8 = b'P';
    pub const WHERE: u8 = b'W';
    pub const TABLE: u8 = b't';
    pub const COLUMN: u8 = b'c';
    pub const DATA_TYPE: u8 = b'd';
    pub const CONSTRAINT: u8 = b'n';
    pub const ROUTINE: u8 = b'R';
}

fn parse_fields(payload: &[u8]) -> Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    let mut data = payload;

    loop {
        let (code, rest) = read_u8(data)?;
        if code == 0 {
            break;
        }
        let (value, rest) = read_cstr(rest)?;
        data = rest;

        let slot = match code {
            field::SEVERITY => &mut fields.severity,
            field::SEVERITY_NON_LOCALIZED => &mut fields.severity_non_localized,
            field::CODE => &mut fields.code,
            field::MESSAGE => &mut fields.message,
            field::DETAIL => &mut fields.detail,
            field::HINT => &mut fields.hint,
            field::WHERE => &mut fields.where_,
            field::TABLE => &mut fields.table,
            field::COLUMN => &mut fields.column,
            field::DATA_TYPE => &mut fields.data_type,
            field::CONSTRAINT => &mut fields.constraint,
            field::ROUTINE => &mut fields.routine,
            field::POSITION => {
                fields.position = value.parse().ok();
                continue;
            }
            _ => {
                tracing::trace!("skipping error field {}", code as char);
                continue;
            }
        };
        *slot = Some(value.to_string());
    }

    Ok(fields)
}

/// ErrorResponse: the current statement failed.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub fields: ErrorFields,
}

impl ErrorResponse {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            fields: parse_fields(payload)?,
        })
    }

    pub fn into_error(self) -> Error {
        Error::Server(self.fields)
    }

    /// SQLSTATE code
    pub fn code(&self) -> Option<&str> {
        self.fields.code.as_deref()
    }
}

/// NoticeResponse: a warning or informational message.
#[derive(Debug, Clone)]
pub struct NoticeResponse {
    pub fields: ErrorFields,
}

impl NoticeResponse {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            fields: parse_fields(payload)?,
        })
    }
}
