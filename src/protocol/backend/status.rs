//! Session status messages.

use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_cstr, read_u32};
use crate::protocol::types::TransactionStatus;

/// ParameterStatus: the server reports a run-time setting.
#[derive(Debug, Clone, Copy)]
pub struct ParameterStatus<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

impl<'a> ParameterStatus<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (name, rest) = read_cstr(payload)?;
        let (value, _) = read_cstr(rest)?;
        Ok(Self { name, value })
    }
}

/// ReadyForQuery: the server finished the pipeline.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct ReadyForQuery {
    pub status: u8,
}

impl ReadyForQuery {
    pub fn parse(payload: &[u8]) -> Result<&Self> {
        Self::ref_from_bytes(payload).map_err(|e| Error::Protocol(format!("ReadyForQuery: {e:?}")))
    }

    pub fn transaction_status(&self) -> Result<TransactionStatus> {
        TransactionStatus::from_byte(self.status).ok_or_else(|| {
            Error::Protocol(format!(
                "unknown transaction status '{}'",
                self.status as char
            ))
        })
    }
}

/// NotificationResponse from LISTEN/NOTIFY.
#[derive(Debug, Clone, Copy)]
pub struct NotificationResponse<'a> {
    pub pid: u32,
    pub channel: &'a str,
    pub payload: &'a str,
}

impl<'a> NotificationResponse<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (pid, rest) = read_u32(payload)?;
        let (channel, rest) = read_cstr(rest)?;
        let (payload, _) = read_cstr(rest)?;
        Ok(Self {
            pid,
            channel,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_for_query() {
        let rfq = ReadyForQuery::parse(b"T").unwrap();
        assert_eq!(
            rfq.transaction_status().unwrap(),
            TransactionStatus::InTransaction
        );
        assert!(ReadyForQuery::parse(b"").is_err());
        assert!(ReadyForQuery::parse(b"X").unwrap().transaction_status().is_err());
    }

    #[test]
    fn test_parameter_status() {
        let ps = ParameterStatus::parse(b"standard_conforming_strings\0off\0").unwrap();
        assert_eq!(ps.name, "standard_conforming_strings");
        assert_eq!(ps.value, "off");
    }

    #[test]
    fn test_notification() {
        let n = NotificationResponse::parse(b"\0\0\0\x07chan\0hello\0").unwrap();
        assert_eq!(n.pid, 7);
        assert_eq!(n.channel, "chan");
        assert_eq!(n.payload, "hello");
    }
}
