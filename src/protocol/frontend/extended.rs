//! Extended query protocol messages.

use crate::bind::EncodedParams;
use crate::error::Result;
use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::{FormatCode, Oid};

use super::{msg_type, target};

/// Write a Parse message.
///
/// - `name`: statement name, empty for the unnamed statement
/// - `query`: SQL with `$1`, `$2`, ... markers
/// - `param_oids`: parameter types, 0 lets the server infer
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) -> Result<()> {
    let mut msg = MessageBuilder::new(buf, msg_type::PARSE);
    msg.write_cstr(name)?;
    msg.write_cstr(query)?;
    msg.write_u16(param_oids.len() as u16);
    for &oid in param_oids {
        msg.write_u32(oid);
    }
    msg.finish()
}

/// Write a Bind message from pre-encoded parameters.
pub fn write_bind(
    buf: &mut Vec<u8>,
    portal: &str,
    statement: &str,
    params: &EncodedParams,
    result_formats: &[FormatCode],
) -> Result<()> {
    let mut msg = MessageBuilder::new(buf, msg_type::BIND);
    msg.write_cstr(portal)?;
    msg.write_cstr(statement)?;

    msg.write_u16(params.formats.len() as u16);
    for &fmt in &params.formats {
        msg.write_i16(fmt as i16);
    }

    msg.write_u16(params.formats.len() as u16);
    msg.write_bytes(&params.data);

    // A single entry applies to every column.
    if result_formats.iter().all(|&f| f == FormatCode::Text) {
        msg.write_i16(0);
    } else {
        msg.write_u16(result_formats.len() as u16);
        for &fmt in result_formats {
            msg.write_i16(fmt as i16);
        }
    }

    msg.finish()
}

/// Write an Execute message. `max_rows` 0 means no limit.
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: u32) -> Result<()> {
    let mut msg = MessageBuilder::new(buf, msg_type::EXECUTE);
    msg.write_cstr(portal)?;
    msg.write_u32(max_rows);
    msg.finish()
}

fn write_describe(buf: &mut Vec<u8>, kind: u8, name: &str) -> Result<()> {
    let mut msg = MessageBuilder::new(buf, msg_type::DESCRIBE);
    msg.write_u8(kind);
    msg.write_cstr(name)?;
    msg.finish()
}

/// Write a Describe message for a statement.
pub fn write_describe_statement(buf: &mut Vec<u8>, name: &str) -> Result<()> {
    write_describe(buf, target::STATEMENT, name)
}

/// Write a Describe message for a portal.
pub fn write_describe_portal(buf: &mut Vec<u8>, name: &str) -> Result<()> {
    write_describe(buf, target::PORTAL, name)
}

/// Write a Close message for a prepared statement.
pub fn write_close_statement(buf: &mut Vec<u8>, name: &str) -> Result<()> {
    let mut msg = MessageBuilder::new(buf, msg_type::CLOSE);
    msg.write_u8(target::STATEMENT);
    msg.write_cstr(name)?;
    msg.finish()
}

/// Write a Sync message.
///
/// Ends the pipeline. The server answers with ReadyForQuery, after skipping
/// everything queued behind a failed message.
pub fn write_sync(buf: &mut Vec<u8>) -> Result<()> {
    MessageBuilder::new(buf, msg_type::SYNC).finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn length_of(buf: &[u8]) -> i32 {
        i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]])
    }

    #[test]
    fn test_parse() {
        let mut buf = Vec::new();
        write_parse(&mut buf, "s1", "SELECT $1", &[23]).unwrap();

        assert_eq!(buf[0], b'P');
        assert_eq!(length_of(&buf) as usize, buf.len() - 1);
        assert_eq!(&buf[buf.len() - 6..], &[0, 1, 0, 0, 0, 23]);
    }

    #[test]
    fn test_bind_text_results_collapse() {
        let params = EncodedParams {
            formats: vec![FormatCode::Binary],
            data: vec![0, 0, 0, 1, 1],
        };
        let mut buf = Vec::new();
        write_bind(&mut buf, "", "s1", &params, &[FormatCode::Text, FormatCode::Text]).unwrap();

        assert_eq!(buf[0], b'B');
        assert_eq!(length_of(&buf) as usize, buf.len() - 1);
        // portal "" + "s1\0", 1 format (binary), 1 value (len 1, byte 1), 0 result formats
        assert_eq!(
            &buf[5..],
            &[0, b's', b'1', 0, 0, 1, 0, 1, 0, 1, 0, 0, 0, 1, 1, 0, 0]
        );
    }

    #[test]
    fn test_bind_mixed_results() {
        let params = EncodedParams::default();
        let mut buf = Vec::new();
        write_bind(&mut buf, "", "", &params, &[FormatCode::Binary, FormatCode::Text]).unwrap();
        assert_eq!(&buf[buf.len() - 6..], &[0, 2, 0, 1, 0, 0]);
    }

    #[test]
    fn test_parse_rejects_nul_in_query() {
        let mut buf = Vec::new();
        assert!(write_parse(&mut buf, "", "SELECT 1\0", &[]).is_err());
    }

    #[test]
    fn test_sync() {
        let mut buf = Vec::new();
        write_sync(&mut buf).unwrap();
        assert_eq!(buf, [b'S', 0, 0, 0, 4]);
    }

    #[test]
    fn test_execute() {
        let mut buf = Vec::new();
        write_execute(&mut buf, "", 0).unwrap();

        assert_eq!(buf[0], b'E');
        // 4 (length) + 1 (empty name) + 4 (max_rows)
        assert_eq!(length_of(&buf), 9);
    }

    #[test]
    fn test_describe_and_close() {
        let mut buf = Vec::new();
        write_describe_statement(&mut buf, "a").unwrap();
        assert_eq!(buf, [b'D', 0, 0, 0, 7, b'S', b'a', 0]);

        buf.clear();
        write_describe_portal(&mut buf, "").unwrap();
        assert_eq!(buf, [b'D', 0, 0, 0, 6, b'P', 0]);

        buf.clear();
        write_close_statement(&mut buf, "a").unwrap();
        assert_eq!(buf, [b'C', 0, 0, 0, 7, b'S', b'a', 0]);
    }
}
