//! Simple query protocol messages.

use crate::error::Result;
use crate::protocol::codec::MessageBuilder;

/// Write a Query message.
///
/// The text may hold several statements separated by semicolons.
pub fn write_query(buf: &mut Vec<u8>, query: &str) -> Result<()> {
    let mut msg = MessageBuilder::new(buf, super::msg_type::QUERY);
    msg.write_cstr(query)?;
    msg.finish()
}
