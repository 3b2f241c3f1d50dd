//! Action types for state machine I/O requests.

use crate::error::{ErrorFields, Result};
use crate::protocol::backend::{
    NoticeResponse, NotificationResponse, ParameterStatus, RawMessage, msg_type,
};

/// Action requested by a state machine.
///
/// The driver performs the requested I/O and then calls `step()` again.
#[derive(Debug)]
pub enum Action {
    /// Read one message into the buffer set.
    ///
    /// The driver should:
    /// 1. Read the message type byte and the big-endian length
    /// 2. Read (length - 4) bytes of payload into `read_buffer`
    /// 3. Call `step()` again
    ReadMessage,

    /// Write `buffer_set.write_buffer` to the server.
    Write,

    /// Write `buffer_set.write_buffer` to the server, then read a message.
    WriteAndReadMessage,

    /// An asynchronous message was received.
    ///
    /// The driver hands the message to the session, reads the next message,
    /// then calls `step()` again.
    HandleAsyncMessageAndReadMessage(AsyncMessage),

    /// The state machine has finished.
    Finished,
}

/// Asynchronous message from the server.
///
/// These can arrive at any time and never change the state of the
/// exchange in progress.
#[derive(Debug, Clone)]
pub enum AsyncMessage {
    /// Notification from LISTEN/NOTIFY.
    Notification {
        /// PID of the notifying backend process
        pid: u32,
        /// Channel name
        channel: String,
        /// Notification payload
        payload: String,
    },

    /// Non-fatal notice or warning.
    Notice(ErrorFields),

    /// A run-time setting changed.
    ParameterChanged {
        /// Parameter name
        name: String,
        /// New value
        value: String,
    },
}

impl AsyncMessage {
    /// Decode a message for which [`RawMessage::is_async_type`] holds.
    pub fn parse(msg: &RawMessage<'_>) -> Result<Self> {
        match msg.type_byte {
            msg_type::NOTICE_RESPONSE => {
                let notice = NoticeResponse::parse(msg.payload)?;
                Ok(AsyncMessage::Notice(notice.fields))
            }
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(msg.payload)?;
                Ok(AsyncMessage::ParameterChanged {
                    name: param.name.to_string(),
                    value: param.value.to_string(),
                })
            }
            _ => {
                let notification = NotificationResponse::parse(msg.payload)?;
                Ok(AsyncMessage::Notification {
                    pid: notification.pid,
                    channel: notification.channel.to_string(),
                    payload: notification.payload.to_string(),
                })
            }
        }
    }
}
