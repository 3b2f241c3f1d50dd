//! Simple query protocol state machine.

use crate::buffer_set::BufferSet;
use crate::command_tag::CommandTag;
use crate::error::{Error, Result};
use crate::handler::ResultHandler;
use crate::protocol::backend::{
    CommandComplete, DataRow, ErrorResponse, RawMessage, ReadyForQuery, RowDescription, msg_type,
};
use crate::protocol::frontend::write_query;
use crate::protocol::types::TransactionStatus;

use super::StateMachine;
use super::action::{Action, AsyncMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingResponse,
    ProcessingRows,
    WaitingReady,
    Finished,
}

/// Simple query protocol state machine.
///
/// The query text may hold several statements; the handler sees them with
/// increasing statement indexes. A server error ends the query, and it is
/// reported by [`finish`](Self::finish) once ReadyForQuery arrives.
pub struct SimpleQueryStateMachine<'a, H> {
    state: State,
    handler: &'a mut H,
    query: &'a str,
    stmt: usize,
    error: Option<Error>,
    transaction_status: TransactionStatus,
}

impl<'a, H: ResultHandler> SimpleQueryStateMachine<'a, H> {
    pub fn new(handler: &'a mut H, query: &'a str) -> Self {
        Self {
            state: State::Initial,
            handler,
            query,
            stmt: 0,
            error: None,
            transaction_status: TransactionStatus::Idle,
        }
    }

    /// Number of statements that completed.
    pub fn completed(&self) -> usize {
        self.stmt
    }

    /// The first error, once the machine has finished.
    pub fn finish(self) -> Option<Error> {
        self.error
    }

    fn call(&mut self, f: impl FnOnce(&mut H) -> Result<()>) {
        if self.error.is_none()
            && let Err(e) = f(&mut *self.handler)
        {
            self.error = Some(e);
        }
    }

    fn unexpected(&self, type_byte: u8) -> Error {
        tracing::warn!(msg = %(type_byte as char), state = ?self.state, "unexpected message in query response");
        Error::Protocol(format!(
            "Unexpected message '{}' in {:?}",
            type_byte as char, self.state
        ))
    }

    fn complete(&mut self, tag: &str) {
        match CommandTag::parse(tag) {
            Ok(tag) => {
                let stmt = self.stmt;
                self.call(|h| h.result_end(stmt, &tag));
            }
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(e);
                }
            }
        }
        self.stmt += 1;
        self.state = State::WaitingResponse;
    }

    fn handle_response(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;
        match type_byte {
            msg_type::ROW_DESCRIPTION => {
                buffer_set.column_buffer.clear();
                buffer_set
                    .column_buffer
                    .extend_from_slice(&buffer_set.read_buffer);
                let cols = RowDescription::parse(&buffer_set.column_buffer)?;
                let stmt = self.stmt;
                self.call(|h| h.result_start(stmt, cols));
                self.state = State::ProcessingRows;
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(&buffer_set.read_buffer)?;
                self.complete(complete.tag);
            }
            msg_type::EMPTY_QUERY_RESPONSE => {
                let stmt = self.stmt;
                let tag = CommandTag::other();
                self.call(|h| h.result_end(stmt, &tag));
                self.stmt += 1;
            }
            _ => return Err(self.unexpected(type_byte)),
        }
        Ok(Action::ReadMessage)
    }

    fn handle_rows(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;
        match type_byte {
            msg_type::DATA_ROW => {
                let cols = RowDescription::parse(&buffer_set.column_buffer)?;
                let row = DataRow::parse(&buffer_set.read_buffer)?;
                let stmt = self.stmt;
                self.call(|h| h.row(stmt, cols, row));
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(&buffer_set.read_buffer)?;
                self.complete(complete.tag);
            }
            _ => return Err(self.unexpected(type_byte)),
        }
        Ok(Action::ReadMessage)
    }
}

impl<H: ResultHandler> StateMachine for SimpleQueryStateMachine<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == State::Initial {
            buffer_set.write_buffer.clear();
            write_query(&mut buffer_set.write_buffer, self.query)?;
            self.state = State::WaitingResponse;
            return Ok(Action::WriteAndReadMessage);
        }

        let type_byte = buffer_set.type_byte;
        if RawMessage::is_async_type(type_byte) {
            let msg = RawMessage::new(type_byte, &buffer_set.read_buffer);
            return Ok(Action::HandleAsyncMessageAndReadMessage(AsyncMessage::parse(
                &msg,
            )?));
        }

        match (self.state, type_byte) {
            (State::Finished, _) => Err(self.unexpected(type_byte)),
            (State::WaitingResponse | State::WaitingReady, msg_type::READY_FOR_QUERY) => {
                let ready = ReadyForQuery::parse(&buffer_set.read_buffer)?;
                self.transaction_status = ready.transaction_status()?;
                self.state = State::Finished;
                Ok(Action::Finished)
            }
            (State::WaitingReady, _) => Err(self.unexpected(type_byte)),
            (_, msg_type::ERROR_RESPONSE) => {
                let error = ErrorResponse::parse(&buffer_set.read_buffer)?.into_error();
                if error.is_connection_broken() {
                    return Err(error);
                }
                if self.error.is_none() {
                    self.error = Some(error);
                }
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            (State::WaitingResponse, _) => self.handle_response(buffer_set),
            _ => self.handle_rows(buffer_set),
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }
}
