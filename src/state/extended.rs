//! Extended query pipeline state machine.
//!
//! One pipeline is a run of Close messages followed by one or more
//! statements, each sent as some of Parse/Describe/Bind/Execute, and a
//! single trailing Sync. Responses are consumed strictly in request order.
//!
//! A server error fails the statement it belongs to; the server skips the
//! rest of the pipeline up to the Sync, so the remaining statements are
//! marked skipped and only ReadyForQuery is accepted afterwards. A handler
//! or tag error is local: the responses already in flight are still
//! consumed, without further callbacks. Either way the first error is
//! surfaced once the pipeline is drained. Any message out of order is
//! fatal.

use std::sync::Arc;

use crate::buffer_set::BufferSet;
use crate::cache::{ColumnInfo, SharedColumns};
use crate::command_tag::CommandTag;
use crate::error::{Error, Result};
use crate::handler::ResultHandler;
use crate::protocol::backend::{
    BindComplete, CloseComplete, CommandComplete, DataRow, ErrorResponse, NoData,
    ParameterDescription, ParseComplete, RawMessage, ReadyForQuery, RowDescription, msg_type,
};
use crate::protocol::types::TransactionStatus;

use super::StateMachine;
use super::action::{Action, AsyncMessage};

/// Where a statement's result columns are described.
#[derive(Debug, Clone)]
pub enum ResultSource {
    /// Describe(S) right after Parse
    Statement,
    /// Describe(P) right after Bind
    Portal,
    /// A RowDescription payload built from a cached statement, `None` when
    /// the statement returns no rows
    Cached(Option<Vec<u8>>),
}

/// The responses one statement of the pipeline produces.
#[derive(Debug, Clone)]
pub struct PipelineItem {
    /// Statement index reported to the handler
    pub stmt: usize,
    /// A Parse precedes the Bind
    pub parse: bool,
    pub source: ResultSource,
}

/// Progress of one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ParseSent,
    ParamDescribeSent,
    DescribeSent,
    BindSent,
    PortalDescribeSent,
    ExecuteSent,
    Done,
    Failed,
    Skipped,
}

/// What happened to one statement.
#[derive(Debug, Clone)]
pub struct ItemResult {
    pub phase: Phase,
    /// ParseComplete was received
    pub parsed: bool,
    /// Tag of the completed statement; `None` when it did not complete or
    /// the tag was malformed
    pub tag: Option<CommandTag>,
    /// Columns described during execution (empty for no rows)
    pub columns: Option<SharedColumns>,
    /// SQLSTATE of the server error that failed this statement
    pub sqlstate: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Closing,
    Pipelined,
    Draining,
    Finished,
}

/// Extended query pipeline state machine.
///
/// The pipeline's messages must already be in `write_buffer` when the
/// machine is first stepped.
#[derive(Debug)]
pub struct PipelineStateMachine<'h, H> {
    state: State,
    handler: &'h mut H,
    items: Vec<PipelineItem>,
    results: Vec<ItemResult>,
    current: usize,
    closes_left: usize,
    described: bool,
    error: Option<Error>,
    transaction_status: TransactionStatus,
}

impl<'h, H: ResultHandler> PipelineStateMachine<'h, H> {
    pub fn new(handler: &'h mut H, closes: usize, items: Vec<PipelineItem>) -> Self {
        let results = items
            .iter()
            .map(|item| ItemResult {
                phase: if item.parse {
                    Phase::ParseSent
                } else {
                    Phase::BindSent
                },
                parsed: false,
                tag: None,
                columns: None,
                sqlstate: None,
            })
            .collect();
        Self {
            state: State::Initial,
            handler,
            items,
            results,
            current: 0,
            closes_left: closes,
            described: false,
            error: None,
            transaction_status: TransactionStatus::Idle,
        }
    }

    /// Per-statement results and the first error, once drained.
    pub fn finish(self) -> (Vec<ItemResult>, Option<Error>) {
        (self.results, self.error)
    }

    pub fn results(&self) -> &[ItemResult] {
        &self.results
    }

    /// Run a handler callback unless an earlier error stopped them.
    fn call(&mut self, f: impl FnOnce(&mut H) -> Result<()>) {
        if self.error.is_none()
            && let Err(e) = f(&mut *self.handler)
        {
            tracing::debug!(error = %e, "result handler failed, draining pipeline");
            self.error = Some(e);
        }
    }

    fn unexpected(&self, type_byte: u8) -> Error {
        let phase = self.results.get(self.current).map(|r| r.phase);
        tracing::warn!(
            msg = %(type_byte as char),
            state = ?self.state,
            phase = ?phase,
            "unexpected message in pipeline"
        );
        Error::Protocol(format!(
            "Unexpected message '{}' in {:?} (statement phase {:?})",
            type_byte as char, self.state, phase
        ))
    }

    fn handle_error(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        let fields = ErrorResponse::parse(&buffer_set.read_buffer)?.fields;
        if matches!(fields.severity(), Some("FATAL") | Some("PANIC")) {
            return Err(Error::Server(fields));
        }

        if let Some(result) = self.results.get_mut(self.current)
            && self.state == State::Pipelined
        {
            result.phase = Phase::Failed;
            result.sqlstate = fields.code.clone();
            self.current += 1;
        }
        for result in self.results.iter_mut().skip(self.current) {
            result.phase = Phase::Skipped;
        }
        self.current = self.results.len();

        tracing::debug!(code = ?fields.code, "pipeline failed, draining to sync");
        if self.error.is_none() {
            self.error = Some(Error::Server(fields));
        }
        self.state = State::Draining;
        Ok(Action::ReadMessage)
    }

    fn handle_ready(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        let ready = ReadyForQuery::parse(&buffer_set.read_buffer)?;
        self.transaction_status = ready.transaction_status()?;

        if self.state != State::Draining && (self.closes_left > 0 || self.current < self.items.len())
        {
            tracing::warn!(
                completed = self.current,
                total = self.items.len(),
                "ReadyForQuery before the pipeline completed"
            );
            return Err(Error::Protocol(format!(
                "ReadyForQuery after {} of {} statements",
                self.current,
                self.items.len()
            )));
        }

        self.state = State::Finished;
        Ok(Action::Finished)
    }

    fn handle_close(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        if buffer_set.type_byte != msg_type::CLOSE_COMPLETE {
            return Err(self.unexpected(buffer_set.type_byte));
        }
        CloseComplete::parse(&buffer_set.read_buffer)?;
        self.closes_left -= 1;
        if self.closes_left == 0 {
            self.state = State::Pipelined;
        }
        Ok(Action::ReadMessage)
    }

    fn handle_item(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;
        let Some(phase) = self.results.get(self.current).map(|r| r.phase) else {
            return Err(self.unexpected(type_byte));
        };

        let next = match (phase, type_byte) {
            (Phase::ParseSent, msg_type::PARSE_COMPLETE) => {
                ParseComplete::parse(&buffer_set.read_buffer)?;
                self.results[self.current].parsed = true;
                match self.items[self.current].source {
                    ResultSource::Statement => Phase::ParamDescribeSent,
                    _ => Phase::BindSent,
                }
            }
            (Phase::ParamDescribeSent, msg_type::PARAMETER_DESCRIPTION) => {
                ParameterDescription::parse(&buffer_set.read_buffer)?;
                Phase::DescribeSent
            }
            (Phase::DescribeSent, msg_type::ROW_DESCRIPTION) => {
                self.describe(buffer_set)?;
                Phase::BindSent
            }
            (Phase::DescribeSent, msg_type::NO_DATA) => {
                NoData::parse(&buffer_set.read_buffer)?;
                self.no_data();
                Phase::BindSent
            }
            (Phase::BindSent, msg_type::BIND_COMPLETE) => {
                BindComplete::parse(&buffer_set.read_buffer)?;
                let next = match &self.items[self.current].source {
                    ResultSource::Statement => Phase::ExecuteSent,
                    ResultSource::Portal => Phase::PortalDescribeSent,
                    ResultSource::Cached(Some(payload)) => {
                        buffer_set.set_columns(payload);
                        self.described = true;
                        Phase::ExecuteSent
                    }
                    ResultSource::Cached(None) => {
                        self.described = false;
                        Phase::ExecuteSent
                    }
                };
                if next == Phase::ExecuteSent {
                    self.start_result(buffer_set);
                }
                next
            }
            (Phase::PortalDescribeSent, msg_type::ROW_DESCRIPTION) => {
                self.describe(buffer_set)?;
                self.start_result(buffer_set);
                Phase::ExecuteSent
            }
            (Phase::PortalDescribeSent, msg_type::NO_DATA) => {
                NoData::parse(&buffer_set.read_buffer)?;
                self.no_data();
                Phase::ExecuteSent
            }
            (Phase::ExecuteSent, msg_type::DATA_ROW) => {
                if !self.described {
                    return Err(self.unexpected(type_byte));
                }
                let cols = RowDescription::parse(&buffer_set.column_buffer)?;
                let row = DataRow::parse(&buffer_set.read_buffer)?;
                let stmt = self.items[self.current].stmt;
                self.call(|h| h.row(stmt, cols, row));
                Phase::ExecuteSent
            }
            (Phase::ExecuteSent, msg_type::COMMAND_COMPLETE) => {
                let complete = CommandComplete::parse(&buffer_set.read_buffer)?;
                match CommandTag::parse(complete.tag) {
                    Ok(tag) => self.complete(tag),
                    Err(e) => {
                        tracing::debug!(tag = complete.tag, "malformed command tag");
                        if self.error.is_none() {
                            self.error = Some(e);
                        }
                    }
                }
                Phase::Done
            }
            (Phase::ExecuteSent, msg_type::EMPTY_QUERY_RESPONSE) => {
                self.complete(CommandTag::other());
                Phase::Done
            }
            _ => return Err(self.unexpected(type_byte)),
        };

        tracing::trace!(stmt = self.current, phase = ?next, "pipeline step");
        self.results[self.current].phase = next;
        if next == Phase::Done {
            self.current += 1;
            self.described = false;
        }
        Ok(Action::ReadMessage)
    }

    fn describe(&mut self, buffer_set: &mut BufferSet) -> Result<()> {
        let desc = RowDescription::parse(&buffer_set.read_buffer)?;
        let columns: Vec<ColumnInfo> = desc
            .fields()
            .iter()
            .map(|f| ColumnInfo {
                name: f.name.to_string(),
                tail: *f.tail,
            })
            .collect();
        self.results[self.current].columns = Some(Arc::from(columns));
        buffer_set.column_buffer.clear();
        buffer_set
            .column_buffer
            .extend_from_slice(&buffer_set.read_buffer);
        self.described = true;
        Ok(())
    }

    fn no_data(&mut self) {
        self.results[self.current].columns = Some(Arc::from(Vec::new()));
        self.described = false;
    }

    fn start_result(&mut self, buffer_set: &BufferSet) {
        if !self.described {
            return;
        }
        let stmt = self.items[self.current].stmt;
        match RowDescription::parse(&buffer_set.column_buffer) {
            Ok(cols) => self.call(|h| h.result_start(stmt, cols)),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(e);
                }
            }
        }
    }

    fn complete(&mut self, tag: CommandTag) {
        self.results[self.current].tag = Some(tag);
        let stmt = self.items[self.current].stmt;
        self.call(|h| h.result_end(stmt, &tag));
    }
}

impl<H: ResultHandler> StateMachine for PipelineStateMachine<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == State::Initial {
            self.state = if self.closes_left > 0 {
                State::Closing
            } else {
                State::Pipelined
            };
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
            (_, msg_type::READY_FOR_QUERY) => self.handle_ready(buffer_set),
            (State::Draining, _) => Err(self.unexpected(type_byte)),
            (_, msg_type::ERROR_RESPONSE) => self.handle_error(buffer_set),
            (State::Closing, _) => self.handle_close(buffer_set),
            _ => self.handle_item(buffer_set),
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::CollectHandler;
    use crate::protocol::backend::FieldDescriptionTail;
    use crate::protocol::backend::query::encode_row_description;
    use crate::protocol::types::{FormatCode, I16BE, I32BE, U16BE, U32BE, oid};

    fn feed<M: StateMachine>(machine: &mut M, bs: &mut BufferSet, type_byte: u8, payload: &[u8]) -> Result<Action> {
        bs.type_byte = type_byte;
        bs.read_buffer.clear();
        bs.read_buffer.extend_from_slice(payload);
        machine.step(bs)
    }

    fn int4_description() -> Vec<u8> {
        let tail = FieldDescriptionTail {
            table_oid: U32BE::new(0),
            column_id: I16BE::new(0),
            type_oid: U32BE::new(oid::INT4),
            type_size: I16BE::new(4),
            type_modifier: I32BE::new(-1),
            format: U16BE::new(0),
        };
        let mut out = Vec::new();
        encode_row_description(&mut out, [("n", tail, FormatCode::Text)].into_iter());
        out
    }

    fn text_row(value: &str) -> Vec<u8> {
        let mut out = 1_u16.to_be_bytes().to_vec();
        out.extend_from_slice(&(value.len() as i32).to_be_bytes());
        out.extend_from_slice(value.as_bytes());
        out
    }

    fn one_shot(stmt: usize) -> PipelineItem {
        PipelineItem {
            stmt,
            parse: true,
            source: ResultSource::Portal,
        }
    }

    const ERROR: &[u8] = b"SERROR\0C23505\0Mduplicate key\0\0";

    #[test]
    fn test_one_shot_rows() {
        let mut handler = CollectHandler::<(i32,)>::new();
        let mut bs = BufferSet::new();
        let mut m = PipelineStateMachine::new(&mut handler, 0, vec![one_shot(0)]);
        assert!(matches!(m.step(&mut bs).unwrap(), Action::WriteAndReadMessage));
        feed(&mut m, &mut bs, msg_type::PARSE_COMPLETE, b"").unwrap();
        feed(&mut m, &mut bs, msg_type::BIND_COMPLETE, b"").unwrap();
        feed(&mut m, &mut bs, msg_type::ROW_DESCRIPTION, &int4_description()).unwrap();
        feed(&mut m, &mut bs, msg_type::DATA_ROW, &text_row("1")).unwrap();
        feed(&mut m, &mut bs, msg_type::DATA_ROW, &text_row("2")).unwrap();
        feed(&mut m, &mut bs, msg_type::COMMAND_COMPLETE, b"SELECT 2\0").unwrap();
        let action = feed(&mut m, &mut bs, msg_type::READY_FOR_QUERY, b"I").unwrap();
        assert!(matches!(action, Action::Finished));

        let (results, error) = m.finish();
        assert!(error.is_none());
        assert_eq!(results[0].phase, Phase::Done);
        assert!(results[0].parsed);
        assert_eq!(results[0].tag.unwrap().rows, Some(2));
        assert_eq!(handler.into_rows(), [(1,), (2,)]);
    }

    #[test]
    fn test_cached_description() {
        let mut handler = CollectHandler::<(i32,)>::new();
        let mut bs = BufferSet::new();
        let item = PipelineItem {
            stmt: 0,
            parse: false,
            source: ResultSource::Cached(Some(int4_description())),
        };
        let mut m = PipelineStateMachine::new(&mut handler, 1, vec![item]);
        m.step(&mut bs).unwrap();
        feed(&mut m, &mut bs, msg_type::CLOSE_COMPLETE, b"").unwrap();
        feed(&mut m, &mut bs, msg_type::BIND_COMPLETE, b"").unwrap();
        feed(&mut m, &mut bs, msg_type::DATA_ROW, &text_row("7")).unwrap();
        feed(&mut m, &mut bs, msg_type::COMMAND_COMPLETE, b"SELECT 1\0").unwrap();
        feed(&mut m, &mut bs, msg_type::READY_FOR_QUERY, b"T").unwrap();
        assert_eq!(m.transaction_status(), TransactionStatus::InTransaction);
        let (results, error) = m.finish();
        assert!(error.is_none());
        assert!(!results[0].parsed);
        assert_eq!(handler.into_rows(), [(7,)]);
    }

    #[test]
    fn test_server_error_skips_rest() {
        let mut handler = CollectHandler::<(i32,)>::new();
        let mut bs = BufferSet::new();
        let items = vec![one_shot(0), one_shot(1), one_shot(2)];
        let mut m = PipelineStateMachine::new(&mut handler, 0, items);
        m.step(&mut bs).unwrap();
        for msg in [msg_type::PARSE_COMPLETE, msg_type::BIND_COMPLETE, msg_type::NO_DATA] {
            feed(&mut m, &mut bs, msg, b"").unwrap();
        }
        feed(&mut m, &mut bs, msg_type::COMMAND_COMPLETE, b"INSERT 0 1\0").unwrap();
        feed(&mut m, &mut bs, msg_type::PARSE_COMPLETE, b"").unwrap();
        feed(&mut m, &mut bs, msg_type::BIND_COMPLETE, b"").unwrap();
        feed(&mut m, &mut bs, msg_type::NO_DATA, b"").unwrap();
        feed(&mut m, &mut bs, msg_type::ERROR_RESPONSE, ERROR).unwrap();
        // a notice while draining is fine, anything else is not
        let action = feed(&mut m, &mut bs, msg_type::NOTICE_RESPONSE, b"SNOTICE\0Mhi\0\0").unwrap();
        assert!(matches!(action, Action::HandleAsyncMessageAndReadMessage(AsyncMessage::Notice(_))));
        feed(&mut m, &mut bs, msg_type::READY_FOR_QUERY, b"I").unwrap();

        let (results, error) = m.finish();
        assert_eq!(error.unwrap().sqlstate(), Some("23505"));
        let phases: Vec<_> = results.iter().map(|r| r.phase).collect();
        assert_eq!(phases, [Phase::Done, Phase::Failed, Phase::Skipped]);
        assert_eq!(results[0].tag.unwrap().rows, Some(1));
        assert!(results[1].parsed);
        assert_eq!(results[1].sqlstate.as_deref(), Some("23505"));
        assert!(!results[2].parsed);
    }

    #[test]
    fn test_message_while_draining_is_fatal() {
        let mut handler = CollectHandler::<(i32,)>::new();
        let mut bs = BufferSet::new();
        let mut m = PipelineStateMachine::new(&mut handler, 0, vec![one_shot(0)]);
        m.step(&mut bs).unwrap();
        feed(&mut m, &mut bs, msg_type::ERROR_RESPONSE, ERROR).unwrap();
        let err = feed(&mut m, &mut bs, msg_type::BIND_COMPLETE, b"").unwrap_err();
        assert!(err.is_connection_broken());
    }

    #[test]
    fn test_out_of_order_is_fatal() {
        let mut handler = CollectHandler::<(i32,)>::new();
        let mut bs = BufferSet::new();
        let mut m = PipelineStateMachine::new(&mut handler, 0, vec![one_shot(0)]);
        m.step(&mut bs).unwrap();
        let err = feed(&mut m, &mut bs, msg_type::BIND_COMPLETE, b"").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_early_ready_is_fatal() {
        let mut handler = CollectHandler::<(i32,)>::new();
        let mut bs = BufferSet::new();
        let mut m = PipelineStateMachine::new(&mut handler, 0, vec![one_shot(0), one_shot(1)]);
        m.step(&mut bs).unwrap();
        for msg in [msg_type::PARSE_COMPLETE, msg_type::BIND_COMPLETE, msg_type::NO_DATA] {
            feed(&mut m, &mut bs, msg, b"").unwrap();
        }
        feed(&mut m, &mut bs, msg_type::COMMAND_COMPLETE, b"UPDATE 3\0").unwrap();
        let err = feed(&mut m, &mut bs, msg_type::READY_FOR_QUERY, b"I").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_fatal_severity() {
        let mut handler = CollectHandler::<(i32,)>::new();
        let mut bs = BufferSet::new();
        let mut m = PipelineStateMachine::new(&mut handler, 0, vec![one_shot(0)]);
        m.step(&mut bs).unwrap();
        let err = feed(&mut m, &mut bs, msg_type::ERROR_RESPONSE, b"SFATAL\0C57P01\0Mbye\0\0").unwrap_err();
        assert!(err.is_connection_broken());
    }

    #[test]
    fn test_malformed_tag_is_local() {
        let mut handler = CollectHandler::<(i32,)>::new();
        let mut bs = BufferSet::new();
        let mut m = PipelineStateMachine::new(&mut handler, 0, vec![one_shot(0), one_shot(1)]);
        m.step(&mut bs).unwrap();
        for msg in [msg_type::PARSE_COMPLETE, msg_type::BIND_COMPLETE, msg_type::NO_DATA] {
            feed(&mut m, &mut bs, msg, b"").unwrap();
        }
        feed(&mut m, &mut bs, msg_type::COMMAND_COMPLETE, b"INSERT 0 x\0").unwrap();
        feed(&mut m, &mut bs, msg_type::PARSE_COMPLETE, b"").unwrap();
        feed(&mut m, &mut bs, msg_type::BIND_COMPLETE, b"").unwrap();
        feed(&mut m, &mut bs, msg_type::ROW_DESCRIPTION, &int4_description()).unwrap();
        feed(&mut m, &mut bs, msg_type::DATA_ROW, &text_row("5")).unwrap();
        feed(&mut m, &mut bs, msg_type::COMMAND_COMPLETE, b"SELECT 1\0").unwrap();
        feed(&mut m, &mut bs, msg_type::READY_FOR_QUERY, b"I").unwrap();

        let (results, error) = m.finish();
        assert!(matches!(error, Some(Error::MalformedTag { .. })));
        assert!(results.iter().all(|r| r.phase == Phase::Done));
        assert!(results[0].tag.is_none());
        // callbacks stop after the first error
        assert!(handler.is_empty());
    }
}
