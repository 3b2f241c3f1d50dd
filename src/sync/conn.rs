//! Synchronous connection.

use std::io::{Read, Write};

use crate::bind::{BindFrame, StatementRef, ToParams};
use crate::buffer_set::BufferSet;
use crate::cache::PromotionState;
use crate::error::{Error, Result};
use crate::handler::{CollectHandler, DropHandler, FirstRowHandler, ResultHandler};
use crate::opts::{Opts, QueryMode};
use crate::protocol::types::TransactionStatus;
use crate::row::FromRow;
use crate::session::{BatchHandler, BatchPlan, Session, Unit, batch_units, chunk_units};
use crate::state::{Action, SimpleQueryStateMachine, StateMachine};

use super::stream::Stream;

/// Synchronous connection over an already connected and authenticated
/// stream.
///
/// # Example
///
/// ```ignore
/// let mut conn = Conn::new(tcp, "postgres://localhost/db?prepareThreshold=3")?;
/// let stmt = conn.prepare("INSERT INTO users (id, name) VALUES (?, ?)")?;
/// let frames = vec![conn.bind(&stmt, &(1, "alice"))?, conn.bind(&stmt, &(2, "bob"))?];
/// let counts = conn.execute_batch(&frames)?;
/// ```
pub struct Conn<S> {
    stream: Stream<S>,
    buffer_set: BufferSet,
    session: Session,
    transaction_status: TransactionStatus,
    is_broken: bool,
}

impl<S: Read + Write> Conn<S> {
    /// Wrap a connected stream.
    pub fn new<O: TryInto<Opts>>(stream: S, opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;
        Ok(Self::with_session(stream, Session::new(opts)))
    }

    /// Wrap a connected stream with a preconfigured session.
    pub fn with_session(stream: S, session: Session) -> Self {
        Self {
            stream: Stream::new(stream),
            buffer_set: BufferSet::new(),
            session,
            transaction_status: TransactionStatus::Idle,
            is_broken: false,
        }
    }

    /// Get the current transaction status.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Check if currently in a transaction.
    pub fn in_transaction(&self) -> bool {
        self.transaction_status.in_transaction()
    }

    /// Check if the connection is broken.
    pub fn is_broken(&self) -> bool {
        self.is_broken
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }

    /// Promotion state of `sql` in the statement cache.
    pub fn promotion_state(&self, sql: &str) -> PromotionState {
        self.session.promotion_state(sql)
    }

    /// Forget every cached statement. The server-side statements are closed
    /// with the next execution.
    pub fn clear_statement_cache(&mut self) {
        self.session.clear_statement_cache();
    }

    fn check(&self) -> Result<()> {
        if self.is_broken {
            return Err(Error::ConnectionBroken);
        }
        Ok(())
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result
            && e.is_connection_broken()
        {
            tracing::warn!(error = %e, "connection is broken");
            self.is_broken = true;
        }
        result
    }

    fn drive<M: StateMachine>(&mut self, machine: &mut M) -> Result<()> {
        loop {
            match machine.step(&mut self.buffer_set)? {
                Action::ReadMessage => {
                    self.stream.read_message(&mut self.buffer_set)?;
                }
                Action::Write => {
                    self.stream.write_all(&self.buffer_set.write_buffer)?;
                    self.stream.flush()?;
                }
                Action::WriteAndReadMessage => {
                    self.stream.write_all(&self.buffer_set.write_buffer)?;
                    self.stream.flush()?;
                    self.stream.read_message(&mut self.buffer_set)?;
                }
                Action::HandleAsyncMessageAndReadMessage(msg) => {
                    self.session.handle_async(&msg);
                    self.stream.read_message(&mut self.buffer_set)?;
                }
                Action::Finished => {
                    self.transaction_status = machine.transaction_status();
                    break;
                }
            }
        }
        Ok(())
    }

    fn run_pipeline<H: ResultHandler>(&mut self, units: &[Unit<'_>], handler: &mut H) -> Result<()> {
        let (mut machine, pending) =
            self.session
                .start_pipeline(&mut self.buffer_set, units, handler)?;
        self.drive(&mut machine)?;
        self.session.finish_pipeline(machine, pending)
    }

    fn run_simple<H: ResultHandler>(&mut self, frame: &BindFrame, handler: &mut H) -> Result<()> {
        let sql = frame.inline_sql()?;
        let mut machine = SimpleQueryStateMachine::new(handler, &sql);
        self.drive(&mut machine)?;
        match machine.finish() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Scan `sql` into statements. `?` and `$n` are placeholders.
    pub fn prepare(&self, sql: &str) -> Result<StatementRef> {
        self.session.prepare(sql)
    }

    /// Bind values to a prepared query.
    pub fn bind<P: ToParams + ?Sized>(&self, statement: &StatementRef, params: &P) -> Result<BindFrame> {
        self.session.bind(statement, params)
    }

    /// Execute a bound query, passing its results to `handler`.
    pub fn execute<H: ResultHandler>(&mut self, frame: &BindFrame, handler: &mut H) -> Result<()> {
        self.check()?;
        let result = match self.session.query_mode() {
            QueryMode::Simple => self.run_simple(frame, handler),
            QueryMode::Extended => self.run_pipeline(&Session::frame_units(frame, 0), handler),
        };
        self.track(result)
    }

    /// Execute and return the row count of the last statement.
    pub fn execute_drop(&mut self, frame: &BindFrame) -> Result<Option<u64>> {
        let mut handler = DropHandler::new();
        self.execute(frame, &mut handler)?;
        Ok(handler.rows_affected())
    }

    /// Execute and collect typed rows.
    pub fn execute_collect<T: for<'a> FromRow<'a>>(&mut self, frame: &BindFrame) -> Result<Vec<T>> {
        let mut handler = CollectHandler::<T>::new();
        self.execute(frame, &mut handler)?;
        Ok(handler.into_rows())
    }

    /// Execute and return the first typed row.
    pub fn execute_first<T: for<'a> FromRow<'a>>(&mut self, frame: &BindFrame) -> Result<Option<T>> {
        let mut handler = FirstRowHandler::<T>::new();
        self.execute(frame, &mut handler)?;
        Ok(handler.into_row())
    }

    /// Execute every frame and return one row count per frame.
    ///
    /// On failure the error is [`Error::Batch`] holding the counts of the
    /// frames that completed.
    pub fn execute_batch(&mut self, frames: &[BindFrame]) -> Result<Vec<Option<u64>>> {
        self.check()?;
        if frames.is_empty() {
            return Ok(Vec::new());
        }
        let result = match self.session.batch_plan(frames) {
            BatchPlan::Simple => self.batch_simple(frames),
            BatchPlan::Rewritten(chunks) => {
                let mut handler = BatchHandler::new(chunks.iter().map(|_| 1));
                let outcome = self.run_pipeline(&chunk_units(&chunks), &mut handler);
                handler.finish(Some(&chunks), outcome)
            }
            BatchPlan::PerFrame => {
                let mut handler = BatchHandler::for_frames(frames);
                let outcome = self.run_pipeline(&batch_units(frames), &mut handler);
                handler.finish(None, outcome)
            }
        };
        self.track(result)
    }

    fn batch_simple(&mut self, frames: &[BindFrame]) -> Result<Vec<Option<u64>>> {
        let mut counts = Vec::with_capacity(frames.len());
        for frame in frames {
            let mut handler = DropHandler::new();
            if let Err(e) = self.run_simple(frame, &mut handler) {
                return Err(Error::Batch {
                    completed: counts,
                    source: Box::new(e),
                });
            }
            counts.push(handler.rows_affected());
        }
        Ok(counts)
    }

    /// Release the server-side statements of `statement`.
    pub fn close(&mut self, statement: &StatementRef) -> Result<()> {
        self.check()?;
        self.session.forget(statement);
        if !self.session.has_pending_closes() {
            return Ok(());
        }
        let mut handler = DropHandler::new();
        let result = self.run_pipeline(&[], &mut handler);
        self.track(result)
    }

    /// Prepare, bind and execute `sql` in one call.
    pub fn query<P: ToParams + ?Sized, H: ResultHandler>(
        &mut self,
        sql: &str,
        params: &P,
        handler: &mut H,
    ) -> Result<()> {
        let statement = self.prepare(sql)?;
        let frame = self.bind(&statement, params)?;
        self.execute(&frame, handler)
    }

    /// Run `sql` and return the row count of the last statement.
    pub fn query_drop<P: ToParams + ?Sized>(&mut self, sql: &str, params: &P) -> Result<Option<u64>> {
        let statement = self.prepare(sql)?;
        let frame = self.bind(&statement, params)?;
        self.execute_drop(&frame)
    }

    /// Run `sql` and collect typed rows.
    pub fn query_collect<T: for<'a> FromRow<'a>, P: ToParams + ?Sized>(
        &mut self,
        sql: &str,
        params: &P,
    ) -> Result<Vec<T>> {
        let statement = self.prepare(sql)?;
        let frame = self.bind(&statement, params)?;
        self.execute_collect(&frame)
    }

    /// Run `sql` and return the first typed row.
    pub fn query_first<T: for<'a> FromRow<'a>, P: ToParams + ?Sized>(
        &mut self,
        sql: &str,
        params: &P,
    ) -> Result<Option<T>> {
        let statement = self.prepare(sql)?;
        let frame = self.bind(&statement, params)?;
        self.execute_first(&frame)
    }
}
