//! Connection-owned query engine.
//!
//! A [`Session`] holds everything a connection knows between executions:
//! the options, the statement cache and the type lookup. It turns bound
//! frames into pipelines of protocol messages and settles the cache once the
//! server has answered. The sync and tokio drivers only move bytes.

use crate::bind::{BindFrame, EncodedParams, Param, StatementRef, ToParams, encode_params};
use crate::buffer_set::BufferSet;
use crate::cache::{PlanKind, Plan, PromotionState, StatementCache};
use crate::command_tag::CommandTag;
use crate::error::{Error, Result};
use crate::handler::ResultHandler;
use crate::opts::{Opts, QueryMode};
use crate::protocol::backend::query::encode_row_description;
use crate::protocol::backend::{DataRow, RowDescription};
use crate::protocol::frontend::{
    write_bind, write_close_statement, write_describe_portal, write_describe_statement,
    write_execute, write_parse, write_sync,
};
use crate::protocol::types::{FormatCode, Oid};
use crate::rewrite::{RewriteChunk, distribute, rewrite_batch};
use crate::sql::{self, SqlCommand};
use crate::state::{AsyncMessage, Phase, PipelineItem, PipelineStateMachine, ResultSource};
use crate::types::{BuiltinTypes, TypeLookup};

/// One statement to run in a pipeline.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Unit<'a> {
    /// Statement index reported to the handler
    pub stmt: usize,
    pub sql: &'a str,
    pub params: &'a [Param],
    /// Nothing to parse; never cached
    pub empty: bool,
}

/// Cache bookkeeping for a pipeline in flight.
#[derive(Debug)]
pub(crate) struct PendingPipeline {
    plans: Vec<Option<Plan>>,
}

/// How a batch is executed.
#[derive(Debug)]
pub(crate) enum BatchPlan {
    /// One Query message per entry
    Simple,
    /// Merged INSERTs, one pipeline
    Rewritten(Vec<RewriteChunk>),
    /// Every entry in one pipeline
    PerFrame,
}

/// Connection state shared by the drivers.
pub struct Session {
    opts: Opts,
    cache: StatementCache,
    types: Box<dyn TypeLookup + Send>,
    params: EncodedParams,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("opts", &self.opts)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(opts: Opts) -> Self {
        Self::with_types(opts, BuiltinTypes)
    }

    /// Create a session resolving type metadata through `types`.
    pub fn with_types(opts: Opts, types: impl TypeLookup + Send + 'static) -> Self {
        Self {
            cache: StatementCache::new(opts.prepare_threshold, opts.statement_cache_capacity),
            opts,
            types: Box::new(types),
            params: EncodedParams::default(),
        }
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    /// Scan `sql` into statements. Nothing is sent to the server.
    pub fn prepare(&self, sql: &str) -> Result<StatementRef> {
        let query = sql::parse(sql, self.opts.standard_conforming_strings)?;
        Ok(StatementRef::new(query))
    }

    /// Bind values to a prepared query.
    pub fn bind<P: ToParams + ?Sized>(&self, statement: &StatementRef, params: &P) -> Result<BindFrame> {
        BindFrame::new(
            statement.clone(),
            params.to_params(),
            self.opts.standard_conforming_strings,
        )
    }

    /// Promotion state of `sql`, which may use `?` placeholders.
    pub fn promotion_state(&self, sql: &str) -> PromotionState {
        match sql::parse(sql, self.opts.standard_conforming_strings) {
            Ok(query) => match query.statements.as_slice() {
                [stmt] => self.cache.promotion_state(&stmt.sql),
                _ => PromotionState::Unseen,
            },
            Err(_) => PromotionState::Unseen,
        }
    }

    /// Number of named statements held on the server.
    pub fn cached_statements(&self) -> usize {
        self.cache.len()
    }

    /// Forget every named statement. The Close messages go out with the
    /// next pipeline.
    pub fn clear_statement_cache(&mut self) {
        self.cache.clear();
    }

    /// Forget the named statements of `statement`.
    pub(crate) fn forget(&mut self, statement: &StatementRef) {
        for stmt in statement.statements() {
            self.cache.remove(&stmt.sql);
        }
    }

    pub(crate) fn has_pending_closes(&self) -> bool {
        self.cache.has_pending_closes()
    }

    /// React to a message the server sent outside the exchange in progress.
    pub fn handle_async(&mut self, msg: &AsyncMessage) {
        match msg {
            AsyncMessage::Notice(fields) => {
                tracing::debug!(
                    severity = ?fields.severity,
                    code = ?fields.code,
                    message = ?fields.message,
                    "server notice"
                );
            }
            AsyncMessage::ParameterChanged { name, value } => {
                if name == "standard_conforming_strings" {
                    self.opts.standard_conforming_strings = value == "on";
                    tracing::debug!(value = %value, "standard_conforming_strings changed");
                }
            }
            AsyncMessage::Notification { channel, .. } => {
                tracing::trace!(channel = %channel, "ignoring notification");
            }
        }
    }

    pub(crate) fn query_mode(&self) -> QueryMode {
        self.opts.query_mode
    }

    /// Pipeline units for one frame; statement indexes count from `first`.
    pub(crate) fn frame_units<'f>(frame: &'f BindFrame, first: usize) -> Vec<Unit<'f>> {
        frame
            .parts()
            .enumerate()
            .map(|(i, (stmt, params))| Unit {
                stmt: first + i,
                sql: &stmt.sql,
                params,
                empty: stmt.command == SqlCommand::Empty,
            })
            .collect()
    }

    /// Write the queued closes, then `units`, then Sync into the write buffer.
    ///
    /// Nothing is planned when encoding fails, and the closes stay queued.
    pub(crate) fn start_pipeline<'h, H: ResultHandler>(
        &mut self,
        buffer_set: &mut BufferSet,
        units: &[Unit<'_>],
        handler: &'h mut H,
    ) -> Result<(PipelineStateMachine<'h, H>, PendingPipeline)> {
        let closes = self.cache.take_pending_closes();
        let buf = &mut buffer_set.write_buffer;
        buf.clear();

        let mut plans = Vec::with_capacity(units.len());
        let mut items = Vec::with_capacity(units.len());
        if let Err(e) = self.write_units(buf, &closes, units, &mut plans, &mut items) {
            for plan in plans.iter().rev().flatten() {
                self.cache.rollback(plan);
            }
            self.cache.restore_pending_closes(closes);
            buf.clear();
            return Err(e);
        }

        let machine = PipelineStateMachine::new(handler, closes.len(), items);
        Ok((machine, PendingPipeline { plans }))
    }

    fn write_units(
        &mut self,
        buf: &mut Vec<u8>,
        closes: &[String],
        units: &[Unit<'_>],
        plans: &mut Vec<Option<Plan>>,
        items: &mut Vec<PipelineItem>,
    ) -> Result<()> {
        for name in closes {
            write_close_statement(buf, name)?;
        }
        for unit in units {
            let (plan, item) = self.write_unit(buf, unit)?;
            plans.push(plan);
            items.push(item);
        }
        write_sync(buf)
    }

    fn write_unit(&mut self, buf: &mut Vec<u8>, unit: &Unit<'_>) -> Result<(Option<Plan>, PipelineItem)> {
        let string_type = self.opts.string_type;
        let supplied: Vec<Oid> = unit.params.iter().map(|p| p.wire_oid(string_type)).collect();
        encode_params(unit.params, string_type, self.opts.binary_transfer, &mut self.params)?;

        if unit.empty {
            write_parse(buf, "", unit.sql, &supplied)?;
            write_bind(buf, "", "", &self.params, &[])?;
            write_describe_portal(buf, "")?;
            write_execute(buf, "", 0)?;
            let item = PipelineItem {
                stmt: unit.stmt,
                parse: true,
                source: ResultSource::Portal,
            };
            return Ok((None, item));
        }

        let plan = self.cache.plan(unit.sql, &supplied);
        match self.write_planned(buf, unit, &plan, &supplied) {
            Ok(item) => {
                tracing::trace!(stmt = unit.stmt, plan = ?plan.kind, "planned statement");
                Ok((Some(plan), item))
            }
            Err(e) => {
                self.cache.rollback(&plan);
                Err(e)
            }
        }
    }

    fn write_planned(
        &self,
        buf: &mut Vec<u8>,
        unit: &Unit<'_>,
        plan: &Plan,
        supplied: &[Oid],
    ) -> Result<PipelineItem> {
        let item = match &plan.kind {
            PlanKind::OneShot => {
                write_parse(buf, "", unit.sql, supplied)?;
                write_bind(buf, "", "", &self.params, &[])?;
                write_describe_portal(buf, "")?;
                write_execute(buf, "", 0)?;
                PipelineItem {
                    stmt: unit.stmt,
                    parse: true,
                    source: ResultSource::Portal,
                }
            }
            PlanKind::Prepare { name } => {
                write_parse(buf, name, unit.sql, supplied)?;
                write_describe_statement(buf, name)?;
                write_bind(buf, "", name, &self.params, &[])?;
                write_execute(buf, "", 0)?;
                PipelineItem {
                    stmt: unit.stmt,
                    parse: true,
                    source: ResultSource::Statement,
                }
            }
            PlanKind::Reuse {
                name,
                columns: Some(columns),
            } => {
                let formats: Vec<FormatCode> = columns
                    .iter()
                    .map(|c| {
                        if self.opts.binary_transfer && self.types.supports_binary(c.tail.type_oid.get()) {
                            FormatCode::Binary
                        } else {
                            FormatCode::Text
                        }
                    })
                    .collect();
                write_bind(buf, "", name, &self.params, &formats)?;
                write_execute(buf, "", 0)?;
                let description = if columns.is_empty() {
                    None
                } else {
                    let mut payload = Vec::new();
                    encode_row_description(
                        &mut payload,
                        columns
                            .iter()
                            .zip(&formats)
                            .map(|(c, &f)| (c.name.as_str(), c.tail, f)),
                    );
                    Some(payload)
                };
                PipelineItem {
                    stmt: unit.stmt,
                    parse: false,
                    source: ResultSource::Cached(description),
                }
            }
            PlanKind::Reuse { name, columns: None } => {
                write_bind(buf, "", name, &self.params, &[])?;
                write_describe_portal(buf, "")?;
                write_execute(buf, "", 0)?;
                PipelineItem {
                    stmt: unit.stmt,
                    parse: false,
                    source: ResultSource::Portal,
                }
            }
        };
        Ok(item)
    }

    /// Settle the cache after the pipeline drained, then report its outcome.
    pub(crate) fn finish_pipeline<H: ResultHandler>(
        &mut self,
        machine: PipelineStateMachine<'_, H>,
        pending: PendingPipeline,
    ) -> Result<()> {
        let (results, error) = machine.finish();
        // Later plans saw the counts of earlier ones; undo them last to first.
        for (plan, result) in pending.plans.iter().zip(&results).rev() {
            let Some(plan) = plan else {
                continue;
            };
            match &plan.kind {
                PlanKind::Reuse { name, .. } => {
                    let stale = result.phase == Phase::Failed
                        && matches!(result.sqlstate.as_deref(), Some("26000") | Some("0A000"));
                    if stale {
                        self.cache.invalidate(plan.sql(), name);
                    } else {
                        self.cache.commit(plan, result.columns.clone());
                    }
                }
                _ if result.parsed => self.cache.commit(plan, result.columns.clone()),
                _ => self.cache.rollback(plan),
            }
        }
        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Decide how to execute a batch.
    pub(crate) fn batch_plan(&self, frames: &[BindFrame]) -> BatchPlan {
        if self.opts.query_mode == QueryMode::Simple {
            return BatchPlan::Simple;
        }
        if self.opts.rewrite_batched_inserts
            && let Some(chunks) = rewrite_batch(frames, self.opts.max_rewrite_rows)
        {
            return BatchPlan::Rewritten(chunks);
        }
        BatchPlan::PerFrame
    }
}

/// Pipeline units for merged INSERTs, one statement index per chunk.
pub(crate) fn chunk_units(chunks: &[RewriteChunk]) -> Vec<Unit<'_>> {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| Unit {
            stmt: i,
            sql: &chunk.sql,
            params: &chunk.params,
            empty: false,
        })
        .collect()
}

/// Pipeline units for a batch of frames, one statement index per frame.
pub(crate) fn batch_units(frames: &[BindFrame]) -> Vec<Unit<'_>> {
    frames
        .iter()
        .enumerate()
        .flat_map(|(i, frame)| {
            Session::frame_units(frame, 0)
                .into_iter()
                .map(move |unit| Unit { stmt: i, ..unit })
        })
        .collect()
}

/// Records the count of every batch entry.
#[derive(Debug)]
pub(crate) struct BatchHandler {
    /// Statements still to complete, per entry
    remaining: Vec<usize>,
    counts: Vec<Option<u64>>,
}

impl BatchHandler {
    /// `statements[i]` is the number of statements entry `i` runs.
    pub fn new(statements: impl IntoIterator<Item = usize>) -> Self {
        let remaining: Vec<usize> = statements.into_iter().collect();
        let counts = vec![None; remaining.len()];
        Self { remaining, counts }
    }

    pub fn for_frames(frames: &[BindFrame]) -> Self {
        Self::new(frames.iter().map(|f| f.statement().statements().len()))
    }

    /// Counts of the leading entries that completed.
    fn completed(&self) -> &[Option<u64>] {
        let done = self.remaining.iter().take_while(|&&n| n == 0).count();
        &self.counts[..done]
    }

    /// Per-row counts, expanding merged chunks.
    pub fn finish(self, chunks: Option<&[RewriteChunk]>, outcome: Result<()>) -> Result<Vec<Option<u64>>> {
        let counts = match chunks {
            Some(chunks) => chunks
                .iter()
                .zip(self.completed())
                .flat_map(|(chunk, &merged)| distribute(chunk.rows, merged))
                .collect(),
            None => self.completed().to_vec(),
        };
        match outcome {
            Ok(()) => Ok(counts),
            Err(e) => Err(Error::Batch {
                completed: counts,
                source: Box::new(e),
            }),
        }
    }
}

impl ResultHandler for BatchHandler {
    fn row(&mut self, _stmt: usize, _cols: RowDescription<'_>, _row: DataRow<'_>) -> Result<()> {
        Ok(())
    }

    fn result_end(&mut self, stmt: usize, tag: &CommandTag) -> Result<()> {
        if let (Some(count), Some(remaining)) = (self.counts.get_mut(stmt), self.remaining.get_mut(stmt)) {
            *count = tag.rows;
            *remaining = remaining.saturating_sub(1);
        }
        Ok(())
    }
}
