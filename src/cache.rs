//! Prepared statement cache and the promotion policy.
//!
//! Every statement text starts out executed through the unnamed statement.
//! Once it has been executed `prepare_threshold` times it is parsed under a
//! generated name and later executions skip Parse. Named statements are
//! held in an LRU bounded by the cache capacity; evicted names are queued
//! as Close messages for the next pipeline.
//!
//! Planning is provisional: [`StatementCache::plan`] records its effects
//! immediately, so a later statement of the same pipeline can reuse a name
//! parsed earlier in it, and [`StatementCache::rollback`] undoes them when
//! the Parse never succeeded.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::bind::requires_reparse;
use crate::protocol::backend::FieldDescriptionTail;
use crate::protocol::types::Oid;

/// Promotion state of one statement text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionState {
    /// Never executed, or forgotten
    Unseen,
    /// Executed this many times through the unnamed statement
    Counting(u32),
    /// Held as a named statement
    Promoted,
}

/// A result column as described by the server.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub tail: FieldDescriptionTail,
}

pub type SharedColumns = Arc<[ColumnInfo]>;

/// A named server-side statement.
#[derive(Debug, Clone)]
pub struct StatementHandle {
    pub name: String,
    /// Types the statement was parsed with
    pub param_oids: Vec<Oid>,
    /// Result columns, once described. Empty when the statement returns no rows.
    pub columns: Option<SharedColumns>,
}

/// How one statement is sent.
#[derive(Debug, Clone)]
pub enum PlanKind {
    /// Parse into the unnamed statement
    OneShot,
    /// Parse under a new name
    Prepare { name: String },
    /// Bind an existing named statement
    Reuse {
        name: String,
        columns: Option<SharedColumns>,
    },
}

/// A planned statement and what it takes to undo the plan.
#[derive(Debug, Clone)]
pub struct Plan {
    pub kind: PlanKind,
    sql: String,
    /// Counter value before planning, if the plan changed it
    previous_count: Option<Option<u32>>,
}

impl Plan {
    pub fn statement_name(&self) -> &str {
        match &self.kind {
            PlanKind::OneShot => "",
            PlanKind::Prepare { name } | PlanKind::Reuse { name, .. } => name,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Per-connection statement cache.
#[derive(Debug)]
pub struct StatementCache {
    handles: LruCache<String, StatementHandle>,
    counts: LruCache<String, u32>,
    threshold: u32,
    enabled: bool,
    pending_closes: Vec<String>,
    next_id: u64,
}

impl StatementCache {
    /// `threshold` 0 or `capacity` 0 disables promotion.
    pub fn new(threshold: u32, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let count_cap = NonZeroUsize::new(capacity.saturating_mul(4).max(64)).unwrap_or(NonZeroUsize::MIN);
        Self {
            handles: LruCache::new(cap),
            counts: LruCache::new(count_cap),
            threshold,
            enabled: threshold > 0 && capacity > 0,
            pending_closes: Vec::new(),
            next_id: 0,
        }
    }

    pub fn promotion_state(&self, sql: &str) -> PromotionState {
        if self.handles.contains(sql) {
            return PromotionState::Promoted;
        }
        match self.counts.peek(sql) {
            Some(&n) if n > 0 => PromotionState::Counting(n),
            _ => PromotionState::Unseen,
        }
    }

    /// Decide how `sql` is sent with parameters of the `supplied` types.
    pub fn plan(&mut self, sql: &str, supplied: &[Oid]) -> Plan {
        if !self.enabled {
            return Plan {
                kind: PlanKind::OneShot,
                sql: sql.to_string(),
                previous_count: None,
            };
        }

        if let Some(handle) = self.handles.get(sql) {
            if !requires_reparse(&handle.param_oids, supplied) {
                return Plan {
                    kind: PlanKind::Reuse {
                        name: handle.name.clone(),
                        columns: handle.columns.clone(),
                    },
                    sql: sql.to_string(),
                    previous_count: None,
                };
            }
            tracing::debug!(sql, "parameter types changed, parsing again");
            self.invalidate_key(sql);
        }

        let previous = self.counts.get(sql).copied();
        let count = previous.unwrap_or(0).saturating_add(1);
        self.counts.put(sql.to_string(), count);

        let kind = if count >= self.threshold {
            let name = self.next_name();
            tracing::debug!(sql, name = %name, "promoting statement");
            let handle = StatementHandle {
                name: name.clone(),
                param_oids: supplied.to_vec(),
                columns: None,
            };
            if let Some((key, evicted)) = self.handles.push(sql.to_string(), handle)
                && key != sql
            {
                tracing::debug!(name = %evicted.name, "evicting statement");
                self.pending_closes.push(evicted.name);
            }
            PlanKind::Prepare { name }
        } else {
            PlanKind::OneShot
        };

        Plan {
            kind,
            sql: sql.to_string(),
            previous_count: Some(previous),
        }
    }

    /// Keep the effects of a plan whose Parse (if any) succeeded.
    ///
    /// `columns` are the result columns described during execution.
    pub fn commit(&mut self, plan: &Plan, columns: Option<SharedColumns>) {
        let name = plan.statement_name();
        if name.is_empty() {
            return;
        }
        if let Some(handle) = self.handles.peek_mut(&plan.sql)
            && handle.name == name
            && handle.columns.is_none()
        {
            handle.columns = columns;
        }
    }

    /// Undo a plan whose Parse failed or was never reached.
    pub fn rollback(&mut self, plan: &Plan) {
        if let PlanKind::Prepare { name } = &plan.kind
            && self.handles.peek(&plan.sql).is_some_and(|h| &h.name == name)
        {
            self.handles.pop(&plan.sql);
        }
        match plan.previous_count {
            Some(Some(n)) => {
                self.counts.put(plan.sql.clone(), n);
            }
            Some(None) => {
                self.counts.pop(&plan.sql);
            }
            None => {}
        }
    }

    /// Drop the named statement for `sql` when it is still `name`.
    ///
    /// Used when the server rejects a cached statement. Promotion does not
    /// regress: the next execution parses under a new name.
    pub fn invalidate(&mut self, sql: &str, name: &str) {
        if self.handles.peek(sql).is_some_and(|h| h.name == name) {
            tracing::debug!(sql, name, "invalidating statement");
            self.invalidate_key(sql);
        }
    }

    fn invalidate_key(&mut self, sql: &str) {
        if let Some(handle) = self.handles.pop(sql) {
            self.pending_closes.push(handle.name);
        }
        let pinned = self.threshold.saturating_sub(1);
        self.counts.put(sql.to_string(), pinned.max(self.counts.peek(sql).copied().unwrap_or(0)));
    }

    /// Forget `sql` entirely, closing its named statement.
    pub fn remove(&mut self, sql: &str) {
        if let Some(handle) = self.handles.pop(sql) {
            self.pending_closes.push(handle.name);
        }
        self.counts.pop(sql);
    }

    /// Forget everything, closing every named statement.
    pub fn clear(&mut self) {
        while let Some((_, handle)) = self.handles.pop_lru() {
            self.pending_closes.push(handle.name);
        }
        self.counts.clear();
    }

    /// Names owed a Close message, oldest first.
    pub fn take_pending_closes(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending_closes)
    }

    /// Put back closes taken for a pipeline that was never sent.
    pub fn restore_pending_closes(&mut self, mut names: Vec<String>) {
        names.append(&mut self.pending_closes);
        self.pending_closes = names;
    }

    pub fn has_pending_closes(&self) -> bool {
        !self.pending_closes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    fn next_name(&mut self) -> String {
        self.next_id += 1;
        format!("_zpgx_{}", self.next_id)
    }
}
