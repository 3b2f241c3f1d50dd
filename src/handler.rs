//! Result handlers.

use crate::command_tag::CommandTag;
use crate::error::Result;
use crate::protocol::backend::query::{DataRow, RowDescription};
use crate::row::FromRow;

/// Receives the results of an execution, in request order.
///
/// `stmt` is the index of the statement within the execution: the
/// statement of a multi-statement query, or the entry of a batch.
///
/// Callback patterns by statement type:
/// - SELECT with rows: `result_start` → `row*` → `result_end`
/// - SELECT with 0 rows: `result_start` → `result_end`
/// - INSERT/UPDATE/DELETE: `result_end` only (with affected row count)
///
/// An error returned from a callback fails the execution once the
/// responses already in flight have been consumed.
pub trait ResultHandler {
    fn result_start(&mut self, stmt: usize, cols: RowDescription<'_>) -> Result<()> {
        let _ = (stmt, cols);
        Ok(())
    }

    fn row(&mut self, stmt: usize, cols: RowDescription<'_>, row: DataRow<'_>) -> Result<()>;

    fn result_end(&mut self, stmt: usize, tag: &CommandTag) -> Result<()> {
        let _ = (stmt, tag);
        Ok(())
    }
}

impl<H: ResultHandler + ?Sized> ResultHandler for &mut H {
    fn result_start(&mut self, stmt: usize, cols: RowDescription<'_>) -> Result<()> {
        (**self).result_start(stmt, cols)
    }

    fn row(&mut self, stmt: usize, cols: RowDescription<'_>, row: DataRow<'_>) -> Result<()> {
        (**self).row(stmt, cols, row)
    }

    fn result_end(&mut self, stmt: usize, tag: &CommandTag) -> Result<()> {
        (**self).result_end(stmt, tag)
    }
}

/// A handler that discards rows and keeps the command tags.
#[derive(Debug, Default)]
pub struct DropHandler {
    tags: Vec<CommandTag>,
}

impl DropHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows affected by the last statement, if it reported a count.
    pub fn rows_affected(&self) -> Option<u64> {
        self.tags.last().and_then(|tag| tag.rows)
    }

    pub fn tags(&self) -> &[CommandTag] {
        &self.tags
    }

    pub fn into_tags(self) -> Vec<CommandTag> {
        self.tags
    }
}

impl ResultHandler for DropHandler {
    fn row(&mut self, _stmt: usize, _cols: RowDescription<'_>, _row: DataRow<'_>) -> Result<()> {
        Ok(())
    }

    fn result_end(&mut self, _stmt: usize, tag: &CommandTag) -> Result<()> {
        self.tags.push(*tag);
        Ok(())
    }
}

/// Handler that collects typed rows.
///
/// # Example
///
/// ```ignore
/// let mut handler: CollectHandler<(i32, String)> = CollectHandler::new();
/// conn.query("SELECT id, name FROM users WHERE id > ?", (10,), &mut handler)?;
/// for (id, name) in handler.into_rows() {
///     println!("{}: {}", id, name);
/// }
/// ```
#[derive(Debug)]
pub struct CollectHandler<T> {
    rows: Vec<T>,
}

impl<T> Default for CollectHandler<T> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<T> CollectHandler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<T> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl<T: for<'a> FromRow<'a>> ResultHandler for CollectHandler<T> {
    fn row(&mut self, _stmt: usize, cols: RowDescription<'_>, row: DataRow<'_>) -> Result<()> {
        self.rows.push(T::from_row(cols.fields(), row)?);
        Ok(())
    }
}

/// Handler that keeps only the first row.
#[derive(Debug)]
pub struct FirstRowHandler<T> {
    row: Option<T>,
}

impl<T> Default for FirstRowHandler<T> {
    fn default() -> Self {
        Self { row: None }
    }
}

impl<T> FirstRowHandler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&T> {
        self.row.as_ref()
    }

    pub fn into_row(self) -> Option<T> {
        self.row
    }
}

impl<T: for<'a> FromRow<'a>> ResultHandler for FirstRowHandler<T> {
    fn row(&mut self, _stmt: usize, cols: RowDescription<'_>, row: DataRow<'_>) -> Result<()> {
        if self.row.is_none() {
            self.row = Some(T::from_row(cols.fields(), row)?);
        }
        Ok(())
    }
}
