//! Batched INSERT rewriting.
//!
//! A batch of single-row `INSERT ... VALUES (...)` executions of one
//! statement is merged into multi-row INSERTs. Chunk sizes are powers of
//! two so only a handful of distinct statement texts reach the cache.

use std::fmt::Write;

use crate::bind::{BindFrame, Param};
use crate::sql::{ParsedStatement, SqlCommand};

/// Most parameters a merged statement may carry.
const MAX_MERGED_PARAMS: usize = i16::MAX as usize;

/// One merged INSERT.
#[derive(Debug, Clone)]
pub struct RewriteChunk {
    /// SQL with one VALUES tuple per row
    pub sql: String,
    pub params: Vec<Param>,
    /// Batch entries merged into this chunk
    pub rows: usize,
}

/// Merge `frames` into multi-row INSERTs of at most `max_rows` rows each.
///
/// Returns `None` when the batch cannot be merged; it is then executed one
/// frame at a time.
pub fn rewrite_batch(frames: &[BindFrame], max_rows: usize) -> Option<Vec<RewriteChunk>> {
    let first = frames.first()?;
    let [stmt] = first.statement().statements() else {
        return None;
    };
    let values = eligible_values(stmt)?;
    if frames.len() < 2
        || frames.iter().any(|frame| match frame.statement().statements() {
            [other] => other.sql != stmt.sql,
            _ => true,
        })
    {
        return None;
    }

    let width = stmt.param_count;
    let limit = max_rows.min(MAX_MERGED_PARAMS / width.max(1)).max(1);
    let prefix = &stmt.sql[..values.start];
    let suffix = &stmt.sql[values.end..];

    let mut chunks = Vec::new();
    let mut rest = frames;
    while !rest.is_empty() {
        let rows = prev_power_of_two(rest.len().min(limit));
        let (head, tail) = rest.split_at(rows);
        rest = tail;

        let mut sql = String::with_capacity(prefix.len() + suffix.len() + rows * values.len());
        sql.push_str(prefix);
        for r in 0..rows {
            if r > 0 {
                sql.push_str(", ");
            }
            push_tuple(&mut sql, stmt, values.clone(), r * width);
        }
        sql.push_str(suffix);

        let params = head.iter().flat_map(|f| f.params().iter().cloned()).collect();
        chunks.push(RewriteChunk { sql, params, rows });
    }

    tracing::debug!(
        frames = frames.len(),
        chunks = chunks.len(),
        "rewrote batched insert"
    );
    Some(chunks)
}

/// Per-row counts for a merged INSERT of `rows` rows that reported `merged`.
pub fn distribute(rows: usize, merged: Option<u64>) -> Vec<Option<u64>> {
    if merged == Some(rows as u64) {
        vec![Some(1); rows]
    } else {
        vec![None; rows]
    }
}

/// The VALUES tuple when every placeholder of `stmt` lies inside it as
/// `$1..$n` in order.
fn eligible_values(stmt: &ParsedStatement) -> Option<std::ops::Range<usize>> {
    if stmt.command != SqlCommand::Insert || stmt.returning {
        return None;
    }
    let values = stmt.values.clone()?;
    if stmt.placeholders.len() != stmt.param_count {
        return None;
    }
    let in_order = stmt.placeholders.iter().enumerate().all(|(i, range)| {
        values.start <= range.start
            && range.end <= values.end
            && stmt.sql[range.clone()][1..].parse::<usize>().ok() == Some(i + 1)
    });
    in_order.then_some(values)
}

/// Append the tuple with its markers shifted by `offset`.
fn push_tuple(out: &mut String, stmt: &ParsedStatement, values: std::ops::Range<usize>, offset: usize) {
    let mut last = values.start;
    for (i, range) in stmt.placeholders.iter().enumerate() {
        out.push_str(&stmt.sql[last..range.start]);
        let _ = write!(out, "${}", offset + i + 1);
        last = range.end;
    }
    out.push_str(&stmt.sql[last..values.end]);
}

fn prev_power_of_two(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        1 << (usize::BITS - 1 - n.leading_zeros())
    }
}
