//! Command completion tags.
//!
//! A CommandComplete message carries a tag such as `INSERT 0 5` or
//! `SELECT 3`. The first word names the command; the remaining words are
//! counts.

use std::fmt;

use crate::error::{Error, Result};

/// Command named by the first word of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Select,
    Insert,
    Update,
    Delete,
    Move,
    Fetch,
    Copy,
    /// Any other command (`CREATE TABLE`, `BEGIN`, `MERGE`, ...)
    Other,
}

impl CommandKind {
    fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "SELECT" => CommandKind::Select,
            "INSERT" => CommandKind::Insert,
            "UPDATE" => CommandKind::Update,
            "DELETE" => CommandKind::Delete,
            "MOVE" => CommandKind::Move,
            "FETCH" => CommandKind::Fetch,
            "COPY" => CommandKind::Copy,
            _ => CommandKind::Other,
        }
    }
}

/// Parsed command completion tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTag {
    pub kind: CommandKind,
    /// Affected or returned rows, absent when the tag carries no count
    pub rows: Option<u64>,
    /// Object id of the inserted row (INSERT only, always 0 on modern servers)
    pub oid: Option<u32>,
}

impl CommandTag {
    /// Parse a tag. Unknown commands are not an error.
    ///
    /// Every word after a known command must be a base-10 integer; a
    /// malformed count is an error rather than 0.
    pub fn parse(tag: &str) -> Result<Self> {
        let mut words = tag.split_ascii_whitespace();
        let kind = CommandKind::from_keyword(words.next().unwrap_or_default());

        if kind == CommandKind::Other {
            return Ok(Self {
                kind,
                rows: None,
                oid: None,
            });
        }

        let malformed = |source| Error::MalformedTag {
            tag: tag.to_string(),
            source,
        };
        let words: Vec<&str> = words.collect();
        let oid = match (kind, words.as_slice()) {
            (CommandKind::Insert, [oid, _]) => Some(oid.parse::<u32>().map_err(malformed)?),
            _ => None,
        };
        let mut rows = None;
        for word in &words {
            rows = Some(word.parse::<u64>().map_err(malformed)?);
        }

        Ok(Self { kind, rows, oid })
    }

    /// A tag for a statement that produced no count.
    pub fn other() -> Self {
        Self {
            kind: CommandKind::Other,
            rows: None,
            oid: None,
        }
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = match self.kind {
            CommandKind::Select => "SELECT",
            CommandKind::Insert => "INSERT",
            CommandKind::Update => "UPDATE",
            CommandKind::Delete => "DELETE",
            CommandKind::Move => "MOVE",
            CommandKind::Fetch => "FETCH",
            CommandKind::Copy => "COPY",
            CommandKind::Other => "OTHER",
        };
        f.write_str(keyword)?;
        if let Some(oid) = self.oid {
            write!(f, " {}", oid)?;
        }
        if let Some(rows) = self.rows {
            write!(f, " {}", rows)?;
        }
        Ok(())
    }
}
