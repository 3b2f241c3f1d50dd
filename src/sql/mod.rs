//! SQL text handling: placeholder rewriting, statement splitting and
//! INSERT shape detection.

mod scanner;

use std::ops::Range;

use crate::error::Result;

use scanner::Token;

/// Leading command of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlCommand {
    Select,
    Insert,
    Update,
    Delete,
    Other,
    /// Nothing but whitespace and comments
    Empty,
}

/// One statement of a query, with placeholders rewritten to `$n`.
#[derive(Debug, Clone)]
pub struct ParsedStatement {
    /// Rewritten text; this is the statement cache key
    pub sql: String,
    /// Byte ranges of the `$n` markers in `sql`
    pub placeholders: Vec<Range<usize>>,
    pub param_count: usize,
    pub command: SqlCommand,
    /// Range of the single VALUES tuple, parentheses included
    pub values: Option<Range<usize>>,
    /// Has a top-level RETURNING clause
    pub returning: bool,
}

impl ParsedStatement {
    fn empty() -> Self {
        Self {
            sql: String::new(),
            placeholders: Vec::new(),
            param_count: 0,
            command: SqlCommand::Empty,
            values: None,
            returning: false,
        }
    }
}

/// A caller's SQL text split into statements.
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub source: String,
    pub statements: Vec<ParsedStatement>,
    /// Total parameters over all statements
    pub param_count: usize,
}

/// Parse SQL text.
///
/// `?` placeholders become `$1`, `$2`, ... numbered per statement; `??`
/// stands for a literal `?`. Only unterminated quotes and comments are
/// errors.
pub fn parse(sql: &str, standard_conforming_strings: bool) -> Result<ParsedQuery> {
    let scanned = scanner::scan(sql, standard_conforming_strings)?;

    let mut statements: Vec<ParsedStatement> = scanned
        .into_iter()
        .map(|stmt| {
            let command = classify(&stmt.tokens);
            let returning = stmt
                .tokens
                .iter()
                .any(|t| matches!(t, Token::Word(w) if w == "returning"));
            let values = match command {
                SqlCommand::Insert => single_values_tuple(&stmt.tokens),
                _ => None,
            };
            ParsedStatement {
                sql: stmt.sql,
                placeholders: stmt.placeholders,
                param_count: stmt.param_count,
                command,
                values,
                returning,
            }
        })
        .collect();

    if statements.is_empty() {
        statements.push(ParsedStatement::empty());
    }

    let param_count = statements.iter().map(|s| s.param_count).sum();
    Ok(ParsedQuery {
        source: sql.to_string(),
        statements,
        param_count,
    })
}

fn classify(tokens: &[Token]) -> SqlCommand {
    match tokens.first() {
        Some(Token::Word(w)) => match w.as_str() {
            "select" => SqlCommand::Select,
            "insert" => SqlCommand::Insert,
            "update" => SqlCommand::Update,
            "delete" => SqlCommand::Delete,
            _ => SqlCommand::Other,
        },
        _ => SqlCommand::Other,
    }
}

/// The VALUES tuple of `INSERT ... VALUES (...)` when there is exactly one.
///
/// `INSERT ... SELECT`, `DEFAULT VALUES` and multi-row VALUES lists yield
/// `None`.
fn single_values_tuple(tokens: &[Token]) -> Option<Range<usize>> {
    let at = tokens
        .iter()
        .position(|t| matches!(t, Token::Word(w) if w == "values"))?;
    let mut rest = tokens[at + 1..].iter();
    let tuple = match rest.next() {
        Some(Token::Group(range)) => range.clone(),
        _ => return None,
    };
    match rest.next() {
        None => Some(tuple),
        Some(Token::Word(w)) if w == "on" || w == "returning" => Some(tuple),
        _ => None,
    }
}
