//! Lexical scanner for SQL text.
//!
//! The scanner only understands the lexical structure needed to find
//! placeholders and statement boundaries. Everything else is copied through
//! untouched.

use std::ops::Range;

use crate::error::{Error, Result};

/// A top-level (outside parentheses) token of a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    /// Unquoted word, lowercased
    Word(String),
    /// Parenthesized group, as a range of the rewritten text
    Group(Range<usize>),
    Comma,
    Other,
}

/// One statement as produced by the scanner.
#[derive(Debug, Default)]
pub(crate) struct ScannedStatement {
    pub sql: String,
    pub placeholders: Vec<Range<usize>>,
    pub param_count: usize,
    pub tokens: Vec<Token>,
}

#[inline]
fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

#[inline]
fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

fn unterminated(what: &str, position: usize) -> Error {
    Error::Syntax {
        message: format!("unterminated {}", what),
        position,
    }
}

/// Builds the rewritten text of the statement being scanned.
struct Builder<'a> {
    src: &'a str,
    /// Start of the source run not yet copied to `stmt.sql`
    copied: usize,
    stmt: ScannedStatement,
    has_content: bool,
    depth: usize,
    group_start: usize,
    question_marks: usize,
    max_native: usize,
}

impl<'a> Builder<'a> {
    fn new(src: &'a str, start: usize) -> Self {
        Self {
            src,
            copied: start,
            stmt: ScannedStatement::default(),
            has_content: false,
            depth: 0,
            group_start: 0,
            question_marks: 0,
            max_native: 0,
        }
    }

    /// Position in the rewritten text that source offset `i` maps to.
    fn out_pos(&self, i: usize) -> usize {
        self.stmt.sql.len() + (i - self.copied)
    }

    /// Replace `src[i..i + len]` with `text`.
    fn replace(&mut self, i: usize, len: usize, text: &str) {
        self.stmt.sql.push_str(&self.src[self.copied..i]);
        self.stmt.sql.push_str(text);
        self.copied = i + len;
    }

    fn token(&mut self, token: Token) {
        self.has_content = true;
        if self.depth == 0 {
            self.stmt.tokens.push(token);
        }
    }

    fn finish(mut self, end: usize) -> Option<ScannedStatement> {
        self.stmt.sql.push_str(&self.src[self.copied..end]);
        if !self.has_content {
            return None;
        }

        let trimmed_end = self.stmt.sql.trim_end().len();
        self.stmt.sql.truncate(trimmed_end);
        let lead = self.stmt.sql.len() - self.stmt.sql.trim_start().len();
        if lead > 0 {
            self.stmt.sql.drain(..lead);
            for range in &mut self.stmt.placeholders {
                *range = range.start - lead..range.end - lead;
            }
            for token in &mut self.stmt.tokens {
                if let Token::Group(range) = token {
                    *range = range.start - lead..range.end - lead;
                }
            }
        }
        self.stmt.param_count = self.question_marks.max(self.max_native);
        Some(self.stmt)
    }
}

/// Split `sql` into statements, rewriting `?` placeholders to `$n`.
pub(crate) fn scan(sql: &str, standard_conforming_strings: bool) -> Result<Vec<ScannedStatement>> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut b = Builder::new(sql, 0);
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'\'' => {
                b.token(Token::Other);
                i = skip_string(bytes, i, !standard_conforming_strings)?;
            }
            b'"' => {
                b.token(Token::Other);
                i = skip_quoted_ident(bytes, i)?;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = memchr::memchr(b'\n', &bytes[i..]).map_or(bytes.len(), |n| i + n + 1);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_block_comment(bytes, i)?;
            }
            b'$' => {
                if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
                    let end = i + 1 + bytes[i + 1..].iter().take_while(|d| d.is_ascii_digit()).count();
                    let n = sql[i + 1..end].parse::<usize>().unwrap_or(usize::MAX);
                    b.max_native = b.max_native.max(n);
                    let start = b.out_pos(i);
                    b.stmt.placeholders.push(start..start + (end - i));
                    b.token(Token::Other);
                    i = end;
                } else if let Some(tag_end) = dollar_tag(bytes, i) {
                    b.token(Token::Other);
                    i = skip_dollar_quoted(bytes, i, tag_end)?;
                } else {
                    b.token(Token::Other);
                    i += 1;
                }
            }
            b'?' => {
                if bytes.get(i + 1) == Some(&b'?') {
                    b.replace(i, 2, "?");
                    b.token(Token::Other);
                    i += 2;
                } else {
                    b.question_marks += 1;
                    let marker = format!("${}", b.question_marks);
                    let start = b.out_pos(i);
                    b.replace(i, 1, &marker);
                    b.stmt.placeholders.push(start..start + marker.len());
                    b.token(Token::Other);
                    i += 1;
                }
            }
            b'(' => {
                if b.depth == 0 {
                    b.group_start = b.out_pos(i);
                }
                b.has_content = true;
                b.depth += 1;
                i += 1;
            }
            b')' if b.depth == 0 => {
                // Unbalanced; the server reports it.
                b.token(Token::Other);
                i += 1;
            }
            b')' => {
                b.has_content = true;
                b.depth -= 1;
                if b.depth == 0 {
                    let range = b.group_start..b.out_pos(i) + 1;
                    b.stmt.tokens.push(Token::Group(range));
                }
                i += 1;
            }
            b',' => {
                b.token(Token::Comma);
                i += 1;
            }
            b';' if b.depth == 0 => {
                if let Some(stmt) = b.finish(i) {
                    statements.push(stmt);
                }
                i += 1;
                b = Builder::new(sql, i);
            }
            _ if is_ident_start(c) => {
                let end = i + bytes[i..].iter().take_while(|&&d| is_ident_char(d)).count();
                let word = &sql[i..end];
                if word.eq_ignore_ascii_case("e") && bytes.get(end) == Some(&b'\'') {
                    b.token(Token::Other);
                    i = skip_string(bytes, end, true)?;
                } else {
                    b.token(Token::Word(word.to_ascii_lowercase()));
                    i = end;
                }
            }
            _ if c.is_ascii_whitespace() => i += 1,
            _ if c.is_ascii_digit() => {
                // Digits may be followed by identifier characters (1e5, 0x1F)
                let end = i + bytes[i..].iter().take_while(|&&d| is_ident_char(d) || d == b'.').count();
                b.token(Token::Other);
                i = end;
            }
            _ => {
                b.token(Token::Other);
                i += 1;
            }
        }
    }

    if let Some(stmt) = b.finish(bytes.len()) {
        statements.push(stmt);
    }
    Ok(statements)
}

/// Skip a single-quoted string starting at `start`. Returns the offset after
/// the closing quote.
fn skip_string(bytes: &[u8], start: usize, backslash_escapes: bool) -> Result<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if backslash_escapes => i += 2,
            b'\'' if bytes.get(i + 1) == Some(&b'\'') => i += 2,
            b'\'' => return Ok(i + 1),
            _ => i += 1,
        }
    }
    Err(unterminated("quoted string", start))
}

fn skip_quoted_ident(bytes: &[u8], start: usize) -> Result<usize> {
    let mut i = start + 1;
    while let Some(n) = memchr::memchr(b'"', &bytes[i.min(bytes.len())..]) {
        i += n;
        if bytes.get(i + 1) == Some(&b'"') {
            i += 2;
        } else {
            return Ok(i + 1);
        }
    }
    Err(unterminated("quoted identifier", start))
}

fn skip_block_comment(bytes: &[u8], start: usize) -> Result<usize> {
    let mut depth = 0usize;
    let mut i = start;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'/', b'*') => {
                depth += 1;
                i += 2;
            }
            (b'*', b'/') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => i += 1,
        }
    }
    Err(unterminated("block comment", start))
}

/// If a dollar-quote opening tag starts at `start`, return the offset of its
/// closing `$`.
fn dollar_tag(bytes: &[u8], start: usize) -> Option<usize> {
    let rest = bytes.get(start + 1..)?;
    match rest.first() {
        Some(b'$') => return Some(start + 1),
        Some(&b) if is_ident_start(b) => {}
        _ => return None,
    }
    let len = rest
        .iter()
        .take_while(|&&b| is_ident_char(b) && b != b'$')
        .count();
    (rest.get(len) == Some(&b'$')).then_some(start + 1 + len)
}

fn skip_dollar_quoted(bytes: &[u8], start: usize, tag_end: usize) -> Result<usize> {
    let tag = &bytes[start..=tag_end];
    let body = &bytes[tag_end + 1..];
    memchr::memmem::find(body, tag)
        .map(|n| tag_end + 1 + n + tag.len())
        .ok_or_else(|| unterminated("dollar-quoted string", start))
}
