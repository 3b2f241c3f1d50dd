//! In-process mock backend speaking the PostgreSQL backend protocol over an
//! in-memory duplex.
//!
//! It understands a tiny SQL dialect, just enough to exercise the driver:
//! - `SELECT ?, ?` echoes its parameters as one row.
//! - `SELECT COUNT(*) FROM items` counts rows inserted so far.
//! - `SELECT * FROM items` returns the inserted rows as two text columns.
//! - `SELECT <n>` returns one int4 column.
//! - `INSERT ... VALUES (..), (..)` stores one row per tuple. A `dup` value
//!   fails with SQLSTATE 23505; `BADTAG` in the text yields a malformed tag.
//! - `BEGIN`, `COMMIT` and `ROLLBACK` drive the transaction status.
//! - `SET standard_conforming_strings = off` reports the new setting.
//!
//! Fault injection: `BADSYNTAX` fails Parse (42601), `TERMINATE` fails with
//! a FATAL error, `GARBAGE` answers Execute with an out-of-order message and
//! `NOTICE` sends a notice first.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use zero_pgx::Opts;

const INT2: u32 = 21;
const INT4: u32 = 23;
const INT8: u32 = 20;
const BOOL: u32 = 16;
const BYTEA: u32 = 17;
const OID: u32 = 26;
const TEXT: u32 = 25;
const FLOAT4: u32 = 700;
const FLOAT8: u32 = 701;

#[derive(Debug, Default, Clone)]
pub struct Stats {
    /// Parse messages for named statements, with their names
    pub named_parses: Vec<String>,
    pub unnamed_parses: usize,
    /// Close messages, with their names
    pub closes: Vec<String>,
    pub binds: usize,
    /// Query messages (simple protocol)
    pub queries: Vec<String>,
    pub syncs: usize,
}

#[derive(Debug, Clone)]
struct Statement {
    sql: String,
    param_oids: Vec<u32>,
}

#[derive(Debug, Clone)]
struct Portal {
    sql: String,
    params: Vec<Option<String>>,
    param_oids: Vec<u32>,
    result_formats: Vec<i16>,
}

#[derive(Debug, Clone, Copy)]
struct Column {
    oid: u32,
}

struct Outcome {
    columns: Vec<Column>,
    rows: Vec<Vec<Option<String>>>,
    tag: String,
}

#[derive(Debug, Default)]
pub struct Server {
    pub stats: Stats,
    /// Rows stored by INSERT
    pub rows: Vec<Vec<Option<String>>>,
    statements: HashMap<String, Statement>,
    portal: Option<Portal>,
    /// Skipping messages until Sync after an error
    failed: bool,
    in_transaction: bool,
    inbound: Vec<u8>,
    outbound: VecDeque<u8>,
}

impl Server {
    /// Forget every prepared statement, as after a server-side DISCARD.
    pub fn drop_statements(&mut self) {
        self.statements.clear();
    }

    pub fn has_statement(&self, name: &str) -> bool {
        self.statements.contains_key(name)
    }

    fn send(&mut self, type_byte: u8, payload: &[u8]) {
        self.outbound.push_back(type_byte);
        self.outbound
            .extend(((payload.len() + 4) as i32).to_be_bytes());
        self.outbound.extend(payload.iter().copied());
    }

    fn send_error(&mut self, severity: &str, code: &str, message: &str) {
        let mut payload = Vec::new();
        for (field, value) in [(b'S', severity), (b'V', severity), (b'C', code), (b'M', message)] {
            payload.push(field);
            payload.extend_from_slice(value.as_bytes());
            payload.push(0);
        }
        payload.push(0);
        self.send(b'E', &payload);
    }

    fn send_ready(&mut self) {
        let status = if self.in_transaction { b'T' } else { b'I' };
        self.send(b'Z', &[status]);
    }

    fn send_parameter_status(&mut self, name: &str, value: &str) {
        let mut payload = Vec::new();
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
        self.send(b'S', &payload);
    }

    fn send_notice(&mut self, message: &str) {
        let mut payload = b"SNOTICE\0C00000\0M".to_vec();
        payload.extend_from_slice(message.as_bytes());
        payload.extend_from_slice(b"\0\0");
        self.send(b'N', &payload);
    }

    fn send_row_description(&mut self, columns: &[Column], formats: &[i16]) {
        let mut payload = (columns.len() as u16).to_be_bytes().to_vec();
        for (i, col) in columns.iter().enumerate() {
            payload.extend_from_slice(b"?column?\0");
            payload.extend_from_slice(&0_u32.to_be_bytes());
            payload.extend_from_slice(&0_i16.to_be_bytes());
            payload.extend_from_slice(&col.oid.to_be_bytes());
            payload.extend_from_slice(&(-1_i16).to_be_bytes());
            payload.extend_from_slice(&(-1_i32).to_be_bytes());
            payload.extend_from_slice(&result_format(formats, i).to_be_bytes());
        }
        self.send(b'T', &payload);
    }

    fn send_rows(&mut self, columns: &[Column], rows: &[Vec<Option<String>>], formats: &[i16]) {
        for row in rows {
            let mut payload = (row.len() as u16).to_be_bytes().to_vec();
            for (i, value) in row.iter().enumerate() {
                match value {
                    None => payload.extend_from_slice(&(-1_i32).to_be_bytes()),
                    Some(text) => {
                        let bytes = if result_format(formats, i) == 1 {
                            encode_binary(columns[i].oid, text)
                        } else {
                            text.as_bytes().to_vec()
                        };
                        payload.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                        payload.extend_from_slice(&bytes);
                    }
                }
            }
            self.send(b'D', &payload);
        }
    }

    fn send_tag(&mut self, tag: &str) {
        let mut payload = tag.as_bytes().to_vec();
        payload.push(0);
        self.send(b'C', &payload);
    }

    fn process(&mut self) {
        loop {
            if self.inbound.len() < 5 {
                return;
            }
            let len = i32::from_be_bytes([self.inbound[1], self.inbound[2], self.inbound[3], self.inbound[4]]) as usize;
            if self.inbound.len() < 1 + len {
                return;
            }
            let type_byte = self.inbound[0];
            let payload: Vec<u8> = self.inbound[5..1 + len].to_vec();
            self.inbound.drain(..1 + len);
            self.handle(type_byte, &payload);
        }
    }

    fn handle(&mut self, type_byte: u8, payload: &[u8]) {
        let mut r = Reader(payload);
        match type_byte {
            b'S' => {
                self.stats.syncs += 1;
                self.failed = false;
                self.send_ready();
            }
            b'Q' => {
                let sql = r.cstr();
                self.stats.queries.push(sql.clone());
                self.simple_query(&sql);
                self.send_ready();
            }
            _ if self.failed => {}
            b'P' => {
                let name = r.cstr();
                let sql = r.cstr();
                let n = r.u16();
                let param_oids = (0..n).map(|_| r.u32()).collect();
                if name.is_empty() {
                    self.stats.unnamed_parses += 1;
                } else {
                    self.stats.named_parses.push(name.clone());
                }
                if sql.contains("BADSYNTAX") {
                    self.fail("ERROR", "42601", "syntax error at or near \"BADSYNTAX\"");
                    return;
                }
                self.statements.insert(name, Statement { sql, param_oids });
                self.send(b'1', &[]);
            }
            b'B' => {
                self.stats.binds += 1;
                let _portal = r.cstr();
                let name = r.cstr();
                let nfmt = r.u16() as usize;
                let formats: Vec<i16> = (0..nfmt).map(|_| r.i16()).collect();
                let nparams = r.u16() as usize;
                let raw: Vec<Option<Vec<u8>>> = (0..nparams).map(|_| r.value()).collect();
                let nres = r.u16() as usize;
                let result_formats = (0..nres).map(|_| r.i16()).collect();

                let Some(stmt) = self.statements.get(&name).cloned() else {
                    self.fail("ERROR", "26000", &format!("prepared statement \"{}\" does not exist", name));
                    return;
                };
                let params = raw
                    .into_iter()
                    .enumerate()
                    .map(|(i, value)| {
                        let oid = stmt.param_oids.get(i).copied().unwrap_or(0);
                        value.map(|bytes| decode_param(oid, param_format(&formats, i), &bytes))
                    })
                    .collect();
                self.portal = Some(Portal {
                    sql: stmt.sql.clone(),
                    params,
                    param_oids: resolved(&stmt.param_oids),
                    result_formats,
                });
                self.send(b'2', &[]);
            }
            b'D' => {
                let kind = r.u8();
                let name = r.cstr();
                if kind == b'S' {
                    let Some(stmt) = self.statements.get(&name).cloned() else {
                        self.fail("ERROR", "26000", "statement does not exist");
                        return;
                    };
                    let oids = resolved(&stmt.param_oids);
                    let mut payload = (oids.len() as u16).to_be_bytes().to_vec();
                    for oid in &oids {
                        payload.extend_from_slice(&oid.to_be_bytes());
                    }
                    self.send(b't', &payload);
                    self.describe(&stmt.sql, &oids, &[]);
                } else if let Some(portal) = self.portal.clone() {
                    self.describe(&portal.sql, &portal.param_oids, &portal.result_formats);
                } else {
                    self.fail("ERROR", "34000", "portal does not exist");
                }
            }
            b'E' => {
                let Some(portal) = self.portal.take() else {
                    self.fail("ERROR", "34000", "portal does not exist");
                    return;
                };
                if portal.sql.contains("GARBAGE") {
                    self.send(b'1', &[]);
                    return;
                }
                match self.run(&portal.sql, portal.params.clone(), &portal.param_oids) {
                    Ok(Some(outcome)) => {
                        self.send_rows(&outcome.columns, &outcome.rows, &portal.result_formats);
                        self.send_tag(&outcome.tag);
                    }
                    Ok(None) => self.send(b'I', &[]),
                    Err((severity, code, message)) => self.fail(severity, code, &message),
                }
            }
            b'C' => {
                let _kind = r.u8();
                let name = r.cstr();
                self.stats.closes.push(name.clone());
                self.statements.remove(&name);
                self.send(b'3', &[]);
            }
            b'H' => {}
            other => panic!("mock backend got unknown message {:?}", other as char),
        }
    }

    fn fail(&mut self, severity: &str, code: &str, message: &str) {
        self.send_error(severity, code, message);
        self.failed = true;
    }

    fn describe(&mut self, sql: &str, param_oids: &[u32], formats: &[i16]) {
        let columns = columns_of(sql, param_oids);
        if columns.is_empty() {
            self.send(b'n', &[]);
        } else {
            self.send_row_description(&columns, formats);
        }
    }

    fn simple_query(&mut self, sql: &str) {
        if sql.contains("BADSYNTAX") {
            self.send_error("ERROR", "42601", "syntax error at or near \"BADSYNTAX\"");
            return;
        }
        let statements: Vec<&str> = sql.split(';').map(str::trim).filter(|s| !s.is_empty()).collect();
        if statements.is_empty() {
            self.send(b'I', &[]);
            return;
        }
        for stmt in statements {
            if stmt.contains("GARBAGE") {
                self.send(b'1', &[]);
                return;
            }
            let values = literals(stmt);
            let oids = vec![TEXT; values.len()];
            match self.run(stmt, values, &oids) {
                Ok(Some(outcome)) => {
                    if !outcome.columns.is_empty() {
                        self.send_row_description(&outcome.columns, &[]);
                    }
                    self.send_rows(&outcome.columns, &outcome.rows, &[]);
                    self.send_tag(&outcome.tag);
                }
                Ok(None) => self.send(b'I', &[]),
                Err((severity, code, message)) => {
                    self.send_error(severity, code, &message);
                    return;
                }
            }
        }
    }

    fn run(
        &mut self,
        sql: &str,
        params: Vec<Option<String>>,
        param_oids: &[u32],
    ) -> Result<Option<Outcome>, (&'static str, &'static str, String)> {
        let upper = sql.trim().to_uppercase();
        if upper.is_empty() {
            return Ok(None);
        }
        if upper.contains("TERMINATE") {
            return Err(("FATAL", "57P01", "terminating connection".into()));
        }
        if upper.contains("NOTICE") {
            self.send_notice("just so you know");
        }
        let columns = columns_of(sql, param_oids);
        let keyword = upper.split_whitespace().next().unwrap_or_default().to_string();
        let outcome = match keyword.as_str() {
            "SELECT" => {
                let rows = if upper.contains("COUNT(*) FROM ITEMS") {
                    vec![vec![Some(self.rows.len().to_string())]]
                } else if upper.contains("* FROM ITEMS") {
                    self.rows.clone()
                } else if !params.is_empty() {
                    vec![params]
                } else {
                    let n = upper.trim_start_matches("SELECT").trim().to_string();
                    vec![vec![Some(if n.is_empty() { "1".into() } else { n })]]
                };
                Outcome {
                    tag: format!("SELECT {}", rows.len()),
                    columns,
                    rows,
                }
            }
            "INSERT" => {
                if params.iter().any(|p| p.as_deref() == Some("dup")) {
                    return Err((
                        "ERROR",
                        "23505",
                        "duplicate key value violates unique constraint \"items_pkey\"".into(),
                    ));
                }
                let tuples = count_tuples(&upper).max(1);
                let width = params.len() / tuples;
                if width > 0 {
                    for row in params.chunks(width) {
                        self.rows.push(row.to_vec());
                    }
                }
                let tag = if upper.contains("BADTAG") {
                    "INSERT 0 x".to_string()
                } else {
                    format!("INSERT 0 {}", tuples)
                };
                Outcome {
                    columns,
                    rows: Vec::new(),
                    tag,
                }
            }
            "DELETE" => {
                let n = self.rows.len();
                self.rows.clear();
                Outcome {
                    columns,
                    rows: Vec::new(),
                    tag: format!("DELETE {}", n),
                }
            }
            "BEGIN" | "COMMIT" | "ROLLBACK" => {
                self.in_transaction = keyword == "BEGIN";
                Outcome {
                    columns,
                    rows: Vec::new(),
                    tag: keyword.clone(),
                }
            }
            "SET" => {
                if upper.contains("STANDARD_CONFORMING_STRINGS") {
                    let value = if upper.contains("OFF") { "off" } else { "on" };
                    self.send_parameter_status("standard_conforming_strings", value);
                }
                Outcome {
                    columns,
                    rows: Vec::new(),
                    tag: keyword.clone(),
                }
            }
            _ => Outcome {
                columns,
                rows: Vec::new(),
                tag: keyword.clone(),
            },
        };
        Ok(Some(outcome))
    }
}

/// Result columns of `sql` bound with parameters of `param_oids`.
fn columns_of(sql: &str, param_oids: &[u32]) -> Vec<Column> {
    let upper = sql.trim().to_uppercase();
    if !upper.starts_with("SELECT") {
        return Vec::new();
    }
    if upper.contains("COUNT(*) FROM ITEMS") {
        vec![Column { oid: INT8 }]
    } else if upper.contains("* FROM ITEMS") {
        vec![Column { oid: TEXT }, Column { oid: TEXT }]
    } else if !param_oids.is_empty() {
        param_oids.iter().map(|&oid| Column { oid }).collect()
    } else {
        vec![Column { oid: INT4 }]
    }
}

fn resolved(oids: &[u32]) -> Vec<u32> {
    oids.iter().map(|&o| if o == 0 { TEXT } else { o }).collect()
}

fn count_tuples(upper: &str) -> usize {
    let Some(at) = upper.find("VALUES") else {
        return 0;
    };
    let mut depth = 0;
    let mut tuples = 0;
    for c in upper[at..].chars() {
        match c {
            '(' => {
                if depth == 0 {
                    tuples += 1;
                }
                depth += 1;
            }
            ')' => depth -= 1,
            _ => {}
        }
    }
    tuples
}

fn param_format(formats: &[i16], i: usize) -> i16 {
    match formats {
        [] => 0,
        [f] => *f,
        all => all.get(i).copied().unwrap_or(0),
    }
}

fn result_format(formats: &[i16], i: usize) -> i16 {
    param_format(formats, i)
}

fn decode_param(oid: u32, format: i16, bytes: &[u8]) -> String {
    if format == 0 {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    match oid {
        BOOL => if bytes == [1] { "t" } else { "f" }.to_string(),
        INT2 => i16::from_be_bytes([bytes[0], bytes[1]]).to_string(),
        INT4 => i32::from_be_bytes(bytes.try_into().unwrap()).to_string(),
        OID => u32::from_be_bytes(bytes.try_into().unwrap()).to_string(),
        INT8 => i64::from_be_bytes(bytes.try_into().unwrap()).to_string(),
        FLOAT4 => f32::from_be_bytes(bytes.try_into().unwrap()).to_string(),
        FLOAT8 => f64::from_be_bytes(bytes.try_into().unwrap()).to_string(),
        BYTEA => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn encode_binary(oid: u32, text: &str) -> Vec<u8> {
    match oid {
        BOOL => vec![u8::from(text == "t")],
        INT2 => text.parse::<i16>().unwrap().to_be_bytes().to_vec(),
        INT4 => text.parse::<i32>().unwrap().to_be_bytes().to_vec(),
        INT8 => text.parse::<i64>().unwrap().to_be_bytes().to_vec(),
        OID => text.parse::<u32>().unwrap().to_be_bytes().to_vec(),
        FLOAT4 => text.parse::<f32>().unwrap().to_be_bytes().to_vec(),
        FLOAT8 => text.parse::<f64>().unwrap().to_be_bytes().to_vec(),
        _ => text.as_bytes().to_vec(),
    }
}

/// Quoted literals and NULLs of an inlined statement, in order.
fn literals(sql: &str) -> Vec<Option<String>> {
    let mut out = Vec::new();
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            let escaped = i > 0 && chars[i - 1] == 'E';
            let mut value = String::new();
            i += 1;
            while i < chars.len() {
                match chars[i] {
                    '\'' if chars.get(i + 1) == Some(&'\'') => {
                        value.push('\'');
                        i += 2;
                    }
                    '\'' => break,
                    '\\' if escaped => {
                        if let Some(&next) = chars.get(i + 1) {
                            value.push(next);
                        }
                        i += 2;
                    }
                    other => {
                        value.push(other);
                        i += 1;
                    }
                }
            }
            out.push(Some(value));
            i += 1;
        } else if sql[char_offset(&chars, i)..].starts_with("NULL") {
            out.push(None);
            i += 4;
        } else {
            i += 1;
        }
    }
    out
}

fn char_offset(chars: &[char], i: usize) -> usize {
    chars[..i].iter().map(|c| c.len_utf8()).sum()
}

struct Reader<'a>(&'a [u8]);

impl Reader<'_> {
    fn u8(&mut self) -> u8 {
        let v = self.0[0];
        self.0 = &self.0[1..];
        v
    }

    fn i16(&mut self) -> i16 {
        let v = i16::from_be_bytes([self.0[0], self.0[1]]);
        self.0 = &self.0[2..];
        v
    }

    fn u16(&mut self) -> u16 {
        self.i16() as u16
    }

    fn u32(&mut self) -> u32 {
        let v = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        self.0 = &self.0[4..];
        v
    }

    fn cstr(&mut self) -> String {
        let end = self.0.iter().position(|&b| b == 0).unwrap();
        let s = String::from_utf8(self.0[..end].to_vec()).unwrap();
        self.0 = &self.0[end + 1..];
        s
    }

    fn value(&mut self) -> Option<Vec<u8>> {
        let len = self.u32() as i32;
        if len < 0 {
            return None;
        }
        let v = self.0[..len as usize].to_vec();
        self.0 = &self.0[len as usize..];
        Some(v)
    }
}

/// Client end of the in-memory duplex.
pub struct MockStream {
    server: Arc<Mutex<Server>>,
}

impl MockStream {
    pub fn new() -> (Self, Arc<Mutex<Server>>) {
        let server = Arc::new(Mutex::new(Server::default()));
        (
            Self {
                server: Arc::clone(&server),
            },
            server,
        )
    }

    fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let mut server = self.server.lock().unwrap();
        let n = buf.len().min(server.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(server.outbound.drain(..n)) {
            *slot = byte;
        }
        n
    }

    fn write_from(&mut self, buf: &[u8]) -> usize {
        let mut server = self.server.lock().unwrap();
        server.inbound.extend_from_slice(buf);
        server.process();
        buf.len()
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf))
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_from(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let n = this.read_into(buf.initialize_unfilled());
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(self.get_mut().write_from(buf)))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Blocking connection to a fresh mock backend.
pub fn connect(opts: Opts) -> (zero_pgx::sync::Conn<MockStream>, Arc<Mutex<Server>>) {
    let (stream, server) = MockStream::new();
    let conn = zero_pgx::sync::Conn::new(stream, opts).unwrap();
    (conn, server)
}

/// Async connection to a fresh mock backend.
pub fn connect_async(opts: Opts) -> (zero_pgx::tokio::Conn<MockStream>, Arc<Mutex<Server>>) {
    let (stream, server) = MockStream::new();
    let conn = zero_pgx::tokio::Conn::new(stream, opts).unwrap();
    (conn, server)
}

/// Snapshot of what the backend has seen.
pub fn stats(server: &Arc<Mutex<Server>>) -> Stats {
    server.lock().unwrap().stats.clone()
}
