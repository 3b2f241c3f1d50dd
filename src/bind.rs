//! Parameter binding: typed parameters, stream-backed values, reparse
//! detection and literal inlining.

use std::fmt;
use std::io::Read;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::opts::StringType;
use crate::protocol::types::{FormatCode, Oid, oid};
use crate::sql::{ParsedQuery, ParsedStatement};
use crate::types::{BuiltinTypes, TypeLookup, Value, codec, coerce};

/// Largest value a single protocol field may carry.
pub const MAX_FIELD_LEN: i64 = 1 << 30;

/// Most parameters a Bind message can carry.
pub const MAX_BIND_PARAMS: usize = u16::MAX as usize;

/// One bound parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub value: Value,
    /// Explicit wire type, `0` for the value's natural type
    pub oid: Oid,
    /// Decimal scale the value is rounded to before sending
    pub scale: Option<u32>,
}

impl Param {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            oid: oid::UNSPECIFIED,
            scale: None,
        }
    }

    /// A NULL of the given type (`0` leaves it to the server).
    pub fn null(oid: Oid) -> Self {
        Self {
            value: Value::Null,
            oid,
            scale: None,
        }
    }

    pub fn with_oid(mut self, oid: Oid) -> Self {
        self.oid = oid;
        self
    }

    /// Round half-up to `scale` digits and send as NUMERIC.
    pub fn with_scale(mut self, scale: u32) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Read a binary value of `declared_len` bytes from `reader`.
    ///
    /// The stream is consumed here, before anything reaches the wire, so a
    /// length mismatch leaves the connection untouched. Bytes past
    /// `declared_len` are not read.
    pub fn from_reader(reader: impl Read, declared_len: i64, oid: Oid) -> Result<Self> {
        let limit = checked_stream_len(declared_len)?;
        let mut data = Vec::new();
        reader.take(limit).read_to_end(&mut data)?;
        stream_param(data, declared_len, oid)
    }

    /// Async variant of [`Param::from_reader`].
    #[cfg(feature = "tokio")]
    pub async fn from_async_reader(
        reader: impl tokio::io::AsyncRead + Unpin,
        declared_len: i64,
        oid: Oid,
    ) -> Result<Self> {
        use tokio::io::AsyncReadExt;

        let limit = checked_stream_len(declared_len)?;
        let mut data = Vec::new();
        reader.take(limit).read_to_end(&mut data).await?;
        stream_param(data, declared_len, oid)
    }

    /// The type this parameter is parsed and bound as.
    pub fn wire_oid(&self, string_type: StringType) -> Oid {
        if self.scale.is_some() {
            oid::NUMERIC
        } else if self.oid != oid::UNSPECIFIED {
            self.oid
        } else {
            self.value.natural_oid(string_type)
        }
    }

    /// The value as it is sent, after rescaling.
    fn wire_value(&self) -> Result<std::borrow::Cow<'_, Value>> {
        match self.scale {
            Some(scale) if !self.value.is_null() => {
                let d = coerce::to_decimal(&self.value)?;
                Ok(std::borrow::Cow::Owned(Value::Numeric(coerce::rescale(d, scale))))
            }
            _ => Ok(std::borrow::Cow::Borrowed(&self.value)),
        }
    }
}

fn checked_stream_len(declared_len: i64) -> Result<u64> {
    if !(0..=MAX_FIELD_LEN).contains(&declared_len) {
        return Err(Error::StreamLength {
            declared: declared_len,
            actual: None,
        });
    }
    Ok(declared_len as u64)
}

fn stream_param(data: Vec<u8>, declared_len: i64, oid: Oid) -> Result<Param> {
    if (data.len() as i64) < declared_len {
        return Err(Error::StreamLength {
            declared: declared_len,
            actual: Some(data.len() as u64),
        });
    }
    let oid = if oid == oid::UNSPECIFIED { oid::BYTEA } else { oid };
    Ok(Param::new(data).with_oid(oid))
}

/// Conversion of a host value into a parameter.
pub trait ToParam {
    fn to_param(&self) -> Param;
}

impl ToParam for Param {
    fn to_param(&self) -> Param {
        self.clone()
    }
}

impl ToParam for Value {
    fn to_param(&self) -> Param {
        Param::new(self.clone())
    }
}

macro_rules! impl_to_param {
    ($($t:ty),* $(,)?) => {
        $(
            impl ToParam for $t {
                fn to_param(&self) -> Param {
                    Param::new(self.clone())
                }
            }
        )*
    };
}

impl_to_param!(bool, i16, i32, i64, f32, f64, rust_decimal::Decimal, String, char, Vec<u8>);

impl ToParam for str {
    fn to_param(&self) -> Param {
        Param::new(self)
    }
}

impl ToParam for [u8] {
    fn to_param(&self) -> Param {
        Param::new(self)
    }
}

impl<T: ToParam> ToParam for Option<T> {
    fn to_param(&self) -> Param {
        match self {
            Some(v) => v.to_param(),
            None => Param::null(oid::UNSPECIFIED),
        }
    }
}

impl<T: ToParam + ?Sized> ToParam for &T {
    fn to_param(&self) -> Param {
        (*self).to_param()
    }
}

/// An ordered parameter list.
pub trait ToParams {
    fn to_params(&self) -> Vec<Param>;
}

impl ToParams for () {
    fn to_params(&self) -> Vec<Param> {
        Vec::new()
    }
}

impl<T: ToParam> ToParams for [T] {
    fn to_params(&self) -> Vec<Param> {
        self.iter().map(ToParam::to_param).collect()
    }
}

impl<T: ToParam> ToParams for Vec<T> {
    fn to_params(&self) -> Vec<Param> {
        self.as_slice().to_params()
    }
}

impl<T: ToParam, const N: usize> ToParams for [T; N] {
    fn to_params(&self) -> Vec<Param> {
        self.as_slice().to_params()
    }
}

impl<T: ToParams + ?Sized> ToParams for &T {
    fn to_params(&self) -> Vec<Param> {
        (*self).to_params()
    }
}

macro_rules! impl_to_params {
    ($($idx:tt: $T:ident),+) => {
        impl<$($T: ToParam),+> ToParams for ($($T,)+) {
            fn to_params(&self) -> Vec<Param> {
                vec![$(self.$idx.to_param()),+]
            }
        }
    };
}

impl_to_params!(0: T0);
impl_to_params!(0: T0, 1: T1);
impl_to_params!(0: T0, 1: T1, 2: T2);
impl_to_params!(0: T0, 1: T1, 2: T2, 3: T3);
impl_to_params!(0: T0, 1: T1, 2: T2, 3: T3, 4: T4);
impl_to_params!(0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5);
impl_to_params!(0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6);
impl_to_params!(0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7);
impl_to_params!(0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8);
impl_to_params!(0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9);
impl_to_params!(0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10);
impl_to_params!(0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10, 11: T11);

/// Whether a handle parsed with `recorded` types must be parsed again to
/// bind `supplied` types.
///
/// An unspecified (`0`) supplied type is compatible with anything. A concrete
/// type must match what the handle was parsed with.
pub fn requires_reparse(recorded: &[Oid], supplied: &[Oid]) -> bool {
    recorded.len() != supplied.len()
        || recorded
            .iter()
            .zip(supplied)
            .any(|(&r, &s)| s != oid::UNSPECIFIED && s != r)
}

/// Parameter values ready for a Bind message.
#[derive(Debug, Default, Clone)]
pub struct EncodedParams {
    pub formats: Vec<FormatCode>,
    /// Length-prefixed values, back to back
    pub data: Vec<u8>,
}

impl EncodedParams {
    pub fn clear(&mut self) {
        self.formats.clear();
        self.data.clear();
    }
}

/// Encode `params` as Bind values.
///
/// Binary is used for types with a binary parameter format when
/// `binary_transfer` is on; parameters of unspecified type are always text.
pub fn encode_params(
    params: &[Param],
    string_type: StringType,
    binary_transfer: bool,
    out: &mut EncodedParams,
) -> Result<()> {
    out.clear();
    for param in params {
        let target = param.wire_oid(string_type);
        let value = param.wire_value()?;
        let binary_ok = binary_transfer && target != oid::UNSPECIFIED;
        out.formats.push(codec::encode(&value, target, binary_ok, &mut out.data)?);
    }
    Ok(())
}

/// A prepared query: SQL text scanned once into statements.
///
/// Cheap to clone; the server-side state lives in the connection's
/// statement cache, keyed by each statement's rewritten text.
#[derive(Debug, Clone)]
pub struct StatementRef {
    query: Arc<ParsedQuery>,
}

impl StatementRef {
    pub(crate) fn new(query: ParsedQuery) -> Self {
        Self {
            query: Arc::new(query),
        }
    }

    /// The SQL as the caller wrote it.
    pub fn source(&self) -> &str {
        &self.query.source
    }

    /// Total number of parameters over all statements.
    pub fn param_count(&self) -> usize {
        self.query.param_count
    }

    pub(crate) fn statements(&self) -> &[ParsedStatement] {
        &self.query.statements
    }
}

/// Values bound to a prepared query for one execution.
#[derive(Debug, Clone)]
pub struct BindFrame {
    statement: StatementRef,
    params: Vec<Param>,
    standard_conforming_strings: bool,
}

impl BindFrame {
    /// Bind `params`, which must match the query's placeholder count.
    pub fn new(
        statement: StatementRef,
        params: Vec<Param>,
        standard_conforming_strings: bool,
    ) -> Result<Self> {
        if params.len() != statement.param_count() {
            return Err(Error::InvalidUsage(format!(
                "expected {} parameters, got {}",
                statement.param_count(),
                params.len()
            )));
        }
        if let Some(stmt) = statement
            .statements()
            .iter()
            .find(|s| s.param_count > MAX_BIND_PARAMS)
        {
            return Err(Error::InvalidUsage(format!(
                "statement has {} parameters, at most {} are supported",
                stmt.param_count, MAX_BIND_PARAMS
            )));
        }
        Ok(Self {
            statement,
            params,
            standard_conforming_strings,
        })
    }

    pub fn statement(&self) -> &StatementRef {
        &self.statement
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Each statement paired with its own slice of the parameters.
    pub(crate) fn parts(&self) -> impl Iterator<Item = (&ParsedStatement, &[Param])> {
        let mut offset = 0;
        self.statement.statements().iter().map(move |stmt| {
            let end = offset + stmt.param_count;
            let params = self.params.get(offset..end).unwrap_or(&[]);
            offset = end;
            (stmt, params)
        })
    }

    /// The SQL with every placeholder replaced by a literal.
    ///
    /// Fails when a value cannot be converted to its declared type.
    pub fn inline_sql(&self) -> Result<String> {
        self.render(true)
    }

    fn render(&self, strict: bool) -> Result<String> {
        let types = BuiltinTypes;
        let mut out = String::new();
        for (i, (stmt, params)) in self.parts().enumerate() {
            if i > 0 {
                out.push_str("; ");
            }
            let mut last = 0;
            for range in &stmt.placeholders {
                out.push_str(&stmt.sql[last..range.start]);
                let marker = &stmt.sql[range.clone()];
                match marker[1..]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|n| params.get(n))
                {
                    Some(param) => {
                        self.push_literal(&mut out, param, &types, strict)?;
                    }
                    None if strict => {
                        return Err(Error::InvalidUsage(format!(
                            "no value bound for {}",
                            marker
                        )));
                    }
                    None => out.push_str(marker),
                }
                last = range.end;
            }
            out.push_str(&stmt.sql[last..]);
        }
        Ok(out)
    }

    fn push_literal(
        &self,
        out: &mut String,
        param: &Param,
        types: &impl TypeLookup,
        strict: bool,
    ) -> Result<()> {
        if param.value.is_null() {
            out.push_str("NULL");
            return Ok(());
        }

        let untyped = param.oid == oid::UNSPECIFIED
            && param.scale.is_none()
            && matches!(param.value, Value::Text(_) | Value::Char(_));
        let target = if untyped {
            oid::UNSPECIFIED
        } else {
            param.wire_oid(StringType::Varchar)
        };

        let text = match literal_text(param, target) {
            Ok(text) => text,
            Err(e) if strict => return Err(e),
            Err(_) => param.value.to_text().map(|t| t.into_owned()).unwrap_or_default(),
        };

        if text.contains('\\') && !self.standard_conforming_strings {
            out.push('E');
            quote(out, &text.replace('\\', "\\\\"));
        } else {
            quote(out, &text);
        }

        if let Some(name) = types.type_name(target) {
            out.push_str("::");
            out.push_str(name);
        }
        Ok(())
    }
}

/// Text form of a parameter after conversion to its target type.
fn literal_text(param: &Param, target: Oid) -> Result<String> {
    let value = param.wire_value()?;
    let mut buf = Vec::new();
    codec::encode(&value, target, false, &mut buf)?;
    let body = buf.get(4..).unwrap_or(&[]);
    String::from_utf8(body.to_vec())
        .map_err(|_| Error::InvalidUsage("parameter text is not valid UTF-8".into()))
}

fn quote(out: &mut String, text: &str) {
    out.push('\'');
    for c in text.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
}

impl fmt::Display for BindFrame {
    /// Renders values that do not convert to their type as their raw text.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.render(false) {
            Ok(sql) => f.write_str(&sql),
            Err(_) => f.write_str(self.statement.source()),
        }
    }
}
