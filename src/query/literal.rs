//! Textual parameter substitution
//!
//! Parameters are inlined into the SQL text as escaped literals and the result
//! is sent through the simple query protocol. Only literal values are escaped;
//! identifiers are never substituted.

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// A value that can be substituted for a `$n` placeholder
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL
    Null,
    /// Renders as `TRUE` / `FALSE`
    Bool(bool),
    /// Integer, rendered verbatim; negative values are parenthesized
    Int(i64),
    /// Float, rendered like `Int`; NaN and infinities are rejected
    Float(f64),
    /// Text, rendered as a quoted and escaped literal
    Text(String),
    /// Timestamp, rendered as a quoted ISO-8601 string in UTC
    Timestamp(DateTime<Utc>),
    /// JSON document, rendered as its compact serialization in quotes
    Json(serde_json::Value),
}

impl SqlValue {
    /// Render this value as an SQL literal
    pub fn to_sql_literal(&self) -> Result<String> {
        match self {
            SqlValue::Null => Ok("NULL".to_string()),
            SqlValue::Bool(true) => Ok("TRUE".to_string()),
            SqlValue::Bool(false) => Ok("FALSE".to_string()),
            SqlValue::Int(n) if *n < 0 => Ok(format!("({})", n)),
            SqlValue::Int(n) => Ok(n.to_string()),
            SqlValue::Float(f) => {
                if !f.is_finite() {
                    return Err(Error::Usage(format!(
                        "cannot render non-finite number {} as an SQL literal",
                        f
                    )));
                }
                // A bare minus after `-` in the query text would open a `--` comment
                if f.is_sign_negative() {
                    Ok(format!("({})", f))
                } else {
                    Ok(f.to_string())
                }
            }
            SqlValue::Text(s) => quote_text(s),
            SqlValue::Timestamp(ts) => Ok(quote_literal(
                &ts.to_rfc3339_opts(SecondsFormat::Millis, true),
            )),
            SqlValue::Json(v) => quote_text(&v.to_string()),
        }
    }
}

/// Query messages are NUL-terminated and Postgres text cannot hold NUL
fn quote_text(s: &str) -> Result<String> {
    if s.contains('\0') {
        return Err(Error::Usage(
            "text parameter contains a NUL byte".to_string(),
        ));
    }
    Ok(quote_literal(s))
}

/// Quote a string as an SQL literal, doubling single quotes and backslashes
pub fn quote_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Substitute `$1`, `$2`, ... in `sql` with literals rendered from `params`.
///
/// `$0` and indexes past the end of `params` are usage errors. A `$` that is
/// not followed by a digit is copied through unchanged.
pub fn format_query(sql: &str, params: &[SqlValue]) -> Result<String> {
    if !sql.contains('$') {
        return Ok(sql.to_string());
    }

    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut rest = sql;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();

        if digits == 0 {
            out.push('$');
            rest = after;
            continue;
        }

        let index: usize = after[..digits]
            .parse()
            .map_err(|_| Error::Usage(format!("parameter index ${} is out of range", &after[..digits])))?;
        if index == 0 || index > params.len() {
            return Err(Error::Usage(format!(
                "parameter ${} is out of range ({} supplied)",
                index,
                params.len()
            )));
        }

        out.push_str(&params[index - 1].to_sql_literal()?);
        rest = &after[digits..];
    }

    out.push_str(rest);
    Ok(out)
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for SqlValue {
                fn from(v: $t) -> Self {
                    SqlValue::Int(i64::from(v))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        SqlValue::Float(f64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&String> for SqlValue {
    fn from(v: &String) -> Self {
        SqlValue::Text(v.clone())
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for SqlValue {
    fn from(v: DateTime<Tz>) -> Self {
        SqlValue::Timestamp(v.with_timezone(&Utc))
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        SqlValue::Json(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

/// Build a `Vec<SqlValue>` from heterogeneous values
///
/// ```
/// use pgwire_lite::{params, SqlValue};
///
/// let p = params![1, "two", None::<i32>];
/// assert_eq!(p[2], SqlValue::Null);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::SqlValue>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::SqlValue::from($value)),+]
    };
}
