//! Typed named-parameter binding
//!
//! SQL text refers to values as `@name`. Binding rewrites each placeholder
//! to a positional `?` and lines the typed values up in the same order, so
//! no caller-provided value is ever spliced into SQL text.

use chrono::{DateTime, Utc};
use duckdb::types::{ToSqlOutput, Value};
use duckdb::ToSql;

use crate::domain::result::{Error, Result};

/// Timestamp layout used when handing timestamps to the engine
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// A typed parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
    /// Bound as text in [`TIMESTAMP_FORMAT`]; SQL must `CAST(@x AS TIMESTAMP)`
    Timestamp(DateTime<Utc>),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(i64::from(v))
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

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Int(v) => ToSqlOutput::Owned(Value::BigInt(*v)),
            SqlValue::Text(v) => ToSqlOutput::Owned(Value::Text(v.clone())),
            SqlValue::Timestamp(v) => {
                ToSqlOutput::Owned(Value::Text(v.format(TIMESTAMP_FORMAT).to_string()))
            }
        })
    }
}

/// Mapping from parameter name to value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedParams {
    values: Vec<(&'static str, SqlValue)>,
}

impl NamedParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name`, replacing any earlier value
    pub fn with(mut self, name: &'static str, value: impl Into<SqlValue>) -> Self {
        let value = value.into();
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// SQL rewritten for positional binding, with its values in order
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

impl BoundQuery {
    pub fn params(&self) -> Vec<&dyn ToSql> {
        self.values.iter().map(|v| v as &dyn ToSql).collect()
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Rewrite `@name` placeholders to `?` and collect their values.
///
/// Placeholders inside single-quoted literals and double-quoted
/// identifiers are left alone. A placeholder without a value is a bind
/// error.
pub fn bind(sql: &str, params: &NamedParams) -> Result<BoundQuery> {
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                out.push(c);
            }
            None if c == '@' && chars.peek().copied().is_some_and(is_ident_start) => {
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if !is_ident_char(next) {
                        break;
                    }
                    name.push(next);
                    chars.next();
                }
                let value = params
                    .get(&name)
                    .ok_or_else(|| Error::bind(format!("no value bound for @{}", name)))?;
                values.push(value.clone());
                out.push('?');
            }
            None => out.push(c),
        }
    }

    Ok(BoundQuery { sql: out, values })
}
