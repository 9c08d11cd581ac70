//! Query results and response assembly

use crate::protocol::{BackendMessage, DbError, FieldDescription};
use crate::{Error, Result};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::sync::Arc;

/// One result row: column values in RowDescription order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Option<String>>,
}

impl Row {
    /// Value of the named column; `None` if the column is absent or NULL
    pub fn get(&self, name: &str) -> Option<&str> {
        let idx = self.columns.iter().position(|c| c == name)?;
        self.get_idx(idx)
    }

    /// Value at a column index; `None` if out of range or NULL
    pub fn get_idx(&self, idx: usize) -> Option<&str> {
        self.values.get(idx)?.as_deref()
    }

    /// Whether the row has a column with this name
    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Column names in order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate `(column, value)` pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(Option::as_deref))
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

/// Value delivered to the caller of a query
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueryResult {
    /// Rows returned, in order
    pub rows: Vec<Row>,
    /// Rows affected or returned, derived from the command tag
    pub row_count: u64,
    /// First word of the command tag (`SELECT`, `INSERT`, ...); empty for an empty query
    pub command: String,
}

/// Derive the row count from a command tag.
///
/// `rows_seen` is used for `SELECT`, whose tag count can be absent on old servers.
pub fn parse_row_count(tag: &str, rows_seen: usize) -> u64 {
    let mut words = tag.split_whitespace();
    let command = words.next().unwrap_or("");
    match command {
        "INSERT" | "UPDATE" | "DELETE" | "MERGE" | "COPY" | "MOVE" | "FETCH" => tag
            .split_whitespace()
            .last()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0),
        "SELECT" => rows_seen as u64,
        _ => 0,
    }
}

/// Response assembly for the query currently on the wire
#[derive(Debug, Default)]
pub struct ActiveQuery {
    columns: Option<Arc<[String]>>,
    rows: Vec<Row>,
    command_tag: Option<String>,
    error: Option<DbError>,
}

impl ActiveQuery {
    /// Start assembling a new response
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one backend message received while the query is active.
    ///
    /// Returns `Ok(true)` once ReadyForQuery arrives.
    pub fn handle(&mut self, msg: BackendMessage) -> Result<bool> {
        match msg {
            BackendMessage::RowDescription(fields) => {
                self.columns = Some(column_names(&fields));
            }
            BackendMessage::DataRow(values) => {
                let columns = self.columns.clone().ok_or_else(|| {
                    Error::Protocol("DataRow received before RowDescription".into())
                })?;
                if values.len() != columns.len() {
                    return Err(Error::Protocol(format!(
                        "DataRow has {} columns, RowDescription declared {}",
                        values.len(),
                        columns.len()
                    )));
                }
                let values = values
                    .into_iter()
                    .map(|v| v.map(|b| String::from_utf8_lossy(&b).into_owned()))
                    .collect();
                self.rows.push(Row { columns, values });
            }
            BackendMessage::CommandComplete(tag) => {
                self.command_tag = Some(tag);
            }
            BackendMessage::EmptyQueryResponse => {
                self.command_tag = Some(String::new());
            }
            BackendMessage::ErrorResponse(err) => {
                tracing::debug!(code = ?err.code, message = ?err.message, "query error response");
                // Keep the first error; the rest of the cycle is drained until ReadyForQuery
                if self.error.is_none() {
                    self.error = Some(err);
                }
            }
            BackendMessage::NoticeResponse(notice) => {
                tracing::debug!(
                    severity = ?notice.severity,
                    message = ?notice.message,
                    "notice"
                );
            }
            BackendMessage::NotificationResponse { channel, .. } => {
                tracing::debug!(channel = %channel, "ignoring notification");
            }
            BackendMessage::ParameterStatus { .. } | BackendMessage::BackendKeyData { .. } => {}
            BackendMessage::ReadyForQuery { .. } => return Ok(true),
            BackendMessage::Authentication(_) => {
                return Err(Error::Protocol(
                    "unexpected Authentication message during query".into(),
                ));
            }
        }
        Ok(false)
    }

    /// Produce the caller's result once ReadyForQuery has been seen
    pub fn finish(self) -> Result<QueryResult> {
        if let Some(err) = self.error {
            return Err(Error::Query(Box::new(err)));
        }

        let tag = self.command_tag.unwrap_or_default();
        let command = tag.split_whitespace().next().unwrap_or("").to_string();
        let row_count = parse_row_count(&tag, self.rows.len());

        Ok(QueryResult {
            rows: self.rows,
            row_count,
            command,
        })
    }
}

fn column_names(fields: &[FieldDescription]) -> Arc<[String]> {
    fields.iter().map(|f| f.name.clone()).collect()
}
