//! Relational engine collaborator.
//!
//! A [`QueryExecutor`] runs one SQL statement and returns either a result
//! set or an affected-row count. [`SqliteExecutor`] is read-only unless
//! configured otherwise: only `SELECT`, `WITH`, `EXPLAIN` and `PRAGMA`
//! statements are accepted, and the connection itself is opened read-only.

use std::path::Path;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::{json, Value};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};

use crate::db;

const READ_ONLY_KEYWORDS: &[&str] = &["SELECT", "WITH", "EXPLAIN", "PRAGMA"];

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
        /// More rows existed than were returned.
        truncated: bool,
    },
    Affected(u64),
}

impl QueryOutcome {
    /// Plain-text table for the agent's observation.
    pub fn render(&self) -> String {
        match self {
            QueryOutcome::Affected(n) => format!("{} row(s) affected", n),
            QueryOutcome::Rows { rows, .. } if rows.is_empty() => "(no rows)".to_string(),
            QueryOutcome::Rows {
                columns,
                rows,
                truncated,
            } => {
                let mut out = columns.join(" | ");
                for row in rows {
                    out.push('\n');
                    let cells: Vec<String> = row.iter().map(render_cell).collect();
                    out.push_str(&cells.join(" | "));
                }
                if *truncated {
                    out.push_str(&format!("\n(truncated to {} rows)", rows.len()));
                }
                out
            }
        }
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<QueryOutcome>;
}

pub struct SqliteExecutor {
    pool: SqlitePool,
    read_only: bool,
    max_rows: usize,
}

impl SqliteExecutor {
    pub async fn open(path: &Path, read_only: bool, max_rows: usize) -> Result<Self> {
        let pool = db::connect_existing(path, read_only).await?;
        Ok(Self::from_pool(pool, read_only, max_rows))
    }

    pub fn from_pool(pool: SqlitePool, read_only: bool, max_rows: usize) -> Self {
        Self {
            pool,
            read_only,
            max_rows: max_rows.max(1),
        }
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn execute(&self, sql: &str) -> Result<QueryOutcome> {
        let statement = sql.trim().trim_end_matches(';').trim_end();
        if statement.is_empty() {
            bail!("empty SQL statement");
        }
        if has_statement_separator(statement) {
            bail!("only one SQL statement may be run at a time");
        }
        let reads = is_read_statement(statement);
        if self.read_only && !reads {
            bail!(
                "read-only database: only {} statements are allowed",
                READ_ONLY_KEYWORDS.join(", ")
            );
        }

        if !reads {
            let result = self.pool.execute(statement).await?;
            return Ok(QueryOutcome::Affected(result.rows_affected()));
        }

        let prepared = self.pool.prepare(statement).await?;
        let columns: Vec<String> = prepared
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let mut stream = prepared.query().fetch(&self.pool);
        let mut rows = Vec::new();
        let mut truncated = false;
        while let Some(row) = stream.try_next().await? {
            if rows.len() == self.max_rows {
                truncated = true;
                break;
            }
            rows.push(decode_row(&row)?);
        }

        Ok(QueryOutcome::Rows {
            columns,
            rows,
            truncated,
        })
    }
}

/// A `;` outside string literals and quoted identifiers. Doubled quotes
/// (`'it''s'`) toggle twice, so they need no special case.
fn has_statement_separator(statement: &str) -> bool {
    let mut quote: Option<char> = None;
    for c in statement.chars() {
        match (quote, c) {
            (None, '\'' | '"' | '`') => quote = Some(c),
            (None, '[') => quote = Some(']'),
            (None, ';') => return true,
            (Some(q), c) if c == q => quote = None,
            _ => {}
        }
    }
    false
}

fn is_read_statement(statement: &str) -> bool {
    let first = statement
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_start_matches('(')
        .to_ascii_uppercase();
    READ_ONLY_KEYWORDS.contains(&first.as_str())
}

fn decode_row(row: &SqliteRow) -> Result<Vec<Value>> {
    (0..row.len()).map(|i| decode_cell(row, i)).collect()
}

/// Decode by the value's storage class rather than the declared column
/// type, since SQLite lets any column hold any class.
fn decode_cell(row: &SqliteRow, index: usize) -> Result<Value> {
    let type_name = {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        raw.type_info().name().to_ascii_uppercase()
    };
    let value = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => json!(row.try_get_unchecked::<i64, _>(index)?),
        "REAL" => json!(row.try_get_unchecked::<f64, _>(index)?),
        "BLOB" => json!(format!(
            "<{} bytes>",
            row.try_get_unchecked::<Vec<u8>, _>(index)?.len()
        )),
        _ => json!(row.try_get_unchecked::<String, _>(index)?),
    };
    Ok(value)
}
