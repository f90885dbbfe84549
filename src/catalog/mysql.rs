// ABOUTME: MySQL-backed catalog using information_schema introspection
// ABOUTME: Opens per-pipeline connections and runs probe, key scan and delete queries

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder, Params, Row, TxOpts, Value};
use std::time::Duration;

use super::{Catalog, Connector, KeyTuple};
use crate::config::{Endpoint, SyncConfig};
use crate::error::Side;
use crate::utils::{quote_mysql_ident, retry_with_backoff};
use crate::watermark::Watermark;

/// A single MySQL connection scoped to the configured database.
pub struct MySqlCatalog {
    conn: Conn,
    database: String,
}

impl MySqlCatalog {
    /// Connect to an endpoint.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        let mut builder = OptsBuilder::default()
            .ip_or_hostname(endpoint.host.clone())
            .tcp_port(endpoint.port)
            .user(Some(endpoint.user.clone()))
            .pass(Some(endpoint.password.clone()))
            .db_name(Some(endpoint.database.clone()));

        if is_plain_charset(&endpoint.charset) {
            builder = builder.init(vec![format!("SET NAMES {}", endpoint.charset)]);
        }

        let conn = Conn::new(builder)
            .await
            .with_context(|| format!("Failed to connect to {}", endpoint))?;

        tracing::debug!("Connected to {}", endpoint);

        Ok(Self {
            conn,
            database: endpoint.database.clone(),
        })
    }
}

#[async_trait]
impl Catalog for MySqlCatalog {
    async fn list_tables(&mut self) -> Result<Vec<String>> {
        let tables: Vec<String> = self
            .conn
            .exec(
                "SELECT TABLE_NAME FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE' \
                 ORDER BY TABLE_NAME",
                (self.database.clone(),),
            )
            .await
            .context("Failed to list tables")?;
        Ok(tables)
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        let count: Option<i64> = self
            .conn
            .exec_first(
                "SELECT COUNT(*) FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?",
                (self.database.clone(), table.to_string()),
            )
            .await
            .with_context(|| format!("Failed to check whether table '{}' exists", table))?;
        Ok(count.unwrap_or(0) > 0)
    }

    async fn columns(&mut self, table: &str) -> Result<Vec<String>> {
        let columns: Vec<String> = self
            .conn
            .exec(
                "SELECT COLUMN_NAME FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
                 ORDER BY ORDINAL_POSITION",
                (self.database.clone(), table.to_string()),
            )
            .await
            .with_context(|| format!("Failed to get columns for table '{}'", table))?;
        Ok(columns)
    }

    async fn primary_key(&mut self, table: &str) -> Result<Vec<String>> {
        let columns: Vec<String> = self
            .conn
            .exec(
                "SELECT COLUMN_NAME FROM information_schema.KEY_COLUMN_USAGE \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY' \
                 ORDER BY ORDINAL_POSITION",
                (self.database.clone(), table.to_string()),
            )
            .await
            .with_context(|| format!("Failed to get primary key for table '{}'", table))?;
        Ok(columns)
    }

    async fn has_column(&mut self, table: &str, column: &str) -> Result<bool> {
        let count: Option<i64> = self
            .conn
            .exec_first(
                "SELECT COUNT(*) FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND COLUMN_NAME = ?",
                (self.database.clone(), table.to_string(), column.to_string()),
            )
            .await
            .with_context(|| format!("Failed to look up column '{}' on '{}'", column, table))?;
        Ok(count.unwrap_or(0) > 0)
    }

    async fn max_value(&mut self, table: &str, column: &str) -> Result<Option<Watermark>> {
        let query = format!(
            "SELECT CAST(MAX({}) AS CHAR) FROM {}",
            quote_mysql_ident(column),
            quote_mysql_ident(table)
        );
        let max: Option<Option<String>> = self
            .conn
            .query_first(query)
            .await
            .with_context(|| format!("Failed to read MAX({}) from '{}'", column, table))?;
        Ok(max.flatten().map(Watermark::from))
    }

    async fn row_count_nonzero(&mut self, table: &str) -> Result<bool> {
        let query = format!(
            "SELECT EXISTS(SELECT 1 FROM {} LIMIT 1)",
            quote_mysql_ident(table)
        );
        let exists: Option<i64> = self
            .conn
            .query_first(query)
            .await
            .with_context(|| format!("Failed to check for rows in '{}'", table))?;
        Ok(exists.unwrap_or(0) > 0)
    }

    async fn primary_key_values(
        &mut self,
        table: &str,
        primary_key_columns: &[String],
    ) -> Result<Vec<KeyTuple>> {
        let query = build_key_scan_query(table, primary_key_columns);
        let rows: Vec<Row> = self
            .conn
            .query(query)
            .await
            .with_context(|| format!("Failed to scan primary keys of '{}'", table))?;

        rows.iter()
            .map(|row| key_tuple(row, primary_key_columns.len()))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Failed to read primary keys of '{}'", table))
    }

    async fn delete_by_keys(
        &mut self,
        table: &str,
        primary_key_columns: &[String],
        keys: &[KeyTuple],
    ) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let query = build_delete_query(table, primary_key_columns, keys.len());
        let params: Vec<Value> = keys
            .iter()
            .flat_map(|key| key.iter().map(|v| Value::Bytes(v.clone())))
            .collect();

        let mut tx = self
            .conn
            .start_transaction(TxOpts::default())
            .await
            .context("Failed to start delete transaction")?;

        let result = tx
            .exec_iter(query, Params::Positional(params))
            .await
            .with_context(|| format!("Failed to delete orphaned rows from '{}'", table))?;
        let deleted = result.affected_rows();
        result
            .drop_result()
            .await
            .context("Failed to finish delete statement")?;

        tx.commit()
            .await
            .context("Failed to commit delete transaction")?;

        Ok(deleted)
    }

    async fn truncate(&mut self, table: &str) -> Result<()> {
        self.conn
            .query_drop(format!("TRUNCATE TABLE {}", quote_mysql_ident(table)))
            .await
            .with_context(|| format!("Failed to truncate '{}'", table))?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.conn
            .disconnect()
            .await
            .context("Failed to close connection")?;
        Ok(())
    }
}

/// Opens [`MySqlCatalog`] connections for the configured endpoints.
pub struct MySqlConnector {
    source: Endpoint,
    destination: Endpoint,
    retries: u32,
}

impl MySqlConnector {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            source: config.source.clone(),
            destination: config.destination.clone(),
            retries: config.connect_retries,
        }
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    async fn connect(&self, side: Side) -> Result<Box<dyn Catalog>> {
        let endpoint = match side {
            Side::Source => &self.source,
            Side::Destination => &self.destination,
        };
        let catalog = retry_with_backoff(
            || MySqlCatalog::connect(endpoint),
            self.retries,
            Duration::from_secs(1),
        )
        .await
        .with_context(|| format!("Failed to open {} connection", side))?;
        Ok(Box::new(catalog))
    }
}

fn is_plain_charset(charset: &str) -> bool {
    !charset.is_empty() && charset.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `SELECT pk, ... FROM table` over the primary key columns.
///
/// Runs over the text protocol, so every value arrives as the bytes MySQL
/// stores or renders for it.
fn build_key_scan_query(table: &str, primary_key_columns: &[String]) -> String {
    let select_list = primary_key_columns
        .iter()
        .map(|c| quote_mysql_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {} FROM {}", select_list, quote_mysql_ident(table))
}

/// The first `width` columns of a key scan row.
fn key_tuple(row: &Row, width: usize) -> Result<KeyTuple> {
    (0..width)
        .map(|i| {
            row.as_ref(i)
                .ok_or_else(|| anyhow!("key scan row has no column {}", i))
                .and_then(key_component)
        })
        .collect()
}

/// Raw bytes of one key value. Binary keys are kept byte for byte.
fn key_component(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Bytes(bytes) => Ok(bytes.clone()),
        Value::Int(n) => Ok(n.to_string().into_bytes()),
        Value::UInt(n) => Ok(n.to_string().into_bytes()),
        Value::NULL => bail!("NULL primary key value"),
        other => bail!("unsupported primary key value {:?}", other),
    }
}

/// Delete statement matching `key_count` primary key tuples.
///
/// Single-column keys use `pk IN (?, ...)`; composite keys use a row
/// constructor so every component must match:
/// ```sql
/// DELETE FROM `t` WHERE (`a`, `b`) IN ((?, ?), (?, ?))
/// ```
fn build_delete_query(table: &str, primary_key_columns: &[String], key_count: usize) -> String {
    let quoted: Vec<String> = primary_key_columns
        .iter()
        .map(|c| quote_mysql_ident(c))
        .collect();

    if quoted.len() == 1 {
        let placeholders = vec!["?"; key_count].join(", ");
        return format!(
            "DELETE FROM {} WHERE {} IN ({})",
            quote_mysql_ident(table),
            quoted[0],
            placeholders
        );
    }

    let tuple = format!("({})", vec!["?"; quoted.len()].join(", "));
    let tuples = vec![tuple.as_str(); key_count].join(", ");
    format!(
        "DELETE FROM {} WHERE ({}) IN ({})",
        quote_mysql_ident(table),
        quoted.join(", "),
        tuples
    )
}
