// ABOUTME: In-memory catalog backend for tests and local dry runs
// ABOUTME: Tables are plain row vectors shared behind a mutex; failures can be injected per table

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Catalog, Connector, KeyTuple};
use crate::error::Side;
use crate::watermark::Watermark;

/// A table held in memory. Values are text; `None` is SQL NULL.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    pub columns: Vec<String>,
    pub primary_key: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl MemoryTable {
    pub fn new(columns: &[&str], primary_key: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            primary_key: primary_key.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row given as `Some` / `None` values in column order.
    pub fn with_row(mut self, values: &[Option<&str>]) -> Self {
        self.rows
            .push(values.iter().map(|v| v.map(|s| s.to_string())).collect());
        self
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Value of `column` in `row`, if the column exists and is not NULL.
    pub fn value<'a>(&self, row: &'a [Option<String>], column: &str) -> Option<&'a str> {
        self.column_index(column)
            .and_then(|i| row.get(i))
            .and_then(|v| v.as_deref())
    }

    /// Primary key values of `row` using `key_columns`, as text.
    pub fn key_of(&self, row: &[Option<String>], key_columns: &[String]) -> Vec<String> {
        key_columns
            .iter()
            .map(|c| self.value(row, c).unwrap_or_default().to_string())
            .collect()
    }

    /// Insert `row`, replacing any existing row with the same primary key.
    pub fn replace_row(&mut self, row: Vec<Option<String>>) {
        if !self.primary_key.is_empty() {
            let key = self.key_of(&row, &self.primary_key);
            if let Some(existing) = self
                .rows
                .iter_mut()
                .find(|r| self_key(&self.columns, r, &self.primary_key) == key)
            {
                *existing = row;
                return;
            }
        }
        self.rows.push(row);
    }
}

fn self_key(columns: &[String], row: &[Option<String>], key_columns: &[String]) -> Vec<String> {
    key_columns
        .iter()
        .map(|c| {
            columns
                .iter()
                .position(|name| name == c)
                .and_then(|i| row.get(i))
                .and_then(|v| v.clone())
                .unwrap_or_default()
        })
        .collect()
}

fn key_bytes(key: Vec<String>) -> KeyTuple {
    key.into_iter().map(String::into_bytes).collect()
}

#[derive(Debug, Default)]
struct DatabaseState {
    tables: HashMap<String, MemoryTable>,
    failing_tables: HashSet<String>,
    failing_key_scans: HashSet<String>,
}

/// A shared in-memory database. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<DatabaseState>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DatabaseState> {
        // A poisoned lock only means another test thread panicked mid-update
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn create_table(&self, name: &str, table: MemoryTable) {
        self.lock().tables.insert(name.to_string(), table);
    }

    /// Snapshot of a table.
    pub fn table(&self, name: &str) -> Option<MemoryTable> {
        self.lock().tables.get(name).cloned()
    }

    /// Run `f` against a table, creating nothing if it is missing.
    pub fn with_table<T>(&self, name: &str, f: impl FnOnce(&mut MemoryTable) -> T) -> Option<T> {
        self.lock().tables.get_mut(name).map(f)
    }

    pub fn insert_row(&self, name: &str, values: &[Option<&str>]) {
        self.with_table(name, |t| {
            t.rows
                .push(values.iter().map(|v| v.map(|s| s.to_string())).collect())
        });
    }

    /// Delete rows whose `column` equals `value`.
    pub fn delete_where(&self, name: &str, column: &str, value: &str) {
        self.with_table(name, |t| {
            if let Some(i) = t.column_index(column) {
                t.rows.retain(|r| r.get(i).and_then(|v| v.as_deref()) != Some(value));
            }
        });
    }

    pub fn row_count(&self, name: &str) -> usize {
        self.table(name).map(|t| t.rows.len()).unwrap_or(0)
    }

    /// Sorted primary key values currently stored in `name`.
    pub fn keys(&self, name: &str) -> Vec<Vec<String>> {
        let Some(table) = self.table(name) else {
            return Vec::new();
        };
        let mut keys: Vec<Vec<String>> = table
            .rows
            .iter()
            .map(|r| table.key_of(r, &table.primary_key))
            .collect();
        keys.sort();
        keys
    }

    /// Make every query touching `name` fail.
    pub fn fail_queries_on(&self, name: &str) {
        self.lock().failing_tables.insert(name.to_string());
    }

    /// Make only primary key scans of `name` fail.
    pub fn fail_key_scans_on(&self, name: &str) {
        self.lock().failing_key_scans.insert(name.to_string());
    }

    fn check(&self, name: &str) -> Result<()> {
        if self.lock().failing_tables.contains(name) {
            bail!("simulated query failure on '{}'", name);
        }
        Ok(())
    }
}

/// One "connection" to a [`MemoryDatabase`].
pub struct MemoryCatalog {
    db: MemoryDatabase,
    open_connections: Arc<AtomicUsize>,
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn list_tables(&mut self) -> Result<Vec<String>> {
        let mut tables: Vec<String> = self.db.lock().tables.keys().cloned().collect();
        tables.sort();
        Ok(tables)
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        self.db.check(table)?;
        Ok(self.db.lock().tables.contains_key(table))
    }

    async fn columns(&mut self, table: &str) -> Result<Vec<String>> {
        self.db.check(table)?;
        Ok(self.db.table(table).map(|t| t.columns).unwrap_or_default())
    }

    async fn primary_key(&mut self, table: &str) -> Result<Vec<String>> {
        self.db.check(table)?;
        Ok(self.db.table(table).map(|t| t.primary_key).unwrap_or_default())
    }

    async fn has_column(&mut self, table: &str, column: &str) -> Result<bool> {
        self.db.check(table)?;
        Ok(self
            .db
            .table(table)
            .map(|t| t.column_index(column).is_some())
            .unwrap_or(false))
    }

    async fn max_value(&mut self, table: &str, column: &str) -> Result<Option<Watermark>> {
        self.db.check(table)?;
        let t = self
            .db
            .table(table)
            .ok_or_else(|| anyhow!("Table '{}' doesn't exist", table))?;
        if t.column_index(column).is_none() {
            bail!("Unknown column '{}' in '{}'", column, table);
        }
        Ok(t.rows
            .iter()
            .filter_map(|r| t.value(r, column))
            .map(Watermark::from)
            .max())
    }

    async fn row_count_nonzero(&mut self, table: &str) -> Result<bool> {
        self.db.check(table)?;
        let t = self
            .db
            .table(table)
            .ok_or_else(|| anyhow!("Table '{}' doesn't exist", table))?;
        Ok(!t.rows.is_empty())
    }

    async fn primary_key_values(
        &mut self,
        table: &str,
        primary_key_columns: &[String],
    ) -> Result<Vec<KeyTuple>> {
        self.db.check(table)?;
        if self.db.lock().failing_key_scans.contains(table) {
            bail!("simulated key scan failure on '{}'", table);
        }
        let t = self
            .db
            .table(table)
            .ok_or_else(|| anyhow!("Table '{}' doesn't exist", table))?;
        Ok(t.rows
            .iter()
            .map(|r| key_bytes(t.key_of(r, primary_key_columns)))
            .collect())
    }

    async fn delete_by_keys(
        &mut self,
        table: &str,
        primary_key_columns: &[String],
        keys: &[KeyTuple],
    ) -> Result<u64> {
        self.db.check(table)?;
        let doomed: HashSet<&KeyTuple> = keys.iter().collect();
        self.db
            .with_table(table, |t| {
                let before = t.rows.len();
                let columns = t.columns.clone();
                t.rows.retain(|r| {
                    !doomed.contains(&key_bytes(self_key(&columns, r, primary_key_columns)))
                });
                (before - t.rows.len()) as u64
            })
            .ok_or_else(|| anyhow!("Table '{}' doesn't exist", table))
    }

    async fn truncate(&mut self, table: &str) -> Result<()> {
        self.db.check(table)?;
        self.db
            .with_table(table, |t| t.rows.clear())
            .ok_or_else(|| anyhow!("Table '{}' doesn't exist", table))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.open_connections.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connects to a pair of in-memory databases.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    pub source: MemoryDatabase,
    pub destination: MemoryDatabase,
    unreachable: Arc<Mutex<HashSet<Side>>>,
    open_connections: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new(source: MemoryDatabase, destination: MemoryDatabase) -> Self {
        Self {
            source,
            destination,
            ..Default::default()
        }
    }

    /// Make every subsequent connection attempt to `side` fail.
    pub fn set_unreachable(&self, side: Side) {
        self.unreachable
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(side);
    }

    /// Connections opened and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, side: Side) -> Result<Box<dyn Catalog>> {
        if self
            .unreachable
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&side)
        {
            bail!("simulated connection refused ({})", side);
        }
        let db = match side {
            Side::Source => self.source.clone(),
            Side::Destination => self.destination.clone(),
        };
        self.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryCatalog {
            db,
            open_connections: self.open_connections.clone(),
        }))
    }
}
