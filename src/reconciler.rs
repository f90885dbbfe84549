// ABOUTME: Reconciler - detects rows deleted from the source
// ABOUTME: Compares primary keys between source and destination and deletes orphaned rows

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fmt;

use crate::catalog::{Catalog, KeyTuple};

/// MySQL rejects statements with more than 65535 placeholders.
const MAX_PLACEHOLDERS: usize = 65_535;

/// What orphan detection did for a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrphanReport {
    /// Detection ran and removed this many destination rows.
    Deleted(u64),
    /// The table has no primary key, so row-level reconciliation is unsafe.
    NoPrimaryKey,
    /// The destination was emptied before the transfer; orphans cannot exist.
    SkippedAfterTruncate,
    /// Detection is turned off for this run.
    Disabled,
    /// Detection failed; nothing was assumed deleted.
    Failed(String),
}

impl OrphanReport {
    pub fn rows_deleted(&self) -> u64 {
        match self {
            OrphanReport::Deleted(n) => *n,
            _ => 0,
        }
    }
}

impl fmt::Display for OrphanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrphanReport::Deleted(0) => f.write_str("no orphaned rows"),
            OrphanReport::Deleted(n) => write!(f, "deleted {} orphaned rows", n),
            OrphanReport::NoPrimaryKey => f.write_str("no primary key, delete detection skipped"),
            OrphanReport::SkippedAfterTruncate => {
                f.write_str("destination truncated, delete detection skipped")
            }
            OrphanReport::Disabled => f.write_str("delete detection disabled"),
            OrphanReport::Failed(e) => write!(f, "delete detection failed: {}", e),
        }
    }
}

/// Reconciler finds rows that exist in the destination but not in the source.
///
/// Incremental transfers only ever see rows that still exist, so deletions
/// are invisible to them. The reconciler performs a full primary-key
/// comparison after each successful transfer and removes the difference.
pub struct Reconciler<'a> {
    source: &'a mut dyn Catalog,
    destination: &'a mut dyn Catalog,
    batch_size: usize,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        source: &'a mut dyn Catalog,
        destination: &'a mut dyn Catalog,
        batch_size: usize,
    ) -> Self {
        Self {
            source,
            destination,
            batch_size: batch_size.max(1),
        }
    }

    /// Primary key tuples present in the destination but not in the source,
    /// sorted so deletes run in a stable order.
    pub async fn find_orphaned_keys(
        &mut self,
        table: &str,
        primary_key_columns: &[String],
    ) -> Result<Vec<KeyTuple>> {
        let source_keys = self
            .source
            .primary_key_values(table, primary_key_columns)
            .await
            .context("Failed to get source primary keys")?;

        let destination_keys = self
            .destination
            .primary_key_values(table, primary_key_columns)
            .await
            .context("Failed to get destination primary keys")?;

        let source_set: HashSet<KeyTuple> = source_keys.into_iter().collect();
        let mut orphaned: Vec<KeyTuple> = destination_keys
            .into_iter()
            .filter(|key| !source_set.contains(key))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        orphaned.sort();

        tracing::debug!(
            "Found {} orphaned rows in {} that need deletion",
            orphaned.len(),
            table
        );

        Ok(orphaned)
    }

    /// Reconcile a table by deleting orphaned rows from the destination.
    ///
    /// Each batch is deleted in its own transaction. A table without a
    /// primary key is reported as [`OrphanReport::NoPrimaryKey`] without
    /// scanning anything.
    pub async fn reconcile_table(&mut self, table: &str) -> Result<OrphanReport> {
        let primary_key_columns = self
            .source
            .primary_key(table)
            .await
            .context("Failed to get primary key columns")?;

        if primary_key_columns.is_empty() {
            tracing::info!("Skipping delete detection for {}: no primary key", table);
            return Ok(OrphanReport::NoPrimaryKey);
        }

        let orphaned = self.find_orphaned_keys(table, &primary_key_columns).await?;
        if orphaned.is_empty() {
            tracing::debug!("No orphaned rows found in {}", table);
            return Ok(OrphanReport::Deleted(0));
        }

        let batch_size = effective_batch_size(self.batch_size, primary_key_columns.len());
        let mut deleted = 0u64;
        for chunk in orphaned.chunks(batch_size) {
            deleted += self
                .destination
                .delete_by_keys(table, &primary_key_columns, chunk)
                .await
                .with_context(|| format!("Failed to delete orphaned rows from {}", table))?;
        }

        tracing::info!("Deleted {} orphaned rows from {}", deleted, table);

        Ok(OrphanReport::Deleted(deleted))
    }
}

/// Largest batch not exceeding `requested` whose placeholders fit one statement.
fn effective_batch_size(requested: usize, key_width: usize) -> usize {
    let limit = MAX_PLACEHOLDERS / key_width.max(1);
    requested.clamp(1, limit.max(1))
}
