// ABOUTME: Transfer job descriptor and the engine boundary that executes it
// ABOUTME: Builds column lists and row predicates, summarizes failed engine logs

pub mod datax;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;

use crate::config::Endpoint;
use crate::error::SyncError;
use crate::planner::{Predicate, SyncPlan};
use crate::utils::quote_mysql_ident;

pub use datax::{render_datax_job, DataxEngine};

/// Lines kept from a failed engine log when nothing looks like an error.
const SUMMARY_TAIL_LINES: usize = 5;
/// Summary lines shown in the outcome message.
const SUMMARY_SHOWN_LINES: usize = 3;

/// How the destination treats a row whose primary key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the existing row.
    Replace,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Replace => "replace",
        }
    }
}

/// Everything the transfer engine needs to copy one table.
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub table: String,
    pub source: Endpoint,
    pub destination: Endpoint,
    /// Raw column names in source ordinal order.
    pub column_names: Vec<String>,
    /// Backtick-quoted column names, same order.
    pub columns: Vec<String>,
    pub predicate: Predicate,
    /// `predicate` rendered as a SQL `WHERE` body.
    pub where_clause: String,
    pub write_mode: WriteMode,
}

impl TransferJob {
    /// Describe the transfer of `table` under `plan`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DescriptorBuild`] when the source reported no
    /// columns for the table.
    pub fn build(
        table: &str,
        plan: &SyncPlan,
        column_names: &[String],
        source: &Endpoint,
        destination: &Endpoint,
    ) -> Result<Self, SyncError> {
        if column_names.is_empty() {
            return Err(SyncError::DescriptorBuild {
                table: table.to_string(),
                reason: "source reported no columns".to_string(),
            });
        }

        Ok(Self {
            table: table.to_string(),
            source: source.clone(),
            destination: destination.clone(),
            column_names: column_names.to_vec(),
            columns: column_names.iter().map(|c| quote_mysql_ident(c)).collect(),
            predicate: plan.predicate.clone(),
            where_clause: plan.predicate.to_sql(),
            write_mode: WriteMode::Replace,
        })
    }
}

/// Result of one engine invocation.
#[derive(Debug, Clone)]
pub struct TransferReport {
    /// Process exit code; 0 means success, -1 means killed or no code.
    pub exit_code: i32,
    /// Combined engine output.
    pub log: String,
}

impl TransferReport {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes transfer jobs. Implementations must be safe to call from many
/// table pipelines at once.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Run one job to completion.
    ///
    /// A non-zero exit is reported through [`TransferReport::exit_code`];
    /// `Err` means the engine could not be run at all.
    async fn execute(&self, job: &TransferJob) -> Result<TransferReport>;

    /// Check that the engine can be launched.
    async fn check_available(&self) -> Result<()>;
}

/// Pick the interesting lines out of a failed engine log.
///
/// Lines mentioning `Exception` or `Error` win; otherwise the tail of the
/// log is used. At most the last three are returned.
pub fn summarize_log(log: &str) -> String {
    let lines: Vec<&str> = log.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    let mut picked: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|l| l.contains("Exception") || l.contains("Error"))
        .collect();
    if picked.is_empty() {
        picked = lines[lines.len().saturating_sub(SUMMARY_TAIL_LINES)..].to_vec();
    }

    picked[picked.len().saturating_sub(SUMMARY_SHOWN_LINES)..].join("\n")
}

/// Write the complete engine output for a failed table.
pub async fn write_failure_log(path: &Path, log: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create log directory {:?}", parent))?;
        }
    }
    tokio::fs::write(path, log)
        .await
        .with_context(|| format!("Failed to write engine log {:?}", path))?;
    Ok(())
}
