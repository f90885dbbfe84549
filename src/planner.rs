// ABOUTME: Sync planner - chooses full or incremental transfer per table
// ABOUTME: Produces the row predicate and the watermark to commit on success

use anyhow::Result;
use std::fmt;

use crate::catalog::Catalog;
use crate::checkpoint::CheckpointStore;
use crate::utils::{quote_mysql_ident, quote_mysql_literal};
use crate::watermark::Watermark;

/// How a table's rows are selected for transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Forced copy of every row.
    Full,
    /// Rows changed inside a bounded watermark window.
    Incremental,
    /// Every row, because the table has no watermark column.
    FullNoWatermarkColumn,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => f.write_str("forced full sync"),
            SyncMode::Incremental => f.write_str("incremental sync"),
            SyncMode::FullNoWatermarkColumn => f.write_str("full sync (no watermark column)"),
        }
    }
}

/// Row filter handed to the transfer engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Unconditionally true.
    All,
    /// `column > start AND column <= end`.
    Window {
        column: String,
        start: Watermark,
        end: Watermark,
    },
}

impl Predicate {
    /// Render as a MySQL `WHERE` clause body.
    pub fn to_sql(&self) -> String {
        match self {
            Predicate::All => "1=1".to_string(),
            Predicate::Window { column, start, end } => {
                let column = quote_mysql_ident(column);
                format!(
                    "{} > {} AND {} <= {}",
                    column,
                    quote_mysql_literal(start.as_str()),
                    column,
                    quote_mysql_literal(end.as_str())
                )
            }
        }
    }

    /// Whether a row whose watermark column holds `value` is selected.
    ///
    /// Mirrors the SQL semantics: the window is open at `start` and closed at
    /// `end`, and NULL never matches a comparison.
    pub fn matches(&self, value: Option<&Watermark>) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Window { start, end, .. } => match value {
                Some(v) => v > start && v <= end,
                None => false,
            },
        }
    }
}

/// Per-table decision artifact for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub mode: SyncMode,
    pub predicate: Predicate,
    /// Committed to the checkpoint store only if the transfer succeeds.
    pub new_watermark: Option<Watermark>,
    pub truncate_destination: bool,
}

impl SyncPlan {
    /// Human-readable description used in outcome messages.
    pub fn describe(&self) -> String {
        match &self.predicate {
            Predicate::Window { start, end, .. } => {
                format!("{} ({} -> {})", self.mode, start, end)
            }
            Predicate::All => self.mode.to_string(),
        }
    }
}

/// What the planner decided for a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanDecision {
    Transfer(SyncPlan),
    /// Source has nothing newer than the starting watermark.
    NoNewData { current: Watermark },
    /// Nothing to transfer and nothing to report as failure.
    Skip { reason: String },
}

/// Everything the decision table needs, already probed.
#[derive(Debug, Clone, Default)]
pub struct PlanInputs {
    pub watermark_column: String,
    pub force_full: bool,
    pub truncate_before_full: bool,
    pub has_watermark_column: bool,
    pub checkpoint: Option<Watermark>,
    pub destination_max: Option<Watermark>,
    pub source_has_rows: bool,
    pub source_max: Option<Watermark>,
}

/// Pure decision table, evaluated in order.
pub fn decide(inputs: &PlanInputs) -> PlanDecision {
    if inputs.force_full {
        return PlanDecision::Transfer(SyncPlan {
            mode: SyncMode::Full,
            predicate: Predicate::All,
            new_watermark: if inputs.has_watermark_column {
                inputs.source_max.clone()
            } else {
                None
            },
            truncate_destination: inputs.truncate_before_full,
        });
    }

    if !inputs.has_watermark_column {
        return PlanDecision::Transfer(SyncPlan {
            mode: SyncMode::FullNoWatermarkColumn,
            predicate: Predicate::All,
            new_watermark: None,
            truncate_destination: false,
        });
    }

    if !inputs.source_has_rows {
        return PlanDecision::Skip {
            reason: "source empty".to_string(),
        };
    }

    let Some(end) = inputs.source_max.clone() else {
        return PlanDecision::Skip {
            reason: format!("no {} values in source", inputs.watermark_column),
        };
    };

    let start = inputs
        .checkpoint
        .clone()
        .or_else(|| inputs.destination_max.clone())
        .unwrap_or_else(Watermark::epoch);

    if !end.is_after(&start) {
        return PlanDecision::NoNewData { current: end };
    }

    PlanDecision::Transfer(SyncPlan {
        mode: SyncMode::Incremental,
        predicate: Predicate::Window {
            column: inputs.watermark_column.clone(),
            start,
            end: end.clone(),
        },
        new_watermark: Some(end),
        truncate_destination: false,
    })
}

/// Flags that shape a table's plan.
#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub table: &'a str,
    pub watermark_column: &'a str,
    pub force_full: bool,
    pub truncate_before_full: bool,
}

/// Probe the live databases and decide the table's plan.
///
/// Only the probes the chosen branch needs are issued: the destination is
/// consulted solely when no checkpoint exists. Source probe failures
/// propagate; a destination probe failure counts as "no destination maximum".
pub async fn plan_table(
    request: &PlanRequest<'_>,
    source: &mut dyn Catalog,
    destination: &mut dyn Catalog,
    checkpoints: &CheckpointStore,
) -> Result<PlanDecision> {
    let table = request.table;
    let column = request.watermark_column;

    let mut inputs = PlanInputs {
        watermark_column: column.to_string(),
        force_full: request.force_full,
        truncate_before_full: request.truncate_before_full,
        has_watermark_column: source.has_column(table, column).await?,
        ..Default::default()
    };

    if inputs.force_full {
        if inputs.has_watermark_column {
            inputs.source_max = source.max_value(table, column).await?;
        }
        return Ok(decide(&inputs));
    }

    if !inputs.has_watermark_column {
        return Ok(decide(&inputs));
    }

    inputs.checkpoint = checkpoints.get(table).await;
    if inputs.checkpoint.is_none() {
        inputs.destination_max = destination_max(destination, table, column).await;
    }

    inputs.source_has_rows = source.row_count_nonzero(table).await?;
    if inputs.source_has_rows {
        inputs.source_max = source.max_value(table, column).await?;
    }

    Ok(decide(&inputs))
}

async fn destination_max(
    destination: &mut dyn Catalog,
    table: &str,
    column: &str,
) -> Option<Watermark> {
    match probe_destination_max(destination, table, column).await {
        Ok(max) => max,
        Err(e) => {
            tracing::debug!(
                "Could not read destination MAX({}) for {}: {:#}",
                column,
                table,
                e
            );
            None
        }
    }
}

async fn probe_destination_max(
    destination: &mut dyn Catalog,
    table: &str,
    column: &str,
) -> Result<Option<Watermark>> {
    if !destination.table_exists(table).await? {
        return Ok(None);
    }
    if !destination.has_column(table, column).await? {
        return Ok(None);
    }
    destination.max_value(table, column).await
}
