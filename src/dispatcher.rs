// ABOUTME: TableDispatcher - runs every selected table's sync pipeline in a bounded pool
// ABOUTME: Plans, transfers, commits checkpoints and cleans orphans with per-table failure isolation

use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::catalog::{Catalog, Connector};
use crate::checkpoint::CheckpointStore;
use crate::config::{RunOptions, SyncConfig};
use crate::error::{Side, SyncError};
use crate::planner::{plan_table, PlanDecision, PlanRequest};
use crate::reconciler::{OrphanReport, Reconciler};
use crate::transfer::{summarize_log, write_failure_log, TransferEngine, TransferJob};
use crate::watermark::Watermark;

/// Terminal state of one table for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    NoNewData,
    Skipped,
    Failed,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Success => f.write_str("success"),
            OutcomeStatus::NoNewData => f.write_str("no new data"),
            OutcomeStatus::Skipped => f.write_str("skipped"),
            OutcomeStatus::Failed => f.write_str("failed"),
        }
    }
}

/// Result of one table's pipeline.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub table: String,
    pub status: OutcomeStatus,
    pub message: String,
    pub rows_deleted: u64,
    /// Degraded steps that did not change the status.
    pub warnings: Vec<String>,
    /// `None` when the pipeline stopped before orphan detection.
    pub orphan_report: Option<OrphanReport>,
    /// Preserved engine log, only for failed transfers.
    pub log_artifact: Option<PathBuf>,
}

impl Outcome {
    fn new(table: &str, status: OutcomeStatus, message: impl Into<String>) -> Self {
        Self {
            table: table.to_string(),
            status,
            message: message.into(),
            rows_deleted: 0,
            warnings: Vec::new(),
            orphan_report: None,
            log_artifact: None,
        }
    }

    fn failed(table: &str, error: &SyncError) -> Self {
        let mut outcome = Self::new(table, OutcomeStatus::Failed, error.to_string());
        outcome.log_artifact = error.log_artifact().cloned();
        outcome
    }

    fn no_new_data(table: &str, current: &Watermark) -> Self {
        Self::new(
            table,
            OutcomeStatus::NoNewData,
            format!("no new data (latest {})", current),
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = match self.status {
            OutcomeStatus::Success => "✓",
            OutcomeStatus::NoNewData => "·",
            OutcomeStatus::Skipped => "◇",
            OutcomeStatus::Failed => "✗",
        };
        write!(f, "{} {}: {}", marker, self.table, self.message)?;
        for warning in &self.warnings {
            write!(f, "\n    ⚠ {}", warning)?;
        }
        if let Some(path) = &self.log_artifact {
            write!(f, "\n    log: {}", path.display())?;
        }
        Ok(())
    }
}

/// Aggregated result of a run, in input table order.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub outcomes: Vec<Outcome>,
    pub duration: Duration,
}

impl RunSummary {
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(OutcomeStatus::Failed) > 0
    }

    pub fn rows_deleted(&self) -> u64 {
        self.outcomes.iter().map(|o| o.rows_deleted).sum()
    }

    pub fn outcome(&self, table: &str) -> Option<&Outcome> {
        self.outcomes.iter().find(|o| o.table == table)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tables in {:.1}s: {} synced, {} unchanged, {} skipped, {} failed, {} orphaned rows deleted",
            self.outcomes.len(),
            self.duration.as_secs_f64(),
            self.count(OutcomeStatus::Success),
            self.count(OutcomeStatus::NoNewData),
            self.count(OutcomeStatus::Skipped),
            self.count(OutcomeStatus::Failed),
            self.rows_deleted()
        )
    }
}

/// Runs table pipelines concurrently.
///
/// Each table gets its own task holding one pool permit for the whole
/// pipeline, and its own pair of connections. A failure or panic in one
/// table becomes that table's `Failed` outcome and never reaches siblings.
#[derive(Clone)]
pub struct TableDispatcher {
    connector: Arc<dyn Connector>,
    engine: Arc<dyn TransferEngine>,
    checkpoints: Arc<CheckpointStore>,
    config: Arc<SyncConfig>,
}

impl TableDispatcher {
    pub fn new(
        connector: Arc<dyn Connector>,
        engine: Arc<dyn TransferEngine>,
        checkpoints: Arc<CheckpointStore>,
        config: Arc<SyncConfig>,
    ) -> Self {
        Self {
            connector,
            engine,
            checkpoints,
            config,
        }
    }

    /// Sync `tables` and collect one outcome per table.
    pub async fn run(&self, tables: &[String], options: &RunOptions) -> RunSummary {
        let start = Instant::now();
        let workers = options
            .max_workers
            .unwrap_or(self.config.max_workers)
            .max(1);

        tracing::info!(
            "Syncing {} tables with {} workers{}",
            tables.len(),
            workers,
            if options.force_full { " (forced full)" } else { "" }
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut join_set: JoinSet<(usize, Outcome)> = JoinSet::new();

        for (index, table) in tables.iter().enumerate() {
            let dispatcher = self.clone();
            let semaphore = semaphore.clone();
            let options = options.clone();
            let table = table.clone();

            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        let error = SyncError::Engine(format!("worker pool closed: {}", e));
                        return (index, Outcome::failed(&table, &error));
                    }
                };
                let outcome = dispatcher.sync_table(&table, &options).await;
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<Outcome>> = vec![None; tables.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(join_err) => {
                    tracing::error!("Table task did not complete: {}", join_err);
                }
            }
        }

        let outcomes = slots
            .into_iter()
            .zip(tables)
            .map(|(slot, table)| {
                slot.unwrap_or_else(|| {
                    Outcome::new(table, OutcomeStatus::Failed, "table task did not complete")
                })
            })
            .collect();

        RunSummary {
            outcomes,
            duration: start.elapsed(),
        }
    }

    /// One table's pipeline: connections are opened here and closed on every
    /// path, including a panic inside the pipeline.
    async fn sync_table(&self, table: &str, options: &RunOptions) -> Outcome {
        let mut source = match self.connector.connect(Side::Source).await {
            Ok(conn) => conn,
            Err(e) => return self.fail(table, SyncError::connection(Side::Source, e)),
        };
        let mut destination = match self.connector.connect(Side::Destination).await {
            Ok(conn) => conn,
            Err(e) => {
                close_quietly(source, table, Side::Source).await;
                return self.fail(table, SyncError::connection(Side::Destination, e));
            }
        };

        let result = AssertUnwindSafe(self.run_pipeline(
            table,
            options,
            source.as_mut(),
            destination.as_mut(),
        ))
        .catch_unwind()
        .await;

        close_quietly(source, table, Side::Source).await;
        close_quietly(destination, table, Side::Destination).await;

        match result {
            Ok(Ok(outcome)) => {
                tracing::info!("{}: {}", table, outcome.message);
                outcome
            }
            Ok(Err(error)) => self.fail(table, error),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                self.fail(
                    table,
                    SyncError::Engine(format!("table pipeline panicked: {}", message)),
                )
            }
        }
    }

    fn fail(&self, table: &str, error: SyncError) -> Outcome {
        tracing::error!("{}: {}", table, error);
        Outcome::failed(table, &error)
    }

    async fn run_pipeline(
        &self,
        table: &str,
        options: &RunOptions,
        source: &mut dyn Catalog,
        destination: &mut dyn Catalog,
    ) -> Result<Outcome, SyncError> {
        let request = PlanRequest {
            table,
            watermark_column: &self.config.watermark_column,
            force_full: options.force_full,
            truncate_before_full: options.force_full && options.truncate_before_full,
        };

        let decision = plan_table(&request, &mut *source, &mut *destination, &self.checkpoints)
            .await
            .map_err(SyncError::catalog)?;

        let plan = match decision {
            PlanDecision::Transfer(plan) => plan,
            PlanDecision::NoNewData { current } => {
                tracing::debug!("{}: nothing newer than {}", table, current);
                return Ok(Outcome::no_new_data(table, &current));
            }
            PlanDecision::Skip { reason } => {
                return Ok(Outcome::new(table, OutcomeStatus::Skipped, reason));
            }
        };

        tracing::debug!("{}: {}", table, plan.describe());

        let columns = source.columns(table).await.map_err(SyncError::catalog)?;
        let job = TransferJob::build(
            table,
            &plan,
            &columns,
            &self.config.source,
            &self.config.destination,
        )?;

        let mut warnings = Vec::new();
        let mut truncated = false;
        if plan.truncate_destination {
            match destination.truncate(table).await {
                Ok(()) => {
                    tracing::info!("{}: destination truncated", table);
                    truncated = true;
                }
                Err(e) => {
                    tracing::warn!("{}: truncate failed, continuing: {:#}", table, e);
                    warnings.push(format!("truncate failed: {:#}", e));
                }
            }
        }

        let report = self
            .engine
            .execute(&job)
            .await
            .map_err(|e| SyncError::Engine(format!("{:#}", e)))?;

        if !report.succeeded() {
            let log_path = self.config.error_log_path(table);
            if let Err(e) = write_failure_log(&log_path, &report.log).await {
                tracing::warn!("{}: could not preserve engine log: {:#}", table, e);
            }
            return Err(SyncError::Transfer {
                exit_code: report.exit_code,
                log_path,
                summary: summarize_log(&report.log),
            });
        }

        if let Some(watermark) = &plan.new_watermark {
            self.checkpoints.set(table, watermark).await.map_err(|e| {
                SyncError::Checkpoint(format!(
                    "transfer succeeded but checkpoint commit failed: {:#}",
                    e
                ))
            })?;
        }

        let orphan_report = if !options.detect_deletes {
            OrphanReport::Disabled
        } else if truncated {
            OrphanReport::SkippedAfterTruncate
        } else {
            let mut reconciler =
                Reconciler::new(source, destination, self.config.delete_batch_size);
            match reconciler.reconcile_table(table).await {
                Ok(report) => report,
                Err(e) => {
                    let message = format!("{:#}", e);
                    tracing::warn!("{}: delete detection failed: {}", table, message);
                    warnings.push(format!("delete detection failed: {}", message));
                    OrphanReport::Failed(message)
                }
            }
        };

        let mut message = plan.describe();
        if truncated {
            message.push_str(", destination truncated");
        }
        match &orphan_report {
            OrphanReport::Deleted(n) if *n > 0 => {
                message.push_str(&format!(", deleted {} orphaned rows", n));
            }
            OrphanReport::NoPrimaryKey => message.push_str(", no primary key for delete detection"),
            _ => {}
        }

        Ok(Outcome {
            table: table.to_string(),
            status: OutcomeStatus::Success,
            message,
            rows_deleted: orphan_report.rows_deleted(),
            warnings,
            orphan_report: Some(orphan_report),
            log_artifact: None,
        })
    }
}

async fn close_quietly(conn: Box<dyn Catalog>, table: &str, side: Side) {
    if let Err(e) = conn.close().await {
        tracing::debug!("{}: closing {} connection failed: {:#}", table, side, e);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(table: &str, status: OutcomeStatus, deleted: u64) -> Outcome {
        let mut o = Outcome::new(table, status, "msg");
        o.rows_deleted = deleted;
        o
    }

    #[test]
    fn test_summary_counts() {
        let summary = RunSummary {
            outcomes: vec![
                outcome("a", OutcomeStatus::Success, 3),
                outcome("b", OutcomeStatus::Failed, 0),
                outcome("c", OutcomeStatus::NoNewData, 0),
                outcome("d", OutcomeStatus::Success, 1),
            ],
            duration: Duration::from_millis(1500),
        };
        assert_eq!(summary.count(OutcomeStatus::Success), 2);
        assert!(summary.has_failures());
        assert_eq!(summary.rows_deleted(), 4);
        assert_eq!(summary.outcome("c").map(|o| o.status), Some(OutcomeStatus::NoNewData));
        assert!(summary.to_string().starts_with("4 tables in 1.5s: 2 synced"));
    }

    #[test]
    fn test_failed_outcome_keeps_log_artifact() {
        let error = SyncError::Transfer {
            exit_code: 1,
            log_path: PathBuf::from("error_b.log"),
            summary: "DataXException".to_string(),
        };
        let o = Outcome::failed("b", &error);
        assert_eq!(o.status, OutcomeStatus::Failed);
        assert_eq!(o.log_artifact, Some(PathBuf::from("error_b.log")));
        assert!(o.to_string().contains("error_b.log"));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
