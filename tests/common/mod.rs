// ABOUTME: Shared fixtures for dispatcher integration tests
// ABOUTME: In-memory transfer engine that copies rows between MemoryDatabases

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use table_mirror::catalog::{MemoryConnector, MemoryDatabase, MemoryTable};
use table_mirror::planner::Predicate;
use table_mirror::transfer::{TransferEngine, TransferJob, TransferReport};
use table_mirror::watermark::Watermark;
use table_mirror::{CheckpointStore, SyncConfig, TableDispatcher};

/// Copies rows selected by the job's predicate, replacing rows that share
/// a primary key, the way `writeMode: replace` does.
#[derive(Clone, Default)]
pub struct MemoryTransferEngine {
    source: MemoryDatabase,
    destination: MemoryDatabase,
    failing: Arc<Mutex<HashSet<String>>>,
    launch_failures: Arc<Mutex<HashSet<String>>>,
    panicking: Arc<Mutex<HashSet<String>>>,
    delay: Option<Duration>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    executed: Arc<Mutex<Vec<TransferJob>>>,
}

impl MemoryTransferEngine {
    pub fn new(source: MemoryDatabase, destination: MemoryDatabase) -> Self {
        Self {
            source,
            destination,
            ..Default::default()
        }
    }

    /// Hold each transfer open for `delay` so overlapping runs are visible.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Exit non-zero for `table`.
    pub fn fail_on(&self, table: &str) {
        self.failing.lock().unwrap().insert(table.to_string());
    }

    /// Refuse to launch for `table`.
    pub fn refuse_launch_on(&self, table: &str) {
        self.launch_failures.lock().unwrap().insert(table.to_string());
    }

    pub fn panic_on(&self, table: &str) {
        self.panicking.lock().unwrap().insert(table.to_string());
    }

    /// Highest number of transfers observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<TransferJob> {
        self.executed.lock().unwrap().clone()
    }

    fn copy_rows(&self, job: &TransferJob) -> Result<usize> {
        let Some(source) = self.source.table(&job.table) else {
            bail!("Table '{}' doesn't exist in source", job.table);
        };

        let selected: Vec<Vec<Option<String>>> = source
            .rows
            .iter()
            .filter(|row| match &job.predicate {
                Predicate::All => true,
                Predicate::Window { column, .. } => job
                    .predicate
                    .matches(source.value(row, column).map(Watermark::from).as_ref()),
            })
            .map(|row| {
                job.column_names
                    .iter()
                    .map(|c| source.value(row, c).map(str::to_string))
                    .collect()
            })
            .collect();

        let copied = selected.len();
        let written = self.destination.with_table(&job.table, |dest| {
            for values in selected {
                let row = dest
                    .columns
                    .iter()
                    .map(|c| {
                        job.column_names
                            .iter()
                            .position(|name| name == c)
                            .and_then(|i| values[i].clone())
                    })
                    .collect();
                dest.replace_row(row);
            }
        });
        if written.is_none() {
            bail!("Table '{}' doesn't exist in destination", job.table);
        }
        Ok(copied)
    }
}

#[async_trait]
impl TransferEngine for MemoryTransferEngine {
    async fn execute(&self, job: &TransferJob) -> Result<TransferReport> {
        self.executed.lock().unwrap().push(job.clone());

        if self.launch_failures.lock().unwrap().contains(&job.table) {
            bail!("simulated launch failure for {}", job.table);
        }
        if self.panicking.lock().unwrap().contains(&job.table) {
            panic!("simulated engine panic for {}", job.table);
        }

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(&job.table) {
            return Ok(TransferReport {
                exit_code: 1,
                log: format!(
                    "DataX starting\n\
                     reading {}\n\
                     com.alibaba.datax.common.exception.DataXException: Code:[DBUtilErrorCode-07]\n\
                     job failed\n",
                    job.table
                ),
            });
        }

        match self.copy_rows(job) {
            Ok(n) => Ok(TransferReport {
                exit_code: 0,
                log: format!("{} records written", n),
            }),
            Err(e) => Ok(TransferReport {
                exit_code: 1,
                log: format!("Error: {:#}", e),
            }),
        }
    }

    async fn check_available(&self) -> Result<()> {
        Ok(())
    }
}

pub fn config(dir: &Path) -> SyncConfig {
    let mut config = SyncConfig::from_toml(
        r#"
        [source]
        host = "source.test"
        user = "sync"
        database = "plm"

        [destination]
        host = "destination.test"
        user = "sync"
        database = "plm_copy"

        [engine]
        datax_path = "/opt/datax/bin/datax.py"
        "#,
    )
    .unwrap();
    config.checkpoint_path = dir.join("checkpoint.json");
    config.log_dir = dir.join("logs");
    config
}

/// Columns: `id` (primary key), `name`, `editTime`.
pub fn orders() -> MemoryTable {
    MemoryTable::new(&["id", "name", "editTime"], &["id"])
}

pub fn row<'a>(id: &'a str, name: &'a str, edit_time: &'a str) -> [Option<&'a str>; 3] {
    [Some(id), Some(name), Some(edit_time)]
}

pub struct Harness {
    pub source: MemoryDatabase,
    pub destination: MemoryDatabase,
    pub connector: Arc<MemoryConnector>,
    pub engine: Arc<MemoryTransferEngine>,
    pub checkpoints: Arc<CheckpointStore>,
    pub config: Arc<SyncConfig>,
}

impl Harness {
    pub fn new(config: SyncConfig) -> Self {
        Self::with_engine(config, |engine| engine)
    }

    pub fn with_engine(
        config: SyncConfig,
        customize: impl FnOnce(MemoryTransferEngine) -> MemoryTransferEngine,
    ) -> Self {
        let source = MemoryDatabase::new();
        let destination = MemoryDatabase::new();
        let engine = customize(MemoryTransferEngine::new(
            source.clone(),
            destination.clone(),
        ));
        Self {
            connector: Arc::new(MemoryConnector::new(source.clone(), destination.clone())),
            engine: Arc::new(engine),
            checkpoints: Arc::new(CheckpointStore::new(&config.checkpoint_path)),
            config: Arc::new(config),
            source,
            destination,
        }
    }

    pub fn dispatcher(&self) -> TableDispatcher {
        TableDispatcher::new(
            self.connector.clone(),
            self.engine.clone(),
            self.checkpoints.clone(),
            self.config.clone(),
        )
    }
}

pub fn tables(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
