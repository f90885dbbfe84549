// ABOUTME: CheckpointStore - durable per-table watermark for incremental sync
// ABOUTME: Serialized read-modify-write with atomic file replacement

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

use crate::watermark::Watermark;

/// Durable mapping of table name to its last successfully mirrored watermark.
///
/// The whole record set lives in one JSON object. Every [`set`](Self::set)
/// rewrites the full set inside a process-wide critical section, so updates
/// from concurrently finishing tables never overwrite each other. Writes go
/// to a temporary file in the same directory which is then renamed over the
/// checkpoint file, so readers see either the old or the new set, never a
/// partial one.
///
/// A missing or corrupt file reads as "no checkpoints": every table falls
/// back to its full-history default instead of failing the run.
pub struct CheckpointStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CheckpointStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last committed watermark for `table`, if any.
    pub async fn get(&self, table: &str) -> Option<Watermark> {
        self.load_all().await.remove(table)
    }

    /// All committed watermarks. Never fails: unreadable state is empty state.
    pub async fn load_all(&self) -> BTreeMap<String, Watermark> {
        match self.read_records().await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(
                    "Ignoring unreadable checkpoint file {:?}, treating all tables as never synced: {:#}",
                    self.path,
                    e
                );
                BTreeMap::new()
            }
        }
    }

    /// Commit a new watermark for `table`.
    ///
    /// Watermarks never move backwards: if the stored value is already later
    /// than `watermark`, it is kept and the call still succeeds.
    pub async fn set(&self, table: &str, watermark: &Watermark) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut records = self.load_all().await;
        match records.get(table) {
            Some(existing) if existing > watermark => {
                tracing::warn!(
                    "Not moving checkpoint for {} backwards ({} -> {}), keeping {}",
                    table,
                    existing,
                    watermark,
                    existing
                );
                return Ok(());
            }
            _ => {}
        }
        records.insert(table.to_string(), watermark.clone());

        self.persist(&records).await?;
        tracing::debug!("Checkpoint for {} set to {}", table, watermark);
        Ok(())
    }

    async fn read_records(&self) -> Result<BTreeMap<String, Watermark>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read checkpoint file {:?}", self.path))?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let records = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse checkpoint file {:?}", self.path))?;
        Ok(records)
    }

    async fn persist(&self, records: &BTreeMap<String, Watermark>) -> Result<()> {
        let contents =
            serde_json::to_string_pretty(records).context("Failed to serialize checkpoints")?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomically(&path, contents.as_bytes()))
            .await
            .context("Checkpoint writer task panicked")?
    }
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)
        .with_context(|| format!("Failed to create directory {:?}", parent))?;

    let mut temp = tempfile::NamedTempFile::new_in(&parent)
        .with_context(|| format!("Failed to create temporary file in {:?}", parent))?;
    temp.write_all(contents)
        .context("Failed to write checkpoint data")?;
    temp.as_file()
        .sync_all()
        .context("Failed to sync checkpoint data")?;
    temp.persist(path)
        .with_context(|| format!("Failed to replace checkpoint file {:?}", path))?;
    Ok(())
}
