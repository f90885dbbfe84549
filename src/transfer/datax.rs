// ABOUTME: DataX-backed transfer engine
// ABOUTME: Renders mysqlreader/mysqlwriter job documents and runs datax.py per table

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::{TransferEngine, TransferJob, TransferReport};
use crate::config::EngineConfig;
use crate::utils::{check_engine_tools, file_safe_name};

/// Render the DataX job document for one table.
///
/// The reader takes a list of JDBC URLs and the writer a single one, which
/// is the shape the MySQL plugins expect.
pub fn render_datax_job(job: &TransferJob, channel: u32) -> Value {
    json!({
        "job": {
            "content": [{
                "reader": {
                    "name": "mysqlreader",
                    "parameter": {
                        "username": job.source.user,
                        "password": job.source.password,
                        "column": job.columns,
                        "connection": [{
                            "jdbcUrl": [job.source.jdbc_url()],
                            "table": [job.table],
                        }],
                        "where": job.where_clause,
                    }
                },
                "writer": {
                    "name": "mysqlwriter",
                    "parameter": {
                        "username": job.destination.user,
                        "password": job.destination.password,
                        "writeMode": job.write_mode.as_str(),
                        "column": job.columns,
                        "connection": [{
                            "jdbcUrl": format!(
                                "{}&rewriteBatchedStatements=true",
                                job.destination.jdbc_url()
                            ),
                            "table": [job.table],
                        }],
                    }
                }
            }],
            "setting": {
                "speed": { "channel": channel }
            }
        }
    })
}

/// How long to keep reading output after the engine exits. Grandchildren
/// that inherited the pipes can hold them open past that point.
const OUTPUT_GRACE: Duration = Duration::from_secs(5);

type OutputBuffer = Arc<Mutex<Vec<u8>>>;

/// Copy everything `pipe` produces into a shared buffer, so a partial log
/// survives even if the reader is aborted.
fn capture<R>(pipe: Option<R>) -> (OutputBuffer, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer = OutputBuffer::default();
    let sink = buffer.clone();
    let handle = tokio::spawn(async move {
        let Some(mut pipe) = pipe else {
            return;
        };
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .extend_from_slice(&chunk[..n]),
            }
        }
    });
    (buffer, handle)
}

fn take_output(buffer: &OutputBuffer) -> Vec<u8> {
    std::mem::take(&mut *buffer.lock().unwrap_or_else(|e| e.into_inner()))
}

/// stdout followed by stderr, as one log.
fn merge_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut log = String::from_utf8_lossy(stdout).into_owned();
    let stderr = String::from_utf8_lossy(stderr);
    if !stderr.is_empty() {
        if !log.is_empty() && !log.ends_with('\n') {
            log.push('\n');
        }
        log.push_str(&stderr);
    }
    log
}

/// Runs `python datax.py <job.json>` for each transfer.
pub struct DataxEngine {
    python: String,
    datax_path: PathBuf,
    channel: u32,
    timeout: Option<Duration>,
}

impl DataxEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            python: config.python.clone(),
            datax_path: config.datax_path.clone(),
            channel: config.channel.max(1),
            timeout: (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs)),
        }
    }

    /// Job documents hold credentials, so they live in a temp file that is
    /// removed when the transfer ends.
    fn write_job_file(&self, job: &TransferJob) -> Result<tempfile::NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix(&format!("tmp_job_{}_", file_safe_name(&job.table)))
            .suffix(".json")
            .tempfile()
            .context("Failed to create DataX job file")?;

        serde_json::to_writer(&mut file, &render_datax_job(job, self.channel))
            .context("Failed to serialize DataX job")?;
        file.flush().context("Failed to flush DataX job file")?;

        Ok(file)
    }
}

#[async_trait]
impl TransferEngine for DataxEngine {
    async fn execute(&self, job: &TransferJob) -> Result<TransferReport> {
        let job_file = self.write_job_file(job)?;

        tracing::debug!(
            "Running {} {:?} {:?} for {}",
            self.python,
            self.datax_path,
            job_file.path(),
            job.table
        );

        let mut child = Command::new(&self.python)
            .arg(&self.datax_path)
            .arg(job_file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to launch DataX for {}", job.table))?;

        let (stdout, stdout_reader) = capture(child.stdout.take());
        let (stderr, stderr_reader) = capture(child.stderr.take());

        let status = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
            None => Some(child.wait().await),
        };

        let (exit_code, timeout_line) = match status {
            Some(status) => {
                let status = status
                    .with_context(|| format!("Failed to wait for DataX for {}", job.table))?;
                (status.code().unwrap_or(-1), None)
            }
            None => {
                let secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
                tracing::warn!("DataX for {} exceeded {}s and was killed", job.table, secs);
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill DataX for {}: {}", job.table, e);
                }
                (
                    -1,
                    Some(format!(
                        "Error: transfer timed out after {}s and was killed",
                        secs
                    )),
                )
            }
        };

        for mut reader in [stdout_reader, stderr_reader] {
            if tokio::time::timeout(OUTPUT_GRACE, &mut reader).await.is_err() {
                reader.abort();
            }
        }

        let mut log = merge_output(&take_output(&stdout), &take_output(&stderr));
        if let Some(line) = timeout_line {
            if !log.is_empty() && !log.ends_with('\n') {
                log.push('\n');
            }
            log.push_str(&line);
        }

        Ok(TransferReport { exit_code, log })
    }

    async fn check_available(&self) -> Result<()> {
        check_engine_tools(&self.python, &self.datax_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Endpoint;
    use crate::planner::Predicate;
    use crate::transfer::WriteMode;

    fn endpoint(host: &str, db: &str) -> Endpoint {
        Endpoint {
            host: host.to_string(),
            port: 3306,
            user: "sync".to_string(),
            password: "pw".to_string(),
            database: db.to_string(),
            charset: "utf8".to_string(),
        }
    }

    fn job() -> TransferJob {
        TransferJob {
            table: "orders".to_string(),
            source: endpoint("10.0.0.5", "plm"),
            destination: endpoint("localhost", "plm_copy"),
            column_names: vec!["id".to_string(), "editTime".to_string()],
            columns: vec!["`id`".to_string(), "`editTime`".to_string()],
            predicate: Predicate::All,
            where_clause: "1=1".to_string(),
            write_mode: WriteMode::Replace,
        }
    }

    #[test]
    fn test_render_reader_and_writer() {
        let doc = render_datax_job(&job(), 5);
        let content = &doc["job"]["content"][0];

        let reader = &content["reader"];
        assert_eq!(reader["name"], "mysqlreader");
        assert_eq!(reader["parameter"]["where"], "1=1");
        assert_eq!(reader["parameter"]["column"][1], "`editTime`");
        assert_eq!(
            reader["parameter"]["connection"][0]["jdbcUrl"][0],
            "jdbc:mysql://10.0.0.5:3306/plm?useUnicode=true&characterEncoding=utf8"
        );
        assert_eq!(reader["parameter"]["connection"][0]["table"][0], "orders");

        let writer = &content["writer"];
        assert_eq!(writer["name"], "mysqlwriter");
        assert_eq!(writer["parameter"]["writeMode"], "replace");
        assert_eq!(
            writer["parameter"]["connection"][0]["jdbcUrl"],
            "jdbc:mysql://localhost:3306/plm_copy?useUnicode=true&characterEncoding=utf8&rewriteBatchedStatements=true"
        );

        assert_eq!(doc["job"]["setting"]["speed"]["channel"], 5);
    }

    #[test]
    fn test_job_file_is_removed_on_drop() {
        let engine = DataxEngine::new(&EngineConfig {
            datax_path: PathBuf::from("/opt/datax/bin/datax.py"),
            python: "python3".to_string(),
            channel: 3,
            timeout_secs: 0,
        });
        let file = engine.write_job_file(&job()).unwrap();
        let path = file.path().to_path_buf();
        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["job"]["setting"]["speed"]["channel"], 3);

        drop(file);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_launcher_is_unavailable() {
        let engine = DataxEngine::new(&EngineConfig {
            datax_path: PathBuf::from("/nonexistent/datax.py"),
            python: "python3".to_string(),
            channel: 5,
            timeout_secs: 0,
        });
        let err = engine.check_available().await.unwrap_err();
        assert!(err.to_string().contains("DataX launcher"));
    }

    /// Engine that runs `sh <script> <job.json>` instead of DataX.
    fn script_engine(dir: &tempfile::TempDir, script: &str, timeout_secs: u64) -> DataxEngine {
        let path = dir.path().join("fake_datax.sh");
        std::fs::write(&path, script).unwrap();
        DataxEngine::new(&EngineConfig {
            datax_path: path,
            python: "sh".to_string(),
            channel: 1,
            timeout_secs,
        })
    }

    #[tokio::test]
    async fn test_execute_reports_exit_code_and_merged_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = script_engine(
            &dir,
            "test -f \"$1\" || exit 9\necho 'reading orders'\necho 'java.sql.SQLException: boom' >&2\nexit 3\n",
            0,
        );

        let report = engine.execute(&job()).await.unwrap();
        assert_eq!(report.exit_code, 3);
        assert!(!report.succeeded());
        let stdout_at = report.log.find("reading orders").unwrap();
        let stderr_at = report.log.find("SQLException: boom").unwrap();
        assert!(stdout_at < stderr_at);
    }

    #[tokio::test]
    async fn test_execute_success() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = script_engine(&dir, "echo 'records written: 3'\n", 0);

        let report = engine.execute(&job()).await.unwrap();
        assert!(report.succeeded());
        assert!(report.log.contains("records written: 3"));
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = script_engine(&dir, "echo 'stuck at split 4'\nexec sleep 30\n", 1);

        let started = std::time::Instant::now();
        let report = engine.execute(&job()).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(20));

        assert_eq!(report.exit_code, -1);
        let partial_at = report.log.find("stuck at split 4").unwrap();
        let timeout_at = report.log.find("timed out after 1s").unwrap();
        assert!(partial_at < timeout_at);
    }

    #[test]
    fn test_merge_output_separates_streams() {
        assert_eq!(merge_output(b"out", b"err\n"), "out\nerr\n");
        assert_eq!(merge_output(b"out\n", b""), "out\n");
        assert_eq!(merge_output(b"", b"err"), "err");
    }
}
