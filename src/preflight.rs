// ABOUTME: Pre-flight validation checks run before any table pipeline starts
// ABOUTME: Verifies the transfer engine, the log directory and source table enumeration

use crate::catalog::Connector;
use crate::config::SyncConfig;
use crate::error::{Side, SyncError};
use crate::transfer::TransferEngine;

/// Individual check result
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: message.into(),
            details: None,
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Issue with suggested fixes
#[derive(Debug, Clone)]
pub struct PreflightIssue {
    pub title: String,
    pub explanation: String,
    pub fixes: Vec<String>,
}

/// Complete pre-flight results
#[derive(Debug, Default)]
pub struct PreflightResult {
    pub local_env: Vec<CheckResult>,
    pub source: Vec<CheckResult>,
    pub issues: Vec<PreflightIssue>,
    /// Base tables found in the source schema, when enumeration succeeded.
    pub source_tables: Option<Vec<String>>,
}

impl PreflightResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all_passed(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn failed_count(&self) -> usize {
        self.issues.len()
    }

    /// Collapse into the run-level error used to abort before dispatch.
    pub fn into_tables(self) -> Result<Vec<String>, SyncError> {
        if !self.all_passed() {
            let titles: Vec<&str> = self.issues.iter().map(|i| i.title.as_str()).collect();
            return Err(SyncError::Precondition(titles.join("; ")));
        }
        self.source_tables
            .ok_or_else(|| SyncError::Precondition("source tables were not enumerated".into()))
    }

    /// Print formatted output
    pub fn print(&self) {
        println!();
        println!("Pre-flight Checks");
        println!("{}", "═".repeat(61));
        println!();

        print_section("Local Environment:", &self.local_env);
        print_section("Source Database:", &self.source);

        println!("{}", "═".repeat(61));
        if self.all_passed() {
            println!("PASSED: All pre-flight checks successful");
        } else {
            println!("FAILED: {} issue(s) must be resolved", self.failed_count());
            println!();
            for (i, issue) in self.issues.iter().enumerate() {
                println!("Issue {}: {}", i + 1, issue.title);
                println!("  {}", issue.explanation);
                println!();
                println!("  Fix options:");
                for fix in &issue.fixes {
                    println!("    • {}", fix);
                }
                println!();
            }
        }
    }
}

fn print_section(title: &str, checks: &[CheckResult]) {
    if checks.is_empty() {
        return;
    }
    println!("{}", title);
    for check in checks {
        let icon = if check.passed { "✓" } else { "✗" };
        println!("  {} {}", icon, check.message);
        if let Some(ref details) = check.details {
            println!("      {}", details);
        }
    }
    println!();
}

/// Run all pre-flight checks
///
/// The source check opens one connection, lists its tables and closes it;
/// the list is kept on the result for table selection.
pub async fn run_preflight_checks(
    config: &SyncConfig,
    engine: &dyn TransferEngine,
    connector: &dyn Connector,
) -> PreflightResult {
    let mut result = PreflightResult::new();

    check_engine(&mut result, config, engine).await;
    check_log_dir(&mut result, config).await;
    check_source(&mut result, config, connector).await;

    result
}

async fn check_engine(result: &mut PreflightResult, config: &SyncConfig, engine: &dyn TransferEngine) {
    match engine.check_available().await {
        Ok(()) => result.local_env.push(CheckResult::pass(
            "engine",
            format!("DataX found at {:?}", config.engine.datax_path),
        )),
        Err(e) => {
            result.local_env.push(
                CheckResult::fail("engine", "Transfer engine not available")
                    .with_details(format!("{:#}", e)),
            );
            result.issues.push(PreflightIssue {
                title: "Transfer engine not available".to_string(),
                explanation: format!("{:#}", e),
                fixes: vec![
                    "Set engine.datax_path to the datax.py launcher".to_string(),
                    format!("Install '{}' or set engine.python", config.engine.python),
                ],
            });
        }
    }
}

async fn check_log_dir(result: &mut PreflightResult, config: &SyncConfig) {
    match tokio::fs::create_dir_all(&config.log_dir).await {
        Ok(()) => result.local_env.push(CheckResult::pass(
            "log_dir",
            format!("Log directory {:?} is usable", config.log_dir),
        )),
        Err(e) => {
            result.local_env.push(
                CheckResult::fail("log_dir", "Log directory cannot be created")
                    .with_details(e.to_string()),
            );
            result.issues.push(PreflightIssue {
                title: "Log directory cannot be created".to_string(),
                explanation: format!("{:?}: {}", config.log_dir, e),
                fixes: vec!["Point log_dir at a writable directory".to_string()],
            });
        }
    }
}

async fn check_source(result: &mut PreflightResult, config: &SyncConfig, connector: &dyn Connector) {
    let listed = match connector.connect(Side::Source).await {
        Ok(mut conn) => {
            let tables = conn.list_tables().await;
            if let Err(e) = conn.close().await {
                tracing::debug!("Closing preflight source connection failed: {:#}", e);
            }
            tables
        }
        Err(e) => Err(e),
    };

    match listed {
        Ok(tables) => {
            result.source.push(CheckResult::pass(
                "source",
                format!("Connected to {} ({} tables)", config.source, tables.len()),
            ));
            result.source_tables = Some(tables);
        }
        Err(e) => {
            result.source.push(
                CheckResult::fail("source", format!("Cannot enumerate tables on {}", config.source))
                    .with_details(format!("{:#}", e)),
            );
            result.issues.push(PreflightIssue {
                title: "Source database unreachable".to_string(),
                explanation: format!("{:#}", e),
                fixes: vec![
                    "Check source.host, source.port and network access".to_string(),
                    format!(
                        "Check the credentials (password can be set via {})",
                        crate::config::SOURCE_PASSWORD_ENV
                    ),
                ],
            });
        }
    }
}
