// ABOUTME: Run configuration loaded from TOML with environment overrides for secrets
// ABOUTME: Passed explicitly to the connector, engine, checkpoint store and dispatcher

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub const SOURCE_PASSWORD_ENV: &str = "TABLE_MIRROR_SOURCE_PASSWORD";
pub const DESTINATION_PASSWORD_ENV: &str = "TABLE_MIRROR_DESTINATION_PASSWORD";

/// Connection parameters for one MySQL database.
#[derive(Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    #[serde(default = "default_charset")]
    pub charset: String,
}

impl Endpoint {
    /// JDBC URL in the shape the DataX MySQL plugins expect.
    pub fn jdbc_url(&self) -> String {
        format!(
            "jdbc:mysql://{}:{}/{}?useUnicode=true&characterEncoding={}",
            self.host, self.port, self.database, self.charset
        )
    }
}

// Password is never printed
impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .field("charset", &self.charset)
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

/// How the external DataX transfer engine is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub datax_path: PathBuf,
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_channel")]
    pub channel: u32,
    /// Kill the engine after this many seconds; 0 disables the timeout.
    #[serde(default)]
    pub timeout_secs: u64,
}

/// Complete configuration for a sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub source: Endpoint,
    pub destination: Endpoint,
    pub engine: EngineConfig,
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_watermark_column")]
    pub watermark_column: String,
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: usize,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
}

impl SyncConfig {
    /// Load configuration from a TOML file, then apply password overrides
    /// from the environment.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let mut config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Invalid configuration")
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(password) = std::env::var(SOURCE_PASSWORD_ENV) {
            self.source.password = password;
        }
        if let Ok(password) = std::env::var(DESTINATION_PASSWORD_ENV) {
            self.destination.password = password;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.database.trim().is_empty() {
            bail!("source.database cannot be empty");
        }
        if self.destination.database.trim().is_empty() {
            bail!("destination.database cannot be empty");
        }
        if self.watermark_column.trim().is_empty() {
            bail!("watermark_column cannot be empty");
        }
        if self.max_workers == 0 {
            bail!("max_workers must be at least 1");
        }
        if self.delete_batch_size == 0 {
            bail!("delete_batch_size must be at least 1");
        }
        crate::utils::validate_source_destination_different(&self.source, &self.destination)?;
        Ok(())
    }

    /// Per-table failure artifact holding the full engine output.
    pub fn error_log_path(&self, table: &str) -> PathBuf {
        self.log_dir
            .join(format!("error_{}.log", crate::utils::file_safe_name(table)))
    }
}

/// Operator-facing parameters for a single run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub tables: Option<Vec<String>>,
    pub exclude: Vec<String>,
    pub force_full: bool,
    pub detect_deletes: bool,
    /// Only honoured together with `force_full`.
    pub truncate_before_full: bool,
    pub max_workers: Option<usize>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            tables: None,
            exclude: Vec::new(),
            force_full: false,
            detect_deletes: true,
            truncate_before_full: false,
            max_workers: None,
        }
    }
}

fn default_port() -> u16 {
    3306
}

fn default_charset() -> String {
    "utf8".to_string()
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_channel() -> u32 {
    5
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("checkpoint.json")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_workers() -> usize {
    8
}

fn default_watermark_column() -> String {
    "editTime".to_string()
}

fn default_delete_batch_size() -> usize {
    1000
}

fn default_connect_retries() -> u32 {
    2
}
