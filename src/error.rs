// ABOUTME: Typed error taxonomy for table sync pipelines
// ABOUTME: Classifies collaborator failures into the outcomes reported per table

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which database a connection or query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Source,
    Destination,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => f.write_str("source"),
            Side::Destination => f.write_str("destination"),
        }
    }
}

/// Errors that end a table's pipeline (or, for `Precondition`, the whole run).
///
/// Collaborators return `anyhow::Result`; the dispatcher wraps those errors
/// here, keeping the full context chain in the message.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Cannot open the source or destination connection.
    #[error("cannot connect to {side} database: {message}")]
    Connection { side: Side, message: String },

    /// An introspection or probe query failed.
    #[error("catalog query failed: {0}")]
    Catalog(String),

    /// The transfer job could not be described.
    #[error("cannot build transfer job for {table}: {reason}")]
    DescriptorBuild { table: String, reason: String },

    /// The transfer engine could not be launched or exited non-zero.
    #[error("transfer failed (exit code {exit_code}, log: {}): {summary}", .log_path.display())]
    Transfer {
        exit_code: i32,
        log_path: PathBuf,
        summary: String,
    },

    /// The transfer engine could not be started at all.
    #[error("transfer engine error: {0}")]
    Engine(String),

    /// Durable checkpoint state could not be written.
    #[error("checkpoint store error: {0}")]
    Checkpoint(String),

    /// A run-level precondition failed before any table pipeline started.
    #[error("precondition failed: {0}")]
    Precondition(String),
}

impl SyncError {
    pub fn connection(side: Side, err: anyhow::Error) -> Self {
        SyncError::Connection {
            side,
            message: format!("{:#}", err),
        }
    }

    pub fn catalog(err: anyhow::Error) -> Self {
        SyncError::Catalog(format!("{:#}", err))
    }

    /// Path of the preserved engine log, when this is a transfer failure.
    pub fn log_artifact(&self) -> Option<&PathBuf> {
        match self {
            SyncError::Transfer { log_path, .. } => Some(log_path),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_connection_error_keeps_context_chain() {
        let err: anyhow::Result<()> = Err(anyhow::anyhow!("connection refused"));
        let err = err.context("Failed to open source connection").unwrap_err();
        let sync_err = SyncError::connection(Side::Source, err);
        let message = sync_err.to_string();
        assert!(message.contains("source"));
        assert!(message.contains("Failed to open source connection"));
        assert!(message.contains("connection refused"));
    }

    #[test]
    fn test_log_artifact_only_for_transfer_errors() {
        let transfer = SyncError::Transfer {
            exit_code: 1,
            log_path: PathBuf::from("error_orders.log"),
            summary: "boom".to_string(),
        };
        assert_eq!(
            transfer.log_artifact(),
            Some(&PathBuf::from("error_orders.log"))
        );
        assert!(SyncError::Catalog("x".to_string()).log_artifact().is_none());
    }
}
