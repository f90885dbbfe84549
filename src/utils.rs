// ABOUTME: Utility functions for query fragments, tool checks and retries
// ABOUTME: Provides MySQL quoting, display sanitizing, and connection retry logic

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use which::which;

use crate::config::Endpoint;

/// Check that the external tools needed to run the transfer engine exist
///
/// Verifies that the interpreter is on `PATH` (or is an existing path) and
/// that the DataX launcher script exists.
///
/// # Errors
///
/// Returns an error naming every missing piece, with installation hints.
pub fn check_engine_tools(python: &str, datax_path: &Path) -> Result<()> {
    let mut missing = Vec::new();

    if which(python).is_err() && !Path::new(python).is_file() {
        missing.push(format!("interpreter '{}'", python));
    }
    if !datax_path.is_file() {
        missing.push(format!("DataX launcher {:?}", datax_path));
    }

    if !missing.is_empty() {
        bail!(
            "Missing transfer engine components: {}\n\
             \n\
             Install DataX (https://github.com/alibaba/DataX) and point\n\
             engine.datax_path at bin/datax.py in the configuration file.",
            missing.join(", ")
        );
    }

    Ok(())
}

/// Retry a function with exponential backoff
///
/// Executes an async operation with automatic retry on failure. Each retry doubles
/// the delay (exponential backoff) to handle transient failures gracefully.
///
/// # Arguments
///
/// * `operation` - Async function to retry (FnMut returning Future\<Output = Result\<T\>\>)
/// * `max_retries` - Maximum number of retry attempts (0 = no retries, just initial attempt)
/// * `initial_delay` - Delay before first retry (doubles each subsequent retry)
///
/// # Returns
///
/// Returns the successful result or the last error after all retries exhausted.
///
/// # Examples
///
/// ```no_run
/// # use anyhow::Result;
/// # use std::time::Duration;
/// # use table_mirror::utils::retry_with_backoff;
/// # async fn example() -> Result<()> {
/// let result = retry_with_backoff(
///     || async { Ok("success") },
///     3,  // Try up to 3 times
///     Duration::from_secs(1)  // Start with 1s delay
/// ).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T>(
    mut operation: F,
    max_retries: u32,
    initial_delay: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = initial_delay;
    let mut last_error = None;

    for attempt in 0..=max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                last_error = Some(e);

                if attempt < max_retries {
                    tracing::warn!(
                        "Operation failed (attempt {}/{}), retrying in {:?}...",
                        attempt + 1,
                        max_retries + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Operation failed after retries")))
}

/// Sanitize an identifier (table name, column name) for display
///
/// Removes control characters and limits length to prevent log injection and
/// keep messages readable. This is for display only; SQL always goes through
/// [`quote_mysql_ident`] or bound parameters.
///
/// # Examples
///
/// ```
/// # use table_mirror::utils::sanitize_identifier;
/// assert_eq!(sanitize_identifier("normal_table"), "normal_table");
/// assert_eq!(sanitize_identifier("table\nname"), "tablename");
/// ```
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Turn a table name into something safe to embed in a file name
///
/// Path separators and other unusual characters become underscores. A name
/// that had to be rewritten gets a short hash suffix, so `a b` and `a_b`
/// never share a file.
///
/// # Examples
///
/// ```
/// # use table_mirror::utils::file_safe_name;
/// assert_eq!(file_safe_name("orders"), "orders");
/// assert!(file_safe_name("../etc/passwd").starts_with("___etc_passwd_"));
/// ```
pub fn file_safe_name(table: &str) -> String {
    let safe: String = table
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if safe == table {
        return safe;
    }

    let digest = Sha256::digest(table.as_bytes());
    let suffix: String = digest[..4].iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}_{}", safe, suffix)
}

/// Validates that source and destination are different databases
///
/// Compares host (case-insensitively, with loopback spellings treated as
/// one), port and database name. Mirroring a database onto itself would let
/// truncation and orphan cleanup destroy the source.
///
/// # Errors
///
/// Returns an error when both endpoints name the same database.
pub fn validate_source_destination_different(
    source: &Endpoint,
    destination: &Endpoint,
) -> Result<()> {
    if normalize_host(&source.host) == normalize_host(&destination.host)
        && source.port == destination.port
        && source.database.eq_ignore_ascii_case(&destination.database)
    {
        bail!(
            "Source and destination point to the same database!\n\
             \n\
             This would cause DATA LOSS - truncation and delete detection would\n\
             remove rows from the source.\n\
             \n\
             Source:      {}\n\
             Destination: {}\n\
             \n\
             Please ensure source and destination are different databases.",
            source,
            destination
        );
    }
    Ok(())
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().to_ascii_lowercase();
    match host.as_str() {
        "127.0.0.1" | "::1" | "[::1]" => "localhost".to_string(),
        _ => host,
    }
}

/// Quote a MySQL identifier (database, table, column)
///
/// MySQL uses backticks for identifier quoting. Escapes embedded backticks
/// by doubling them, so reserved words such as `KEY` or `CONDITION` and
/// names with special characters are never ambiguous.
///
/// # Examples
///
/// ```
/// use table_mirror::utils::quote_mysql_ident;
/// assert_eq!(quote_mysql_ident("users"), "`users`");
/// assert_eq!(quote_mysql_ident("user`name"), "`user``name`");
/// ```
pub fn quote_mysql_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('`');
    for ch in identifier.chars() {
        if ch == '`' {
            quoted.push('`');
        }
        quoted.push(ch);
    }
    quoted.push('`');
    quoted
}

/// Quote a MySQL string literal
///
/// Doubles single quotes and backslashes (MySQL treats backslash as an escape
/// character unless `NO_BACKSLASH_ESCAPES` is set) and wraps the value in
/// single quotes.
///
/// # Examples
///
/// ```
/// use table_mirror::utils::quote_mysql_literal;
/// assert_eq!(quote_mysql_literal("2024-01-01 00:00:00"), "'2024-01-01 00:00:00'");
/// assert_eq!(quote_mysql_literal("it's"), "'it''s'");
/// assert_eq!(quote_mysql_literal(r"a\b"), r"'a\\b'");
/// ```
pub fn quote_mysql_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => quoted.push_str("''"),
            '\\' => quoted.push_str("\\\\"),
            _ => quoted.push(ch),
        }
    }
    quoted.push('\'');
    quoted
}
