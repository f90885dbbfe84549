// ABOUTME: Table selection from operator include/exclude lists
// ABOUTME: Validates requested tables against the source and reports unmatched names

use std::collections::HashSet;

use crate::error::SyncError;
use crate::utils::sanitize_identifier;

/// Operator's table include/exclude lists.
#[derive(Debug, Clone, Default)]
pub struct TableSelection {
    include: Option<Vec<String>>,
    exclude: Vec<String>,
}

/// Tables chosen for a run plus anything the operator should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSelection {
    pub tables: Vec<String>,
    pub warnings: Vec<String>,
}

impl TableSelection {
    pub fn new(include: Option<Vec<String>>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    /// Apply the lists to the tables that exist in the source.
    ///
    /// Requested tables keep the operator's order; otherwise the source
    /// order is used. Unknown requested tables and exclusions that match
    /// nothing produce warnings rather than errors.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Precondition`] when no table is left to sync.
    pub fn resolve(&self, source_tables: &[String]) -> Result<ResolvedSelection, SyncError> {
        let existing: HashSet<&str> = source_tables.iter().map(String::as_str).collect();
        let mut warnings = Vec::new();

        let mut tables: Vec<String> = match &self.include {
            Some(requested) => {
                let mut seen = HashSet::new();
                let mut missing = Vec::new();
                let mut valid = Vec::new();
                for table in requested {
                    if !seen.insert(table.as_str()) {
                        continue;
                    }
                    if existing.contains(table.as_str()) {
                        valid.push(table.clone());
                    } else {
                        missing.push(sanitize_identifier(table));
                    }
                }
                if !missing.is_empty() {
                    warnings.push(format!(
                        "Tables not found in source: {}",
                        missing.join(", ")
                    ));
                }
                valid
            }
            None => source_tables.to_vec(),
        };

        if !self.exclude.is_empty() {
            let excluded: HashSet<&str> = self.exclude.iter().map(String::as_str).collect();
            let before = tables.len();
            tables.retain(|t| !excluded.contains(t.as_str()));
            if tables.len() == before {
                warnings.push(format!(
                    "Excluded tables matched nothing: {}",
                    self.exclude
                        .iter()
                        .map(|t| sanitize_identifier(t))
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
            }
        }

        if tables.is_empty() {
            return Err(SyncError::Precondition(
                "no tables left to sync after applying table selection".to_string(),
            ));
        }

        Ok(ResolvedSelection { tables, warnings })
    }
}
