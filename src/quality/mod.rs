//! Data quality for silver tables: validation rules and the schema contract.

mod contract;
mod validate;

pub use contract::{compute_schema_meta, ColumnMeta, ContractChecks, SchemaMeta, TableMeta};
pub use validate::{validate_silver_dir, IssueLevel, ValidationIssue};

use anyhow::{Context, Result};
use csv::StringRecord;
use std::path::Path;

/// A CSV table read as strings, for checks that must tolerate bad cells.
pub(crate) struct RawTable {
    pub headers: StringRecord,
    pub rows: Vec<StringRecord>,
}

impl RawTable {
    pub fn read(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let headers = reader.headers()?.clone();
        let rows = reader
            .records()
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Self { headers, rows })
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Trimmed cell values of a column; absent cells read as empty.
    pub fn values<'a>(&'a self, idx: usize) -> impl Iterator<Item = &'a str> + 'a {
        self.rows.iter().map(move |r| r.get(idx).unwrap_or("").trim())
    }
}
