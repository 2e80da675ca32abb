//! Row sources: pre-materialized tables of stringified rows.
//!
//! Adapters are deliberately dumb — they yield `{column: value}` maps and
//! a column set; the pipeline's ingester owns attribute mapping and id
//! assignment. CSV and JSON-array files are supported, plus in-memory rows
//! for tests and embedding.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde_json::Value;

use crate::{IoError, IoResult};

/// A named table of stringified rows.
#[derive(Clone, Debug, PartialEq)]
pub struct RowSource {
    pub name: String,
    /// Column whose value becomes the record's external id.
    pub primary_key: String,
    rows: Vec<BTreeMap<String, String>>,
}

impl RowSource {
    pub fn from_rows(
        name: impl Into<String>,
        primary_key: impl Into<String>,
        rows: Vec<BTreeMap<String, String>>,
    ) -> Self {
        RowSource { name: name.into(), primary_key: primary_key.into(), rows }
    }

    /// Read a CSV file with a header row; every cell is kept as a string.
    pub fn from_csv_path(
        name: impl Into<String>,
        primary_key: impl Into<String>,
        path: &Path,
    ) -> IoResult<Self> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| IoError::Csv(e.to_string()))?;
        let headers: Vec<String> =
            reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let row: BTreeMap<String, String> = headers
                .iter()
                .cloned()
                .zip(record.iter().map(|v| v.to_string()))
                .collect();
            rows.push(row);
        }
        Ok(RowSource { name: name.into(), primary_key: primary_key.into(), rows })
    }

    /// Read a JSON array of flat objects; scalars are stringified, nulls
    /// become the missing sentinel.
    pub fn from_json_path(
        name: impl Into<String>,
        primary_key: impl Into<String>,
        path: &Path,
    ) -> IoResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(name, primary_key, &text)
    }

    pub fn from_json_str(
        name: impl Into<String>,
        primary_key: impl Into<String>,
        text: &str,
    ) -> IoResult<Self> {
        let values: Vec<BTreeMap<String, Value>> = serde_json::from_str(text)?;
        let rows = values
            .into_iter()
            .map(|row| {
                row.into_iter().map(|(column, value)| (column, stringify(&value))).collect()
            })
            .collect();
        Ok(RowSource { name: name.into(), primary_key: primary_key.into(), rows })
    }

    pub fn rows(&self) -> &[BTreeMap<String, String>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Union of column names across rows.
    pub fn columns(&self) -> BTreeSet<&str> {
        self.rows.iter().flat_map(|r| r.keys().map(String::as_str)).collect()
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
