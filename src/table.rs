use std::io::Read;
use std::path::Path;

use anyhow::Context;
use csv::{ReaderBuilder, Trim};
use tracing::{debug, warn};

use crate::config::ColumnConfig;
use crate::error::AnalysisError;
use crate::models::InterventionRecord;
use crate::period::parse_timestamp;

/// The source spreadsheet as loaded: trimmed headers plus one string per
/// cell, every row padded or cut to the header width.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Positions of the columns the pipeline reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnIndex {
    pub operator: usize,
    pub timestamp: usize,
    pub value: Option<usize>,
    pub category: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedRecords {
    pub records: Vec<InterventionRecord>,
    pub invalid_timestamps: usize,
    pub blank_operators: usize,
}

impl RawTable {
    pub fn from_path(path: &Path, delimiter: u8) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Self::from_reader(file, delimiter).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> anyhow::Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = reader
            .headers()
            .context("failed to read header row")?
            .iter()
            .map(|header| header.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for (position, result) in reader.records().enumerate() {
            // +2: one for the header, one for 1-based line numbers.
            let record = result.with_context(|| format!("failed to read line {}", position + 2))?;
            let mut cells: Vec<String> = record.iter().map(str::to_string).collect();
            if cells.len() > headers.len() {
                warn!(
                    line = position + 2,
                    cells = cells.len(),
                    columns = headers.len(),
                    "cells past the last header dropped"
                );
            }
            cells.resize(headers.len(), String::new());
            rows.push(cells);
        }

        debug!(columns = headers.len(), rows = rows.len(), "table loaded");
        Ok(Self { headers, rows })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    pub fn missing_columns<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut missing: Vec<String> = Vec::new();
        for name in names {
            if self.column_index(name).is_none() && !missing.iter().any(|seen| seen == name) {
                missing.push(name.to_string());
            }
        }
        missing
    }

    /// Locates the operator and timestamp columns, plus every column in
    /// `columns.required` when `strict` is set. Every absent name is
    /// reported at once.
    pub fn resolve_columns(&self, columns: &ColumnConfig, strict: bool) -> Result<ColumnIndex, AnalysisError> {
        let mut wanted: Vec<&str> = vec![columns.operator.as_str(), columns.timestamp.as_str()];
        if strict {
            wanted.extend(columns.required.iter().map(String::as_str));
        }

        let missing = self.missing_columns(wanted);
        if !missing.is_empty() {
            return Err(AnalysisError::MissingColumns(missing));
        }

        Ok(ColumnIndex {
            operator: self.column_index(&columns.operator).unwrap_or_default(),
            timestamp: self.column_index(&columns.timestamp).unwrap_or_default(),
            value: columns.value.as_deref().and_then(|name| self.column_index(name)),
            category: columns.category.as_deref().and_then(|name| self.column_index(name)),
        })
    }

    pub fn to_records(&self, index: &ColumnIndex) -> LoadedRecords {
        let mut loaded = LoadedRecords::default();

        for (row, cells) in self.rows.iter().enumerate() {
            let operator = cells.get(index.operator).map(|cell| cell.trim()).unwrap_or_default();
            if operator.is_empty() {
                loaded.blank_operators += 1;
                continue;
            }

            let timestamp = cells.get(index.timestamp).and_then(|cell| parse_timestamp(cell));
            if timestamp.is_none() {
                loaded.invalid_timestamps += 1;
            }

            loaded.records.push(InterventionRecord {
                row,
                operator: operator.to_string(),
                timestamp,
                fields: cells.clone(),
            });
        }

        if loaded.invalid_timestamps > 0 {
            warn!(
                skipped = loaded.invalid_timestamps,
                "rows with an unreadable timestamp are left out of period views"
            );
        }
        if loaded.blank_operators > 0 {
            warn!(skipped = loaded.blank_operators, "rows without an operator name skipped");
        }

        loaded
    }
}
