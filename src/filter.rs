use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::AnalysisError;
use crate::models::{InterventionRecord, Roster};
use crate::table::ColumnIndex;

const ALL_SENTINELS: &[&str] = &["total", "all", "tous", "toutes"];

/// Operator or team choice. `All` is what the "Total" sentinel expands to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl Selection {
    /// An empty list or any sentinel value selects everything.
    pub fn from_values(values: &[String]) -> Self {
        let is_sentinel = |value: &str| ALL_SENTINELS.contains(&value.trim().to_lowercase().as_str());
        if values.is_empty() || values.iter().any(|value| is_sentinel(value)) {
            return Selection::All;
        }
        Selection::Only(values.iter().map(|value| value.trim().to_string()).collect())
    }

    pub fn contains(&self, name: &str) -> bool {
        match self {
            Selection::All => true,
            Selection::Only(names) => names.contains(name),
        }
    }

    /// Concrete names this selection stands for, sorted. `All` becomes every
    /// distinct name in `available`; explicit names are kept even when absent
    /// so callers can report them as having no data.
    pub fn expand<'a>(&self, available: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        match self {
            Selection::All => available
                .into_iter()
                .map(str::to_string)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            Selection::Only(names) => names.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ValueRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ValueRange {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Result<Self, AnalysisError> {
        if let (Some(min), Some(max)) = (min, max) {
            if min > max {
                return Err(AnalysisError::InvalidRange { min, max });
            }
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

/// Inclusive date window. Open ends are closed against the data by
/// [`DateWindow::resolve`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DateWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateWindow {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self, AnalysisError> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(AnalysisError::InvalidWindow { start, end });
            }
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |start| date >= start) && self.end.map_or(true, |end| date <= end)
    }

    pub fn includes(&self, record: &InterventionRecord) -> bool {
        record.date().map_or(false, |date| self.contains(date))
    }

    /// Fills open ends with the earliest/latest valid date in `records`.
    /// A filled end never crosses the bound the caller gave: it collapses
    /// onto that bound instead.
    pub fn resolve<'a>(&self, records: impl IntoIterator<Item = &'a InterventionRecord>) -> DateWindow {
        let dates: Vec<NaiveDate> = records.into_iter().filter_map(InterventionRecord::date).collect();
        let earliest = dates.iter().min().copied();
        let latest = dates.iter().max().copied();

        let start = match (self.start, self.end) {
            (Some(start), _) => Some(start),
            (None, Some(end)) => earliest.map(|date| date.min(end)),
            (None, None) => earliest,
        };
        let end = match (self.end, start) {
            (Some(end), _) => Some(end),
            (None, Some(start)) => latest.map(|date| date.max(start)),
            (None, None) => latest,
        };
        DateWindow { start, end }
    }
}

/// Row-level pre-filters applied before grouping. All criteria are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordFilter {
    pub operators: Selection,
    pub teams: Selection,
    pub value_range: Option<ValueRange>,
    pub categories: Option<BTreeSet<String>>,
    pub search: Option<String>,
}

impl RecordFilter {
    pub fn matches(&self, record: &InterventionRecord, roster: &Roster, index: &ColumnIndex) -> bool {
        if !self.operators.contains(&record.operator) {
            return false;
        }
        if !self.teams.contains(roster.team_of(&record.operator)) {
            return false;
        }

        if let Some(range) = &self.value_range {
            let value = index
                .value
                .and_then(|column| record.fields.get(column))
                .and_then(|cell| parse_number(cell));
            if !value.map_or(false, |value| range.contains(value)) {
                return false;
            }
        }

        if let Some(categories) = &self.categories {
            let category = index.category.and_then(|column| record.fields.get(column));
            if !category.map_or(false, |cell| categories.contains(cell.trim())) {
                return false;
            }
        }

        if let Some(needle) = self.search.as_deref().map(str::to_lowercase) {
            if !needle.is_empty()
                && !record
                    .fields
                    .iter()
                    .any(|cell| cell.to_lowercase().contains(&needle))
            {
                return false;
            }
        }

        true
    }

    pub fn apply<'a>(
        &self,
        records: &'a [InterventionRecord],
        roster: &Roster,
        index: &ColumnIndex,
    ) -> Vec<&'a InterventionRecord> {
        records
            .iter()
            .filter(|record| self.matches(record, roster, index))
            .collect()
    }
}

/// Accepts both `12.5` and the comma-decimal `12,5`.
pub fn parse_number(cell: &str) -> Option<f64> {
    let value = cell.trim().replace(' ', "").replace(',', ".");
    value.parse::<f64>().ok().filter(|parsed| parsed.is_finite())
}
