use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregate::{self, ChartView};
use crate::config::{AnalysisConfig, ColumnConfig, TotalRowPolicy};
use crate::error::AnalysisError;
use crate::filter::{DateWindow, RecordFilter};
use crate::models::{AggregateRow, GroupShape, InterventionRecord, OperatorSample, Roster, TieredSummary};
use crate::period::Granularity;
use crate::sample;
use crate::table::RawTable;
use crate::tier;

/// Everything a user picks for one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub filter: RecordFilter,
    pub granularity: Granularity,
    pub by_team: bool,
    pub window: DateWindow,
    pub strict_columns: bool,
    pub seed: Option<u64>,
    pub settings: AnalysisConfig,
}

impl Default for AnalysisRequest {
    fn default() -> Self {
        Self {
            filter: RecordFilter::default(),
            granularity: Granularity::Month,
            by_team: false,
            window: DateWindow::default(),
            strict_columns: false,
            seed: None,
            settings: AnalysisConfig::default(),
        }
    }
}

/// Recoverable anomalies met during a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Warnings {
    /// Selected records left out of period views for an unreadable date.
    pub invalid_timestamps: usize,
    /// Unreadable dates across the whole table, selected or not.
    pub table_invalid_timestamps: usize,
    pub blank_operators: usize,
    pub empty_operators: Vec<String>,
    pub chart_downsampled: Option<ChartTrim>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChartTrim {
    pub total_rows: usize,
    pub kept_rows: usize,
}

impl Warnings {
    pub fn is_empty(&self) -> bool {
        self.invalid_timestamps == 0
            && self.blank_operators == 0
            && self.empty_operators.is_empty()
            && self.chart_downsampled.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub granularity: Granularity,
    pub shape: GroupShape,
    pub window: DateWindow,
    pub operators: Vec<String>,
    /// Windowed view, possibly down-sampled for display.
    pub chart: ChartView,
    /// Unrestricted view over every valid timestamp.
    pub table: Vec<AggregateRow>,
    pub tiered: Vec<TieredSummary>,
    pub samples: Vec<OperatorSample>,
    pub warnings: Warnings,
}

pub fn group_shape(granularity: Granularity, by_team: bool) -> GroupShape {
    match (granularity, by_team) {
        (_, true) => GroupShape::OperatorTeamBucket,
        (Granularity::Total, false) => GroupShape::Operator,
        (_, false) => GroupShape::OperatorBucket,
    }
}

fn check_filter_columns(
    columns: &ColumnConfig,
    table: &RawTable,
    filter: &RecordFilter,
) -> Result<(), AnalysisError> {
    let mut wanted: Vec<&str> = Vec::new();
    if filter.value_range.is_some() {
        wanted.push(columns.value.as_deref().unwrap_or("value"));
    }
    if filter.categories.is_some() {
        wanted.push(columns.category.as_deref().unwrap_or("category"));
    }

    let missing = table.missing_columns(wanted);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AnalysisError::MissingColumns(missing))
    }
}

/// Runs one analysis end to end. Fatal problems return before any
/// aggregation; recoverable ones are collected in [`Warnings`].
pub fn run(
    table: &RawTable,
    columns: &ColumnConfig,
    roster: &Roster,
    request: &AnalysisRequest,
) -> Result<AnalysisOutcome, AnalysisError> {
    let settings = &request.settings;
    if settings.sample_size == 0 {
        return Err(AnalysisError::InvalidSampleSize);
    }

    let index = table.resolve_columns(columns, request.strict_columns)?;
    check_filter_columns(columns, table, &request.filter)?;

    let loaded = table.to_records(&index);
    let filtered: Vec<&InterventionRecord> = request.filter.apply(&loaded.records, roster, &index);
    let operators = request
        .filter
        .operators
        .expand(filtered.iter().map(|record| record.operator.as_str()));
    let window = request.window.resolve(filtered.iter().copied());
    let shape = group_shape(request.granularity, request.by_team);

    info!(
        rows = table.rows.len(),
        kept = filtered.len(),
        operators = operators.len(),
        granularity = %request.granularity,
        "analysis started"
    );

    let unrestricted_view = aggregate::aggregate(filtered.iter().copied(), shape, request.granularity, roster);
    let windowed_view =
        aggregate::aggregate_window(filtered.iter().copied(), &window, shape, request.granularity, roster);
    let skipped = unrestricted_view.skipped;
    let mut unrestricted = unrestricted_view.rows;
    let mut windowed = windowed_view.rows;

    let summaries = aggregate::summarize(&unrestricted, roster, settings.mean_policy);
    let tiered = tier::classify_summaries(&summaries, settings.tier_metric, settings.top_n, settings.bottom_n);

    if settings.total_row == TotalRowPolicy::Include {
        unrestricted = aggregate::with_total_rows(&unrestricted);
        windowed = aggregate::with_total_rows(&windowed);
    }

    let mut rng = match request.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let chart = aggregate::downsample(&windowed, settings.display_cap, &mut rng);
    let samples = sample::sample_operators(&filtered, &operators, &window, settings.sample_size, &mut rng)?;

    let warnings = Warnings {
        invalid_timestamps: skipped,
        table_invalid_timestamps: loaded.invalid_timestamps,
        blank_operators: loaded.blank_operators,
        empty_operators: samples
            .iter()
            .filter(|sample| sample.records().is_empty())
            .map(|sample| sample.operator.clone())
            .collect(),
        chart_downsampled: chart.downsampled.then_some(ChartTrim {
            total_rows: chart.total_rows,
            kept_rows: chart.rows.len(),
        }),
    };

    if !warnings.is_empty() {
        warn!(
            invalid_timestamps = warnings.invalid_timestamps,
            empty_operators = warnings.empty_operators.len(),
            "analysis finished with warnings"
        );
    }
    info!(
        chart_rows = chart.rows.len(),
        table_rows = unrestricted.len(),
        samples = samples.len(),
        "analysis complete"
    );

    Ok(AnalysisOutcome {
        run_id: Uuid::new_v4(),
        generated_at: Utc::now(),
        granularity: request.granularity,
        shape,
        window,
        operators,
        chart,
        table: unrestricted,
        tiered,
        samples,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MeanPolicy, REQUIRED_COLUMNS};
    use crate::filter::Selection;
    use crate::models::{SampleOutcome, Team, Tier, TOTAL_OPERATOR};
    use chrono::NaiveDate;

    fn table(with_equipment: bool) -> RawTable {
        let headers: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|name| with_equipment || **name != "Équipement")
            .map(|name| name.to_string())
            .collect();
        let width = headers.len();
        let row = |operator: &str, when: &str| {
            let mut cells = vec![operator.to_string(), when.to_string()];
            cells.resize(width, "x".to_string());
            cells
        };
        RawTable {
            headers,
            rows: vec![
                row("Alice", "2024-01-01 08:00"),
                row("Alice", "2024-01-02 09:15"),
                row("Alice", "2024-01-15 13:40"),
                row("Bob", "2024-01-01 10:00"),
                row("Bob", "2024-01-01 11:30"),
                row("Bob", "hier"),
            ],
        }
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            seed: Some(11),
            ..AnalysisRequest::default()
        }
    }

    fn triples(rows: &[AggregateRow]) -> Vec<(String, String, usize)> {
        rows.iter()
            .map(|row| {
                let bucket = row.bucket.map(|bucket| bucket.to_string()).unwrap_or_default();
                (row.operator.clone(), bucket, row.count)
            })
            .collect()
    }

    #[test]
    fn monthly_run_produces_every_output() {
        let outcome = run(&table(true), &ColumnConfig::default(), &Roster::default(), &request()).unwrap();

        let expected = vec![
            ("Alice".to_string(), "2024-01".to_string(), 3),
            ("Bob".to_string(), "2024-01".to_string(), 2),
        ];
        assert_eq!(triples(&outcome.table), expected);
        assert_eq!(triples(&outcome.chart.rows), expected);
        assert_eq!(outcome.operators, vec!["Alice", "Bob"]);
        assert_eq!(outcome.warnings.invalid_timestamps, 1);
        assert_eq!(outcome.tiered.len(), 2);
        assert_eq!(outcome.samples.len(), 2);
        assert_eq!(outcome.samples[0].records().len(), 2);
        assert_eq!(outcome.window.start, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(outcome.window.end, NaiveDate::from_ymd_opt(2024, 1, 15));
    }

    #[test]
    fn skipped_count_follows_the_selection() {
        let mut table = table(true);
        let mut undated = table.rows[5].clone();
        undated[1] = "demain".to_string();
        table.rows.push(undated);

        let only_alice = AnalysisRequest {
            filter: RecordFilter {
                operators: Selection::from_values(&["Alice".to_string()]),
                ..RecordFilter::default()
            },
            ..request()
        };
        let outcome = run(&table, &ColumnConfig::default(), &Roster::default(), &only_alice).unwrap();
        assert_eq!(triples(&outcome.table), vec![("Alice".to_string(), "2024-01".to_string(), 3)]);
        assert_eq!(outcome.warnings.invalid_timestamps, 0);
        assert_eq!(outcome.warnings.table_invalid_timestamps, 2);

        let everyone = run(&table, &ColumnConfig::default(), &Roster::default(), &request()).unwrap();
        assert_eq!(everyone.warnings.invalid_timestamps, 2);
    }

    #[test]
    fn missing_required_column_aborts() {
        let request = AnalysisRequest {
            strict_columns: true,
            ..request()
        };
        let err = run(&table(false), &ColumnConfig::default(), &Roster::default(), &request).unwrap_err();
        assert_eq!(err, AnalysisError::MissingColumns(vec!["Équipement".to_string()]));
        assert_eq!(err.kind(), "missing_column");
    }

    #[test]
    fn range_filter_needs_its_column() {
        let request = AnalysisRequest {
            filter: RecordFilter {
                value_range: Some(Default::default()),
                ..RecordFilter::default()
            },
            ..request()
        };
        let columns = ColumnConfig {
            value: Some("Durée".to_string()),
            ..ColumnConfig::default()
        };
        let err = run(&table(true), &columns, &Roster::default(), &request).unwrap_err();
        assert_eq!(err, AnalysisError::MissingColumns(vec!["Durée".to_string()]));
    }

    #[test]
    fn window_only_narrows_chart_and_samples() {
        let request = AnalysisRequest {
            window: DateWindow::new(NaiveDate::from_ymd_opt(2024, 1, 10), None).unwrap(),
            granularity: Granularity::Total,
            ..request()
        };
        let outcome = run(&table(true), &ColumnConfig::default(), &Roster::default(), &request).unwrap();

        assert_eq!(outcome.shape, GroupShape::Operator);
        assert_eq!(triples(&outcome.chart.rows), vec![("Alice".to_string(), String::new(), 1)]);
        assert_eq!(
            triples(&outcome.table),
            vec![("Alice".to_string(), String::new(), 3), ("Bob".to_string(), String::new(), 2)]
        );
        assert_eq!(outcome.samples[0].records().len(), 1);
        assert_eq!(outcome.samples[1].outcome, SampleOutcome::NoData);
        assert_eq!(outcome.warnings.empty_operators, vec!["Bob"]);
    }

    #[test]
    fn explicit_operator_without_records_reports_no_data() {
        let request = AnalysisRequest {
            filter: RecordFilter {
                operators: Selection::from_values(&["Alice".to_string(), "Zoé".to_string()]),
                ..RecordFilter::default()
            },
            ..request()
        };
        let outcome = run(&table(true), &ColumnConfig::default(), &Roster::default(), &request).unwrap();
        assert_eq!(outcome.table.len(), 1);
        assert_eq!(outcome.warnings.empty_operators, vec!["Zoé"]);
    }

    #[test]
    fn team_grouping_and_total_row() {
        let roster = Roster::new(vec![Team {
            name: "Nord".to_string(),
            members: vec!["Bob".to_string()],
        }]);
        let mut request = AnalysisRequest {
            by_team: true,
            granularity: Granularity::Day,
            ..request()
        };
        request.settings.total_row = TotalRowPolicy::Include;
        request.settings.mean_policy = MeanPolicy::Present;
        request.settings.top_n = 1;
        request.settings.bottom_n = 1;

        let outcome = run(&table(true), &ColumnConfig::default(), &roster, &request).unwrap();
        assert_eq!(outcome.shape, GroupShape::OperatorTeamBucket);
        assert!(outcome
            .table
            .iter()
            .any(|row| row.operator == "Bob" && row.team.as_deref() == Some("Nord")));

        let totals: Vec<usize> = outcome
            .table
            .iter()
            .filter(|row| row.operator == TOTAL_OPERATOR)
            .map(|row| row.count)
            .collect();
        assert_eq!(totals, vec![3, 1, 1]);

        // Bob averages 2 on one day, Alice 1 over three days.
        assert!(outcome.tiered.iter().all(|tiered| tiered.summary.operator != TOTAL_OPERATOR));
        assert_eq!(outcome.tiered[0].tier, Tier::Bottom);
        assert_eq!(outcome.tiered[1].tier, Tier::Top);
        assert!(outcome.samples.iter().all(|sample| sample.operator != TOTAL_OPERATOR));
    }

    #[test]
    fn display_cap_trims_chart_but_not_table() {
        let mut request = AnalysisRequest {
            granularity: Granularity::Day,
            ..request()
        };
        request.settings.display_cap = 2;

        let outcome = run(&table(true), &ColumnConfig::default(), &Roster::default(), &request).unwrap();
        assert_eq!(outcome.table.len(), 4);
        assert_eq!(outcome.chart.rows.len(), 2);
        assert_eq!(
            outcome.warnings.chart_downsampled,
            Some(ChartTrim {
                total_rows: 4,
                kept_rows: 2
            })
        );
    }

    #[test]
    fn zero_sample_size_is_rejected() {
        let mut request = request();
        request.settings.sample_size = 0;
        let err = run(&table(true), &ColumnConfig::default(), &Roster::default(), &request).unwrap_err();
        assert_eq!(err, AnalysisError::InvalidSampleSize);
    }
}
