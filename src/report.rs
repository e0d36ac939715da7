use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use tracing::info;

use crate::models::{AggregateRow, OperatorSample, SampleOutcome, TieredSummary};
use crate::pipeline::AnalysisOutcome;

pub const LINES_PER_PAGE: usize = 40;

#[derive(Debug, Serialize)]
struct TierRow<'a> {
    operator: &'a str,
    team: &'a str,
    total: usize,
    buckets: usize,
    mean: f64,
    value: f64,
    tier: &'static str,
}

impl<'a> From<&'a TieredSummary> for TierRow<'a> {
    fn from(tiered: &'a TieredSummary) -> Self {
        Self {
            operator: &tiered.summary.operator,
            team: &tiered.summary.team,
            total: tiered.summary.total,
            buckets: tiered.summary.buckets,
            mean: tiered.summary.mean,
            value: tiered.value,
            tier: tiered.tier.label(),
        }
    }
}

pub fn write_aggregate_csv<W: Write>(writer: W, rows: &[AggregateRow]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_tiers_csv<W: Write>(writer: W, tiered: &[TieredSummary]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for row in tiered {
        writer.serialize(TierRow::from(row))?;
    }
    writer.flush()?;
    Ok(())
}

/// Sampled rows with every original column, prefixed by the operator.
pub fn write_samples_csv<W: Write>(
    writer: W,
    headers: &[String],
    samples: &[OperatorSample],
) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(std::iter::once("sample_operator").chain(headers.iter().map(String::as_str)))?;
    for sample in samples {
        for record in sample.records() {
            writer.write_record(
                std::iter::once(sample.operator.as_str()).chain(record.fields.iter().map(String::as_str)),
            )?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// One `operator : count` line per row, `lines_per_page` lines per page,
/// pages separated by a form feed.
pub fn paginate_counts(title: &str, rows: &[AggregateRow], lines_per_page: usize) -> String {
    let lines: Vec<String> = rows
        .iter()
        .map(|row| match row.bucket {
            Some(bucket) => format!("{} ({}) : {}", row.operator, bucket, row.count),
            None => format!("{} : {}", row.operator, row.count),
        })
        .collect();

    let per_page = lines_per_page.max(1);
    let blank: &[String] = &[];
    let pages: Vec<&[String]> = if lines.is_empty() {
        vec![blank]
    } else {
        lines.chunks(per_page).collect()
    };

    let mut output = String::new();
    for (number, page) in pages.iter().enumerate() {
        if number > 0 {
            output.push('\u{c}');
        }
        let _ = writeln!(output, "{} (page {}/{})", title, number + 1, pages.len());
        let _ = writeln!(output);
        for line in page.iter() {
            let _ = writeln!(output, "{line}");
        }
    }
    output
}

pub fn build_report(outcome: &AnalysisOutcome) -> String {
    let mut output = String::new();
    let window = |date: Option<chrono::NaiveDate>| date.map(|value| value.to_string()).unwrap_or_else(|| "-".to_string());

    let _ = writeln!(output, "# Intervention Breakdown");
    let _ = writeln!(
        output,
        "Run {} generated {} ({} view, window {} to {})",
        outcome.run_id,
        outcome.generated_at.format("%Y-%m-%d %H:%M UTC"),
        outcome.granularity,
        window(outcome.window.start),
        window(outcome.window.end),
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Warnings");

    let warnings = &outcome.warnings;
    if warnings.is_empty() {
        let _ = writeln!(output, "None.");
    } else {
        if warnings.invalid_timestamps > 0 {
            let _ = writeln!(
                output,
                "- {} rows skipped for an unreadable date",
                warnings.invalid_timestamps
            );
        }
        if warnings.blank_operators > 0 {
            let _ = writeln!(output, "- {} rows skipped without an operator", warnings.blank_operators);
        }
        for operator in &warnings.empty_operators {
            let _ = writeln!(output, "- no data for {operator} in the window");
        }
        if let Some(trim) = warnings.chart_downsampled {
            let _ = writeln!(
                output,
                "- chart shows {} of {} rows (random selection)",
                trim.kept_rows, trim.total_rows
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Operators");

    if outcome.tiered.is_empty() {
        let _ = writeln!(output, "No interventions recorded for this selection.");
    } else {
        for tiered in &outcome.tiered {
            let _ = writeln!(
                output,
                "- {} ({}) {} interventions, {:.2} per {} [{}]",
                tiered.summary.operator,
                tiered.summary.team,
                tiered.summary.total,
                tiered.summary.mean,
                outcome.granularity,
                tiered.tier.label()
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Spot-check Samples");

    if outcome.samples.is_empty() {
        let _ = writeln!(output, "No operators selected.");
    }
    for sample in &outcome.samples {
        match &sample.outcome {
            SampleOutcome::NoData => {
                let _ = writeln!(output, "- {}: no data in the selected window", sample.operator);
            }
            SampleOutcome::Drawn { available, records } => {
                let rows: Vec<String> = records.iter().map(|record| (record.row + 1).to_string()).collect();
                let _ = writeln!(
                    output,
                    "- {}: rows {} drawn from {}",
                    sample.operator,
                    rows.join(", "),
                    available
                );
            }
        }
    }

    output
}

/// Writes every export for `outcome` into `dir` and returns the paths.
pub fn write_exports(outcome: &AnalysisOutcome, headers: &[String], dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let create = |name: &str| -> anyhow::Result<(PathBuf, std::fs::File)> {
        let path = dir.join(name);
        let file = std::fs::File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok((path, file))
    };

    let mut written = Vec::new();

    let (path, file) = create("chart.csv")?;
    write_aggregate_csv(file, &outcome.chart.rows)?;
    written.push(path);

    let (path, file) = create("table.csv")?;
    write_aggregate_csv(file, &outcome.table)?;
    written.push(path);

    let (path, file) = create("tiers.csv")?;
    write_tiers_csv(file, &outcome.tiered)?;
    written.push(path);

    let (path, file) = create("samples.csv")?;
    write_samples_csv(file, headers, &outcome.samples)?;
    written.push(path);

    let path = dir.join("counts.txt");
    let title = format!("Interventions per operator ({})", outcome.granularity);
    std::fs::write(&path, paginate_counts(&title, &outcome.table, LINES_PER_PAGE))?;
    written.push(path);

    let path = dir.join("report.md");
    std::fs::write(&path, build_report(outcome))?;
    written.push(path);

    info!(files = written.len(), dir = %dir.display(), "exports written");
    Ok(written)
}
