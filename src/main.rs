use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod aggregate;
mod config;
mod error;
mod filter;
mod models;
mod period;
mod pipeline;
mod report;
mod sample;
mod table;
mod tier;

use config::AppConfig;
use error::AnalysisError;
use filter::{DateWindow, RecordFilter, Selection, ValueRange};
use period::Granularity;
use pipeline::AnalysisRequest;
use table::RawTable;

#[derive(Parser)]
#[command(name = "intervention-breakdown")]
#[command(about = "Operator intervention counts, tiers and spot-check samples", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Source {
    /// Spreadsheet export (delimited text) to analyse
    #[arg(long)]
    input: PathBuf,
    /// TOML file with column names, teams and analysis defaults
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides the configured field delimiter
    #[arg(long)]
    delimiter: Option<char>,
}

#[derive(Subcommand)]
enum Commands {
    /// Count, tier and sample interventions, then write the exports
    Analyze {
        #[command(flatten)]
        source: Source,
        /// Operator to include; repeat, or pass "Total" for everyone
        #[arg(long = "operator")]
        operators: Vec<String>,
        /// Team to include; repeat, or pass "Total" for every team
        #[arg(long = "team")]
        teams: Vec<String>,
        #[arg(long, default_value = "month")]
        granularity: Granularity,
        /// Split rows by team as well as operator
        #[arg(long)]
        by_team: bool,
        /// First day of the chart and sampling window (inclusive)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day of the chart and sampling window (inclusive)
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long)]
        min_value: Option<f64>,
        #[arg(long)]
        max_value: Option<f64>,
        #[arg(long = "category")]
        categories: Vec<String>,
        /// Case-insensitive text searched in every column
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        sample_size: Option<usize>,
        /// Seed for sampling and chart down-sampling
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        top: Option<usize>,
        #[arg(long)]
        bottom: Option<usize>,
        /// Abort unless every required column is present
        #[arg(long)]
        strict_columns: bool,
        #[arg(long, default_value = "breakdown")]
        out: PathBuf,
        /// Print the full result as JSON instead of writing files
        #[arg(long)]
        json: bool,
    },
    /// Print every row of the table, including undated ones
    Rows {
        #[command(flatten)]
        source: Source,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List operators with their team and record counts
    Operators {
        #[command(flatten)]
        source: Source,
    },
}

fn load(source: &Source) -> anyhow::Result<(AppConfig, RawTable)> {
    let mut config = match &source.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(delimiter) = source.delimiter {
        config.columns.delimiter = delimiter;
    }

    let table = RawTable::from_path(&source.input, config.columns.delimiter_byte()?)?;
    Ok((config, table))
}

fn print_rows(table: &RawTable, limit: Option<usize>) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(std::io::stdout());
    writer.write_record(&table.headers)?;
    for row in table.rows.iter().take(limit.unwrap_or(usize::MAX)) {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn print_operators(config: &AppConfig, table: &RawTable) -> anyhow::Result<()> {
    let index = table.resolve_columns(&config.columns, false)?;
    let loaded = table.to_records(&index);
    let roster = config.roster();

    let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for record in &loaded.records {
        let entry = counts.entry(record.operator.as_str()).or_default();
        entry.0 += 1;
        if record.timestamp.is_some() {
            entry.1 += 1;
        }
    }

    if counts.is_empty() {
        println!("No operators found in {}.", config.columns.operator);
        return Ok(());
    }

    for (operator, (rows, dated)) in counts {
        println!("- {} ({}) {} rows, {} dated", operator, roster.team_of(operator), rows, dated);
    }
    Ok(())
}

fn write_outputs(outcome: &pipeline::AnalysisOutcome, table: &RawTable, out: &Path, json: bool) -> anyhow::Result<()> {
    if json {
        let rendered = serde_json::to_string_pretty(outcome).context("failed to render result")?;
        println!("{rendered}");
        return Ok(());
    }

    let written = report::write_exports(outcome, &table.headers, out)?;
    println!("Run {} for {} operators.", outcome.run_id, outcome.operators.len());
    for path in written {
        println!("Wrote {}.", path.display());
    }
    Ok(())
}

fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Analyze {
            source,
            operators,
            teams,
            granularity,
            by_team,
            from,
            to,
            min_value,
            max_value,
            categories,
            search,
            sample_size,
            seed,
            top,
            bottom,
            strict_columns,
            out,
            json,
        } => {
            let (config, table) = load(&source)?;

            let value_range = if min_value.is_some() || max_value.is_some() {
                Some(ValueRange::new(min_value, max_value)?)
            } else {
                None
            };
            let filter = RecordFilter {
                operators: Selection::from_values(&operators),
                teams: Selection::from_values(&teams),
                value_range,
                categories: (!categories.is_empty()).then(|| categories.into_iter().collect()),
                search,
            };

            let mut settings = config.analysis.clone();
            settings.sample_size = sample_size.unwrap_or(settings.sample_size);
            settings.top_n = top.unwrap_or(settings.top_n);
            settings.bottom_n = bottom.unwrap_or(settings.bottom_n);

            let request = AnalysisRequest {
                filter,
                granularity,
                by_team,
                window: DateWindow::new(from, to)?,
                strict_columns,
                seed,
                settings,
            };

            let outcome = pipeline::run(&table, &config.columns, &config.roster(), &request)?;
            write_outputs(&outcome, &table, &out, json)?;
        }
        Commands::Rows { source, limit } => {
            let (_, table) = load(&source)?;
            print_rows(&table, limit)?;
        }
        Commands::Operators { source } => {
            let (config, table) = load(&source)?;
            print_operators(&config, &table)?;
        }
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = execute(cli) {
        if let Some(analysis) = err.downcast_ref::<AnalysisError>() {
            eprintln!("error[{}]: {}", analysis.kind(), analysis);
            std::process::exit(2);
        }
        return Err(err);
    }

    Ok(())
}
