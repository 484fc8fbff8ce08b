use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use shape_calculator::{BoundsTable, CsvDirectorySource, Dataset, ShapeGrouping, Submarket};

mod historical_processor;
mod output;
mod scenario_processor;

use historical_processor::HistoricalProcessor;
use scenario_processor::ScenarioProcessor;

#[derive(Parser)]
#[command(name = "pld_pipeline")]
#[command(about = "Hourly PLD shapes, capture prices and synthetic hourly price scenarios for the Brazilian market")]
struct Cli {
    /// Directory with the raw CSV dumps
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Directory for CSV, parquet and chunk outputs
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Regulatory PLD bounds per year (JSON); built-in 2025 values otherwise
    #[arg(long)]
    bounds: Option<PathBuf>,

    /// Field separator of the hourly PLD dumps
    #[arg(long, default_value_t = ';')]
    pld_delimiter: char,

    /// Scenario workers (0 = one per CPU)
    #[arg(long, default_value_t = 0)]
    workers: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Average hourly PLD shape per submarket
    HistoricalShape {
        #[arg(long)]
        first_year: i32,
        #[arg(long)]
        last_year: i32,
        /// hour, month_hour, year_hour or year_month_hour
        #[arg(long, default_value = "hour")]
        grouping: ShapeGrouping,
    },

    /// Wind and solar capture prices; both dates are included
    Capture {
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },

    /// Chunked hourly price scenarios from NEWAVE monthly prices
    Scenarios {
        /// Number of synthetic day shapes (at least 4)
        #[arg(short = 'n', long, default_value_t = 6)]
        scenarios: usize,
        #[arg(long, default_value = "SE/CO")]
        submarket: Submarket,
        #[arg(long, default_value_t = 2026)]
        first_year: i32,
        /// Replace the built-in average anchor with the PLD history of these years
        #[arg(long, num_args = 2, value_names = ["FIRST", "LAST"])]
        history: Option<Vec<i32>>,
    },

    /// Hourly generation from NEWAVE totals and renewable projections
    Generation {
        #[arg(long, default_value_t = 2026)]
        first_year: i32,
        /// First day of observed generation used for shapes
        #[arg(long)]
        history_start: NaiveDate,
        /// Day after the last observed day
        #[arg(long)]
        history_end: NaiveDate,
    },

    /// Merge scenario chunks into a single table
    Consolidate {
        #[arg(long, default_value = "SE/CO")]
        submarket: Submarket,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    rayon::ThreadPoolBuilder::new()
        .num_threads(num_cpus::get())
        .build_global()
        .context("configuring rayon thread pool")?;

    let bounds = match &cli.bounds {
        Some(path) => BoundsTable::from_file(path)?,
        None => BoundsTable::default(),
    };
    info!("data in {}, output to {}", cli.data_dir.display(), cli.output_dir.display());

    if !cli.pld_delimiter.is_ascii() {
        anyhow::bail!("PLD delimiter must be a single ASCII character, got {:?}", cli.pld_delimiter);
    }
    let source = CsvDirectorySource::new(cli.data_dir.clone())
        .with_delimiter(Dataset::HourlyPld, cli.pld_delimiter as u8);
    let historical = HistoricalProcessor::with_source(source, cli.output_dir.clone());
    let scenarios = ScenarioProcessor::new(&historical, bounds, cli.workers);

    match cli.command {
        Command::HistoricalShape {
            first_year,
            last_year,
            grouping,
        } => {
            historical.historical_shape(first_year, last_year, grouping)?;
        }
        Command::Capture { start, end } => {
            historical.capture(start, end)?;
        }
        Command::Scenarios {
            scenarios: count,
            submarket,
            first_year,
            history,
        } => {
            let history = history.and_then(|years| match years.as_slice() {
                [first, last] => Some((*first, *last)),
                _ => None,
            });
            let summary = scenarios.run_scenarios(count, submarket, first_year, history)?;
            if !summary.is_complete() {
                anyhow::bail!(
                    "{} price series failed, rerun to resume",
                    summary.failed.len() + summary.cancelled.len()
                );
            }
        }
        Command::Generation {
            first_year,
            history_start,
            history_end,
        } => {
            let rows = scenarios.generation(first_year, history_start, history_end)?;
            println!("✅ {} hourly generation rows", rows);
        }
        Command::Consolidate { submarket } => {
            let rows = scenarios.consolidate(submarket)?;
            println!("✅ {} rows consolidated", rows);
        }
    }

    let (hits, misses) = historical.source().cache().stats();
    info!("response cache: {} hits, {} misses", hits, misses);
    Ok(())
}
