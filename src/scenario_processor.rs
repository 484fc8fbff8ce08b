use anyhow::{Context, Result};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::PathBuf;

use shape_calculator::calendar::CalendarHour;
use shape_calculator::data_loader::{newave_quantities, renewable_projections, NewaveQuantities};
use shape_calculator::disaggregator::DisaggregationStats;
use shape_calculator::scenario_joiner::{ChunkReport, ChunkStatus};
use shape_calculator::source::yearly_units;
use shape_calculator::{
    expand_months, AnchorSet, BoundsTable, ChunkedScenarioJoiner, ClipRange, CoarseQuantity, Dataset,
    FetchUnit, HourlyDisaggregator, JoinSummary, ParquetChunkStore, PipelineError, PriceLookupRow,
    RunControl, ShapeCurveInterpolator, ShapeGrouping, ShapeMode, ShapeNormalizer, ShapeTable, Submarket,
    Technology, YearMonth,
};

use crate::historical_processor::HistoricalProcessor;
use crate::output::{
    consolidated_frame, hourly_frame, profile_frame, submarket_tag, write_columnar, write_frame, write_parquet,
};

pub struct ScenarioProcessor<'a> {
    historical: &'a HistoricalProcessor,
    bounds: BoundsTable,
    workers: usize,
}

/// First and last month covered by a set of monthly quantities.
fn month_span(quantities: &[CoarseQuantity]) -> Option<(YearMonth, YearMonth)> {
    let months = quantities
        .iter()
        .filter_map(|q| q.month.map(|m| YearMonth { year: q.year, month: m }));
    let first = months.clone().min()?;
    let last = months.max()?;
    Some((first, last))
}

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}")
            .context("progress bar template")?,
    );
    Ok(pb)
}

impl<'a> ScenarioProcessor<'a> {
    pub fn new(historical: &'a HistoricalProcessor, bounds: BoundsTable, workers: usize) -> Self {
        Self {
            historical,
            bounds,
            workers,
        }
    }

    fn chunk_store(&self, submarket: Submarket) -> Result<ParquetChunkStore> {
        ParquetChunkStore::new(
            self.historical.output_dir().join("scenarios"),
            &format!("hourly_pld_{}", submarket_tag(submarket)),
        )
    }

    pub fn load_newave(&self, first_year: i32) -> Result<NewaveQuantities> {
        println!("📥 Loading NEWAVE totals from {}", first_year);
        let outcome = self.historical.fetch(&[FetchUnit::newave()])?;
        let quantities = newave_quantities(&outcome.into_newave_totals(), first_year, &self.bounds)?;
        println!(
            "  📊 {} monthly prices, {} monthly generation rows ({} rejected)",
            quantities.prices.len(),
            quantities.generation.len(),
            quantities.rejected
        );
        Ok(quantities)
    }

    /// Cross every NEWAVE price series of `submarket` with `scenarios` synthetic
    /// day shapes and persist one chunk per series.
    pub fn run_scenarios(
        &self,
        scenarios: usize,
        submarket: Submarket,
        first_year: i32,
        history: Option<(i32, i32)>,
    ) -> Result<JoinSummary> {
        println!("\n🎲 Hourly PLD scenarios for {}", submarket);
        println!("Using {} CPU cores", rayon::current_num_threads());
        println!("{}", "=".repeat(60));

        let anchors = match history {
            Some((from, to)) => {
                let profile = self.historical.average_profile(from, to, submarket)?;
                AnchorSet::canonical().with_average(&profile)?
            }
            None => AnchorSet::canonical(),
        };
        let curve = ShapeCurveInterpolator::new(anchors).interpolate(scenarios)?;
        for (name, column) in curve.anchor_columns() {
            println!("  📌 {} on scenario {}", name, column);
        }
        let mut df = profile_frame(&curve)?;
        write_frame(
            &mut df,
            self.historical.output_dir(),
            &format!("shape_curve_{}", scenarios),
        )?;

        let newave = self.load_newave(first_year)?;
        let prices: Vec<PriceLookupRow> = newave
            .prices
            .iter()
            .filter(|q| q.submarket == submarket)
            .filter_map(|q| {
                q.month.map(|month| PriceLookupRow {
                    year: q.year,
                    month,
                    price_scenario_id: q.scenario,
                    price: q.value,
                })
            })
            .collect();
        if prices.is_empty() {
            return Err(PipelineError::config(format!("no NEWAVE prices for {} from {}", submarket, first_year)).into());
        }

        // Fail before any work when the first year has no bounds; later years fall back.
        self.bounds.for_year(first_year)?;
        let joiner = ChunkedScenarioJoiner::new(&curve.to_profiles(), self.bounds.clone(), self.workers)?;
        let store = self.chunk_store(submarket)?;

        let mut ids: Vec<u32> = prices.iter().map(|p| p.price_scenario_id).collect();
        ids.sort_unstable();
        ids.dedup();
        println!(
            "  🔄 {} price series x {} shapes into {}",
            ids.len(),
            joiner.simulated_scenarios(),
            store.dir().display()
        );

        let pb = progress_bar(ids.len())?;
        let progress = |report: &ChunkReport| {
            pb.inc(1);
            if report.status == ChunkStatus::Failed {
                pb.println(format!(
                    "  ❌ series {}: {}",
                    report.price_scenario_id,
                    report.error.as_deref().unwrap_or("unknown error")
                ));
            }
        };

        let control = RunControl::new();
        let summary = joiner.run(&prices, &store, &control, &progress)?;
        pb.finish();

        println!(
            "\n✅ {} chunks written ({} rows), {} already present, {} failed",
            summary.persisted.len(),
            summary.rows_written,
            summary.already_present.len(),
            summary.failed.len()
        );
        Ok(summary)
    }

    pub fn consolidate(&self, submarket: Submarket) -> Result<usize> {
        println!("\n🧩 Consolidating scenario chunks for {}", submarket);
        let store = self.chunk_store(submarket)?;
        let rows = store.consolidate()?;
        let mut df = consolidated_frame(&rows)?;
        write_columnar(
            &mut df,
            self.historical.output_dir(),
            &format!("hourly_pld_{}_consolidated", submarket_tag(submarket)),
        )?;
        Ok(rows.len())
    }

    /// Disaggregate `coarse` one scenario at a time, writing
    /// `generation/{name}/{name}_{scenario:05}.parquet` per scenario so only
    /// one series is held in memory.
    fn disaggregate_per_scenario(
        &self,
        name: &str,
        coarse: &[CoarseQuantity],
        shapes: &ShapeTable,
        calendar: &[CalendarHour],
    ) -> Result<DisaggregationStats> {
        let mut by_scenario: BTreeMap<u32, Vec<CoarseQuantity>> = BTreeMap::new();
        for quantity in coarse {
            by_scenario.entry(quantity.scenario).or_default().push(quantity.clone());
        }

        let dir: PathBuf = self.historical.output_dir().join("generation").join(name);
        let disaggregator = HourlyDisaggregator::new(ShapeMode::Additive, ClipRange::non_negative());
        let mut total = DisaggregationStats::default();
        let pb = progress_bar(by_scenario.len())?;

        for (scenario, quantities) in &by_scenario {
            let result = disaggregator.disaggregate(quantities, shapes, calendar)?;
            total.rows += result.stats.rows;
            total.missing_coarse += result.stats.missing_coarse;
            total.missing_shape += result.stats.missing_shape;
            total.clipped += result.stats.clipped;
            total.duplicate_coarse += result.stats.duplicate_coarse;

            let mut df = hourly_frame(&result.rows, "generation_mwh")?;
            write_parquet(&mut df, &dir.join(format!("{}_{:05}.parquet", name, scenario)))?;
            pb.inc(1);
        }
        pb.finish();

        println!(
            "  📊 {}: {} scenarios, {} hours, {} without shape, {} without coarse value",
            name,
            by_scenario.len(),
            total.rows,
            total.missing_shape,
            total.missing_coarse
        );
        Ok(total)
    }

    /// Disaggregate NEWAVE hydro+thermal generation and the wind/solar
    /// projections to hours, each with month-of-year shapes taken from
    /// observed generation in `[history_start, history_end)`. Returns the
    /// number of hourly rows written.
    pub fn generation(&self, first_year: i32, history_start: NaiveDate, history_end: NaiveDate) -> Result<usize> {
        println!("\n⚡ Hourly generation scenarios");
        println!("{}", "=".repeat(60));

        let observed = self.historical.load_generation(history_start, history_end)?;

        let newave = self.load_newave(first_year)?;
        let (first, last) = month_span(&newave.generation).context("NEWAVE generation is empty")?;
        let calendar = expand_months(first, last)?;

        let dispatchable = HistoricalProcessor::generation_series(&observed, |t| {
            matches!(t, Technology::Hydro | Technology::Thermal)
        });
        let shapes = ShapeNormalizer::new(ShapeGrouping::MonthHour).normalize(&dispatchable)?;
        let mut rows = self
            .disaggregate_per_scenario("newave_generation_hourly", &newave.generation, &shapes, &calendar)?
            .rows;

        let units = yearly_units(Dataset::RenewableProjection, first.year, last.year);
        let projections = match self.historical.fetch(&units) {
            Ok(outcome) => renewable_projections(&outcome.into_renewable_projections()).records,
            Err(e) => match e.downcast_ref::<PipelineError>() {
                Some(PipelineError::AllUnitsFailed { .. }) => {
                    println!("  ⚠️  no renewable projections found, skipping wind and solar");
                    return Ok(rows);
                }
                _ => return Err(e),
            },
        };

        for technology in [Technology::Wind, Technology::Solar] {
            let coarse: Vec<CoarseQuantity> = projections
                .iter()
                .filter(|p| p.technology == technology)
                .map(|p| p.quantity.clone())
                .collect();
            let span = match month_span(&coarse) {
                Some(span) => span,
                None => {
                    println!("  ⚠️  no {} projections", technology);
                    continue;
                }
            };

            let series = HistoricalProcessor::generation_series(&observed, |t| t == technology);
            let shapes = ShapeNormalizer::new(ShapeGrouping::MonthHour).normalize(&series)?;
            let calendar = expand_months(span.0, span.1)?;
            rows += self
                .disaggregate_per_scenario(&format!("{}_generation_hourly", technology), &coarse, &shapes, &calendar)?
                .rows;
        }

        println!("\n✅ Generation disaggregation complete!");
        Ok(rows)
    }
}
