use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate, NaiveTime};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use shape_calculator::data_loader::{generation_records, hourly_pld_rows};
use shape_calculator::normalizer::GroupKey;
use shape_calculator::source::{plant_generation_units, yearly_units, FetchOutcome};
use shape_calculator::{
    align_hourly, fetch_all, CachedSource, CaptureIndicatorCalculator, CaptureReport, CsvDirectorySource,
    Dataset, FetchUnit, GenerationRecord, ShapeGrouping, ShapeNormalizer, ShapeTable, Submarket,
    Technology, TimeSeriesRow, YearMonth,
};

use crate::output::{capture_frame, shape_frame, write_frame};

pub struct HistoricalProcessor {
    source: CachedSource<CsvDirectorySource>,
    output_dir: PathBuf,
}

impl HistoricalProcessor {
    pub fn new(data_dir: PathBuf, output_dir: PathBuf) -> Self {
        Self::with_source(CsvDirectorySource::new(data_dir), output_dir)
    }

    pub fn with_source(source: CsvDirectorySource, output_dir: PathBuf) -> Self {
        Self {
            source: CachedSource::new(source),
            output_dir,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn fetch(&self, units: &[FetchUnit]) -> Result<FetchOutcome> {
        let outcome = fetch_all(&self.source, units)?;
        if !outcome.failures.is_empty() {
            println!("  ⚠️  {} of {} units unavailable:", outcome.failures.len(), units.len());
            for failure in &outcome.failures {
                println!("      {}", failure);
            }
        }
        Ok(outcome)
    }

    pub fn load_prices(&self, first_year: i32, last_year: i32) -> Result<Vec<TimeSeriesRow>> {
        println!("📥 Loading hourly PLD {}..={}", first_year, last_year);
        let outcome = self.fetch(&yearly_units(Dataset::HourlyPld, first_year, last_year))?;
        let loaded = hourly_pld_rows(&outcome.into_hourly_pld());
        println!("  📊 {} price rows ({} rejected)", loaded.records.len(), loaded.rejected);
        Ok(loaded.records)
    }

    /// Generation records with `start <= timestamp < end`.
    pub fn load_generation(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<GenerationRecord>> {
        if end <= start {
            anyhow::bail!("generation range [{}, {}) is empty", start, end);
        }
        println!("📥 Loading plant generation [{}, {})", start, end);

        let last_day = end - Duration::days(1);
        let first = YearMonth::of(&start.and_time(NaiveTime::default()));
        let last = YearMonth::of(&last_day.and_time(NaiveTime::default()));
        let outcome = self.fetch(&plant_generation_units(first, last))?;

        let loaded = generation_records(&outcome.into_plant_generation());
        let from = start.and_time(NaiveTime::default());
        let to = end.and_time(NaiveTime::default());
        let records: Vec<GenerationRecord> = loaded
            .records
            .into_iter()
            .filter(|r| r.timestamp >= from && r.timestamp < to)
            .collect();
        println!("  📊 {} generation rows ({} rejected)", records.len(), loaded.rejected);
        Ok(records)
    }

    pub fn historical_shape(&self, first_year: i32, last_year: i32, grouping: ShapeGrouping) -> Result<ShapeTable> {
        println!("\n📈 Historical PLD shape");
        println!("{}", "=".repeat(60));

        let prices = self.load_prices(first_year, last_year)?;
        let table = ShapeNormalizer::new(grouping).normalize(&prices)?;
        for warning in table.warnings() {
            println!("  ⚠️  {}", warning);
        }

        let mut df = shape_frame(&table)?;
        let name = format!("pld_shape_{:?}_{}_{}", grouping, first_year, last_year).to_lowercase();
        write_frame(&mut df, &self.output_dir, &name)?;
        Ok(table)
    }

    /// Mean-normalized hour-of-day price profile of one submarket.
    pub fn average_profile(&self, first_year: i32, last_year: i32, submarket: Submarket) -> Result<Vec<f64>> {
        let prices = self.load_prices(first_year, last_year)?;
        let table = ShapeNormalizer::new(ShapeGrouping::Hour).normalize(&prices)?;
        table
            .diurnal_shape(GroupKey { year: None, month: None }, submarket)
            .with_context(|| format!("no complete hourly profile for {}", submarket))
    }

    /// Capture prices and rates for the window `start..=end` (both dates included).
    pub fn capture(&self, start: NaiveDate, end: NaiveDate) -> Result<CaptureReport> {
        println!("\n💰 Capture indicators {} ..= {}", start, end);
        println!("{}", "=".repeat(60));

        let calculator = CaptureIndicatorCalculator::new(start, end)?;
        let prices = self.load_prices(start.year(), end.year())?;
        let generation = self.load_generation(start, end + Duration::days(1))?;

        let aligned = align_hourly(&prices, &generation)?;
        println!(
            "  🔗 {} aligned hours ({} without price, {} without generation)",
            aligned.stats.rows, aligned.stats.missing_price, aligned.stats.missing_generation
        );

        let report = calculator.calculate(&aligned.rows)?;
        for row in &report.indicators {
            println!(
                "  {:>6}  avg {:>9.2}  wind {:>9.2} ({:.3})  solar {:>9.2} ({:.3})",
                row.submarket.to_string(),
                row.average_price,
                row.wind.capture_price,
                row.wind.capture_rate,
                row.solar.capture_price,
                row.solar.capture_rate
            );
        }

        let mut df = capture_frame(&report)?;
        write_frame(&mut df, &self.output_dir, &format!("capture_{}_{}", start, end))?;
        Ok(report)
    }

    /// Hourly totals per submarket of the technologies accepted by `keep`.
    pub fn generation_series(
        records: &[GenerationRecord],
        keep: impl Fn(Technology) -> bool,
    ) -> Vec<TimeSeriesRow> {
        let mut totals: BTreeMap<(chrono::NaiveDateTime, Submarket), f64> = BTreeMap::new();
        for record in records.iter().filter(|r| keep(r.technology) && !r.value.is_nan()) {
            *totals.entry((record.timestamp, record.submarket)).or_default() += record.value;
        }
        totals
            .into_iter()
            .map(|((timestamp, submarket), value)| TimeSeriesRow {
                timestamp,
                submarket,
                value,
            })
            .collect()
    }

    pub fn source(&self) -> &CachedSource<CsvDirectorySource> {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;
    use tempfile::TempDir;

    fn write_fixture(dir: &Path) {
        let mut pld = String::from("MES_REFERENCIA;SUBMERCADO;DIA;HORA;PLD_HORA\n");
        let mut generation = String::from("din_instante,id_subsistema,nom_tipousina,val_geracao\n");
        for day in 1..=2 {
            for hour in 0..24 {
                let price = if (10..16).contains(&hour) { 100 } else { 200 };
                writeln!(pld, "202501;NORDESTE;{};{};{},0", day, hour, price).unwrap();
                let solar = if (10..16).contains(&hour) { 50 } else { 0 };
                writeln!(
                    generation,
                    "2025-01-{:02} {:02}:00:00,NE,FOTOVOLTAICA,{}",
                    day, hour, solar
                )
                .unwrap();
                writeln!(generation, "2025-01-{:02} {:02}:00:00,NE,EOLIELETRICA,10", day, hour).unwrap();
            }
        }
        std::fs::write(dir.join("pld_horario_2025.csv"), pld).unwrap();
        std::fs::write(dir.join("geracao_usina_2025_01.csv"), generation).unwrap();
    }

    #[test]
    fn test_capture_end_to_end() {
        let data = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        write_fixture(data.path());

        let processor = HistoricalProcessor::new(data.path().to_path_buf(), out.path().to_path_buf());
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let report = processor.capture(start, end).unwrap();

        let ne = report.for_submarket(Submarket::NE).unwrap();
        assert_eq!(ne.hours, 48);
        assert_eq!(ne.average_price, 175.0);
        assert_eq!(ne.solar.capture_price, 100.0);
        assert_eq!(ne.wind.capture_price, 175.0);
        assert!(out.path().join("capture_2025-01-01_2025-01-02.parquet").exists());

        // The second run is served from the response cache.
        processor.load_prices(2025, 2025).unwrap();
        assert!(processor.source().cache().stats().0 >= 1);
    }

    #[test]
    fn test_average_profile_and_shape_output() {
        let data = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        write_fixture(data.path());
        let processor = HistoricalProcessor::new(data.path().to_path_buf(), out.path().to_path_buf());

        let profile = processor.average_profile(2025, 2025, Submarket::NE).unwrap();
        assert_eq!(profile.len(), 24);
        let mean: f64 = profile.iter().sum::<f64>() / 24.0;
        assert!((mean - 1.0).abs() < 1e-12);
        assert!(profile[12] < profile[0]);

        processor.historical_shape(2025, 2025, ShapeGrouping::Hour).unwrap();
        assert!(out.path().join("pld_shape_hour_2025_2025.csv").exists());

        assert!(processor.average_profile(2025, 2025, Submarket::S).is_err());
    }

    #[test]
    fn test_generation_series_sums_plants() {
        let ts = shape_calculator::calendar::timestamp_from_parts(2025, 1, 1, 0).unwrap();
        let record = |technology, value| GenerationRecord {
            timestamp: ts,
            submarket: Submarket::S,
            technology,
            value,
        };
        let records = vec![
            record(Technology::Hydro, 10.0),
            record(Technology::Hydro, 5.0),
            record(Technology::Thermal, 1.0),
            record(Technology::Wind, 100.0),
            record(Technology::Thermal, f64::NAN),
        ];
        let series = HistoricalProcessor::generation_series(&records, |t| {
            matches!(t, Technology::Hydro | Technology::Thermal)
        });
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].value, 16.0);
    }
}
