//! Raw CSV records from CCEE, ONS and NEWAVE dumps and their conversion
//! into the crate's typed rows.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::calendar::{hours_in_month, timestamp_from_parts};
use crate::config::BoundsTable;
use crate::error::{PipelineError, PipelineWarning};
use crate::models::{CoarseQuantity, GenerationRecord, Submarket, Technology, TimeSeriesRow, YearMonth};

/// Hourly PLD as published by CCEE (`pld_horario`).
#[derive(Debug, Clone, Deserialize)]
pub struct RawHourlyPld {
    /// `YYYYMM`
    #[serde(rename = "MES_REFERENCIA")]
    pub reference_month: u32,
    #[serde(rename = "SUBMERCADO")]
    pub submarket: String,
    #[serde(rename = "DIA")]
    pub day: u32,
    #[serde(rename = "HORA")]
    pub hour: u32,
    #[serde(rename = "PLD_HORA")]
    pub price: String,
}

/// ONS hourly generation per plant (`geracao_usina_2_ho`).
#[derive(Debug, Clone, Deserialize)]
pub struct RawPlantGeneration {
    pub din_instante: String,
    pub id_subsistema: String,
    pub nom_tipousina: String,
    pub val_geracao: String,
}

/// NEWAVE monthly totals per series and subsystem.
#[derive(Debug, Clone, Deserialize)]
pub struct RawNewaveTotals {
    /// `YYYYMMDD`, day is always 01.
    pub nu_period_day: u32,
    pub cd_serie: u32,
    pub cd_subsystem: String,
    pub vl_cmo: String,
    pub vl_hidro_generation: String,
    pub vl_thermal_generation: String,
}

/// Monthly wind and solar projections in long format.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRenewableProjection {
    /// `YYYY-MM-DD`, first of the month.
    pub date: String,
    pub technology: String,
    pub submarket: String,
    pub generation_mwh: String,
}

/// Converted rows plus the number of raw rows that could not be used.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<T> {
    pub records: Vec<T>,
    pub rejected: usize,
}

impl<T> Loaded<T> {
    fn report(self, stage: &'static str, missing: &'static str) -> Self {
        if self.rejected > 0 {
            PipelineWarning::Unmatched {
                stage,
                missing,
                count: self.rejected,
            }
            .logged();
        }
        self
    }
}

/// Monthly renewable generation for one technology.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedGeneration {
    pub technology: Technology,
    pub quantity: CoarseQuantity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewaveQuantities {
    /// Monthly price per series, clipped to the monthly regulatory bounds.
    pub prices: Vec<CoarseQuantity>,
    /// Hydro plus thermal generation per series in MWh.
    pub generation: Vec<CoarseQuantity>,
    pub rejected: usize,
}

pub struct DataLoader {
    delimiter: u8,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new(b',')
    }
}

impl DataLoader {
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }

    /// CCEE dumps are semicolon separated with decimal commas.
    pub fn ccee() -> Self {
        Self::new(b';')
    }

    pub fn read_records<T: DeserializeOwned, R: Read>(&self, reader: R) -> Result<Vec<T>> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut records = Vec::new();
        for (idx, result) in reader.deserialize().enumerate() {
            // Line numbers are 1-based and the header takes line 1.
            let record = result.with_context(|| format!("parsing CSV line {}", idx + 2))?;
            records.push(record);
        }
        Ok(records)
    }

    pub fn load_file<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        self.read_records(file)
            .with_context(|| format!("reading {}", path.display()))
    }
}

/// Parse a number written with either decimal point or decimal comma.
///
/// With both separators present the last one is the decimal mark.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let normalized = match (s.rfind(','), s.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => s.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => s.replace(',', ""),
        (Some(_), None) => s.replace(',', "."),
        _ => s.to_string(),
    };
    normalized.parse::<f64>().ok()
}

fn parse_instant(raw: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
    let raw = raw.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

fn parse_year_month(raw: &str) -> Option<YearMonth> {
    let mut parts = raw.trim().split('-');
    let year = parts.next()?.parse::<i32>().ok()?;
    let month = parts.next()?.parse::<u8>().ok()?;
    YearMonth::new(year, month).ok()
}

/// Rows with an unknown submarket or an impossible instant are rejected.
/// Unparsable prices are kept as NaN.
pub fn hourly_pld_rows(raw: &[RawHourlyPld]) -> Loaded<TimeSeriesRow> {
    let mut records = Vec::with_capacity(raw.len());
    let mut rejected = 0;
    for row in raw {
        let year = (row.reference_month / 100) as i32;
        let month = row.reference_month % 100;
        let timestamp = timestamp_from_parts(year, month, row.day, row.hour);
        let submarket = row.submarket.parse::<Submarket>();
        match (timestamp, submarket) {
            (Some(timestamp), Ok(submarket)) => records.push(TimeSeriesRow {
                timestamp,
                submarket,
                value: parse_decimal(&row.price).unwrap_or(f64::NAN),
            }),
            _ => rejected += 1,
        }
    }
    Loaded { records, rejected }.report("hourly PLD loader", "submarket or instant")
}

pub fn generation_records(raw: &[RawPlantGeneration]) -> Loaded<GenerationRecord> {
    let mut records = Vec::with_capacity(raw.len());
    let mut rejected = 0;
    for row in raw {
        let timestamp = parse_instant(&row.din_instante);
        let submarket = row.id_subsistema.parse::<Submarket>();
        match (timestamp, submarket) {
            (Some(timestamp), Ok(submarket)) => records.push(GenerationRecord {
                timestamp,
                submarket,
                technology: Technology::from_label(&row.nom_tipousina),
                value: parse_decimal(&row.val_geracao).unwrap_or(f64::NAN),
            }),
            _ => rejected += 1,
        }
    }
    Loaded { records, rejected }.report("generation loader", "submarket or instant")
}

/// Monthly price and generation from NEWAVE totals, from `first_year` on.
///
/// A price with no bounds configured for its year is a configuration error.
pub fn newave_quantities(
    raw: &[RawNewaveTotals],
    first_year: i32,
    bounds: &BoundsTable,
) -> Result<NewaveQuantities, PipelineError> {
    let mut prices = Vec::new();
    let mut generation = Vec::new();
    let mut rejected = 0;

    for row in raw {
        let year = (row.nu_period_day / 10_000) as i32;
        let month = ((row.nu_period_day / 100) % 100) as u8;
        if year < first_year {
            continue;
        }
        let (ym, submarket) = match (YearMonth::new(year, month), row.cd_subsystem.parse::<Submarket>()) {
            (Ok(ym), Ok(submarket)) => (ym, submarket),
            _ => {
                rejected += 1;
                continue;
            }
        };

        let monthly = bounds.for_year(ym.year)?.monthly;
        let price = parse_decimal(&row.vl_cmo).unwrap_or(f64::NAN);
        prices.push(CoarseQuantity {
            year: ym.year,
            month: Some(ym.month),
            submarket,
            scenario: row.cd_serie,
            value: monthly.clip(price),
        });

        let hydro = parse_decimal(&row.vl_hidro_generation).unwrap_or(f64::NAN);
        let thermal = parse_decimal(&row.vl_thermal_generation).unwrap_or(f64::NAN);
        generation.push(CoarseQuantity {
            year: ym.year,
            month: Some(ym.month),
            submarket,
            scenario: row.cd_serie,
            value: (hydro + thermal) * hours_in_month(ym.year, ym.month) as f64,
        });
    }

    if rejected > 0 {
        PipelineWarning::Unmatched {
            stage: "NEWAVE loader",
            missing: "submarket or period",
            count: rejected,
        }
        .logged();
    }
    Ok(NewaveQuantities {
        prices,
        generation,
        rejected,
    })
}

/// Projections carry no scenario dimension; every row lands on scenario 1.
pub fn renewable_projections(raw: &[RawRenewableProjection]) -> Loaded<ProjectedGeneration> {
    let mut records = Vec::with_capacity(raw.len());
    let mut rejected = 0;
    for row in raw {
        match (parse_year_month(&row.date), row.submarket.parse::<Submarket>()) {
            (Some(ym), Ok(submarket)) => records.push(ProjectedGeneration {
                technology: Technology::from_label(&row.technology),
                quantity: CoarseQuantity {
                    year: ym.year,
                    month: Some(ym.month),
                    submarket,
                    scenario: 1,
                    value: parse_decimal(&row.generation_mwh).unwrap_or(f64::NAN),
                },
            }),
            _ => rejected += 1,
        }
    }
    Loaded { records, rejected }.report("renewable projection loader", "submarket or date")
}
