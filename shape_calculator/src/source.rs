//! Where raw tables come from.
//!
//! Upstream datasets are split into fetch units (a year, or a month for
//! recent ONS generation). A unit that fails is recorded and skipped; only a
//! dataset where every unit failed stops the run.

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::data_loader::{
    DataLoader, RawHourlyPld, RawNewaveTotals, RawPlantGeneration, RawRenewableProjection,
};
use crate::error::PipelineError;
use crate::models::YearMonth;

/// ONS publishes plant generation per month from this year on, per year before.
pub const MONTHLY_GENERATION_FROM: i32 = 2022;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dataset {
    HourlyPld,
    PlantGeneration,
    NewaveTotals,
    RenewableProjection,
}

impl Dataset {
    pub fn name(&self) -> &'static str {
        match self {
            Dataset::HourlyPld => "pld_horario",
            Dataset::PlantGeneration => "geracao_usina",
            Dataset::NewaveTotals => "newave_totais",
            Dataset::RenewableProjection => "renovaveis",
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FetchUnit {
    pub dataset: Dataset,
    pub year: i32,
    pub month: Option<u8>,
}

impl FetchUnit {
    pub fn yearly(dataset: Dataset, year: i32) -> Self {
        Self {
            dataset,
            year,
            month: None,
        }
    }

    pub fn monthly(dataset: Dataset, ym: YearMonth) -> Self {
        Self {
            dataset,
            year: ym.year,
            month: Some(ym.month),
        }
    }

    /// NEWAVE totals come as a single file for the whole horizon.
    pub fn newave() -> Self {
        Self::yearly(Dataset::NewaveTotals, 0)
    }

    pub fn file_name(&self) -> String {
        match (self.dataset, self.month) {
            (Dataset::NewaveTotals, _) => format!("{}.csv", self.dataset),
            (_, Some(month)) => format!("{}_{}_{:02}.csv", self.dataset, self.year, month),
            (_, None) => format!("{}_{}.csv", self.dataset, self.year),
        }
    }
}

impl fmt::Display for FetchUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.dataset, self.month) {
            (Dataset::NewaveTotals, _) => write!(f, "{}", self.dataset),
            (_, Some(month)) => write!(f, "{} {}-{:02}", self.dataset, self.year, month),
            (_, None) => write!(f, "{} {}", self.dataset, self.year),
        }
    }
}

pub fn yearly_units(dataset: Dataset, first_year: i32, last_year: i32) -> Vec<FetchUnit> {
    (first_year..=last_year)
        .map(|year| FetchUnit::yearly(dataset, year))
        .collect()
}

/// Plant generation units covering `first..=last`: one per year before
/// [`MONTHLY_GENERATION_FROM`], one per month afterwards.
pub fn plant_generation_units(first: YearMonth, last: YearMonth) -> Vec<FetchUnit> {
    let mut units = Vec::new();
    for year in first.year..=last.year {
        if year < MONTHLY_GENERATION_FROM {
            units.push(FetchUnit::yearly(Dataset::PlantGeneration, year));
            continue;
        }
        for month in 1..=12u8 {
            let ym = YearMonth { year, month };
            if ym >= first && ym <= last {
                units.push(FetchUnit::monthly(Dataset::PlantGeneration, ym));
            }
        }
    }
    units
}

#[derive(Debug, Clone)]
pub enum RawTable {
    HourlyPld(Vec<RawHourlyPld>),
    PlantGeneration(Vec<RawPlantGeneration>),
    NewaveTotals(Vec<RawNewaveTotals>),
    RenewableProjection(Vec<RawRenewableProjection>),
}

impl RawTable {
    pub fn len(&self) -> usize {
        match self {
            RawTable::HourlyPld(rows) => rows.len(),
            RawTable::PlantGeneration(rows) => rows.len(),
            RawTable::NewaveTotals(rows) => rows.len(),
            RawTable::RenewableProjection(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait DataSource: Sync {
    fn fetch(&self, unit: &FetchUnit) -> Result<RawTable>;
}

/// Successful responses keyed by unit, kept for the lifetime of the cache.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<FetchUnit, RawTable>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, unit: &FetchUnit) -> Option<RawTable> {
        let found = self.entries().get(unit).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn insert(&self, unit: FetchUnit, table: RawTable) {
        self.entries().insert(unit, table);
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// A panic in another fetch leaves the map itself intact.
    fn entries(&self) -> MutexGuard<'_, HashMap<FetchUnit, RawTable>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (hits, misses)
    pub fn stats(&self) -> (usize, usize) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }
}

/// Serve repeated units from a [`ResponseCache`].
pub struct CachedSource<S> {
    inner: S,
    cache: ResponseCache,
}

impl<S: DataSource> CachedSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: ResponseCache::new(),
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }
}

impl<S: DataSource> DataSource for CachedSource<S> {
    fn fetch(&self, unit: &FetchUnit) -> Result<RawTable> {
        if let Some(table) = self.cache.get(unit) {
            log::debug!("[{}] served from cache", unit);
            return Ok(table);
        }
        let table = self.inner.fetch(unit)?;
        if !table.is_empty() {
            self.cache.insert(*unit, table.clone());
        }
        Ok(table)
    }
}

/// Raw dumps stored as CSV files in one directory.
pub struct CsvDirectorySource {
    root: PathBuf,
    delimiters: BTreeMap<Dataset, u8>,
}

impl CsvDirectorySource {
    /// CCEE PLD files default to `;`, everything else to `,`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let mut delimiters = BTreeMap::new();
        delimiters.insert(Dataset::HourlyPld, b';');
        Self {
            root: root.into(),
            delimiters,
        }
    }

    pub fn with_delimiter(mut self, dataset: Dataset, delimiter: u8) -> Self {
        self.delimiters.insert(dataset, delimiter);
        self
    }

    fn loader(&self, dataset: Dataset) -> DataLoader {
        DataLoader::new(self.delimiters.get(&dataset).copied().unwrap_or(b','))
    }
}

impl DataSource for CsvDirectorySource {
    fn fetch(&self, unit: &FetchUnit) -> Result<RawTable> {
        let path = self.root.join(unit.file_name());
        let loader = self.loader(unit.dataset);
        let table = match unit.dataset {
            Dataset::HourlyPld => RawTable::HourlyPld(loader.load_file(&path)?),
            Dataset::PlantGeneration => RawTable::PlantGeneration(loader.load_file(&path)?),
            Dataset::NewaveTotals => RawTable::NewaveTotals(loader.load_file(&path)?),
            Dataset::RenewableProjection => RawTable::RenewableProjection(loader.load_file(&path)?),
        };
        Ok(table)
    }
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub tables: Vec<(FetchUnit, RawTable)>,
    /// One `UpstreamData` entry per failed or empty unit.
    pub failures: Vec<PipelineError>,
}

impl FetchOutcome {
    pub fn into_hourly_pld(self) -> Vec<RawHourlyPld> {
        let mut rows = Vec::new();
        for (_, table) in self.tables {
            if let RawTable::HourlyPld(t) = table {
                rows.extend(t);
            }
        }
        rows
    }

    pub fn into_plant_generation(self) -> Vec<RawPlantGeneration> {
        let mut rows = Vec::new();
        for (_, table) in self.tables {
            if let RawTable::PlantGeneration(t) = table {
                rows.extend(t);
            }
        }
        rows
    }

    pub fn into_newave_totals(self) -> Vec<RawNewaveTotals> {
        let mut rows = Vec::new();
        for (_, table) in self.tables {
            if let RawTable::NewaveTotals(t) = table {
                rows.extend(t);
            }
        }
        rows
    }

    pub fn into_renewable_projections(self) -> Vec<RawRenewableProjection> {
        let mut rows = Vec::new();
        for (_, table) in self.tables {
            if let RawTable::RenewableProjection(t) = table {
                rows.extend(t);
            }
        }
        rows
    }
}

/// Fetch every unit concurrently, keeping going past failed or empty units.
pub fn fetch_all<S: DataSource>(source: &S, units: &[FetchUnit]) -> Result<FetchOutcome, PipelineError> {
    let first = units
        .first()
        .ok_or_else(|| PipelineError::config("no fetch units requested"))?;

    let results: Vec<(FetchUnit, Result<RawTable>)> = units
        .par_iter()
        .map(|unit| {
            let result = source.fetch(unit).with_context(|| format!("fetching {}", unit));
            (*unit, result)
        })
        .collect();

    let mut tables = Vec::new();
    let mut failures = Vec::new();
    for (unit, result) in results {
        match result {
            Ok(table) if table.is_empty() => {
                log::warn!("[{}] returned no rows", unit);
                failures.push(PipelineError::UpstreamData {
                    unit: unit.to_string(),
                    reason: "empty table".to_string(),
                });
            }
            Ok(table) => {
                log::info!("[{}] {} rows", unit, table.len());
                tables.push((unit, table));
            }
            Err(e) => {
                log::warn!("[{}] failed: {:#}", unit, e);
                failures.push(PipelineError::UpstreamData {
                    unit: unit.to_string(),
                    reason: format!("{:#}", e),
                });
            }
        }
    }

    if tables.is_empty() {
        return Err(PipelineError::AllUnitsFailed {
            dataset: first.dataset.to_string(),
        });
    }
    Ok(FetchOutcome { tables, failures })
}
