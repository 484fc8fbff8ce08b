//! One parquet file per price scenario, written atomically.

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDateTime;
use polars::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::calendar::timestamp_from_parts;
use crate::error::PipelineError;
use crate::scenario_joiner::{ChunkSink, ScenarioChunk, ScenarioHourlyPrice};

pub struct ParquetChunkStore {
    dir: PathBuf,
    prefix: String,
}

/// A consolidated row with its instant rebuilt from the split fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsolidatedPrice {
    pub timestamp: NaiveDateTime,
    pub price: ScenarioHourlyPrice,
}

impl ParquetChunkStore {
    /// `prefix` ends up in file names and glob patterns, so it is limited to
    /// ASCII alphanumerics, `_` and `-`.
    pub fn new(dir: impl Into<PathBuf>, prefix: &str) -> Result<Self> {
        if prefix.is_empty()
            || !prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(PipelineError::config(format!("invalid chunk prefix '{}'", prefix)).into());
        }
        let dir = dir.into();
        fs::create_dir_all(&dir).with_context(|| format!("creating chunk directory {}", dir.display()))?;
        Ok(Self {
            dir,
            prefix: prefix.to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, price_scenario_id: u32) -> PathBuf {
        self.dir
            .join(format!("{}_{:05}.parquet", self.prefix, price_scenario_id))
    }

    /// Ids with a finished chunk on disk, ascending.
    pub fn completed_ids(&self) -> Result<Vec<u32>> {
        let pattern = self.dir.join(format!("{}_*.parquet", self.prefix));
        let pattern = pattern.to_string_lossy();
        let marker = format!("{}_", self.prefix);

        let mut ids = Vec::new();
        for entry in glob::glob(&pattern).with_context(|| format!("bad glob pattern {}", pattern))? {
            let path = entry?;
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.strip_prefix(marker.as_str()))
                .and_then(|s| s.parse::<u32>().ok());
            match id {
                Some(id) => ids.push(id),
                None => log::debug!("ignoring {} in chunk directory", path.display()),
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn read_chunk(&self, price_scenario_id: u32) -> Result<Vec<ScenarioHourlyPrice>> {
        let path = self.path_for(price_scenario_id);
        let file = File::open(&path).with_context(|| format!("opening chunk {}", path.display()))?;
        let df = ParquetReader::new(file)
            .finish()
            .with_context(|| format!("reading chunk {}", path.display()))?;
        rows_from_dataframe(&df).with_context(|| format!("decoding chunk {}", path.display()))
    }

    /// Every chunk on disk as one long table, in price scenario id order.
    pub fn consolidate(&self) -> Result<Vec<ConsolidatedPrice>> {
        let ids = self.completed_ids()?;
        if ids.is_empty() {
            bail!("no chunks found in {}", self.dir.display());
        }

        let mut out = Vec::new();
        for id in ids {
            for price in self.read_chunk(id)? {
                let timestamp = timestamp_from_parts(
                    price.year,
                    price.month as u32,
                    price.day as u32,
                    price.hour as u32,
                )
                .ok_or_else(|| {
                    anyhow!(
                        "chunk {} holds impossible instant {}-{}-{} {}h",
                        id,
                        price.year,
                        price.month,
                        price.day,
                        price.hour
                    )
                })?;
                out.push(ConsolidatedPrice { timestamp, price });
            }
        }
        log::info!("consolidated {} rows from {}", out.len(), self.dir.display());
        Ok(out)
    }
}

impl ChunkSink for ParquetChunkStore {
    fn exists(&self, price_scenario_id: u32) -> bool {
        self.path_for(price_scenario_id).exists()
    }

    fn persist(&self, chunk: &ScenarioChunk) -> Result<()> {
        let path = self.path_for(chunk.price_scenario_id);
        let tmp = path.with_extension("parquet.tmp");

        let mut df = rows_to_dataframe(&chunk.rows)?;
        let file = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        ParquetWriter::new(file)
            .finish(&mut df)
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("moving chunk into {}", path.display()))?;
        Ok(())
    }
}

pub fn rows_to_dataframe(rows: &[ScenarioHourlyPrice]) -> PolarsResult<DataFrame> {
    df!(
        "year" => rows.iter().map(|r| r.year).collect::<Vec<i32>>(),
        "month" => rows.iter().map(|r| r.month).collect::<Vec<u8>>(),
        "day" => rows.iter().map(|r| r.day).collect::<Vec<u8>>(),
        "hour" => rows.iter().map(|r| r.hour).collect::<Vec<u8>>(),
        "price_scenario_id" => rows.iter().map(|r| r.price_scenario_id).collect::<Vec<u32>>(),
        "simulated_scenario_id" => rows.iter().map(|r| r.simulated_scenario_id).collect::<Vec<u32>>(),
        "hourly_price" => rows.iter().map(|r| r.hourly_price).collect::<Vec<f64>>()
    )
}

pub fn rows_from_dataframe(df: &DataFrame) -> Result<Vec<ScenarioHourlyPrice>> {
    let year = df.column("year")?.i32()?;
    let month = df.column("month")?.u8()?;
    let day = df.column("day")?.u8()?;
    let hour = df.column("hour")?.u8()?;
    let price_id = df.column("price_scenario_id")?.u32()?;
    let simulated_id = df.column("simulated_scenario_id")?.u32()?;
    let hourly_price = df.column("hourly_price")?.f64()?;

    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let row = (|| {
            Some(ScenarioHourlyPrice {
                year: year.get(i)?,
                month: month.get(i)?,
                day: day.get(i)?,
                hour: hour.get(i)?,
                price_scenario_id: price_id.get(i)?,
                simulated_scenario_id: simulated_id.get(i)?,
                hourly_price: hourly_price.get(i).unwrap_or(f64::NAN),
            })
        })();
        match row {
            Some(row) => rows.push(row),
            None => bail!("row {} has a null key column", i),
        }
    }
    Ok(rows)
}
