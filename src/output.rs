use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use polars::prelude::*;
use std::fs::{self, File};
use std::path::Path;

use shape_calculator::chunk_store::ConsolidatedPrice;
use shape_calculator::{CaptureReport, HourlyQuantity, ShapeCurve, ShapeTable, Submarket};

/// Instants are stored as UTC milliseconds in a `datetime` column.
fn millis(ts: &NaiveDateTime) -> i64 {
    ts.and_utc().timestamp_millis()
}

/// File-name friendly submarket code.
pub fn submarket_tag(submarket: Submarket) -> &'static str {
    match submarket {
        Submarket::N => "N",
        Submarket::NE => "NE",
        Submarket::SeCo => "SECO",
        Submarket::S => "S",
    }
}

/// Write `base_name.csv` and `base_name.parquet` into `dir`.
pub fn write_frame(df: &mut DataFrame, dir: &Path, base_name: &str) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let csv_path = dir.join(format!("{}.csv", base_name));
    CsvWriter::new(File::create(&csv_path)?)
        .finish(df)
        .with_context(|| format!("writing {}", csv_path.display()))?;

    let parquet_path = dir.join(format!("{}.parquet", base_name));
    ParquetWriter::new(File::create(&parquet_path)?)
        .finish(df)
        .with_context(|| format!("writing {}", parquet_path.display()))?;

    println!("    ✅ Saved {}: {} records", base_name, df.height());
    Ok(())
}

/// Large tables go to parquet and Arrow IPC only.
pub fn write_columnar(df: &mut DataFrame, dir: &Path, base_name: &str) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let parquet_path = dir.join(format!("{}.parquet", base_name));
    ParquetWriter::new(File::create(&parquet_path)?)
        .finish(df)
        .with_context(|| format!("writing {}", parquet_path.display()))?;

    let arrow_path = dir.join(format!("{}.arrow", base_name));
    IpcWriter::new(File::create(&arrow_path)?)
        .finish(df)
        .with_context(|| format!("writing {}", arrow_path.display()))?;

    println!("    ✅ Saved {}: {} records", base_name, df.height());
    Ok(())
}

/// Single parquet file, for per-series outputs written in a loop.
pub fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    ParquetWriter::new(File::create(path)?)
        .finish(df)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

pub fn shape_frame(table: &ShapeTable) -> PolarsResult<DataFrame> {
    let factors = table.factors();
    df!(
        "group" => factors.iter().map(|f| f.key.to_string()).collect::<Vec<String>>(),
        "year" => factors.iter().map(|f| f.key.year).collect::<Vec<Option<i32>>>(),
        "month" => factors.iter().map(|f| f.key.month).collect::<Vec<Option<u8>>>(),
        "hour" => factors.iter().map(|f| f.hour).collect::<Vec<u8>>(),
        "submarket" => factors.iter().map(|f| f.submarket.to_string()).collect::<Vec<String>>(),
        "profile" => factors.iter().map(|f| f.profile).collect::<Vec<f64>>(),
        "mean_shape" => factors.iter().map(|f| f.mean_shape).collect::<Vec<f64>>(),
        "sum_shape" => factors.iter().map(|f| f.sum_shape).collect::<Vec<f64>>()
    )
}

pub fn profile_frame(curve: &ShapeCurve) -> PolarsResult<DataFrame> {
    let rows = curve.to_profiles();
    df!(
        "simulated_scenario_id" => rows.iter().map(|r| r.simulated_scenario_id).collect::<Vec<u32>>(),
        "hour" => rows.iter().map(|r| r.hour).collect::<Vec<u8>>(),
        "factor" => rows.iter().map(|r| r.factor).collect::<Vec<f64>>()
    )
}

pub fn hourly_frame(rows: &[HourlyQuantity], quantity: &str) -> PolarsResult<DataFrame> {
    df!(
        "datetime" => rows.iter().map(|r| millis(&r.timestamp)).collect::<Vec<i64>>(),
        "submarket" => rows.iter().map(|r| r.submarket.to_string()).collect::<Vec<String>>(),
        "scenario" => rows.iter().map(|r| r.scenario).collect::<Vec<u32>>(),
        quantity => rows.iter().map(|r| r.value).collect::<Vec<f64>>()
    )
}

pub fn capture_frame(report: &CaptureReport) -> PolarsResult<DataFrame> {
    let rows = &report.indicators;
    df!(
        "submarket" => rows.iter().map(|r| r.submarket.to_string()).collect::<Vec<String>>(),
        "average_price" => rows.iter().map(|r| r.average_price).collect::<Vec<f64>>(),
        "wind_capture_price" => rows.iter().map(|r| r.wind.capture_price).collect::<Vec<f64>>(),
        "wind_capture_rate" => rows.iter().map(|r| r.wind.capture_rate).collect::<Vec<f64>>(),
        "solar_capture_price" => rows.iter().map(|r| r.solar.capture_price).collect::<Vec<f64>>(),
        "solar_capture_rate" => rows.iter().map(|r| r.solar.capture_rate).collect::<Vec<f64>>(),
        "hours" => rows.iter().map(|r| r.hours as u32).collect::<Vec<u32>>(),
        "nan_price_hours" => rows.iter().map(|r| r.nan_price_hours as u32).collect::<Vec<u32>>()
    )
}

pub fn consolidated_frame(rows: &[ConsolidatedPrice]) -> PolarsResult<DataFrame> {
    df!(
        "datetime" => rows.iter().map(|r| millis(&r.timestamp)).collect::<Vec<i64>>(),
        "year" => rows.iter().map(|r| r.price.year).collect::<Vec<i32>>(),
        "month" => rows.iter().map(|r| r.price.month).collect::<Vec<u8>>(),
        "day" => rows.iter().map(|r| r.price.day).collect::<Vec<u8>>(),
        "hour" => rows.iter().map(|r| r.price.hour).collect::<Vec<u8>>(),
        "price_scenario_id" => rows.iter().map(|r| r.price.price_scenario_id).collect::<Vec<u32>>(),
        "simulated_scenario_id" => rows.iter().map(|r| r.price.simulated_scenario_id).collect::<Vec<u32>>(),
        "hourly_price" => rows.iter().map(|r| r.price.hourly_price).collect::<Vec<f64>>()
    )
}
