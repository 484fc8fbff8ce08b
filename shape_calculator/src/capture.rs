//! Generation-weighted capture prices and capture rates.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::alignment::AlignedHour;
use crate::error::{PipelineError, PipelineWarning};
use crate::models::{Submarket, Technology};

const STAGE: &str = "capture indicators";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TechnologyCapture {
    pub technology: Technology,
    pub generation: f64,
    /// Σ(generation × price) / Σ(generation).
    pub capture_price: f64,
    /// Capture price over the plain mean price.
    pub capture_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureIndicators {
    pub submarket: Submarket,
    pub average_price: f64,
    pub wind: TechnologyCapture,
    pub solar: TechnologyCapture,
    pub hours: usize,
    /// Hours in the window skipped for lacking a price.
    pub nan_price_hours: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureReport {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub indicators: Vec<CaptureIndicators>,
    pub warnings: Vec<PipelineWarning>,
}

impl CaptureReport {
    pub fn for_submarket(&self, submarket: Submarket) -> Option<&CaptureIndicators> {
        self.indicators.iter().find(|i| i.submarket == submarket)
    }
}

#[derive(Default)]
struct Accumulator {
    hours: usize,
    nan_price_hours: usize,
    price_sum: f64,
    wind: f64,
    wind_revenue: f64,
    solar: f64,
    solar_revenue: f64,
}

pub struct CaptureIndicatorCalculator {
    start: NaiveDate,
    end: NaiveDate,
}

impl CaptureIndicatorCalculator {
    /// Both dates are part of the window.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, PipelineError> {
        if end < start {
            return Err(PipelineError::config(format!(
                "capture window ends ({}) before it starts ({})",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    pub fn calculate(&self, rows: &[AlignedHour]) -> Result<CaptureReport, PipelineWarning> {
        let mut by_submarket: BTreeMap<Submarket, Accumulator> = BTreeMap::new();

        for row in rows {
            let date = row.timestamp.date();
            if date < self.start || date > self.end {
                continue;
            }
            let acc = by_submarket.entry(row.submarket).or_default();
            acc.hours += 1;
            if row.price.is_nan() {
                acc.nan_price_hours += 1;
                continue;
            }
            acc.price_sum += row.price;
            acc.wind += row.wind_generation;
            acc.wind_revenue += row.wind_generation * row.price;
            acc.solar += row.solar_generation;
            acc.solar_revenue += row.solar_generation * row.price;
        }

        if by_submarket.is_empty() {
            return Err(PipelineWarning::EmptyInput { stage: STAGE }.logged());
        }

        let mut warnings = Vec::new();
        let mut indicators = Vec::with_capacity(by_submarket.len());
        for (submarket, acc) in by_submarket {
            let priced_hours = acc.hours - acc.nan_price_hours;
            let average_price = if priced_hours > 0 {
                acc.price_sum / priced_hours as f64
            } else {
                f64::NAN
            };
            if acc.nan_price_hours > 0 {
                log::warn!(
                    "{}: {} hours without price skipped in {}",
                    STAGE,
                    acc.nan_price_hours,
                    submarket
                );
            }

            let wind = Self::technology(
                submarket,
                Technology::Wind,
                acc.wind,
                acc.wind_revenue,
                average_price,
                &mut warnings,
            );
            let solar = Self::technology(
                submarket,
                Technology::Solar,
                acc.solar,
                acc.solar_revenue,
                average_price,
                &mut warnings,
            );

            indicators.push(CaptureIndicators {
                submarket,
                average_price,
                wind,
                solar,
                hours: acc.hours,
                nan_price_hours: acc.nan_price_hours,
            });
        }

        Ok(CaptureReport {
            start: self.start,
            end: self.end,
            indicators,
            warnings,
        })
    }

    fn technology(
        submarket: Submarket,
        technology: Technology,
        generation: f64,
        revenue: f64,
        average_price: f64,
        warnings: &mut Vec<PipelineWarning>,
    ) -> TechnologyCapture {
        let capture_price = if generation == 0.0 {
            warnings.push(
                PipelineWarning::ArithmeticUndefined {
                    submarket,
                    technology,
                    quantity: "capture price",
                }
                .logged(),
            );
            f64::NAN
        } else {
            revenue / generation
        };

        let capture_rate = if capture_price.is_nan() || average_price == 0.0 || average_price.is_nan() {
            warnings.push(
                PipelineWarning::ArithmeticUndefined {
                    submarket,
                    technology,
                    quantity: "capture rate",
                }
                .logged(),
            );
            f64::NAN
        } else {
            capture_price / average_price
        };

        TechnologyCapture {
            technology,
            generation,
            capture_price,
            capture_rate,
        }
    }
}
