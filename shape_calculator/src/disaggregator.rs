use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Datelike;

use crate::calendar::{days_in_month, days_in_year, CalendarHour};
use crate::error::PipelineWarning;
use crate::models::{ClipRange, CoarseQuantity, HourlyQuantity, ShapeMode, Submarket};
use crate::normalizer::ShapeTable;

const STAGE: &str = "hourly disaggregator";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisaggregationStats {
    pub rows: usize,
    pub missing_coarse: usize,
    pub missing_shape: usize,
    pub clipped: usize,
    pub duplicate_coarse: usize,
}

#[derive(Debug, Clone)]
pub struct Disaggregation {
    pub rows: Vec<HourlyQuantity>,
    pub stats: DisaggregationStats,
    pub warnings: Vec<PipelineWarning>,
}

/// Key of the coarse period an hourly row rolls up to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeriodKey {
    pub year: i32,
    pub month: u8,
    pub submarket: Submarket,
    pub scenario: u32,
}

/// Spreads monthly or annual quantities over an hourly calendar using shape factors.
pub struct HourlyDisaggregator {
    mode: ShapeMode,
    clip: ClipRange,
}

impl HourlyDisaggregator {
    pub fn new(mode: ShapeMode, clip: ClipRange) -> Self {
        Self { mode, clip }
    }

    /// Left join from the calendar: every calendar hour of every
    /// (submarket, scenario) series in `coarse` yields one row, NaN when the
    /// coarse value or the shape factor is missing.
    ///
    /// Additive quantities use `sum_shape / days_in_period`, so a full period
    /// sums back to the coarse total. Intensive quantities use `mean_shape`.
    /// Clipping runs last and may break either identity.
    pub fn disaggregate(
        &self,
        coarse: &[CoarseQuantity],
        shapes: &ShapeTable,
        calendar: &[CalendarHour],
    ) -> Result<Disaggregation, PipelineWarning> {
        if coarse.is_empty() || calendar.is_empty() {
            return Err(PipelineWarning::EmptyInput { stage: STAGE }.logged());
        }

        let mut stats = DisaggregationStats::default();
        let mut values: HashMap<(Submarket, u32, i32, Option<u8>), f64> = HashMap::new();
        let mut series = BTreeSet::new();
        for quantity in coarse {
            series.insert((quantity.submarket, quantity.scenario));
            let key = (quantity.submarket, quantity.scenario, quantity.year, quantity.month);
            if values.insert(key, quantity.value).is_some() {
                stats.duplicate_coarse += 1;
            }
        }
        if stats.duplicate_coarse > 0 {
            log::warn!(
                "{}: {} duplicate coarse keys, keeping the last value",
                STAGE,
                stats.duplicate_coarse
            );
        }

        let mut rows = Vec::with_capacity(series.len() * calendar.len());
        for (submarket, scenario) in series {
            for hour in calendar {
                let monthly = values
                    .get(&(submarket, scenario, hour.year, Some(hour.month)))
                    .map(|v| (*v, days_in_month(hour.year, hour.month)));
                let period = monthly.or_else(|| {
                    values
                        .get(&(submarket, scenario, hour.year, None))
                        .map(|v| (*v, days_in_year(hour.year)))
                });
                // A factor from an empty or all-NaN group counts as missing.
                let shape = shapes
                    .lookup(hour.year, hour.month, hour.hour, submarket)
                    .map(|factor| match self.mode {
                        ShapeMode::Additive => factor.sum_shape,
                        ShapeMode::Intensive => factor.mean_shape,
                    })
                    .filter(|shape| shape.is_finite());

                let value = match (period, shape) {
                    (Some((coarse_value, days)), Some(shape)) => match self.mode {
                        ShapeMode::Additive => coarse_value * shape / days as f64,
                        ShapeMode::Intensive => coarse_value * shape,
                    },
                    (None, _) => {
                        stats.missing_coarse += 1;
                        f64::NAN
                    }
                    (Some(_), None) => {
                        stats.missing_shape += 1;
                        f64::NAN
                    }
                };

                if self.clip.would_clip(value) {
                    stats.clipped += 1;
                }

                rows.push(HourlyQuantity {
                    timestamp: hour.timestamp,
                    submarket,
                    scenario,
                    value: self.clip.clip(value),
                });
            }
        }
        stats.rows = rows.len();

        let mut warnings = Vec::new();
        if stats.missing_coarse > 0 {
            warnings.push(
                PipelineWarning::Unmatched {
                    stage: STAGE,
                    missing: "coarse value",
                    count: stats.missing_coarse,
                }
                .logged(),
            );
        }
        if stats.missing_shape > 0 {
            warnings.push(
                PipelineWarning::Unmatched {
                    stage: STAGE,
                    missing: "shape factor",
                    count: stats.missing_shape,
                }
                .logged(),
            );
        }
        if stats.clipped > 0 {
            log::info!("{}: {} hourly values clipped to [{}, {}]", STAGE, stats.clipped, self.clip.min(), self.clip.max());
        }

        Ok(Disaggregation {
            rows,
            stats,
            warnings,
        })
    }
}

/// Roll hourly rows back up to (year, month, submarket, scenario): sums for
/// additive quantities, means for intensive ones. NaN rows are skipped.
pub fn period_totals(rows: &[HourlyQuantity], mode: ShapeMode) -> BTreeMap<PeriodKey, f64> {
    let mut acc: BTreeMap<PeriodKey, (f64, usize)> = BTreeMap::new();
    for row in rows.iter().filter(|r| !r.value.is_nan()) {
        let key = PeriodKey {
            year: row.timestamp.year(),
            month: row.timestamp.month() as u8,
            submarket: row.submarket,
            scenario: row.scenario,
        };
        let entry = acc.entry(key).or_insert((0.0, 0));
        entry.0 += row.value;
        entry.1 += 1;
    }

    acc.into_iter()
        .map(|(key, (sum, count))| {
            let value = match mode {
                ShapeMode::Additive => sum,
                ShapeMode::Intensive => sum / count as f64,
            };
            (key, value)
        })
        .collect()
}
