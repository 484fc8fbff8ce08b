use chrono::{Datelike, Timelike};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::error::{PipelineError, PipelineWarning};
use crate::models::{Submarket, TimeSeriesRow};
use crate::shape_curve::HOURS_PER_DAY;

const STAGE: &str = "shape normalizer";

/// Calendar fields an average profile is grouped by, besides hour of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeGrouping {
    Hour,
    MonthHour,
    YearHour,
    YearMonthHour,
}

impl ShapeGrouping {
    pub fn key_for(&self, year: i32, month: u8) -> GroupKey {
        match self {
            ShapeGrouping::Hour => GroupKey { year: None, month: None },
            ShapeGrouping::MonthHour => GroupKey { year: None, month: Some(month) },
            ShapeGrouping::YearHour => GroupKey { year: Some(year), month: None },
            ShapeGrouping::YearMonthHour => GroupKey {
                year: Some(year),
                month: Some(month),
            },
        }
    }
}

impl FromStr for ShapeGrouping {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hour" => Ok(ShapeGrouping::Hour),
            "month_hour" => Ok(ShapeGrouping::MonthHour),
            "year_hour" => Ok(ShapeGrouping::YearHour),
            "year_month_hour" => Ok(ShapeGrouping::YearMonthHour),
            other => Err(PipelineError::config(format!(
                "unknown grouping '{}', use hour, month_hour, year_hour or year_month_hour",
                other
            ))),
        }
    }
}

/// Calendar part of a shape group. Unused fields are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub year: Option<i32>,
    pub month: Option<u8>,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.year, self.month) {
            (None, None) => f.write_str("all"),
            (Some(y), None) => write!(f, "{:04}", y),
            (None, Some(m)) => write!(f, "month {:02}", m),
            (Some(y), Some(m)) => write!(f, "{:04}-{:02}", y, m),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeFactor {
    pub key: GroupKey,
    pub hour: u8,
    pub submarket: Submarket,
    /// Average of the raw values for this hour.
    pub profile: f64,
    /// `profile / mean(profile)` over the group; averages to 1.
    pub mean_shape: f64,
    /// `profile / sum(profile)` over the group; sums to 1.
    pub sum_shape: f64,
}

/// Normalized shape factors with keyed lookup.
#[derive(Debug, Clone)]
pub struct ShapeTable {
    grouping: ShapeGrouping,
    factors: Vec<ShapeFactor>,
    index: HashMap<(GroupKey, u8, Submarket), usize>,
    warnings: Vec<PipelineWarning>,
}

impl ShapeTable {
    pub fn from_factors(grouping: ShapeGrouping, factors: Vec<ShapeFactor>) -> Self {
        let index = factors
            .iter()
            .enumerate()
            .map(|(idx, f)| ((f.key, f.hour, f.submarket), idx))
            .collect();
        Self {
            grouping,
            factors,
            index,
            warnings: Vec::new(),
        }
    }

    pub fn grouping(&self) -> ShapeGrouping {
        self.grouping
    }

    pub fn factors(&self) -> &[ShapeFactor] {
        &self.factors
    }

    pub fn warnings(&self) -> &[PipelineWarning] {
        &self.warnings
    }

    pub fn get(&self, key: GroupKey, hour: u8, submarket: Submarket) -> Option<&ShapeFactor> {
        self.index.get(&(key, hour, submarket)).map(|idx| &self.factors[*idx])
    }

    /// Factor for a calendar position, keyed according to the table's grouping.
    pub fn lookup(&self, year: i32, month: u8, hour: u8, submarket: Submarket) -> Option<&ShapeFactor> {
        self.get(self.grouping.key_for(year, month), hour, submarket)
    }

    /// Mean-normalized 24-hour profile of one group, if every hour is present.
    pub fn diurnal_shape(&self, key: GroupKey, submarket: Submarket) -> Option<Vec<f64>> {
        (0..HOURS_PER_DAY as u8)
            .map(|hour| self.get(key, hour, submarket).map(|f| f.mean_shape))
            .collect()
    }
}

pub struct ShapeNormalizer {
    grouping: ShapeGrouping,
}

#[derive(Default, Clone, Copy)]
struct Accumulator {
    sum: f64,
    count: usize,
}

impl ShapeNormalizer {
    pub fn new(grouping: ShapeGrouping) -> Self {
        Self { grouping }
    }

    /// Average hourly profiles per submarket and group, with both normalizations.
    ///
    /// NaN inputs are skipped. A group whose profile sums to zero or has no
    /// values keeps NaN shapes and records an `EmptyGroup` warning.
    pub fn normalize(&self, rows: &[TimeSeriesRow]) -> Result<ShapeTable, PipelineWarning> {
        if rows.is_empty() {
            return Err(PipelineWarning::EmptyInput { stage: STAGE }.logged());
        }

        let mut cells: BTreeMap<(Submarket, GroupKey, u8), Accumulator> = BTreeMap::new();
        for row in rows {
            let key = self
                .grouping
                .key_for(row.timestamp.year(), row.timestamp.month() as u8);
            let cell = cells
                .entry((row.submarket, key, row.timestamp.hour() as u8))
                .or_default();
            if !row.value.is_nan() {
                cell.sum += row.value;
                cell.count += 1;
            }
        }

        // Group totals over the valid hourly means.
        let mut groups: BTreeMap<(Submarket, GroupKey), Accumulator> = BTreeMap::new();
        for ((submarket, key, _), cell) in &cells {
            let group = groups.entry((*submarket, *key)).or_default();
            if cell.count > 0 {
                group.sum += cell.sum / cell.count as f64;
                group.count += 1;
            }
        }

        let mut warnings = Vec::new();
        for ((submarket, key), group) in &groups {
            if group.count == 0 || group.sum == 0.0 {
                warnings.push(
                    PipelineWarning::EmptyGroup {
                        stage: STAGE,
                        submarket: *submarket,
                        group: key.to_string(),
                    }
                    .logged(),
                );
            }
        }

        let factors = cells
            .iter()
            .map(|((submarket, key, hour), cell)| {
                let profile = if cell.count > 0 {
                    cell.sum / cell.count as f64
                } else {
                    f64::NAN
                };
                let group = groups[&(*submarket, *key)];
                let usable = group.count > 0 && group.sum != 0.0;
                let (mean_shape, sum_shape) = if usable {
                    let mean = group.sum / group.count as f64;
                    (profile / mean, profile / group.sum)
                } else {
                    (f64::NAN, f64::NAN)
                };

                ShapeFactor {
                    key: *key,
                    hour: *hour,
                    submarket: *submarket,
                    profile,
                    mean_shape,
                    sum_shape,
                }
            })
            .collect();

        let mut table = ShapeTable::from_factors(self.grouping, factors);
        table.warnings = warnings;
        log::info!(
            "normalized {} rows into {} shape factors ({:?})",
            rows.len(),
            table.factors.len(),
            self.grouping
        );
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{expand_months, timestamp_from_parts};
    use crate::models::YearMonth;

    fn series(submarket: Submarket, first: YearMonth, last: YearMonth, f: impl Fn(usize) -> f64) -> Vec<TimeSeriesRow> {
        expand_months(first, last)
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, h)| TimeSeriesRow {
                timestamp: h.timestamp,
                submarket,
                value: f(i),
            })
            .collect()
    }

    #[test]
    fn test_flat_series_gives_unit_shapes() {
        let rows = series(
            Submarket::SeCo,
            YearMonth { year: 2024, month: 1 },
            YearMonth { year: 2024, month: 3 },
            |_| 250.0,
        );
        let table = ShapeNormalizer::new(ShapeGrouping::Hour).normalize(&rows).unwrap();

        assert_eq!(table.factors().len(), 24);
        for factor in table.factors() {
            assert!((factor.mean_shape - 1.0).abs() < 1e-12);
            assert!((factor.sum_shape - 1.0 / 24.0).abs() < 1e-12);
            assert_eq!(factor.profile, 250.0);
        }
        assert!(table.warnings().is_empty());
    }

    #[test]
    fn test_group_sums_and_means_are_one() {
        let mut rows = series(
            Submarket::NE,
            YearMonth { year: 2023, month: 11 },
            YearMonth { year: 2024, month: 2 },
            |i| ((i * 37) % 101) as f64 + 1.0,
        );
        rows.extend(series(
            Submarket::S,
            YearMonth { year: 2023, month: 11 },
            YearMonth { year: 2024, month: 2 },
            |i| ((i * 53) % 89) as f64 + 10.0,
        ));

        for grouping in [
            ShapeGrouping::Hour,
            ShapeGrouping::MonthHour,
            ShapeGrouping::YearHour,
            ShapeGrouping::YearMonthHour,
        ] {
            let table = ShapeNormalizer::new(grouping).normalize(&rows).unwrap();
            let mut sums: HashMap<(Submarket, GroupKey), (f64, f64, usize)> = HashMap::new();
            for f in table.factors() {
                let entry = sums.entry((f.submarket, f.key)).or_default();
                entry.0 += f.sum_shape;
                entry.1 += f.mean_shape;
                entry.2 += 1;
            }
            for (_, (sum_shape, mean_shape, count)) in sums {
                assert_eq!(count, 24);
                assert!((sum_shape - 1.0).abs() < 1e-9);
                assert!((mean_shape / count as f64 - 1.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_group_keys_follow_grouping() {
        let rows = series(
            Submarket::N,
            YearMonth { year: 2024, month: 12 },
            YearMonth { year: 2025, month: 1 },
            |_| 1.0,
        );
        let by_month = ShapeNormalizer::new(ShapeGrouping::YearMonthHour)
            .normalize(&rows)
            .unwrap();
        assert_eq!(by_month.factors().len(), 48);
        assert!(by_month.lookup(2025, 1, 23, Submarket::N).is_some());
        assert!(by_month.lookup(2025, 2, 0, Submarket::N).is_none());

        let by_hour = ShapeNormalizer::new(ShapeGrouping::Hour).normalize(&rows).unwrap();
        assert!(by_hour.lookup(2031, 7, 5, Submarket::N).is_some());
        assert!(by_hour.lookup(2031, 7, 5, Submarket::S).is_none());
    }

    #[test]
    fn test_nan_values_are_skipped() {
        let mut rows = series(
            Submarket::SeCo,
            YearMonth { year: 2024, month: 6 },
            YearMonth { year: 2024, month: 6 },
            |_| 100.0,
        );
        // Hour 3 is missing on every day.
        for row in rows.iter_mut().filter(|r| r.timestamp.hour() == 3) {
            row.value = f64::NAN;
        }
        let table = ShapeNormalizer::new(ShapeGrouping::Hour).normalize(&rows).unwrap();

        let missing = table.lookup(2024, 6, 3, Submarket::SeCo).unwrap();
        assert!(missing.profile.is_nan());
        assert!(missing.sum_shape.is_nan());

        let total: f64 = table
            .factors()
            .iter()
            .filter(|f| !f.sum_shape.is_nan())
            .map(|f| f.sum_shape)
            .sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(table.warnings().is_empty());
    }

    #[test]
    fn test_zero_and_empty_groups_warn() {
        let ts = timestamp_from_parts(2024, 1, 1, 0).unwrap();
        let rows = vec![
            TimeSeriesRow { timestamp: ts, submarket: Submarket::N, value: 0.0 },
            TimeSeriesRow { timestamp: ts, submarket: Submarket::S, value: f64::NAN },
            TimeSeriesRow { timestamp: ts, submarket: Submarket::NE, value: 5.0 },
        ];
        let table = ShapeNormalizer::new(ShapeGrouping::Hour).normalize(&rows).unwrap();

        assert_eq!(table.warnings().len(), 2);
        assert!(table.lookup(2024, 1, 0, Submarket::N).unwrap().mean_shape.is_nan());
        assert!(table.lookup(2024, 1, 0, Submarket::S).unwrap().sum_shape.is_nan());
        assert_eq!(table.lookup(2024, 1, 0, Submarket::NE).unwrap().sum_shape, 1.0);
    }

    #[test]
    fn test_empty_input_is_tagged() {
        let result = ShapeNormalizer::new(ShapeGrouping::Hour).normalize(&[]);
        assert_eq!(
            result.unwrap_err(),
            PipelineWarning::EmptyInput { stage: STAGE }
        );
    }

    #[test]
    fn test_grouping_names() {
        assert_eq!("hour".parse::<ShapeGrouping>().unwrap(), ShapeGrouping::Hour);
        assert_eq!(
            "Year_Month_Hour".parse::<ShapeGrouping>().unwrap(),
            ShapeGrouping::YearMonthHour
        );
        assert!(matches!(
            "weekday".parse::<ShapeGrouping>(),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn test_diurnal_shape_for_anchor() {
        let rows = series(
            Submarket::SeCo,
            YearMonth { year: 2024, month: 1 },
            YearMonth { year: 2024, month: 1 },
            |i| if i % 24 < 12 { 50.0 } else { 150.0 },
        );
        let table = ShapeNormalizer::new(ShapeGrouping::Hour).normalize(&rows).unwrap();
        let shape = table
            .diurnal_shape(GroupKey { year: None, month: None }, Submarket::SeCo)
            .unwrap();
        assert_eq!(shape.len(), 24);
        assert!((shape[0] - 0.5).abs() < 1e-12);
        assert!((shape[23] - 1.5).abs() < 1e-12);
        assert!(table
            .diurnal_shape(GroupKey { year: None, month: None }, Submarket::N)
            .is_none());
    }
}
