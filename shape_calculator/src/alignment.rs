//! Hourly price and generation on one grid, keyed by (timestamp, submarket).

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::PipelineWarning;
use crate::models::{GenerationRecord, Submarket, Technology, TimeSeriesRow};

const STAGE: &str = "alignment";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignedHour {
    pub timestamp: NaiveDateTime,
    pub submarket: Submarket,
    /// NaN when no price was published for the hour.
    pub price: f64,
    pub total_generation: f64,
    pub wind_generation: f64,
    pub solar_generation: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinStats {
    pub rows: usize,
    /// Price rows merged into an existing (timestamp, submarket) key.
    pub duplicate_prices: usize,
    /// Price rows dropped for falling outside the generation span.
    pub prices_outside_span: usize,
    pub missing_generation: usize,
    pub missing_price: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlignedData {
    pub rows: Vec<AlignedHour>,
    pub stats: JoinStats,
    pub warnings: Vec<PipelineWarning>,
}

#[derive(Default)]
struct GenerationTotals {
    total: f64,
    wind: f64,
    solar: f64,
}

/// Outer-join hourly prices with plant generation.
///
/// Duplicate price keys are averaged, NaN generation values are skipped in
/// the sums. Keys with a price but no generation get zero generation, keys
/// with generation but no price get a NaN price. Rows come out ordered by
/// timestamp then submarket.
pub fn align_hourly(
    prices: &[TimeSeriesRow],
    generation: &[GenerationRecord],
) -> Result<AlignedData, PipelineWarning> {
    if prices.is_empty() || generation.is_empty() {
        return Err(PipelineWarning::EmptyInput { stage: STAGE }.logged());
    }

    let mut gen: BTreeMap<(NaiveDateTime, Submarket), GenerationTotals> = BTreeMap::new();
    for record in generation.iter().filter(|r| !r.value.is_nan()) {
        let totals = gen.entry((record.timestamp, record.submarket)).or_default();
        totals.total += record.value;
        match record.technology {
            Technology::Wind => totals.wind += record.value,
            Technology::Solar => totals.solar += record.value,
            _ => {}
        }
    }

    let (first, last) = match (gen.keys().next(), gen.keys().next_back()) {
        (Some(first), Some(last)) => (first.0, last.0),
        _ => return Err(PipelineWarning::EmptyInput { stage: STAGE }.logged()),
    };

    let mut stats = JoinStats::default();
    let mut price_sums: BTreeMap<(NaiveDateTime, Submarket), (f64, usize)> = BTreeMap::new();
    for row in prices {
        if row.timestamp < first || row.timestamp > last {
            stats.prices_outside_span += 1;
            continue;
        }
        let entry = price_sums.entry((row.timestamp, row.submarket)).or_insert((0.0, 0));
        if entry.1 > 0 {
            stats.duplicate_prices += 1;
        }
        entry.0 += row.value;
        entry.1 += 1;
    }

    let mut keys: Vec<(NaiveDateTime, Submarket)> = gen.keys().copied().collect();
    keys.extend(price_sums.keys().copied());
    keys.sort_unstable();
    keys.dedup();

    let mut rows = Vec::with_capacity(keys.len());
    for key in keys {
        let price = match price_sums.get(&key) {
            Some((sum, count)) => sum / *count as f64,
            None => {
                stats.missing_price += 1;
                f64::NAN
            }
        };
        let (total, wind, solar) = match gen.get(&key) {
            Some(t) => (t.total, t.wind, t.solar),
            None => {
                stats.missing_generation += 1;
                (0.0, 0.0, 0.0)
            }
        };
        rows.push(AlignedHour {
            timestamp: key.0,
            submarket: key.1,
            price,
            total_generation: total,
            wind_generation: wind,
            solar_generation: solar,
        });
    }
    stats.rows = rows.len();

    let mut warnings = Vec::new();
    if stats.missing_price > 0 {
        warnings.push(
            PipelineWarning::Unmatched {
                stage: STAGE,
                missing: "price",
                count: stats.missing_price,
            }
            .logged(),
        );
    }
    if stats.missing_generation > 0 {
        warnings.push(
            PipelineWarning::Unmatched {
                stage: STAGE,
                missing: "generation",
                count: stats.missing_generation,
            }
            .logged(),
        );
    }
    if stats.duplicate_prices > 0 {
        log::info!("{}: averaged {} duplicate price rows", STAGE, stats.duplicate_prices);
    }

    Ok(AlignedData {
        rows,
        stats,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::timestamp_from_parts;

    fn ts(d: u32, h: u32) -> NaiveDateTime {
        timestamp_from_parts(2025, 1, d, h).unwrap()
    }

    fn price(t: NaiveDateTime, submarket: Submarket, value: f64) -> TimeSeriesRow {
        TimeSeriesRow {
            timestamp: t,
            submarket,
            value,
        }
    }

    fn gen(t: NaiveDateTime, submarket: Submarket, technology: Technology, value: f64) -> GenerationRecord {
        GenerationRecord {
            timestamp: t,
            submarket,
            technology,
            value,
        }
    }

    #[test]
    fn test_outer_join_fills() {
        let prices = vec![
            price(ts(1, 0), Submarket::NE, 100.0),
            price(ts(1, 0), Submarket::NE, 120.0),
            price(ts(1, 1), Submarket::NE, 90.0),
            price(ts(1, 1), Submarket::S, 80.0),
            // Outside the generation span.
            price(ts(2, 0), Submarket::NE, 500.0),
        ];
        let generation = vec![
            gen(ts(1, 0), Submarket::NE, Technology::Wind, 30.0),
            gen(ts(1, 0), Submarket::NE, Technology::Wind, 10.0),
            gen(ts(1, 0), Submarket::NE, Technology::Solar, 5.0),
            gen(ts(1, 0), Submarket::NE, Technology::Hydro, 100.0),
            gen(ts(1, 0), Submarket::NE, Technology::Thermal, f64::NAN),
            gen(ts(1, 1), Submarket::NE, Technology::Hydro, 50.0),
            gen(ts(1, 1), Submarket::N, Technology::Solar, 7.0),
        ];

        let aligned = align_hourly(&prices, &generation).unwrap();
        assert_eq!(aligned.rows.len(), 4);

        let first = aligned.rows[0];
        assert_eq!((first.timestamp, first.submarket), (ts(1, 0), Submarket::NE));
        assert_eq!(first.price, 110.0);
        assert_eq!(first.total_generation, 145.0);
        assert_eq!(first.wind_generation, 40.0);
        assert_eq!(first.solar_generation, 5.0);

        let north = aligned.rows[1];
        assert_eq!(north.submarket, Submarket::N);
        assert!(north.price.is_nan());
        assert_eq!(north.solar_generation, 7.0);

        let south = aligned.rows[3];
        assert_eq!(south.submarket, Submarket::S);
        assert_eq!(south.price, 80.0);
        assert_eq!(south.total_generation, 0.0);

        assert_eq!(
            aligned.stats,
            JoinStats {
                rows: 4,
                duplicate_prices: 1,
                prices_outside_span: 1,
                missing_generation: 1,
                missing_price: 1,
            }
        );
        assert_eq!(aligned.warnings.len(), 2);
    }

    #[test]
    fn test_empty_inputs() {
        let generation = vec![gen(ts(1, 0), Submarket::S, Technology::Wind, 1.0)];
        assert_eq!(
            align_hourly(&[], &generation),
            Err(PipelineWarning::EmptyInput { stage: STAGE })
        );
        let prices = vec![price(ts(1, 0), Submarket::S, 1.0)];
        assert!(align_hourly(&prices, &[]).is_err());
        let all_nan = vec![gen(ts(1, 0), Submarket::S, Technology::Wind, f64::NAN)];
        assert!(align_hourly(&prices, &all_nan).is_err());
    }
}
