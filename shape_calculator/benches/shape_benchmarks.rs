use criterion::{black_box, criterion_group, criterion_main, Criterion};
use shape_calculator::{
    expand_months, AnchorSet, ChunkedScenarioJoiner, ClipRange, CoarseQuantity, HourlyDisaggregator,
    PriceLookupRow, ShapeCurveInterpolator, ShapeGrouping, ShapeMode, ShapeNormalizer, Submarket,
    TimeSeriesRow, YearMonth,
};

fn history() -> Vec<TimeSeriesRow> {
    let hours = expand_months(YearMonth { year: 2024, month: 1 }, YearMonth { year: 2024, month: 12 }).unwrap();
    let mut rows = Vec::with_capacity(hours.len() * Submarket::ALL.len());
    for submarket in Submarket::ALL {
        for hour in &hours {
            rows.push(TimeSeriesRow {
                timestamp: hour.timestamp,
                submarket,
                value: 100.0 + 50.0 * (hour.hour as f64 / 24.0 * std::f64::consts::TAU).sin(),
            });
        }
    }
    rows
}

fn benchmark_interpolation(c: &mut Criterion) {
    let interpolator = ShapeCurveInterpolator::new(AnchorSet::canonical());
    c.bench_function("interpolate_1000_shapes", |b| {
        b.iter(|| black_box(interpolator.interpolate(black_box(1000)).unwrap()));
    });
}

fn benchmark_normalize(c: &mut Criterion) {
    let rows = history();
    let normalizer = ShapeNormalizer::new(ShapeGrouping::MonthHour);
    c.bench_function("normalize_one_year_month_hour", |b| {
        b.iter(|| black_box(normalizer.normalize(black_box(&rows)).unwrap()));
    });
}

fn benchmark_disaggregate(c: &mut Criterion) {
    let shapes = ShapeNormalizer::new(ShapeGrouping::MonthHour)
        .normalize(&history())
        .unwrap();
    let first = YearMonth { year: 2026, month: 1 };
    let last = YearMonth { year: 2030, month: 12 };
    let calendar = expand_months(first, last).unwrap();

    let mut coarse = Vec::new();
    for scenario in 1..=20 {
        for year in 2026..=2030 {
            for month in 1..=12u8 {
                coarse.push(CoarseQuantity {
                    year,
                    month: Some(month),
                    submarket: Submarket::SeCo,
                    scenario,
                    value: 1000.0 * scenario as f64,
                });
            }
        }
    }

    let disaggregator = HourlyDisaggregator::new(ShapeMode::Additive, ClipRange::non_negative());
    c.bench_function("disaggregate_20_series_5_years", |b| {
        b.iter(|| black_box(disaggregator.disaggregate(&coarse, &shapes, &calendar).unwrap()));
    });
}

fn benchmark_join_scenario(c: &mut Criterion) {
    let curve = ShapeCurveInterpolator::new(AnchorSet::canonical())
        .interpolate(30)
        .unwrap();
    let joiner = ChunkedScenarioJoiner::new(&curve.to_profiles(), ClipRange::new(58.60, 1542.23).unwrap(), 1)
        .unwrap();
    let prices: Vec<PriceLookupRow> = (1..=12u8)
        .map(|month| PriceLookupRow {
            year: 2027,
            month,
            price_scenario_id: 1,
            price: 150.0 + month as f64,
        })
        .collect();

    c.bench_function("join_one_price_scenario_year", |b| {
        b.iter(|| black_box(joiner.join_scenario(1, black_box(&prices)).unwrap()));
    });
}

criterion_group!(
    benches,
    benchmark_interpolation,
    benchmark_normalize,
    benchmark_disaggregate,
    benchmark_join_scenario
);
criterion_main!(benches);
