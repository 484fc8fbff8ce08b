use chrono::NaiveDate;
use shape_calculator::calendar::{expand_dates, timestamp_from_parts};
use shape_calculator::{
    align_hourly, CaptureIndicatorCalculator, GenerationRecord, Submarket, Technology, TimeSeriesRow,
};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2025, 1, 7).unwrap();

    // A week of Nordeste prices that drop at midday, when solar peaks.
    let mut prices = Vec::new();
    let mut generation = Vec::new();
    for hour in expand_dates(start, end)? {
        let solar = if (7..18).contains(&hour.hour) {
            400.0 * (1.0 - ((hour.hour as f64 - 12.5) / 5.5).powi(2))
        } else {
            0.0
        };
        let price = if solar > 0.0 { 90.0 } else { 250.0 };

        prices.push(TimeSeriesRow {
            timestamp: hour.timestamp,
            submarket: Submarket::NE,
            value: price,
        });
        for (technology, value) in [(Technology::Solar, solar), (Technology::Wind, 600.0), (Technology::Hydro, 1500.0)] {
            generation.push(GenerationRecord {
                timestamp: hour.timestamp,
                submarket: Submarket::NE,
                technology,
                value,
            });
        }
    }

    // A missing price hour is kept with NaN and skipped by the indicators.
    prices.retain(|p| p.timestamp != timestamp_from_parts(2025, 1, 3, 20).unwrap());

    let aligned = align_hourly(&prices, &generation)?;
    println!("Aligned {} hours, {} without price", aligned.stats.rows, aligned.stats.missing_price);

    let report = CaptureIndicatorCalculator::new(start, end)?.calculate(&aligned.rows)?;
    for row in &report.indicators {
        println!("\n=== {} ===", row.submarket);
        println!("Average PLD:         R$ {:.2}/MWh", row.average_price);
        println!("Wind capture price:  R$ {:.2}/MWh (rate {:.3})", row.wind.capture_price, row.wind.capture_rate);
        println!("Solar capture price: R$ {:.2}/MWh (rate {:.3})", row.solar.capture_price, row.solar.capture_rate);
        println!("Hours without price: {}", row.nan_price_hours);
    }

    Ok(())
}
