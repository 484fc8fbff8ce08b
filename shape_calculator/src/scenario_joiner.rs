//! Synthetic hourly price scenarios, one persisted chunk per price scenario.
//!
//! Crossing every price scenario with every simulated day shape over a
//! multi-year hourly calendar does not fit in memory at once. Each price
//! scenario id is expanded, clipped and handed to a [`ChunkSink`] on its own,
//! so peak memory is one id's hours times the number of simulated shapes per
//! worker, and a rerun only has to redo ids whose chunk is missing.

use anyhow::{Context, Result};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::calendar::expand_month;
use crate::config::BoundsTable;
use crate::error::{PipelineError, PipelineWarning};
use crate::models::{ClipRange, YearMonth};
use crate::shape_curve::{ProfileRow, HOURS_PER_DAY};

const STAGE: &str = "scenario joiner";

/// Monthly price of one price scenario (single submarket).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLookupRow {
    pub year: i32,
    pub month: u8,
    pub price_scenario_id: u32,
    pub price: f64,
}

/// Hourly clip range, either fixed or looked up per calendar year.
#[derive(Debug, Clone, PartialEq)]
pub enum HourlyClip {
    Fixed(ClipRange),
    PerYear(BoundsTable),
}

impl HourlyClip {
    pub fn for_year(&self, year: i32) -> Result<ClipRange, PipelineError> {
        match self {
            HourlyClip::Fixed(range) => Ok(*range),
            HourlyClip::PerYear(table) => Ok(table.for_year(year)?.hourly),
        }
    }
}

impl From<ClipRange> for HourlyClip {
    fn from(range: ClipRange) -> Self {
        HourlyClip::Fixed(range)
    }
}

impl From<BoundsTable> for HourlyClip {
    fn from(table: BoundsTable) -> Self {
        HourlyClip::PerYear(table)
    }
}

/// One row of a persisted chunk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScenarioHourlyPrice {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub price_scenario_id: u32,
    pub simulated_scenario_id: u32,
    pub hourly_price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioChunk {
    pub price_scenario_id: u32,
    pub rows: Vec<ScenarioHourlyPrice>,
    /// Rows left NaN because the profile table lacks that hour.
    pub missing_profile: usize,
}

/// Destination for finished chunks. Implementations must tolerate
/// concurrent calls for different ids.
pub trait ChunkSink: Sync {
    fn exists(&self, price_scenario_id: u32) -> bool;
    fn persist(&self, chunk: &ScenarioChunk) -> Result<()>;
}

/// Shared between workers: a cancellation flag and the ids finished so far.
#[derive(Debug, Default)]
pub struct RunControl {
    cancel: AtomicBool,
    completed: Mutex<BTreeSet<u32>>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// In-flight chunks still finish; no new chunk starts afterwards.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> Vec<u32> {
        match self.completed.lock() {
            Ok(done) => done.iter().copied().collect(),
            Err(poisoned) => poisoned.into_inner().iter().copied().collect(),
        }
    }

    fn mark_done(&self, id: u32) {
        match self.completed.lock() {
            Ok(mut done) => {
                done.insert(id);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(id);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Persisted,
    AlreadyPresent,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkReport {
    pub price_scenario_id: u32,
    pub status: ChunkStatus,
    pub rows: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinSummary {
    pub persisted: Vec<u32>,
    pub already_present: Vec<u32>,
    pub cancelled: Vec<u32>,
    pub failed: Vec<(u32, String)>,
    pub rows_written: usize,
}

impl JoinSummary {
    fn from_reports(reports: Vec<ChunkReport>) -> Self {
        let mut summary = JoinSummary::default();
        for report in reports {
            match report.status {
                ChunkStatus::Persisted => {
                    summary.rows_written += report.rows;
                    summary.persisted.push(report.price_scenario_id);
                }
                ChunkStatus::AlreadyPresent => summary.already_present.push(report.price_scenario_id),
                ChunkStatus::Cancelled => summary.cancelled.push(report.price_scenario_id),
                ChunkStatus::Failed => summary.failed.push((
                    report.price_scenario_id,
                    report.error.unwrap_or_default(),
                )),
            }
        }
        summary
    }

    pub fn is_complete(&self) -> bool {
        self.cancelled.is_empty() && self.failed.is_empty()
    }
}

pub struct ChunkedScenarioJoiner {
    profiles: Vec<(u32, [f64; HOURS_PER_DAY])>,
    clip: HourlyClip,
    workers: usize,
}

impl ChunkedScenarioJoiner {
    /// `workers == 0` uses one worker per CPU.
    pub fn new(
        profiles: &[ProfileRow],
        clip: impl Into<HourlyClip>,
        workers: usize,
    ) -> Result<Self, PipelineError> {
        if profiles.is_empty() {
            return Err(PipelineError::config("profile table is empty"));
        }

        let mut by_scenario: BTreeMap<u32, [f64; HOURS_PER_DAY]> = BTreeMap::new();
        for row in profiles {
            if row.hour as usize >= HOURS_PER_DAY {
                return Err(PipelineError::config(format!(
                    "profile for scenario {} has hour {}",
                    row.simulated_scenario_id, row.hour
                )));
            }
            by_scenario
                .entry(row.simulated_scenario_id)
                .or_insert([f64::NAN; HOURS_PER_DAY])[row.hour as usize] = row.factor;
        }

        let workers = if workers == 0 { num_cpus::get() } else { workers };
        Ok(Self {
            profiles: by_scenario.into_iter().collect(),
            clip: clip.into(),
            workers,
        })
    }

    pub fn simulated_scenarios(&self) -> usize {
        self.profiles.len()
    }

    /// Expand one price scenario over the calendar hours of its months.
    ///
    /// Rows come out ordered by (year, month, day, hour, simulated scenario)
    /// and are clipped with the hourly bounds of their own year.
    pub fn join_scenario(
        &self,
        price_scenario_id: u32,
        prices: &[PriceLookupRow],
    ) -> Result<ScenarioChunk, PipelineError> {
        let mut months: BTreeMap<YearMonth, f64> = BTreeMap::new();
        for row in prices.iter().filter(|r| r.price_scenario_id == price_scenario_id) {
            let ym = YearMonth::new(row.year, row.month)?;
            if months.insert(ym, row.price).is_some() {
                log::warn!(
                    "{}: scenario {} has several prices for {}, keeping the last",
                    STAGE,
                    price_scenario_id,
                    ym
                );
            }
        }

        let hours_total: usize = months.len() * 31 * HOURS_PER_DAY * self.profiles.len();
        let mut rows = Vec::with_capacity(hours_total);
        let mut missing_profile = 0;

        for (ym, price) in &months {
            let clip = self.clip.for_year(ym.year)?;
            for hour in expand_month(*ym)? {
                for (simulated_id, profile) in &self.profiles {
                    let factor = profile[hour.hour as usize];
                    if factor.is_nan() {
                        missing_profile += 1;
                    }
                    rows.push(ScenarioHourlyPrice {
                        year: hour.year,
                        month: hour.month,
                        day: hour.day,
                        hour: hour.hour,
                        price_scenario_id,
                        simulated_scenario_id: *simulated_id,
                        hourly_price: clip.clip(price * factor),
                    });
                }
            }
        }

        if missing_profile > 0 {
            PipelineWarning::Unmatched {
                stage: STAGE,
                missing: "profile factor",
                count: missing_profile,
            }
            .logged();
        }

        Ok(ScenarioChunk {
            price_scenario_id,
            rows,
            missing_profile,
        })
    }

    /// Compute and persist every price scenario in `prices`.
    ///
    /// Chunks already present in the sink are skipped. A failing chunk is
    /// reported and does not stop the others. `on_progress` runs once per id
    /// from the worker that handled it.
    pub fn run<S: ChunkSink>(
        &self,
        prices: &[PriceLookupRow],
        sink: &S,
        control: &RunControl,
        on_progress: &(dyn Fn(&ChunkReport) + Sync),
    ) -> Result<JoinSummary> {
        if prices.is_empty() {
            return Err(PipelineWarning::EmptyInput { stage: STAGE }.logged().into());
        }

        let mut by_id: BTreeMap<u32, Vec<PriceLookupRow>> = BTreeMap::new();
        for row in prices {
            by_id.entry(row.price_scenario_id).or_default().push(*row);
        }
        let work: Vec<(u32, Vec<PriceLookupRow>)> = by_id.into_iter().collect();

        log::info!(
            "{}: {} price scenarios x {} simulated shapes on {} workers",
            STAGE,
            work.len(),
            self.profiles.len(),
            self.workers
        );

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .context("building scenario worker pool")?;

        let reports: Vec<ChunkReport> = pool.install(|| {
            work.par_iter()
                .map(|(id, rows)| {
                    let report = self.process_chunk(*id, rows, sink, control);
                    on_progress(&report);
                    report
                })
                .collect()
        });

        let summary = JoinSummary::from_reports(reports);
        for (id, reason) in &summary.failed {
            log::warn!("{}: price scenario {} failed: {}", STAGE, id, reason);
        }
        log::info!(
            "{}: {} persisted, {} already present, {} cancelled, {} failed",
            STAGE,
            summary.persisted.len(),
            summary.already_present.len(),
            summary.cancelled.len(),
            summary.failed.len()
        );
        Ok(summary)
    }

    fn process_chunk<S: ChunkSink>(
        &self,
        id: u32,
        rows: &[PriceLookupRow],
        sink: &S,
        control: &RunControl,
    ) -> ChunkReport {
        let report = |status, rows, error| ChunkReport {
            price_scenario_id: id,
            status,
            rows,
            error,
        };

        if control.is_cancelled() {
            return report(ChunkStatus::Cancelled, 0, None);
        }
        if sink.exists(id) {
            control.mark_done(id);
            return report(ChunkStatus::AlreadyPresent, 0, None);
        }

        let chunk = match self.join_scenario(id, rows) {
            Ok(chunk) => chunk,
            Err(e) => return report(ChunkStatus::Failed, 0, Some(e.to_string())),
        };

        match sink.persist(&chunk) {
            Ok(()) => {
                control.mark_done(id);
                log::debug!("{}: persisted scenario {} ({} rows)", STAGE, id, chunk.rows.len());
                report(ChunkStatus::Persisted, chunk.rows.len(), None)
            }
            Err(e) => report(ChunkStatus::Failed, 0, Some(format!("{:#}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegulatoryBounds;
    use crate::shape_curve::{AnchorSet, ShapeCurveInterpolator};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct MemorySink {
        chunks: Mutex<BTreeMap<u32, ScenarioChunk>>,
        failing: Option<u32>,
    }

    impl MemorySink {
        fn ids(&self) -> Vec<u32> {
            self.chunks.lock().unwrap().keys().copied().collect()
        }
    }

    impl ChunkSink for MemorySink {
        fn exists(&self, id: u32) -> bool {
            self.chunks.lock().unwrap().contains_key(&id)
        }

        fn persist(&self, chunk: &ScenarioChunk) -> Result<()> {
            if self.failing == Some(chunk.price_scenario_id) {
                anyhow::bail!("disk full");
            }
            self.chunks
                .lock()
                .unwrap()
                .insert(chunk.price_scenario_id, chunk.clone());
            Ok(())
        }
    }

    fn no_progress(_: &ChunkReport) {}

    fn price(year: i32, month: u8, id: u32, value: f64) -> PriceLookupRow {
        PriceLookupRow {
            year,
            month,
            price_scenario_id: id,
            price: value,
        }
    }

    fn joiner(clip: ClipRange) -> ChunkedScenarioJoiner {
        let curve = ShapeCurveInterpolator::new(AnchorSet::canonical())
            .interpolate(6)
            .unwrap();
        ChunkedScenarioJoiner::new(&curve.to_profiles(), clip, 2).unwrap()
    }

    fn sample_prices() -> Vec<PriceLookupRow> {
        vec![
            price(2026, 1, 1, 200.0),
            price(2026, 2, 1, 250.0),
            price(2026, 1, 2, 400.0),
            price(2026, 2, 2, 120.0),
            price(2026, 1, 3, 700.0),
        ]
    }

    #[test]
    fn test_single_scenario_expansion() {
        let joiner = joiner(ClipRange::unbounded());
        let chunk = joiner.join_scenario(1, &sample_prices()).unwrap();

        assert_eq!(chunk.rows.len(), (31 + 28) * 24 * 6);
        assert_eq!(chunk.missing_profile, 0);
        assert!(chunk.rows.iter().all(|r| r.price_scenario_id == 1));

        let first = chunk.rows[0];
        assert_eq!((first.year, first.month, first.day, first.hour), (2026, 1, 1, 0));
        assert_eq!(first.simulated_scenario_id, 1);
        // Scenario 1 is the flat base shape.
        assert_eq!(first.hourly_price, 200.0);

        let last = chunk.rows.last().unwrap();
        assert_eq!((last.month, last.day, last.hour, last.simulated_scenario_id), (2, 28, 23, 6));
    }

    #[test]
    fn test_hourly_bounds_applied() {
        let bounds = ClipRange::new(58.60, 1542.23).unwrap();
        let chunk = joiner(bounds).join_scenario(3, &sample_prices()).unwrap();
        assert!(chunk.rows.iter().all(|r| r.hourly_price >= 58.60 && r.hourly_price <= 1542.23));
        // Canyon curve midday hours are near zero and hit the floor.
        assert!(chunk.rows.iter().any(|r| r.hourly_price == 58.60));
    }

    #[test]
    fn test_hourly_bounds_follow_row_year() {
        let mut bounds = BoundsTable::default();
        let monthly = ClipRange::new(0.0, 5000.0).unwrap();
        bounds.insert(
            2026,
            RegulatoryBounds {
                monthly,
                hourly: ClipRange::new(50.0, 1000.0).unwrap(),
            },
        );
        bounds.insert(
            2027,
            RegulatoryBounds {
                monthly,
                hourly: ClipRange::new(50.0, 3000.0).unwrap(),
            },
        );

        let curve = ShapeCurveInterpolator::new(AnchorSet::canonical())
            .interpolate(6)
            .unwrap();
        let joiner = ChunkedScenarioJoiner::new(&curve.to_profiles(), bounds, 1).unwrap();
        let prices = [price(2026, 12, 4, 1200.0), price(2027, 1, 4, 1200.0)];
        let chunk = joiner.join_scenario(4, &prices).unwrap();

        // Scenario 1 is the flat base shape, so the hourly price is the monthly one.
        let flat = |year: i32| {
            chunk
                .rows
                .iter()
                .filter(move |r| r.year == year && r.simulated_scenario_id == 1)
                .map(|r| r.hourly_price)
        };
        assert!(flat(2026).all(|p| p == 1000.0));
        assert!(flat(2027).all(|p| p == 1200.0));
        let max_2027 = chunk
            .rows
            .iter()
            .filter(|r| r.year == 2027)
            .map(|r| r.hourly_price)
            .fold(f64::MIN, f64::max);
        assert!(max_2027 > 1000.0 && max_2027 <= 3000.0);

        // No bounds before 2025: the chunk fails instead of going unclipped.
        assert!(joiner.join_scenario(5, &[price(2024, 1, 5, 100.0)]).is_err());
    }

    #[test]
    fn test_order_independence() {
        let joiner = joiner(ClipRange::unbounded());
        let prices = sample_prices();

        let batch = MemorySink::default();
        let summary = joiner
            .run(&prices, &batch, &RunControl::new(), &no_progress)
            .unwrap();
        assert_eq!(summary.persisted, vec![1, 2, 3]);
        assert!(summary.is_complete());

        let only_a: Vec<_> = prices.iter().filter(|p| p.price_scenario_id == 1).copied().collect();
        let only_b: Vec<_> = prices.iter().filter(|p| p.price_scenario_id == 2).copied().collect();
        let separate_a = MemorySink::default();
        let separate_b = MemorySink::default();
        joiner.run(&only_b, &separate_b, &RunControl::new(), &no_progress).unwrap();
        joiner.run(&only_a, &separate_a, &RunControl::new(), &no_progress).unwrap();

        let batch_chunks = batch.chunks.lock().unwrap();
        let mut concatenated = separate_a.chunks.lock().unwrap()[&1].rows.clone();
        concatenated.extend(separate_b.chunks.lock().unwrap()[&2].rows.iter().copied());
        let mut batched = batch_chunks[&1].rows.clone();
        batched.extend(batch_chunks[&2].rows.iter().copied());
        assert_eq!(concatenated, batched);
    }

    #[test]
    fn test_resume_skips_existing_chunks() {
        let joiner = joiner(ClipRange::unbounded());
        let sink = MemorySink::default();
        let first = joiner.join_scenario(2, &sample_prices()).unwrap();
        sink.persist(&first).unwrap();

        let control = RunControl::new();
        let summary = joiner.run(&sample_prices(), &sink, &control, &no_progress).unwrap();
        assert_eq!(summary.already_present, vec![2]);
        assert_eq!(summary.persisted, vec![1, 3]);
        assert_eq!(control.completed(), vec![1, 2, 3]);
    }

    #[test]
    fn test_cancel_before_start() {
        let joiner = joiner(ClipRange::unbounded());
        let sink = MemorySink::default();
        let control = RunControl::new();
        control.cancel();

        let summary = joiner.run(&sample_prices(), &sink, &control, &no_progress).unwrap();
        assert_eq!(summary.cancelled, vec![1, 2, 3]);
        assert!(sink.ids().is_empty());
        assert!(!summary.is_complete());
    }

    #[test]
    fn test_cancel_mid_run_finishes_in_flight_chunk() {
        let curve = ShapeCurveInterpolator::new(AnchorSet::canonical())
            .interpolate(6)
            .unwrap();
        // One worker runs the ids in order.
        let joiner = ChunkedScenarioJoiner::new(&curve.to_profiles(), ClipRange::unbounded(), 1).unwrap();
        let sink = MemorySink::default();
        let control = RunControl::new();
        let cancel_after_first = |report: &ChunkReport| {
            if report.status == ChunkStatus::Persisted {
                control.cancel();
            }
        };

        let summary = joiner
            .run(&sample_prices(), &sink, &control, &cancel_after_first)
            .unwrap();
        assert_eq!(summary.persisted, vec![1]);
        assert_eq!(summary.cancelled, vec![2, 3]);
        assert_eq!(sink.ids(), vec![1]);
        assert_eq!(control.completed(), vec![1]);
        assert!(!summary.is_complete());

        // A fresh control resumes with the ids that never started.
        let resumed = joiner.run(&sample_prices(), &sink, &RunControl::new(), &no_progress).unwrap();
        assert_eq!(resumed.already_present, vec![1]);
        assert_eq!(resumed.persisted, vec![2, 3]);
    }

    #[test]
    fn test_failed_chunk_is_isolated() {
        let joiner = joiner(ClipRange::unbounded());
        let sink = MemorySink {
            failing: Some(2),
            ..Default::default()
        };
        let seen = AtomicUsize::new(0);
        let progress = |_: &ChunkReport| {
            seen.fetch_add(1, Ordering::SeqCst);
        };

        let summary = joiner.run(&sample_prices(), &sink, &RunControl::new(), &progress).unwrap();
        assert_eq!(summary.persisted, vec![1, 3]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, 2);
        assert!(summary.failed[0].1.contains("disk full"));
        assert_eq!(sink.ids(), vec![1, 3]);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_missing_profile_hours_are_nan() {
        let profiles: Vec<ProfileRow> = (0..23u8)
            .map(|hour| ProfileRow {
                simulated_scenario_id: 1,
                hour,
                factor: 1.0,
            })
            .collect();
        let joiner = ChunkedScenarioJoiner::new(&profiles, ClipRange::unbounded(), 1).unwrap();
        let chunk = joiner.join_scenario(5, &[price(2027, 6, 5, 100.0)]).unwrap();

        assert_eq!(chunk.rows.len(), 30 * 24);
        assert_eq!(chunk.missing_profile, 30);
        assert!(chunk.rows.iter().filter(|r| r.hour == 23).all(|r| r.hourly_price.is_nan()));
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(ChunkedScenarioJoiner::new(&[], ClipRange::unbounded(), 1).is_err());
        let bad = [ProfileRow {
            simulated_scenario_id: 1,
            hour: 24,
            factor: 1.0,
        }];
        assert!(ChunkedScenarioJoiner::new(&bad, ClipRange::unbounded(), 1).is_err());

        let joiner = joiner(ClipRange::unbounded());
        assert!(joiner.join_scenario(9, &[price(2026, 13, 9, 1.0)]).is_err());
        assert!(joiner
            .run(&[], &MemorySink::default(), &RunControl::new(), &no_progress)
            .is_err());
    }
}
