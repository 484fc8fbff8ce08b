pub mod alignment;
pub mod calendar;
pub mod capture;
pub mod chunk_store;
pub mod config;
pub mod data_loader;
pub mod disaggregator;
pub mod error;
pub mod models;
pub mod normalizer;
pub mod scenario_joiner;
pub mod shape_curve;
pub mod source;

pub use alignment::{align_hourly, AlignedData, AlignedHour};
pub use calendar::{expand_dates, expand_hourly, expand_month, expand_months, CalendarHour, EndBound};
pub use capture::{CaptureIndicatorCalculator, CaptureIndicators, CaptureReport};
pub use chunk_store::ParquetChunkStore;
pub use config::{BoundsTable, RegulatoryBounds};
pub use data_loader::DataLoader;
pub use disaggregator::{Disaggregation, HourlyDisaggregator};
pub use error::{PipelineError, PipelineWarning};
pub use models::{
    ClipRange, CoarseQuantity, GenerationRecord, HourlyQuantity, ShapeMode, Submarket, Technology,
    TimeSeriesRow, YearMonth,
};
pub use normalizer::{ShapeGrouping, ShapeNormalizer, ShapeTable};
pub use scenario_joiner::{
    ChunkSink, ChunkedScenarioJoiner, HourlyClip, JoinSummary, PriceLookupRow, RunControl,
};
pub use shape_curve::{AnchorSet, ShapeAnchor, ShapeCurve, ShapeCurveInterpolator};
pub use source::{fetch_all, CachedSource, CsvDirectorySource, DataSource, Dataset, FetchUnit};
