use thiserror::Error;

use crate::models::{Submarket, Technology};

/// Failures that stop a unit of work or the whole run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// Invalid inputs the caller has to fix (anchor count, ranges, grouping keys).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A single fetch unit failed or came back empty; siblings keep going.
    #[error("upstream data unavailable for {unit}: {reason}")]
    UpstreamData { unit: String, reason: String },

    /// Every unit of a dataset failed, nothing left to process.
    #[error("no usable data for dataset {dataset}")]
    AllUnitsFailed { dataset: String },
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        PipelineError::Configuration(msg.into())
    }

    /// Per-unit failures are isolated, everything else aborts the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::UpstreamData { .. })
    }
}

/// Non-fatal conditions. They are logged and counted, never silently dropped.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineWarning {
    #[error("{stage}: input table is empty")]
    EmptyInput { stage: &'static str },

    #[error("{stage}: group {group} for {submarket} has no usable values")]
    EmptyGroup {
        stage: &'static str,
        submarket: Submarket,
        group: String,
    },

    #[error("{stage}: {count} rows without a matching {missing}")]
    Unmatched {
        stage: &'static str,
        missing: &'static str,
        count: usize,
    },

    #[error("{quantity} for {technology} in {submarket} is undefined (zero denominator)")]
    ArithmeticUndefined {
        submarket: Submarket,
        technology: Technology,
        quantity: &'static str,
    },
}

impl PipelineWarning {
    /// Emit the warning through the log facade and hand it back for collection.
    pub fn logged(self) -> Self {
        log::warn!("{}", self);
        self
    }
}
