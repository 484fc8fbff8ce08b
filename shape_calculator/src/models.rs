use chrono::{Datelike, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

/// Brazilian price zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Submarket {
    N,
    NE,
    SeCo,
    S,
}

impl Submarket {
    pub const ALL: [Submarket; 4] = [Submarket::N, Submarket::NE, Submarket::SeCo, Submarket::S];

    pub fn code(&self) -> &'static str {
        match self {
            Submarket::N => "N",
            Submarket::NE => "NE",
            Submarket::SeCo => "SE/CO",
            Submarket::S => "S",
        }
    }
}

impl fmt::Display for Submarket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Submarket {
    type Err = PipelineError;

    /// Accepts CCEE names, ONS codes and NEWAVE subsystem numbers (1=SE/CO, 2=S, 3=NE, 4=N).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "N" | "NORTE" | "4" => Ok(Submarket::N),
            "NE" | "NORDESTE" | "3" => Ok(Submarket::NE),
            "SE" | "SE/CO" | "SECO" | "SE_CO" | "SUDESTE" | "SUDESTE/CENTRO-OESTE" | "1" => {
                Ok(Submarket::SeCo)
            }
            "S" | "SUL" | "2" => Ok(Submarket::S),
            other => Err(PipelineError::config(format!(
                "unknown submarket label '{}'",
                other
            ))),
        }
    }
}

/// Generation technology of a plant record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Technology {
    Wind,
    Solar,
    Hydro,
    Thermal,
    Nuclear,
    Other,
}

impl Technology {
    /// Map an ONS `nom_tipousina` label. Accents are dropped before matching so
    /// mis-encoded dumps ("EOLIELÃ‰TRICA") resolve the same as clean ones.
    pub fn from_label(label: &str) -> Self {
        let folded: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_uppercase();

        if folded.starts_with("EOL") || folded == "WIND" {
            Technology::Wind
        } else if folded.starts_with("FOTOV") || folded == "UFV" || folded == "SOLAR" {
            Technology::Solar
        } else if folded.starts_with("HIDR") || folded == "HYDRO" {
            Technology::Hydro
        } else if folded.contains("RMIC") || folded == "THERMAL" {
            Technology::Thermal
        } else if folded.starts_with("NUCLEAR") {
            Technology::Nuclear
        } else {
            Technology::Other
        }
    }
}

impl fmt::Display for Technology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Technology::Wind => "wind",
            Technology::Solar => "solar",
            Technology::Hydro => "hydro",
            Technology::Thermal => "thermal",
            Technology::Nuclear => "nuclear",
            Technology::Other => "other",
        };
        f.write_str(name)
    }
}

/// Calendar month key. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u8,
}

impl YearMonth {
    pub fn new(year: i32, month: u8) -> Result<Self, PipelineError> {
        if !(1..=12).contains(&month) {
            return Err(PipelineError::config(format!(
                "month {} outside 1..=12",
                month
            )));
        }
        Ok(Self { year, month })
    }

    pub fn of(timestamp: &NaiveDateTime) -> Self {
        Self {
            year: timestamp.year(),
            month: timestamp.month() as u8,
        }
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// One observation of a price or generation series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesRow {
    pub timestamp: NaiveDateTime,
    pub submarket: Submarket,
    pub value: f64,
}

/// Long-format generation record, one technology per row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub timestamp: NaiveDateTime,
    pub submarket: Submarket,
    pub technology: Technology,
    pub value: f64,
}

/// Monthly or annual value before hourly disaggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoarseQuantity {
    pub year: i32,
    /// `None` for annual quantities.
    pub month: Option<u8>,
    pub submarket: Submarket,
    pub scenario: u32,
    pub value: f64,
}

/// Disaggregated output, one row per hour and series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyQuantity {
    pub timestamp: NaiveDateTime,
    pub submarket: Submarket,
    pub scenario: u32,
    pub value: f64,
}

/// How a coarse quantity relates to its hourly values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeMode {
    /// Totals (energy): hourly values sum back to the coarse value.
    Additive,
    /// Levels (price): hourly values average back to the coarse value.
    Intensive,
}

#[derive(Deserialize)]
struct RawClipRange {
    min: f64,
    max: f64,
}

impl TryFrom<RawClipRange> for ClipRange {
    type Error = PipelineError;

    fn try_from(raw: RawClipRange) -> Result<Self, Self::Error> {
        ClipRange::new(raw.min, raw.max)
    }
}

/// Closed clipping interval. Only built through [`ClipRange::new`] or the
/// fixed constructors, so `min <= max` and neither bound is NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawClipRange")]
pub struct ClipRange {
    min: f64,
    max: f64,
}

impl ClipRange {
    pub fn new(min: f64, max: f64) -> Result<Self, PipelineError> {
        if min.is_nan() || max.is_nan() || min > max {
            return Err(PipelineError::config(format!(
                "invalid clip range [{}, {}]",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    /// For literal bounds known to be ordered.
    pub(crate) const fn fixed(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn unbounded() -> Self {
        Self::fixed(f64::NEG_INFINITY, f64::INFINITY)
    }

    pub fn non_negative() -> Self {
        Self::fixed(0.0, f64::INFINITY)
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// NaN stays NaN.
    pub fn clip(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    pub fn would_clip(&self, value: f64) -> bool {
        value < self.min || value > self.max
    }
}
