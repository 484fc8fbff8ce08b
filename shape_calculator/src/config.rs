use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::PipelineError;
use crate::models::ClipRange;

/// PLD floor and ceilings for one regulatory year.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegulatoryBounds {
    pub monthly: ClipRange,
    pub hourly: ClipRange,
}

impl RegulatoryBounds {
    /// ANEEL limits in force for 2025 (R$/MWh).
    pub fn pld_2025() -> Self {
        Self {
            monthly: ClipRange::fixed(58.60, 751.73),
            hourly: ClipRange::fixed(58.60, 1542.23),
        }
    }
}

/// Bounds per regulatory year, as read from a JSON file keyed by year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoundsTable {
    years: BTreeMap<i32, RegulatoryBounds>,
}

impl Default for BoundsTable {
    fn default() -> Self {
        let mut years = BTreeMap::new();
        years.insert(2025, RegulatoryBounds::pld_2025());
        Self { years }
    }
}

impl BoundsTable {
    pub fn from_json_str(json: &str) -> Result<Self> {
        // ClipRange validates itself on deserialize.
        let years: BTreeMap<i32, RegulatoryBounds> =
            serde_json::from_str(json).context("parsing regulatory bounds")?;

        if years.is_empty() {
            anyhow::bail!("regulatory bounds file has no years");
        }
        Ok(Self { years })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn insert(&mut self, year: i32, bounds: RegulatoryBounds) {
        self.years.insert(year, bounds);
    }

    /// Exact year if configured, otherwise the latest configured year before it.
    /// Years before the first configured one are an error.
    pub fn for_year(&self, year: i32) -> Result<RegulatoryBounds, PipelineError> {
        self.years
            .range(..=year)
            .next_back()
            .map(|(_, bounds)| *bounds)
            .ok_or_else(|| {
                PipelineError::config(format!("no regulatory bounds configured for {}", year))
            })
    }
}
