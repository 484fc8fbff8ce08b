//! Synthetic diurnal price shapes.
//!
//! A handful of named anchor profiles are laid out along the scenario axis in
//! proportion to the L1 distance between consecutive anchors; every other
//! scenario column is a linear blend of its two neighbouring anchors.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

pub const HOURS_PER_DAY: usize = 24;

const BASE_PROFILE: [f64; HOURS_PER_DAY] = [1.0; HOURS_PER_DAY];

// Historical average hourly PLD shape.
const AVERAGE_PROFILE: [f64; HOURS_PER_DAY] = [
    1.17285809, 1.20095986, 1.20357422, 1.16439478, 1.1527738, 1.17201634, 1.15249601, 1.15313127,
    1.15055555, 1.10572767, 1.06226218, 0.94535046, 0.85826778, 0.77518794, 0.68442188, 0.67617884,
    0.6561201, 0.70658047, 0.79980739, 0.92272058, 0.98256103, 1.07106745, 1.11194132, 1.119045,
];

// CAISO 2024, mean of the monthly hourly profiles.
const DUCK_CURVE_PROFILE: [f64; HOURS_PER_DAY] = [
    1.171741055, 1.137828773, 1.111666567, 1.102689792, 1.133085536, 1.233355995, 1.275684022,
    1.012023572, 0.648603192, 0.502583005, 0.450235673, 0.421525523, 0.398678732, 0.409479977,
    0.462696895, 0.648369634, 0.907412972, 1.215257902, 1.528552597, 1.716701144, 1.551493977,
    1.426998158, 1.309888966, 1.223446342,
];

// CAISO, 28 April 2024.
const CANYON_CURVE_PROFILE: [f64; HOURS_PER_DAY] = [
    1.721430317, 1.704336392, 1.685400875, 1.691909491, 1.699254331, 1.704667307, 1.647772854,
    0.728341223, 0.192444629, 0.141791881, 0.055747559, 0.021898120, 0.000000000, 0.009760425,
    0.046013915, 0.025077403, 0.135418899, 0.645644685, 1.538757645, 1.744430676, 1.786880575,
    1.713726435, 1.684768389, 1.674525975,
];

/// A named 24-hour reference profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeAnchor {
    pub name: String,
    pub values: [f64; HOURS_PER_DAY],
}

impl ShapeAnchor {
    pub fn new(name: &str, values: &[f64]) -> Result<Self, PipelineError> {
        if values.len() != HOURS_PER_DAY {
            return Err(PipelineError::config(format!(
                "anchor '{}' has {} values, expected {}",
                name,
                values.len(),
                HOURS_PER_DAY
            )));
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(PipelineError::config(format!(
                "anchor '{}' contains invalid value {}",
                name, bad
            )));
        }

        let mut array = [0.0; HOURS_PER_DAY];
        array.copy_from_slice(values);
        Ok(Self {
            name: name.to_string(),
            values: array,
        })
    }

    fn constant(name: &str, values: [f64; HOURS_PER_DAY]) -> Self {
        Self {
            name: name.to_string(),
            values,
        }
    }

    pub fn l1_distance(&self, other: &ShapeAnchor) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).abs())
            .sum()
    }
}

/// The four anchors in axis order: base, average, duck curve, canyon curve.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorSet {
    pub base: ShapeAnchor,
    pub average: ShapeAnchor,
    pub duck_curve: ShapeAnchor,
    pub canyon_curve: ShapeAnchor,
}

impl AnchorSet {
    pub fn canonical() -> Self {
        Self {
            base: ShapeAnchor::constant("base", BASE_PROFILE),
            average: ShapeAnchor::constant("average", AVERAGE_PROFILE),
            duck_curve: ShapeAnchor::constant("duck_curve", DUCK_CURVE_PROFILE),
            canyon_curve: ShapeAnchor::constant("canyon_curve", CANYON_CURVE_PROFILE),
        }
    }

    /// Swap the built-in average for a freshly computed historical profile.
    pub fn with_average(mut self, profile: &[f64]) -> Result<Self, PipelineError> {
        self.average = ShapeAnchor::new("average", profile)?;
        Ok(self)
    }

    fn ordered(&self) -> [&ShapeAnchor; 4] {
        [&self.base, &self.average, &self.duck_curve, &self.canyon_curve]
    }
}

/// One cell of the long profile table consumed by the scenario joiner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub simulated_scenario_id: u32,
    pub hour: u8,
    pub factor: f64,
}

/// 24 x K table of diurnal shapes, one column per simulated scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeCurve {
    columns: Vec<[f64; HOURS_PER_DAY]>,
    anchor_columns: Vec<(String, u32)>,
}

impl ShapeCurve {
    pub fn scenario_count(&self) -> usize {
        self.columns.len()
    }

    /// Column for a 1-based scenario id.
    pub fn column(&self, scenario_id: u32) -> Option<&[f64; HOURS_PER_DAY]> {
        (scenario_id as usize)
            .checked_sub(1)
            .and_then(|idx| self.columns.get(idx))
    }

    pub fn value(&self, hour: usize, scenario_id: u32) -> Option<f64> {
        self.column(scenario_id).and_then(|c| c.get(hour).copied())
    }

    /// Anchor names with the 1-based column each one landed on.
    pub fn anchor_columns(&self) -> &[(String, u32)] {
        &self.anchor_columns
    }

    pub fn to_profiles(&self) -> Vec<ProfileRow> {
        let mut rows = Vec::with_capacity(self.columns.len() * HOURS_PER_DAY);
        for (idx, column) in self.columns.iter().enumerate() {
            for (hour, factor) in column.iter().enumerate() {
                rows.push(ProfileRow {
                    simulated_scenario_id: idx as u32 + 1,
                    hour: hour as u8,
                    factor: *factor,
                });
            }
        }
        rows
    }
}

/// Round to the nearest integer, exact halves go to the lower value.
pub fn round_half_down(x: f64) -> usize {
    (x - 0.5).ceil().max(0.0) as usize
}

pub struct ShapeCurveInterpolator {
    anchors: AnchorSet,
}

impl ShapeCurveInterpolator {
    pub fn new(anchors: AnchorSet) -> Self {
        Self { anchors }
    }

    /// Build `n` scenario columns.
    ///
    /// Anchor `i` sits on column `round(f_i * (n - 1))` (0-based) where `f_i` is
    /// its cumulative share of the total L1 distance along the anchor chain.
    /// Ties round to the lower column. When all anchors are identical the
    /// anchors are spaced evenly instead.
    pub fn interpolate(&self, n: usize) -> Result<ShapeCurve, PipelineError> {
        let anchors = self.anchors.ordered();
        if n < anchors.len() {
            return Err(PipelineError::config(format!(
                "{} scenario columns cannot hold {} anchors",
                n,
                anchors.len()
            )));
        }

        let fractions = Self::cumulative_fractions(&anchors);
        let last_column = (n - 1) as f64;

        let mut placed: Vec<(usize, &ShapeAnchor)> = Vec::with_capacity(anchors.len());
        for (fraction, anchor) in fractions.iter().zip(anchors.iter()) {
            let position = round_half_down(fraction * last_column).min(n - 1);
            if let Some((previous_position, previous)) = placed.last() {
                if position <= *previous_position {
                    if previous.values == anchor.values {
                        log::debug!(
                            "anchor '{}' coincides with '{}' on column {}",
                            anchor.name,
                            previous.name,
                            previous_position + 1
                        );
                        continue;
                    }
                    return Err(PipelineError::config(format!(
                        "anchors '{}' and '{}' both map to column {} with {} scenarios",
                        previous.name,
                        anchor.name,
                        position + 1,
                        n
                    )));
                }
            }
            placed.push((position, *anchor));
        }

        let mut columns = vec![[0.0; HOURS_PER_DAY]; n];
        for pair in placed.windows(2) {
            let (left_pos, left) = pair[0];
            let (right_pos, right) = pair[1];
            let span = (right_pos - left_pos) as f64;

            columns[left_pos] = left.values;
            for column in (left_pos + 1)..right_pos {
                let t = (column - left_pos) as f64 / span;
                for hour in 0..HOURS_PER_DAY {
                    let a = left.values[hour];
                    let b = right.values[hour];
                    columns[column][hour] = a + t * (b - a);
                }
            }
            columns[right_pos] = right.values;
        }

        let anchor_columns = placed
            .iter()
            .map(|(pos, anchor)| (anchor.name.clone(), *pos as u32 + 1))
            .collect();

        Ok(ShapeCurve {
            columns,
            anchor_columns,
        })
    }

    fn cumulative_fractions(anchors: &[&ShapeAnchor]) -> Vec<f64> {
        let distances: Vec<f64> = anchors
            .windows(2)
            .map(|pair| pair[0].l1_distance(pair[1]))
            .collect();
        let total: f64 = distances.iter().sum();
        let segments = distances.len() as f64;

        let mut fractions = Vec::with_capacity(anchors.len());
        fractions.push(0.0);
        let mut running = 0.0;
        for (idx, distance) in distances.iter().enumerate() {
            running += distance;
            if idx + 1 == distances.len() {
                fractions.push(1.0);
            } else if total > 0.0 {
                fractions.push(running / total);
            } else {
                fractions.push((idx + 1) as f64 / segments);
            }
        }
        fractions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(name: &str, value: f64) -> ShapeAnchor {
        ShapeAnchor::new(name, &[value; HOURS_PER_DAY]).unwrap()
    }

    #[test]
    fn test_identical_anchors_stay_flat() {
        let anchors = AnchorSet {
            base: flat("base", 1.0),
            average: flat("average", 1.0),
            duck_curve: flat("duck_curve", 1.0),
            canyon_curve: flat("canyon_curve", 1.0),
        };
        let curve = ShapeCurveInterpolator::new(anchors).interpolate(6).unwrap();

        assert_eq!(curve.scenario_count(), 6);
        for id in 1..=6 {
            assert!(curve.column(id).unwrap().iter().all(|v| *v == 1.0));
        }
    }

    #[test]
    fn test_end_columns_are_exact_anchors() {
        let anchors = AnchorSet::canonical();
        for n in [4, 6, 12, 30, 101] {
            let curve = ShapeCurveInterpolator::new(anchors.clone()).interpolate(n).unwrap();
            assert_eq!(curve.column(1).unwrap(), &anchors.base.values);
            assert_eq!(curve.column(n as u32).unwrap(), &anchors.canyon_curve.values);
            assert!(curve.column(0).is_none());
            assert!(curve.column(n as u32 + 1).is_none());
        }
    }

    #[test]
    fn test_interior_columns_are_convex() {
        let curve = ShapeCurveInterpolator::new(AnchorSet::canonical())
            .interpolate(30)
            .unwrap();
        let anchor_columns: Vec<u32> = curve.anchor_columns().iter().map(|(_, c)| *c).collect();
        assert_eq!(anchor_columns.len(), 4);

        for pair in anchor_columns.windows(2) {
            let left = curve.column(pair[0]).unwrap();
            let right = curve.column(pair[1]).unwrap();
            for id in (pair[0] + 1)..pair[1] {
                let column = curve.column(id).unwrap();
                for hour in 0..HOURS_PER_DAY {
                    let lo = left[hour].min(right[hour]);
                    let hi = left[hour].max(right[hour]);
                    assert!(column[hour] >= lo - 1e-12 && column[hour] <= hi + 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_anchor_positions_follow_distance() {
        let anchors = AnchorSet::canonical();
        let n = 41;
        let curve = ShapeCurveInterpolator::new(anchors.clone()).interpolate(n).unwrap();

        let d1 = anchors.base.l1_distance(&anchors.average);
        let d2 = anchors.average.l1_distance(&anchors.duck_curve);
        let d3 = anchors.duck_curve.l1_distance(&anchors.canyon_curve);
        let total = d1 + d2 + d3;
        let expected = [
            1,
            round_half_down(d1 / total * 40.0) as u32 + 1,
            round_half_down((d1 + d2) / total * 40.0) as u32 + 1,
            41,
        ];
        let got: Vec<u32> = curve.anchor_columns().iter().map(|(_, c)| *c).collect();
        assert_eq!(got, expected);
        assert_eq!(curve.column(expected[1]).unwrap(), &anchors.average.values);
        assert_eq!(curve.column(expected[2]).unwrap(), &anchors.duck_curve.values);
    }

    #[test]
    fn test_rejects_too_few_columns() {
        let result = ShapeCurveInterpolator::new(AnchorSet::canonical()).interpolate(3);
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn test_rejects_colliding_anchors() {
        let mut near_base = [1.0; HOURS_PER_DAY];
        near_base[0] = 1.01;
        let anchors = AnchorSet {
            base: flat("base", 1.0),
            average: ShapeAnchor::new("average", &near_base).unwrap(),
            duck_curve: flat("duck_curve", 5.0),
            canyon_curve: flat("canyon_curve", 9.0),
        };
        let result = ShapeCurveInterpolator::new(anchors).interpolate(4);
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn test_identical_neighbours_merge() {
        let anchors = AnchorSet {
            base: flat("base", 1.0),
            average: flat("average", 1.0),
            duck_curve: flat("duck_curve", 2.0),
            canyon_curve: flat("canyon_curve", 3.0),
        };
        let curve = ShapeCurveInterpolator::new(anchors).interpolate(5).unwrap();
        assert_eq!(curve.anchor_columns().len(), 3);
        assert_eq!(curve.value(0, 3), Some(2.0));
        assert_eq!(curve.value(0, 2), Some(1.5));
    }

    #[test]
    fn test_rounding_ties_go_low() {
        assert_eq!(round_half_down(2.5), 2);
        assert_eq!(round_half_down(2.500001), 3);
        assert_eq!(round_half_down(2.4), 2);
        assert_eq!(round_half_down(0.0), 0);
        assert_eq!(round_half_down(0.5), 0);
    }

    #[test]
    fn test_invalid_anchor_values() {
        assert!(ShapeAnchor::new("short", &[1.0; 23]).is_err());
        let mut negative = [1.0; HOURS_PER_DAY];
        negative[5] = -0.1;
        assert!(ShapeAnchor::new("negative", &negative).is_err());
        assert!(AnchorSet::canonical().with_average(&[f64::NAN; 24]).is_err());
    }

    #[test]
    fn test_profile_table_layout() {
        let curve = ShapeCurveInterpolator::new(AnchorSet::canonical())
            .interpolate(6)
            .unwrap();
        let profiles = curve.to_profiles();
        assert_eq!(profiles.len(), 6 * HOURS_PER_DAY);
        assert_eq!(profiles[0].simulated_scenario_id, 1);
        assert_eq!(profiles.last().unwrap().simulated_scenario_id, 6);
        assert_eq!(profiles.last().unwrap().hour, 23);
        assert_eq!(profiles[HOURS_PER_DAY + 12].factor, curve.value(12, 2).unwrap());
    }
}
