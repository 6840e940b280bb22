// Travel-time models
// Phase arrival times from source depth and epicentral distance

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{PickingError, PickingResult};

/// Source of modelled phase arrival times
pub trait TravelTimeModel: Send + Sync {
    /// Travel time in seconds of `phase` for a source at `depth_km` observed
    /// at `distance_deg`. Returns the phase name actually used.
    fn travel_time(
        &self,
        depth_km: f64,
        distance_deg: f64,
        phase: &str,
    ) -> PickingResult<(String, f64)>;
}

/// Tabulated travel times for one phase on a depth x distance grid,
/// bilinearly interpolated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelTimeTable {
    pub phase: String,
    /// Source depths in km, strictly increasing
    pub depths: Vec<f64>,
    /// Epicentral distances in degrees, strictly increasing
    pub distances: Vec<f64>,
    /// `times[depth][distance]` in seconds
    pub times: Vec<Vec<f64>>,
}

impl TravelTimeTable {
    pub fn from_file(path: &Path) -> PickingResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let table: TravelTimeTable = serde_json::from_str(&contents)?;
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> PickingResult<()> {
        let increasing = |axis: &[f64]| axis.windows(2).all(|w| w[0] < w[1]);
        if self.depths.is_empty() || self.distances.is_empty() {
            return Err(PickingError::InvalidConfig(
                "travel-time table has an empty axis".to_string(),
            ));
        }
        if !increasing(&self.depths) || !increasing(&self.distances) {
            return Err(PickingError::InvalidConfig(
                "travel-time table axes must be strictly increasing".to_string(),
            ));
        }
        if self.times.len() != self.depths.len()
            || self.times.iter().any(|row| row.len() != self.distances.len())
        {
            return Err(PickingError::InvalidConfig(format!(
                "travel-time table must be {} x {}",
                self.depths.len(),
                self.distances.len()
            )));
        }
        Ok(())
    }
}

impl TravelTimeModel for TravelTimeTable {
    fn travel_time(
        &self,
        depth_km: f64,
        distance_deg: f64,
        phase: &str,
    ) -> PickingResult<(String, f64)> {
        if phase != self.phase {
            return Err(PickingError::TravelTime(format!(
                "table holds {} times, {} requested",
                self.phase, phase
            )));
        }
        let (i, u) = bracket(&self.depths, depth_km).ok_or_else(|| {
            PickingError::TravelTime(format!("depth {} km outside table", depth_km))
        })?;
        let (j, v) = bracket(&self.distances, distance_deg).ok_or_else(|| {
            PickingError::TravelTime(format!("distance {} deg outside table", distance_deg))
        })?;

        let at = |a: usize, b: usize| self.times[a][b];
        let i1 = (i + 1).min(self.depths.len() - 1);
        let j1 = (j + 1).min(self.distances.len() - 1);
        let time = (1.0 - u) * (1.0 - v) * at(i, j)
            + (1.0 - u) * v * at(i, j1)
            + u * (1.0 - v) * at(i1, j)
            + u * v * at(i1, j1);

        Ok((self.phase.clone(), time))
    }
}

/// Lower grid index and fractional position of `x` on `axis`
fn bracket(axis: &[f64], x: f64) -> Option<(usize, f64)> {
    let first = *axis.first()?;
    let last = *axis.last()?;
    if !x.is_finite() || x < first || x > last {
        return None;
    }
    if axis.len() == 1 {
        return Some((0, 0.0));
    }
    let i = axis
        .windows(2)
        .position(|w| x <= w[1])
        .unwrap_or(axis.len() - 2);
    Some((i, (x - axis[i]) / (axis[i + 1] - axis[i])))
}
