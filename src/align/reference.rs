// Reference station selection
// Picks the station whose predicted arrival sits closest to the array midpoint

use crate::error::{PickingError, PickingResult};
use crate::pipeline::config::ReferenceConfig;

/// Index of the candidate closest to `(max + min) / 2`.
///
/// `candidates` are absolute arrival times on any common scale (e.g. epoch
/// seconds). Ties resolve to the first index in scan order.
pub fn select_reference(candidates: &[f64], config: &ReferenceConfig) -> PickingResult<usize> {
    let required = config.min_stations.max(1);
    if candidates.len() < required {
        return Err(PickingError::InsufficientStations {
            found: candidates.len(),
            required,
        });
    }

    let (min, max) = candidates
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &t| {
            (lo.min(t), hi.max(t))
        });
    let mid = 0.5 * (max + min);

    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (index, &t) in candidates.iter().enumerate() {
        let distance = (t - mid).abs();
        // Strict comparison keeps the first of equally close candidates
        if distance < best_distance {
            best = index;
            best_distance = distance;
        }
    }

    log::debug!(
        "Reference index {} (arrival spread {:.3} s, midpoint offset {:.3} s)",
        best,
        max - min,
        best_distance
    );
    Ok(best)
}
