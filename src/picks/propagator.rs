// Pick propagation
// Carries the reference station's pick to every other station through the refined time corrections

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use crate::error::{PickingError, PickingResult};
use crate::pipeline::config::{PropagationConfig, ReferencePickSource};
use crate::stacking::timing::{RefinedTiming, TimingRow};
use crate::time::{add_seconds, seconds_between};
use crate::trace::record::TraceRecord;
use crate::trace::sac;
use crate::trace::store::TraceStore;

/// A station whose persisted trace received a new pick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdatedPick {
    pub station: String,
    pub path: PathBuf,
    /// Absolute time of the corrected pick
    pub pick_time: DateTime<Utc>,
    /// The same pick relative to the trace's reference instant, as stored
    pub pick: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedStation {
    pub station: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PropagationReport {
    pub event_id: String,
    pub reference_station: String,
    pub reference_pick: DateTime<Utc>,
    pub updated: Vec<UpdatedPick>,
    pub skipped: Vec<SkippedStation>,
}

/// Absolute corrected pick for `station`.
///
/// Removes the reference row's own correction from the reference pick and
/// applies the station's: `ref_pick + ref.initial + ref.final - final + initial`.
pub fn corrected_pick(
    reference_pick: DateTime<Utc>,
    reference: &TimingRow,
    station: &TimingRow,
) -> DateTime<Utc> {
    add_seconds(
        reference_pick,
        reference.initial_correction + reference.final_correction - station.final_correction
            + station.initial_correction,
    )
}

/// Corrected picks for every non-reference row, in table order.
/// Repeated station rows keep only their first occurrence.
pub fn compute_picks(
    timing: &RefinedTiming,
    reference_station: &str,
    reference_pick: DateTime<Utc>,
    event_id: &str,
) -> PickingResult<Vec<(String, DateTime<Utc>)>> {
    let reference_row =
        timing
            .row(reference_station)
            .ok_or_else(|| PickingError::ReferenceStationNotFound {
                event_id: event_id.to_string(),
                station: Some(reference_station.to_string()),
            })?;

    let mut picks: Vec<(String, DateTime<Utc>)> = Vec::new();
    for row in &timing.rows {
        if row.station == reference_station || picks.iter().any(|(s, _)| *s == row.station) {
            continue;
        }
        picks.push((
            row.station.clone(),
            corrected_pick(reference_pick, reference_row, row),
        ));
    }
    Ok(picks)
}

pub struct PickPropagator {
    config: PropagationConfig,
}

impl PickPropagator {
    pub fn new(config: PropagationConfig) -> Self {
        PickPropagator { config }
    }

    /// Absolute reference pick according to the configured source
    pub fn reference_pick(&self, reference: &TraceRecord) -> PickingResult<DateTime<Utc>> {
        match (reference.pick, self.config.reference_pick) {
            (Some(pick), _) => Ok(add_seconds(reference.reference_time, pick)),
            (None, ReferencePickSource::PickOrPredicted) => reference.predicted_arrival_time(),
            (None, ReferencePickSource::Pick) => Err(PickingError::MissingReferencePick {
                station: reference.station.clone(),
            }),
        }
    }

    /// Write corrected picks into the persisted waveforms of `event_id`.
    ///
    /// The reference trace is the unique `<id>.<eventId>.sac` file in the
    /// reference directory. Stations without exactly one waveform file are
    /// skipped; the reference station's own waveform is left untouched.
    pub fn propagate(
        &self,
        timing: &RefinedTiming,
        event_id: &str,
        store: &TraceStore,
    ) -> PickingResult<PropagationReport> {
        let reference_path = store.find_reference(event_id)?;
        let reference = sac::read(&reference_path)?;
        let reference_pick = self.reference_pick(&reference)?;
        let picks = compute_picks(timing, &reference.station, reference_pick, event_id)?;

        let mut updated = Vec::new();
        let mut skipped = Vec::new();
        for (station, pick_time) in picks {
            let mut files = store.find_station_waveforms(event_id, &station)?;
            if files.len() != 1 {
                let reason = format!("{} matching waveform files", files.len());
                log::warn!("Skipping pick for station {}: {}", station, reason);
                skipped.push(SkippedStation { station, reason });
                continue;
            }

            let path = files.remove(0);
            let mut record = sac::read(&path)?;
            let pick = seconds_between(pick_time, record.reference_time);
            record.pick = Some(pick);
            sac::write(&path, &record)?;

            log::debug!("{}: pick {:.3} s", station, pick);
            updated.push(UpdatedPick {
                station,
                path,
                pick_time,
                pick,
            });
        }

        log::info!(
            "Propagated reference pick of {} to {} stations for event {} ({} skipped)",
            reference.station,
            updated.len(),
            event_id,
            skipped.len()
        );

        Ok(PropagationReport {
            event_id: event_id.to_string(),
            reference_station: reference.station,
            reference_pick,
            updated,
            skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::PathsConfig;
    use crate::time::from_day_of_year;
    use tempfile::TempDir;

    const EVENT: &str = "20040220055845";

    fn row(station: &str, final_correction: f64, initial_correction: f64) -> TimingRow {
        TimingRow {
            station: station.to_string(),
            final_correction,
            initial_correction,
        }
    }

    fn record(station: &str, reference_offset: f64) -> TraceRecord {
        let origin = from_day_of_year(2004, 51, 5, 58, 45, 0).unwrap();
        let mut record = TraceRecord::new(
            station,
            add_seconds(origin, -reference_offset),
            0.025,
            vec![0.0; 16],
        );
        record.network = "XX".to_string();
        record.channel = "BHZ".to_string();
        record.origin_offset = reference_offset;
        record.predicted_arrival = Some(600.0);
        record
    }

    fn store_with(temp_dir: &TempDir, stations: &[(&str, f64)]) -> TraceStore {
        let store = TraceStore::new(&PathsConfig {
            root: temp_dir.path().to_string_lossy().to_string(),
            ..PathsConfig::default()
        });
        for (station, offset) in stations {
            let record = record(station, *offset);
            store
                .write_waveform(EVENT, &format!("{}.sac", record.id()), &record)
                .unwrap();
        }
        store
    }

    #[test]
    fn test_corrected_pick_formula() {
        let reference_pick = from_day_of_year(2004, 51, 6, 8, 45, 0).unwrap();
        let pick = corrected_pick(reference_pick, &row("REF", 0.2, 0.5), &row("S1", -0.3, 1.0));
        // 0.5 + 0.2 + 0.3 + 1.0
        assert!((seconds_between(pick, reference_pick) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_compute_picks_skips_reference_and_duplicates() {
        let timing = RefinedTiming {
            rows: vec![
                row("S1", 0.1, 0.0),
                row("REF", 0.0, 0.0),
                row("S1", 5.0, 5.0),
                row("S2", 0.0, 0.25),
            ],
        };
        let reference_pick = from_day_of_year(2004, 51, 6, 8, 45, 0).unwrap();
        let picks = compute_picks(&timing, "REF", reference_pick, EVENT).unwrap();

        assert_eq!(picks.len(), 2);
        assert_eq!(picks[0].0, "S1");
        assert!((seconds_between(picks[0].1, reference_pick) + 0.1).abs() < 1e-9);
        assert!((seconds_between(picks[1].1, reference_pick) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_reference_row_missing() {
        let timing = RefinedTiming {
            rows: vec![row("S1", 0.0, 0.0)],
        };
        let reference_pick = from_day_of_year(2004, 51, 6, 8, 45, 0).unwrap();
        assert!(matches!(
            compute_picks(&timing, "REF", reference_pick, EVENT),
            Err(PickingError::ReferenceStationNotFound { station: Some(_), .. })
        ));
    }

    #[test]
    fn test_missing_reference_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with(&temp_dir, &[("S1", 0.0)]);
        let propagator = PickPropagator::new(PropagationConfig::default());
        let timing = RefinedTiming {
            rows: vec![row("S1", 0.0, 0.0)],
        };

        assert!(matches!(
            propagator.propagate(&timing, EVENT, &store),
            Err(PickingError::ReferenceStationNotFound { station: None, .. })
        ));
    }

    #[test]
    fn test_reference_pick_source() {
        let mut reference = record("REF", 0.0);
        let strict = PickPropagator::new(PropagationConfig::default());
        assert!(matches!(
            strict.reference_pick(&reference),
            Err(PickingError::MissingReferencePick { .. })
        ));

        let lenient = PickPropagator::new(PropagationConfig {
            reference_pick: ReferencePickSource::PickOrPredicted,
            ..PropagationConfig::default()
        });
        let predicted = lenient.reference_pick(&reference).unwrap();
        assert_eq!(predicted, reference.predicted_arrival_time().unwrap());

        reference.pick = Some(601.5);
        let picked = lenient.reference_pick(&reference).unwrap();
        assert!((seconds_between(picked, predicted) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_propagate_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with(&temp_dir, &[("REF", 0.0), ("S1", 12.0), ("S2", -3.0)]);

        let mut reference = record("REF", 0.0);
        reference.pick = Some(601.25);
        store.write_reference(EVENT, &reference).unwrap();

        let timing = RefinedTiming {
            rows: vec![
                row("REF", 0.1, 0.2),
                row("S1", 0.5, -0.25),
                row("S2", 0.0, 0.0),
                row("GONE", 0.0, 0.0),
            ],
        };
        let propagator = PickPropagator::new(PropagationConfig::default());
        let first = propagator.propagate(&timing, EVENT, &store).unwrap();
        let second = propagator.propagate(&timing, EVENT, &store).unwrap();

        assert_eq!(first.reference_station, "REF");
        assert_eq!(first.updated.len(), 2);
        assert_eq!(first.skipped.len(), 1);
        assert_eq!(first.skipped[0].station, "GONE");
        assert_eq!(first.updated, second.updated);

        // S1 is 12 s behind the origin on its own clock: 601.25 + 0.3 - 0.75 + 12
        let s1 = sac::read(&first.updated[0].path).unwrap();
        assert!((s1.pick.unwrap() - 612.8).abs() < 1e-3);

        // Reference waveform keeps no propagated pick
        let ref_files = store.find_station_waveforms(EVENT, "REF").unwrap();
        assert_eq!(sac::read(&ref_files[0]).unwrap().pick, None);
    }
}
