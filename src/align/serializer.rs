// Alignment serializer
// Puts every station window on the reference station's clock and builds the container

use std::path::PathBuf;

use crate::align::container::{AlignmentContainer, ContainerHeader, StationBlock};
use crate::align::shift::fractional_shift;
use crate::error::{PickingError, PickingResult};
use crate::pipeline::config::AlignmentConfig;
use crate::time::{add_seconds, seconds_between};
use crate::trace::record::{peak_normalize, TraceRecord};
use crate::trace::store::TraceStore;

/// Files written for one aligned event
#[derive(Debug, Clone)]
pub struct AlignedEvent {
    pub event_id: String,
    pub container: AlignmentContainer,
    pub container_path: PathBuf,
    /// Untouched copy of the reference trace, used later for pick propagation
    pub reference_path: PathBuf,
    pub reference_station: String,
}

pub struct AlignmentSerializer {
    config: AlignmentConfig,
}

impl AlignmentSerializer {
    pub fn new(config: AlignmentConfig) -> Self {
        AlignmentSerializer { config }
    }

    /// Container file name for an event, `<prefix><eventId>.aq`
    pub fn container_name(&self, event_id: &str) -> String {
        format!("{}{}.aq", self.config.container_prefix, event_id)
    }

    /// Build the container for `traces` aligned on `traces[reference_index]`.
    ///
    /// Every station keeps `[arrival - lead, arrival + lead]` around its own
    /// predicted arrival, is peak-normalized, then resampled so that sample
    /// `k` of every block falls at `t1 + k * delta`, where `t1` is the
    /// reference arrival minus the lead.
    pub fn serialize(
        &self,
        traces: &[TraceRecord],
        reference_index: usize,
    ) -> PickingResult<AlignmentContainer> {
        let reference = traces.get(reference_index).ok_or(PickingError::InsufficientStations {
            found: traces.len(),
            required: reference_index + 1,
        })?;
        reference.validate()?;

        let lead = self.config.window_lead;
        let delta = reference.delta;
        let reference_arrival = reference.predicted_arrival_time()?;
        let start = add_seconds(reference_arrival, -lead);
        let reference_delta = seconds_between(start, reference.origin_time());
        let sample_count = (2.0 * lead / delta).round() as usize + 1;

        let header = ContainerHeader {
            event_latitude: reference.require(reference.event_latitude, "event_latitude")?,
            event_longitude: reference.require(reference.event_longitude, "event_longitude")?,
            event_depth: reference.require(reference.event_depth, "event_depth")?,
            start,
            reference_delta,
            sample_interval: delta,
            phase: reference
                .phase
                .clone()
                .ok_or_else(|| PickingError::MissingHeader {
                    station: reference.station.clone(),
                    field: "phase",
                })?,
        };

        let mut blocks = Vec::with_capacity(traces.len());
        for trace in traces {
            if (trace.delta - delta).abs() > 1e-9 * delta {
                return Err(PickingError::InconsistentSampling {
                    station: trace.station.clone(),
                    delta: trace.delta,
                    expected: delta,
                });
            }

            let arrival = trace.predicted_arrival_time()?;
            let tshift = seconds_between(arrival, reference_arrival);

            let (_, window_start) = trace.snap_to_grid(add_seconds(arrival, -lead));
            let mut window = trace.window_len(window_start, sample_count);
            peak_normalize(&mut window);

            // Nominally -tshift/delta; the snapping residual of the window start is folded in
            let offset = seconds_between(start, window_start) / delta;
            let samples = fractional_shift(&window, offset)?;

            log::debug!(
                "{}: tshift {:.4} s, shift {:.3} samples",
                trace.station,
                tshift,
                offset
            );

            blocks.push(StationBlock {
                quality_flag: if trace.auxiliary_pick.is_some() { 0 } else { 1 },
                tshift,
                station: trace.station.clone(),
                samples,
            });
        }

        Ok(AlignmentContainer { header, blocks })
    }

    /// Serialize, write the container and persist the reference trace.
    ///
    /// Both files are named after `event_id`, the directory the traces were
    /// loaded from, so later stages find them under the same id.
    pub fn write(
        &self,
        traces: &[TraceRecord],
        reference_index: usize,
        event_id: &str,
        store: &TraceStore,
    ) -> PickingResult<AlignedEvent> {
        let container = self.serialize(traces, reference_index)?;
        let reference = &traces[reference_index];
        let event_id = event_id.to_string();

        let container_path = store.containers_dir()?.join(self.container_name(&event_id));
        container.write(&container_path)?;
        let reference_path = store.write_reference(&event_id, reference)?;

        log::info!(
            "Aligned {} stations for event {} on reference {} -> {}",
            container.station_count(),
            event_id,
            reference.station,
            container_path.display()
        );

        Ok(AlignedEvent {
            event_id,
            container,
            container_path,
            reference_path,
            reference_station: reference.station.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::shift::peak_index;
    use crate::pipeline::config::PathsConfig;
    use crate::time::{from_calendar, from_day_of_year};
    use tempfile::TempDir;

    const DELTA: f64 = 0.05;

    /// Station whose record holds a pulse at `pulse_at` seconds after its origin,
    /// with a modelled arrival at `predicted` seconds after origin.
    fn station(name: &str, reference_offset: f64, predicted: f64, pulse_at: f64) -> TraceRecord {
        let origin = from_day_of_year(2004, 51, 5, 58, 45, 0).unwrap();
        station_from(origin, name, reference_offset, predicted, pulse_at)
    }

    fn station_from(
        origin: chrono::DateTime<chrono::Utc>,
        name: &str,
        reference_offset: f64,
        predicted: f64,
        pulse_at: f64,
    ) -> TraceRecord {
        // Each station gets its own reference instant; origin offset compensates
        let reference = add_seconds(origin, -reference_offset);
        let begin = predicted + reference_offset - 100.0;
        let samples = (0..4000)
            .map(|i| {
                let t = begin + i as f64 * DELTA - reference_offset;
                let x = (t - pulse_at) / 0.4;
                (-0.5 * x * x).exp()
            })
            .collect();

        let mut record = TraceRecord::new(name, reference, DELTA, samples);
        record.begin = begin;
        record.origin_offset = reference_offset;
        record.predicted_arrival = Some(predicted);
        record.event_latitude = Some(-6.1);
        record.event_longitude = Some(130.4);
        record.event_depth = Some(35.0);
        record.phase = Some("P".to_string());
        record
    }

    #[test]
    fn test_tshift_bookkeeping() {
        let traces = vec![
            station("A", 0.0, 600.0, 600.0),
            station("B", 12.34, 602.5, 600.0),
            station("C", -7.0, 597.25, 600.0),
        ];
        let serializer = AlignmentSerializer::new(AlignmentConfig::default());
        let container = serializer.serialize(&traces, 0).unwrap();

        let reference_arrival = traces[0].predicted_arrival_time().unwrap();
        for (trace, block) in traces.iter().zip(container.blocks.iter()) {
            let arrival = trace.predicted_arrival_time().unwrap();
            let recovered = add_seconds(arrival, -block.tshift);
            assert!(seconds_between(recovered, reference_arrival).abs() < DELTA);
        }
        assert!((container.blocks[1].tshift - 2.5).abs() < 1e-6);
        assert!((container.blocks[2].tshift + 2.75).abs() < 1e-6);
    }

    #[test]
    fn test_header_fields() {
        let traces = vec![station("A", 0.0, 600.0, 600.0), station("B", 3.0, 601.0, 600.0)];
        let serializer = AlignmentSerializer::new(AlignmentConfig::default());
        let container = serializer.serialize(&traces, 1).unwrap();

        // start = reference arrival - 30 s, measured from the origin
        assert!((container.header.reference_delta - 571.0).abs() < 1e-6);
        assert_eq!(container.header.sample_interval, DELTA);
        assert_eq!(container.header.phase, "P");
        assert_eq!(container.blocks.len(), 2);
        assert!(container.blocks.iter().all(|b| b.samples.len() == 1201));
        assert!(container.blocks.iter().all(|b| b.quality_flag == 1));
        assert_eq!(container.event_id(), "20040220055845");
    }

    #[test]
    fn test_common_arrival_lands_on_same_sample() {
        // True arrival at 600 s everywhere, predictions off by up to +-5 s
        let traces: Vec<TraceRecord> = (0..5)
            .map(|i| {
                let error = -5.0 + 2.5 * i as f64;
                station(&format!("S{}", i), 1.5 * i as f64, 600.0 + error, 600.0)
            })
            .collect();
        let serializer = AlignmentSerializer::new(AlignmentConfig::default());
        let container = serializer.serialize(&traces, 2).unwrap();

        let peaks: Vec<usize> = container
            .blocks
            .iter()
            .map(|b| peak_index(&b.samples).unwrap())
            .collect();
        // Reference prediction is exact, so the pulse sits at the window center
        for peak in &peaks {
            assert!((*peak as i64 - 600).abs() <= 1, "peaks = {:?}", peaks);
        }
        for block in &container.blocks {
            let peak = block.samples.iter().fold(0.0f64, |a, s| a.max(s.abs()));
            assert!((peak - 1.0).abs() < 0.05);
        }
    }

    #[test]
    fn test_window_start_on_previous_year() {
        // Origin 23:50:00 on Dec 31, reference arrival 00:00:10 on Jan 1,
        // so the window opens at 23:59:40 of the old year
        let origin = from_calendar(2003, 12, 31, 23, 50, 0.0).unwrap();
        let traces = vec![
            station_from(origin, "A", 0.0, 612.5, 610.0),
            station_from(origin, "R", 4.25, 610.0, 610.0),
            station_from(origin, "C", -2.5, 607.75, 610.0),
        ];
        let serializer = AlignmentSerializer::new(AlignmentConfig::default());
        let container = serializer.serialize(&traces, 1).unwrap();

        let text = container.to_text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[2], "2003\t12\t31");
        let time_line: Vec<&str> = lines[3].split('\t').collect();
        assert_eq!(&time_line[..3], &["23", "59", "40.000000"]);
        assert!((time_line[3].parse::<f64>().unwrap() - 580.0).abs() < 1e-6);
        assert!((container.header.reference_delta - 580.0).abs() < 1e-9);

        // tt_i - tshift_i = tt_ref across the boundary
        let reference_arrival = traces[1].predicted_arrival_time().unwrap();
        let expected = [2.5, 0.0, -2.25];
        for ((trace, block), tshift) in traces.iter().zip(&container.blocks).zip(expected) {
            assert!((block.tshift - tshift).abs() < 1e-6, "{}: {}", block.station, block.tshift);
            let arrival = trace.predicted_arrival_time().unwrap();
            assert!(seconds_between(add_seconds(arrival, -block.tshift), reference_arrival).abs() < 1e-6);
            let peak = peak_index(&block.samples).unwrap() as i64;
            assert!((peak - 600).abs() <= 1, "{} peaks at {}", block.station, peak);
        }

        let reread = AlignmentContainer::parse(&text).unwrap();
        assert_eq!(reread.header.start, container.header.start);
        assert_eq!(reread.event_id(), "20031231235000");
        assert_eq!(container.event_id(), "20031231235000");
    }

    #[test]
    fn test_auxiliary_pick_sets_quality_flag() {
        let mut picked = station("A", 0.0, 600.0, 600.0);
        picked.auxiliary_pick = Some(601.0);
        let traces = vec![picked, station("B", 0.0, 600.0, 600.0)];

        let serializer = AlignmentSerializer::new(AlignmentConfig::default());
        let container = serializer.serialize(&traces, 0).unwrap();
        assert_eq!(container.blocks[0].quality_flag, 0);
        assert_eq!(container.blocks[1].quality_flag, 1);
    }

    #[test]
    fn test_mixed_sampling_rejected() {
        let mut odd = station("B", 0.0, 600.0, 600.0);
        odd.delta = 0.025;
        let traces = vec![station("A", 0.0, 600.0, 600.0), odd];

        let serializer = AlignmentSerializer::new(AlignmentConfig::default());
        assert!(matches!(
            serializer.serialize(&traces, 0),
            Err(PickingError::InconsistentSampling { .. })
        ));
    }

    #[test]
    fn test_partial_coverage_is_zero_filled() {
        // Record ends 5 s after the arrival, the window extends 30 s past it
        let mut short = station("B", 0.0, 600.0, 600.0);
        short.samples.truncate(2100);
        let traces = vec![station("A", 0.0, 600.0, 600.0), short];

        let serializer = AlignmentSerializer::new(AlignmentConfig::default());
        let container = serializer.serialize(&traces, 0).unwrap();
        let block = &container.blocks[1];
        assert_eq!(block.samples.len(), 1201);
        assert_eq!(peak_index(&block.samples), Some(600));
        assert!(block.samples[705..].iter().all(|s| s.abs() < 1e-6));
    }

    #[test]
    fn test_write_persists_container_and_reference() {
        let temp_dir = TempDir::new().unwrap();
        let store = TraceStore::new(&PathsConfig {
            root: temp_dir.path().to_string_lossy().to_string(),
            ..PathsConfig::default()
        });
        let traces = vec![station("A", 0.0, 600.0, 600.0), station("B", 0.0, 601.0, 600.0)];

        let serializer = AlignmentSerializer::new(AlignmentConfig::default());
        let aligned = serializer.write(&traces, 1, "20040220055845", &store).unwrap();

        assert_eq!(aligned.event_id, "20040220055845");
        assert!(aligned.container_path.ends_with("rts20040220055845.aq"));
        assert_eq!(aligned.reference_station, "B");
        assert_eq!(store.find_reference("20040220055845").unwrap(), aligned.reference_path);

        let reread = AlignmentContainer::read(&aligned.container_path).unwrap();
        assert_eq!(reread.station_count(), 2);
        assert_eq!(reread.blocks[1].tshift, aligned.container.blocks[1].tshift);
    }
}
