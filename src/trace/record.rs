// Trace record
// In-memory representation of one station's evenly sampled seismogram plus timing metadata

use chrono::{DateTime, Timelike, Utc};

use crate::error::{PickingError, PickingResult};
use crate::time::{self, add_seconds, seconds_between};

#[derive(Debug, Clone, PartialEq)]
pub struct TraceRecord {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,

    /// Header reference instant; all relative times below are seconds from it
    pub reference_time: DateTime<Utc>,

    /// Offset of sample 0 from the reference instant
    pub begin: f64,

    /// Sample interval in seconds
    pub delta: f64,

    pub samples: Vec<f64>,

    /// Seconds from the reference instant to the event origin
    pub origin_offset: f64,

    pub event_latitude: Option<f64>,
    pub event_longitude: Option<f64>,
    /// Event depth in km once the trace has been prepared
    pub event_depth: Option<f64>,
    pub station_latitude: Option<f64>,
    pub station_longitude: Option<f64>,
    /// Epicentral distance in degrees
    pub distance: Option<f64>,

    /// Seconds from the event origin to the modelled phase arrival
    pub predicted_arrival: Option<f64>,
    pub phase: Option<String>,
    pub snr: Option<f64>,

    /// Refined (or analyst) pick, seconds from the reference instant
    pub pick: Option<f64>,

    /// Pick already present upstream; its presence drives the container quality flag
    pub auxiliary_pick: Option<f64>,
}

impl TraceRecord {
    /// Create a record with the given samples and no event metadata
    pub fn new(
        station: impl Into<String>,
        reference_time: DateTime<Utc>,
        delta: f64,
        samples: Vec<f64>,
    ) -> Self {
        TraceRecord {
            network: String::new(),
            station: station.into(),
            location: String::new(),
            channel: String::new(),
            reference_time,
            begin: 0.0,
            delta,
            samples,
            origin_offset: 0.0,
            event_latitude: None,
            event_longitude: None,
            event_depth: None,
            station_latitude: None,
            station_longitude: None,
            distance: None,
            predicted_arrival: None,
            phase: None,
            snr: None,
            pick: None,
            auxiliary_pick: None,
        }
    }

    /// `NET.STA.LOC.CHA` identifier used in file names
    pub fn id(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }

    /// Absolute time of sample 0
    pub fn start_time(&self) -> DateTime<Utc> {
        add_seconds(self.reference_time, self.begin)
    }

    /// Absolute time of the last sample
    pub fn end_time(&self) -> DateTime<Utc> {
        let span = self.samples.len().saturating_sub(1) as f64 * self.delta;
        add_seconds(self.start_time(), span)
    }

    pub fn sampling_rate(&self) -> f64 {
        1.0 / self.delta
    }

    pub fn origin_time(&self) -> DateTime<Utc> {
        add_seconds(self.reference_time, self.origin_offset)
    }

    /// Event identifier derived from the reference instant (whole seconds) plus origin offset
    pub fn event_id(&self) -> String {
        let whole = self
            .reference_time
            .with_nanosecond(0)
            .unwrap_or(self.reference_time);
        time::event_id(add_seconds(whole, self.origin_offset))
    }

    /// Absolute time of the modelled phase arrival
    pub fn predicted_arrival_time(&self) -> PickingResult<DateTime<Utc>> {
        let predicted = self.require(self.predicted_arrival, "predicted_arrival")?;
        Ok(add_seconds(self.origin_time(), predicted))
    }

    /// Fetch an optional header value or report which one is missing
    pub fn require(&self, value: Option<f64>, field: &'static str) -> PickingResult<f64> {
        value.ok_or_else(|| PickingError::MissingHeader {
            station: self.station.clone(),
            field,
        })
    }

    /// Check the sampling invariants every stage relies on
    pub fn validate(&self) -> PickingResult<()> {
        if !(self.delta.is_finite() && self.delta > 0.0) {
            return Err(PickingError::MissingHeader {
                station: self.station.clone(),
                field: "delta",
            });
        }
        Ok(())
    }

    /// Samples covering `[start, end]` on this trace's own sample grid,
    /// snapped to the nearest sample and zero-filled outside the record
    pub fn window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<f64> {
        let (first, _) = self.snap_to_grid(start);
        let (last, _) = self.snap_to_grid(end);
        if last < first {
            return Vec::new();
        }
        self.samples_from(first, (last - first + 1) as usize)
    }

    /// `count` samples starting at the grid sample nearest to `start`
    pub fn window_len(&self, start: DateTime<Utc>, count: usize) -> Vec<f64> {
        let (first, _) = self.snap_to_grid(start);
        self.samples_from(first, count)
    }

    /// Cut the record to `[start, end]` in place, zero-filling missing coverage
    pub fn trim(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) {
        let (first, _) = self.snap_to_grid(start);
        self.samples = self.window(start, end);
        self.begin += first as f64 * self.delta;
    }

    /// Nearest sample index to `instant` (may lie outside the record) and its exact time
    pub fn snap_to_grid(&self, instant: DateTime<Utc>) -> (i64, DateTime<Utc>) {
        let origin = self.start_time();
        let index = (seconds_between(instant, origin) / self.delta).round() as i64;
        (index, add_seconds(origin, index as f64 * self.delta))
    }

    fn samples_from(&self, first: i64, count: usize) -> Vec<f64> {
        (first..first + count as i64)
            .map(|i| {
                if i >= 0 && (i as usize) < self.samples.len() {
                    self.samples[i as usize]
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Scale samples so the largest absolute amplitude is 1
    pub fn normalize(&mut self) {
        peak_normalize(&mut self.samples);
    }
}

/// Divide by the absolute peak; an all-zero signal is left untouched
pub fn peak_normalize(samples: &mut [f64]) {
    let peak = samples.iter().fold(0.0f64, |acc, s| acc.max(s.abs()));
    if peak > 0.0 && peak.is_finite() {
        for s in samples.iter_mut() {
            *s /= peak;
        }
    }
}
