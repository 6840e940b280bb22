// Preparation stage
// Turns raw station records into annotated, gated, trimmed traces ready for alignment

pub mod condition;
pub mod travel;

pub use condition::{Conditioner, Detrend};
pub use travel::{TravelTimeModel, TravelTimeTable};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{PickingError, PickingResult};
use crate::pipeline::config::{DepthUnit, PrepareConfig, QualityConfig};
use crate::quality::gate::{QualityGate, Rejection, RejectionReason};
use crate::time::add_seconds;
use crate::trace::record::TraceRecord;
use crate::trace::sac;
use crate::trace::store::TraceStore;

/// A raw record and the file name it is persisted under once prepared
#[derive(Debug, Clone)]
pub struct RawTrace {
    pub file_name: String,
    pub record: TraceRecord,
}

impl RawTrace {
    pub fn read(path: &Path) -> PickingResult<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        Ok(RawTrace {
            file_name,
            record: sac::read(path)?,
        })
    }
}

#[derive(Debug)]
pub struct PreparedEvent {
    pub event_id: String,
    pub kept: Vec<TraceRecord>,
    pub paths: Vec<PathBuf>,
    pub rejections: Vec<Rejection>,
}

pub struct EventPreparer {
    config: PrepareConfig,
    gate: QualityGate,
    travel_times: Arc<dyn TravelTimeModel>,
    conditioner: Arc<dyn Conditioner>,
}

impl EventPreparer {
    pub fn new(
        config: PrepareConfig,
        quality: QualityConfig,
        travel_times: Arc<dyn TravelTimeModel>,
        conditioner: Arc<dyn Conditioner>,
    ) -> Self {
        EventPreparer {
            config,
            gate: QualityGate::new(quality),
            travel_times,
            conditioner,
        }
    }

    /// Annotate, condition, gate and trim one record.
    ///
    /// The returned trace has its depth in km, the modelled arrival and
    /// phase name set, its snr recorded, and covers
    /// `[arrival - trim_half_width, arrival + trim_half_width]`.
    pub fn prepare_trace(&self, mut trace: TraceRecord) -> Result<TraceRecord, RejectionReason> {
        let travel_error = |message: String| RejectionReason::TravelTime { message };

        let depth = trace
            .event_depth
            .ok_or_else(|| travel_error("missing event depth".to_string()))?;
        let depth_km = match self.config.depth_unit {
            DepthUnit::Meters => depth / 1000.0,
            DepthUnit::Kilometers => depth,
        };
        trace.event_depth = Some(depth_km);

        let distance = trace
            .distance
            .ok_or_else(|| travel_error("missing epicentral distance".to_string()))?;
        let (phase, travel_time) = self
            .travel_times
            .travel_time(depth_km, distance, &self.config.phase)
            .map_err(|e| travel_error(e.to_string()))?;

        self.conditioner
            .condition(&mut trace, self.config.sample_rate)
            .map_err(|e| RejectionReason::Conditioning {
                message: e.to_string(),
            })?;

        let arrival = add_seconds(trace.origin_time(), travel_time);
        let snr = self
            .gate
            .evaluate(&trace, arrival)
            .map_err(|_| RejectionReason::InsufficientSignal)?;
        if !self.gate.passes(snr) {
            return Err(RejectionReason::BelowThreshold { snr });
        }

        let half_width = self.config.trim_half_width;
        trace.trim(
            add_seconds(arrival, -half_width),
            add_seconds(arrival, half_width),
        );
        trace.predicted_arrival = Some(travel_time);
        trace.phase = Some(phase);
        trace.snr = Some(snr);
        Ok(trace)
    }

    /// Prepare a batch of records and persist the survivors.
    ///
    /// Records are grouped by their own event id and each group is stored
    /// under `<waveforms>/<eventId>/`; one `PreparedEvent` comes back per id,
    /// in the order the ids first appear.
    pub fn prepare_event(
        &self,
        traces: Vec<RawTrace>,
        store: &TraceStore,
    ) -> PickingResult<Vec<PreparedEvent>> {
        if traces.is_empty() {
            return Err(PickingError::InsufficientStations {
                found: 0,
                required: 1,
            });
        }

        let total = traces.len();
        let mut events: Vec<PreparedEvent> = Vec::new();
        for raw in traces {
            let event_id = raw.record.event_id();
            let index = match events.iter().position(|e| e.event_id == event_id) {
                Some(index) => index,
                None => {
                    events.push(PreparedEvent {
                        event_id,
                        kept: Vec::new(),
                        paths: Vec::new(),
                        rejections: Vec::new(),
                    });
                    events.len() - 1
                }
            };
            let prepared = &mut events[index];

            let station = raw.record.station.clone();
            match self.prepare_trace(raw.record) {
                Ok(trace) => {
                    log::debug!("{}: snr {:.3}", station, trace.snr.unwrap_or_default());
                    let path = store.write_waveform(&prepared.event_id, &raw.file_name, &trace)?;
                    prepared.paths.push(path);
                    prepared.kept.push(trace);
                }
                Err(reason) => {
                    log::warn!("Dropping {} ({}): {:?}", station, raw.file_name, reason);
                    prepared.rejections.push(Rejection { station, reason });
                }
            }
        }

        if events.len() > 1 {
            log::warn!("Batch of {} traces spans {} events", total, events.len());
        }
        for prepared in &events {
            log::info!(
                "Prepared event {}: kept {} of {} traces",
                prepared.event_id,
                prepared.kept.len(),
                prepared.kept.len() + prepared.rejections.len()
            );
        }
        Ok(events)
    }

    /// Read raw SAC files and prepare them, one event per distinct event id
    pub fn prepare_files(
        &self,
        paths: &[PathBuf],
        store: &TraceStore,
    ) -> PickingResult<Vec<PreparedEvent>> {
        let traces = paths
            .iter()
            .map(|path| RawTrace::read(path))
            .collect::<PickingResult<Vec<_>>>()?;
        self.prepare_event(traces, store)
    }
}
