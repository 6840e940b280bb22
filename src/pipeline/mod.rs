// Pipeline execution and monitoring module
// Runs gating, reference selection, alignment, stacking and pick propagation for each event

pub mod config;
pub mod journal;

pub use config::PipelineConfig;
pub use journal::{read_journal, JournalEntry, JournalWriter, Stage};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::align::container::AlignmentContainer;
use crate::align::reference::select_reference;
use crate::align::serializer::AlignmentSerializer;
use crate::error::{PickingError, PickingResult};
use crate::picks::propagator::{PickPropagator, PropagationReport};
use crate::prepare::{EventPreparer, PreparedEvent};
use crate::quality::gate::QualityGate;
use crate::stacking::invoker::{StackingInvoker, StackingOutputs};
use crate::stacking::plot::PlotInvoker;
use crate::stacking::timing::RefinedTiming;
use crate::time::{event_id as format_event_id, parse_event_id, seconds_between};
use crate::trace::record::TraceRecord;
use crate::trace::sac;
use crate::trace::store::{Artifact, TraceStore};

/// Everything one successful event run produced
#[derive(Debug, Clone, Serialize)]
pub struct EventOutcome {
    pub event_id: String,
    pub reference_station: String,
    pub stations: usize,
    pub container: PathBuf,
    pub stacking: StackingOutputs,
    pub figures: Vec<Artifact>,
    pub exported: Vec<PathBuf>,
    pub propagation: Option<PropagationReport>,
}

/// Sequential stages for one event; owns no per-event state so it can be
/// shared across workers
pub struct EventPipeline {
    config: PipelineConfig,
    store: TraceStore,
    journal: JournalWriter,
}

impl EventPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let journal = Path::new(&config.paths.root).join(&config.paths.journal);
        EventPipeline {
            store: TraceStore::new(&config.paths),
            journal: JournalWriter::new(journal),
            config,
        }
    }

    pub fn store(&self) -> &TraceStore {
        &self.store
    }

    pub fn journal(&self) -> &JournalWriter {
        &self.journal
    }

    fn scratch_root(&self) -> Option<PathBuf> {
        self.config.paths.scratch.as_ref().map(PathBuf::from)
    }

    /// Prepare raw files, journaling the outcome of every event they belong to
    pub fn prepare(
        &self,
        preparer: &EventPreparer,
        files: &[PathBuf],
    ) -> PickingResult<Vec<PreparedEvent>> {
        let events = preparer.prepare_files(files, &self.store)?;
        for prepared in &events {
            self.journal.record(
                JournalEntry::complete(
                    &prepared.event_id,
                    Stage::Prepare,
                    format!(
                        "kept {} of {} traces",
                        prepared.kept.len(),
                        prepared.kept.len() + prepared.rejections.len()
                    ),
                )
                .with_data(json(&prepared.rejections)),
            );
        }
        Ok(events)
    }

    /// Run every stage for a prepared event. A failure aborts this event only
    /// and is journaled with the stage it happened in.
    pub fn run_event(&self, event_id: &str) -> PickingResult<EventOutcome> {
        let mut stage = Stage::Quality;
        let result = self.process(event_id, &mut stage);
        if let Err(e) = &result {
            log::error!("Event {} failed during {:?}: {}", event_id, stage, e);
            self.journal.record(
                JournalEntry::new(event_id, stage, 1.0, format!("failed: {}", e))
                    .with_data(serde_json::json!({ "error": e.to_string() })),
            );
        }
        result
    }

    fn process(&self, event_id: &str, stage: &mut Stage) -> PickingResult<EventOutcome> {
        let config = &self.config;

        *stage = Stage::Quality;
        let named_origin = parse_event_id(event_id)
            .ok_or_else(|| PickingError::InvalidEventId(event_id.to_string()))?;
        self.journal
            .record(JournalEntry::start(event_id, Stage::Quality, "loading waveforms"));
        let traces = self
            .store
            .list_waveforms(event_id)?
            .iter()
            .map(|path| sac::read(path).map_err(PickingError::from))
            .collect::<PickingResult<Vec<_>>>()?;
        for trace in &traces {
            check_origin(event_id, named_origin, trace)?;
        }
        let total = traces.len();
        let gated = QualityGate::new(config.quality.clone()).filter(traces);
        self.journal.record(
            JournalEntry::complete(
                event_id,
                Stage::Quality,
                format!("kept {} of {} traces", gated.kept.len(), total),
            )
            .with_data(json(&gated.rejected)),
        );

        *stage = Stage::Reference;
        let arrivals = gated
            .kept
            .iter()
            .map(|trace| trace.predicted_arrival_time())
            .collect::<PickingResult<Vec<_>>>()?;
        let candidates: Vec<f64> = match arrivals.first() {
            Some(first) => arrivals.iter().map(|a| seconds_between(*a, *first)).collect(),
            None => Vec::new(),
        };
        let reference_index = select_reference(&candidates, &config.reference)?;
        let reference_station = gated.kept[reference_index].station.clone();
        self.journal.record(JournalEntry::complete(
            event_id,
            Stage::Reference,
            format!("reference station {}", reference_station),
        ));

        *stage = Stage::Alignment;
        let aligned = AlignmentSerializer::new(config.alignment.clone()).write(
            &gated.kept,
            reference_index,
            event_id,
            &self.store,
        )?;
        self.journal.record(
            JournalEntry::complete(
                event_id,
                Stage::Alignment,
                format!("{} stations aligned", aligned.container.station_count()),
            )
            .with_data(serde_json::json!({
                "container": aligned.container_path,
                "reference": aligned.reference_path,
            })),
        );

        let mut figures = Vec::new();
        figures.extend(self.plot(event_id, &aligned.container_path));

        *stage = Stage::Stacking;
        self.journal
            .record(JournalEntry::start(event_id, Stage::Stacking, "running stacking tool"));
        let stacking = StackingInvoker::new(config.stacking.clone(), self.scratch_root())
            .run(&aligned.container_path)?;
        self.journal.record(
            JournalEntry::complete(event_id, Stage::Stacking, "refined outputs collected")
                .with_data(json(&stacking)),
        );

        figures.extend(self.plot(event_id, &stacking.refined_waveform.path));

        let exported = if config.export_refined_waveforms {
            self.export_refined(event_id, &stacking.refined_waveform.path)?
        } else {
            Vec::new()
        };

        let propagation = if config.propagation.enabled {
            *stage = Stage::Propagation;
            let timing = RefinedTiming::read(
                &stacking.refined_timing.path,
                config.propagation.timing_header_lines,
            )?;
            let report = PickPropagator::new(config.propagation.clone()).propagate(
                &timing,
                event_id,
                &self.store,
            )?;
            self.journal.record(
                JournalEntry::complete(
                    event_id,
                    Stage::Propagation,
                    format!(
                        "{} picks written, {} stations skipped",
                        report.updated.len(),
                        report.skipped.len()
                    ),
                )
                .with_data(json(&report)),
            );
            Some(report)
        } else {
            None
        };

        log::info!("Event {} complete", event_id);
        Ok(EventOutcome {
            event_id: event_id.to_string(),
            reference_station,
            stations: aligned.container.station_count(),
            container: aligned.container_path,
            stacking,
            figures,
            exported,
            propagation,
        })
    }

    /// Plot a container; failures are logged and journaled, never fatal
    fn plot(&self, event_id: &str, container: &Path) -> Option<Artifact> {
        if !self.config.plot.enabled {
            return None;
        }
        let result = self.store.figures_dir().and_then(|figures| {
            PlotInvoker::new(self.config.plot.clone(), self.scratch_root()).run(container, &figures)
        });
        match result {
            Ok(artifact) => {
                self.journal.record(
                    JournalEntry::complete(event_id, Stage::Plot, "figure written")
                        .with_data(json(&artifact)),
                );
                Some(artifact)
            }
            Err(e) => {
                log::warn!("Plot of {} failed: {}", container.display(), e);
                self.journal.record(JournalEntry::complete(
                    event_id,
                    Stage::Plot,
                    format!("plot failed: {}", e),
                ));
                None
            }
        }
    }

    /// Unpack a refined container into `<refined>/<eventId>/<station>.sac`
    fn export_refined(&self, event_id: &str, container: &Path) -> PickingResult<Vec<PathBuf>> {
        let dir = self.store.refined_dir(event_id)?;
        let records = AlignmentContainer::read(container)?.to_records();
        let mut paths = Vec::with_capacity(records.len());
        for record in &records {
            let path = dir.join(format!("{}.sac", record.station));
            sac::write(&path, record)?;
            paths.push(path);
        }
        log::info!("Exported {} refined traces for event {}", paths.len(), event_id);
        Ok(paths)
    }
}

/// Run events in parallel, one blocking worker per event.
/// Results come back in input order; one event's failure leaves the others untouched.
pub async fn run_events(
    pipeline: Arc<EventPipeline>,
    event_ids: Vec<String>,
) -> Vec<(String, PickingResult<EventOutcome>)> {
    let handles: Vec<_> = event_ids
        .into_iter()
        .map(|event_id| {
            let pipeline = Arc::clone(&pipeline);
            let id = event_id.clone();
            (
                event_id,
                tokio::task::spawn_blocking(move || pipeline.run_event(&id)),
            )
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (event_id, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(PickingError::Worker(e.to_string())),
        };
        results.push((event_id, result));
    }
    results
}

/// A trace belongs to an event when its origin lies within two seconds after
/// the named instant: event ids drop the sub-second part of the reference time
/// before adding the origin offset, then truncate again.
fn check_origin(event_id: &str, named_origin: DateTime<Utc>, trace: &TraceRecord) -> PickingResult<()> {
    let origin = trace.origin_time();
    let lag = seconds_between(origin, named_origin);
    if (-1e-3..2.0).contains(&lag) {
        Ok(())
    } else {
        Err(PickingError::EventMismatch {
            event_id: event_id.to_string(),
            station: trace.station.clone(),
            found: format_event_id(origin),
        })
    }
}

fn json<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}
