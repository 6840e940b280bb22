//! aspick - align, stack and propagate picks for prepared seismic events
//!
//! Usage:
//!   aspick <event_id>...                 run alignment, stacking and propagation
//!   aspick prepare <file.sac>...         prepare raw records, printing one event id per event
//!
//! Preparation detrends but does not resample: records must already be
//! sampled at `prepare.sample_rate` (40 Hz by default) or they are rejected.
//!
//! Environment variables:
//!   ASPICK_CONFIG - JSON configuration file (defaults when unset)
//!   RUST_LOG      - log level (default: info)

use aspick_lib::pipeline::{run_events, EventPipeline, PipelineConfig};
use aspick_lib::prepare::{Detrend, EventPreparer, TravelTimeTable};
use aspick_lib::PickingError;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.split_first() {
        None => {
            eprintln!("usage: aspick <event_id>... | aspick prepare <file.sac>...");
            ExitCode::FAILURE
        }
        Some((command, files)) if command == "prepare" => match prepare(config, files) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Preparation failed: {}", e);
                ExitCode::FAILURE
            }
        },
        Some(_) => align(config, args).await,
    }
}

fn prepare(config: PipelineConfig, files: &[String]) -> Result<(), PickingError> {
    let table_path = config.prepare.travel_time_table.clone().ok_or_else(|| {
        PickingError::InvalidConfig("prepare.travel_time_table is not set".to_string())
    })?;
    let table = TravelTimeTable::from_file(Path::new(&table_path))?;
    let preparer = EventPreparer::new(
        config.prepare.clone(),
        config.quality.clone(),
        Arc::new(table),
        Arc::new(Detrend),
    );

    let files: Vec<PathBuf> = files.iter().map(PathBuf::from).collect();
    let pipeline = EventPipeline::new(config);
    for prepared in pipeline.prepare(&preparer, &files)? {
        info!(
            "Event {}: {} traces ready, {} rejected",
            prepared.event_id,
            prepared.kept.len(),
            prepared.rejections.len()
        );
        println!("{}", prepared.event_id);
    }
    Ok(())
}

async fn align(config: PipelineConfig, event_ids: Vec<String>) -> ExitCode {
    info!("Processing {} events", event_ids.len());
    let pipeline = Arc::new(EventPipeline::new(config));
    let results = run_events(pipeline, event_ids).await;

    let mut failed = 0;
    for (event_id, result) in &results {
        match result {
            Ok(outcome) => info!(
                "{}: reference {}, {} stations, {} picks",
                event_id,
                outcome.reference_station,
                outcome.stations,
                outcome.propagation.as_ref().map_or(0, |p| p.updated.len())
            ),
            Err(e) => {
                failed += 1;
                error!("{}: {}", event_id, e);
            }
        }
    }

    info!("{} of {} events completed", results.len() - failed, results.len());
    if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
