// Signal-to-noise quality gate
// Compares energy before and after the predicted arrival and drops unusable traces

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{PickingError, PickingResult};
use crate::pipeline::config::QualityConfig;
use crate::time::add_seconds;
use crate::trace::record::TraceRecord;

/// Why a trace was excluded from the batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum RejectionReason {
    /// Noise window carries no energy, the ratio is undefined
    InsufficientSignal,
    BelowThreshold { snr: f64 },
    MissingArrival,
    TravelTime { message: String },
    Conditioning { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub station: String,
    #[serde(flatten)]
    pub reason: RejectionReason,
}

/// Result of gating a batch of traces
#[derive(Debug, Default)]
pub struct GateOutcome {
    /// Surviving traces with `snr` filled in
    pub kept: Vec<TraceRecord>,
    pub rejected: Vec<Rejection>,
}

pub struct QualityGate {
    config: QualityConfig,
}

impl QualityGate {
    pub fn new(config: QualityConfig) -> Self {
        QualityGate { config }
    }

    /// Signal-to-noise ratio of a trace around an absolute arrival time.
    ///
    /// The trace is peak-normalized first so the ratio does not depend on
    /// instrument gain. Each window's level is `sqrt(sum(x^2)) / n`.
    pub fn evaluate(&self, trace: &TraceRecord, arrival: DateTime<Utc>) -> PickingResult<f64> {
        let mut normalized = trace.clone();
        normalized.normalize();

        let [noise_start, noise_end] = self.config.noise_window;
        let [signal_start, signal_end] = self.config.signal_window;

        let noise = normalized.window(
            add_seconds(arrival, noise_start),
            add_seconds(arrival, noise_end),
        );
        let signal = normalized.window(
            add_seconds(arrival, signal_start),
            add_seconds(arrival, signal_end),
        );

        let noise_rms = window_rms(&noise);
        if noise_rms <= 0.0 || !noise_rms.is_finite() {
            return Err(PickingError::InsufficientSignal {
                station: trace.station.clone(),
            });
        }

        Ok(window_rms(&signal) / noise_rms)
    }

    pub fn passes(&self, snr: f64) -> bool {
        snr >= self.config.snr_threshold
    }

    /// Gate a batch; rejections are logged and collected, never fatal
    pub fn filter(&self, traces: Vec<TraceRecord>) -> GateOutcome {
        let mut outcome = GateOutcome::default();

        for mut trace in traces {
            let reason = match trace.predicted_arrival_time() {
                Err(_) => Some(RejectionReason::MissingArrival),
                Ok(arrival) => match self.evaluate(&trace, arrival) {
                    Err(_) => Some(RejectionReason::InsufficientSignal),
                    Ok(snr) if !self.passes(snr) => Some(RejectionReason::BelowThreshold { snr }),
                    Ok(snr) => {
                        log::debug!("{}: snr {:.3}", trace.station, snr);
                        trace.snr = Some(snr);
                        None
                    }
                },
            };

            match reason {
                Some(reason) => {
                    log::warn!("Dropping {}: {:?}", trace.station, reason);
                    outcome.rejected.push(Rejection {
                        station: trace.station,
                        reason,
                    });
                }
                None => outcome.kept.push(trace),
            }
        }

        log::info!(
            "Quality gate kept {} of {} traces",
            outcome.kept.len(),
            outcome.kept.len() + outcome.rejected.len()
        );
        outcome
    }
}

/// Root of the summed energy divided by the sample count
fn window_rms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f64 = samples.iter().map(|s| s * s).sum();
    energy.sqrt() / samples.len() as f64
}
