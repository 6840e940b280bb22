// Signal conditioning
// Collaborator that cleans a raw trace before gating and alignment

use crate::error::{PickingError, PickingResult};
use crate::trace::record::TraceRecord;

pub trait Conditioner: Send + Sync {
    /// Condition `trace` in place; traces not sampled at `target_rate` Hz
    /// must be resampled here or rejected.
    fn condition(&self, trace: &mut TraceRecord, target_rate: f64) -> PickingResult<()>;
}

/// Removes the least-squares linear trend, then the mean.
/// Does not resample.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detrend;

impl Conditioner for Detrend {
    fn condition(&self, trace: &mut TraceRecord, target_rate: f64) -> PickingResult<()> {
        let rate = trace.sampling_rate();
        if (rate - target_rate).abs() > 1e-6 * target_rate {
            return Err(PickingError::Conditioning(format!(
                "{} is sampled at {} Hz, resampling to {} Hz is not available",
                trace.station, rate, target_rate
            )));
        }
        detrend(&mut trace.samples);
        demean(&mut trace.samples);
        Ok(())
    }
}

pub fn demean(samples: &mut [f64]) {
    if samples.is_empty() {
        return;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    samples.iter_mut().for_each(|s| *s -= mean);
}

pub fn detrend(samples: &mut [f64]) {
    let n = samples.len();
    if n < 2 {
        return;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = samples.iter().sum::<f64>() / n as f64;

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in samples.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }
    let slope = sxy / sxx;

    for (i, s) in samples.iter_mut().enumerate() {
        *s -= y_mean + slope * (i as f64 - x_mean);
    }
}
