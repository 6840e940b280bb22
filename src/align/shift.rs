// Band-limited fractional sample shift
// Resamples a signal at positions k + s by rotating its spectrum (sinc interpolation)

use realfft::num_complex::Complex;
use realfft::RealFftPlanner;
use std::f64::consts::PI;

use crate::error::PickingResult;

/// Return `out[k] = in(k + offset)` for a fractional `offset` in samples.
///
/// Positions outside the input read as zero: the signal is zero-padded by
/// at least `|offset|` samples before the spectral phase ramp is applied,
/// so nothing wraps around from the other end. A shift of the whole length
/// or more leaves only zeros and skips the transform.
pub fn fractional_shift(samples: &[f64], offset: f64) -> PickingResult<Vec<f64>> {
    let n = samples.len();
    if n == 0 || offset == 0.0 {
        return Ok(samples.to_vec());
    }
    if !offset.is_finite() || offset.abs() >= n as f64 {
        return Ok(vec![0.0; n]);
    }

    // |offset| < n here, so the transform is at most 4n long
    let pad = (offset.abs().ceil() as usize).min(n) + 16;
    let fft_len = (n + pad).next_power_of_two();

    let mut planner = RealFftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(fft_len);
    let inverse = planner.plan_fft_inverse(fft_len);

    let mut input = vec![0.0; fft_len];
    input[..n].copy_from_slice(samples);
    let mut spectrum = forward.make_output_vec();
    forward.process(&mut input, &mut spectrum)?;

    // Advancing by `offset` samples multiplies bin j by exp(+2*pi*i*j*offset/N)
    let step = Complex::from_polar(1.0, 2.0 * PI * offset / fft_len as f64);
    let mut rotation = Complex::new(1.0, 0.0);
    for bin in spectrum.iter_mut() {
        *bin *= rotation;
        rotation *= step;
    }

    // A real inverse transform needs purely real DC and Nyquist bins
    spectrum[0].im = 0.0;
    if let Some(last) = spectrum.last_mut() {
        last.im = 0.0;
    }

    let mut output = inverse.make_output_vec();
    inverse.process(&mut spectrum, &mut output)?;

    let scale = 1.0 / fft_len as f64;
    Ok(output[..n].iter().map(|v| v * scale).collect())
}

/// Index of the largest absolute amplitude
pub fn peak_index(samples: &[f64]) -> Option<usize> {
    samples
        .iter()
        .enumerate()
        .max_by(|a, b| {
            a.1.abs()
                .partial_cmp(&b.1.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
}
