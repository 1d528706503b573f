//! Magnitude spectrum of a captured trace.

use crate::tds_scope::CalibratedWaveform;
use num_complex::Complex;
use polars::prelude::*;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

pub const FREQUENCY_COLUMN_NAME: &str = "frequency";
pub const MAGNITUDE_COLUMN_NAME: &str = "magnitude";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SpectrumError {
    #[error("Need at least 2 samples for a spectrum, got {len}")]
    TooFewSamples { len: usize },

    #[error("Sample interval must be positive")]
    NonPositiveInterval,
}

/// Bin frequencies and magnitudes of a full complex DFT, without the DC bin.
///
/// Bins above the Nyquist frequency mirror the ones below it; see
/// [`Spectrum::below_nyquist`].
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    frequency: Vec<f64>,
    magnitude: Vec<f64>,
    sample_rate: f64,
}

impl Spectrum {
    pub fn frequency(&self) -> &[f64] {
        &self.frequency
    }

    pub fn magnitude(&self) -> &[f64] {
        &self.magnitude
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.frequency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequency.is_empty()
    }

    /// The bins at or below half the sample rate.
    pub fn below_nyquist(&self) -> (&[f64], &[f64]) {
        let nyquist = self.sample_rate / 2.0;
        let end = self.frequency.partition_point(|&f| f <= nyquist);
        (&self.frequency[..end], &self.magnitude[..end])
    }

    /// `(frequency, magnitude)` of the strongest bin at or below Nyquist.
    pub fn dominant_peak(&self) -> Option<(f64, f64)> {
        let (frequency, magnitude) = self.below_nyquist();
        frequency
            .iter()
            .zip(magnitude)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(&f, &m)| (f, m))
    }

    pub fn to_data_frame(&self) -> PolarsResult<DataFrame> {
        DataFrame::new(vec![
            Series::new(FREQUENCY_COLUMN_NAME.into(), self.frequency.as_slice()).into(),
            Series::new(MAGNITUDE_COLUMN_NAME.into(), self.magnitude.as_slice()).into(),
        ])
    }
}

/// DFT magnitude spectrum of `waveform`.
///
/// The sample rate is taken from the first two time stamps. With
/// `subtract_dc` the mean voltage is removed before transforming. Bin `k`
/// lies at `k / duration`; bin 0 is always dropped, so the result starts at
/// the first non-zero frequency.
pub fn magnitude_spectrum(
    waveform: &CalibratedWaveform,
    subtract_dc: bool,
) -> Result<Spectrum, SpectrumError> {
    #[cfg(feature = "cpu-profiling")]
    let _zone = tracy_client::Client::running()
        .map(|client| client.span(tracy_client::span_location!("magnitude_spectrum"), 0));

    let n = waveform.len();
    if n < 2 {
        return Err(SpectrumError::TooFewSamples { len: n });
    }

    let time = waveform.time();
    let interval = time[1] - time[0];
    if interval.is_nan() || interval <= 0.0 {
        return Err(SpectrumError::NonPositiveInterval);
    }
    let sample_rate = 1.0 / interval;
    let duration = n as f64 / sample_rate;

    let voltage = waveform.voltage();
    let mean = if subtract_dc {
        voltage.iter().sum::<f64>() / n as f64
    } else {
        0.0
    };

    let mut buffer: Vec<Complex<f64>> = voltage
        .iter()
        .map(|&v| Complex::new(v - mean, 0.0))
        .collect();
    let fft: Arc<dyn Fft<f64>> = FftPlanner::new().plan_fft_forward(n);
    fft.process(&mut buffer);

    let frequency = (1..n).map(|k| k as f64 / duration).collect();
    let magnitude = buffer[1..].iter().map(|c| c.norm()).collect();

    Ok(Spectrum {
        frequency,
        magnitude,
        sample_rate,
    })
}
