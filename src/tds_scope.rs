use crate::instrument_link::{InstrumentLink, LinkError};
use polars::prelude::*;

/// Bytes before the first sample in a `CURVe?` response (block header).
pub const CURVE_HEADER_LEN: usize = 6;
/// Bytes after the last sample in a `CURVe?` response (terminator).
pub const CURVE_TRAILER_LEN: usize = 1;

const SELECT_BINARY_ENCODING: &str = "DATa:ENCdg RIBinary";
const QUERY_SAMPLE_INTERVAL: &str = "WFMPre:XINcr?";
const QUERY_VERTICAL_SCALE: &str = "WFMPre:YMUlt?";
const QUERY_VERTICAL_OFFSET: &str = "WFMPre:YOFf?";
const QUERY_CURVE: &str = "CURVe?";

pub const TIME_COLUMN_NAME: &str = "time";
pub const VOLTAGE_COLUMN_NAME: &str = "voltage";

#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Scope answered {raw:?} to {query}")]
    BadScaleValue { query: &'static str, raw: String },

    #[error("Curve response of {len} bytes is shorter than its framing")]
    TruncatedCurve { len: usize },
}

/// Display scaling needed to turn raw curve codes into volts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleInfo {
    /// Seconds between two samples.
    pub sample_interval: f64,
    /// Volts per raw code.
    pub vertical_scale: f64,
    /// Volts added after scaling; the scope's offset code times `vertical_scale`.
    pub vertical_offset: f64,
}

/// One trace in instrument units, with the scaling it was captured under.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub scale: ScaleInfo,
    pub raw_samples: Vec<i8>,
}

impl Waveform {
    pub fn calibrate(&self) -> CalibratedWaveform {
        let ScaleInfo {
            sample_interval,
            vertical_scale,
            vertical_offset,
        } = self.scale;

        let time = (0..self.raw_samples.len())
            .map(|i| i as f64 * sample_interval)
            .collect();
        let voltage = self
            .raw_samples
            .iter()
            .map(|&raw| f64::from(raw) * vertical_scale + vertical_offset)
            .collect();

        CalibratedWaveform { time, voltage }
    }
}

/// A trace in seconds and volts. Both axes have the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedWaveform {
    time: Vec<f64>,
    voltage: Vec<f64>,
}

impl CalibratedWaveform {
    /// Uniformly sampled trace starting at t = 0.
    pub fn from_uniform(sample_interval: f64, voltage: Vec<f64>) -> Self {
        let time = (0..voltage.len())
            .map(|i| i as f64 * sample_interval)
            .collect();
        Self { time, voltage }
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn voltage(&self) -> &[f64] {
        &self.voltage
    }

    pub fn len(&self) -> usize {
        self.voltage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voltage.is_empty()
    }

    pub fn to_data_frame(&self) -> PolarsResult<DataFrame> {
        DataFrame::new(vec![
            Series::new(TIME_COLUMN_NAME.into(), self.time.as_slice()).into(),
            Series::new(VOLTAGE_COLUMN_NAME.into(), self.voltage.as_slice()).into(),
        ])
    }
}

/// Strip the block framing from a `CURVe?` response and reinterpret the
/// payload as signed 8-bit samples.
pub fn decode_curve(payload: &[u8], scale: ScaleInfo) -> Result<Waveform, ScopeError> {
    #[cfg(feature = "cpu-profiling")]
    let _zone = tracy_client::Client::running()
        .map(|client| client.span(tracy_client::span_location!("decode_curve"), 0));

    let framing = CURVE_HEADER_LEN + CURVE_TRAILER_LEN;
    if payload.len() < framing {
        return Err(ScopeError::TruncatedCurve { len: payload.len() });
    }

    let raw_samples = payload[CURVE_HEADER_LEN..payload.len() - CURVE_TRAILER_LEN]
        .iter()
        .map(|&b| i8::from_ne_bytes([b]))
        .collect();

    Ok(Waveform { scale, raw_samples })
}

fn parse_scale_value(query: &'static str, raw: &str) -> Result<f64, ScopeError> {
    // With headers enabled the scope echoes the parameter name before the value.
    raw.split_whitespace()
        .last()
        .and_then(|value| value.parse::<f64>().ok())
        .ok_or_else(|| ScopeError::BadScaleValue {
            query,
            raw: raw.to_string(),
        })
}

/// Tektronix TDS oscilloscope over an [`InstrumentLink`].
#[derive(Debug)]
pub struct TdsScope<L> {
    link: L,
}

impl<L: InstrumentLink> TdsScope<L> {
    /// Take over a link and switch the scope to signed binary curve transfer.
    pub fn new(mut link: L) -> Result<Self, ScopeError> {
        log::debug!("Selecting binary curve encoding");
        link.write(SELECT_BINARY_ENCODING)?;
        Ok(Self { link })
    }

    fn query_value(&mut self, query: &'static str) -> Result<f64, ScopeError> {
        let raw = self.link.query(query)?;
        parse_scale_value(query, &raw)
    }

    /// Read the current timebase and vertical scaling from the scope.
    pub fn acquire_scale_info(&mut self) -> Result<ScaleInfo, ScopeError> {
        let sample_interval = self.query_value(QUERY_SAMPLE_INTERVAL)?;
        let vertical_scale = self.query_value(QUERY_VERTICAL_SCALE)?;
        let offset_code = self.query_value(QUERY_VERTICAL_OFFSET)?;

        let scale = ScaleInfo {
            sample_interval,
            vertical_scale,
            vertical_offset: offset_code * vertical_scale,
        };
        log::debug!("Scope scale info: {:?}", scale);
        Ok(scale)
    }

    /// Fetch the raw trace under the given scaling.
    pub fn acquire_raw(&mut self, scale: ScaleInfo) -> Result<Waveform, ScopeError> {
        let payload = self.link.query_binary(QUERY_CURVE)?;
        decode_curve(&payload, scale)
    }

    /// Capture one calibrated trace.
    ///
    /// The scaling is queried again for every capture because the front panel
    /// may have changed timebase or gain since the last one.
    #[tracing::instrument(skip_all)]
    pub fn acquire_waveform(&mut self) -> Result<CalibratedWaveform, ScopeError> {
        let scale = self.acquire_scale_info()?;
        let waveform = self.acquire_raw(scale)?;
        log::debug!("Captured {} curve samples", waveform.raw_samples.len());
        Ok(waveform.calibrate())
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn into_inner(self) -> L {
        self.link
    }
}
