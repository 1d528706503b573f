//! # GFET Bench
//!
//! A Rust library for gate-sweep conductance measurements and oscilloscope
//! spectrum capture on a GFET lab bench.
//!
//! The library sweeps a gate voltage through a programmed sequence while
//! reading a multimeter at every setpoint, and captures Tektronix TDS
//! waveforms over a binary curve transfer for spectral analysis.
//!
//! ## Features
//!
//! - **Sequence generation**: triangle I/V sweeps and constant-hold soaks with
//!   checked step sizes and a ±5 V gate envelope
//! - **Gated acquisition**: settle, read and record one sample per setpoint, with
//!   one retry on sensing faults and every row flushed immediately
//! - **Redundant logging**: identical rows to a rolling and a historical log
//! - **Waveform capture**: exact curve framing and scale/offset calibration
//! - **Spectra**: DC-corrected magnitude spectrum via `rustfft`
//! - **DataFrame output**: waveforms, spectra and run logs as `polars` frames
//! - **Transport independence**: all instruments sit behind [`InstrumentLink`];
//!   [`SerialLink`] talks to real hardware, [`MockLink`] to scripted replies
//!
//! ## Examples
//!
//! ### I/V sweep
//!
//! ```rust,no_run
//! use gfet_bench::{
//!     GateSource, GatedAcquisition, IvSweep, LinkSettings, Multimeter, RunLogs, SerialLink,
//!     config::LogConfig,
//! };
//!
//! let sequence = IvSweep::between(0.0, 1.1).step_size(0.01).repeats(1).into_sequence()?;
//!
//! let mut gate = GateSource::new(SerialLink::open("/dev/ttyUSB0", LinkSettings::default())?);
//! gate.select_dc_function()?;
//! let mut meter = Multimeter::new(SerialLink::open("/dev/ttyS0", LinkSettings::multimeter())?);
//! meter.enable_remote()?;
//!
//! let mut logs = RunLogs::open(&LogConfig::default(), chrono::Local::now())?;
//! let run = GatedAcquisition::default().run(sequence, &mut gate, &mut meter, &mut logs.fanout())?;
//! println!("Recorded {} samples", run.samples().len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Sequence generation
//!
//! ```rust
//! use gfet_bench::sweep::generate;
//!
//! let sequence = generate(-1.0, 1.0, 0.5, 1);
//! assert_eq!(
//!     sequence.setpoints(),
//!     [0.0, 0.5, 1.0, 0.5, 0.0, -0.5, -1.0, -0.5, 0.0]
//! );
//! ```
//!
//! ### Waveform spectrum
//!
//! ```rust,no_run
//! use gfet_bench::{magnitude_spectrum, LinkSettings, SerialLink, TdsScope};
//!
//! let mut scope = TdsScope::new(SerialLink::open("/dev/ttyUSB1", LinkSettings::default())?)?;
//! let waveform = scope.acquire_waveform()?;
//! let spectrum = magnitude_spectrum(&waveform, true)?;
//! if let Some((hz, magnitude)) = spectrum.dominant_peak() {
//!     println!("Dominant component at {hz:.1} Hz ({magnitude:.3e})");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod acquisition;
pub mod bench;
pub mod config;
pub mod instrument_link;
pub mod mock_link;
pub mod row_sink;
pub mod run_log;
pub mod serial_link;
pub mod spectrum;
pub mod sweep;
pub mod tds_scope;

// Re-export the main types for convenience
pub use acquisition::{
    AcquisitionError, AcquisitionTiming, GatedAcquisition, Run, RunAborted, Sample,
};

pub use bench::{GateActuation, GateSource, MeterError, Multimeter};

pub use config::{BenchConfig, ConfigError};

pub use instrument_link::{InstrumentLink, LinkError, LinkSettings};

pub use mock_link::{MockLink, MockReply};

pub use row_sink::{CsvSink, RowSink, RunLogs, SinkError, SinkFanout};

pub use run_log::{read_run_log, RunLogError};

pub use serial_link::SerialLink;

pub use spectrum::{magnitude_spectrum, Spectrum, SpectrumError};

pub use sweep::{ConstantHold, IvSweep, Sequence, SweepConfigError};

pub use tds_scope::{CalibratedWaveform, ScaleInfo, ScopeError, TdsScope, Waveform};
