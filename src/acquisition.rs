//! The gated measurement loop.
//!
//! For every setpoint of a [`Sequence`] the loop applies the gate voltage,
//! waits for the gate to settle, takes one multimeter reading and hands the
//! resulting [`Sample`] to the sink before moving on. Nothing overlaps: a
//! voltage that has been applied is always followed through to its reading.

use crate::bench::{GateActuation, GateSource, MeterError, Multimeter};
use crate::instrument_link::{InstrumentLink, LinkError};
use crate::row_sink::{RowSink, SinkError};
use crate::sweep::Sequence;
use chrono::{DateTime, Local};
use std::thread;
use std::time::{Duration, Instant};

/// Fixed delays of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionTiming {
    /// After actuation, before triggering the reading.
    pub settle: Duration,
    /// Between triggering a reading and fetching it.
    pub conversion: Duration,
}

impl Default for AcquisitionTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(10),
            conversion: Duration::from_millis(50),
        }
    }
}

/// One recorded point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Seconds since the start of the run, from a monotonic clock.
    pub elapsed_seconds: f64,
    pub gate_voltage: f64,
    pub measurement: f64,
}

/// Samples of one loop invocation, in recording order.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    started_at: DateTime<Local>,
    sequence: Sequence,
    samples: Vec<Sample>,
    skipped: Vec<f64>,
}

impl Run {
    fn new(sequence: Sequence) -> Self {
        Self {
            started_at: Local::now(),
            samples: Vec::with_capacity(sequence.len()),
            sequence,
            skipped: Vec::new(),
        }
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Setpoints that were outside the gate envelope and therefore not measured.
    pub fn skipped(&self) -> &[f64] {
        &self.skipped
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("Sensing fault persisted after retry{}: {source}", gate_context(.gate_voltage))]
    Sensing {
        /// `None` for the stale-reading discard before the first setpoint.
        gate_voltage: Option<f64>,
        #[source]
        source: MeterError,
    },

    #[error("Transport fault: {0}")]
    Transport(#[from] LinkError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

fn gate_context(gate_voltage: &Option<f64>) -> String {
    gate_voltage.map_or_else(String::new, |v| format!(" at {v} V"))
}

/// A run that ended early. Everything in `run` was recorded and flushed before
/// the fault.
///
/// On [`AcquisitionError::Sink`] the failing row may already be in some of
/// the logs without being in `run`, since a sink can fail after others
/// accepted the row.
#[derive(Debug, thiserror::Error)]
#[error("Run aborted after {} samples: {cause}", .run.samples.len())]
pub struct RunAborted {
    pub run: Run,
    #[source]
    pub cause: AcquisitionError,
}

/// Drives a sequence through a gate source and a multimeter.
#[derive(Debug, Clone, Default)]
pub struct GatedAcquisition {
    timing: AcquisitionTiming,
}

impl GatedAcquisition {
    pub fn new(timing: AcquisitionTiming) -> Self {
        Self { timing }
    }

    pub fn timing(&self) -> AcquisitionTiming {
        self.timing
    }

    /// Run `sequence` to completion.
    ///
    /// One stale reading is discarded before the clock starts. Out-of-envelope
    /// setpoints are skipped and listed in [`Run::skipped`]. A failed reading
    /// is retried once; a second failure, any transport fault or a sink error
    /// ends the run with [`RunAborted`].
    #[tracing::instrument(skip_all, fields(setpoints = sequence.len()))]
    pub fn run<G, M>(
        &self,
        sequence: Sequence,
        gate: &mut GateSource<G>,
        meter: &mut Multimeter<M>,
        sink: &mut dyn RowSink,
    ) -> Result<Run, RunAborted>
    where
        G: InstrumentLink,
        M: InstrumentLink,
    {
        let mut run = Run::new(sequence);
        log::info!("Starting gated run over {} setpoints", run.sequence.len());

        if let Err(cause) = self.read_with_retry(meter, None) {
            log::error!("Could not clear stale reading: {}", cause);
            return Err(RunAborted { run, cause });
        }

        let start = Instant::now();
        let setpoints = run.sequence.setpoints().to_vec();
        for gate_voltage in setpoints {
            match self.step(gate_voltage, start, gate, meter, sink) {
                Ok(Some(sample)) => run.samples.push(sample),
                Ok(None) => run.skipped.push(gate_voltage),
                Err(cause) => {
                    log::error!(
                        "Aborting run at {} V after {} samples: {}",
                        gate_voltage,
                        run.samples.len(),
                        cause
                    );
                    return Err(RunAborted { run, cause });
                }
            }
        }

        log::info!(
            "Run finished: {} samples, {} setpoints skipped",
            run.samples.len(),
            run.skipped.len()
        );
        Ok(run)
    }

    /// One setpoint. `Ok(None)` if the setpoint was rejected by the envelope.
    fn step<G, M>(
        &self,
        gate_voltage: f64,
        start: Instant,
        gate: &mut GateSource<G>,
        meter: &mut Multimeter<M>,
        sink: &mut dyn RowSink,
    ) -> Result<Option<Sample>, AcquisitionError>
    where
        G: InstrumentLink,
        M: InstrumentLink,
    {
        if gate.apply(gate_voltage)? == GateActuation::Rejected {
            log::warn!("Skipping gate setpoint {} V outside the safety envelope", gate_voltage);
            return Ok(None);
        }
        thread::sleep(self.timing.settle);

        let measurement = self.read_with_retry(meter, Some(gate_voltage))?;
        let sample = Sample {
            elapsed_seconds: start.elapsed().as_secs_f64(),
            gate_voltage,
            measurement,
        };
        log::debug!(
            "t={:.3}s gate={} V reading={}",
            sample.elapsed_seconds,
            gate_voltage,
            measurement
        );

        sink.append(&sample)?;
        sink.flush()?;
        Ok(Some(sample))
    }

    fn read_with_retry<M: InstrumentLink>(
        &self,
        meter: &mut Multimeter<M>,
        gate_voltage: Option<f64>,
    ) -> Result<f64, AcquisitionError> {
        let first = match meter.read_value(self.timing.conversion) {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if !first.is_sensing_fault() {
            return Err(escalate(first, gate_voltage));
        }

        log::warn!("Sensing fault ({}), retrying once", first);
        // a late answer to the first trigger must not be taken for the retry's
        meter
            .discard_pending()
            .map_err(|e| escalate(MeterError::Link(e), gate_voltage))?;
        meter
            .read_value(self.timing.conversion)
            .map_err(|e| escalate(e, gate_voltage))
    }
}

fn escalate(error: MeterError, gate_voltage: Option<f64>) -> AcquisitionError {
    match error {
        MeterError::Link(e) if !e.is_retryable() => AcquisitionError::Transport(e),
        source => AcquisitionError::Sensing {
            gate_voltage,
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_link::{MockLink, MockReply};
    use crate::row_sink::{CsvSink, SinkFanout};

    fn fast() -> GatedAcquisition {
        GatedAcquisition::new(AcquisitionTiming {
            settle: Duration::from_millis(1),
            conversion: Duration::ZERO,
        })
    }

    fn text(value: &str) -> MockReply {
        MockReply::Text(value.to_string())
    }

    fn sequence(setpoints: &[f64]) -> Sequence {
        Sequence::from_setpoints(setpoints.to_vec()).unwrap()
    }

    #[test]
    fn test_three_setpoints_three_samples() {
        let mut gate = GateSource::new(MockLink::new());
        let mut meter = Multimeter::new(MockLink::with_readings(&[9.9, 1.0, 2.0, 3.0]));
        let mut latest = CsvSink::from_writer(Vec::new());
        let mut history = CsvSink::from_writer(Vec::new());

        let run = {
            let mut fanout = SinkFanout::new().with(&mut latest).with(&mut history);
            fast()
                .run(sequence(&[0.1, 0.2, 0.0]), &mut gate, &mut meter, &mut fanout)
                .unwrap()
        };

        let samples = run.samples();
        assert_eq!(samples.len(), 3);
        assert!(samples.windows(2).all(|w| w[0].elapsed_seconds < w[1].elapsed_seconds));
        let measurements: Vec<f64> = samples.iter().map(|s| s.measurement).collect();
        assert_eq!(measurements, [1.0, 2.0, 3.0]);
        let gates: Vec<f64> = samples.iter().map(|s| s.gate_voltage).collect();
        assert_eq!(gates, [0.1, 0.2, 0.0]);
        assert!(run.skipped().is_empty());

        let latest = latest.into_inner().unwrap();
        let history = history.into_inner().unwrap();
        assert_eq!(latest, history);
        assert_eq!(String::from_utf8(latest).unwrap().lines().count(), 3);

        // one stale read plus one per setpoint
        assert_eq!(meter.link().written(), ["READ?"; 4]);
        assert_eq!(
            gate.link().written(),
            [
                "SOURCE1:VOLTAGE:OFFSET 0.1",
                "SOURCE1:VOLTAGE:OFFSET 0.2",
                "SOURCE1:VOLTAGE:OFFSET 0"
            ]
        );
    }

    #[test]
    fn test_out_of_envelope_setpoint_is_skipped() {
        let mut gate = GateSource::new(MockLink::new());
        let mut meter = Multimeter::new(MockLink::with_readings(&[0.0, 1.0, 2.0]));
        let mut sink = CsvSink::from_writer(Vec::new());

        let run = fast()
            .run(sequence(&[0.5, 6.0, 0.0]), &mut gate, &mut meter, &mut sink)
            .unwrap();

        assert_eq!(run.samples().len(), 2);
        assert_eq!(run.skipped(), [6.0]);
        assert_eq!(gate.link().written().len(), 2);
        assert_eq!(meter.link().written().len(), 3);
    }

    #[test]
    fn test_single_timeout_is_retried() {
        let mut gate = GateSource::new(MockLink::new());
        let mut meter = Multimeter::new(MockLink::with_replies([
            text("0"),
            MockReply::Timeout,
            text("1.5"),
            text("2.5"),
        ]));
        let mut sink = CsvSink::from_writer(Vec::new());

        let run = fast()
            .run(sequence(&[0.1, 0.0]), &mut gate, &mut meter, &mut sink)
            .unwrap();

        let measurements: Vec<f64> = run.samples().iter().map(|s| s.measurement).collect();
        assert_eq!(measurements, [1.5, 2.5]);
    }

    #[test]
    fn test_late_reading_does_not_shift_later_samples() {
        let mut gate = GateSource::new(MockLink::new());
        let mut meter = Multimeter::new(MockLink::with_replies([
            text("0"),
            text("1"),
            MockReply::Late("2".to_string()),
            text("2"),
            text("3"),
            text("4"),
            text("0"),
        ]));
        let mut sink = CsvSink::from_writer(Vec::new());

        let run = fast()
            .run(sequence(&[0.1, 0.2, 0.3, 0.4, 0.0]), &mut gate, &mut meter, &mut sink)
            .unwrap();

        let rows: Vec<(f64, f64)> = run
            .samples()
            .iter()
            .map(|s| (s.gate_voltage, s.measurement))
            .collect();
        assert_eq!(rows, [(0.1, 1.0), (0.2, 2.0), (0.3, 3.0), (0.4, 4.0), (0.0, 0.0)]);
        assert_eq!(meter.link().pending_replies(), 0);
    }

    #[test]
    fn test_garbled_reading_is_retried() {
        let mut gate = GateSource::new(MockLink::new());
        let mut meter = Multimeter::new(MockLink::with_replies([
            text("0"),
            text("+9.9E+3x"),
            text("4"),
        ]));
        let mut sink = CsvSink::from_writer(Vec::new());

        let run = fast()
            .run(sequence(&[0.0]), &mut gate, &mut meter, &mut sink)
            .unwrap();
        assert_eq!(run.samples()[0].measurement, 4.0);
    }

    #[test]
    fn test_two_timeouts_abort_with_prior_samples() {
        let mut gate = GateSource::new(MockLink::new());
        let mut meter = Multimeter::new(MockLink::with_replies([
            text("0"),
            text("1"),
            text("2"),
            MockReply::Timeout,
            MockReply::Timeout,
            text("never read"),
        ]));
        let mut sink = CsvSink::from_writer(Vec::new());

        let aborted = fast()
            .run(
                sequence(&[0.1, 0.2, 0.3, 0.4, 0.0]),
                &mut gate,
                &mut meter,
                &mut sink,
            )
            .unwrap_err();

        assert_eq!(aborted.run.samples().len(), 2);
        assert!(matches!(
            aborted.cause,
            AcquisitionError::Sensing {
                gate_voltage: Some(v),
                ..
            } if v == 0.3
        ));
        // the gate was not moved past the failing setpoint
        assert_eq!(gate.link().written().len(), 3);
        assert_eq!(meter.link().pending_replies(), 1);

        let rows = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        assert_eq!(rows.lines().count(), 2);
    }

    #[test]
    fn test_disconnect_aborts_without_retry() {
        let mut gate = GateSource::new(MockLink::new());
        let mut meter = Multimeter::new(MockLink::with_replies([
            text("0"),
            MockReply::Disconnected,
            text("1"),
        ]));
        let mut sink = CsvSink::from_writer(Vec::new());

        let aborted = fast()
            .run(sequence(&[0.1, 0.0]), &mut gate, &mut meter, &mut sink)
            .unwrap_err();

        assert!(matches!(aborted.cause, AcquisitionError::Transport(_)));
        assert!(aborted.run.samples().is_empty());
        assert_eq!(meter.link().pending_replies(), 1);
    }

    #[test]
    fn test_gate_transport_fault_stops_actuation() {
        let mut gate_link = MockLink::new();
        gate_link.fail_writes_after(1);
        let mut gate = GateSource::new(gate_link);
        let mut meter = Multimeter::new(MockLink::with_readings(&[0.0, 1.0, 2.0, 3.0]));
        let mut sink = CsvSink::from_writer(Vec::new());

        let aborted = fast()
            .run(sequence(&[0.1, 0.2, 0.0]), &mut gate, &mut meter, &mut sink)
            .unwrap_err();

        assert!(matches!(aborted.cause, AcquisitionError::Transport(LinkError::ConnectionLost(_))));
        assert_eq!(aborted.run.samples().len(), 1);
        assert_eq!(meter.link().written().len(), 2);
    }

    #[test]
    fn test_stale_read_failure_aborts_before_actuation() {
        let mut gate = GateSource::new(MockLink::new());
        let mut meter = Multimeter::new(MockLink::new());
        let mut sink = CsvSink::from_writer(Vec::new());

        let aborted = fast()
            .run(sequence(&[0.1, 0.0]), &mut gate, &mut meter, &mut sink)
            .unwrap_err();

        assert!(matches!(
            aborted.cause,
            AcquisitionError::Sensing {
                gate_voltage: None,
                ..
            }
        ));
        assert!(gate.link().written().is_empty());
        assert!(aborted.to_string().starts_with("Run aborted after 0 samples"));
    }
}
