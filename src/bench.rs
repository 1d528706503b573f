//! Drivers for the two instruments of the gate-sweep bench.
//!
//! The gate is driven by a function generator in DC mode (the offset of
//! channel 1 is the gate voltage); the channel current is read from a bench
//! multimeter over RS-232.

use crate::instrument_link::{InstrumentLink, LinkError};
use crate::sweep::is_safe_gate_voltage;
use std::thread;
use std::time::Duration;

const IDENTIFY: &str = "*IDN?";
const SELECT_DC_FUNCTION: &str = "FUNCTION DC";
const TRIGGER_READING: &str = "READ?";
const REMOTE_MODE: &str = "SYST:REM";
const CLEAR_STATUS: &str = "*CLS";

/// Time the multimeter needs after switching to remote mode.
const REMOTE_SETTLE: Duration = Duration::from_millis(500);

fn identify<L: InstrumentLink>(link: &mut L) -> Result<String, LinkError> {
    let id = link.query(IDENTIFY).map_err(|e| {
        if e.is_retryable() {
            LinkError::ConnectionLost(format!("no answer to identification query: {e}"))
        } else {
            e
        }
    })?;
    if id.is_empty() {
        return Err(LinkError::ConnectionLost(
            "empty answer to identification query".to_string(),
        ));
    }
    Ok(id)
}

/// Outcome of asking the gate source for a new setpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateActuation {
    Applied,
    /// Outside the safety envelope; nothing was sent.
    Rejected,
}

/// Function generator used as a DC gate supply.
#[derive(Debug)]
pub struct GateSource<L> {
    link: L,
}

impl<L: InstrumentLink> GateSource<L> {
    pub fn new(link: L) -> Self {
        Self { link }
    }

    /// Identification string. A silent instrument is reported as a lost connection.
    pub fn identify(&mut self) -> Result<String, LinkError> {
        identify(&mut self.link)
    }

    pub fn select_dc_function(&mut self) -> Result<(), LinkError> {
        log::debug!("Selecting DC function on gate source");
        self.link.write(SELECT_DC_FUNCTION)
    }

    /// Apply `volts` as the channel 1 offset, unless it is outside the envelope.
    pub fn apply(&mut self, volts: f64) -> Result<GateActuation, LinkError> {
        if !is_safe_gate_voltage(volts) {
            return Ok(GateActuation::Rejected);
        }
        self.link.write(&format!("SOURCE1:VOLTAGE:OFFSET {volts}"))?;
        Ok(GateActuation::Applied)
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn into_inner(self) -> L {
        self.link
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MeterError {
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Reading {raw:?} is not a number")]
    Unparseable { raw: String },
}

impl MeterError {
    /// Timeouts and garbled readings are worth one more try.
    pub fn is_sensing_fault(&self) -> bool {
        match self {
            Self::Link(e) => e.is_retryable(),
            Self::Unparseable { .. } => true,
        }
    }
}

/// Bench multimeter, read once per gate setpoint.
#[derive(Debug)]
pub struct Multimeter<L> {
    link: L,
}

impl<L: InstrumentLink> Multimeter<L> {
    /// Wrap a link to a multimeter that the caller already configured for the
    /// intended function (e.g. DC current).
    pub fn new(link: L) -> Self {
        Self { link }
    }

    pub fn identify(&mut self) -> Result<String, LinkError> {
        identify(&mut self.link)
    }

    /// Switch to remote control, clear the status registers and wait for the
    /// meter to settle.
    pub fn enable_remote(&mut self) -> Result<(), LinkError> {
        log::debug!("Switching multimeter to remote mode");
        self.link.write(REMOTE_MODE)?;
        self.link.write(CLEAR_STATUS)?;
        thread::sleep(REMOTE_SETTLE);
        Ok(())
    }

    /// Trigger one reading, wait `conversion` for it and parse the result.
    ///
    /// The meter has no completion signal, so the wait is a fixed delay.
    pub fn read_value(&mut self, conversion: Duration) -> Result<f64, MeterError> {
        self.link.write(TRIGGER_READING)?;
        thread::sleep(conversion);
        let raw = self.link.read()?;
        raw.trim()
            .parse::<f64>()
            .map_err(|_| MeterError::Unparseable { raw })
    }

    /// Drop readings that arrived after their read had already timed out.
    pub fn discard_pending(&mut self) -> Result<(), LinkError> {
        self.link.clear_input()
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn into_inner(self) -> L {
        self.link
    }
}
