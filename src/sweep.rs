//! Gate-voltage setpoint sequences.
//!
//! Two patterns are supported: the repeated triangle sweep used for I/V
//! curves ([`IvSweep`]) and the bias-then-soak pattern ([`ConstantHold`]).
//! The builders validate their parameters; [`generate`] and
//! [`constant_hold`] are the unchecked generators behind them.

/// Smallest accepted sweep step in volts.
pub const MIN_STEP_SIZE: f64 = 1e-4;
/// Largest accepted sweep step in volts.
pub const MAX_STEP_SIZE: f64 = 0.025;
/// Gate setpoints must satisfy `-GATE_LIMIT < v < GATE_LIMIT`.
pub const GATE_LIMIT: f64 = 5.0;
/// Ramp increment of the constant-hold pattern.
pub const HOLD_RAMP_STEP: f64 = 0.01;
/// Longest sequence the checked builders produce.
pub const MAX_SETPOINTS: usize = 10_000_000;

/// Whether `volts` lies strictly inside the gate safety envelope.
pub fn is_safe_gate_voltage(volts: f64) -> bool {
    -GATE_LIMIT < volts && volts < GATE_LIMIT
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SweepConfigError {
    #[error("Step size {step} V too small (min {MIN_STEP_SIZE} V)")]
    StepTooSmall { step: f64 },

    #[error("Step size {step} V too large (max {MAX_STEP_SIZE} V)")]
    StepTooLarge { step: f64 },

    #[error("Sweep parameter is not a finite number")]
    NonFinite,

    #[error("{volts} V is outside the gate envelope of +/-{GATE_LIMIT} V")]
    OutsideEnvelope { volts: f64 },

    #[error("Sequence has no setpoints")]
    EmptySequence,

    #[error("Sequence must end with an exact 0 V setpoint")]
    MissingReturnToZero,

    #[error("Sweep would need more than {MAX_SETPOINTS} setpoints")]
    TooManySetpoints,
}

/// Ordered gate setpoints, always ending in an exact return to 0 V.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    setpoints: Vec<f64>,
}

impl Sequence {
    /// Wrap a hand-written list of setpoints.
    ///
    /// The list must be non-empty and end with `0.0`. Envelope checks are left
    /// to the acquisition loop, which skips offending points.
    pub fn from_setpoints(setpoints: Vec<f64>) -> Result<Self, SweepConfigError> {
        match setpoints.last() {
            None => Err(SweepConfigError::EmptySequence),
            Some(&last) if last != 0.0 => Err(SweepConfigError::MissingReturnToZero),
            Some(_) => Ok(Self { setpoints }),
        }
    }

    pub fn setpoints(&self) -> &[f64] {
        &self.setpoints
    }

    pub fn len(&self) -> usize {
        self.setpoints.len()
    }

    /// A constructed sequence is never empty.
    pub fn is_empty(&self) -> bool {
        self.setpoints.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, f64> {
        self.setpoints.iter()
    }
}

impl<'a> IntoIterator for &'a Sequence {
    type Item = &'a f64;
    type IntoIter = std::slice::Iter<'a, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.setpoints.iter()
    }
}

/// Half-open arithmetic progression `start, start + step, ...` stopping before `stop`.
///
/// Yields `max(0, ceil((stop - start) / step))` values; a zero or non-finite
/// ratio gives an empty leg.
fn progression(start: f64, stop: f64, step: f64) -> Vec<f64> {
    (0..progression_len(start, stop, step))
        .map(|i| start + i as f64 * step)
        .collect()
}

fn progression_len(start: f64, stop: f64, step: f64) -> usize {
    let count = ((stop - start) / step).ceil();
    if !count.is_finite() || count <= 0.0 {
        return 0;
    }
    count as usize
}

/// Repeated three-leg triangle: `0 -> v_high`, `v_high -> v_low`, `v_low -> 0`.
///
/// Each leg excludes its end point. The cycle is repeated `repeats` times
/// verbatim and the sequence closes with an exact `0`. Degenerate bounds give
/// empty legs instead of errors. Parameters are not validated here; use
/// [`IvSweep`] for checked construction.
pub fn generate(v_low: f64, v_high: f64, step_size: f64, repeats: usize) -> Sequence {
    let mut cycle = progression(0.0, v_high, step_size);
    cycle.extend(progression(v_high, v_low, -step_size));
    cycle.extend(progression(v_low, 0.0, step_size));

    let capacity = cycle.len().saturating_mul(repeats).min(MAX_SETPOINTS);
    let mut setpoints = Vec::with_capacity(capacity + 1);
    if !cycle.is_empty() {
        for _ in 0..repeats {
            setpoints.extend_from_slice(&cycle);
        }
    }
    setpoints.push(0.0);

    Sequence { setpoints }
}

/// Ramp to `gate_v` in 10 mV steps, hold it for `constant_steps` points and
/// ramp back. Both ramps include their end point.
pub fn constant_hold(gate_v: f64, constant_steps: usize) -> Sequence {
    let step = if gate_v == 0.0 {
        0.0
    } else {
        HOLD_RAMP_STEP * gate_v.signum()
    };

    let mut setpoints = progression(0.0, gate_v, step);
    setpoints.push(gate_v);
    setpoints.extend(std::iter::repeat(gate_v).take(constant_steps));
    setpoints.extend(progression(gate_v, 0.0, -step));
    setpoints.push(0.0);

    Sequence { setpoints }
}

fn check_envelope(volts: f64) -> Result<(), SweepConfigError> {
    if !volts.is_finite() {
        return Err(SweepConfigError::NonFinite);
    }
    if !is_safe_gate_voltage(volts) {
        return Err(SweepConfigError::OutsideEnvelope { volts });
    }
    Ok(())
}

/// Validate a sweep step against the accepted range.
pub fn check_step_size(step: f64) -> Result<(), SweepConfigError> {
    if !step.is_finite() {
        return Err(SweepConfigError::NonFinite);
    }
    if step < MIN_STEP_SIZE {
        return Err(SweepConfigError::StepTooSmall { step });
    }
    if step > MAX_STEP_SIZE {
        return Err(SweepConfigError::StepTooLarge { step });
    }
    Ok(())
}

/// Checked builder for a triangle I/V sweep.
///
/// ```rust
/// use gfet_bench::IvSweep;
///
/// let sequence = IvSweep::between(-0.5, 1.1)
///     .step_size(0.01)
///     .repeats(2)
///     .into_sequence()?;
/// assert_eq!(sequence.setpoints().last(), Some(&0.0));
/// # Ok::<(), gfet_bench::SweepConfigError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IvSweep {
    pub v_low: f64,
    pub v_high: f64,
    pub step_size: f64,
    pub repeats: usize,
}

impl IvSweep {
    /// One cycle with 10 mV steps between the given bounds.
    pub fn between(v_low: f64, v_high: f64) -> Self {
        Self {
            v_low,
            v_high,
            step_size: 0.01,
            repeats: 1,
        }
    }

    pub fn step_size(mut self, step_size: f64) -> Self {
        self.step_size = step_size;
        self
    }

    pub fn repeats(mut self, repeats: usize) -> Self {
        self.repeats = repeats;
        self
    }

    pub fn validate(&self) -> Result<(), SweepConfigError> {
        check_step_size(self.step_size)?;
        check_envelope(self.v_low)?;
        check_envelope(self.v_high)?;

        let cycle_len = progression_len(0.0, self.v_high, self.step_size)
            + progression_len(self.v_high, self.v_low, -self.step_size)
            + progression_len(self.v_low, 0.0, self.step_size);
        match cycle_len.checked_mul(self.repeats) {
            Some(len) if len < MAX_SETPOINTS => Ok(()),
            _ => Err(SweepConfigError::TooManySetpoints),
        }
    }

    pub fn into_sequence(self) -> Result<Sequence, SweepConfigError> {
        self.validate()?;
        Ok(generate(self.v_low, self.v_high, self.step_size, self.repeats))
    }
}

/// Checked builder for a bias-then-soak sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantHold {
    pub gate_v: f64,
    pub constant_steps: usize,
}

impl ConstantHold {
    pub fn at(gate_v: f64) -> Self {
        Self {
            gate_v,
            constant_steps: 100,
        }
    }

    pub fn hold_for(mut self, constant_steps: usize) -> Self {
        self.constant_steps = constant_steps;
        self
    }

    pub fn into_sequence(self) -> Result<Sequence, SweepConfigError> {
        check_envelope(self.gate_v)?;
        if self.constant_steps >= MAX_SETPOINTS {
            return Err(SweepConfigError::TooManySetpoints);
        }
        Ok(constant_hold(self.gate_v, self.constant_steps))
    }
}
