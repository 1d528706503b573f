// Dry run without hardware
//
// Feeds a scripted multimeter into the gated loop, writes the run logs to disk
// and reads the rolling log back as a DataFrame with a conductance column.

use clap::Parser;
use gfet_bench::{
    config::LogConfig, read_run_log, AcquisitionTiming, GateSource, GatedAcquisition, IvSweep,
    MockLink, Multimeter, RunLogs,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "simulated_sweep")]
#[command(version = "1.0")]
#[command(about = "Run a gate sweep against simulated instruments")]
struct Args {
    /// Directory for the run logs
    #[arg(short, long, default_value = "simulated_runs")]
    out: PathBuf,

    #[arg(long, allow_hyphen_values = true, default_value_t = -0.5)]
    v_low: f64,

    #[arg(long, allow_hyphen_values = true, default_value_t = 0.5)]
    v_high: f64,

    #[arg(long, default_value_t = 0.025)]
    step: f64,

    /// Position of the simulated Dirac point in volts
    #[arg(long, allow_hyphen_values = true, default_value_t = 0.1)]
    dirac: f64,
}

/// Channel resistance in ohms of an idealised GFET: a peak at the Dirac point.
fn channel_resistance(gate_voltage: f64, dirac: f64) -> f64 {
    let peak = 4.0e3;
    let width = 0.3;
    1.0e3 + peak / (1.0 + ((gate_voltage - dirac) / width).powi(2))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let sequence = IvSweep::between(args.v_low, args.v_high)
        .step_size(args.step)
        .into_sequence()?;

    // one stale reading, then one per setpoint
    let mut readings = vec![0.0];
    readings.extend(sequence.iter().map(|&v| channel_resistance(v, args.dirac)));

    let mut gate = GateSource::new(MockLink::new());
    let mut meter = Multimeter::new(MockLink::with_readings(&readings));

    let config = LogConfig {
        directory: args.out.clone(),
        ..LogConfig::default()
    };
    let mut logs = RunLogs::open(&config, chrono::Local::now())?;

    let acquisition = GatedAcquisition::new(AcquisitionTiming {
        settle: Duration::from_millis(1),
        conversion: Duration::ZERO,
    });
    let run = acquisition.run(sequence, &mut gate, &mut meter, &mut logs.fanout())?;
    println!(
        "Simulated {} samples, {} gate commands sent",
        run.samples().len(),
        gate.link().written().len()
    );

    let df = read_run_log(logs.latest_path())?;
    println!("{df}");

    let (mut best_gate, mut best_resistance) = (0.0, f64::MIN);
    for sample in run.samples() {
        if sample.measurement > best_resistance {
            best_gate = sample.gate_voltage;
            best_resistance = sample.measurement;
        }
    }
    println!("Resistance peaks at {best_gate} V ({best_resistance:.1} Ω)");
    println!("Historical log: {}", logs.history_path().display());

    Ok(())
}
