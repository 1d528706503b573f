// Gate sweep on real hardware
//
// Drives the gate through a triangle sweep (or a constant-hold soak), reads
// the multimeter at every setpoint and logs each row to the rolling and the
// historical run log.

use clap::{Parser, Subcommand};
use gfet_bench::{
    BenchConfig, ConstantHold, GateSource, GatedAcquisition, IvSweep, Multimeter, RunLogs,
    SerialLink,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "iv_sweep")]
#[command(version = "1.0")]
#[command(about = "Sweep the GFET gate voltage and log the channel reading")]
struct Args {
    /// Serial port of the function generator driving the gate
    #[arg(long, default_value = "/dev/ttyUSB0")]
    gate_port: String,

    /// Serial port of the multimeter
    #[arg(long, default_value = "/dev/ttyS0")]
    meter_port: String,

    /// Bench configuration (TOML); defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, help = "Show debug information and detailed logs")]
    verbose: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Triangle sweep 0 -> high -> 0 -> low -> 0
    Triangle {
        #[arg(long, allow_hyphen_values = true, default_value_t = 0.0)]
        v_low: f64,
        #[arg(long, allow_hyphen_values = true, default_value_t = 1.1)]
        v_high: f64,
        #[arg(long, default_value_t = 0.01)]
        step: f64,
        #[arg(long, default_value_t = 1)]
        repeats: usize,
    },
    /// Ramp to a fixed gate voltage, hold it, ramp back
    Hold {
        #[arg(long, allow_hyphen_values = true)]
        gate_v: f64,
        #[arg(long, default_value_t = 100)]
        steps: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let config = match &args.config {
        Some(path) => BenchConfig::load(path)?,
        None => BenchConfig::default(),
    };

    let sequence = match args.mode {
        Mode::Triangle {
            v_low,
            v_high,
            step,
            repeats,
        } => IvSweep::between(v_low, v_high)
            .step_size(step)
            .repeats(repeats)
            .into_sequence()?,
        Mode::Hold { gate_v, steps } => ConstantHold::at(gate_v).hold_for(steps).into_sequence()?,
    };

    println!("GFET Gate Sweep");
    println!("===============");
    println!("Setpoints: {}", sequence.len());

    let mut gate = GateSource::new(SerialLink::open(&args.gate_port, config.gate.clone())?);
    println!("✓ Gate source: {}", gate.identify()?);
    gate.select_dc_function()?;

    let mut meter = Multimeter::new(SerialLink::open(&args.meter_port, config.meter.clone())?);
    println!("✓ Multimeter: {}", meter.identify()?);
    meter.enable_remote()?;

    let mut logs = RunLogs::open(&config.logs, chrono::Local::now())?;
    println!("Logging to {}", logs.history_path().display());

    let acquisition = GatedAcquisition::new(config.timing.into());
    let outcome = acquisition.run(sequence, &mut gate, &mut meter, &mut logs.fanout());
    match outcome {
        Ok(run) => {
            println!("\n✓ Recorded {} samples", run.samples().len());
            if !run.skipped().is_empty() {
                println!("  Skipped {} setpoints outside ±5 V", run.skipped().len());
            }
        }
        Err(aborted) => {
            eprintln!("\n✗ {aborted}");
            eprintln!(
                "  {} samples were flushed to {} before the fault",
                aborted.run.samples().len(),
                logs.latest_path().display()
            );
            return Err(aborted.into());
        }
    }

    Ok(())
}
