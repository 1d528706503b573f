// Waveform capture and spectrum
//
// Captures traces from a Tektronix TDS scope and prints the strongest spectral
// component of each one.

use clap::Parser;
use gfet_bench::{magnitude_spectrum, BenchConfig, SerialLink, TdsScope};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "scope_spectrum")]
#[command(version = "1.0")]
#[command(about = "Capture TDS waveforms and print their dominant frequency")]
struct Args {
    /// Serial port of the oscilloscope
    #[arg(default_value = "/dev/ttyUSB1")]
    port: String,

    /// Number of captures
    #[arg(short = 'n', long, default_value_t = 1)]
    captures: usize,

    /// Keep the DC component in the transform input
    #[arg(long)]
    keep_dc: bool,

    /// Bench configuration (TOML); defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the first spectrum bins as a table
    #[arg(long)]
    table: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => BenchConfig::load(path)?,
        None => BenchConfig::default(),
    };

    let mut scope = TdsScope::new(SerialLink::open(&args.port, config.scope)?)?;
    println!("Connected to scope on {}\n", args.port);

    for capture in 1..=args.captures {
        let waveform = scope.acquire_waveform()?;
        let spectrum = magnitude_spectrum(&waveform, !args.keep_dc)?;

        print!("Capture {capture}: {} samples", waveform.len());
        match spectrum.dominant_peak() {
            Some((hz, magnitude)) => println!(", peak at {hz:.2} Hz (|X| = {magnitude:.4e})"),
            None => println!(", no spectrum"),
        }

        if args.table {
            let (frequency, _) = spectrum.below_nyquist();
            log::debug!("{} bins up to Nyquist", frequency.len());
            println!("{}", spectrum.to_data_frame()?.head(Some(10)));
        }
    }

    Ok(())
}
