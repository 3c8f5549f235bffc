//! # Tuner - Command Line Front End
//!
//! Runs the acquisition and pitch-detection core against either the default
//! microphone or a simulated converter and renders every cycle in the
//! terminal.
//!
//! ## Architecture
//! - **Main Thread**: the tuning cycle (acquire, analyse, classify, present)
//! - **Audio Callback**: CPAL fills the armed transfer and signals completion
//! - **Transmitter Thread**: drains the diagnostic channel to stderr
//! - **Input Thread**: `q` + Enter requests a shutdown

mod audio;
mod ui;

use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, Sender};
use tuner_core::acquisition::{SamplingPeripheral, ThreadPark};
use tuner_core::diagnostics::{self, LogSink};
use tuner_core::display::Presenter;
use tuner_core::peripheral::{SignalSource, SimulatedAdc};
use tuner_core::{SAMPLING, Tuner, TunerConfig};

use ui::terminal::{NullPresenter, TerminalPresenter};

/// Pending diagnostic lines before the sink starts dropping.
const DIAGNOSTIC_QUEUE: usize = 64;
/// `try_send` attempts per diagnostic line.
const DIAGNOSTIC_RETRIES: usize = 8;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "tuner")]
#[command(about = "Instrument tuner: dominant pitch and cents deviation", long_about = None)]
struct Args {
    /// Use a simulated converter playing a tone at this frequency instead of the microphone
    #[arg(long, value_name = "HZ")]
    simulate: Option<f32>,

    /// Stop after this many cycles
    #[arg(long, value_name = "N")]
    cycles: Option<u64>,

    /// JSON file with tuner settings
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// In-tune window in cents (overrides the config file)
    #[arg(long, value_name = "CENTS")]
    tolerance: Option<f32>,

    /// Microphone gain before quantization
    #[arg(long, value_name = "FACTOR", default_value = "1.0")]
    gain: f32,

    /// Print one JSON cycle report per line instead of the tuner screen
    #[arg(long)]
    json: bool,

    /// Send the tuner's diagnostic report lines to stderr
    #[arg(long)]
    diagnostics: bool,

    /// Raise log verbosity (-v debug, -vv trace with block dumps)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => TunerConfig::default(),
    };
    if let Some(tolerance) = args.tolerance {
        config.tolerance_cents = tolerance;
    }
    if args.verbose >= 2 {
        config.dump_blocks = true;
    }
    log::debug!("Configuration: {:?}", config);

    match args.simulate {
        Some(frequency) => {
            log::info!("Simulating a {:.2} Hz tone", frequency);
            let adc = SimulatedAdc::new(SAMPLING, SignalSource::tone(frequency)).paced(true);
            run_tuner(adc, config, &args)
        }
        None => {
            let mic = audio::MicAdc::open(SAMPLING, args.gain)
                .context("Failed to start audio capture")?;
            log::info!("Audio capture started at {} Hz", mic.device_rate());
            run_tuner(mic, config, &args)
        }
    }
}

/// Reads a [`TunerConfig`] from a JSON file. Missing fields keep defaults.
fn load_config(path: &Path) -> Result<TunerConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: TunerConfig = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Runs the cycle loop on the current thread until the cycle limit, a `q`
/// on stdin, or a fatal configuration error.
fn run_tuner<P: SamplingPeripheral>(
    peripheral: P,
    config: TunerConfig,
    args: &Args,
) -> Result<()> {
    let tolerance = config.tolerance_cents;
    let mut tuner = Tuner::new(peripheral, ThreadPark, config).context("Invalid tuner setup")?;

    let transmitter = if args.diagnostics {
        let (sink, lines) = diagnostics::channel_sink(DIAGNOSTIC_QUEUE, DIAGNOSTIC_RETRIES);
        tuner = tuner.with_sink(Box::new(sink));
        Some(spawn_transmitter(lines))
    } else if args.verbose > 0 {
        tuner = tuner.with_sink(Box::new(LogSink));
        None
    } else {
        None
    };

    // The sender stays alive here so a closed stdin does not stop the loop.
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    spawn_quit_listener(shutdown_tx.clone());

    let mut presenter: Box<dyn Presenter> = if args.json {
        Box::new(NullPresenter)
    } else {
        Box::new(TerminalPresenter::new(tolerance))
    };

    log::info!("Entering tuning loop (q + Enter to quit)");
    let cycles = tuner.run(presenter.as_mut(), args.cycles, Some(&shutdown_rx), |report| {
        if args.json {
            match serde_json::to_string(report) {
                Ok(line) => println!("{}", line),
                Err(e) => log::error!("Failed to serialize cycle report: {}", e),
            }
        }
    })?;
    log::info!("Tuning loop finished after {} cycles", cycles);

    drop(tuner);
    drop(shutdown_tx);
    if let Some(handle) = transmitter {
        if handle.join().is_err() {
            log::error!("Diagnostic transmitter panicked");
        }
    }
    Ok(())
}

/// Drains diagnostic lines to stderr until the sink is dropped.
fn spawn_transmitter(lines: Receiver<String>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for line in lines {
            eprintln!("{}", line);
        }
    })
}

/// Sends a shutdown request when `q` is entered on stdin.
fn spawn_quit_listener(shutdown: Sender<()>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) if line.trim().eq_ignore_ascii_case("q") => {
                    let _ = shutdown.try_send(());
                    return;
                }
                Ok(_) => {}
                Err(_) => return,
            }
        }
    });
}
