//! # Tuning Cycle
//!
//! One cycle runs the pipeline strictly one way:
//! acquisition -> spectral analysis -> dominant frequency -> classification
//! -> presentation. [`Tuner::run`] repeats it until told to stop.
//!
//! Only configuration errors abort the loop. Transfer faults, timeouts,
//! silent blocks and out-of-range notes are all handled inside the cycle
//! and show up in the [`CycleReport`].

use crossbeam_channel::{Receiver, TryRecvError};
use serde::Serialize;

use crate::acquisition::{AcquisitionChannel, PowerControl, SamplingPeripheral, WaitOutcome};
use crate::config::{SAMPLING, SamplingSpec, TunerConfig};
use crate::diagnostics::{self, DiagnosticSink};
use crate::display::{DisplayFrame, Presenter};
use crate::error::{Result, TunerError};
use crate::fft::{RustFftTransform, SpectralAnalyzer, Transform};
use crate::pitch::{self, Peak};
use crate::tuning::{self, PitchObservation, StringReading, TuningState};

/// What happened during one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub acquisition: WaitOutcome,
    pub peak: Option<Peak>,
    pub frequency: Option<f32>,
    pub state: Option<TuningState>,
    pub observation: Option<PitchObservation>,
    /// Open guitar string the note is close to.
    pub string: Option<StringReading>,
}

impl CycleReport {
    fn empty(cycle: u64, acquisition: WaitOutcome) -> Self {
        Self {
            cycle,
            acquisition,
            peak: None,
            frequency: None,
            state: None,
            observation: None,
            string: None,
        }
    }
}

/// The tuner: one acquisition channel feeding one analyzer.
pub struct Tuner<P, W, T = RustFftTransform> {
    channel: AcquisitionChannel<P, W>,
    analyzer: SpectralAnalyzer<T>,
    config: TunerConfig,
    sink: Option<Box<dyn DiagnosticSink>>,
    cycles: u64,
}

impl<P: SamplingPeripheral, W: PowerControl> Tuner<P, W, RustFftTransform> {
    /// A tuner on the fixed converter constants in [`SAMPLING`].
    pub fn new(peripheral: P, power: W, config: TunerConfig) -> Result<Self> {
        Self::with_spec(SAMPLING, peripheral, power, config)
    }

    pub fn with_spec(
        spec: SamplingSpec,
        peripheral: P,
        power: W,
        config: TunerConfig,
    ) -> Result<Self> {
        spec.validate()?;
        let transform = RustFftTransform::new(spec.block_len);
        Self::with_transform(spec, peripheral, power, transform, config)
    }
}

impl<P: SamplingPeripheral, W: PowerControl, T: Transform> Tuner<P, W, T> {
    /// Checks every startup precondition before the loop can be entered.
    pub fn with_transform(
        spec: SamplingSpec,
        peripheral: P,
        power: W,
        transform: T,
        config: TunerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let analyzer = SpectralAnalyzer::with_transform(spec, transform, &config)?;
        let channel = AcquisitionChannel::new(peripheral, power, spec.block_len)
            .with_wait_policy(config.wait_policy())
            .with_error_policy(config.on_transfer_error);
        log::info!(
            "Tuner ready: {} samples at {} Hz, {} bits, {:.2} Hz per bin",
            spec.block_len,
            spec.sample_rate,
            spec.resolution_bits,
            spec.bin_width()
        );
        Ok(Self {
            channel,
            analyzer,
            config,
            sink: None,
            cycles: 0,
        })
    }

    /// Attaches a diagnostic sink. Without one the tuner only logs.
    pub fn with_sink(mut self, sink: Box<dyn DiagnosticSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    pub fn channel(&self) -> &AcquisitionChannel<P, W> {
        &self.channel
    }

    fn emit(&self, line: &str) {
        if let Some(sink) = &self.sink {
            sink.emit(line);
        }
    }

    /// Acquires one block, analyses it and presents the verdict.
    pub fn run_cycle(&mut self, presenter: &mut dyn Presenter) -> Result<CycleReport> {
        let spec = *self.analyzer.spec();
        let cycle = self.cycles;
        self.cycles += 1;

        self.channel.start_acquisition(spec.block_len)?;
        let outcome = self.channel.await_completion();

        match outcome {
            WaitOutcome::Ready => {}
            WaitOutcome::Faulted(code) => {
                self.emit(&format!("ADC Error, code: 0x{:X}", code));
            }
            WaitOutcome::Timeout => {
                self.emit("Acquisition timed out");
                presenter.present(&DisplayFrame::NoData);
                return Ok(CycleReport::empty(cycle, outcome));
            }
        }

        let dump = self.config.dump_blocks;
        let analyzer = &mut self.analyzer;
        let spectrum = self
            .channel
            .with_samples(|samples| {
                if dump {
                    dump_lines("pAudioData", diagnostics::dump_samples(samples));
                }
                analyzer.process(samples)
            })
            .ok_or_else(|| TunerError::Configuration("no block after a completed wait".into()))??;

        if dump {
            let output = self.analyzer.transform_output();
            dump_lines("pFftOutput", diagnostics::dump_transform_output(output));
            dump_lines("pFftOutputMag", diagnostics::dump_spectrum(&spectrum, &spec));
        }

        let (peak, frequency) = match pitch::dominant_frequency(&spectrum, &spec) {
            Ok(dominant) => (Some(dominant.peak), dominant.frequency),
            Err(err @ TunerError::BinOutOfRange { .. }) => {
                log::warn!("{}", err);
                self.emit(&format!("Error: {}", err));
                (None, 0.0)
            }
            Err(err) => return Err(err),
        };

        let classification = tuning::classify(frequency, self.config.tolerance_cents);
        for line in diagnostics::report_lines(&classification) {
            self.emit(&line);
        }
        let string = classification
            .observation
            .as_ref()
            .and_then(|_| StringReading::detect(frequency));
        if let Some(reading) = &string {
            self.emit(&diagnostics::string_line(reading));
        }
        presenter.present(&DisplayFrame::from_classification(&classification));

        log::debug!("Cycle {}: {:.2} Hz -> {:?}", cycle, frequency, classification.state);
        Ok(CycleReport {
            cycle,
            acquisition: outcome,
            peak,
            frequency: Some(frequency),
            state: Some(classification.state),
            observation: classification.observation,
            string,
        })
    }

    /// Repeats [`Tuner::run_cycle`] until `limit` cycles ran, a shutdown
    /// message arrives, or a configuration error stops the loop. `on_report`
    /// sees every cycle report.
    pub fn run(
        &mut self,
        presenter: &mut dyn Presenter,
        limit: Option<u64>,
        shutdown: Option<&Receiver<()>>,
        mut on_report: impl FnMut(&CycleReport),
    ) -> Result<u64> {
        let mut completed = 0;
        loop {
            if limit.is_some_and(|limit| completed >= limit) {
                break;
            }
            if let Some(shutdown) = shutdown {
                match shutdown.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => {
                        log::info!("Received shutdown signal");
                        break;
                    }
                    Err(TryRecvError::Empty) => {}
                }
            }
            let report = self.run_cycle(presenter)?;
            on_report(&report);
            completed += 1;
        }
        Ok(completed)
    }
}

fn dump_lines(title: &str, lines: Vec<String>) {
    log::trace!("{}[idx]:", title);
    for line in lines {
        log::trace!("{}", line);
    }
}
