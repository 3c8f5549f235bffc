//! # Simulated Sampling Peripheral
//!
//! A thread-driven stand-in for the converter + DMA pair. Each transfer runs
//! on its own worker thread, optionally paced to the real block duration,
//! writes quantized readings into the shared buffer and then fires the
//! completion notifier, the same way the hardware would.
//!
//! Transfers can be scripted to fault or stall so the channel's error and
//! timeout paths can be exercised.

use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::acquisition::{CompletionNotifier, SampleBuffer, SamplingPeripheral};
use crate::config::SamplingSpec;
use crate::error::Result;

/// What the simulated converter is listening to.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalSource {
    /// Pure sine around mid-scale.
    Tone {
        frequency: f32,
        /// Peak amplitude as a fraction of half-scale (0.0..=1.0).
        amplitude: f32,
        /// Constant offset in converter codes, e.g. a biased input stage.
        dc_offset: i32,
    },
    /// A flat line at mid-scale.
    Silence,
    /// Readings repeated cyclically.
    Codes(Vec<u16>),
}

impl SignalSource {
    pub fn tone(frequency: f32) -> Self {
        SignalSource::Tone {
            frequency,
            amplitude: 0.8,
            dc_offset: 0,
        }
    }
}

/// Behaviour of a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferScript {
    /// Fill the buffer and notify completion.
    Complete,
    /// Leave the buffer untouched and report the given fault code.
    Fault(u32),
    /// Never notify.
    Stall,
}

pub struct SimulatedAdc {
    spec: SamplingSpec,
    source: SignalSource,
    paced: bool,
    script: VecDeque<TransferScript>,
    next_index: u64,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedAdc {
    pub fn new(spec: SamplingSpec, source: SignalSource) -> Self {
        Self {
            spec,
            source,
            paced: false,
            script: VecDeque::new(),
            next_index: 0,
            cancel: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Makes every transfer take as long as the block would at the real rate.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// Queues behaviours for upcoming transfers. Once the queue is drained
    /// every transfer completes normally.
    pub fn with_script(mut self, script: impl IntoIterator<Item = TransferScript>) -> Self {
        self.script.extend(script);
        self
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Simulated transfer worker panicked");
            }
        }
    }
}

/// Quantizes `length` readings of `source` starting at absolute sample `start`.
pub fn synthesize(
    spec: &SamplingSpec,
    source: &SignalSource,
    start: u64,
    length: usize,
) -> Vec<u16> {
    let max_code = spec.max_code() as f64;
    let mid = max_code / 2.0;
    match source {
        SignalSource::Tone {
            frequency,
            amplitude,
            dc_offset,
        } => (0..length as u64)
            .map(|i| {
                let t = (start + i) as f64 / spec.sample_rate as f64;
                let value = mid
                    + *amplitude as f64 * mid * (2.0 * PI * *frequency as f64 * t).sin()
                    + *dc_offset as f64;
                value.round().clamp(0.0, max_code) as u16
            })
            .collect(),
        SignalSource::Silence => vec![mid.round() as u16; length],
        SignalSource::Codes(codes) if codes.is_empty() => vec![0; length],
        SignalSource::Codes(codes) => codes
            .iter()
            .cycle()
            .skip((start % codes.len() as u64) as usize)
            .take(length)
            .map(|&c| c.min(spec.max_code()))
            .collect(),
    }
}

impl SamplingPeripheral for SimulatedAdc {
    fn start(
        &mut self,
        buffer: SampleBuffer,
        length: usize,
        notifier: CompletionNotifier,
    ) -> Result<()> {
        self.join_worker();
        self.cancel.store(false, Ordering::Release);

        let script = self.script.pop_front().unwrap_or(TransferScript::Complete);
        let readings = match script {
            TransferScript::Complete => {
                synthesize(&self.spec, &self.source, self.next_index, length)
            }
            _ => Vec::new(),
        };
        self.next_index += length as u64;

        let cancel = Arc::clone(&self.cancel);
        let pace = if self.paced {
            Some(self.spec.block_duration())
        } else {
            None
        };

        self.worker = Some(thread::spawn(move || {
            let started = Instant::now();
            let wait_until = |total: Duration| {
                while started.elapsed() < total {
                    if cancel.load(Ordering::Acquire) {
                        return false;
                    }
                    thread::sleep(Duration::from_millis(2));
                }
                !cancel.load(Ordering::Acquire)
            };

            match script {
                TransferScript::Complete => {
                    if let Some(pace) = pace {
                        if !wait_until(pace) {
                            return;
                        }
                    }
                    if cancel.load(Ordering::Acquire) {
                        return;
                    }
                    buffer.lock().copy_from_slice(&readings);
                    notifier.notify();
                }
                TransferScript::Fault(code) => notifier.notify_error(code),
                TransferScript::Stall => {
                    while !cancel.load(Ordering::Acquire) {
                        thread::sleep(Duration::from_millis(2));
                    }
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.cancel.store(true, Ordering::Release);
        self.join_worker();
    }
}

impl Drop for SimulatedAdc {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SAMPLING;

    #[test]
    fn silence_sits_at_mid_scale() {
        let codes = synthesize(&SAMPLING, &SignalSource::Silence, 0, 16);
        assert!(codes.iter().all(|&c| c == 2048));
    }

    #[test]
    fn tone_stays_inside_converter_range() {
        let loud = SignalSource::Tone {
            frequency: 440.0,
            amplitude: 1.0,
            dc_offset: 600,
        };
        let codes = synthesize(&SAMPLING, &loud, 0, 2048);
        assert!(codes.iter().all(|&c| c <= SAMPLING.max_code()));
        assert!(codes.iter().any(|&c| c == SAMPLING.max_code()));
    }

    #[test]
    fn tone_phase_continues_across_blocks() {
        let source = SignalSource::tone(110.0);
        let whole = synthesize(&SAMPLING, &source, 0, 64);
        let second = synthesize(&SAMPLING, &source, 32, 32);
        assert_eq!(&whole[32..], &second[..]);
    }

    #[test]
    fn codes_are_clamped_to_resolution() {
        let codes = synthesize(&SAMPLING, &SignalSource::Codes(vec![0, 9000]), 0, 4);
        assert_eq!(codes, vec![0, 4095, 0, 4095]);
    }
}
