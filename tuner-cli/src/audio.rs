//! # Microphone Sampling Peripheral
//!
//! Drives the acquisition channel from the default input device via CPAL.
//! The device runs at its own rate, so the callback resamples the stream
//! down to the fixed converter rate, quantizes it to converter codes and
//! writes it into the armed transfer. Once the block is full the callback
//! fires the completion notifier, exactly like the converter's DMA would.
//!
//! Samples arriving while no transfer is armed are discarded.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SupportedStreamConfigRange;
use tuner_core::acquisition::{CompletionNotifier, SampleBuffer, SamplingPeripheral};
use tuner_core::{SamplingSpec, TunerError};

/// Preferred device rate. Anything works, it is resampled anyway.
const PREFERRED_DEVICE_RATE: u32 = 44100;

/// Transfer currently being filled by the audio callback.
struct ActiveTransfer {
    buffer: SampleBuffer,
    length: usize,
    written: usize,
    notifier: CompletionNotifier,
}

type TransferSlot = Arc<spin::Mutex<Option<ActiveTransfer>>>;

/// Linear-interpolating rate converter, state kept across callbacks.
struct Resampler {
    step: f64,
    position: f64,
    previous: f32,
}

impl Resampler {
    fn new(input_rate: f64, output_rate: f64) -> Self {
        Self {
            step: input_rate / output_rate,
            position: 0.0,
            previous: 0.0,
        }
    }

    fn push(&mut self, sample: f32, mut emit: impl FnMut(f32)) {
        while self.position <= 1.0 {
            let t = self.position as f32;
            emit(self.previous + (sample - self.previous) * t);
            self.position += self.step;
        }
        self.position -= 1.0;
        self.previous = sample;
    }
}

/// Maps a sample in [-1.0, 1.0] to a converter code around mid-scale.
fn quantize(sample: f32, gain: f32, spec: &SamplingSpec) -> u16 {
    let mid = spec.mid_scale();
    let code = (sample * gain).clamp(-1.0, 1.0) * mid + mid;
    code.round().clamp(0.0, spec.max_code() as f32) as u16
}

/// Converter fault code for a stream error.
fn fault_code(err: &cpal::StreamError) -> u32 {
    match err {
        cpal::StreamError::DeviceNotAvailable => FAULT_DEVICE_NOT_AVAILABLE,
        _ => FAULT_BACKEND,
    }
}

/// The input device has gone away.
const FAULT_DEVICE_NOT_AVAILABLE: u32 = 0x1;
/// Any other stream error reported by the audio backend.
const FAULT_BACKEND: u32 = 0x2;

/// Writes one callback's worth of frames into the armed transfer.
///
/// Only the first channel of each frame is used. The transfer is completed
/// and its notifier fired once exactly `length` samples are written; the
/// rest of `data` is discarded, as is everything arriving while no transfer
/// is armed.
///
/// # Arguments
/// * `slot` - The transfer currently armed, if any
/// * `data` - Interleaved device frames
/// * `channels` - Channels per frame
/// * `resampler` - Rate converter state carried across callbacks
/// * `gain` - Input gain applied before quantization
/// * `spec` - Converter constants to quantize to
fn feed(
    slot: &mut Option<ActiveTransfer>,
    data: &[f32],
    channels: usize,
    resampler: &mut Resampler,
    gain: f32,
    spec: &SamplingSpec,
) {
    let Some(transfer) = slot.as_mut() else {
        return;
    };

    let mut complete = false;
    {
        let mut buffer = transfer.buffer.lock();
        for frame in data.chunks(channels.max(1)) {
            resampler.push(frame[0], |sample| {
                if transfer.written < transfer.length {
                    buffer[transfer.written] = quantize(sample, gain, spec);
                    transfer.written += 1;
                }
            });
            if transfer.written >= transfer.length {
                complete = true;
                break;
            }
        }
    }

    if complete {
        if let Some(done) = slot.take() {
            done.notifier.notify();
        }
    }
}

/// Faults the armed transfer, if any, with `code`.
fn fault(slot: &mut Option<ActiveTransfer>, code: u32) {
    if let Some(failed) = slot.take() {
        failed.notifier.notify_error(code);
    }
}

/// Transfer slot shared with the audio callback. This half is what the
/// acquisition channel drives.
pub struct CaptureSlot(TransferSlot);

impl SamplingPeripheral for CaptureSlot {
    fn start(
        &mut self,
        buffer: SampleBuffer,
        length: usize,
        notifier: CompletionNotifier,
    ) -> tuner_core::Result<()> {
        let mut slot = self.0.lock();
        if slot.is_some() {
            return Err(TunerError::Configuration(
                "microphone transfer already armed".to_string(),
            ));
        }
        *slot = Some(ActiveTransfer {
            buffer,
            length,
            written: 0,
            notifier,
        });
        Ok(())
    }

    fn stop(&mut self) {
        // Holding the slot lock excludes the callback, so no notification
        // for the dropped transfer can follow.
        self.0.lock().take();
    }
}

/// The default input device acting as the tuner's converter.
pub struct MicAdc {
    stream: cpal::Stream,
    capture: CaptureSlot,
    device_rate: u32,
}

impl MicAdc {
    /// Opens the default input device and starts streaming.
    ///
    /// # Arguments
    /// * `spec` - The converter constants to emulate
    /// * `gain` - Input gain applied before quantization
    ///
    /// # Returns
    /// * The running peripheral, or an error when no usable input exists
    pub fn open(spec: SamplingSpec, gain: f32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No input device available"))?;

        log::info!("Using audio input device: {}", device.name()?);

        let configs = device.supported_input_configs()?.collect::<Vec<_>>();
        let supported_config = find_supported_config(configs, PREFERRED_DEVICE_RATE)
            .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

        let rate = PREFERRED_DEVICE_RATE.clamp(
            supported_config.min_sample_rate().0,
            supported_config.max_sample_rate().0,
        );
        let config = supported_config.with_sample_rate(cpal::SampleRate(rate));
        let channels = config.channels() as usize;
        let config: cpal::StreamConfig = config.into();

        log::info!(
            "Selected device rate: {} Hz, {} channel(s), resampled to {} Hz",
            rate,
            channels,
            spec.sample_rate
        );

        let slot: TransferSlot = Arc::new(spin::Mutex::new(None));
        let callback_slot = Arc::clone(&slot);
        let error_slot = Arc::clone(&slot);
        let mut resampler = Resampler::new(rate as f64, spec.sample_rate as f64);

        let err_fn = move |err: cpal::StreamError| {
            log::error!("An error occurred on the audio stream: {}", err);
            fault(&mut error_slot.lock(), fault_code(&err));
        };

        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Never wait inside the audio callback; a busy slot means
                // the channel is stopping the transfer.
                if let Some(mut slot) = callback_slot.try_lock() {
                    feed(&mut slot, data, channels, &mut resampler, gain, &spec);
                }
            },
            err_fn,
            None,
        )?;

        stream.play()?;

        Ok(Self {
            stream,
            capture: CaptureSlot(slot),
            device_rate: rate,
        })
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

impl SamplingPeripheral for MicAdc {
    fn start(
        &mut self,
        buffer: SampleBuffer,
        length: usize,
        notifier: CompletionNotifier,
    ) -> tuner_core::Result<()> {
        self.capture.start(buffer, length, notifier)
    }

    fn stop(&mut self) {
        self.capture.stop();
    }
}

impl Drop for MicAdc {
    fn drop(&mut self) {
        self.stop();
        if let Err(e) = self.stream.pause() {
            log::warn!("Error pausing stream: {}", e);
        }
    }
}

/// Finds the best supported input configuration for the target rate.
///
/// Prefers 32-bit float formats with the fewest channels, then the range
/// closest to `target_rate`.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min_diff = (c.min_sample_rate().0 as i64 - target_rate as i64).abs();
            let max_diff = (c.max_sample_rate().0 as i64 - target_rate as i64).abs();
            let in_range =
                c.min_sample_rate().0 <= target_rate && target_rate <= c.max_sample_rate().0;
            let distance = if in_range { 0 } else { min_diff.min(max_diff) };
            (c.channels(), distance)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tuner_core::SAMPLING;
    use tuner_core::acquisition::{AcquisitionChannel, ThreadPark, WaitOutcome, WaitPolicy};

    const BLOCK: usize = 8;

    fn capture_channel() -> (AcquisitionChannel<CaptureSlot, ThreadPark>, TransferSlot) {
        let slot: TransferSlot = Arc::new(spin::Mutex::new(None));
        let channel = AcquisitionChannel::new(CaptureSlot(Arc::clone(&slot)), ThreadPark, BLOCK)
            .with_wait_policy(WaitPolicy::Bounded(Duration::from_secs(1)));
        (channel, slot)
    }

    #[test]
    fn block_completes_after_exactly_length_samples() {
        let (mut channel, slot) = capture_channel();
        // Equal rates: the first push also emits the initial zero.
        let mut resampler = Resampler::new(1.0, 1.0);
        channel.start_acquisition(BLOCK).unwrap();

        feed(&mut slot.lock(), &[0.5; 3], 1, &mut resampler, 1.0, &SAMPLING);
        assert!(!channel.flag().is_set());
        assert_eq!(slot.lock().as_ref().map(|t| t.written), Some(4));

        feed(&mut slot.lock(), &[0.5; 10], 1, &mut resampler, 1.0, &SAMPLING);
        assert!(channel.flag().is_set());
        assert!(slot.lock().is_none());

        assert_eq!(channel.await_completion(), WaitOutcome::Ready);
        let block = channel.with_samples(|s| s.to_vec()).unwrap();
        assert_eq!(block[0], 2048);
        assert!(block[1..].iter().all(|&c| c == 3071));
    }

    #[test]
    fn samples_without_an_armed_transfer_are_dropped() {
        let (mut channel, slot) = capture_channel();
        let mut resampler = Resampler::new(1.0, 1.0);

        // Nothing armed yet.
        feed(&mut slot.lock(), &[1.0; 32], 1, &mut resampler, 1.0, &SAMPLING);
        assert!(slot.lock().is_none());

        channel.start_acquisition(BLOCK).unwrap();
        feed(&mut slot.lock(), &[-1.0; 32], 1, &mut resampler, 1.0, &SAMPLING);
        assert_eq!(channel.await_completion(), WaitOutcome::Ready);

        // The finished transfer is gone, later audio must not touch the block.
        feed(&mut slot.lock(), &[1.0; 32], 1, &mut resampler, 1.0, &SAMPLING);
        let block = channel.with_samples(|s| s.to_vec()).unwrap();
        assert!(block[1..].iter().all(|&c| c == 0));
    }

    #[test]
    fn only_the_first_channel_is_recorded() {
        let (mut channel, slot) = capture_channel();
        let mut resampler = Resampler::new(1.0, 1.0);
        channel.start_acquisition(BLOCK).unwrap();

        let stereo: Vec<f32> = (0..BLOCK).flat_map(|_| [-1.0, 1.0]).collect();
        feed(&mut slot.lock(), &stereo, 2, &mut resampler, 1.0, &SAMPLING);

        assert_eq!(channel.await_completion(), WaitOutcome::Ready);
        let block = channel.with_samples(|s| s.to_vec()).unwrap();
        assert!(block[1..].iter().all(|&c| c == 0));
    }

    #[test]
    fn stream_error_faults_the_armed_transfer() {
        let (mut channel, slot) = capture_channel();
        channel.start_acquisition(BLOCK).unwrap();

        fault(&mut slot.lock(), fault_code(&cpal::StreamError::DeviceNotAvailable));
        assert!(slot.lock().is_none());
        assert_eq!(
            channel.await_completion(),
            WaitOutcome::Faulted(FAULT_DEVICE_NOT_AVAILABLE)
        );

        // With nothing armed an error has nobody to report to.
        fault(&mut slot.lock(), FAULT_BACKEND);
    }

    #[test]
    fn resampler_produces_output_rate() {
        let mut resampler = Resampler::new(44100.0, SAMPLING.sample_rate as f64);
        let mut produced = 0usize;
        for _ in 0..44100 {
            resampler.push(0.0, |_| produced += 1);
        }
        let expected = SAMPLING.sample_rate as usize;
        assert!(produced.abs_diff(expected) <= 1, "produced {}", produced);
    }

    #[test]
    fn resampler_interpolates_between_inputs() {
        let mut resampler = Resampler::new(1.0, 2.0);
        let mut out = Vec::new();
        resampler.push(1.0, |s| out.push(s));
        resampler.push(3.0, |s| out.push(s));
        assert_eq!(out, vec![0.0, 0.5, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn quantize_spans_converter_range() {
        assert_eq!(quantize(-1.0, 1.0, &SAMPLING), 0);
        assert_eq!(quantize(1.0, 1.0, &SAMPLING), 4095);
        assert_eq!(quantize(0.0, 1.0, &SAMPLING), 2048);
        assert_eq!(quantize(0.9, 4.0, &SAMPLING), 4095);
    }
}
