//! # Spectral Analyzer
//!
//! Turns a raw block of converter readings into a magnitude spectrum:
//! 1. Normalization to [-1.0, 1.0] with the DC component removed
//! 2. Forward real transform (interleaved real/imaginary output)
//! 3. Reduction of each complex bin to a magnitude (or squared magnitude)
//!
//! No window is applied. The rectangular window's leakage is part of the
//! behaviour the classifier thresholds were tuned against.

use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};

use crate::config::{MagnitudeMode, Normalization, SamplingSpec, TunerConfig};
use crate::error::{Result, TunerError};

/// A fixed-length forward transform of a real signal.
///
/// `output` has the same length as `input` and holds `input.len() / 2`
/// complex bins as `[re0, im0, re1, im1, ...]`.
pub trait Transform {
    fn len(&self) -> usize;

    fn process(&mut self, input: &[f32], output: &mut [f32]);
}

/// [`Transform`] backed by RustFFT. The plan and scratch space are built
/// once and reused for every block.
pub struct RustFftTransform {
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl RustFftTransform {
    pub fn new(len: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(len);
        let scratch = vec![Complex { re: 0.0, im: 0.0 }; fft.get_inplace_scratch_len()];
        Self {
            fft,
            buffer: vec![Complex { re: 0.0, im: 0.0 }; len],
            scratch,
        }
    }
}

impl Transform for RustFftTransform {
    fn len(&self) -> usize {
        self.buffer.len()
    }

    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        for (slot, &sample) in self.buffer.iter_mut().zip(input) {
            *slot = Complex { re: sample, im: 0.0 };
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        // Only the non-redundant half of a real-input transform is kept.
        for (pair, bin) in output.chunks_exact_mut(2).zip(&self.buffer) {
            pair[0] = bin.re;
            pair[1] = bin.im;
        }
    }
}

/// Maps raw readings to [-1.0, 1.0].
///
/// Readings are masked to the converter resolution first. With
/// [`Normalization::MeanRemoval`] the block mean is the center, which removes
/// any constant offset of the input stage; [`Normalization::FixedCenter`]
/// uses the theoretical mid-scale and keeps such an offset as a DC bin.
///
/// # Arguments
/// * `samples` - Raw converter readings
/// * `spec` - Converter resolution to mask and scale with
/// * `policy` - Which center to subtract
///
/// # Returns
/// * One value per reading, clamped to [-1.0, 1.0]
pub fn normalize(samples: &[u16], spec: &SamplingSpec, policy: Normalization) -> Vec<f32> {
    let max_code = spec.max_code();
    let scale = spec.mid_scale();
    if samples.is_empty() {
        return Vec::new();
    }

    let center = match policy {
        Normalization::FixedCenter => scale,
        Normalization::MeanRemoval => {
            let sum: u64 = samples.iter().map(|&s| (s & max_code) as u64).sum();
            (sum as f64 / samples.len() as f64) as f32
        }
    };

    samples
        .iter()
        .map(|&s| (((s & max_code) as f32 - center) / scale).clamp(-1.0, 1.0))
        .collect()
}

/// Reduces interleaved complex pairs to one value per bin.
pub fn reduce_magnitudes(interleaved: &[f32], mode: MagnitudeMode) -> Vec<f32> {
    interleaved
        .chunks_exact(2)
        .map(|pair| {
            let power = pair[0] * pair[0] + pair[1] * pair[1];
            match mode {
                MagnitudeMode::Squared => power,
                MagnitudeMode::Magnitude => power.sqrt(),
            }
        })
        .collect()
}

/// Normalization + transform + magnitude reduction for one block length.
pub struct SpectralAnalyzer<T = RustFftTransform> {
    spec: SamplingSpec,
    transform: T,
    normalization: Normalization,
    magnitude: MagnitudeMode,
    transform_output: Vec<f32>,
}

impl SpectralAnalyzer<RustFftTransform> {
    pub fn new(spec: SamplingSpec, config: &TunerConfig) -> Result<Self> {
        Self::with_transform(spec, RustFftTransform::new(spec.block_len), config)
    }
}

impl<T: Transform> SpectralAnalyzer<T> {
    /// Builds an analyzer around any transform of the right length.
    pub fn with_transform(spec: SamplingSpec, transform: T, config: &TunerConfig) -> Result<Self> {
        spec.validate()?;
        if transform.len() != spec.block_len {
            return Err(TunerError::Configuration(format!(
                "transform length {} does not match block length {}",
                transform.len(),
                spec.block_len
            )));
        }
        Ok(Self {
            spec,
            transform,
            normalization: config.normalization,
            magnitude: config.magnitude,
            transform_output: vec![0.0; spec.block_len],
        })
    }

    pub fn spec(&self) -> &SamplingSpec {
        &self.spec
    }

    pub fn normalize(&self, samples: &[u16]) -> Vec<f32> {
        normalize(samples, &self.spec, self.normalization)
    }

    /// Transforms a normalized signal and returns `block_len / 2` magnitudes.
    pub fn analyze(&mut self, signal: &[f32]) -> Result<Vec<f32>> {
        if signal.len() != self.spec.block_len {
            return Err(TunerError::Configuration(format!(
                "signal of {} samples does not match block length {}",
                signal.len(),
                self.spec.block_len
            )));
        }
        self.transform.process(signal, &mut self.transform_output);
        Ok(reduce_magnitudes(&self.transform_output, self.magnitude))
    }

    /// Full pipeline from raw readings to spectrum.
    pub fn process(&mut self, samples: &[u16]) -> Result<Vec<f32>> {
        let signal = self.normalize(samples);
        self.analyze(&signal)
    }

    /// Interleaved output of the most recent transform, for diagnostics.
    pub fn transform_output(&self) -> &[f32] {
        &self.transform_output
    }
}
