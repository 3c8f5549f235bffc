//! # Dominant Frequency Extraction
//!
//! Finds the strongest bin of a magnitude spectrum and converts its index to
//! a frequency in Hz.

use serde::Serialize;

use crate::config::SamplingSpec;
use crate::error::{Result, TunerError};

/// The strongest bin of a spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Peak {
    pub index: usize,
    pub magnitude: f32,
}

/// Peak bin together with its frequency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DominantFrequency {
    pub peak: Peak,
    pub frequency: f32,
}

/// Linear scan for the maximum magnitude.
///
/// Uses a strict `>` so the lowest index wins ties; an all-zero (or empty)
/// spectrum yields index 0.
pub fn find_peak(spectrum: &[f32]) -> Peak {
    let mut peak = Peak {
        index: 0,
        magnitude: spectrum.first().copied().unwrap_or(0.0),
    };
    for (index, &magnitude) in spectrum.iter().enumerate().skip(1) {
        if magnitude > peak.magnitude {
            peak = Peak { index, magnitude };
        }
    }
    peak
}

/// `index * sample_rate / block_len`.
///
/// `block_len` is the transform length, not the spectrum length. Indices at
/// or beyond it are rejected rather than extrapolated.
///
/// # Arguments
/// * `index` - Spectrum bin index
/// * `sample_rate` - Sampling rate in Hz
/// * `block_len` - Transform length in samples
///
/// # Returns
/// * Frequency of the bin in Hz, or [`TunerError::BinOutOfRange`]
pub fn index_to_frequency(index: usize, sample_rate: f32, block_len: usize) -> Result<f32> {
    if index >= block_len {
        log::debug!("Error: index {} is out of range", index);
        return Err(TunerError::BinOutOfRange { index, block_len });
    }
    Ok(index as f32 * sample_rate / block_len as f32)
}

/// Peak of `spectrum` converted with the sampling constants of `spec`.
pub fn dominant_frequency(spectrum: &[f32], spec: &SamplingSpec) -> Result<DominantFrequency> {
    if spectrum.len() != spec.spectrum_len() {
        return Err(TunerError::Configuration(format!(
            "spectrum of {} bins does not belong to a {}-sample block",
            spectrum.len(),
            spec.block_len
        )));
    }
    let peak = find_peak(spectrum);
    let frequency = index_to_frequency(peak.index, spec.sample_rate, spec.block_len)?;
    log::debug!("Idx: {} \t\tMax Frequency: {:.2}", peak.index, frequency);
    Ok(DominantFrequency { peak, frequency })
}
