//! # Configuration
//!
//! Two layers live here:
//! - [`SAMPLING`]: the converter resolution, sample rate and block length.
//!   These are fixed at build time and shared by the spectral analyzer
//!   (normalization center) and the dominant frequency extractor (bin to Hz).
//! - [`TunerConfig`]: runtime knobs that do not affect the sampling cadence.
//!   Deserializable so the binary can load it from a JSON file.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, TunerError};
use crate::tuning::DEFAULT_TOLERANCE_CENTS;

/// Fixed sampling parameters of the acquisition hardware.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingSpec {
    /// Conversions per second.
    pub sample_rate: f32,
    /// Converter resolution in bits.
    pub resolution_bits: u32,
    /// Samples per acquisition block (power of two).
    pub block_len: usize,
}

impl SamplingSpec {
    /// Largest code the converter can produce (4095 for 12 bits).
    pub const fn max_code(&self) -> u16 {
        ((1u32 << self.resolution_bits) - 1) as u16
    }

    /// Theoretical mid-scale value, also used as the half-scale divisor.
    pub fn mid_scale(&self) -> f32 {
        self.max_code() as f32 / 2.0
    }

    /// Number of bins in the magnitude spectrum.
    pub const fn spectrum_len(&self) -> usize {
        self.block_len / 2
    }

    /// Width of one spectrum bin in Hz.
    pub fn bin_width(&self) -> f32 {
        self.sample_rate / self.block_len as f32
    }

    /// Wall-clock duration of one block at the sampling cadence.
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f32(self.block_len as f32 / self.sample_rate)
    }

    /// Checks the invariants every component relies on.
    pub fn validate(&self) -> Result<()> {
        if !self.block_len.is_power_of_two() || self.block_len < 2 {
            return Err(TunerError::Configuration(format!(
                "block length {} is not a power of two",
                self.block_len
            )));
        }
        if self.resolution_bits == 0 || self.resolution_bits > 16 {
            return Err(TunerError::Configuration(format!(
                "converter resolution of {} bits is not supported",
                self.resolution_bits
            )));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(TunerError::Configuration(format!(
                "sample rate {} Hz is not usable",
                self.sample_rate
            )));
        }
        Ok(())
    }
}

/// The converter: 12-bit readings at ~8130 Hz, 2048 samples per block.
pub const SAMPLING: SamplingSpec = SamplingSpec {
    sample_rate: 8130.0,
    resolution_bits: 12,
    block_len: 2048,
};

/// How raw readings are centered before the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Subtract the block mean, divide by the theoretical half-scale.
    /// Immune to a constant hardware offset.
    #[default]
    MeanRemoval,
    /// Subtract and divide by the theoretical mid-scale value.
    FixedCenter,
}

/// How each complex bin is reduced to a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MagnitudeMode {
    /// `sqrt(re^2 + im^2)`
    Magnitude,
    /// `re^2 + im^2`; same arg-max, no square root.
    #[default]
    Squared,
}

/// What the acquisition channel does when the peripheral reports a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferErrorPolicy {
    /// Proceed with whatever the buffer holds (previous block or partial data).
    #[default]
    UseStale,
    /// Proceed with a zeroed buffer.
    ZeroFill,
    /// Ignore the fault and keep waiting. Only bounded by `wait_timeout_ms`.
    KeepWaiting,
}

/// Runtime configuration of the tuner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Deviation below which a note counts as in tune (default: 5.0 cents).
    pub tolerance_cents: f32,

    /// Normalization policy (default: mean removal).
    pub normalization: Normalization,

    /// Spectrum reduction (default: squared magnitude).
    pub magnitude: MagnitudeMode,

    /// Upper bound on one acquisition wait. `None` waits forever.
    pub wait_timeout_ms: Option<u64>,

    /// Fault handling of the acquisition channel.
    pub on_transfer_error: TransferErrorPolicy,

    /// Trace-log raw samples, transform output and spectrum every cycle.
    pub dump_blocks: bool,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            tolerance_cents: DEFAULT_TOLERANCE_CENTS,
            normalization: Normalization::MeanRemoval,
            magnitude: MagnitudeMode::Squared,
            wait_timeout_ms: Some(1000),
            on_transfer_error: TransferErrorPolicy::UseStale,
            dump_blocks: false,
        }
    }
}

impl TunerConfig {
    /// Wait policy derived from `wait_timeout_ms`.
    pub fn wait_policy(&self) -> crate::acquisition::WaitPolicy {
        match self.wait_timeout_ms {
            Some(ms) => crate::acquisition::WaitPolicy::Bounded(Duration::from_millis(ms)),
            None => crate::acquisition::WaitPolicy::Forever,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance_cents.is_finite() && self.tolerance_cents > 0.0) {
            return Err(TunerError::Configuration(format!(
                "tolerance of {} cents must be positive",
                self.tolerance_cents
            )));
        }
        if self.wait_timeout_ms == Some(0) {
            return Err(TunerError::Configuration(
                "wait timeout of 0 ms would never observe a transfer".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_constants_agree() {
        assert!(SAMPLING.validate().is_ok());
        assert_eq!(SAMPLING.max_code(), 4095);
        assert_eq!(SAMPLING.mid_scale(), 2047.5);
        assert_eq!(SAMPLING.spectrum_len(), 1024);
    }

    #[test]
    fn non_power_of_two_block_is_rejected() {
        let spec = SamplingSpec { block_len: 1000, ..SAMPLING };
        assert!(matches!(spec.validate(), Err(TunerError::Configuration(_))));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: TunerConfig =
            serde_json::from_str(r#"{ "tolerance_cents": 3.0, "normalization": "fixed_center" }"#)
                .unwrap();
        assert_eq!(config.tolerance_cents, 3.0);
        assert_eq!(config.normalization, Normalization::FixedCenter);
        assert_eq!(config.magnitude, MagnitudeMode::Squared);
        assert_eq!(config.wait_timeout_ms, Some(1000));

        let empty: TunerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.tolerance_cents, DEFAULT_TOLERANCE_CENTS);
    }

    #[test]
    fn zero_tolerance_is_rejected() {
        let config = TunerConfig { tolerance_cents: 0.0, ..TunerConfig::default() };
        assert!(config.validate().is_err());
    }
}
