//! Error types for the tuner core.

use std::fmt;

/// Errors that can occur while acquiring or analysing a sample block.
///
/// Only [`TunerError::Configuration`] is fatal. Everything else is recovered
/// inside the cycle and ends up in the cycle report.
#[derive(Debug, Clone, PartialEq)]
pub enum TunerError {
    /// Buffer, block or spectrum sizes disagree, or a setting is unusable.
    Configuration(String),

    /// The sampling peripheral reported a transfer fault.
    Acquisition { code: u32 },

    /// A spectrum bin index at or beyond the transform length.
    BinOutOfRange { index: usize, block_len: usize },

    /// Zero, negative or non-finite frequency.
    InvalidFrequency(f32),

    /// Frequency outside the supported instrument range (A0..C8).
    OutOfRange(f32),
}

impl fmt::Display for TunerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunerError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            TunerError::Acquisition { code } => {
                write!(f, "Acquisition error, code: 0x{:X}", code)
            }
            TunerError::BinOutOfRange { index, block_len } => write!(
                f,
                "Bin index {} is out of range for block length {}",
                index, block_len
            ),
            TunerError::InvalidFrequency(freq) => write!(f, "Invalid frequency: {} Hz", freq),
            TunerError::OutOfRange(freq) => {
                write!(f, "Frequency {:.2} Hz is outside the supported range", freq)
            }
        }
    }
}

impl std::error::Error for TunerError {}

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, TunerError>;
