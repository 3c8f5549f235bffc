// tuner-core/src/lib.rs

//! The signal-acquisition and pitch-detection core of the instrument tuner.
//! This crate samples a block through the acquisition channel, extracts the
//! dominant frequency from its spectrum and classifies the deviation from
//! the nearest semitone. It is completely headless: the sampling peripheral,
//! power primitives, display and diagnostic sink are traits supplied by the
//! caller.

pub mod acquisition;
pub mod config;
pub mod cycle;
pub mod diagnostics;
pub mod display;
pub mod error;
pub mod fft;
pub mod peripheral;
pub mod pitch;
pub mod tuning;

pub use config::{SAMPLING, SamplingSpec, TunerConfig};
pub use cycle::{CycleReport, Tuner};
pub use error::{Result, TunerError};
