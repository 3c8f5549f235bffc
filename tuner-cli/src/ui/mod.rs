//! # UI Module
//!
//! Terminal presentation for the tuner: the note header, the cents line and
//! a text cent meter.

pub mod cent_meter;
pub mod terminal;
