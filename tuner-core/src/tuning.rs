//! # Pitch Classification
//!
//! Maps a frequency to the nearest equal-tempered semitone (A4 = MIDI 69 =
//! 440 Hz), measures the deviation in cents and classifies the string
//! tension.
//!
//! ## Range
//! Note names and octaves are only derived inside the standard 88-key piano
//! range (A0 = 21 to C8 = 108). Anything outside is reported as
//! [`TuningState::BelowRange`] / [`TuningState::AboveRange`] with the raw
//! frequency, never as a wrapped note name.

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::error::{Result, TunerError};

/// Frequency of A4.
pub const REFERENCE_FREQUENCY: f32 = 440.0;
/// MIDI number of A4.
pub const REFERENCE_NOTE: i32 = 69;
pub const SEMITONES_PER_OCTAVE: i32 = 12;
/// A0, the lowest piano key.
pub const LOWEST_NOTE: f32 = 21.0;
/// C8, the highest piano key.
pub const HIGHEST_NOTE: f32 = 108.0;
/// Default in-tune window.
pub const DEFAULT_TOLERANCE_CENTS: f32 = 5.0;

pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Continuous MIDI-like note number of a positive frequency.
pub fn note_number(frequency: f32) -> f32 {
    REFERENCE_NOTE as f32 + SEMITONES_PER_OCTAVE as f32 * (frequency / REFERENCE_FREQUENCY).log2()
}

/// Round half up.
pub fn rounded_note(note_number: f32) -> i32 {
    (note_number + 0.5).floor() as i32
}

/// Position inside the octave, 0 = C.
pub fn semitone_index(rounded_note: i32) -> usize {
    rounded_note.rem_euclid(SEMITONES_PER_OCTAVE) as usize
}

/// Scientific pitch octave (MIDI 60 = C4).
pub fn octave(rounded_note: i32) -> i32 {
    rounded_note.div_euclid(SEMITONES_PER_OCTAVE) - 1
}

/// Equal-tempered frequency of a note number.
pub fn ideal_frequency(rounded_note: i32) -> f32 {
    REFERENCE_FREQUENCY
        * 2.0_f32.powf((rounded_note - REFERENCE_NOTE) as f32 / SEMITONES_PER_OCTAVE as f32)
}

/// Deviation in cents (positive = sharp, negative = flat).
pub fn cents_deviation(frequency: f32, ideal_frequency: f32) -> f32 {
    1200.0 * (frequency / ideal_frequency).log2()
}

pub fn note_name(semitone_index: usize) -> &'static str {
    NOTE_NAMES[semitone_index % NOTE_NAMES.len()]
}

/// Names of the semitones below and above, wrapping around the octave.
pub fn neighbor_names(semitone_index: usize) -> (&'static str, &'static str) {
    let len = NOTE_NAMES.len();
    let index = semitone_index % len;
    (NOTE_NAMES[(index + len - 1) % len], NOTE_NAMES[(index + 1) % len])
}

/// String tension verdict for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TuningState {
    BelowRange,
    AboveRange,
    InvalidInput,
    Flat,
    Sharp,
    InTune,
}

impl TuningState {
    /// Short instruction for the player.
    pub fn advice(&self) -> &'static str {
        match self {
            TuningState::InTune => "✔ In tune",
            TuningState::Flat => "↓ Too low, tighten the string",
            TuningState::Sharp => "↑ Too high, loosen the string",
            TuningState::InvalidInput => "No signal",
            TuningState::BelowRange => "Below range",
            TuningState::AboveRange => "Above range",
        }
    }
}

/// Everything derived from one in-range frequency. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PitchObservation {
    pub frequency: f32,
    pub note_number: f32,
    pub rounded_note: i32,
    pub semitone_index: usize,
    pub octave: i32,
    pub ideal_frequency: f32,
    pub cents_deviation: f32,
}

impl PitchObservation {
    fn new(frequency: f32, note_number: f32) -> Self {
        let rounded = rounded_note(note_number);
        let ideal = ideal_frequency(rounded);
        Self {
            frequency,
            note_number,
            rounded_note: rounded,
            semitone_index: semitone_index(rounded),
            octave: octave(rounded),
            ideal_frequency: ideal,
            cents_deviation: cents_deviation(frequency, ideal),
        }
    }

    pub fn note_name(&self) -> &'static str {
        note_name(self.semitone_index)
    }

    pub fn neighbor_names(&self) -> (&'static str, &'static str) {
        neighbor_names(self.semitone_index)
    }

    /// Name with octave, e.g. `"C#3"`.
    pub fn label(&self) -> String {
        format!("{}{}", self.note_name(), self.octave)
    }
}

/// Verdict for one frequency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub frequency: f32,
    pub state: TuningState,
    /// Present for `Flat`, `Sharp` and `InTune` only.
    pub observation: Option<PitchObservation>,
}

impl Classification {
    fn without_note(frequency: f32, state: TuningState) -> Self {
        Self {
            frequency,
            state,
            observation: None,
        }
    }

    /// Result view: invalid and out-of-range verdicts become errors.
    pub fn into_result(self) -> Result<PitchObservation> {
        match (self.state, self.observation) {
            (TuningState::InvalidInput, _) => Err(TunerError::InvalidFrequency(self.frequency)),
            (TuningState::BelowRange | TuningState::AboveRange, _) => {
                Err(TunerError::OutOfRange(self.frequency))
            }
            (_, Some(observation)) => Ok(observation),
            (_, None) => Err(TunerError::InvalidFrequency(self.frequency)),
        }
    }
}

/// Classifies `frequency` against the equal-tempered scale.
///
/// Non-positive and non-finite inputs are rejected before any logarithm is
/// taken.
///
/// # Arguments
/// * `frequency` - Dominant frequency in Hz
/// * `tolerance_cents` - Half-width of the in-tune window
///
/// # Returns
/// * A [`Classification`] carrying the tuning state and, for notes inside
///   A0..=C8, the full [`PitchObservation`]
pub fn classify(frequency: f32, tolerance_cents: f32) -> Classification {
    if !(frequency.is_finite() && frequency > 0.0) {
        log::debug!("Invalid frequency {}", frequency);
        return Classification::without_note(frequency, TuningState::InvalidInput);
    }

    let note = note_number(frequency);
    if note < LOWEST_NOTE {
        return Classification::without_note(frequency, TuningState::BelowRange);
    }
    if note > HIGHEST_NOTE {
        return Classification::without_note(frequency, TuningState::AboveRange);
    }

    let observation = PitchObservation::new(frequency, note);
    let cents = observation.cents_deviation;
    let state = if cents.abs() < tolerance_cents {
        TuningState::InTune
    } else if cents < 0.0 {
        TuningState::Flat
    } else {
        TuningState::Sharp
    };

    Classification {
        frequency,
        state,
        observation: Some(observation),
    }
}

/// One open string of a guitar in standard tuning.
#[derive(Debug, Clone)]
pub struct OpenString {
    /// String number, 6 = lowest.
    pub number: u8,
    /// Note name with octave (e.g. "E2").
    pub name: String,
    pub note: i32,
    pub frequency: f32,
}

/// Standard guitar tuning E2 A2 D3 G3 B3 E4, computed once.
static STANDARD_TUNING: Lazy<Vec<OpenString>> = Lazy::new(|| {
    const NOTES: [i32; 6] = [40, 45, 50, 55, 59, 64];
    NOTES
        .iter()
        .enumerate()
        .map(|(i, &note)| OpenString {
            number: (6 - i) as u8,
            name: format!("{}{}", note_name(semitone_index(note)), octave(note)),
            note,
            frequency: ideal_frequency(note),
        })
        .collect()
});

pub fn standard_tuning() -> &'static [OpenString] {
    &STANDARD_TUNING
}

/// The open string closest to `frequency` (in cents) and the offset to it.
///
/// # Arguments
/// * `frequency` - Detected frequency in Hz
///
/// # Returns
/// * `Some((string, cents))` - Closest open string and the deviation from it
/// * `None` - For non-positive or non-finite input
pub fn nearest_string(frequency: f32) -> Option<(&'static OpenString, f32)> {
    if !(frequency.is_finite() && frequency > 0.0) {
        return None;
    }
    STANDARD_TUNING
        .iter()
        .map(|string| (string, cents_deviation(frequency, string.frequency)))
        .min_by(|a, b| {
            a.1.abs()
                .partial_cmp(&b.1.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// Open strings further away than this are not reported.
pub const STRING_CAPTURE_CENTS: f32 = 100.0;

/// Which guitar string a reading most likely belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StringReading {
    pub number: u8,
    pub name: String,
    pub cents_deviation: f32,
}

impl StringReading {
    /// The open string within [`STRING_CAPTURE_CENTS`] of `frequency`, if any.
    pub fn detect(frequency: f32) -> Option<Self> {
        let (string, cents) = nearest_string(frequency)?;
        (cents.abs() <= STRING_CAPTURE_CENTS).then(|| StringReading {
            number: string.number,
            name: string.name.clone(),
            cents_deviation: cents,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frequency_of(note: f32) -> f32 {
        REFERENCE_FREQUENCY * 2.0_f32.powf((note - REFERENCE_NOTE as f32) / 12.0)
    }

    #[test]
    fn a4_is_exact() {
        let result = classify(440.0, DEFAULT_TOLERANCE_CENTS);
        assert_eq!(result.state, TuningState::InTune);
        let obs = result.observation.unwrap();
        assert_eq!(obs.rounded_note, 69);
        assert_eq!(obs.semitone_index, 9);
        assert_eq!(obs.note_name(), "A");
        assert_eq!(obs.octave, 4);
        assert_eq!(obs.ideal_frequency, 440.0);
        assert_eq!(obs.cents_deviation, 0.0);
    }

    #[test]
    fn low_e_string_is_in_tune() {
        let result = classify(82.41, DEFAULT_TOLERANCE_CENTS);
        assert_eq!(result.state, TuningState::InTune);
        let obs = result.observation.unwrap();
        assert_eq!(obs.note_name(), "E");
        assert_eq!(obs.octave, 2);
        assert_eq!(obs.label(), "E2");
        assert!(obs.cents_deviation.abs() < DEFAULT_TOLERANCE_CENTS);
    }

    #[test]
    fn semitone_round_trip_is_exact() {
        for note in 21..=108 {
            let ideal = ideal_frequency(note);
            assert_eq!(rounded_note(note_number(ideal)), note);
            let again = ideal_frequency(rounded_note(note_number(ideal)));
            assert_eq!(again, ideal);
        }
    }

    #[test]
    fn observation_invariants_hold() {
        for &freq in &[30.0, 65.4, 196.0, 261.63, 1000.0, 4186.0] {
            let obs = classify(freq, DEFAULT_TOLERANCE_CENTS).observation.unwrap();
            assert_eq!(obs.rounded_note, (obs.note_number + 0.5).floor() as i32);
            assert_eq!(obs.semitone_index as i32, obs.rounded_note % 12);
            assert_eq!(obs.octave, obs.rounded_note / 12 - 1);
            assert!(obs.cents_deviation.abs() <= 50.0 + 1e-3);
        }
    }

    #[test]
    fn non_positive_frequencies_are_invalid() {
        for freq in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            let result = classify(freq, DEFAULT_TOLERANCE_CENTS);
            assert_eq!(result.state, TuningState::InvalidInput);
            assert!(result.observation.is_none());
        }
        assert_eq!(
            classify(0.0, DEFAULT_TOLERANCE_CENTS).into_result(),
            Err(TunerError::InvalidFrequency(0.0))
        );
    }

    #[test]
    fn range_edges() {
        assert_eq!(classify(frequency_of(20.9), 5.0).state, TuningState::BelowRange);
        assert_eq!(classify(frequency_of(108.1), 5.0).state, TuningState::AboveRange);
        assert_ne!(classify(frequency_of(21.05), 5.0).state, TuningState::BelowRange);
        assert_ne!(classify(frequency_of(107.95), 5.0).state, TuningState::AboveRange);

        let above = classify(5000.0, 5.0);
        assert!(above.observation.is_none());
        assert_eq!(above.into_result(), Err(TunerError::OutOfRange(5000.0)));
    }

    #[test]
    fn flat_and_sharp() {
        // 20 cents either side of A2.
        let flat = classify(110.0 * 2.0_f32.powf(-20.0 / 1200.0), 5.0);
        assert_eq!(flat.state, TuningState::Flat);
        assert!((flat.observation.unwrap().cents_deviation + 20.0).abs() < 0.01);

        let sharp = classify(110.0 * 2.0_f32.powf(20.0 / 1200.0), 5.0);
        assert_eq!(sharp.state, TuningState::Sharp);
    }

    #[test]
    fn tolerance_is_configurable() {
        let slightly_sharp = 440.0 * 2.0_f32.powf(4.0 / 1200.0);
        assert_eq!(classify(slightly_sharp, 5.0).state, TuningState::InTune);
        assert_eq!(classify(slightly_sharp, 2.0).state, TuningState::Sharp);
    }

    #[test]
    fn neighbors_wrap_at_table_edges() {
        assert_eq!(neighbor_names(0), ("B", "C#"));
        assert_eq!(neighbor_names(11), ("A#", "C"));
        assert_eq!(neighbor_names(9), ("G#", "A#"));
    }

    #[test]
    fn standard_tuning_table() {
        let names: Vec<&str> = standard_tuning().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["E2", "A2", "D3", "G3", "B3", "E4"]);
        assert!((standard_tuning()[0].frequency - 82.4069).abs() < 1e-3);
        assert_eq!(standard_tuning()[0].number, 6);
    }

    #[test]
    fn nearest_string_reports_offset() {
        let (string, cents) = nearest_string(111.0).unwrap();
        assert_eq!(string.name, "A2");
        assert!(cents > 0.0 && cents < 20.0);
        assert!(nearest_string(0.0).is_none());
    }

    #[test]
    fn string_reading_only_near_an_open_string() {
        let a2 = StringReading::detect(111.0).unwrap();
        assert_eq!((a2.number, a2.name.as_str()), (5, "A2"));
        assert!(a2.cents_deviation > 0.0);

        // A4 is five semitones above the high E string.
        assert!(StringReading::detect(440.0).is_none());
        assert!(StringReading::detect(-1.0).is_none());
    }
}
