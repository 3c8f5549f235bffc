//! Presentation seam: what the display receives each cycle.

use serde::Serialize;

use crate::tuning::{Classification, TuningState};

/// One screenful of tuner output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum DisplayFrame {
    /// Needle-style view: previous, current and next note of the same octave
    /// plus the deviation, as a number for meters and with two decimals for
    /// text.
    Note {
        previous: &'static str,
        current: &'static str,
        next: &'static str,
        octave: i32,
        deviation: f32,
        cents: String,
        state: TuningState,
    },
    /// Peak at 0 Hz or an invalid frequency.
    NoSignal,
    BelowRange { frequency: f32 },
    AboveRange { frequency: f32 },
    /// The acquisition timed out; nothing was analysed.
    NoData,
}

impl DisplayFrame {
    pub fn from_classification(classification: &Classification) -> Self {
        match (&classification.observation, classification.state) {
            (_, TuningState::InvalidInput) => DisplayFrame::NoSignal,
            (_, TuningState::BelowRange) => DisplayFrame::BelowRange {
                frequency: classification.frequency,
            },
            (_, TuningState::AboveRange) => DisplayFrame::AboveRange {
                frequency: classification.frequency,
            },
            (Some(observation), state) => {
                let (previous, next) = observation.neighbor_names();
                DisplayFrame::Note {
                    previous,
                    current: observation.note_name(),
                    next,
                    octave: observation.octave,
                    deviation: observation.cents_deviation,
                    cents: format_cents(observation.cents_deviation),
                    state,
                }
            }
            (None, _) => DisplayFrame::NoSignal,
        }
    }
}

/// `"%.2f"`. Values that round to zero are shown as `0.00`, never `-0.00`.
pub fn format_cents(cents: f32) -> String {
    let text = format!("{:.2}", cents);
    match text.as_str() {
        "-0.00" => "0.00".to_string(),
        _ => text,
    }
}

/// Receives one frame per cycle.
pub trait Presenter {
    fn present(&mut self, frame: &DisplayFrame);
}

/// Collects frames, handy for tests and replays.
impl Presenter for Vec<DisplayFrame> {
    fn present(&mut self, frame: &DisplayFrame) {
        self.push(frame.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::classify;

    #[test]
    fn note_frame_for_a4() {
        let frame = DisplayFrame::from_classification(&classify(440.0, 5.0));
        assert_eq!(
            frame,
            DisplayFrame::Note {
                previous: "G#",
                current: "A",
                next: "A#",
                octave: 4,
                deviation: 0.0,
                cents: "0.00".to_string(),
                state: TuningState::InTune,
            }
        );
    }

    #[test]
    fn c_and_b_neighbors_stay_in_table() {
        // C4 and B3.
        let c4 = DisplayFrame::from_classification(&classify(261.63, 5.0));
        assert!(matches!(c4, DisplayFrame::Note { previous: "B", next: "C#", .. }));
        let b3 = DisplayFrame::from_classification(&classify(246.94, 5.0));
        assert!(matches!(b3, DisplayFrame::Note { previous: "A#", next: "C", .. }));
    }

    #[test]
    fn invalid_and_out_of_range_frames() {
        assert_eq!(DisplayFrame::from_classification(&classify(0.0, 5.0)), DisplayFrame::NoSignal);
        assert_eq!(
            DisplayFrame::from_classification(&classify(10.0, 5.0)),
            DisplayFrame::BelowRange { frequency: 10.0 }
        );
        assert_eq!(
            DisplayFrame::from_classification(&classify(9000.0, 5.0)),
            DisplayFrame::AboveRange { frequency: 9000.0 }
        );
    }

    #[test]
    fn cents_use_two_decimals() {
        assert_eq!(format_cents(-12.346), "-12.35");
        assert_eq!(format_cents(-0.0), "0.00");
        assert_eq!(format_cents(-0.004), "0.00");
        assert_eq!(format_cents(-0.006), "-0.01");
        assert_eq!(format_cents(3.0), "3.00");
    }
}
