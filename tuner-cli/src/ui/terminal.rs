//! Terminal rendering of display frames.

use std::io::Write;

use tuner_core::display::{DisplayFrame, Presenter};

use super::cent_meter;

const METER_WIDTH: usize = 41;

/// Formats a frame as the two lines the tuner screen shows.
pub fn format_frame(frame: &DisplayFrame, tolerance: f32) -> [String; 2] {
    match frame {
        DisplayFrame::Note {
            previous,
            current,
            next,
            octave,
            deviation,
            cents,
            state,
        } => {
            [
                format!(
                    "{:<5}{:^9}{:>5}",
                    format!("{}{}", previous, octave),
                    format!("{}{}", current, octave),
                    format!("{}{}", next, octave)
                ),
                format!(
                    "{:>7} cents {} {}",
                    cents,
                    cent_meter::render(Some(*deviation), tolerance, METER_WIDTH),
                    state.advice()
                ),
            ]
        }
        DisplayFrame::NoSignal => [
            "No signal".to_string(),
            cent_meter::render(None, tolerance, METER_WIDTH),
        ],
        DisplayFrame::BelowRange { frequency } => [
            "Out of range".to_string(),
            format!("{:.2} Hz < A0", frequency),
        ],
        DisplayFrame::AboveRange { frequency } => [
            "Out of range".to_string(),
            format!("{:.2} Hz > C8", frequency),
        ],
        DisplayFrame::NoData => ["No data".to_string(), "Check the input".to_string()],
    }
}

/// Prints every frame to stdout.
pub struct TerminalPresenter {
    tolerance: f32,
}

impl TerminalPresenter {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }
}

impl Presenter for TerminalPresenter {
    fn present(&mut self, frame: &DisplayFrame) {
        let [header, detail] = format_frame(frame, self.tolerance);
        let mut out = std::io::stdout().lock();
        // A closed stdout only loses the display, never the cycle.
        let _ = writeln!(out, "{}\n{}\n", header, detail);
    }
}

/// Discards frames when the output is machine-readable reports instead.
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn present(&mut self, _frame: &DisplayFrame) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tuner_core::tuning::TuningState;

    #[test]
    fn note_frame_lines() {
        let frame = DisplayFrame::Note {
            previous: "B",
            current: "C",
            next: "C#",
            octave: 4,
            deviation: -12.0,
            cents: "-12.00".to_string(),
            state: TuningState::Flat,
        };
        let [header, detail] = format_frame(&frame, 5.0);
        assert_eq!(header, "B4      C4      C#4");
        assert!(detail.starts_with(" -12.00 cents ["));
        assert!(detail.contains('◆'));
        assert!(detail.ends_with("↓ Too low, tighten the string"));
    }

    #[test]
    fn meter_follows_the_numeric_deviation() {
        let frame = DisplayFrame::Note {
            previous: "G#",
            current: "A",
            next: "A#",
            octave: 4,
            deviation: 2.0,
            cents: "2.00".to_string(),
            state: TuningState::InTune,
        };
        let [_, detail] = format_frame(&frame, 5.0);
        let meter = cent_meter::render(Some(2.0), 5.0, METER_WIDTH);
        assert!(detail.contains(&meter));
        assert!(detail.contains('●'));
    }

    #[test]
    fn out_of_range_shows_raw_frequency() {
        let [title, detail] = format_frame(&DisplayFrame::AboveRange { frequency: 5000.0 }, 5.0);
        assert_eq!(title, "Out of range");
        assert_eq!(detail, "5000.00 Hz > C8");
    }
}
