//! # Cent Meter
//!
//! A one-line needle showing how far the current pitch is from the nearest
//! semitone, with the same accuracy zones as a tuner's LED strip.

/// The meter spans -50..=+50 cents, half a semitone either way.
const METER_RANGE: f32 = 50.0;

/// Accuracy zone of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    /// Inside the in-tune window.
    InTune,
    /// Within 20 cents.
    Close,
    Far,
}

impl Zone {
    pub fn of(cents: f32, tolerance: f32) -> Self {
        if cents.abs() < tolerance {
            Zone::InTune
        } else if cents.abs() < 20.0 {
            Zone::Close
        } else {
            Zone::Far
        }
    }

    fn needle(&self) -> char {
        match self {
            Zone::InTune => '●',
            Zone::Close => '◆',
            Zone::Far => '▲',
        }
    }
}

/// Renders `[----|----]` with the needle placed at `cents`.
///
/// `width` is the number of cells between the brackets and is forced odd so
/// there is a center cell. Without a reading only the center mark is drawn.
pub fn render(cents: Option<f32>, tolerance: f32, width: usize) -> String {
    let width = width.max(3) | 1;
    let center = width / 2;
    let mut cells: Vec<char> = (0..width)
        .map(|i| if i == center { '|' } else { '-' })
        .collect();

    if let Some(c) = cents {
        let clamped = c.clamp(-METER_RANGE, METER_RANGE);
        let position = (clamped + METER_RANGE) / (2.0 * METER_RANGE) * (width - 1) as f32;
        cells[position.round() as usize] = Zone::of(c, tolerance).needle();
    }

    format!("[{}]", cells.into_iter().collect::<String>())
}
