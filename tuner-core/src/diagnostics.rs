//! # Diagnostics
//!
//! The diagnostic sink is an optional text channel (a serial console on the
//! device). The cycle never depends on it being present and a sink must never
//! stall the cycle for longer than a bounded retry loop.
//!
//! Also holds the formatters for the per-cycle report and the block dumps
//! (raw readings, interleaved transform output, magnitude spectrum).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::config::SamplingSpec;
use crate::pitch::index_to_frequency;
use crate::tuning::{Classification, StringReading, TuningState};

/// Consumer of formatted diagnostic lines.
pub trait DiagnosticSink: Send {
    fn emit(&self, line: &str);
}

/// Forwards every line to the `log` facade at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn emit(&self, line: &str) {
        log::info!(target: "tuner::diagnostics", "{}", line);
    }
}

/// Bounded queue towards an asynchronous transmitter. When the transmitter
/// falls behind, a line is retried a fixed number of times and then dropped.
pub struct ChannelSink {
    tx: Sender<String>,
    retries: usize,
    dropped: AtomicUsize,
}

/// Creates a sink with room for `capacity` pending lines and the receiving
/// end for the transmitter.
pub fn channel_sink(capacity: usize, retries: usize) -> (ChannelSink, Receiver<String>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (
        ChannelSink {
            tx,
            retries,
            dropped: AtomicUsize::new(0),
        },
        rx,
    )
}

impl ChannelSink {
    /// Lines given up on because the queue stayed full.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for ChannelSink {
    fn drop(&mut self) {
        let dropped = self.dropped();
        if dropped > 0 {
            log::warn!("{} diagnostic lines dropped, transmitter too slow", dropped);
        }
    }
}

impl DiagnosticSink for ChannelSink {
    fn emit(&self, line: &str) {
        let mut pending = line.to_string();
        for attempt in 0..=self.retries {
            match self.tx.try_send(pending) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    pending = back;
                    if attempt < self.retries {
                        thread::yield_now();
                    }
                }
                // Nobody is listening any more.
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Human-readable verdict lines for one classification.
pub fn report_lines(classification: &Classification) -> Vec<String> {
    let mut lines = Vec::with_capacity(4);
    match (&classification.observation, classification.state) {
        (_, TuningState::InvalidInput) => lines.push("Invalid frequency".to_string()),
        (_, TuningState::BelowRange) => lines.push(format!(
            "Out of range: {:.2} Hz is below A0",
            classification.frequency
        )),
        (_, TuningState::AboveRange) => lines.push(format!(
            "Out of range: {:.2} Hz is above C8",
            classification.frequency
        )),
        (Some(obs), state) => {
            lines.push(state.advice().to_string());
            lines.push(format!("Note: {} (MIDI {})", obs.label(), obs.rounded_note));
            lines.push(format!(
                "Detected freq: {:.2} Hz\tIdeal freq: {:.2} Hz",
                obs.frequency, obs.ideal_frequency
            ));
            lines.push(format!("Diff: {:.2} cents", obs.cents_deviation));
        }
        (None, _) => lines.push("Invalid frequency".to_string()),
    }
    lines
}

/// Guitar string line, e.g. `String: 5 (A2) +12.30 cents`.
pub fn string_line(reading: &StringReading) -> String {
    format!(
        "String: {} ({}) {:+.2} cents",
        reading.number, reading.name, reading.cents_deviation
    )
}

/// Rows of `per_row` items prefixed with their index range.
fn dump_rows<T>(
    items: &[T],
    per_row: usize,
    mut cell: impl FnMut(usize, &T) -> String,
) -> Vec<String> {
    items
        .chunks(per_row)
        .enumerate()
        .map(|(row, chunk)| {
            let first = row * per_row;
            let last = first + chunk.len() - 1;
            let cells: String = chunk
                .iter()
                .enumerate()
                .map(|(offset, item)| cell(first + offset, item))
                .collect();
            format!("[{:4}..{:4}]: {}", first, last, cells.trim_end())
        })
        .collect()
}

/// Raw converter readings, 32 per row.
pub fn dump_samples(samples: &[u16]) -> Vec<String> {
    dump_rows(samples, 32, |_, s| format!("{:5} ", s))
}

/// Interleaved transform output, 8 complex pairs per row.
pub fn dump_transform_output(interleaved: &[f32]) -> Vec<String> {
    dump_rows(interleaved, 16, |i, v| {
        if i % 2 == 0 {
            format!("{:7.1}, ", v)
        } else {
            format!("{:7.1} | ", v)
        }
    })
}

/// Magnitude spectrum with bin frequencies, 8 bins per row.
pub fn dump_spectrum(spectrum: &[f32], spec: &SamplingSpec) -> Vec<String> {
    dump_rows(spectrum, 8, |i, m| {
        let freq = index_to_frequency(i, spec.sample_rate, spec.block_len).unwrap_or(0.0);
        format!("{:6.1}Hz: {:6.2} | ", freq, m)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SAMPLING;
    use crate::tuning::classify;

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (sink, rx) = channel_sink(2, 3);
        sink.emit("one");
        sink.emit("two");
        sink.emit("three");
        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["one", "two"]);

        sink.emit("four");
        assert_eq!(rx.recv().unwrap(), "four");
    }

    #[test]
    fn disconnected_channel_is_ignored() {
        let (sink, rx) = channel_sink(1, 3);
        drop(rx);
        sink.emit("nobody home");
        assert_eq!(sink.dropped(), 0);
    }

    #[test]
    fn report_for_in_tune_note() {
        let lines = report_lines(&classify(440.0, 5.0));
        assert_eq!(
            lines,
            vec![
                "✔ In tune",
                "Note: A4 (MIDI 69)",
                "Detected freq: 440.00 Hz\tIdeal freq: 440.00 Hz",
                "Diff: 0.00 cents",
            ]
        );
    }

    #[test]
    fn report_for_invalid_and_out_of_range() {
        assert_eq!(report_lines(&classify(-1.0, 5.0)), vec!["Invalid frequency"]);
        assert_eq!(
            report_lines(&classify(10.0, 5.0)),
            vec!["Out of range: 10.00 Hz is below A0"]
        );
    }

    #[test]
    fn string_line_is_signed() {
        let reading = StringReading {
            number: 5,
            name: "A2".to_string(),
            cents_deviation: 12.3,
        };
        assert_eq!(string_line(&reading), "String: 5 (A2) +12.30 cents");
    }

    #[test]
    fn sample_dump_rows() {
        let samples: Vec<u16> = (0..40).collect();
        let rows = dump_samples(&samples);
        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("[   0..  31]:     0     1"));
        assert!(rows[1].starts_with("[  32..  39]:    32"));
    }

    #[test]
    fn spectrum_dump_labels_bins() {
        let rows = dump_spectrum(&[0.0, 1.5], &SAMPLING);
        assert_eq!(rows, vec!["[   0..   1]:    0.0Hz:   0.00 |    4.0Hz:   1.50 |"]);
    }

    #[test]
    fn transform_dump_pairs_values() {
        let rows = dump_transform_output(&[1.0, -2.0, 3.0, 4.0]);
        assert_eq!(rows, vec!["[   0..   3]:     1.0,    -2.0 |     3.0,     4.0 |"]);
    }
}
