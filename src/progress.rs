//! Turns the bursty byte counts reported by yt-dlp into a progress bar value
//! that only ever moves forward.

use std::collections::VecDeque;

use crate::model::ProgressSignal;

/// Prefix of the lines produced by our `--progress-template`.
pub const PROGRESS_PREFIX: &str = "PROGRESS|";

/// Samples kept in the smoothing window.
const WINDOW: usize = 10;
/// Below this many samples the raw value is forwarded directly.
const RAMP_SAMPLES: usize = 3;
/// Above this many samples the lowest and highest value are trimmed.
const TRIM_ABOVE: usize = 4;
/// Highest value emitted while a job is still running.
const IN_FLIGHT_MAX: u8 = 99;

/// Per-job smoothing state. Emits at most one value per observed sample.
#[derive(Debug, Clone, Default)]
pub struct ProgressNormalizer {
    last_emitted: u8,
    window: VecDeque<u8>,
    done: bool,
}

impl ProgressNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh job; the returned 0 should be shown immediately.
    pub fn reset(&mut self) -> u8 {
        self.last_emitted = 0;
        self.window.clear();
        self.done = false;
        0
    }

    pub fn last_emitted(&self) -> u8 {
        self.last_emitted
    }

    /// Feeds one raw sample. Returns the value to display, if it changed.
    pub fn observe(&mut self, downloaded: Option<f64>, total: Option<f64>) -> Option<u8> {
        if self.done {
            return None;
        }
        let raw = raw_percent(downloaded?, total?)?;

        if self.window.len() < RAMP_SAMPLES {
            self.window.push_back(raw);
            if raw > self.last_emitted {
                self.last_emitted = raw;
                return Some(raw);
            }
            return None;
        }

        self.window.push_back(raw);
        while self.window.len() > WINDOW {
            self.window.pop_front();
        }

        let mut sorted: Vec<u8> = self.window.iter().copied().collect();
        sorted.sort_unstable();
        let kept = if sorted.len() > TRIM_ABOVE {
            &sorted[1..sorted.len() - 1]
        } else {
            &sorted[..]
        };
        let avg = kept.iter().map(|&p| f64::from(p)).sum::<f64>() / kept.len() as f64;
        let smoothed = avg.floor() as u8;

        if smoothed > self.last_emitted && avg < f64::from(IN_FLIGHT_MAX) {
            self.last_emitted = smoothed;
            Some(smoothed)
        } else {
            None
        }
    }

    /// Confirmed completion: yields 100 exactly once.
    pub fn finish(&mut self) -> Option<u8> {
        if self.done || self.last_emitted >= 100 {
            return None;
        }
        self.done = true;
        self.last_emitted = 100;
        Some(100)
    }

    /// Failure or cancellation: the bar goes back to 0 and stays silent.
    pub fn abort(&mut self) -> u8 {
        self.done = true;
        self.window.clear();
        self.last_emitted = 0;
        0
    }
}

/// Integer percentage of a sample, or `None` if the sample is unusable.
/// A byte count past the total is malformed and never reaches the window.
fn raw_percent(downloaded: f64, total: f64) -> Option<u8> {
    if !downloaded.is_finite() || !total.is_finite() || total <= 0.0 || downloaded < 0.0 {
        return None;
    }
    if downloaded > total {
        return None;
    }
    let pct = (downloaded / total * 100.0).floor() as u8;
    Some(pct.min(IN_FLIGHT_MAX))
}

/// Parses `PROGRESS|<status>|<downloaded>|<total>` lines emitted by yt-dlp.
pub fn parse_progress_from_line(line: &str) -> Option<ProgressSignal> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let mut fields = rest.split('|');
    let status = fields.next()?.trim();
    match status {
        "finished" => Some(ProgressSignal::Finished),
        "downloading" => {
            let downloaded = fields.next().and_then(parse_number);
            let total = fields.next().and_then(parse_number);
            Some(ProgressSignal::Downloading { downloaded, total })
        }
        _ => None,
    }
}

// yt-dlp prints "NA" for unknown values
fn parse_number(field: &str) -> Option<f64> {
    field.trim().parse::<f64>().ok()
}
