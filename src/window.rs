//! Gap-tolerant temporal windowing
//!
//! Slices a per-frame sequence into fixed-length windows on a fixed stride,
//! dropping any window with too many invalid frames. Short runs of missing
//! values inside an accepted window can be linearly interpolated per
//! channel; longer runs stay missing and are excluded downstream.

use crate::types::FrameRecord;
use serde::{Deserialize, Serialize};

/// Windowing parameters, expressed in seconds and converted to frame
/// counts with the session frame rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    pub window_sec: f64,
    pub stride_sec: f64,
    /// Maximum number of invalid frames tolerated inside one window.
    pub max_gap: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_sec: 2.0,
            stride_sec: 1.0,
            max_gap: 3,
        }
    }
}

impl WindowConfig {
    /// Window length in frames at the given frame rate.
    pub fn window_frames(&self, fps: f64) -> usize {
        (self.window_sec * fps) as usize
    }

    /// Stride in frames at the given frame rate.
    pub fn stride_frames(&self, fps: f64) -> usize {
        (self.stride_sec * fps) as usize
    }
}

/// One accepted window: a contiguous slice of exactly `window_size` frame
/// records starting at `start` (a frame index, never a timestamp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub start: usize,
    pub frames: Vec<FrameRecord>,
}

impl Window {
    /// Timestamp of the first frame, carried for traceability.
    pub fn start_time(&self) -> f64 {
        self.frames.first().map(|f| f.t).unwrap_or(0.0)
    }
}

/// Produce accepted windows over the sequence.
///
/// Candidates start at every multiple of `stride` while
/// `start + window_size <= len`, yielding `floor((T-W)/S)+1` candidates
/// (zero when `T < W`). A candidate is dropped entirely when it contains
/// more than `max_gap` invalid frames; there are no partial windows.
pub fn sliding_windows(
    sequence: &[FrameRecord],
    window_size: usize,
    stride: usize,
    max_gap: usize,
) -> Vec<Window> {
    let mut windows = Vec::new();
    if window_size == 0 || stride == 0 || sequence.len() < window_size {
        return windows;
    }

    let mut start = 0;
    while start + window_size <= sequence.len() {
        let slice = &sequence[start..start + window_size];
        let invalid = slice.iter().filter(|f| !f.valid).count();
        if invalid <= max_gap {
            windows.push(Window {
                start,
                frames: slice.to_vec(),
            });
        }
        start += stride;
    }

    windows
}

/// Linearly interpolate missing runs of length at most `limit` in place.
///
/// A run is only filled when both neighbouring samples exist; leading and
/// trailing gaps, and runs longer than `limit`, remain `None` and must be
/// excluded from the statistics that consume them.
pub fn interpolate_short_gaps(values: &mut [Option<f64>], limit: usize) {
    if limit == 0 {
        return;
    }

    let mut i = 0;
    while i < values.len() {
        if values[i].is_some() {
            i += 1;
            continue;
        }

        // Missing run [i, j).
        let mut j = i;
        while j < values.len() && values[j].is_none() {
            j += 1;
        }

        let run = j - i;
        let filled = i > 0 && j < values.len() && run <= limit;
        if filled {
            let left = values[i - 1].unwrap();
            let right = values[j].unwrap();
            let span = (run + 1) as f64;
            for (k, slot) in values[i..j].iter_mut().enumerate() {
                let frac = (k + 1) as f64 / span;
                *slot = Some(left + (right - left) * frac);
            }
        }

        i = j;
    }
}
