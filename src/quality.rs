//! Frame quality gate
//!
//! Classifies every decoded frame as valid/invalid against lighting, blur,
//! and face-count rules, then decides whether the whole video is usable.
//! An unusable video never proceeds to signal extraction.

use crate::types::{QualityStats, UsabilityReason, UsabilityVerdict};
use serde::{Deserialize, Serialize};

/// Mean luminance below which a frame counts as too dark.
pub const DARK_LUMA_THRESHOLD: f64 = 40.0;

/// Laplacian variance below which a frame counts as blurry. Conservative:
/// only extreme motion/defocus blur trips it, not smooth low-texture frames.
pub const BLUR_VARIANCE_THRESHOLD: f64 = 30.0;

/// Usability thresholds applied after the per-frame pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    pub min_valid_frames: u32,
    pub min_valid_ratio: f64,
    pub max_invalid_gap_sec: f64,
    /// Frame rate used to convert gap-in-frames to seconds.
    pub fps: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_valid_frames: 100,
            min_valid_ratio: 0.7,
            max_invalid_gap_sec: 3.0,
            fps: 25.0,
        }
    }
}

/// Grayscale (luma) view of one decoded frame, row-major.
///
/// Raw decoding and color conversion stay outside the core; the gate only
/// needs a luma plane to measure brightness and sharpness.
#[derive(Debug, Clone)]
pub struct LumaFrame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl LumaFrame {
    pub fn new(data: Vec<u8>, width: usize, height: usize) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self {
            data,
            width,
            height,
        }
    }

    /// Mean pixel luminance in [0, 255].
    pub fn mean_luminance(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.data.iter().map(|&p| p as u64).sum();
        sum as f64 / self.data.len() as f64
    }

    /// Variance of the 4-neighbour Laplacian over interior pixels.
    /// Low variance indicates a blurred or defocused frame.
    pub fn laplacian_variance(&self) -> f64 {
        if self.width < 3 || self.height < 3 {
            return 0.0;
        }

        let mut responses = Vec::with_capacity((self.width - 2) * (self.height - 2));
        for y in 1..self.height - 1 {
            for x in 1..self.width - 1 {
                let c = self.at(x, y);
                let lap = self.at(x, y - 1) + self.at(x, y + 1) + self.at(x - 1, y)
                    + self.at(x + 1, y)
                    - 4.0 * c;
                responses.push(lap);
            }
        }

        let n = responses.len() as f64;
        let mean = responses.iter().sum::<f64>() / n;
        responses.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n
    }

    fn at(&self, x: usize, y: usize) -> f64 {
        self.data[y * self.width + x] as f64
    }
}

/// Whether a frame is too dark to trust landmark detection.
pub fn is_frame_too_dark(frame: &LumaFrame) -> bool {
    frame.mean_luminance() < DARK_LUMA_THRESHOLD
}

/// Whether a frame shows extreme blur.
pub fn is_frame_blurry(frame: &LumaFrame) -> bool {
    frame.laplacian_variance() < BLUR_VARIANCE_THRESHOLD
}

/// Per-frame validity classification with aggregate counters.
///
/// Rules, each counted independently when it fails:
/// - exactly one face detected (zero and multiple tracked separately)
/// - mean luminance at or above the dark threshold
/// - blur disqualifies only when the face count is not exactly one; a
///   single confidently detected face makes blur noise tolerable
///
/// A frame contributes to `valid_frames` only when every rule holds.
pub fn build_validity_mask(frames: &[LumaFrame], face_counts: &[u32]) -> (Vec<bool>, QualityStats) {
    let mut mask = Vec::with_capacity(frames.len());
    let mut stats = QualityStats {
        total_frames: frames.len() as u32,
        ..Default::default()
    };

    for (frame, &n_faces) in frames.iter().zip(face_counts) {
        let mut valid = true;

        if n_faces == 0 {
            stats.no_face_frames += 1;
            valid = false;
        } else if n_faces > 1 {
            stats.multi_face_frames += 1;
            valid = false;
        }

        if is_frame_too_dark(frame) {
            stats.dark_frames += 1;
            valid = false;
        }

        if is_frame_blurry(frame) && n_faces != 1 {
            stats.blurry_frames += 1;
            valid = false;
        }

        if valid {
            stats.valid_frames += 1;
        }
        mask.push(valid);
    }

    (mask, stats)
}

/// Longest contiguous run of invalid frames in the mask.
pub fn longest_invalid_run(mask: &[bool]) -> u32 {
    let mut longest = 0u32;
    let mut current = 0u32;
    for &valid in mask {
        if valid {
            current = 0;
        } else {
            current += 1;
            longest = longest.max(current);
        }
    }
    longest
}

/// Per-video usability decision.
///
/// Rules are evaluated in a fixed priority order; a video failing several
/// rules reports only the first matched reason. This ordering is a design
/// contract relied on by callers.
pub fn evaluate_usability(mask: &[bool], stats: &QualityStats, cfg: &GateConfig) -> UsabilityVerdict {
    if stats.total_frames == 0 {
        return UsabilityVerdict {
            usable: false,
            reason: UsabilityReason::NoFramesDecoded,
        };
    }

    if stats.valid_frames < cfg.min_valid_frames {
        return UsabilityVerdict {
            usable: false,
            reason: UsabilityReason::TooFewValidFrames,
        };
    }

    let valid_ratio = stats.valid_frames as f64 / stats.total_frames as f64;
    if valid_ratio < cfg.min_valid_ratio {
        return UsabilityVerdict {
            usable: false,
            reason: UsabilityReason::LowValidRatio,
        };
    }

    let gap_sec = longest_invalid_run(mask) as f64 / cfg.fps;
    if gap_sec > cfg.max_invalid_gap_sec {
        return UsabilityVerdict {
            usable: false,
            reason: UsabilityReason::LongInvalidGap,
        };
    }

    UsabilityVerdict {
        usable: true,
        reason: UsabilityReason::Ok,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Uniform frame at a given brightness.
    fn flat_frame(luma: u8) -> LumaFrame {
        LumaFrame::new(vec![luma; 64], 8, 8)
    }

    /// Bright frame with a checkerboard texture (high Laplacian variance).
    fn sharp_frame() -> LumaFrame {
        let mut data = Vec::with_capacity(64);
        for y in 0..8 {
            for x in 0..8 {
                data.push(if (x + y) % 2 == 0 { 200 } else { 80 });
            }
        }
        LumaFrame::new(data, 8, 8)
    }

    #[test]
    fn test_dark_detection() {
        assert!(is_frame_too_dark(&flat_frame(10)));
        assert!(!is_frame_too_dark(&flat_frame(120)));
    }

    #[test]
    fn test_blur_detection() {
        // A perfectly flat frame has zero Laplacian variance.
        assert!(is_frame_blurry(&flat_frame(120)));
        assert!(!is_frame_blurry(&sharp_frame()));
    }

    #[test]
    fn test_counters_bounded_by_total() {
        let frames = vec![flat_frame(10), flat_frame(10), sharp_frame(), sharp_frame()];
        let faces = vec![0, 2, 1, 1];
        let (mask, stats) = build_validity_mask(&frames, &faces);

        assert_eq!(stats.total_frames, 4);
        assert!(stats.valid_frames <= stats.total_frames);
        assert!(stats.no_face_frames <= stats.total_frames);
        assert!(stats.multi_face_frames <= stats.total_frames);
        assert!(stats.dark_frames <= stats.total_frames);
        assert!(stats.blurry_frames <= stats.total_frames);
        assert_eq!(mask, vec![false, false, true, true]);
    }

    #[test]
    fn test_frame_can_fail_multiple_rules() {
        // Dark AND faceless AND flat: three counters move, one invalid frame.
        let (mask, stats) = build_validity_mask(&[flat_frame(5)], &[0]);
        assert_eq!(stats.no_face_frames, 1);
        assert_eq!(stats.dark_frames, 1);
        assert_eq!(stats.blurry_frames, 1);
        assert_eq!(stats.valid_frames, 0);
        assert_eq!(mask, vec![false]);
    }

    #[test]
    fn test_blur_suppressed_for_single_face() {
        // Flat (blurry) but bright with exactly one face: blur rule is
        // suppressed, frame stays valid and the blur counter stays at 0.
        let (mask, stats) = build_validity_mask(&[flat_frame(120)], &[1]);
        assert_eq!(stats.blurry_frames, 0);
        assert_eq!(stats.valid_frames, 1);
        assert!(mask[0]);
    }

    #[test]
    fn test_blurry_two_face_frame_counts_both() {
        let (mask, stats) = build_validity_mask(&[flat_frame(120)], &[2]);
        assert_eq!(stats.multi_face_frames, 1);
        assert_eq!(stats.blurry_frames, 1);
        assert!(!mask[0]);
    }

    #[test]
    fn test_longest_invalid_run() {
        let mask = [true, false, false, true, false, false, false, true];
        assert_eq!(longest_invalid_run(&mask), 3);
        assert_eq!(longest_invalid_run(&[true, true]), 0);
        assert_eq!(longest_invalid_run(&[]), 0);
    }

    #[test]
    fn test_zero_frames_always_no_frames_decoded() {
        let stats = QualityStats::default();
        let verdict = evaluate_usability(&[], &stats, &GateConfig::default());
        assert!(!verdict.usable);
        assert_eq!(verdict.reason, UsabilityReason::NoFramesDecoded);
    }

    #[test]
    fn test_reason_priority_order() {
        let cfg = GateConfig::default();

        // Few valid frames AND low ratio: the first rule wins.
        let stats = QualityStats {
            total_frames: 200,
            valid_frames: 50,
            ..Default::default()
        };
        let mask = vec![false; 200];
        let verdict = evaluate_usability(&mask, &stats, &cfg);
        assert_eq!(verdict.reason, UsabilityReason::TooFewValidFrames);

        // Enough valid frames, ratio below 0.7.
        let stats = QualityStats {
            total_frames: 300,
            valid_frames: 150,
            ..Default::default()
        };
        let verdict = evaluate_usability(&vec![true; 300], &stats, &cfg);
        assert_eq!(verdict.reason, UsabilityReason::LowValidRatio);
    }

    #[test]
    fn test_long_gap_rejection() {
        let cfg = GateConfig::default(); // 3.0s at 25 fps = 75 frames

        // 400 valid frames with a single 80-frame invalid run in the middle.
        let mut mask = vec![true; 480];
        for v in mask.iter_mut().take(280).skip(200) {
            *v = false;
        }
        let stats = QualityStats {
            total_frames: 480,
            valid_frames: 400,
            ..Default::default()
        };
        let verdict = evaluate_usability(&mask, &stats, &cfg);
        assert_eq!(verdict.reason, UsabilityReason::LongInvalidGap);

        // A 70-frame run (2.8s) is tolerated.
        let mut mask = vec![true; 480];
        for v in mask.iter_mut().take(270).skip(200) {
            *v = false;
        }
        let stats = QualityStats {
            total_frames: 480,
            valid_frames: 410,
            ..Default::default()
        };
        let verdict = evaluate_usability(&mask, &stats, &cfg);
        assert!(verdict.usable);
        assert_eq!(verdict.reason, UsabilityReason::Ok);
    }
}
