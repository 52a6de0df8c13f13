//! Stochastic sequence augmentations for self-supervised training
//!
//! Three light temporal perturbations. Each preserves the feature
//! channels and keeps the sequence plausible as child movement: a small
//! circular time shift, dropping a leading chunk, and reversing one short
//! micro-segment.

use crate::model::{Sequence, SimpleRng};

/// Maximum circular shift, as a fraction of sequence length.
pub const SHIFT_MAX_FRAC: f64 = 0.05;
/// Leading-crop range, as fractions of sequence length.
pub const CROP_MIN_FRAC: f64 = 0.10;
pub const CROP_MAX_FRAC: f64 = 0.30;
/// Reversed micro-segment length, as a fraction of sequence length.
pub const SEGMENT_FRAC: f64 = 0.10;

const SHIFT_PROB: f64 = 0.5;
const CROP_PROB: f64 = 0.5;
const REVERSE_PROB: f64 = 0.3;

/// Circularly shift the sequence by up to `SHIFT_MAX_FRAC` of its length,
/// in either direction.
pub fn temporal_shift(x: &Sequence, rng: &mut SimpleRng) -> Sequence {
    let steps = x.steps();
    let max_shift = ((steps as f64) * SHIFT_MAX_FRAC).floor() as usize;
    if max_shift == 0 {
        return x.clone();
    }
    let magnitude = rng.next_below(max_shift) + 1;
    let forward = rng.next_unit() < 0.5;
    let shift = if forward {
        magnitude
    } else {
        steps - magnitude
    };

    let mut out = Sequence::zeros(steps, x.channels());
    for t in 0..steps {
        let src = (t + shift) % steps;
        for c in 0..x.channels() {
            out.set(t, c, x.get(src, c));
        }
    }
    out
}

/// Drop a leading chunk of 10-30% of the sequence. The result is shorter;
/// the model accepts any length.
pub fn random_crop_start(x: &Sequence, rng: &mut SimpleRng) -> Sequence {
    let steps = x.steps();
    let frac = rng.next_range(CROP_MIN_FRAC as f32, CROP_MAX_FRAC as f32) as f64;
    let drop = ((steps as f64) * frac).floor() as usize;
    // Always keep at least two steps.
    let drop = drop.min(steps.saturating_sub(2));
    if drop == 0 {
        return x.clone();
    }

    let mut out = Sequence::zeros(steps - drop, x.channels());
    for t in 0..out.steps() {
        for c in 0..x.channels() {
            out.set(t, c, x.get(t + drop, c));
        }
    }
    out
}

/// Reverse one randomly placed micro-segment (~10% of the sequence).
pub fn reverse_micro_segment(x: &Sequence, rng: &mut SimpleRng) -> Sequence {
    let steps = x.steps();
    let seg = (((steps as f64) * SEGMENT_FRAC).round() as usize).max(2);
    if seg >= steps {
        return x.clone();
    }
    let start = rng.next_below(steps - seg + 1);

    let mut out = x.clone();
    for offset in 0..seg {
        let src = start + seg - 1 - offset;
        for c in 0..x.channels() {
            out.set(start + offset, c, x.get(src, c));
        }
    }
    out
}

/// Apply the augmentation pipeline with its standard probabilities.
/// Every draw consumes randomness whether or not the step fires, so a
/// given seed always yields the same view.
pub fn augment(x: &Sequence, rng: &mut SimpleRng) -> Sequence {
    let mut out = x.clone();

    let apply_shift = rng.next_unit() < SHIFT_PROB as f32;
    if apply_shift {
        out = temporal_shift(&out, rng);
    }
    let apply_crop = rng.next_unit() < CROP_PROB as f32;
    if apply_crop {
        out = random_crop_start(&out, rng);
    }
    let apply_reverse = rng.next_unit() < REVERSE_PROB as f32;
    if apply_reverse {
        out = reverse_micro_segment(&out, rng);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(steps: usize) -> Sequence {
        let rows: Vec<Vec<f32>> = (0..steps).map(|t| vec![t as f32, -(t as f32)]).collect();
        Sequence::from_rows(&rows)
    }

    #[test]
    fn test_temporal_shift_is_permutation() {
        let x = ramp(40);
        let mut rng = SimpleRng::new(3);
        let shifted = temporal_shift(&x, &mut rng);
        assert_eq!(shifted.steps(), 40);

        let mut original: Vec<f32> = (0..40).map(|t| x.get(t, 0)).collect();
        let mut moved: Vec<f32> = (0..40).map(|t| shifted.get(t, 0)).collect();
        original.sort_by(|a, b| a.partial_cmp(b).unwrap());
        moved.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(original, moved);
        assert_ne!(x, shifted);
    }

    #[test]
    fn test_shift_bounded() {
        let x = ramp(40);
        // max shift at 5% of 40 steps is 2
        for seed in 1..30u64 {
            let mut rng = SimpleRng::new(seed);
            let shifted = temporal_shift(&x, &mut rng);
            let delta = (shifted.get(0, 0) - x.get(0, 0)).abs();
            assert!(
                delta <= 2.0 || delta >= 38.0,
                "shift too large: {}",
                delta
            );
        }
    }

    #[test]
    fn test_crop_drops_leading_steps() {
        let x = ramp(20);
        let mut rng = SimpleRng::new(5);
        let cropped = random_crop_start(&x, &mut rng);
        // 10-30% of 20 steps: 2 to 6 dropped.
        let dropped = 20 - cropped.steps();
        assert!((2..=6).contains(&dropped), "dropped {}", dropped);
        // Remaining steps are the original tail, in order.
        for t in 0..cropped.steps() {
            assert_eq!(cropped.get(t, 0), x.get(t + dropped, 0));
        }
    }

    #[test]
    fn test_reverse_micro_segment_local() {
        let x = ramp(30);
        let mut rng = SimpleRng::new(9);
        let reversed = reverse_micro_segment(&x, &mut rng);
        assert_eq!(reversed.steps(), 30);

        let changed: Vec<usize> = (0..30)
            .filter(|&t| reversed.get(t, 0) != x.get(t, 0))
            .collect();
        assert!(!changed.is_empty());
        // ~10% of 30 steps: changes confined to a 3-step span.
        let span = changed.last().unwrap() - changed.first().unwrap() + 1;
        assert!(span <= 3, "span {}", span);
    }

    #[test]
    fn test_augment_deterministic_per_seed() {
        let x = ramp(40);
        let mut a = SimpleRng::new(42);
        let mut b = SimpleRng::new(42);
        assert_eq!(augment(&x, &mut a), augment(&x, &mut b));
    }

    #[test]
    fn test_augment_seeds_differ() {
        let x = ramp(40);
        let views: Vec<Sequence> = (0..8)
            .map(|seed| {
                let mut rng = SimpleRng::new(seed + 100);
                augment(&x, &mut rng)
            })
            .collect();
        assert!(views.iter().any(|v| *v != views[0]));
    }

    #[test]
    fn test_tiny_sequence_survives() {
        let x = ramp(3);
        for seed in 1..20u64 {
            let mut rng = SimpleRng::new(seed);
            let out = augment(&x, &mut rng);
            assert!(out.steps() >= 2);
            assert_eq!(out.channels(), 2);
        }
    }
}
