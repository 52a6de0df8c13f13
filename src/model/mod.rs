//! Self-supervised temporal embedding model
//!
//! A causal dilated-convolution autoencoder over `(time, feature)` window
//! sequences, trained with a combined reconstruction + contrastive
//! objective. All arithmetic is plain `f32`; no external ML framework.
//!
//! - [`dataset`]: feature scaling and `(N, T, F)` sequence stacking
//! - [`tcn`]: temporal blocks, encoder/decoder, parameter flattening
//! - [`augment`]: timing/ordering perturbations for contrastive views
//! - [`train`]: SGD training loop with numerical gradient estimation

pub mod augment;
pub mod dataset;
pub mod tcn;
pub mod train;

pub use dataset::{StandardScaler, WindowSequenceDataset};
pub use tcn::{ModelConfig, TcnAutoencoder};
pub use train::{reconstruction_errors, train, EpochStats, TrainConfig};

use serde::{Deserialize, Serialize};

/// A `(steps, channels)` f32 buffer, row-major over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    data: Vec<f32>,
    steps: usize,
    channels: usize,
}

impl Sequence {
    pub fn zeros(steps: usize, channels: usize) -> Self {
        Self {
            data: vec![0.0; steps * channels],
            steps,
            channels,
        }
    }

    /// Build from per-timestep rows; every row must have the same length.
    pub fn from_rows(rows: &[Vec<f32>]) -> Self {
        let channels = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * channels);
        for row in rows {
            debug_assert_eq!(row.len(), channels);
            data.extend_from_slice(row);
        }
        Self {
            data,
            steps: rows.len(),
            channels,
        }
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn get(&self, t: usize, c: usize) -> f32 {
        self.data[t * self.channels + c]
    }

    #[inline]
    pub fn set(&mut self, t: usize, c: usize, v: f32) {
        self.data[t * self.channels + c] = v;
    }

    /// Mean squared difference against another sequence of the same shape.
    pub fn mse(&self, other: &Sequence) -> f32 {
        debug_assert_eq!(self.data.len(), other.data.len());
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: f32 = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        sum / self.data.len() as f32
    }
}

/// Deterministic xorshift64 PRNG. Keeps training, augmentation, and
/// initialization reproducible without an external dependency.
#[derive(Debug, Clone)]
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform f32 in [0, 1). Uses 24 bits so every draw, including the
    /// largest, is exactly representable and stays strictly below 1.0.
    pub fn next_unit(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u32 << 24) as f32
    }

    /// Uniform f32 in [lo, hi).
    pub fn next_range(&mut self, lo: f32, hi: f32) -> f32 {
        lo + (hi - lo) * self.next_unit()
    }

    /// Uniform usize in [0, n).
    pub fn next_below(&mut self, n: usize) -> usize {
        if n == 0 {
            0
        } else {
            (self.next_u64() % n as u64) as usize
        }
    }

    /// Fisher-Yates shuffle.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_below(i + 1);
            items.swap(i, j);
        }
    }
}
