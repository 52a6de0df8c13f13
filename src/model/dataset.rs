//! Feature standardization and sequence dataset assembly
//!
//! Per-window feature vectors become overlapping fixed-length sequences of
//! standardized values. The scaler is fit on training data only and is
//! persisted alongside the model so scoring applies the identical
//! transform.

use crate::error::ScreenError;
use crate::model::Sequence;
use crate::types::FeatureVector;
use serde::{Deserialize, Serialize};

/// Floor on the per-dimension standard deviation. A constant feature
/// column scales to zero instead of dividing by zero.
const STD_FLOOR: f64 = 1e-8;

/// Default number of consecutive windows per model input sequence.
pub const DEFAULT_SEQ_LEN: usize = 10;

/// Per-dimension zero-mean unit-variance standardization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl StandardScaler {
    /// Fit mean and standard deviation over rows of uniform dimension.
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self, ScreenError> {
        let dim = check_uniform(rows)?;
        let n = rows.len() as f64;

        let mut mean = vec![0.0; dim];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in mean.iter_mut() {
            *m /= n;
        }

        let mut std = vec![0.0; dim];
        for row in rows {
            for (s, (v, m)) in std.iter_mut().zip(row.iter().zip(&mean)) {
                let d = v - m;
                *s += d * d;
            }
        }
        for s in std.iter_mut() {
            *s = (*s / n).sqrt().max(STD_FLOOR);
        }

        Ok(Self { mean, std })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Standardize one row in place-order, returning f32 for the model.
    pub fn transform(&self, row: &[f64]) -> Result<Vec<f32>, ScreenError> {
        if row.len() != self.dim() {
            return Err(ScreenError::ShapeMismatch(format!(
                "scaler fit on {} dims, row has {}",
                self.dim(),
                row.len()
            )));
        }
        Ok(row
            .iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(v, (m, s))| ((v - m) / s) as f32)
            .collect())
    }
}

fn check_uniform(rows: &[Vec<f64>]) -> Result<usize, ScreenError> {
    let first = rows
        .first()
        .ok_or_else(|| ScreenError::InsufficientData("no feature rows".to_string()))?;
    let dim = first.len();
    for (i, row) in rows.iter().enumerate() {
        if row.len() != dim {
            return Err(ScreenError::ShapeMismatch(format!(
                "row 0 has {} dims, row {} has {}",
                dim,
                i,
                row.len()
            )));
        }
    }
    Ok(dim)
}

/// Overlapping fixed-length sequences of standardized window features.
///
/// A session with W windows and sequence length L yields `W - L + 1`
/// sequences (stride one), each `(L, F)`.
#[derive(Debug, Clone)]
pub struct WindowSequenceDataset {
    sequences: Vec<Sequence>,
    seq_len: usize,
    feature_dim: usize,
}

impl WindowSequenceDataset {
    /// Build sequences from one session's window features.
    ///
    /// Returns [`ScreenError::InsufficientData`] when the session has
    /// fewer windows than one sequence needs.
    pub fn from_features(
        features: &[FeatureVector],
        scaler: &StandardScaler,
        seq_len: usize,
    ) -> Result<Self, ScreenError> {
        let rows: Vec<Vec<f64>> = features.iter().map(|f| f.to_vec()).collect();
        Self::from_rows(&rows, scaler, seq_len)
    }

    /// Build sequences from already-stacked feature rows.
    pub fn from_rows(
        rows: &[Vec<f64>],
        scaler: &StandardScaler,
        seq_len: usize,
    ) -> Result<Self, ScreenError> {
        if seq_len == 0 {
            return Err(ScreenError::ShapeMismatch(
                "sequence length must be positive".to_string(),
            ));
        }
        let dim = check_uniform(rows)?;
        if rows.len() < seq_len {
            return Err(ScreenError::InsufficientData(format!(
                "{} windows, need at least {} for one sequence",
                rows.len(),
                seq_len
            )));
        }

        let scaled: Vec<Vec<f32>> = rows
            .iter()
            .map(|row| scaler.transform(row))
            .collect::<Result<_, _>>()?;

        let sequences = (0..=scaled.len() - seq_len)
            .map(|start| Sequence::from_rows(&scaled[start..start + seq_len]))
            .collect();

        Ok(Self {
            sequences,
            seq_len,
            feature_dim: dim,
        })
    }

    /// Merge several per-session datasets into one training pool.
    ///
    /// Sequences never span a session boundary.
    pub fn merge(parts: Vec<WindowSequenceDataset>) -> Result<Self, ScreenError> {
        let first = parts
            .first()
            .ok_or_else(|| ScreenError::InsufficientData("no datasets to merge".to_string()))?;
        let seq_len = first.seq_len;
        let feature_dim = first.feature_dim;

        let mut sequences = Vec::new();
        for part in parts {
            if part.seq_len != seq_len || part.feature_dim != feature_dim {
                return Err(ScreenError::ShapeMismatch(
                    "merged datasets must share sequence length and feature dim".to_string(),
                ));
            }
            sequences.extend(part.sequences);
        }

        Ok(Self {
            sequences,
            seq_len,
            feature_dim,
        })
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn sequences(&self) -> &[Sequence] {
        &self.sequences
    }
}
