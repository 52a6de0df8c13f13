//! Score calibration against the held-out calibration split
//!
//! A trained model only yields raw reconstruction errors; their scale
//! depends on feature scaling and training length. Calibration fits the
//! mean and standard deviation of errors on held-out typical sessions,
//! so scoring can express each new sequence as a z-score and squash the
//! session mean through a sigmoid into a stable 0..1 value.
//!
//! The record persists as JSON via a temp-file write and atomic rename,
//! so readers never observe a half-written file.

use crate::error::ScreenError;
use crate::model::StandardScaler;
use crate::types::ScreeningScore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use uuid::Uuid;

/// Floor on the fitted sigma.
const SIGMA_FLOOR: f64 = 1e-8;

/// Ridge added to the embedding covariance diagonal before factoring.
const COV_RIDGE: f64 = 1e-6;

/// Everything scoring needs beyond the model weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub record_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Mean reconstruction error on the calibration split.
    pub mu: f64,
    /// Standard deviation of reconstruction error on the calibration split.
    pub sigma: f64,
    /// The scaler fit on the training split; scoring must reuse it.
    pub scaler: StandardScaler,
    /// Feature key order the scaler was fit over.
    pub feature_schema: Vec<String>,
    pub seq_len: usize,
    /// Optional embedding-space statistics for Mahalanobis scoring.
    pub embedding_stats: Option<EmbeddingStats>,
}

/// Mean and covariance of typical-session embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingStats {
    pub mean: Vec<f64>,
    /// Row-major covariance matrix, `dim * dim`.
    pub covariance: Vec<f64>,
}

impl CalibrationRecord {
    /// Fit mu and sigma from calibration-split reconstruction errors.
    pub fn fit(
        errors: &[f64],
        scaler: StandardScaler,
        feature_schema: Vec<String>,
        seq_len: usize,
    ) -> Result<Self, ScreenError> {
        if errors.is_empty() {
            return Err(ScreenError::CalibrationError(
                "no calibration errors to fit".to_string(),
            ));
        }
        let n = errors.len() as f64;
        let mu = errors.iter().sum::<f64>() / n;
        let var = errors.iter().map(|e| (e - mu) * (e - mu)).sum::<f64>() / n;
        let sigma = var.sqrt().max(SIGMA_FLOOR);

        Ok(Self {
            record_id: Uuid::new_v4(),
            created_at: Utc::now(),
            mu,
            sigma,
            scaler,
            feature_schema,
            seq_len,
            embedding_stats: None,
        })
    }

    /// Attach embedding statistics computed from calibration embeddings.
    pub fn with_embeddings(mut self, embeddings: &[Vec<f32>]) -> Result<Self, ScreenError> {
        self.embedding_stats = Some(fit_embedding_stats(embeddings)?);
        Ok(self)
    }

    /// Z-score one reconstruction error.
    pub fn z_score(&self, error: f64) -> f64 {
        (error - self.mu) / self.sigma
    }

    /// Session-level score from per-sequence reconstruction errors.
    ///
    /// `confidence` is the sigmoid of the mean z-score: near 0.5 for
    /// errors typical of calibration, approaching 1.0 as behavior
    /// departs from it.
    pub fn score(&self, errors: &[f64]) -> Result<ScreeningScore, ScreenError> {
        if errors.is_empty() {
            return Err(ScreenError::CalibrationError(
                "no reconstruction errors to score".to_string(),
            ));
        }
        let window_scores: Vec<f64> = errors.iter().map(|&e| self.z_score(e)).collect();
        let mean_deviation = window_scores.iter().sum::<f64>() / window_scores.len() as f64;
        let confidence = sigmoid(mean_deviation);

        Ok(ScreeningScore {
            confidence,
            mean_deviation,
            window_scores,
        })
    }

    /// Mahalanobis distance of an embedding from the calibration cloud.
    /// Requires [`Self::with_embeddings`] to have been applied.
    pub fn mahalanobis(&self, embedding: &[f32]) -> Result<f64, ScreenError> {
        let stats = self.embedding_stats.as_ref().ok_or_else(|| {
            ScreenError::CalibrationError("no embedding statistics fitted".to_string())
        })?;
        let dim = stats.mean.len();
        if embedding.len() != dim {
            return Err(ScreenError::ShapeMismatch(format!(
                "embedding has {} dims, statistics cover {}",
                embedding.len(),
                dim
            )));
        }

        let delta: Vec<f64> = embedding
            .iter()
            .zip(&stats.mean)
            .map(|(e, m)| *e as f64 - m)
            .collect();
        let chol = cholesky(&stats.covariance, dim)?;
        // Solve L y = delta; the distance is |y|.
        let y = forward_substitute(&chol, dim, &delta)?;
        Ok(y.iter().map(|v| v * v).sum::<f64>().sqrt())
    }

    /// Write the record as JSON, replacing any existing file atomically.
    pub fn save(&self, path: &Path) -> Result<(), ScreenError> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ScreenError> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn fit_embedding_stats(embeddings: &[Vec<f32>]) -> Result<EmbeddingStats, ScreenError> {
    let first = embeddings.first().ok_or_else(|| {
        ScreenError::CalibrationError("no embeddings to fit".to_string())
    })?;
    let dim = first.len();
    let n = embeddings.len() as f64;

    let mut mean = vec![0.0f64; dim];
    for e in embeddings {
        if e.len() != dim {
            return Err(ScreenError::ShapeMismatch(
                "embeddings have mixed dimensions".to_string(),
            ));
        }
        for (m, v) in mean.iter_mut().zip(e) {
            *m += *v as f64;
        }
    }
    for m in mean.iter_mut() {
        *m /= n;
    }

    let mut covariance = vec![0.0f64; dim * dim];
    for e in embeddings {
        let delta: Vec<f64> = e.iter().zip(&mean).map(|(v, m)| *v as f64 - m).collect();
        for i in 0..dim {
            for j in 0..dim {
                covariance[i * dim + j] += delta[i] * delta[j];
            }
        }
    }
    for v in covariance.iter_mut() {
        *v /= n;
    }
    for i in 0..dim {
        covariance[i * dim + i] += COV_RIDGE;
    }

    Ok(EmbeddingStats { mean, covariance })
}

/// Lower-triangular Cholesky factor of a symmetric positive-definite
/// matrix, row-major.
fn cholesky(matrix: &[f64], dim: usize) -> Result<Vec<f64>, ScreenError> {
    if matrix.len() != dim * dim {
        return Err(ScreenError::ShapeMismatch(
            "covariance matrix size mismatch".to_string(),
        ));
    }
    let mut l = vec![0.0f64; dim * dim];
    for i in 0..dim {
        for j in 0..=i {
            let mut sum = matrix[i * dim + j];
            for k in 0..j {
                sum -= l[i * dim + k] * l[j * dim + k];
            }
            if i == j {
                if sum <= 0.0 {
                    return Err(ScreenError::CalibrationError(
                        "covariance matrix is not positive definite".to_string(),
                    ));
                }
                l[i * dim + j] = sum.sqrt();
            } else {
                l[i * dim + j] = sum / l[j * dim + j];
            }
        }
    }
    Ok(l)
}

fn forward_substitute(l: &[f64], dim: usize, b: &[f64]) -> Result<Vec<f64>, ScreenError> {
    let mut y = vec![0.0f64; dim];
    for i in 0..dim {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[i * dim + k] * y[k];
        }
        let diag = l[i * dim + i];
        if diag == 0.0 {
            return Err(ScreenError::CalibrationError(
                "singular Cholesky factor".to_string(),
            ));
        }
        y[i] = sum / diag;
    }
    Ok(y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FEATURE_KEYS;
    use pretty_assertions::assert_eq;

    fn schema() -> Vec<String> {
        FEATURE_KEYS.iter().map(|k| k.to_string()).collect()
    }

    fn sample_scaler() -> StandardScaler {
        StandardScaler::fit(&[vec![0.0, 1.0], vec![2.0, 3.0], vec![4.0, 5.0]]).unwrap()
    }

    #[test]
    fn test_fit_mu_sigma() {
        let record =
            CalibrationRecord::fit(&[1.0, 2.0, 3.0], sample_scaler(), schema(), 10).unwrap();
        assert!((record.mu - 2.0).abs() < 1e-12);
        let expected_sigma = (2.0f64 / 3.0).sqrt();
        assert!((record.sigma - expected_sigma).abs() < 1e-12);
    }

    #[test]
    fn test_fit_rejects_empty() {
        assert!(CalibrationRecord::fit(&[], sample_scaler(), schema(), 10).is_err());
    }

    #[test]
    fn test_constant_errors_do_not_divide_by_zero() {
        let record =
            CalibrationRecord::fit(&[5.0, 5.0, 5.0], sample_scaler(), schema(), 10).unwrap();
        let z = record.z_score(5.0);
        assert!(z.is_finite());
        assert_eq!(z, 0.0);
    }

    #[test]
    fn test_typical_session_scores_near_half() {
        let record =
            CalibrationRecord::fit(&[1.0, 2.0, 3.0], sample_scaler(), schema(), 10).unwrap();
        let score = record.score(&[2.0, 2.0]).unwrap();
        assert!((score.confidence - 0.5).abs() < 1e-9);
        assert!(score.mean_deviation.abs() < 1e-9);
        assert_eq!(score.window_scores.len(), 2);
    }

    #[test]
    fn test_larger_errors_raise_confidence() {
        let record =
            CalibrationRecord::fit(&[1.0, 2.0, 3.0], sample_scaler(), schema(), 10).unwrap();
        let low = record.score(&[2.0]).unwrap();
        let high = record.score(&[10.0]).unwrap();
        assert!(high.confidence > low.confidence);
        assert!(high.confidence > 0.9);
        assert!(high.confidence <= 1.0);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!("kinesia-cal-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("calibration.json");

        let record =
            CalibrationRecord::fit(&[1.0, 2.0, 3.0], sample_scaler(), schema(), 10).unwrap();
        record.save(&path).unwrap();
        // Save again to exercise atomic replacement of an existing file.
        record.save(&path).unwrap();

        let loaded = CalibrationRecord::load(&path).unwrap();
        assert_eq!(loaded.record_id, record.record_id);
        assert_eq!(loaded.mu, record.mu);
        assert_eq!(loaded.sigma, record.sigma);
        assert_eq!(loaded.feature_schema, record.feature_schema);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_mahalanobis_distance() {
        let embeddings = vec![
            vec![1.0f32, 0.0],
            vec![-1.0, 0.0],
            vec![0.0, 1.0],
            vec![0.0, -1.0],
        ];
        let record = CalibrationRecord::fit(&[1.0, 2.0], sample_scaler(), schema(), 10)
            .unwrap()
            .with_embeddings(&embeddings)
            .unwrap();

        let near = record.mahalanobis(&[0.0, 0.0]).unwrap();
        let far = record.mahalanobis(&[5.0, 5.0]).unwrap();
        assert!(near < 1e-6);
        assert!(far > near);
    }

    #[test]
    fn test_mahalanobis_requires_stats() {
        let record =
            CalibrationRecord::fit(&[1.0, 2.0], sample_scaler(), schema(), 10).unwrap();
        assert!(record.mahalanobis(&[0.0, 0.0]).is_err());
    }
}
