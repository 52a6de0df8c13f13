//! Self-supervised training loop
//!
//! No external ML framework: gradients come from central-difference
//! estimation over the flattened parameter vector, applied with
//! momentum SGD and global-norm gradient clipping. The loss combines
//! sequence reconstruction with an InfoNCE contrastive term over two
//! augmented views of each sequence.
//!
//! The dropout RNG inside the loss closure is re-seeded per batch, so
//! the perturbed evaluations at `p + eps` and `p - eps` see identical
//! dropout masks and the finite difference measures the parameter, not
//! the noise.

use crate::error::ScreenError;
use crate::model::augment::augment;
use crate::model::dataset::WindowSequenceDataset;
use crate::model::tcn::TcnAutoencoder;
use crate::model::{Sequence, SimpleRng};
use serde::{Deserialize, Serialize};

/// InfoNCE temperature.
const NCE_TEMPERATURE: f32 = 0.07;

/// Finite-difference step.
const GRAD_EPSILON: f32 = 1e-3;

/// Training hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub momentum: f32,
    pub recon_weight: f32,
    pub contrastive_weight: f32,
    pub grad_clip: f32,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 60,
            batch_size: 16,
            learning_rate: 1e-3,
            momentum: 0.9,
            recon_weight: 1.0,
            contrastive_weight: 0.5,
            grad_clip: 1.0,
            seed: 42,
        }
    }
}

/// Per-epoch diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub loss: f64,
    pub recon_loss: f64,
    pub contrastive_loss: f64,
}

/// Momentum SGD over a flat parameter vector.
struct Sgd {
    lr: f32,
    momentum: f32,
    velocity: Vec<f32>,
}

impl Sgd {
    fn new(lr: f32, momentum: f32, dim: usize) -> Self {
        Self {
            lr,
            momentum,
            velocity: vec![0.0; dim],
        }
    }

    fn step(&mut self, params: &mut [f32], grad: &[f32]) {
        for ((p, v), g) in params.iter_mut().zip(self.velocity.iter_mut()).zip(grad) {
            *v = self.momentum * *v - self.lr * g;
            *p += *v;
        }
    }
}

/// Scale the gradient down when its global L2 norm exceeds `max_norm`.
fn clip_gradients(grad: &mut [f32], max_norm: f32) {
    let norm = grad.iter().map(|g| (g * g) as f64).sum::<f64>().sqrt() as f32;
    if norm > max_norm && norm > 0.0 {
        let scale = max_norm / norm;
        for g in grad.iter_mut() {
            *g *= scale;
        }
    }
}

/// Central-difference gradient of `loss` at `params`.
fn estimate_gradient<F>(params: &[f32], mut loss: F) -> Vec<f32>
where
    F: FnMut(&[f32]) -> f64,
{
    let mut probe = params.to_vec();
    let mut grad = vec![0.0f32; params.len()];

    for i in 0..params.len() {
        let original = probe[i];
        probe[i] = original + GRAD_EPSILON;
        let plus = loss(&probe);
        probe[i] = original - GRAD_EPSILON;
        let minus = loss(&probe);
        probe[i] = original;
        grad[i] = ((plus - minus) / (2.0 * GRAD_EPSILON as f64)) as f32;
    }

    grad
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    dot / (na.sqrt() * nb.sqrt() + 1e-8)
}

/// InfoNCE over paired embeddings: view `a[i]` must pick out `b[i]`
/// among all of `b`, and symmetrically.
fn info_nce(a: &[Vec<f32>], b: &[Vec<f32>]) -> f64 {
    let n = a.len();
    if n < 2 {
        return 0.0;
    }

    let mut total = 0.0f64;
    for (anchors, candidates) in [(a, b), (b, a)] {
        for (i, anchor) in anchors.iter().enumerate() {
            let logits: Vec<f32> = candidates
                .iter()
                .map(|c| cosine_similarity(anchor, c) / NCE_TEMPERATURE)
                .collect();
            let max = logits.iter().fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            let log_sum: f64 = logits
                .iter()
                .map(|&l| ((l - max) as f64).exp())
                .sum::<f64>()
                .ln()
                + max as f64;
            total += log_sum - logits[i] as f64;
        }
    }

    total / (2.0 * n as f64)
}

/// Combined loss for one batch at the given parameters. Dropout is
/// driven by a fresh RNG seeded with `dropout_seed` on every call.
fn batch_loss(
    scratch: &mut TcnAutoencoder,
    params: &[f32],
    batch: &[&Sequence],
    views: &[(Sequence, Sequence)],
    cfg: &TrainConfig,
    dropout_seed: u64,
) -> Result<(f64, f64, f64), ScreenError> {
    scratch.set_params(params)?;
    let mut rng = SimpleRng::new(dropout_seed);

    let mut recon = 0.0f64;
    for x in batch {
        let y = scratch.forward_train(x, &mut rng)?;
        recon += x.mse(&y) as f64;
    }
    recon /= batch.len() as f64;

    let contrastive = if cfg.contrastive_weight > 0.0 && views.len() >= 2 {
        let mut ea = Vec::with_capacity(views.len());
        let mut eb = Vec::with_capacity(views.len());
        for (va, vb) in views {
            ea.push(scratch.embed_train(va, &mut rng)?);
            eb.push(scratch.embed_train(vb, &mut rng)?);
        }
        info_nce(&ea, &eb)
    } else {
        0.0
    };

    let total = cfg.recon_weight as f64 * recon + cfg.contrastive_weight as f64 * contrastive;
    Ok((total, recon, contrastive))
}

/// Train the model in place on the dataset. Returns per-epoch stats.
pub fn train(
    model: &mut TcnAutoencoder,
    dataset: &WindowSequenceDataset,
    cfg: &TrainConfig,
) -> Result<Vec<EpochStats>, ScreenError> {
    if dataset.is_empty() {
        return Err(ScreenError::InsufficientData(
            "empty training dataset".to_string(),
        ));
    }
    if dataset.feature_dim() != model.config().feature_dim {
        return Err(ScreenError::ShapeMismatch(format!(
            "dataset has {} feature dims, model expects {}",
            dataset.feature_dim(),
            model.config().feature_dim
        )));
    }

    let mut params = model.params();
    let mut optimizer = Sgd::new(cfg.learning_rate, cfg.momentum, params.len());
    let mut scratch = model.clone();
    let mut epoch_rng = SimpleRng::new(cfg.seed);
    let mut history = Vec::with_capacity(cfg.epochs);

    let mut order: Vec<usize> = (0..dataset.len()).collect();

    for epoch in 0..cfg.epochs {
        epoch_rng.shuffle(&mut order);

        let mut epoch_loss = 0.0f64;
        let mut epoch_recon = 0.0f64;
        let mut epoch_nce = 0.0f64;
        let mut batches = 0usize;

        for chunk in order.chunks(cfg.batch_size.max(1)) {
            let batch: Vec<&Sequence> =
                chunk.iter().map(|&i| &dataset.sequences()[i]).collect();

            // Augmented view pairs are fixed for the whole batch so every
            // finite-difference evaluation sees the same inputs.
            let mut view_rng = SimpleRng::new(epoch_rng.next_u64());
            let views: Vec<(Sequence, Sequence)> = batch
                .iter()
                .map(|x| (augment(x, &mut view_rng), augment(x, &mut view_rng)))
                .collect();
            let dropout_seed = epoch_rng.next_u64();

            let grad = {
                let mut eval = |p: &[f32]| {
                    batch_loss(&mut scratch, p, &batch, &views, cfg, dropout_seed)
                        .map(|(total, _, _)| total)
                        .unwrap_or(f64::INFINITY)
                };
                estimate_gradient(&params, &mut eval)
            };

            let mut grad = grad;
            clip_gradients(&mut grad, cfg.grad_clip);
            optimizer.step(&mut params, &grad);

            let (total, recon, nce) =
                batch_loss(&mut scratch, &params, &batch, &views, cfg, dropout_seed)?;
            epoch_loss += total;
            epoch_recon += recon;
            epoch_nce += nce;
            batches += 1;
        }

        let denom = batches.max(1) as f64;
        history.push(EpochStats {
            epoch,
            loss: epoch_loss / denom,
            recon_loss: epoch_recon / denom,
            contrastive_loss: epoch_nce / denom,
        });
    }

    model.set_params(&params)?;
    Ok(history)
}

/// Per-sequence reconstruction error (MSE), dropout off.
pub fn reconstruction_errors(
    model: &TcnAutoencoder,
    sequences: &[Sequence],
) -> Result<Vec<f64>, ScreenError> {
    sequences
        .iter()
        .map(|x| {
            let y = model.forward(x)?;
            Ok(x.mse(&y) as f64)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::dataset::StandardScaler;
    use crate::model::tcn::ModelConfig;

    fn tiny_model() -> TcnAutoencoder {
        TcnAutoencoder::new(
            ModelConfig {
                feature_dim: 2,
                hidden_dim: 2,
                kernel_size: 2,
                embed_dim: 2,
                pool_last_k: 2,
                dropout: 0.0,
            },
            1,
        )
    }

    fn tiny_dataset() -> WindowSequenceDataset {
        let rows: Vec<Vec<f64>> = (0..10)
            .map(|i| {
                let t = i as f64 * 0.7;
                vec![t.sin(), t.cos()]
            })
            .collect();
        let scaler = StandardScaler::fit(&rows).unwrap();
        WindowSequenceDataset::from_rows(&rows, &scaler, 6).unwrap()
    }

    #[test]
    fn test_clip_gradients_scales_down() {
        let mut grad = vec![3.0f32, 4.0];
        clip_gradients(&mut grad, 1.0);
        let norm = (grad[0] * grad[0] + grad[1] * grad[1]).sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        // Direction preserved.
        assert!((grad[0] / grad[1] - 0.75).abs() < 1e-5);
    }

    #[test]
    fn test_clip_gradients_leaves_small_alone() {
        let mut grad = vec![0.1f32, 0.2];
        let before = grad.clone();
        clip_gradients(&mut grad, 1.0);
        assert_eq!(grad, before);
    }

    #[test]
    fn test_estimate_gradient_quadratic() {
        // f(p) = sum p_i^2 has gradient 2p.
        let params = vec![1.0f32, -2.0, 0.5];
        let grad = estimate_gradient(&params, |p| {
            p.iter().map(|v| (v * v) as f64).sum()
        });
        for (g, p) in grad.iter().zip(&params) {
            assert!((g - 2.0 * p).abs() < 1e-2, "grad {} for param {}", g, p);
        }
    }

    #[test]
    fn test_info_nce_prefers_matched_pairs() {
        let aligned = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let matched = info_nce(&aligned, &aligned);
        let crossed = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        let mismatched = info_nce(&aligned, &crossed);
        assert!(matched < mismatched);
    }

    #[test]
    fn test_info_nce_degenerate_batch() {
        let single = vec![vec![1.0, 0.0]];
        assert_eq!(info_nce(&single, &single), 0.0);
    }

    #[test]
    fn test_sgd_momentum_accumulates() {
        let mut opt = Sgd::new(0.1, 0.9, 1);
        let mut p = vec![0.0f32];
        let g = vec![1.0f32];
        opt.step(&mut p, &g);
        assert!((p[0] + 0.1).abs() < 1e-6);
        opt.step(&mut p, &g);
        // Second step includes momentum: -0.1 + (-0.09 - 0.1).
        assert!((p[0] + 0.29).abs() < 1e-5);
    }

    #[test]
    fn test_train_reduces_reconstruction_loss() {
        let mut model = tiny_model();
        let dataset = tiny_dataset();
        let cfg = TrainConfig {
            epochs: 4,
            batch_size: 8,
            learning_rate: 5e-3,
            contrastive_weight: 0.0,
            ..TrainConfig::default()
        };

        let before = reconstruction_errors(&model, dataset.sequences()).unwrap();
        let stats = train(&mut model, &dataset, &cfg).unwrap();
        let after = reconstruction_errors(&model, dataset.sequences()).unwrap();

        assert_eq!(stats.len(), 4);
        let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
        assert!(
            mean(&after) < mean(&before),
            "loss went {} -> {}",
            mean(&before),
            mean(&after)
        );
    }

    #[test]
    fn test_train_is_deterministic() {
        let dataset = tiny_dataset();
        let cfg = TrainConfig {
            epochs: 2,
            batch_size: 8,
            contrastive_weight: 0.0,
            ..TrainConfig::default()
        };

        let mut a = tiny_model();
        let mut b = tiny_model();
        train(&mut a, &dataset, &cfg).unwrap();
        train(&mut b, &dataset, &cfg).unwrap();
        assert_eq!(a.params(), b.params());
    }

    #[test]
    fn test_train_rejects_dim_mismatch() {
        let rows: Vec<Vec<f64>> = (0..8).map(|i| vec![i as f64; 3]).collect();
        let scaler = StandardScaler::fit(&rows).unwrap();
        let dataset = WindowSequenceDataset::from_rows(&rows, &scaler, 4).unwrap();
        let mut model = tiny_model();
        assert!(train(&mut model, &dataset, &TrainConfig::default()).is_err());
    }
}
