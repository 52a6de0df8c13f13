//! Causal dilated temporal convolution autoencoder
//!
//! Encoder and decoder are stacks of temporal blocks with exponentially
//! increasing (then decreasing) dilation. Each block: causal convolution →
//! per-channel normalization → ReLU → dropout → residual, with the sum
//! scaled by 0.5 and a 1x1 projection on the residual path when channel
//! counts differ. Causality is by left zero padding only: output step t
//! never sees inputs after t.
//!
//! The decoder reconstructs the full sequence (a symmetric conv stack).
//! Parameters flatten to a single `Vec<f32>` for the numerical-gradient
//! trainer and for checkpointing.

use crate::error::ScreenError;
use crate::model::{Sequence, SimpleRng};
use serde::{Deserialize, Serialize};

/// Residual sums are scaled to keep activations bounded in deep stacks.
const RESIDUAL_SCALE: f32 = 0.5;

/// Normalization epsilon.
const NORM_EPS: f32 = 1e-5;

/// Model hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Input feature dimensionality (F).
    pub feature_dim: usize,
    /// Hidden channel count inside the conv stacks.
    pub hidden_dim: usize,
    /// Convolution kernel size.
    pub kernel_size: usize,
    /// Embedding vector dimensionality.
    pub embed_dim: usize,
    /// The embedding pools only the last k time steps; recent behavior is
    /// the most diagnostic.
    pub pool_last_k: usize,
    /// Dropout probability inside each block (training forward only).
    pub dropout: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            feature_dim: 9,
            hidden_dim: 32,
            kernel_size: 3,
            embed_dim: 16,
            pool_last_k: 4,
            dropout: 0.1,
        }
    }
}

/// 1D convolution weights: `weight[out][in][k]` flattened row-major.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conv1d {
    weight: Vec<f32>,
    bias: Vec<f32>,
    in_ch: usize,
    out_ch: usize,
    kernel: usize,
    dilation: usize,
}

impl Conv1d {
    fn new(in_ch: usize, out_ch: usize, kernel: usize, dilation: usize, rng: &mut SimpleRng) -> Self {
        // Uniform Xavier-style init scaled by fan-in.
        let bound = (1.0 / (in_ch * kernel) as f32).sqrt();
        let weight = (0..out_ch * in_ch * kernel)
            .map(|_| rng.next_range(-bound, bound))
            .collect();
        Self {
            weight,
            bias: vec![0.0; out_ch],
            in_ch,
            out_ch,
            kernel,
            dilation,
        }
    }

    #[inline]
    fn w(&self, o: usize, i: usize, j: usize) -> f32 {
        self.weight[(o * self.in_ch + i) * self.kernel + j]
    }

    /// Causal convolution: left zero padding of `(k-1) * dilation`, so the
    /// output has the same number of steps and step t depends only on
    /// inputs at times <= t.
    fn forward(&self, x: &Sequence) -> Sequence {
        let steps = x.steps();
        let mut out = Sequence::zeros(steps, self.out_ch);

        for t in 0..steps {
            for o in 0..self.out_ch {
                let mut acc = self.bias[o];
                for j in 0..self.kernel {
                    let offset = (self.kernel - 1 - j) * self.dilation;
                    if offset > t {
                        continue; // zero padding
                    }
                    let src = t - offset;
                    for i in 0..self.in_ch {
                        acc += self.w(o, i, j) * x.get(src, i);
                    }
                }
                out.set(t, o, acc);
            }
        }

        out
    }

    fn param_count(&self) -> usize {
        self.weight.len() + self.bias.len()
    }

    fn write_params(&self, out: &mut Vec<f32>) {
        out.extend_from_slice(&self.weight);
        out.extend_from_slice(&self.bias);
    }

    fn read_params(&mut self, src: &[f32], cursor: &mut usize) {
        let w = self.weight.len();
        self.weight.copy_from_slice(&src[*cursor..*cursor + w]);
        *cursor += w;
        let b = self.bias.len();
        self.bias.copy_from_slice(&src[*cursor..*cursor + b]);
        *cursor += b;
    }
}

/// Fully connected layer for the embedding head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Linear {
    weight: Vec<f32>,
    bias: Vec<f32>,
    in_dim: usize,
    out_dim: usize,
}

impl Linear {
    fn new(in_dim: usize, out_dim: usize, rng: &mut SimpleRng) -> Self {
        let bound = (1.0 / in_dim as f32).sqrt();
        let weight = (0..out_dim * in_dim)
            .map(|_| rng.next_range(-bound, bound))
            .collect();
        Self {
            weight,
            bias: vec![0.0; out_dim],
            in_dim,
            out_dim,
        }
    }

    fn forward(&self, x: &[f32]) -> Vec<f32> {
        debug_assert_eq!(x.len(), self.in_dim);
        (0..self.out_dim)
            .map(|o| {
                let mut acc = self.bias[o];
                for i in 0..self.in_dim {
                    acc += self.weight[o * self.in_dim + i] * x[i];
                }
                acc
            })
            .collect()
    }

    fn param_count(&self) -> usize {
        self.weight.len() + self.bias.len()
    }

    fn write_params(&self, out: &mut Vec<f32>) {
        out.extend_from_slice(&self.weight);
        out.extend_from_slice(&self.bias);
    }

    fn read_params(&mut self, src: &[f32], cursor: &mut usize) {
        let w = self.weight.len();
        self.weight.copy_from_slice(&src[*cursor..*cursor + w]);
        *cursor += w;
        let b = self.bias.len();
        self.bias.copy_from_slice(&src[*cursor..*cursor + b]);
        *cursor += b;
    }
}

/// One causal temporal block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalBlock {
    conv: Conv1d,
    /// 1x1 projection on the residual path when channel counts differ.
    downsample: Option<Conv1d>,
    dropout: f32,
}

impl TemporalBlock {
    fn new(in_ch: usize, out_ch: usize, kernel: usize, dilation: usize, dropout: f32, rng: &mut SimpleRng) -> Self {
        let downsample = if in_ch != out_ch {
            Some(Conv1d::new(in_ch, out_ch, 1, 1, rng))
        } else {
            None
        };
        Self {
            conv: Conv1d::new(in_ch, out_ch, kernel, dilation, rng),
            downsample,
            dropout,
        }
    }

    /// Per-channel normalization over the time axis.
    fn normalize(x: &mut Sequence) {
        let steps = x.steps();
        if steps == 0 {
            return;
        }
        for c in 0..x.channels() {
            let mut mean = 0.0f32;
            for t in 0..steps {
                mean += x.get(t, c);
            }
            mean /= steps as f32;

            let mut var = 0.0f32;
            for t in 0..steps {
                let d = x.get(t, c) - mean;
                var += d * d;
            }
            var /= steps as f32;

            let inv = 1.0 / (var + NORM_EPS).sqrt();
            for t in 0..steps {
                x.set(t, c, (x.get(t, c) - mean) * inv);
            }
        }
    }

    fn forward(&self, x: &Sequence, rng: Option<&mut SimpleRng>) -> Sequence {
        let mut h = self.conv.forward(x);
        Self::normalize(&mut h);

        // ReLU
        for t in 0..h.steps() {
            for c in 0..h.channels() {
                if h.get(t, c) < 0.0 {
                    h.set(t, c, 0.0);
                }
            }
        }

        // Inverted dropout, training forward only.
        if let Some(rng) = rng {
            if self.dropout > 0.0 {
                let keep = 1.0 - self.dropout;
                for t in 0..h.steps() {
                    for c in 0..h.channels() {
                        if rng.next_unit() < self.dropout {
                            h.set(t, c, 0.0);
                        } else {
                            h.set(t, c, h.get(t, c) / keep);
                        }
                    }
                }
            }
        }

        let res = match &self.downsample {
            Some(proj) => proj.forward(x),
            None => x.clone(),
        };

        let mut out = Sequence::zeros(h.steps(), h.channels());
        for t in 0..h.steps() {
            for c in 0..h.channels() {
                out.set(t, c, RESIDUAL_SCALE * (h.get(t, c) + res.get(t, c)));
            }
        }
        out
    }

    fn param_count(&self) -> usize {
        self.conv.param_count() + self.downsample.as_ref().map_or(0, |d| d.param_count())
    }
}

/// The full autoencoder: encoder (dilations 1, 2, 4), embedding head over
/// the last-k pooled encoder output, and a symmetric decoder (dilations
/// 4, 2, 1) reconstructing the input sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcnAutoencoder {
    config: ModelConfig,
    encoder: Vec<TemporalBlock>,
    decoder: Vec<TemporalBlock>,
    embed_head: Linear,
}

impl TcnAutoencoder {
    pub fn new(config: ModelConfig, seed: u64) -> Self {
        let mut rng = SimpleRng::new(seed);
        let f = config.feature_dim;
        let h = config.hidden_dim;
        let k = config.kernel_size;
        let p = config.dropout;

        let encoder = vec![
            TemporalBlock::new(f, h, k, 1, p, &mut rng),
            TemporalBlock::new(h, h, k, 2, p, &mut rng),
            TemporalBlock::new(h, h, k, 4, p, &mut rng),
        ];
        let decoder = vec![
            TemporalBlock::new(h, h, k, 4, p, &mut rng),
            TemporalBlock::new(h, h, k, 2, p, &mut rng),
            TemporalBlock::new(h, f, k, 1, p, &mut rng),
        ];
        let embed_head = Linear::new(h, config.embed_dim, &mut rng);

        Self {
            config,
            encoder,
            decoder,
            embed_head,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn run_stack(blocks: &[TemporalBlock], x: &Sequence, mut rng: Option<&mut SimpleRng>) -> Sequence {
        let mut h = x.clone();
        for block in blocks {
            h = block.forward(&h, rng.as_deref_mut());
        }
        h
    }

    /// Encoder output `(T, hidden)` without pooling.
    fn encode_sequence(&self, x: &Sequence, rng: Option<&mut SimpleRng>) -> Sequence {
        Self::run_stack(&self.encoder, x, rng)
    }

    /// Inference forward pass (dropout off): full reconstruction.
    pub fn forward(&self, x: &Sequence) -> Result<Sequence, ScreenError> {
        self.check_input(x)?;
        let z = self.encode_sequence(x, None);
        Ok(Self::run_stack(&self.decoder, &z, None))
    }

    /// Training forward pass with dropout driven by `rng`.
    pub fn forward_train(&self, x: &Sequence, rng: &mut SimpleRng) -> Result<Sequence, ScreenError> {
        self.check_input(x)?;
        let z = self.encode_sequence(x, Some(&mut *rng));
        Ok(Self::run_stack(&self.decoder, &z, Some(rng)))
    }

    /// Embedding vector: mean over the last k encoder steps, projected.
    pub fn embed(&self, x: &Sequence) -> Result<Vec<f32>, ScreenError> {
        self.check_input(x)?;
        let z = self.encode_sequence(x, None);
        Ok(self.pool_and_project(&z))
    }

    /// Training-mode embedding (dropout active).
    pub fn embed_train(&self, x: &Sequence, rng: &mut SimpleRng) -> Result<Vec<f32>, ScreenError> {
        self.check_input(x)?;
        let z = self.encode_sequence(x, Some(rng));
        Ok(self.pool_and_project(&z))
    }

    fn pool_and_project(&self, z: &Sequence) -> Vec<f32> {
        let steps = z.steps();
        let k = self.config.pool_last_k.clamp(1, steps.max(1));
        let first = steps.saturating_sub(k);

        let mut pooled = vec![0.0f32; z.channels()];
        for t in first..steps {
            for (c, slot) in pooled.iter_mut().enumerate() {
                *slot += z.get(t, c);
            }
        }
        let denom = (steps - first).max(1) as f32;
        for slot in pooled.iter_mut() {
            *slot /= denom;
        }

        self.embed_head.forward(&pooled)
    }

    fn check_input(&self, x: &Sequence) -> Result<(), ScreenError> {
        if x.channels() != self.config.feature_dim {
            return Err(ScreenError::ShapeMismatch(format!(
                "expected {} feature channels, got {}",
                self.config.feature_dim,
                x.channels()
            )));
        }
        if x.steps() == 0 {
            return Err(ScreenError::ShapeMismatch("empty sequence".to_string()));
        }
        Ok(())
    }

    /// Total number of trainable parameters.
    pub fn param_count(&self) -> usize {
        self.encoder.iter().map(|b| b.param_count()).sum::<usize>()
            + self.decoder.iter().map(|b| b.param_count()).sum::<usize>()
            + self.embed_head.param_count()
    }

    /// Flatten all parameters into one vector, in a fixed order.
    pub fn params(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.param_count());
        for block in self.encoder.iter().chain(&self.decoder) {
            block.conv.write_params(&mut out);
            if let Some(d) = &block.downsample {
                d.write_params(&mut out);
            }
        }
        self.embed_head.write_params(&mut out);
        out
    }

    /// Load a flattened parameter vector (inverse of [`Self::params`]).
    pub fn set_params(&mut self, params: &[f32]) -> Result<(), ScreenError> {
        if params.len() != self.param_count() {
            return Err(ScreenError::ShapeMismatch(format!(
                "expected {} parameters, got {}",
                self.param_count(),
                params.len()
            )));
        }
        let mut cursor = 0;
        for block in self.encoder.iter_mut().chain(self.decoder.iter_mut()) {
            block.conv.read_params(params, &mut cursor);
            if let Some(d) = block.downsample.as_mut() {
                d.read_params(params, &mut cursor);
            }
        }
        self.embed_head.read_params(params, &mut cursor);
        Ok(())
    }
}
