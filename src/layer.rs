// layer.rs
// Description: Layer descriptors for the simulated encoder/decoder stack and the
//              pluggable weight samplers that stand in for trained parameters.
//              - build_layers emits the fixed ten layer stack for a given input length.
//              - Weight matrices are freshly sampled per build (random init), every
//                entry clamped to [-1, 1].
//              - CachedSampler may reuse a matrix per (input, output) shape for a TTL.
//                This is a speed optimization only, never a reproducibility guarantee.
// History:
// - 2026-10-12: Replace trainable layers with immutable descriptors.
// - 2026-10-13: Add sampler trait with Glorot, He, seeded and cached variants.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ndarray::Array2;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};

use crate::config::WeightInit;
use crate::error::{PlaygroundError, Result};
use crate::{DEFAULT_DROPOUT_RATE, EMBEDDING_DIM, HIDDEN_DIM, NUM_HEADS};

// ----------------------------------------
// LayerKind
// ----------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Embedding,
    PositionalEncoding,
    SelfAttention,
    AddNorm,
    FeedForward,
    MaskedSelfAttention,
    CrossAttention,
    OutputProjection,
}

impl LayerKind {
    pub fn is_attention(self) -> bool {
        matches!(
            self,
            Self::SelfAttention | Self::MaskedSelfAttention | Self::CrossAttention
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Embedding => "embedding",
            Self::PositionalEncoding => "positional_encoding",
            Self::SelfAttention => "self_attention",
            Self::AddNorm => "add_norm",
            Self::FeedForward => "feed_forward",
            Self::MaskedSelfAttention => "masked_self_attention",
            Self::CrossAttention => "cross_attention",
            Self::OutputProjection => "output_projection",
        }
    }
}

// ----------------------------------------
// LayerDescriptor
// ----------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct LayerDescriptor {
    pub s_name: String,
    pub kind: LayerKind,
    pub i_neuron_count: usize,
    // Shape [input_size, output_size], entries in [-1, 1].
    pub opt_weight_matrix: Option<Array2<f32>>,
    pub opt_i_attention_heads: Option<usize>,
    pub opt_d_dropout_rate: Option<f32>,
}

impl LayerDescriptor {
    fn plain(s_name: &str, kind: LayerKind, i_neuron_count: usize) -> Self {
        Self {
            s_name: s_name.to_string(),
            kind,
            i_neuron_count,
            opt_weight_matrix: None,
            opt_i_attention_heads: None,
            opt_d_dropout_rate: None,
        }
    }

    fn weighted(
        s_name: &str,
        kind: LayerKind,
        i_neuron_count: usize,
        a_weights: Array2<f32>,
    ) -> Self {
        let mut layer = Self::plain(s_name, kind, i_neuron_count);
        layer.opt_weight_matrix = Some(a_weights);
        layer
    }

    fn with_heads(mut self, i_heads: usize) -> Self {
        self.opt_i_attention_heads = Some(i_heads);
        self
    }

    fn with_dropout(mut self, d_rate: f32) -> Self {
        self.opt_d_dropout_rate = Some(d_rate.clamp(0.0, 1.0));
        self
    }

    pub fn is_attention(&self) -> bool {
        self.kind.is_attention()
    }

    pub fn weight_shape(&self) -> Option<(usize, usize)> {
        self.opt_weight_matrix.as_ref().map(|a| a.dim())
    }
}

// ----------------------------------------
// Weight samplers
// ----------------------------------------

pub trait WeightSampler: Send + Sync {
    // Matrix of shape [i_input_size, i_output_size] with entries in [-1, 1].
    fn sample(&self, i_input_size: usize, i_output_size: usize) -> Array2<f32>;
}

fn glorot_bound(i_input_size: usize, i_output_size: usize) -> f32 {
    let d_fan = (i_input_size + i_output_size).max(1) as f32;
    (6.0 / d_fan).sqrt().min(1.0)
}

fn sample_with<R: Rng + ?Sized>(
    init: WeightInit,
    i_input_size: usize,
    i_output_size: usize,
    rng: &mut R,
) -> Array2<f32> {
    let t_shape = (i_input_size, i_output_size);
    if i_input_size == 0 || i_output_size == 0 {
        return Array2::zeros(t_shape);
    }

    match init {
        WeightInit::GlorotUniform => {
            let d_bound = glorot_bound(i_input_size, i_output_size);
            match Uniform::new_inclusive(-d_bound, d_bound) {
                Ok(dist) => Array2::from_shape_fn(t_shape, |_| dist.sample(&mut *rng)),
                Err(_) => Array2::zeros(t_shape),
            }
        }
        WeightInit::HeNormal => {
            let d_std = (2.0 / i_input_size as f32).sqrt();
            match Normal::new(0.0, d_std) {
                Ok(dist) => {
                    Array2::from_shape_fn(t_shape, |_| dist.sample(&mut *rng).clamp(-1.0, 1.0))
                }
                Err(_) => Array2::zeros(t_shape),
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GlorotUniformSampler;

impl WeightSampler for GlorotUniformSampler {
    fn sample(&self, i_input_size: usize, i_output_size: usize) -> Array2<f32> {
        let mut rng = rand::rng();
        sample_with(WeightInit::GlorotUniform, i_input_size, i_output_size, &mut rng)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HeNormalSampler;

impl WeightSampler for HeNormalSampler {
    fn sample(&self, i_input_size: usize, i_output_size: usize) -> Array2<f32> {
        let mut rng = rand::rng();
        sample_with(WeightInit::HeNormal, i_input_size, i_output_size, &mut rng)
    }
}

// Deterministic per shape: the same (seed, shape) always yields the same matrix.
#[derive(Clone, Copy, Debug)]
pub struct SeededSampler {
    u64_seed: u64,
    init: WeightInit,
}

impl SeededSampler {
    pub fn new(u64_seed: u64, init: WeightInit) -> Self {
        Self { u64_seed, init }
    }
}

impl WeightSampler for SeededSampler {
    fn sample(&self, i_input_size: usize, i_output_size: usize) -> Array2<f32> {
        let u64_shape = ((i_input_size as u64) << 32) ^ (i_output_size as u64);
        let mut rng = StdRng::seed_from_u64(self.u64_seed ^ u64_shape.rotate_left(17));
        sample_with(self.init, i_input_size, i_output_size, &mut rng)
    }
}

pub struct CachedSampler<S: WeightSampler> {
    inner: S,
    ttl: Duration,
    m_entries: Mutex<HashMap<(usize, usize), (Instant, Array2<f32>)>>,
}

impl<S: WeightSampler> CachedSampler<S> {
    // A zero TTL disables caching.
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            m_entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached_shapes(&self) -> usize {
        self.m_entries.lock().len()
    }

    pub fn clear(&self) {
        self.m_entries.lock().clear();
    }
}

impl<S: WeightSampler> WeightSampler for CachedSampler<S> {
    fn sample(&self, i_input_size: usize, i_output_size: usize) -> Array2<f32> {
        if self.ttl.is_zero() {
            return self.inner.sample(i_input_size, i_output_size);
        }

        let t_key = (i_input_size, i_output_size);
        let now = Instant::now();
        let mut m_entries = self.m_entries.lock();

        // Drop everything past its window, not just this shape.
        m_entries.retain(|_, (t_created, _)| now.duration_since(*t_created) < self.ttl);

        if let Some((_, a_cached)) = m_entries.get(&t_key) {
            return a_cached.clone();
        }

        let a_fresh = self.inner.sample(i_input_size, i_output_size);
        m_entries.insert(t_key, (now, a_fresh.clone()));
        a_fresh
    }
}

// ----------------------------------------
// Stack builder
// ----------------------------------------

/// Builds the fixed ten layer encoder/decoder stack for `i_input_token_count` tokens.
pub fn build_layers(
    i_input_token_count: usize,
    sampler: &dyn WeightSampler,
) -> Result<Vec<LayerDescriptor>> {
    if i_input_token_count == 0 {
        return Err(PlaygroundError::invalid_input("layer_input_token_count_zero"));
    }

    let n = i_input_token_count;
    let d_dropout = DEFAULT_DROPOUT_RATE;

    let v_layers = vec![
        LayerDescriptor::weighted(
            "Input Embedding",
            LayerKind::Embedding,
            EMBEDDING_DIM,
            sampler.sample(n, EMBEDDING_DIM),
        ),
        LayerDescriptor::plain("Positional Encoding", LayerKind::PositionalEncoding, EMBEDDING_DIM),
        LayerDescriptor::weighted(
            "Multi-Head Self-Attention",
            LayerKind::SelfAttention,
            EMBEDDING_DIM,
            sampler.sample(EMBEDDING_DIM, EMBEDDING_DIM),
        )
        .with_heads(NUM_HEADS)
        .with_dropout(d_dropout),
        LayerDescriptor::plain("Add & Norm", LayerKind::AddNorm, EMBEDDING_DIM),
        LayerDescriptor::weighted(
            "Feed Forward",
            LayerKind::FeedForward,
            HIDDEN_DIM,
            sampler.sample(EMBEDDING_DIM, HIDDEN_DIM),
        )
        .with_dropout(d_dropout),
        LayerDescriptor::plain("Add & Norm", LayerKind::AddNorm, EMBEDDING_DIM),
        LayerDescriptor::weighted(
            "Masked Decoder Self-Attention",
            LayerKind::MaskedSelfAttention,
            EMBEDDING_DIM,
            sampler.sample(EMBEDDING_DIM, EMBEDDING_DIM),
        )
        .with_heads(NUM_HEADS)
        .with_dropout(d_dropout),
        LayerDescriptor::weighted(
            "Encoder-Decoder Cross-Attention",
            LayerKind::CrossAttention,
            EMBEDDING_DIM,
            sampler.sample(EMBEDDING_DIM, EMBEDDING_DIM),
        )
        .with_heads(NUM_HEADS)
        .with_dropout(d_dropout),
        LayerDescriptor::weighted(
            "Decoder Feed Forward",
            LayerKind::FeedForward,
            HIDDEN_DIM,
            sampler.sample(EMBEDDING_DIM, HIDDEN_DIM),
        )
        .with_dropout(d_dropout),
        LayerDescriptor::weighted(
            "Output Projection",
            LayerKind::OutputProjection,
            n,
            sampler.sample(EMBEDDING_DIM, n),
        ),
    ];

    Ok(v_layers)
}
