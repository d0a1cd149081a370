// network.rs
// Description: Simulated forward pass over the layer stack for one input text.
//              Produces the per layer outputs shown by the views and recomputes the
//              head averaged attention matrix of any attention layer on demand.
//              - Self attention: queries and keys are the W projected inputs split into
//                heads, values are the raw inputs, output is x + P x.
//              - Masked self attention: row i only attends keys 0..=i.
//              - Cross attention: keys and values come from the encoder memory, the
//                output of the last layer before the first decoder layer.
//              - Output projection: softmax over x W, one distribution per token.
// History:
// - 2026-10-13: Build network forward simulation from descriptors.
// - 2026-10-14: Add causal mask and cross attention over encoder memory.

use ndarray::{s, Array2};

use crate::error::{PlaygroundError, Result};
use crate::layer::{build_layers, LayerDescriptor, LayerKind, WeightSampler};
use crate::math;
use crate::simulation::{attention_scores, embed, feed_forward, positional_encode};
use crate::tokenizer::TokenSet;
use crate::EMBEDDING_DIM;

#[derive(Clone, Debug)]
pub struct Network {
    s_input_text: String,
    tokens: TokenSet,
    v_layers: Vec<LayerDescriptor>,
    v_layer_inputs: Vec<Array2<f32>>,
    v_layer_outputs: Vec<Array2<f32>>,
    opt_i_memory_index: Option<usize>,
}

impl Network {
    pub fn build(s_input_text: &str, sampler: &dyn WeightSampler) -> Result<Self> {
        let tokens = TokenSet::from_text(s_input_text);
        if tokens.is_empty() {
            return Err(PlaygroundError::invalid_input("input_text_empty"));
        }
        let v_layers = build_layers(tokens.len(), sampler)?;
        Self::from_layers(s_input_text, tokens, v_layers)
    }

    // Runs the forward simulation over an already built stack.
    pub fn from_layers(
        s_input_text: &str,
        tokens: TokenSet,
        v_layers: Vec<LayerDescriptor>,
    ) -> Result<Self> {
        if tokens.is_empty() {
            return Err(PlaygroundError::invalid_input("input_text_empty"));
        }
        if v_layers.is_empty() {
            return Err(PlaygroundError::invalid_input("layer_stack_empty"));
        }

        let opt_i_memory_index = v_layers
            .iter()
            .position(|l| matches!(l.kind, LayerKind::MaskedSelfAttention | LayerKind::CrossAttention))
            .and_then(|i_first_decoder| i_first_decoder.checked_sub(1));

        let mut network = Self {
            s_input_text: s_input_text.to_string(),
            tokens,
            v_layers,
            v_layer_inputs: Vec::new(),
            v_layer_outputs: Vec::new(),
            opt_i_memory_index,
        };
        network.run_forward()?;
        Ok(network)
    }

    fn run_forward(&mut self) -> Result<()> {
        let n = self.tokens.len();
        let mut a_x: Array2<f32> = Array2::zeros((n, EMBEDDING_DIM));

        let mut v_inputs = Vec::with_capacity(self.v_layers.len());
        let mut v_outputs: Vec<Array2<f32>> = Vec::with_capacity(self.v_layers.len());

        for (i_idx, layer) in self.v_layers.iter().enumerate() {
            let opt_memory = self
                .opt_i_memory_index
                .filter(|&i_mem| i_mem < i_idx)
                .and_then(|i_mem| v_outputs.get(i_mem));

            let a_out = self.layer_forward(layer, &a_x, opt_memory)?;
            v_inputs.push(std::mem::replace(&mut a_x, a_out.clone()));
            v_outputs.push(a_out);
        }

        self.v_layer_inputs = v_inputs;
        self.v_layer_outputs = v_outputs;
        Ok(())
    }

    fn layer_forward(
        &self,
        layer: &LayerDescriptor,
        a_x: &Array2<f32>,
        opt_memory: Option<&Array2<f32>>,
    ) -> Result<Array2<f32>> {
        let mut a_out = match layer.kind {
            LayerKind::Embedding => {
                let mut a_emb = Array2::zeros((self.tokens.len(), EMBEDDING_DIM));
                for (i_pos, s_tok) in self.tokens.iter().enumerate() {
                    let v_e = embed(s_tok)?;
                    for (j, &d) in v_e.iter().enumerate() {
                        a_emb[[i_pos, j]] = d;
                    }
                }
                a_emb
            }
            LayerKind::PositionalEncoding => {
                let mut a_pe = a_x.clone();
                for i_pos in 0..a_x.nrows() {
                    let v_pe = positional_encode(i_pos, a_x.ncols())?;
                    for (j, &d) in v_pe.iter().enumerate() {
                        a_pe[[i_pos, j]] += d;
                    }
                }
                a_pe
            }
            LayerKind::SelfAttention | LayerKind::MaskedSelfAttention => {
                let a_p = attention_matrix(layer, a_x, a_x)?;
                a_x + &a_p.dot(a_x)
            }
            LayerKind::CrossAttention => {
                let a_memory = opt_memory.unwrap_or(a_x);
                let a_p = attention_matrix(layer, a_x, a_memory)?;
                a_x + &a_p.dot(a_memory)
            }
            LayerKind::AddNorm => math::rms_normalize_rows(a_x),
            LayerKind::FeedForward => {
                let mut a_ff = a_x.clone();
                for (i_row, a_row) in a_x.rows().into_iter().enumerate() {
                    let v_y = feed_forward(&a_row.to_vec())?;
                    for (j, &d) in v_y.iter().enumerate() {
                        a_ff[[i_row, j]] += d;
                    }
                }
                a_ff
            }
            LayerKind::OutputProjection => {
                let a_w = layer
                    .opt_weight_matrix
                    .as_ref()
                    .ok_or_else(|| PlaygroundError::invalid_input("output_projection_weights_missing"))?;
                if a_w.nrows() != a_x.ncols() {
                    return Err(PlaygroundError::invalid_input("layer_weight_shape_mismatch"));
                }
                math::softmax_rows(&a_x.dot(a_w))
            }
        };

        math::sanitize_inplace(&mut a_out);
        Ok(a_out)
    }

    /// Head averaged attention matrix `[tokens][keys]` of layer `i_index`.
    ///
    /// Returns `Ok(None)` for layers that are not attention layers.
    pub fn attention_for_layer(&self, i_index: usize) -> Result<Option<Array2<f32>>> {
        let layer = self.layer(i_index)?;
        if !layer.is_attention() {
            return Ok(None);
        }

        let a_x = &self.v_layer_inputs[i_index];
        let a_keys = match layer.kind {
            LayerKind::CrossAttention => self
                .opt_i_memory_index
                .filter(|&i_mem| i_mem < i_index)
                .map(|i_mem| &self.v_layer_outputs[i_mem])
                .unwrap_or(a_x),
            _ => a_x,
        };

        attention_matrix(layer, a_x, a_keys).map(Some)
    }

    pub fn layer(&self, i_index: usize) -> Result<&LayerDescriptor> {
        self.v_layers.get(i_index).ok_or(PlaygroundError::OutOfRange {
            index: i_index,
            len: self.v_layers.len(),
        })
    }

    pub fn layer_output(&self, i_index: usize) -> Result<&Array2<f32>> {
        self.v_layer_outputs.get(i_index).ok_or(PlaygroundError::OutOfRange {
            index: i_index,
            len: self.v_layer_outputs.len(),
        })
    }

    pub fn layers(&self) -> &[LayerDescriptor] {
        &self.v_layers
    }

    pub fn tokens(&self) -> &TokenSet {
        &self.tokens
    }

    pub fn input_text(&self) -> &str {
        &self.s_input_text
    }

    pub fn layer_count(&self) -> usize {
        self.v_layers.len()
    }

    pub fn midpoint(&self) -> usize {
        self.v_layers.len() / 2
    }

    pub fn last_index(&self) -> usize {
        self.v_layers.len().saturating_sub(1)
    }

    pub fn uniform_attention(&self) -> Vec<Vec<f32>> {
        uniform_attention(self.tokens.len())
    }
}

pub fn uniform_attention(i_tokens: usize) -> Vec<Vec<f32>> {
    if i_tokens == 0 {
        return Vec::new();
    }
    let d_uniform = 1.0 / i_tokens as f32;
    vec![vec![d_uniform; i_tokens]; i_tokens]
}

// Queries and keys are projected by the layer weights when the shape allows it.
fn project(a_x: &Array2<f32>, opt_w: Option<&Array2<f32>>) -> Array2<f32> {
    match opt_w {
        Some(a_w) if a_w.nrows() == a_x.ncols() && a_w.ncols() == a_x.ncols() => a_x.dot(a_w),
        _ => a_x.clone(),
    }
}

fn attention_matrix(
    layer: &LayerDescriptor,
    a_query_src: &Array2<f32>,
    a_key_src: &Array2<f32>,
) -> Result<Array2<f32>> {
    let i_rows = a_query_src.nrows();
    let i_keys = a_key_src.nrows();
    let i_dim = a_query_src.ncols();
    if i_rows == 0 || i_keys == 0 || i_dim == 0 {
        return Err(PlaygroundError::invalid_input("attention_input_empty"));
    }
    if a_key_src.ncols() != i_dim {
        return Err(PlaygroundError::invalid_input("attention_key_dim_mismatch"));
    }

    let opt_w = layer.opt_weight_matrix.as_ref();
    let a_q = project(a_query_src, opt_w);
    let a_k = project(a_key_src, opt_w);

    let mut i_heads = layer.opt_i_attention_heads.unwrap_or(1).max(1);
    if i_dim % i_heads != 0 {
        i_heads = 1;
    }
    let i_head_dim = i_dim / i_heads;
    let b_causal = layer.kind == LayerKind::MaskedSelfAttention;
    let d_head_weight = 1.0 / i_heads as f32;

    let mut a_weights = Array2::zeros((i_rows, i_keys));
    for i_h in 0..i_heads {
        let i_start = i_h * i_head_dim;
        let i_end = i_start + i_head_dim;
        let a_q_h = a_q.slice(s![.., i_start..i_end]);
        let a_k_h = a_k.slice(s![.., i_start..i_end]);

        for i in 0..i_rows {
            let i_visible = if b_causal { (i + 1).min(i_keys) } else { i_keys };
            let v_keys: Vec<Vec<f32>> = (0..i_visible).map(|j| a_k_h.row(j).to_vec()).collect();
            let v_p = attention_scores(&a_q_h.row(i).to_vec(), &v_keys)?;
            for (j, &d_p) in v_p.iter().enumerate() {
                a_weights[[i, j]] += d_p * d_head_weight;
            }
        }
    }

    Ok(a_weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WeightInit;
    use crate::layer::SeededSampler;
    use crate::LAYER_COUNT;

    fn seeded() -> SeededSampler {
        SeededSampler::new(42, WeightInit::GlorotUniform)
    }

    #[test]
    fn test_build_runs_all_layers() {
        let net = Network::build("Hello world", &seeded()).unwrap();
        assert_eq!(net.layer_count(), LAYER_COUNT);
        assert_eq!(net.midpoint(), 5);
        assert_eq!(net.last_index(), 9);
        assert_eq!(net.tokens().len(), 2);
        for i in 0..LAYER_COUNT - 1 {
            assert_eq!(net.layer_output(i).unwrap().dim(), (2, EMBEDDING_DIM));
        }
        let a_probs = net.layer_output(9).unwrap();
        assert_eq!(a_probs.dim(), (2, 2));
        for a_row in a_probs.rows() {
            assert!((a_row.sum() - 1.0).abs() < 1e-5);
        }
        assert!(net.layer_output(LAYER_COUNT).is_err());
    }

    #[test]
    fn test_build_empty_text_fails() {
        assert!(matches!(
            Network::build("  \n ", &seeded()),
            Err(PlaygroundError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_seeded_build_is_reproducible() {
        let a = Network::build("the cat sat", &seeded()).unwrap();
        let b = Network::build("the cat sat", &seeded()).unwrap();
        assert_eq!(a.layer_output(7).unwrap(), b.layer_output(7).unwrap());
    }

    #[test]
    fn test_attention_rows_are_distributions() {
        let net = Network::build("the quick brown fox", &seeded()).unwrap();
        for i in [2usize, 6, 7] {
            let a_w = net.attention_for_layer(i).unwrap().unwrap();
            assert_eq!(a_w.dim(), (4, 4));
            for a_row in a_w.rows() {
                assert!((a_row.sum() - 1.0).abs() < 1e-5);
                assert!(a_row.iter().all(|&p| (0.0..=1.0 + 1e-6).contains(&p)));
            }
        }
        assert!(net.attention_for_layer(3).unwrap().is_none());
        assert!(matches!(
            net.attention_for_layer(10),
            Err(PlaygroundError::OutOfRange { index: 10, len: 10 })
        ));
    }

    #[test]
    fn test_masked_attention_is_causal() {
        let net = Network::build("one two three", &seeded()).unwrap();
        let a_w = net.attention_for_layer(6).unwrap().unwrap();
        assert!((a_w[[0, 0]] - 1.0).abs() < 1e-6);
        assert_eq!(a_w[[0, 1]], 0.0);
        assert_eq!(a_w[[0, 2]], 0.0);
        assert_eq!(a_w[[1, 2]], 0.0);
    }

    #[test]
    fn test_uniform_attention() {
        assert!(uniform_attention(0).is_empty());
        let v = uniform_attention(4);
        assert_eq!(v.len(), 4);
        assert!(v.iter().all(|r| r.len() == 4 && r.iter().all(|&p| p == 0.25)));
    }
}
