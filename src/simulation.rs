// simulation.rs
// Description: Illustrative numeric artifacts for the playground: hash based
//              pseudo embeddings, sinusoidal positional encoding, scaled dot product
//              attention probabilities and a toy two stage feed forward. None of these
//              claim to be real model internals.
// History:
// - 2026-10-12: Extract simulation helpers from the layer forward passes.
// - 2026-10-13: Compute attention probabilities in f64 to keep sums within 1e-6.

use crate::error::{PlaygroundError, Result};
use crate::math;
use crate::EMBEDDING_DIM;

const POSITIONAL_BASE: f64 = 10000.0;
const EMBED_FREQUENCY_SCALE: f64 = 1000.0;

// Feed forward stage constants.
const FF_STAGE1_SCALE: f32 = 1.5;
const FF_STAGE1_BIAS: f32 = 0.1;
const FF_STAGE2_SCALE: f32 = 0.8;
const FF_STAGE2_BIAS: f32 = -0.2;

// 32 bit string hash over UTF-16 code units: h = h * 31 + c (wrapping).
fn word_hash(s_word: &str) -> i32 {
    let mut i_hash: i32 = 0;
    for u_unit in s_word.encode_utf16() {
        i_hash = i_hash.wrapping_mul(31).wrapping_add(u_unit as i32);
    }
    i_hash
}

/// Deterministic pseudo embedding for one word.
///
/// Depends only on the word itself, never on neighbors. Every component lies in
/// [-1, 1].
pub fn embed(s_word: &str) -> Result<[f32; EMBEDDING_DIM]> {
    if s_word.is_empty() {
        return Err(PlaygroundError::invalid_input("embed_word_empty"));
    }

    let d_hash = word_hash(s_word) as f64;
    let mut v_out = [0.0f32; EMBEDDING_DIM];
    for (i, d_slot) in v_out.iter_mut().enumerate() {
        *d_slot = (d_hash * (i as f64 + 1.0) / EMBED_FREQUENCY_SCALE).sin() as f32;
    }
    Ok(v_out)
}

/// Canonical sinusoidal positional encoding.
///
/// Index j uses angle = position / 10000^(2 * floor(j / 2) / dim); even indices take
/// the sine, odd indices the cosine.
pub fn positional_encode(i_position: usize, i_dim: usize) -> Result<Vec<f32>> {
    if i_dim == 0 {
        return Err(PlaygroundError::invalid_input("positional_dim_zero"));
    }

    let d_pos = i_position as f64;
    let v_out = (0..i_dim)
        .map(|j| {
            let d_exponent = (2 * (j / 2)) as f64 / i_dim as f64;
            let d_angle = d_pos / POSITIONAL_BASE.powf(d_exponent);
            if j % 2 == 0 {
                d_angle.sin() as f32
            } else {
                d_angle.cos() as f32
            }
        })
        .collect();
    Ok(v_out)
}

/// Scaled dot product attention probabilities of `v_query` over `v_keys`.
pub fn attention_scores(v_query: &[f32], v_keys: &[Vec<f32>]) -> Result<Vec<f32>> {
    if v_query.is_empty() {
        return Err(PlaygroundError::invalid_input("attention_query_empty"));
    }
    if v_keys.is_empty() {
        return Err(PlaygroundError::invalid_input("attention_keys_empty"));
    }
    if v_keys.iter().any(|k| k.len() != v_query.len()) {
        return Err(PlaygroundError::invalid_input("attention_key_dim_mismatch"));
    }

    let d_scale = (v_query.len() as f64).sqrt();
    let v_logits: Vec<f64> = v_keys
        .iter()
        .map(|v_key| math::dot(v_query, v_key) / d_scale)
        .collect();

    Ok(math::softmax_f64(&v_logits)
        .into_iter()
        .map(|d_p| d_p as f32)
        .collect())
}

// Two stage affine + clamp block standing in for Linear -> ReLU -> Linear.
pub fn feed_forward(v_input: &[f32]) -> Result<Vec<f32>> {
    if v_input.is_empty() {
        return Err(PlaygroundError::invalid_input("feed_forward_input_empty"));
    }

    Ok(v_input
        .iter()
        .map(|&x| {
            let d_hidden = (FF_STAGE1_SCALE * x + FF_STAGE1_BIAS).max(0.0);
            let d_out = FF_STAGE2_SCALE * d_hidden + FF_STAGE2_BIAS;
            if d_out.is_finite() { d_out.clamp(-1.0, 1.0) } else { 0.0 }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_is_reproducible_and_bounded() {
        let v_a = embed("Hello").unwrap();
        let v_b = embed("Hello").unwrap();
        assert_eq!(v_a, v_b);
        assert!(v_a.iter().all(|d| (-1.0..=1.0).contains(d)));
        assert_ne!(v_a, embed("world").unwrap());
    }

    #[test]
    fn test_embed_empty_word_fails() {
        assert!(matches!(embed(""), Err(PlaygroundError::InvalidInput(_))));
    }

    #[test]
    fn test_positional_encode_known_values() {
        let v_p0 = positional_encode(0, 4).unwrap();
        assert_eq!(v_p0, vec![0.0, 1.0, 0.0, 1.0]);

        let v_p1 = positional_encode(1, 4).unwrap();
        assert!((v_p1[0] - 1.0f64.sin() as f32).abs() < 1e-7);
        assert!((v_p1[1] - 1.0f64.cos() as f32).abs() < 1e-7);
        assert!((v_p1[2] - 0.01f64.sin() as f32).abs() < 1e-7);
        assert!((v_p1[3] - 0.01f64.cos() as f32).abs() < 1e-7);
    }

    #[test]
    fn test_positional_encode_is_pure() {
        for i_pos in [0usize, 1, 7, 42, 999] {
            assert_eq!(
                positional_encode(i_pos, EMBEDDING_DIM).unwrap(),
                positional_encode(i_pos, EMBEDDING_DIM).unwrap()
            );
        }
        assert!(positional_encode(3, 0).is_err());
    }

    #[test]
    fn test_attention_scores_aligned_query_prefers_first_key() {
        let v_p = attention_scores(&[1.0, 0.0], &[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        assert_eq!(v_p.len(), 2);
        assert!(v_p[0] > 0.5);
        assert!((v_p[0] + v_p[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_attention_scores_sum_and_non_negative() {
        let v_query: Vec<f32> = (0..EMBEDDING_DIM).map(|i| (i as f32 * 0.37).sin() * 3.0).collect();
        for i_keys in 1..40 {
            let v_keys: Vec<Vec<f32>> = (0..i_keys)
                .map(|k| (0..EMBEDDING_DIM).map(|i| ((k * 13 + i) as f32 * 0.71).cos() * 5.0).collect())
                .collect();
            let v_p = attention_scores(&v_query, &v_keys).unwrap();
            let d_sum: f64 = v_p.iter().map(|&p| p as f64).sum();
            assert!((d_sum - 1.0).abs() < 1e-6, "sum {} for {} keys", d_sum, i_keys);
            assert!(v_p.iter().all(|&p| p >= 0.0));
        }
    }

    #[test]
    fn test_attention_scores_rejects_empty_and_mismatch() {
        assert!(matches!(
            attention_scores(&[1.0, 0.0], &[]),
            Err(PlaygroundError::InvalidInput(_))
        ));
        assert!(attention_scores(&[], &[vec![1.0]]).is_err());
        assert!(attention_scores(&[1.0, 0.0], &[vec![1.0]]).is_err());
    }

    #[test]
    fn test_feed_forward_is_deterministic_and_clamped() {
        let v_in = vec![-2.0, -0.1, 0.0, 0.5, 3.0];
        let v_a = feed_forward(&v_in).unwrap();
        assert_eq!(v_a, feed_forward(&v_in).unwrap());
        assert!(v_a.iter().all(|d| (-1.0..=1.0).contains(d)));
        // Negative inputs are cut by the first stage.
        assert!((v_a[0] - FF_STAGE2_BIAS).abs() < 1e-6);
        assert_eq!(v_a[4], 1.0);
        assert!(feed_forward(&[]).is_err());
    }
}
