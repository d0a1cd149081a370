// math.rs
// Description: Numerical helpers shared by the simulation and the layer stack:
//              stable softmax (vector and row-wise), RMS row normalization, dot
//              products and non-finite sanitization.
// History:
// - 2026-10-12: Keep stable softmax, drop loss and gradient helpers.
// - 2026-10-13: Add f64 softmax for attention probabilities and RMS row norm.

use ndarray::{Array2, Axis};

// Softmax over a single vector, computed in f64.
// - Max shift keeps exp finite.
// - Degenerate input (all -inf, NaN sum) falls back to uniform.
pub fn softmax_f64(v_logits: &[f64]) -> Vec<f64> {
    if v_logits.is_empty() {
        return Vec::new();
    }

    let d_max = v_logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let v_exp: Vec<f64> = v_logits
        .iter()
        .map(|&x| {
            let d_e = (x - d_max).exp();
            if d_e.is_finite() { d_e } else { 0.0 }
        })
        .collect();
    let d_sum: f64 = v_exp.iter().sum();

    if !d_sum.is_finite() || d_sum <= 0.0 {
        let d_uniform = 1.0 / v_logits.len() as f64;
        return vec![d_uniform; v_logits.len()];
    }

    v_exp.into_iter().map(|d_e| d_e / d_sum).collect()
}

pub fn softmax_rows(a_logits: &Array2<f32>) -> Array2<f32> {
    let mut a_result = a_logits.clone();

    for mut a_row in a_result.rows_mut() {
        let v_row: Vec<f64> = a_row.iter().map(|&x| x as f64).collect();
        let v_probs = softmax_f64(&v_row);
        for (j, &d_p) in v_probs.iter().enumerate() {
            a_row[j] = d_p as f32;
        }
    }

    a_result
}

// Row-wise RMS normalization without learned gain.
// x_hat = x / sqrt(mean(x^2) + eps)
pub fn rms_normalize_rows(a_input: &Array2<f32>) -> Array2<f32> {
    if a_input.nrows() == 0 || a_input.ncols() == 0 {
        return a_input.clone();
    }

    let d_eps: f32 = 1e-5;
    let d_inv = 1.0 / (a_input.ncols() as f32).max(1.0);

    let a_mean_sq = a_input
        .mapv(|x| x * x)
        .sum_axis(Axis(1))
        .insert_axis(Axis(1))
        .mapv(|s| s * d_inv);

    let a_rms = a_mean_sq.mapv(|m| (m + d_eps).sqrt().max(1e-12));
    let mut a_out = a_input / &a_rms;
    sanitize_inplace(&mut a_out);
    a_out
}

pub fn dot(v_a: &[f32], v_b: &[f32]) -> f64 {
    v_a.iter()
        .zip(v_b.iter())
        .map(|(&a, &b)| a as f64 * b as f64)
        .sum()
}

// Replace non-finite values with 0.0 so they never reach the views.
pub fn sanitize_inplace(a_x: &mut Array2<f32>) {
    for d in a_x.iter_mut() {
        if !d.is_finite() {
            *d = 0.0;
        }
    }
}

pub fn to_nested_vec(a_x: &Array2<f32>) -> Vec<Vec<f32>> {
    a_x.rows().into_iter().map(|r| r.to_vec()).collect()
}

// (min, max, mean) over all entries; None for an empty matrix.
pub fn matrix_stats(a_x: &Array2<f32>) -> Option<(f32, f32, f32)> {
    if a_x.is_empty() {
        return None;
    }
    let d_min = a_x.iter().copied().fold(f32::INFINITY, f32::min);
    let d_max = a_x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let d_mean = a_x.iter().map(|&x| x as f64).sum::<f64>() / a_x.len() as f64;
    Some((d_min, d_max, d_mean as f32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_softmax_f64_sums_to_one() {
        let v_p = softmax_f64(&[1.0, 2.0, 3.0, -4.0]);
        let d_sum: f64 = v_p.iter().sum();
        assert!((d_sum - 1.0).abs() < 1e-12);
        assert!(v_p[2] > v_p[1] && v_p[1] > v_p[0]);
    }

    #[test]
    fn test_softmax_f64_degenerate_is_uniform() {
        let v_p = softmax_f64(&[f64::NEG_INFINITY, f64::NEG_INFINITY]);
        assert_eq!(v_p, vec![0.5, 0.5]);
        assert!(softmax_f64(&[]).is_empty());
    }

    #[test]
    fn test_softmax_rows_each_row_normalized() {
        let a = array![[0.0f32, 0.0], [10.0, -10.0]];
        let a_p = softmax_rows(&a);
        assert!((a_p[[0, 0]] - 0.5).abs() < 1e-6);
        assert!(a_p[[1, 0]] > 0.99);
        for a_row in a_p.rows() {
            assert!((a_row.sum() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_rms_normalize_rows_unit_rms() {
        let a = array![[3.0f32, 4.0], [0.0, 0.0]];
        let a_n = rms_normalize_rows(&a);
        let d_ms = (a_n[[0, 0]].powi(2) + a_n[[0, 1]].powi(2)) / 2.0;
        assert!((d_ms - 1.0).abs() < 1e-3);
        assert_eq!(a_n[[1, 0]], 0.0);
    }

    #[test]
    fn test_matrix_stats() {
        let a = array![[-1.0f32, 1.0], [0.5, 0.5]];
        let (d_min, d_max, d_mean) = matrix_stats(&a).unwrap();
        assert_eq!(d_min, -1.0);
        assert_eq!(d_max, 1.0);
        assert!((d_mean - 0.25).abs() < 1e-6);
        assert!(matrix_stats(&Array2::<f32>::zeros((0, 3))).is_none());
    }
}
