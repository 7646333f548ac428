//! Weighted moving-average filter with shrinking kernels at the signal edges.

use ndarray::{s, Array1, ArrayView1};
use serde::{Deserialize, Serialize};

/// Uniform weights, `1/window` repeated.
pub fn moving(window: usize) -> Vec<f64> {
    vec![1.0 / window as f64; window]
}

/// Binomial weights `C(window-1, idx) / 2^(window-1)`, a discrete Gaussian.
pub fn binomial(window: usize) -> Vec<f64> {
    if window == 0 {
        return Vec::new();
    }
    let n = window - 1;
    let scale = 2.0_f64.powi(n as i32);
    let mut coeff = 1.0_f64;
    let mut out = Vec::with_capacity(window);
    for idx in 0..window {
        out.push(coeff / scale);
        coeff = coeff * (n - idx) as f64 / (idx + 1) as f64;
    }
    out
}

/// Named weight functions, selectable from configuration.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Kernel {
    Moving,
    Binomial,
}

impl Kernel {
    pub fn weights(self, window: usize) -> Vec<f64> {
        match self {
            Kernel::Moving => moving(window),
            Kernel::Binomial => binomial(window),
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::Binomial
    }
}

/// Smooth `series` with the weights produced by `kernel`.
///
/// Interior samples are a centred "same"-length convolution with `kernel(window)`. The first
/// and last `window / 2` samples are recomputed with `kernel(2i + 1)` over the first (last)
/// `2i + 1` samples so the edges never average against padding. A `window` below 2 returns the
/// input unchanged; a window longer than the series is clamped to its length.
///
/// Panics if `kernel` returns a different number of weights than requested.
pub fn smooth<K>(series: &[f64], window: usize, kernel: K) -> Array1<f64>
where
    K: Fn(usize) -> Vec<f64>,
{
    let data = ArrayView1::from(series);
    if window < 2 {
        return data.to_owned();
    }
    let window = window.min(series.len());
    let weights = checked_weights(&kernel, window);

    let mut out = convolve_same(series, &weights);
    let len = series.len();
    for i in 0..window / 2 {
        let span = 2 * i + 1;
        let edge = checked_weights(&kernel, span);
        out[i] = edge.dot(&data.slice(s![..span]));
        out[len - 1 - i] = edge.dot(&data.slice(s![len - span..]));
    }
    out
}

fn checked_weights<K>(kernel: &K, window: usize) -> Array1<f64>
where
    K: Fn(usize) -> Vec<f64>,
{
    let weights = kernel(window);
    assert_eq!(
        weights.len(),
        window,
        "smoothing kernel returned {} weights for a window of {}",
        weights.len(),
        window
    );
    Array1::from_vec(weights)
}

/// Convolution truncated to the input length, centred like numpy's `mode="same"`.
fn convolve_same(data: &[f64], weights: &Array1<f64>) -> Array1<f64> {
    let len = data.len();
    let width = weights.len();
    if width == 0 {
        return Array1::zeros(len);
    }
    let offset = (width - 1) - width / 2;
    let mut out = Array1::zeros(len);
    for (i, slot) in out.iter_mut().enumerate() {
        let center = i + offset;
        let mut acc = 0.0;
        for (k, w) in weights.iter().enumerate() {
            if let Some(idx) = center.checked_sub(k) {
                if idx < len {
                    acc += data[idx] * w;
                }
            }
        }
        *slot = acc;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-12)
    }

    #[test]
    fn window_below_two_is_identity() {
        let series = [3.0, -1.0, 4.0, 1.5];
        assert_eq!(smooth(&series, 1, moving).to_vec(), series.to_vec());
        assert_eq!(smooth(&series, 0, binomial).to_vec(), series.to_vec());
    }

    #[test]
    fn output_length_matches_input() {
        let series: Vec<f64> = (0..37).map(|i| (i as f64 * 0.3).sin()).collect();
        for window in 0..50 {
            assert_eq!(smooth(&series, window, binomial).len(), series.len());
            assert_eq!(smooth(&series, window, moving).len(), series.len());
        }
        assert!(smooth(&[], 5, moving).is_empty());
    }

    #[test]
    fn constant_series_survives_normalised_kernels() {
        let series = vec![7.5; 25];
        let out = smooth(&series, 20, binomial);
        assert!(out.iter().all(|v| (v - 7.5).abs() < 1e-9));
        let out = smooth(&series, 6, moving);
        assert!(out.iter().all(|v| (v - 7.5).abs() < 1e-9));
    }

    #[test]
    fn odd_window_matches_hand_computed_values() {
        let series = [1.0, 2.0, 3.0, 4.0, 5.0];
        let out = smooth(&series, 3, |n| match n {
            3 => vec![0.0, 1.0, 0.5],
            _ => moving(n),
        });
        // numpy: convolve([1,2,3,4,5], [0,1,0.5], "same") = [1, 2.5, 4, 5.5, 7]
        // edges are then replaced by kernel(1) over one sample.
        assert!(close(&out.to_vec(), &[1.0, 2.5, 4.0, 5.5, 5.0]));
    }

    #[test]
    fn even_window_alignment_and_edges() {
        let series = [2.0, 4.0, 6.0, 8.0];
        let out = smooth(&series, 2, moving);
        // convolve(series, [.5, .5], "same") = [1, 3, 5, 7]; only element 0/3 are edges.
        assert!(close(&out.to_vec(), &[2.0, 3.0, 5.0, 8.0]));
    }

    #[test]
    fn edges_use_shrinking_kernels() {
        let series = [0.0, 3.0, 6.0, 9.0, 12.0, 15.0, 18.0];
        let out = smooth(&series, 5, moving);
        assert!((out[0] - 0.0).abs() < 1e-12);
        assert!((out[1] - 3.0).abs() < 1e-12);
        assert!((out[3] - 9.0).abs() < 1e-12);
        assert!((out[5] - 15.0).abs() < 1e-12);
        assert!((out[6] - 18.0).abs() < 1e-12);
    }

    #[test]
    fn window_is_clamped_to_series_length() {
        let series = [1.0, 2.0, 3.0];
        let clamped = smooth(&series, 100, moving);
        let explicit = smooth(&series, 3, moving);
        assert_eq!(clamped, explicit);
    }

    #[test]
    fn binomial_weights() {
        assert!(close(&binomial(1), &[1.0]));
        assert!(close(&binomial(3), &[0.25, 0.5, 0.25]));
        assert!(close(&binomial(5), &[0.0625, 0.25, 0.375, 0.25, 0.0625]));
        assert!((binomial(20).iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(Kernel::Binomial.weights(4), binomial(4));
        assert_eq!(Kernel::Moving.weights(4), vec![0.25; 4]);
    }

    #[test]
    #[should_panic(expected = "smoothing kernel returned")]
    fn kernel_length_mismatch_panics() {
        smooth(&[1.0, 2.0, 3.0, 4.0], 3, |n| vec![1.0; n + 1]);
    }
}
