//! Fully-connected layer.

use ndarray::{Array1, Array2, Axis};

/// `y = x.dot(w) + b` for `x: (B, in)`, `w: (in, out)`, `b: (out)`.
pub fn dense(x: &Array2<f32>, w: &Array2<f32>, b: &Array1<f32>) -> Array2<f32> {
    let mut y = x.dot(w);
    y += b;
    y
}

/// Gradients of a dense layer.
pub struct DenseGrads {
    pub w: Array2<f32>,
    pub b: Array1<f32>,
    pub input: Array2<f32>,
}

/// Backward pass given the layer input `x`, weights `w`, and upstream
/// gradient `d_y` of shape `(B, out)`.
pub fn dense_backward(x: &Array2<f32>, w: &Array2<f32>, d_y: &Array2<f32>) -> DenseGrads {
    DenseGrads {
        w: x.t().dot(d_y),
        b: d_y.sum_axis(Axis(0)),
        input: d_y.dot(&w.t()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_dense_forward() {
        let x = array![[1.0f32, 2.0]];
        let w = array![[1.0f32, 0.0, -1.0], [0.5, 2.0, 1.0]];
        let b = array![0.1f32, 0.2, 0.3];
        let y = dense(&x, &w, &b);
        assert_relative_eq!(y[[0, 0]], 2.1, epsilon = 1e-6);
        assert_relative_eq!(y[[0, 1]], 4.2, epsilon = 1e-6);
        assert_relative_eq!(y[[0, 2]], 1.3, epsilon = 1e-6);
    }

    #[test]
    fn test_dense_backward_matches_finite_differences() {
        let x = array![[0.3f32, -0.7, 1.2], [0.9, 0.1, -0.4]];
        let w = array![[0.2f32, -0.5], [0.8, 0.3], [-0.1, 0.6]];
        let b = array![0.05f32, -0.02];
        // Scalar objective: sum of outputs, so d_y is all ones.
        let d_y = Array2::from_elem((2, 2), 1.0f32);
        let grads = dense_backward(&x, &w, &d_y);

        let eps = 1e-3f32;
        let objective = |w: &Array2<f32>, x: &Array2<f32>| dense(x, w, &b).sum();

        for idx in [(0usize, 0usize), (1, 1), (2, 0)] {
            let mut wp = w.clone();
            wp[idx] += eps;
            let mut wm = w.clone();
            wm[idx] -= eps;
            let fd = (objective(&wp, &x) - objective(&wm, &x)) / (2.0 * eps);
            assert_relative_eq!(grads.w[idx], fd, epsilon = 1e-2);
        }
        for idx in [(0usize, 0usize), (1, 2)] {
            let mut xp = x.clone();
            xp[idx] += eps;
            let mut xm = x.clone();
            xm[idx] -= eps;
            let fd = (objective(&w, &xp) - objective(&w, &xm)) / (2.0 * eps);
            assert_relative_eq!(grads.input[idx], fd, epsilon = 1e-2);
        }
        // Bias gradient is the column sum of d_y: one per row.
        assert_relative_eq!(grads.b[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(grads.b[1], 2.0, epsilon = 1e-6);
    }
}
