//! Same-padding convolution and 2x2 max-pooling over NHWC tensors.
//!
//! The convolution lowers each input window into a patch matrix (im2col) so
//! the contraction runs through one matrix product; the backward pass reuses
//! the same lowering for the weight gradient and scatters the patch gradient
//! back with col2im.

use ndarray::{Array1, Array2, Array4, Axis};

/// Stride-1 convolution with same padding: input `(B, H, W, Cin)`,
/// weights `(KH, KW, Cin, Cout)`, bias `(Cout)` -> `(B, H, W, Cout)`.
///
/// Kernel sides must be odd so the padding is symmetric.
pub fn conv2d_same(input: &Array4<f32>, w: &Array4<f32>, b: &Array1<f32>) -> Array4<f32> {
    let (bsz, h, wid, cin) = input.dim();
    let (kh, kw, wcin, cout) = w.dim();
    debug_assert_eq!(cin, wcin, "input channels must match kernel channels");
    debug_assert!(kh % 2 == 1 && kw % 2 == 1, "kernel sides must be odd");

    let patches = im2col(input, kh, kw);
    let w2 = w
        .view()
        .into_shape_with_order((kh * kw * cin, cout))
        .expect("kernel tensor is contiguous");
    let mut out = patches.dot(&w2);
    out += b;
    out.into_shape_with_order((bsz, h, wid, cout))
        .expect("matrix product is contiguous")
}

/// Gradients of a same-padding convolution.
pub struct ConvGrads {
    pub w: Array4<f32>,
    pub b: Array1<f32>,
    /// Present only when requested; the first layer consumes raw data and
    /// needs no input gradient.
    pub input: Option<Array4<f32>>,
}

/// Backward pass: recomputes the patch matrix rather than caching it, since
/// the lowered form of the first layer is far larger than its activations.
pub fn conv2d_same_backward(
    input: &Array4<f32>,
    w: &Array4<f32>,
    d_out: &Array4<f32>,
    need_input_grad: bool,
) -> ConvGrads {
    let (bsz, h, wid, cin) = input.dim();
    let (kh, kw, _, cout) = w.dim();

    let patches = im2col(input, kh, kw);
    let d_out2 = d_out
        .view()
        .into_shape_with_order((bsz * h * wid, cout))
        .expect("gradient tensor is contiguous");

    let dw = patches
        .t()
        .dot(&d_out2)
        .into_shape_with_order(w.dim())
        .expect("weight gradient is contiguous");
    let db = d_out2.sum_axis(Axis(0));

    let input_grad = need_input_grad.then(|| {
        let w2 = w
            .view()
            .into_shape_with_order((kh * kw * cin, cout))
            .expect("kernel tensor is contiguous");
        let d_patches = d_out2.dot(&w2.t());
        col2im(&d_patches, (bsz, h, wid, cin), kh, kw)
    });

    ConvGrads { w: dw, b: db, input: input_grad }
}

/// 2x2 max-pool with stride 2. Returns the pooled tensor and, per output
/// element, the flat offset of its winning input element (for backward).
pub fn max_pool2x2(input: &Array4<f32>) -> (Array4<f32>, Array4<usize>) {
    let (bsz, h, w, c) = input.dim();
    debug_assert!(h % 2 == 0 && w % 2 == 0, "spatial dims must be even");
    let (oh, ow) = (h / 2, w / 2);
    let src = input.as_slice().expect("input is contiguous");

    let mut out = Array4::<f32>::zeros((bsz, oh, ow, c));
    let mut idx = Array4::<usize>::zeros((bsz, oh, ow, c));
    {
        let out_s = out.as_slice_mut().expect("freshly allocated");
        let idx_s = idx.as_slice_mut().expect("freshly allocated");
        for bi in 0..bsz {
            for oy in 0..oh {
                for ox in 0..ow {
                    let corners = [
                        ((bi * h + 2 * oy) * w + 2 * ox) * c,
                        ((bi * h + 2 * oy) * w + 2 * ox + 1) * c,
                        ((bi * h + 2 * oy + 1) * w + 2 * ox) * c,
                        ((bi * h + 2 * oy + 1) * w + 2 * ox + 1) * c,
                    ];
                    let dst = ((bi * oh + oy) * ow + ox) * c;
                    for ch in 0..c {
                        let mut best = corners[0] + ch;
                        let mut best_val = src[best];
                        for &corner in &corners[1..] {
                            let off = corner + ch;
                            if src[off] > best_val {
                                best = off;
                                best_val = src[off];
                            }
                        }
                        out_s[dst + ch] = best_val;
                        idx_s[dst + ch] = best;
                    }
                }
            }
        }
    }
    (out, idx)
}

/// Route the pooled gradient back to each window's winning input element.
pub fn max_pool2x2_backward(
    d_out: &Array4<f32>,
    idx: &Array4<usize>,
    input_dim: (usize, usize, usize, usize),
) -> Array4<f32> {
    let mut d_in = Array4::<f32>::zeros(input_dim);
    let d_in_s = d_in.as_slice_mut().expect("freshly allocated");
    for (&g, &i) in d_out.iter().zip(idx.iter()) {
        d_in_s[i] += g;
    }
    d_in
}

/// Lower `(B, H, W, C)` into `(B*H*W, KH*KW*C)` patch rows, zero-padded at
/// the borders. Channels are innermost, matching the NHWC memory layout.
fn im2col(input: &Array4<f32>, kh: usize, kw: usize) -> Array2<f32> {
    let (bsz, h, w, c) = input.dim();
    let (ph, pw) = (kh / 2, kw / 2);
    let src = input.as_slice().expect("input is contiguous");
    let row_len = kh * kw * c;

    let mut patches = Array2::<f32>::zeros((bsz * h * w, row_len));
    let dst = patches.as_slice_mut().expect("freshly allocated");
    for bi in 0..bsz {
        for y in 0..h {
            for ky in 0..kh {
                let sy = y + ky;
                if sy < ph || sy >= h + ph {
                    continue;
                }
                let sy = sy - ph;
                for x in 0..w {
                    let row = ((bi * h + y) * w + x) * row_len;
                    for kx in 0..kw {
                        let sx = x + kx;
                        if sx < pw || sx >= w + pw {
                            continue;
                        }
                        let sx = sx - pw;
                        let s = ((bi * h + sy) * w + sx) * c;
                        let d = row + (ky * kw + kx) * c;
                        dst[d..d + c].copy_from_slice(&src[s..s + c]);
                    }
                }
            }
        }
    }
    patches
}

/// Scatter-add patch-row gradients back into input positions (im2col
/// transpose).
fn col2im(
    d_patches: &Array2<f32>,
    input_dim: (usize, usize, usize, usize),
    kh: usize,
    kw: usize,
) -> Array4<f32> {
    let (bsz, h, w, c) = input_dim;
    let (ph, pw) = (kh / 2, kw / 2);
    let row_len = kh * kw * c;
    let src = d_patches.as_slice().expect("gradient matrix is contiguous");

    let mut d_in = Array4::<f32>::zeros(input_dim);
    let dst = d_in.as_slice_mut().expect("freshly allocated");
    for bi in 0..bsz {
        for y in 0..h {
            for ky in 0..kh {
                let sy = y + ky;
                if sy < ph || sy >= h + ph {
                    continue;
                }
                let sy = sy - ph;
                for x in 0..w {
                    let row = ((bi * h + y) * w + x) * row_len;
                    for kx in 0..kw {
                        let sx = x + kx;
                        if sx < pw || sx >= w + pw {
                            continue;
                        }
                        let sx = sx - pw;
                        let d = ((bi * h + sy) * w + sx) * c;
                        let s = row + (ky * kw + kx) * c;
                        for ch in 0..c {
                            dst[d + ch] += src[s + ch];
                        }
                    }
                }
            }
        }
    }
    d_in
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array4;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Direct-loop convolution used as a reference implementation.
    fn conv_reference(input: &Array4<f32>, w: &Array4<f32>, b: &Array1<f32>) -> Array4<f32> {
        let (bsz, h, wid, cin) = input.dim();
        let (kh, kw, _, cout) = w.dim();
        let (ph, pw) = (kh / 2, kw / 2);
        let mut out = Array4::<f32>::zeros((bsz, h, wid, cout));
        for bi in 0..bsz {
            for y in 0..h {
                for x in 0..wid {
                    for co in 0..cout {
                        let mut acc = b[co];
                        for ky in 0..kh {
                            for kx in 0..kw {
                                let (sy, sx) = (y + ky, x + kx);
                                if sy < ph || sy >= h + ph || sx < pw || sx >= wid + pw {
                                    continue;
                                }
                                for ci in 0..cin {
                                    acc += input[[bi, sy - ph, sx - pw, ci]]
                                        * w[[ky, kx, ci, co]];
                                }
                            }
                        }
                        out[[bi, y, x, co]] = acc;
                    }
                }
            }
        }
        out
    }

    fn random4(dim: (usize, usize, usize, usize), rng: &mut StdRng) -> Array4<f32> {
        Array4::from_shape_simple_fn(dim, || rng.gen::<f32>() - 0.5)
    }

    #[test]
    fn test_conv_matches_reference() {
        let mut rng = StdRng::seed_from_u64(2);
        let input = random4((2, 6, 6, 3), &mut rng);
        let w = random4((5, 5, 3, 4), &mut rng);
        let b = Array1::from_shape_simple_fn(4, || rng.gen::<f32>() - 0.5);

        let fast = conv2d_same(&input, &w, &b);
        let slow = conv_reference(&input, &w, &b);
        assert_eq!(fast.dim(), (2, 6, 6, 4));
        for (a, e) in fast.iter().zip(slow.iter()) {
            assert_relative_eq!(a, e, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_conv_backward_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(3);
        let input = random4((1, 4, 4, 2), &mut rng);
        let w = random4((3, 3, 2, 2), &mut rng);
        let b = Array1::from_shape_simple_fn(2, || rng.gen::<f32>() - 0.5);

        // Scalar objective: sum of all outputs.
        let d_out = Array4::from_elem((1, 4, 4, 2), 1.0f32);
        let grads = conv2d_same_backward(&input, &w, &d_out, true);
        let d_input = grads.input.expect("requested input gradient");

        let eps = 1e-2f32;
        for idx in [[0usize, 0, 0, 0], [1, 1, 0, 1], [2, 2, 1, 0]] {
            let mut wp = w.clone();
            wp[idx] += eps;
            let mut wm = w.clone();
            wm[idx] -= eps;
            let fd = (conv2d_same(&input, &wp, &b).sum()
                - conv2d_same(&input, &wm, &b).sum())
                / (2.0 * eps);
            assert_relative_eq!(grads.w[idx], fd, epsilon = 1e-2);
        }
        for idx in [[0usize, 0, 0, 0], [0, 2, 3, 1], [0, 3, 1, 0]] {
            let mut xp = input.clone();
            xp[idx] += eps;
            let mut xm = input.clone();
            xm[idx] -= eps;
            let fd = (conv2d_same(&xp, &w, &b).sum() - conv2d_same(&xm, &w, &b).sum())
                / (2.0 * eps);
            assert_relative_eq!(d_input[idx], fd, epsilon = 1e-2);
        }
        // Bias gradient: each output position contributes 1.
        for co in 0..2 {
            assert_relative_eq!(grads.b[co], 16.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_max_pool_picks_window_maxima() {
        let mut input = Array4::<f32>::zeros((1, 4, 4, 1));
        for y in 0..4 {
            for x in 0..4 {
                input[[0, y, x, 0]] = (y * 4 + x) as f32;
            }
        }
        let (out, _) = max_pool2x2(&input);
        assert_eq!(out.dim(), (1, 2, 2, 1));
        assert_eq!(out[[0, 0, 0, 0]], 5.0);
        assert_eq!(out[[0, 0, 1, 0]], 7.0);
        assert_eq!(out[[0, 1, 0, 0]], 13.0);
        assert_eq!(out[[0, 1, 1, 0]], 15.0);
    }

    #[test]
    fn test_max_pool_backward_routes_to_argmax() {
        let mut input = Array4::<f32>::zeros((1, 2, 2, 1));
        input[[0, 0, 1, 0]] = 9.0; // winner of the single window
        let (_, idx) = max_pool2x2(&input);
        let mut d_out = Array4::<f32>::zeros((1, 1, 1, 1));
        d_out[[0, 0, 0, 0]] = 3.5;
        let d_in = max_pool2x2_backward(&d_out, &idx, (1, 2, 2, 1));
        assert_eq!(d_in[[0, 0, 1, 0]], 3.5);
        assert_eq!(d_in.sum(), 3.5);
    }

    #[test]
    fn test_pool_then_backward_preserves_gradient_mass() {
        let mut rng = StdRng::seed_from_u64(5);
        let input = random4((2, 8, 8, 3), &mut rng);
        let (out, idx) = max_pool2x2(&input);
        let d_out = Array4::from_shape_simple_fn(out.dim(), || rng.gen::<f32>());
        let d_in = max_pool2x2_backward(&d_out, &idx, input.dim());
        assert_relative_eq!(d_in.sum(), d_out.sum(), epsilon = 1e-3);
    }
}
