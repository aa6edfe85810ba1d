use ndarray::{Array2, ArrayView3};

/// Spatial parameters of a 2D convolution, resolved against an input size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    pub kernel: [usize; 2],
    pub strides: [usize; 2],
    pub dilations: [usize; 2],
    /// top, left, bottom, right
    pub pads: [usize; 4],
    pub input: [usize; 2],
    pub output: [usize; 2],
}

impl Geometry {
    pub fn output_dim(
        input: usize,
        kernel: usize,
        stride: usize,
        dilation: usize,
        pads: (usize, usize),
    ) -> Option<usize> {
        if kernel == 0 || stride == 0 {
            return None;
        }
        let field = dilation * (kernel - 1) + 1;
        let padded = input + pads.0 + pads.1;
        if padded < field {
            return None;
        }
        Some((padded - field) / stride + 1)
    }
}

/// Unfold a (C, H, W) input into a (C * kh * kw, oh * ow) matrix, one column
/// per output pixel. Padding reads as zero.
pub fn im2col(input: ArrayView3<f32>, geo: &Geometry) -> Array2<f32> {
    let channels = input.shape()[0];
    let [kh, kw] = geo.kernel;
    let [oh, ow] = geo.output;
    let [ih, iw] = geo.input;
    let mut cols = Array2::<f32>::zeros((channels * kh * kw, oh * ow));
    for c in 0..channels {
        for ki in 0..kh {
            for kj in 0..kw {
                let row = (c * kh + ki) * kw + kj;
                for oy in 0..oh {
                    let y = (oy * geo.strides[0] + ki * geo.dilations[0]) as isize
                        - geo.pads[0] as isize;
                    if y < 0 || y >= ih as isize {
                        continue;
                    }
                    for ox in 0..ow {
                        let x = (ox * geo.strides[1] + kj * geo.dilations[1]) as isize
                            - geo.pads[1] as isize;
                        if x < 0 || x >= iw as isize {
                            continue;
                        }
                        cols[(row, oy * ow + ox)] = input[(c, y as usize, x as usize)];
                    }
                }
            }
        }
    }
    cols
}
