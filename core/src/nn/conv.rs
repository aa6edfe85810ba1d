use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand_distr::{Distribution, Uniform};

use crate::internal::*;
use crate::ops::cnn::Conv;
use crate::trace::Tracer;

/// 2D convolution with square kernels and symmetric padding.
#[derive(Debug, Clone)]
pub struct Conv2d {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
    pub groups: usize,
    pub weight: Tensor,
    pub bias: Option<Tensor>,
}

impl Conv2d {
    /// "Same" padding for odd kernels. Weights are drawn uniformly in
    /// `±1/sqrt(fan_in)` from `seed`.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        groups: usize,
        bias: bool,
        seed: u64,
    ) -> Conv2d {
        let fan_in = in_channels / groups.max(1) * kernel_size * kernel_size;
        let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
        let mut rng = SmallRng::seed_from_u64(seed);
        let uniform = Uniform::new_inclusive(-bound, bound);
        let mut init = |shape: &[usize]| {
            let len = shape.iter().product();
            let data: Vec<f32> = uniform.sample_iter(&mut rng).take(len).collect();
            Tensor::from(ndarray::ArrayD::from_shape_vec(shape, data).unwrap_or_default())
        };
        let weight =
            init(&[out_channels, in_channels / groups.max(1), kernel_size, kernel_size]);
        let bias = if bias { Some(init(&[out_channels])) } else { None };
        Conv2d {
            in_channels,
            out_channels,
            kernel_size,
            stride,
            padding: (kernel_size - 1) / 2,
            groups,
            weight,
            bias,
        }
    }

    pub fn op(&self) -> Conv {
        Conv {
            strides: [self.stride; 2],
            pads: [self.padding; 4],
            dilations: [1, 1],
            group: self.groups,
        }
    }
}

impl Layer for Conv2d {
    fn name(&self) -> &'static str {
        "Conv2d"
    }

    fn forward(&self, tracer: &mut Tracer, inputs: &[OutletId]) -> ExportResult<TVec<OutletId>> {
        let mut wires = tvec!(inputs[0], tracer.param("weight", &self.weight)?);
        if let Some(bias) = &self.bias {
            wires.push(tracer.param("bias", bias)?);
        }
        tracer.op(self.op(), &wires)
    }

    fn parameters(&self) -> Vec<(&'static str, &Tensor)> {
        let mut params = vec![("weight", &self.weight)];
        if let Some(bias) = &self.bias {
            params.push(("bias", bias));
        }
        params
    }

    fn parameters_mut(&mut self) -> Vec<(&'static str, &mut Tensor)> {
        let mut params = vec![("weight", &mut self.weight)];
        if let Some(bias) = &mut self.bias {
            params.push(("bias", bias));
        }
        params
    }
}
