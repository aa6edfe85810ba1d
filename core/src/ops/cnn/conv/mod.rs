//! 2D convolution, NCHW data and OIHW kernels.
mod im2col;

pub use self::im2col::{Geometry, im2col};

use ndarray::{Array4, Ix4, s};

use crate::internal::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conv {
    pub strides: [usize; 2],
    /// top, left, bottom, right
    pub pads: [usize; 4],
    pub dilations: [usize; 2],
    pub group: usize,
}

impl Default for Conv {
    fn default() -> Conv {
        Conv { strides: [1, 1], pads: [0; 4], dilations: [1, 1], group: 1 }
    }
}

impl Conv {
    /// Resolve the geometry for a given input and kernel shape.
    pub fn geometry(&self, input: [usize; 2], kernel: [usize; 2]) -> ExportResult<Geometry> {
        let mut output = [0; 2];
        for ax in 0..2 {
            output[ax] = Geometry::output_dim(
                input[ax],
                kernel[ax],
                self.strides[ax],
                self.dilations[ax],
                (self.pads[ax], self.pads[ax + 2]),
            )
            .with_context(|| {
                format!("Conv: kernel {:?} does not fit input {:?} with {:?}", kernel, input, self)
            })?;
        }
        Ok(Geometry {
            kernel,
            strides: self.strides,
            dilations: self.dilations,
            pads: self.pads,
            input,
            output,
        })
    }

    fn check_kernel(&self, input_channels: &Dim, kernel: &[Dim]) -> ExportResult<()> {
        ensure!(kernel.len() == 4, "Conv: kernel must be of rank 4, got {:?}", kernel);
        ensure!(self.group > 0, "Conv: group must be positive");
        let out = kernel[0].to_usize()?;
        let ci_per_group = kernel[1].to_usize()?;
        ensure!(
            out % self.group == 0,
            "Conv: {} outputs can not be split in {} groups",
            out,
            self.group
        );
        if let Dim::Val(c) = input_channels {
            ensure!(
                ci_per_group * self.group == *c,
                "Conv: input has {} channels, kernel expects {} per group and {} groups",
                c,
                ci_per_group,
                self.group
            );
        }
        Ok(())
    }
}

impl Op for Conv {
    fn name(&self) -> Cow<'_, str> {
        "Conv".into()
    }

    fn info(&self) -> ExportResult<Vec<String>> {
        Ok(vec![format!(
            "strides: {:?} pads: {:?} dilations: {:?} group: {}",
            self.strides, self.pads, self.dilations, self.group
        )])
    }

    fn eval(&self, inputs: TVec<Arc<Tensor>>) -> ExportResult<TVec<Tensor>> {
        ensure!(inputs.len() == 2 || inputs.len() == 3, "Conv expects 2 or 3 inputs");
        let x = inputs[0].to_array_view_f32()?.into_dimensionality::<Ix4>()?;
        let w = inputs[1].to_array_view_f32()?.into_dimensionality::<Ix4>()?;
        let (n, c, h, wi) = x.dim();
        let (m, cpg, kh, kw) = w.dim();
        let kernel: TVec<Dim> = w.shape().iter().map(|d| Dim::Val(*d)).collect();
        self.check_kernel(&Dim::Val(c), &kernel)?;
        let geo = self.geometry([h, wi], [kh, kw])?;
        let [oh, ow] = geo.output;
        let mpg = m / self.group;
        let weights = w.to_shape((m, cpg * kh * kw))?;
        let mut output = Array4::<f32>::zeros((n, m, oh, ow));
        for b in 0..n {
            for g in 0..self.group {
                let cols = im2col(x.slice(s![b, g * cpg..(g + 1) * cpg, .., ..]), &geo);
                let y = weights.slice(s![g * mpg..(g + 1) * mpg, ..]).dot(&cols);
                let y = y.into_shape_with_order((mpg, oh, ow))?;
                output.slice_mut(s![b, g * mpg..(g + 1) * mpg, .., ..]).assign(&y);
            }
        }
        if let Some(bias) = inputs.get(2) {
            let bias = bias.as_f32()?.to_shape((1, m, 1, 1))?;
            output += &bias;
        }
        Ok(tvec!(output.into_dyn().into()))
    }

    fn output_facts(&self, inputs: &[&Fact]) -> ExportResult<TVec<Fact>> {
        ensure!(inputs.len() == 2 || inputs.len() == 3, "Conv expects 2 or 3 inputs");
        let (x, w) = (inputs[0], inputs[1]);
        ensure!(x.rank() == 4, "Conv: input must be NCHW, got {:?}", x);
        self.check_kernel(&x.shape[1], &w.shape)?;
        if let Some(bias) = inputs.get(2) {
            ensure!(
                bias.rank() == 1 && bias.shape[0] == w.shape[0],
                "Conv: bias {:?} does not match kernel {:?}",
                bias,
                w
            );
        }
        let geo = self.geometry(
            [x.shape[2].to_usize()?, x.shape[3].to_usize()?],
            [w.shape[2].to_usize()?, w.shape[3].to_usize()?],
        )?;
        let shape = [
            x.shape[0].clone(),
            w.shape[0].clone(),
            geo.output[0].into(),
            geo.output[1].into(),
        ];
        Ok(tvec!(Fact::dt_shape(DatumType::F32, shape)))
    }
}
