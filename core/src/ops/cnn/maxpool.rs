use ndarray::{Array4, Ix4};

use super::conv::Geometry;
use crate::internal::*;

/// 2D max pooling on NCHW data. Padding never wins.
#[derive(Debug, Clone, new, PartialEq, Eq)]
pub struct MaxPool {
    pub kernel: [usize; 2],
    pub strides: [usize; 2],
    /// top, left, bottom, right
    pub pads: [usize; 4],
}

impl MaxPool {
    fn output_dims(&self, input: [usize; 2]) -> ExportResult<[usize; 2]> {
        let mut output = [0; 2];
        for ax in 0..2 {
            output[ax] = Geometry::output_dim(
                input[ax],
                self.kernel[ax],
                self.strides[ax],
                1,
                (self.pads[ax], self.pads[ax + 2]),
            )
            .with_context(|| format!("MaxPool: {:?} does not fit input {:?}", self, input))?;
        }
        Ok(output)
    }
}

impl Op for MaxPool {
    fn name(&self) -> Cow<'_, str> {
        "MaxPool".into()
    }

    fn info(&self) -> ExportResult<Vec<String>> {
        Ok(vec![format!(
            "kernel: {:?} strides: {:?} pads: {:?}",
            self.kernel, self.strides, self.pads
        )])
    }

    fn eval(&self, inputs: TVec<Arc<Tensor>>) -> ExportResult<TVec<Tensor>> {
        let input = args_1!(inputs);
        let x = input.to_array_view_f32()?.into_dimensionality::<Ix4>()?;
        let (n, c, h, w) = x.dim();
        let [oh, ow] = self.output_dims([h, w])?;
        let mut output = Array4::<f32>::from_elem((n, c, oh, ow), f32::NEG_INFINITY);
        for ((b, ch, oy, ox), v) in output.indexed_iter_mut() {
            for ky in 0..self.kernel[0] {
                let y = (oy * self.strides[0] + ky) as isize - self.pads[0] as isize;
                if y < 0 || y >= h as isize {
                    continue;
                }
                for kx in 0..self.kernel[1] {
                    let xx = (ox * self.strides[1] + kx) as isize - self.pads[1] as isize;
                    if xx < 0 || xx >= w as isize {
                        continue;
                    }
                    *v = v.max(x[(b, ch, y as usize, xx as usize)]);
                }
            }
        }
        Ok(tvec!(output.into_dyn().into()))
    }

    fn output_facts(&self, inputs: &[&Fact]) -> ExportResult<TVec<Fact>> {
        ensure!(inputs.len() == 1, "MaxPool expects one input");
        let x = inputs[0];
        ensure!(x.rank() == 4, "MaxPool: input must be NCHW, got {:?}", x);
        let [oh, ow] = self.output_dims([x.shape[2].to_usize()?, x.shape[3].to_usize()?])?;
        let shape = [x.shape[0].clone(), x.shape[1].clone(), oh.into(), ow.into()];
        Ok(tvec!(Fact::dt_shape(DatumType::F32, shape)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_padding_keeps_size() {
        let pool = MaxPool::new([5, 5], [1, 1], [2; 4]);
        let fact = Fact::f32([Dim::Sym("batch".into()), 8.into(), 20.into(), 20.into()]);
        let out = pool.output_facts(&[&fact]).unwrap();
        assert_eq!(out[0].shape, fact.shape);
    }

    #[test]
    fn max_over_window() {
        let pool = MaxPool::new([3, 3], [1, 1], [1; 4]);
        let x = ndarray::Array4::from_shape_fn((1, 1, 3, 3), |(_, _, y, x)| (y * 3 + x) as f32);
        let out = pool.eval(tvec!(Arc::new(Tensor::from(x.into_dyn())))).unwrap();
        let out = out[0].as_f32().unwrap();
        assert_eq!(out.as_slice().unwrap(), &[4.0, 5.0, 5.0, 7.0, 8.0, 8.0, 7.0, 8.0, 8.0]);
    }
}
