use ndarray::{ArrayD, Dimension, IxDyn};

use crate::internal::*;

/// Nearest neighbour resize, with the coordinate mapping of an integer
/// upsampling: `in = floor(out / scale)`.
///
/// Inputs are X, an empty region of interest, and one constant f32 scale per
/// axis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resize;

fn scales(fact: &Fact) -> ExportResult<Vec<f32>> {
    let konst = fact.konst.as_ref().context("Resize scales must be a constant")?;
    let scales = konst.as_f32().context("Resize scales must be a f32 tensor")?;
    ensure!(scales.iter().all(|s| *s > 0.0), "Resize scales must be positive, got {}", scales);
    Ok(scales.iter().copied().collect())
}

fn scaled(dim: usize, scale: f32) -> usize {
    (dim as f32 * scale).floor() as usize
}

impl Op for Resize {
    fn name(&self) -> Cow<'_, str> {
        "Resize".into()
    }

    fn eval(&self, inputs: TVec<Arc<Tensor>>) -> ExportResult<TVec<Tensor>> {
        ensure!(inputs.len() == 3, "Resize expects three inputs");
        let x = inputs[0].to_array_view_f32()?;
        let scales = scales(&Fact::from(inputs[2].clone()))?;
        ensure!(scales.len() == x.ndim(), "Resize needs one scale per axis");
        let shape: Vec<usize> =
            x.shape().iter().zip(scales.iter()).map(|(d, s)| scaled(*d, *s)).collect();
        let output = ArrayD::from_shape_fn(IxDyn(&shape), |coords| {
            let source: Vec<usize> = (0..coords.ndim())
                .map(|ax| {
                    let ix = (coords[ax] as f32 / scales[ax]).floor() as usize;
                    ix.min(x.shape()[ax] - 1)
                })
                .collect();
            x[IxDyn(&source)]
        });
        Ok(tvec!(output.into()))
    }

    fn output_facts(&self, inputs: &[&Fact]) -> ExportResult<TVec<Fact>> {
        ensure!(inputs.len() == 3, "Resize expects three inputs");
        let x = inputs[0];
        let scales = scales(inputs[2])?;
        ensure!(scales.len() == x.rank(), "Resize needs one scale per axis, got {:?}", scales);
        let shape = x
            .shape
            .iter()
            .zip(scales.iter())
            .map(|(d, s)| match d {
                Dim::Sym(_) if *s == 1.0 => Ok(d.clone()),
                Dim::Sym(_) => bail!("Resize can not scale symbolic axis {}", d),
                Dim::Val(v) => Ok(Dim::Val(scaled(*v, *s))),
            })
            .collect::<ExportResult<TVec<Dim>>>()?;
        Ok(tvec!(Fact::dt_shape(DatumType::F32, shape)))
    }
}
