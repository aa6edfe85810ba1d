//! Broadcasting arithmetic.
use ndarray::{ArrayD, IxDyn, Zip};

use crate::internal::*;

/// Numpy-style broadcast of several shapes.
pub fn multi_broadcast(shapes: &[&[Dim]]) -> ExportResult<TVec<Dim>> {
    let rank = shapes.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut shape: TVec<Dim> = tvec!();
    for i in 0..rank {
        let mut wanted = Dim::Val(1);
        for s in shapes {
            let Some(d) = (i + s.len()).checked_sub(rank).map(|ix| &s[ix]) else {
                continue;
            };
            if *d == Dim::Val(1) || *d == wanted {
                continue;
            }
            match (&wanted, d) {
                (Dim::Val(1), _) | (Dim::Sym(_), Dim::Val(_)) => wanted = d.clone(),
                (Dim::Val(_), Dim::Sym(_)) => (),
                _ => bail!("Can not broadcast shapes {:?}", shapes),
            }
        }
        shape.push(wanted);
    }
    Ok(shape)
}

fn broadcast_eval(
    a: &ArrayD<f32>,
    b: &ArrayD<f32>,
    f: impl Fn(f32, f32) -> f32,
) -> ExportResult<ArrayD<f32>> {
    let dims = |s: &[usize]| s.iter().map(|d| Dim::Val(*d)).collect::<TVec<_>>();
    let shape = multi_broadcast(&[&dims(a.shape()), &dims(b.shape())])?
        .iter()
        .map(|d| d.to_usize())
        .collect::<ExportResult<TVec<usize>>>()?;
    let a = a.broadcast(IxDyn(&shape)).context("Broadcasting left operand")?;
    let b = b.broadcast(IxDyn(&shape)).context("Broadcasting right operand")?;
    Ok(Zip::from(&a).and(&b).map_collect(|a, b| f(*a, *b)))
}

macro_rules! bin_op {
    ($Op:ident, $onnx:expr, $f:expr) => {
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $Op;

        impl Op for $Op {
            fn name(&self) -> Cow<'_, str> {
                $onnx.into()
            }

            fn eval(&self, inputs: TVec<Arc<Tensor>>) -> ExportResult<TVec<Tensor>> {
                let (a, b) = args_2!(inputs);
                Ok(tvec!(broadcast_eval(a.as_f32()?, b.as_f32()?, $f)?.into()))
            }

            fn output_facts(&self, inputs: &[&Fact]) -> ExportResult<TVec<Fact>> {
                ensure!(inputs.len() == 2, "{} expects two inputs", $onnx);
                ensure!(
                    inputs.iter().all(|f| f.datum_type == DatumType::F32),
                    "{} expects F32 inputs",
                    $onnx
                );
                let shape = multi_broadcast(&[&inputs[0].shape, &inputs[1].shape])?;
                Ok(tvec!(Fact::dt_shape(DatumType::F32, shape)))
            }
        }
    };
}

bin_op!(Add, "Add", |a, b| a + b);
bin_op!(Mul, "Mul", |a, b| a * b);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_shapes() {
        let a: TVec<Dim> = tvec!(1.into(), 3.into(), 1.into());
        let b: TVec<Dim> = tvec!(4.into());
        let expected: TVec<Dim> = tvec!(1.into(), 3.into(), 4.into());
        assert_eq!(multi_broadcast(&[&a, &b]).unwrap(), expected);
        let c: TVec<Dim> = tvec!(2.into());
        assert!(multi_broadcast(&[&b, &c]).is_err());
    }

    #[test]
    fn broadcast_symbols() {
        let a: TVec<Dim> = tvec!(Dim::Sym("batch".into()), 3.into());
        let b: TVec<Dim> = tvec!(1.into(), 3.into());
        assert_eq!(multi_broadcast(&[&a, &b]).unwrap()[0], Dim::Sym("batch".into()));
    }

    #[test]
    fn add_broadcasts() {
        let a = Arc::new(Tensor::from(ndarray::arr2(&[[1f32, 2.0], [3.0, 4.0]]).into_dyn()));
        let b = Arc::new(Tensor::from(ndarray::arr1(&[10f32, 20.0]).into_dyn()));
        let out = Add.eval(tvec!(a, b)).unwrap();
        assert_eq!(
            out[0].as_f32().unwrap(),
            &ndarray::arr2(&[[11f32, 22.0], [13.0, 24.0]]).into_dyn()
        );
    }
}
