use ndarray::IxDyn;

use super::const_i64s;
use crate::internal::*;

/// Reshape to the shape given by a constant second input.
///
/// A 0 copies the matching input dimension, a single -1 absorbs the rest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reshape;

/// Resolve a reshape target against an input shape.
pub fn compute_shape(input: &[Dim], target: &[i64]) -> ExportResult<TVec<Dim>> {
    ensure!(target.iter().filter(|d| **d == -1).count() <= 1, "Reshape: more than one -1");
    let mut output: TVec<Option<Dim>> = tvec!();
    for (ix, d) in target.iter().enumerate() {
        match *d {
            -1 => output.push(None),
            0 => output.push(Some(
                input.get(ix).cloned().with_context(|| format!("Reshape: no axis {ix} to copy"))?,
            )),
            d if d > 0 => output.push(Some(Dim::Val(d as usize))),
            d => bail!("Reshape: invalid dimension {}", d),
        }
    }
    let (in_known, mut in_syms) = split_dims(input.iter());
    let (out_known, out_syms) = split_dims(output.iter().flatten());
    for s in out_syms {
        let pos = in_syms.iter().position(|i| *i == s);
        let pos = pos.with_context(|| format!("Reshape: {s} does not appear in input"))?;
        in_syms.remove(pos);
    }
    if let Some(pos) = output.iter().position(|d| d.is_none()) {
        ensure!(in_syms.len() <= 1, "Reshape: can not infer -1 from {:?}", input);
        let missing = if let Some(sym) = in_syms.pop() {
            ensure!(in_known == out_known, "Reshape: can not infer -1 from {:?}", input);
            Dim::Sym(sym)
        } else {
            ensure!(
                out_known != 0 && in_known % out_known == 0,
                "Reshape: {:?} can not be reshaped to {:?}",
                input,
                target
            );
            Dim::Val(in_known / out_known)
        };
        output[pos] = Some(missing);
    } else {
        ensure!(
            in_known == out_known && in_syms.is_empty(),
            "Reshape: {:?} can not be reshaped to {:?}",
            input,
            target
        );
    }
    Ok(output.into_iter().flatten().collect())
}

fn split_dims<'a>(dims: impl Iterator<Item = &'a Dim>) -> (usize, Vec<String>) {
    let mut known = 1;
    let mut syms = vec![];
    for d in dims {
        match d {
            Dim::Val(v) => known *= v,
            Dim::Sym(s) => syms.push(s.clone()),
        }
    }
    (known, syms)
}

impl Op for Reshape {
    fn name(&self) -> Cow<'_, str> {
        "Reshape".into()
    }

    fn eval(&self, inputs: TVec<Arc<Tensor>>) -> ExportResult<TVec<Tensor>> {
        let (input, shape) = args_2!(inputs);
        let dims = input.shape().iter().map(|d| Dim::Val(*d)).collect::<TVec<_>>();
        let shape = compute_shape(&dims, &shape.to_i64s()?)?
            .iter()
            .map(|d| d.to_usize())
            .collect::<ExportResult<TVec<usize>>>()?;
        let reshaped = input.as_f32()?.to_shape(IxDyn(&shape))?.into_owned();
        Ok(tvec!(reshaped.into()))
    }

    fn output_facts(&self, inputs: &[&Fact]) -> ExportResult<TVec<Fact>> {
        ensure!(inputs.len() == 2, "Reshape expects two inputs");
        let target = const_i64s(inputs[1], "Reshape shape")?;
        let shape = compute_shape(&inputs[0].shape, &target)?;
        Ok(tvec!(Fact::dt_shape(inputs[0].datum_type, shape)))
    }

    fn declutter(&self, model: &Graph, node: &Node) -> ExportResult<Option<GraphPatch>> {
        let input = model.outlet_fact(node.inputs[0])?;
        if input.shape == node.outputs[0].fact.shape {
            return Ok(Some(GraphPatch::shunt_one_op(model, node)?));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(d: &[usize]) -> TVec<Dim> {
        d.iter().map(|d| Dim::Val(*d)).collect()
    }

    #[test]
    fn copy_and_infer() {
        let shape = compute_shape(&dims(&[2, 85, 20, 20]), &[0, 85, -1]).unwrap();
        assert_eq!(shape, dims(&[2, 85, 400]));
    }

    #[test]
    fn symbolic_batch() {
        let input: TVec<Dim> = tvec!(Dim::Sym("batch".into()), 85.into(), 20.into(), 20.into());
        let shape = compute_shape(&input, &[0, 85, -1]).unwrap();
        let expected: TVec<Dim> = tvec!(Dim::Sym("batch".into()), 85.into(), 400.into());
        assert_eq!(shape, expected);
        let shape = compute_shape(&input, &[-1, 34000]).unwrap();
        assert_eq!(shape[0], Dim::Sym("batch".into()));
    }

    #[test]
    fn invalid() {
        assert!(compute_shape(&dims(&[2, 3]), &[4, -1]).is_err());
        assert!(compute_shape(&dims(&[2, 3]), &[-1, -1]).is_err());
        assert!(compute_shape(&dims(&[2, 3]), &[5]).is_err());
    }

    #[test]
    fn eval() {
        let input = Arc::new(Tensor::zero(&[1, 2, 3, 4]));
        let shape = Arc::new(Tensor::from_i64s(&[0, 2, -1]));
        let out = Reshape.eval(tvec!(input, shape)).unwrap();
        assert_eq!(out[0].shape(), &[1, 2, 12]);
    }
}
