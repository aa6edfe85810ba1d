use ndarray::{ArrayViewD, Axis};

use crate::internal::*;
use crate::ops::resolve_axis;

#[derive(Debug, Clone, new, PartialEq)]
pub struct Concat {
    pub axis: i64,
}

impl Op for Concat {
    fn name(&self) -> Cow<'_, str> {
        "Concat".into()
    }

    fn info(&self) -> ExportResult<Vec<String>> {
        Ok(vec![format!("axis: {}", self.axis)])
    }

    fn eval(&self, inputs: TVec<Arc<Tensor>>) -> ExportResult<TVec<Tensor>> {
        ensure!(!inputs.is_empty(), "Concat needs at least one input");
        let axis = resolve_axis(self.axis, inputs[0].rank())?;
        let views = inputs
            .iter()
            .map(|t| t.to_array_view_f32())
            .collect::<ExportResult<Vec<ArrayViewD<f32>>>>()?;
        let result = ndarray::concatenate(Axis(axis), &views)?;
        Ok(tvec!(result.into()))
    }

    fn output_facts(&self, inputs: &[&Fact]) -> ExportResult<TVec<Fact>> {
        ensure!(!inputs.is_empty(), "Concat needs at least one input");
        let rank = inputs[0].rank();
        let axis = resolve_axis(self.axis, rank)?;
        let mut shape = inputs[0].shape.clone();
        let mut sum = 0usize;
        for input in inputs {
            ensure!(
                input.datum_type == DatumType::F32 && input.rank() == rank,
                "Concat inputs must be F32 tensors of rank {}, got {:?}",
                rank,
                input
            );
            for (ix, (a, b)) in input.shape.iter().zip(shape.iter()).enumerate() {
                ensure!(
                    ix == axis || a == b,
                    "Concat inputs mismatch on axis {}: {:?} vs {:?}",
                    ix,
                    input,
                    inputs[0]
                );
            }
            sum += input.shape[axis].to_usize().context("Concat axis must be known")?;
        }
        shape[axis] = sum.into();
        Ok(tvec!(Fact::dt_shape(DatumType::F32, shape)))
    }

    fn declutter(&self, model: &Graph, node: &Node) -> ExportResult<Option<GraphPatch>> {
        if node.inputs.len() == 1 {
            return Ok(Some(GraphPatch::shunt_one_op(model, node)?));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_channels() {
        let a = Arc::new(Tensor::zero(&[1, 2, 3]));
        let b = Arc::new(Tensor::zero(&[1, 4, 3]));
        let facts = [Fact::for_tensor(&a), Fact::for_tensor(&b)];
        let op = Concat::new(1);
        let out = op.output_facts(&[&facts[0], &facts[1]]).unwrap();
        assert!(out[0].same_as(&Fact::f32([1, 6, 3])));
        let out = op.eval(tvec!(a, b)).unwrap();
        assert_eq!(out[0].shape(), &[1, 6, 3]);
    }

    #[test]
    fn concat_rejects_mismatch() {
        let facts = [Fact::f32([1, 2, 3]), Fact::f32([1, 2, 4])];
        assert!(Concat::new(1).output_facts(&[&facts[0], &facts[1]]).is_err());
    }
}
