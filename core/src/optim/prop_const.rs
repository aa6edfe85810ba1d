use crate::internal::*;
use crate::ops::konst::Const;

/// Evaluate nodes whose inputs are all constant, and replace them with their
/// value.
#[derive(Clone, Debug)]
pub struct PropConst;

impl super::GraphPass for PropConst {
    fn reset(&mut self) -> ExportResult<()> {
        Ok(())
    }

    fn next(&mut self, model: &Graph) -> ExportResult<Option<GraphPatch>> {
        for id in model.eval_order()? {
            let node = model.node(id);
            if !node.op.is_stateless() || node.op_is::<Const>() || node.inputs.is_empty() {
                continue;
            }
            let Some(inputs) = model
                .node_input_facts(id)?
                .iter()
                .map(|f| f.konst.clone())
                .collect::<Option<TVec<_>>>()
            else {
                continue;
            };
            let outputs = node.op.eval(inputs).context("Eager eval during optimisation")?;
            let mut patch = GraphPatch::default();
            for (ix, output) in outputs.into_iter().enumerate() {
                let name = if node.outputs.len() == 1 {
                    node.name.clone()
                } else {
                    format!("{}.{}", node.name, ix)
                };
                let wire = patch.add_const(name, output)?;
                patch.shunt_outside(model, OutletId::new(id, ix), wire)?;
            }
            return Ok(Some(patch));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use crate::internal::*;
    use crate::ops::array::Concat;
    use crate::ops::binary::Add;
    use crate::ops::konst::Const;
    use crate::optim::Optimizer;

    #[test]
    fn folds_constant_subgraph() {
        let mut model = Graph::default();
        let x = model.add_source("x", Fact::f32([4])).unwrap();
        let a = model.add_const("a", Tensor::from(ndarray::arr1(&[1f32, 2.0]).into_dyn())).unwrap();
        let b = model.add_const("b", Tensor::from(ndarray::arr1(&[3f32, 4.0]).into_dyn())).unwrap();
        let ab = model.wire_node("ab", Concat::new(0), &[a, b]).unwrap();
        let y = model.wire_node("y", Add, &[x, ab[0]]).unwrap();
        model.set_output_outlets(&y).unwrap();
        Optimizer::declutter().optimize(&mut model).unwrap();
        assert_eq!(model.nodes.len(), 3);
        let folded = model.node_by_name("ab").unwrap();
        let Some(Const(value)) = folded.op_as::<Const>() else { panic!() };
        assert_eq!(value.as_f32().unwrap().as_slice().unwrap(), &[1.0, 2.0, 3.0, 4.0]);
    }
}
