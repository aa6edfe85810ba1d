use ndarray::IxDyn;

use crate::internal::*;

#[derive(Debug, Clone, new, PartialEq)]
pub struct Transpose {
    pub perm: TVec<usize>,
}

impl Transpose {
    fn is_identity(&self) -> bool {
        self.perm.iter().enumerate().all(|(ix, p)| ix == *p)
    }

    fn check(&self, rank: usize) -> ExportResult<()> {
        let mut sorted = self.perm.clone();
        sorted.sort();
        ensure!(
            sorted.iter().copied().eq(0..rank),
            "Transpose permutation {:?} is invalid for rank {}",
            self.perm,
            rank
        );
        Ok(())
    }
}

impl Op for Transpose {
    fn name(&self) -> Cow<'_, str> {
        "Transpose".into()
    }

    fn info(&self) -> ExportResult<Vec<String>> {
        Ok(vec![format!("perm: {:?}", self.perm)])
    }

    fn eval(&self, inputs: TVec<Arc<Tensor>>) -> ExportResult<TVec<Tensor>> {
        let input = args_1!(inputs);
        self.check(input.rank())?;
        let permuted = input.to_array_view_f32()?.permuted_axes(IxDyn(&self.perm));
        Ok(tvec!(permuted.as_standard_layout().into_owned().into()))
    }

    fn output_facts(&self, inputs: &[&Fact]) -> ExportResult<TVec<Fact>> {
        ensure!(inputs.len() == 1, "Transpose expects one input");
        self.check(inputs[0].rank())?;
        let shape = self.perm.iter().map(|&p| inputs[0].shape[p].clone());
        Ok(tvec!(Fact::dt_shape(inputs[0].datum_type, shape)))
    }

    fn declutter(&self, model: &Graph, node: &Node) -> ExportResult<Option<GraphPatch>> {
        if self.is_identity() {
            return Ok(Some(GraphPatch::shunt_one_op(model, node)?));
        }
        Ok(None)
    }

    /// Two transposes in a row collapse into one.
    fn fuse(&self, model: &Graph, node: &Node) -> ExportResult<Option<GraphPatch>> {
        let prec = model.node(node.inputs[0].node);
        let Some(first) = prec.op_as::<Transpose>() else { return Ok(None) };
        if model.outlet_successors(node.inputs[0]).len() != 1 {
            return Ok(None);
        }
        let fused = Transpose::new(self.perm.iter().map(|&p| first.perm[p]).collect());
        let mut patch = if fused.is_identity() {
            // an output can not be rewired onto a graph input
            let outlet = OutletId::new(node.id, 0);
            if model.outputs.contains(&outlet) && model.inputs.contains(&prec.inputs[0]) {
                return Ok(None);
            }
            let mut patch = GraphPatch::default();
            let tap = patch.tap_model(model, prec.inputs[0])?;
            patch.shunt_outside(model, outlet, tap)?;
            patch
        } else {
            GraphPatch::replace_single_op(model, node, &[prec.inputs[0]], fused)?
        };
        patch.push_context(format!("fuse {} into {}", prec.name, node.name));
        Ok(Some(patch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::binary::Add;
    use crate::plan::SimplePlan;

    #[test]
    fn output_shape() {
        let fact = Fact::f32([1, 85, 8400]);
        let out = Transpose::new(tvec!(0, 2, 1)).output_facts(&[&fact]).unwrap();
        assert!(out[0].same_as(&Fact::f32([1, 8400, 85])));
        assert!(Transpose::new(tvec!(0, 0, 1)).output_facts(&[&fact]).is_err());
    }

    #[test]
    fn consecutive_transposes_fuse() {
        let mut model = Graph::default();
        let x = model.add_source("x", Fact::f32([2, 3, 4])).unwrap();
        let a = model.wire_node("a", Transpose::new(tvec!(1, 2, 0)), &[x]).unwrap();
        let b = model.wire_node("b", Transpose::new(tvec!(0, 2, 1)), &a).unwrap();
        model.set_output_outlets(&b).unwrap();
        let input = Tensor::random_normal(&[2, 3, 4], 1);
        let before = SimplePlan::new(&model).unwrap().run(tvec!(input.clone())).unwrap();

        let node = model.node(b[0].node).clone();
        let patch = node.op.fuse(&model, &node).unwrap().unwrap();
        patch.apply(&mut model).unwrap();
        model.compact().unwrap();

        assert_eq!(model.nodes.len(), 2);
        assert_eq!(model.node(1).op_as::<Transpose>().unwrap().perm.as_slice(), &[1, 0, 2]);
        let after = SimplePlan::new(&model).unwrap().run(tvec!(input)).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn cancelling_transposes_vanish() {
        let mut model = Graph::default();
        let x = model.add_source("x", Fact::f32([2, 3, 4])).unwrap();
        let a = model.wire_node("a", Transpose::new(tvec!(0, 2, 1)), &[x]).unwrap();
        let b = model.wire_node("b", Transpose::new(tvec!(0, 2, 1)), &a).unwrap();
        let y = model.wire_node("y", Add, &[b[0], x]).unwrap();
        model.set_output_outlets(&y).unwrap();

        let node = model.node(b[0].node).clone();
        let patch = node.op.fuse(&model, &node).unwrap().unwrap();
        patch.apply(&mut model).unwrap();
        model.compact().unwrap();

        assert_eq!(model.nodes.len(), 2);
        assert!(model.node(1).op_is::<Add>());
        assert_eq!(model.node(1).inputs.as_slice(), &[model.inputs[0], model.inputs[0]]);
    }

    #[test]
    fn cancelling_transposes_on_the_interface_stay() {
        let mut model = Graph::default();
        let x = model.add_source("x", Fact::f32([2, 3])).unwrap();
        let a = model.wire_node("a", Transpose::new(tvec!(1, 0)), &[x]).unwrap();
        let b = model.wire_node("b", Transpose::new(tvec!(1, 0)), &a).unwrap();
        model.set_output_outlets(&b).unwrap();
        let node = model.node(b[0].node).clone();
        assert!(node.op.fuse(&model, &node).unwrap().is_none());
    }
}
