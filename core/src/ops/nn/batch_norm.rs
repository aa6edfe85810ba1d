use ndarray::{Array1, ArrayD, Axis, Ix4};

use crate::internal::*;
use crate::ops::cnn::Conv;

/// Inference-mode batch normalization over axis 1.
///
/// Inputs are X, scale, bias, running mean and running variance.
#[derive(Debug, Clone, new, PartialEq)]
pub struct BatchNorm {
    pub epsilon: f32,
}

impl BatchNorm {
    /// Per-channel slope and intercept: y = slope * x + intercept.
    pub fn coefficients(
        &self,
        scale: &Tensor,
        beta: &Tensor,
        mean: &Tensor,
        var: &Tensor,
    ) -> ExportResult<(Array1<f32>, Array1<f32>)> {
        let flat = |t: &Tensor| -> ExportResult<Array1<f32>> {
            Ok(t.as_f32()?.to_shape((t.len(),))?.into_owned())
        };
        let (scale, beta, mean, var) = (flat(scale)?, flat(beta)?, flat(mean)?, flat(var)?);
        ensure!(
            scale.len() == beta.len() && beta.len() == mean.len() && mean.len() == var.len(),
            "BatchNorm parameters must have the same length"
        );
        let slope = &scale / &var.mapv(|v| (v + self.epsilon).sqrt());
        let intercept = &beta - &(&mean * &slope);
        Ok((slope, intercept))
    }

    /// Fold the normalization into the preceding convolution.
    fn fold_into_conv(&self, model: &Graph, node: &Node) -> ExportResult<Option<GraphPatch>> {
        let conv_node = model.node(node.inputs[0].node);
        let Some(conv) = conv_node.op_as::<Conv>() else { return Ok(None) };
        if model.outlet_successors(node.inputs[0]).len() != 1 {
            return Ok(None);
        }
        let bn_facts = model.node_input_facts(node.id)?;
        let conv_facts = model.node_input_facts(conv_node.id)?;
        let (Some(scale), Some(beta), Some(mean), Some(var)) = (
            bn_facts[1].konst.as_ref(),
            bn_facts[2].konst.as_ref(),
            bn_facts[3].konst.as_ref(),
            bn_facts[4].konst.as_ref(),
        ) else {
            return Ok(None);
        };
        let Some(kernel) = conv_facts[1].konst.as_ref() else { return Ok(None) };
        let bias = match conv_facts.get(2) {
            Some(fact) => match fact.konst.as_ref() {
                Some(b) => Some(b),
                None => return Ok(None),
            },
            None => None,
        };

        let (slope, intercept) = self.coefficients(scale, beta, mean, var)?;
        let mut kernel = kernel.as_f32()?.clone().into_dimensionality::<Ix4>()?;
        ensure!(kernel.shape()[0] == slope.len(), "BatchNorm does not match Conv outputs");
        for (mut filter, s) in kernel.axis_iter_mut(Axis(0)).zip(slope.iter()) {
            filter.mapv_inplace(|w| w * s);
        }
        let new_bias = match bias {
            Some(b) => &b.as_f32()?.to_shape((slope.len(),))?.to_owned() * &slope + &intercept,
            None => intercept,
        };

        let mut patch = GraphPatch::new(format!("fold {} into {}", node.name, conv_node.name));
        let weight_name = model.node(conv_node.inputs[1].node).name.clone();
        let bias_name = match conv_node.inputs.get(2) {
            Some(b) => model.node(b.node).name.clone(),
            None => model.node(node.inputs[2].node).name.clone(),
        };
        let x = patch.tap_model(model, conv_node.inputs[0])?;
        let kernel = patch.add_const(weight_name, Tensor::from(kernel.into_dyn()))?;
        let bias = patch.add_const(bias_name, Tensor::from(new_bias.into_dyn()))?;
        let fused = patch.wire_node(&*conv_node.name, conv.clone(), &[x, kernel, bias])?;
        patch.shunt_outside(model, OutletId::new(node.id, 0), fused[0])?;
        Ok(Some(patch))
    }
}

impl Op for BatchNorm {
    fn name(&self) -> Cow<'_, str> {
        "BatchNormalization".into()
    }

    fn info(&self) -> ExportResult<Vec<String>> {
        Ok(vec![format!("epsilon: {}", self.epsilon)])
    }

    fn eval(&self, inputs: TVec<Arc<Tensor>>) -> ExportResult<TVec<Tensor>> {
        let (x, scale, beta, mean, var) = args_5!(inputs);
        let (slope, intercept) = self.coefficients(&scale, &beta, &mean, &var)?;
        let mut x: ArrayD<f32> = crate::ops::into_tensor(x).into_f32()?;
        ensure!(x.ndim() >= 2 && x.shape()[1] == slope.len(), "BatchNorm: channel mismatch");
        for (c, mut channel) in x.axis_iter_mut(Axis(1)).enumerate() {
            channel.mapv_inplace(|v| v * slope[c] + intercept[c]);
        }
        Ok(tvec!(x.into()))
    }

    fn output_facts(&self, inputs: &[&Fact]) -> ExportResult<TVec<Fact>> {
        ensure!(inputs.len() == 5, "BatchNormalization expects five inputs");
        let x = inputs[0];
        ensure!(x.rank() >= 2, "BatchNormalization input must have a channel axis");
        for param in &inputs[1..] {
            ensure!(
                param.rank() == 1 && param.shape[0] == x.shape[1],
                "BatchNormalization parameter {:?} does not match input {:?}",
                param,
                x
            );
        }
        Ok(tvec!(x.without_value()))
    }

    fn fuse(&self, model: &Graph, node: &Node) -> ExportResult<Option<GraphPatch>> {
        self.fold_into_conv(model, node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::SimplePlan;

    #[test]
    fn fold_preserves_output() {
        let mut model = Graph::default();
        let x = model.add_source("images", Fact::f32([1, 3, 8, 8])).unwrap();
        let w = model.add_const("conv.weight", Tensor::random_normal(&[4, 3, 3, 3], 1)).unwrap();
        let conv = Conv { pads: [1; 4], ..Conv::default() };
        let c = model.wire_node("/conv/Conv", conv, &[x, w]).unwrap();
        let scale = model.add_const("bn.weight", Tensor::random_normal(&[4], 2)).unwrap();
        let beta = model.add_const("bn.bias", Tensor::random_normal(&[4], 3)).unwrap();
        let mean = model.add_const("bn.running_mean", Tensor::random_normal(&[4], 4)).unwrap();
        let var = Tensor::from(ndarray::arr1(&[0.5f32, 1.0, 2.0, 4.0]).into_dyn());
        let var = model.add_const("bn.running_var", var).unwrap();
        let bn = BatchNorm::new(1e-3);
        let bn = model.wire_node("/bn/BatchNormalization", bn, &[c[0], scale, beta, mean, var]);
        let bn = bn.unwrap();
        model.set_output_outlets(&bn).unwrap();

        let input = Tensor::random_normal(&[1, 3, 8, 8], 5);
        let before = SimplePlan::new(&model).unwrap().run(tvec!(input.clone())).unwrap();

        let node = model.node(bn[0].node).clone();
        let patch = node.op.fuse(&model, &node).unwrap().unwrap();
        patch.apply(&mut model).unwrap();
        model.compact().unwrap();

        assert!(model.nodes.iter().all(|n| !n.op_is::<BatchNorm>()));
        assert!(model.node_by_name("bn.bias").is_ok());
        let after = SimplePlan::new(&model).unwrap().run(tvec!(input)).unwrap();
        after[0].close_enough(&before[0], 1e-4, 1e-5).unwrap();
    }
}
