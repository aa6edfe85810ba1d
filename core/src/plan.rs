//! Straightforward graph interpreter.
use std::borrow::Borrow;

use crate::internal::*;
use crate::model::order::eval_order_for_nodes;

#[derive(Debug, Clone)]
pub struct SimplePlan<M>
where
    M: Borrow<Graph>,
{
    pub model: M,
    pub outputs: Vec<OutletId>,
    pub order: Vec<usize>,
    /// For each node, the last step using one of its outputs.
    flush_lists: Vec<TVec<usize>>,
}

impl<M> SimplePlan<M>
where
    M: Borrow<Graph>,
{
    /// This contructor returns a plan that will compute all the model default outputs in one pass.
    pub fn new(model: M) -> ExportResult<SimplePlan<M>> {
        let outputs = model.borrow().output_outlets()?.to_vec();
        Self::new_for_outputs(model, &outputs)
    }

    /// This contructor returns a plan that will compute all specified outputs in one pass.
    pub fn new_for_outputs(model: M, outputs: &[OutletId]) -> ExportResult<SimplePlan<M>> {
        let graph = model.borrow();
        let inputs = graph.input_outlets()?.iter().map(|n| n.node).collect::<Vec<usize>>();
        let outputs_nodes = outputs.iter().map(|n| n.node).collect::<Vec<usize>>();
        let order = eval_order_for_nodes(graph.nodes(), &inputs, &outputs_nodes)?;
        let mut values_needed_until_step = vec![0; graph.nodes().len()];
        for (step, n) in order.iter().enumerate() {
            for i in &graph.node(*n).inputs {
                values_needed_until_step[i.node] = step;
            }
        }
        for o in outputs.iter() {
            values_needed_until_step[o.node] = order.len();
        }
        let mut flush_lists: Vec<TVec<usize>> = vec![tvec!(); order.len() + 1];
        for (node, &flush_at) in values_needed_until_step.iter().enumerate() {
            if flush_at != 0 {
                flush_lists[flush_at].push(node)
            }
        }
        Ok(SimplePlan { model, order, outputs: outputs.to_vec(), flush_lists })
    }

    pub fn model(&self) -> &Graph {
        self.model.borrow()
    }

    /// Run the graph, feeding inputs in the order of the model inputs.
    pub fn run(&self, inputs: TVec<Tensor>) -> ExportResult<TVec<Tensor>> {
        let model = self.model();
        ensure!(
            inputs.len() == model.inputs.len(),
            "Expected {} inputs, got {}",
            model.inputs.len(),
            inputs.len()
        );
        let mut values: Vec<Option<TVec<Arc<Tensor>>>> = vec![None; model.nodes().len()];
        for (ix, (outlet, input)) in model.inputs.iter().zip(inputs).enumerate() {
            let fact = model.outlet_fact(*outlet)?;
            ensure!(
                fact.compatible_with(&Fact::for_tensor(&input)),
                "Input #{} ({}) expects {:?}, got {:?}",
                ix,
                model.node(outlet.node).name,
                fact,
                input
            );
            values[outlet.node] = Some(tvec!(Arc::new(input)));
        }
        for (step, &n) in self.order.iter().enumerate() {
            let node = model.node(n);
            if values[n].is_none() {
                trace!("Running step {}, node {}", step, node);
                let inputs = node
                    .inputs
                    .iter()
                    .map(|i| {
                        values[i.node]
                            .as_ref()
                            .and_then(|v| v.get(i.slot))
                            .cloned()
                            .with_context(|| format!("Missing value for {:?}", i))
                    })
                    .collect::<ExportResult<TVec<_>>>()?;
                let outputs =
                    node.op.eval(inputs).with_context(|| format!("Evaluating {node}"))?;
                ensure!(
                    outputs.len() == node.outputs.len(),
                    "Evaluating {}: expected {} outputs, got {}",
                    node,
                    node.outputs.len(),
                    outputs.len()
                );
                values[n] = Some(outputs.into_iter().map(Arc::new).collect());
            }
            for flush in &self.flush_lists[step] {
                trace!("Clearing value of {}", model.node(*flush));
                values[*flush] = None;
            }
        }
        self.outputs
            .iter()
            .map(|o| {
                let v = values[o.node].as_ref().and_then(|v| v.get(o.slot));
                let v = v.with_context(|| format!("Output {:?} was not computed", o))?;
                Ok((**v).clone())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::binary::Add;
    use crate::ops::element_wise::Relu;

    #[test]
    fn checks_inputs() {
        let mut model = Graph::default();
        let x = model.add_source("x", Fact::f32([2])).unwrap();
        let r = model.wire_node("relu", Relu, &[x]).unwrap();
        model.set_output_outlets(&r).unwrap();
        let plan = SimplePlan::new(&model).unwrap();
        assert!(plan.run(tvec!(Tensor::zero(&[3]))).is_err());
        assert!(plan.run(tvec!()).is_err());
        let out = plan.run(tvec!(Tensor::from(ndarray::arr1(&[-1f32, 1.0]).into_dyn()))).unwrap();
        assert_eq!(out[0].as_f32().unwrap().as_slice().unwrap(), &[0.0, 1.0]);
    }

    #[test]
    fn values_are_kept_for_late_consumers() {
        let mut model = Graph::default();
        let x = model.add_source("x", Fact::f32([1])).unwrap();
        let a = model.wire_node("a", Relu, &[x]).unwrap()[0];
        let b = model.wire_node("b", Relu, &[a]).unwrap()[0];
        let c = model.wire_node("c", Add, &[a, b]).unwrap()[0];
        model.set_output_outlets(&[c, a]).unwrap();
        let out = SimplePlan::new(&model)
            .unwrap()
            .run(tvec!(Tensor::from(ndarray::arr1(&[2f32]).into_dyn())))
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_f32().unwrap().as_slice().unwrap(), &[4.0]);
        assert_eq!(out[1].as_f32().unwrap().as_slice().unwrap(), &[2.0]);
    }
}
