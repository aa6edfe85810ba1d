use anyhow::{Context, ensure};

use super::*;
use crate::errors::ExportResult;
use crate::ops::source::Source;

impl Graph {
    /// Renumber nodes in evaluation order, dropping every node the outputs do
    /// not depend on. Inputs are kept even when unused.
    pub fn compact(&mut self) -> ExportResult<()> {
        let mut order = self.eval_order()?;
        if order.len() == self.nodes.len() && order.iter().enumerate().all(|(a, b)| a == *b) {
            return Ok(());
        }
        for i in &self.inputs {
            if !order.contains(&i.node) {
                order.push(i.node);
            }
        }
        let mut old_to_new = vec![usize::MAX; self.nodes.len()];
        for (ix, id) in order.iter().enumerate() {
            old_to_new[*id] = ix;
        }
        let mut old_nodes: Vec<Option<Node>> =
            std::mem::take(&mut self.nodes).into_iter().map(Some).collect();
        let mut new_nodes = Vec::with_capacity(order.len());
        for id in &order {
            let mut node =
                old_nodes[*id].take().with_context(|| format!("Node #{id} ordered twice"))?;
            if self.inputs.iter().any(|n| n.node == node.id) && !node.op_is::<Source>() {
                node.inputs.clear();
                node.op = Box::new(Source::new(node.outputs[0].fact.clone()));
            }
            node.id = old_to_new[node.id];
            for input in &mut node.inputs {
                ensure!(old_to_new[input.node] < order.len(), "Dangling input in {}", node.name);
                input.node = old_to_new[input.node];
            }
            for output in &mut node.outputs {
                output.successors.retain(|s| old_to_new[s.node] < order.len());
                for succ in &mut output.successors {
                    succ.node = old_to_new[succ.node];
                }
                output.successors.sort();
            }
            new_nodes.push(node);
        }
        let dropped = old_nodes.iter().flatten().count();
        if dropped > 0 {
            debug!("Compaction dropped {} unreachable node(s)", dropped);
        }
        self.nodes = new_nodes;
        for input in &mut self.inputs {
            input.node = old_to_new[input.node];
        }
        for output in &mut self.outputs {
            ensure!(old_to_new[output.node] < order.len(), "Output not in evaluation order");
            output.node = old_to_new[output.node];
        }
        self.outlet_labels = std::mem::take(&mut self.outlet_labels)
            .into_iter()
            .filter(|(k, _)| old_to_new[k.node] < order.len())
            .map(|(k, v)| (OutletId::new(old_to_new[k.node], k.slot), v))
            .collect();
        ensure!(self.nodes.iter().enumerate().all(|(ix, n)| n.id == ix));
        Ok(())
    }

    pub fn into_compact(mut self) -> ExportResult<Self> {
        self.compact()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use crate::internal::*;
    use crate::ops::binary::{Add, Mul};

    #[test]
    fn compact_drops_dead_branches() {
        let mut model = Graph::default();
        let a = model.add_source("a", Fact::f32([2])).unwrap();
        let unused = model.add_const("unused", Tensor::zero(&[2])).unwrap();
        let _dead = model.wire_node("dead", Mul, &[a, unused]).unwrap();
        let add = model.wire_node("add", Add, &[a, a]).unwrap();
        model.set_output_outlets(&add).unwrap();
        model.set_outlet_label(add[0], "output".into()).unwrap();
        model.compact().unwrap();
        assert_eq!(model.nodes.len(), 2);
        assert_eq!(model.node(1).name, "add");
        assert_eq!(model.outlet_successors(OutletId::new(0, 0)).len(), 2);
        assert_eq!(model.outlet_label(OutletId::new(1, 0)), Some("output"));
        model.check_edges().unwrap();
    }

    #[test]
    fn compact_keeps_unused_inputs() {
        let mut model = Graph::default();
        let a = model.add_source("a", Fact::f32([2])).unwrap();
        let _b = model.add_source("b", Fact::f32([2])).unwrap();
        let add = model.wire_node("add", Add, &[a, a]).unwrap();
        model.set_output_outlets(&add).unwrap();
        model.compact().unwrap();
        assert_eq!(model.inputs.len(), 2);
        assert_eq!(model.node(model.inputs[1].node).name, "b");
    }
}
