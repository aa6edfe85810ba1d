//! Evaluation order for nodes.
use anyhow::bail;
use bit_set::BitSet;

use super::{Graph, Node};
use crate::errors::ExportResult;

/// Find an evaluation order for a model, using its default inputs and outputs
/// as boundaries.
pub fn eval_order(model: &Graph) -> ExportResult<Vec<usize>> {
    let inputs = model.input_outlets()?.iter().map(|n| n.node).collect::<Vec<usize>>();
    let targets = model.output_outlets()?.iter().map(|n| n.node).collect::<Vec<usize>>();
    eval_order_for_nodes(model.nodes(), &inputs, &targets)
}

/// Find a working evaluation order for a list of nodes.
///
/// Only the nodes the targets depend on are returned. Fails on cycles.
pub fn eval_order_for_nodes(
    nodes: &[Node],
    model_inputs: &[usize],
    targets: &[usize],
) -> ExportResult<Vec<usize>> {
    let mut done = BitSet::with_capacity(nodes.len());
    let mut order: Vec<usize> = vec![];
    for &target in targets {
        if done.contains(target) {
            continue;
        }
        let mut current_stack: Vec<(usize, usize)> = vec![(target, 0)];
        let mut pending = BitSet::with_capacity(nodes.len());
        while let Some((current_node, current_input)) = current_stack.pop() {
            if model_inputs.contains(&current_node)
                || current_input == nodes[current_node].inputs.len()
            {
                order.push(current_node);
                done.insert(current_node);
                pending.remove(current_node);
            } else {
                let precursor = nodes[current_node].inputs[current_input].node;
                current_stack.push((current_node, current_input + 1));
                if !done.contains(precursor) {
                    if pending.contains(precursor) {
                        bail!("Loop detected: {} depends on itself", nodes[precursor]);
                    }
                    current_stack.push((precursor, 0));
                    pending.insert(precursor);
                }
            }
        }
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use crate::internal::*;
    use crate::ops::binary::Add;

    #[test]
    fn simple() {
        let mut model = Graph::default();
        let a = model.add_source("a", Fact::f32([1])).unwrap();
        let b = model.add_const("b", Tensor::zero(&[1])).unwrap();
        let add = model.wire_node("add", Add, &[a, b]).unwrap()[0];
        model.set_output_outlets(&[add]).unwrap();
        assert_eq!(model.eval_order().unwrap(), vec!(0, 1, 2));
    }

    #[test]
    fn diamond() {
        let mut model = Graph::default();
        let a = model.add_source("a", Fact::f32([1])).unwrap();
        let add = model.wire_node("add", Add, &[a, a]).unwrap()[0];
        model.set_output_outlets(&[add]).unwrap();
        assert_eq!(model.eval_order().unwrap(), vec!(0, 1));
    }

    #[test]
    fn dead_nodes_are_skipped() {
        let mut model = Graph::default();
        let a = model.add_source("a", Fact::f32([1])).unwrap();
        let _dead = model.wire_node("dead", Add, &[a, a]).unwrap();
        let add = model.wire_node("add", Add, &[a, a]).unwrap()[0];
        model.set_output_outlets(&[add]).unwrap();
        assert_eq!(model.eval_order().unwrap(), vec!(0, 2));
    }

    #[test]
    fn loops_are_detected() {
        let mut model = Graph::default();
        let a = model.add_source("a", Fact::f32([1])).unwrap();
        let add = model.wire_node("add", Add, &[a, a]).unwrap()[0];
        let add2 = model.wire_node("add2", Add, &[add, a]).unwrap()[0];
        model.add_edge(add2, InletId::new(add.node, 1)).unwrap();
        model.set_output_outlets(&[add2]).unwrap();
        assert!(model.eval_order().is_err());
    }
}
