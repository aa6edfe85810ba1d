use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, bail, ensure};
use itertools::Itertools;

use super::*;
use crate::TVec;
use crate::errors::ExportResult;
use crate::ops::Op;
use crate::ops::konst::Const;
use crate::ops::source::Source;
use crate::tensor::Tensor;

/// Main model class.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    /// all nodes in the model
    pub nodes: Vec<Node>,
    /// model inputs
    pub inputs: Vec<OutletId>,
    /// model outputs
    pub outputs: Vec<OutletId>,
    /// outlet labels
    pub outlet_labels: HashMap<OutletId, String>,
}

impl Graph {
    pub fn add_source(&mut self, name: impl Into<String>, fact: Fact) -> ExportResult<OutletId> {
        let id = self.add_node(name, Source::new(fact.clone()), tvec!(fact))?;
        let id = OutletId::new(id, 0);
        self.inputs.push(id);
        Ok(id)
    }

    pub fn add_const(
        &mut self,
        name: impl Into<String>,
        v: impl Into<Arc<Tensor>>,
    ) -> ExportResult<OutletId> {
        let v = v.into();
        let fact = Fact::from(v.clone());
        let id = self.add_node(name, Const(v), tvec!(fact))?;
        Ok(OutletId::new(id, 0))
    }

    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        op: impl Into<Box<dyn Op>>,
        output_facts: TVec<Fact>,
    ) -> ExportResult<usize> {
        let op = op.into();
        let name = name.into();
        let id = self.nodes.len();
        let outputs =
            output_facts.into_iter().map(|fact| Outlet { fact, successors: tvec!() }).collect();
        let node = Node { id, name, op, inputs: vec![], outputs };
        self.nodes.push(node);
        Ok(id)
    }

    /// Add a node, computing its output facts from its inputs, and connect it.
    pub fn wire_node(
        &mut self,
        name: impl Into<String>,
        op: impl Into<Box<dyn Op>>,
        inputs: &[OutletId],
    ) -> ExportResult<TVec<OutletId>> {
        let name = name.into();
        let op = op.into();
        let output_facts = {
            let input_facts =
                inputs.iter().map(|o| self.outlet_fact(*o)).collect::<ExportResult<TVec<_>>>()?;
            op.output_facts(&input_facts)
                .with_context(|| format!("wiring {} ({:?}), determining output facts", name, op))?
        };
        let id = self.add_node(name, op, output_facts)?;
        for (ix, i) in inputs.iter().enumerate() {
            self.add_edge(*i, InletId::new(id, ix))?;
        }
        Ok(self.nodes[id].outputs.iter().enumerate().map(|(ix, _)| OutletId::new(id, ix)).collect())
    }

    /// Connect a node outlet to a node inlet.
    pub fn add_edge(&mut self, outlet: OutletId, inlet: InletId) -> ExportResult<()> {
        ensure!(outlet.node < self.nodes.len(), "Invalid outlet {:?}", outlet);
        if let Some(previous) = self.nodes[inlet.node].inputs.get(inlet.slot).cloned() {
            self.nodes[previous.node].outputs[previous.slot]
                .successors
                .retain(|&mut succ| succ != inlet);
        }
        {
            let prec = &mut self.nodes[outlet.node];
            prec.outputs[outlet.slot].successors.push(inlet);
        }
        let succ = &mut self.nodes[inlet.node];
        #[allow(clippy::comparison_chain)]
        if inlet.slot == succ.inputs.len() {
            succ.inputs.push(outlet);
        } else if inlet.slot < succ.inputs.len() {
            succ.inputs[inlet.slot] = outlet;
        } else {
            bail!(
                "Edges must be added in order and consecutive. Trying to connect input {:?} of node {:?} ",
                inlet.slot,
                succ
            )
        }
        Ok(())
    }

    // Inputs

    /// Get model inputs.
    pub fn input_outlets(&self) -> ExportResult<&[OutletId]> {
        Ok(&self.inputs)
    }

    /// Change model inputs.
    pub fn set_input_outlets(&mut self, inputs: &[OutletId]) -> ExportResult<()> {
        self.inputs = inputs.to_vec();
        Ok(())
    }

    /// Get the `ix`-th input tensor type information.
    pub fn input_fact(&self, ix: usize) -> ExportResult<&Fact> {
        let input = *self.inputs.get(ix).with_context(|| format!("No input #{ix}"))?;
        self.outlet_fact(input)
    }

    // Outputs

    /// Get model outputs.
    pub fn output_outlets(&self) -> ExportResult<&[OutletId]> {
        Ok(&self.outputs)
    }

    /// Change model outputs.
    pub fn set_output_outlets(&mut self, outputs: &[OutletId]) -> ExportResult<()> {
        self.outputs = outputs.to_vec();
        Ok(())
    }

    /// Get the `ix`-th output tensor type information.
    pub fn output_fact(&self, ix: usize) -> ExportResult<&Fact> {
        let output = *self.outputs.get(ix).with_context(|| format!("No output #{ix}"))?;
        self.outlet_fact(output)
    }

    // nodes and their facts

    pub fn node_id_by_name(&self, name: &str) -> ExportResult<usize> {
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .map(|n| n.id)
            .with_context(|| format!("No node found for name: \"{name}\""))
    }

    /// Find a node by its name.
    pub fn node_by_name(&self, name: impl AsRef<str>) -> ExportResult<&Node> {
        let id: usize = self.node_id_by_name(name.as_ref())?;
        Ok(&self.nodes[id])
    }

    /// Find a node by its id.
    pub fn node(&self, id: usize) -> &Node {
        &self.nodes[id]
    }

    /// Find a node by its id.
    pub fn node_mut(&mut self, id: usize) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Access the nodes table.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Get input tensor information for a node.
    pub fn node_input_facts(&self, node_id: usize) -> ExportResult<TVec<&Fact>> {
        self.nodes[node_id].inputs.iter().map(|o| self.outlet_fact(*o)).collect()
    }

    /// Get output tensor information for a node.
    pub fn node_output_facts(&self, node_id: usize) -> ExportResult<TVec<&Fact>> {
        Ok(self.nodes[node_id].outputs.iter().map(|o| &o.fact).collect())
    }

    // outlets

    /// Get tensor information for a single outlet.
    pub fn outlet_fact(&self, outlet: OutletId) -> ExportResult<&Fact> {
        ensure!(outlet.node < self.nodes.len(), "Invalid outlet for graph");
        let outlets = &self.nodes[outlet.node].outputs;
        outlets
            .get(outlet.slot)
            .map(|o| &o.fact)
            .with_context(|| format!("Invalid outlet reference: {outlet:?}"))
    }

    /// Set tensor information for a single outlet.
    pub fn set_outlet_fact(&mut self, outlet: OutletId, fact: Fact) -> ExportResult<()> {
        let outlets = &mut self.nodes[outlet.node].outputs;
        if outlets.len() <= outlet.slot {
            bail!("Invalid outlet refererence: {:?}", outlet)
        }
        outlets[outlet.slot].fact = fact;
        Ok(())
    }

    pub fn outlet_successors(&self, outlet: OutletId) -> &[InletId] {
        &self.nodes[outlet.node].outputs[outlet.slot].successors
    }

    // outlet labels

    /// Get label for an outlet.
    pub fn outlet_label(&self, outlet: OutletId) -> Option<&str> {
        self.outlet_labels.get(&outlet).map(|s| &**s)
    }

    /// Set label for an outlet.
    pub fn set_outlet_label(&mut self, outlet: OutletId, label: String) -> ExportResult<()> {
        self.outlet_labels.insert(outlet, label);
        Ok(())
    }

    /// Find outlet by label.
    pub fn find_outlet_label(&self, label: &str) -> Option<OutletId> {
        self.outlet_labels.iter().find(|(_k, v)| **v == label).map(|(k, _v)| *k)
    }

    // misc

    /// Computes an evalutation order for the graph inputs and outputs
    pub fn eval_order(&self) -> ExportResult<Vec<usize>> {
        super::order::eval_order(self)
    }

    /// Performs a sanity check on network connections.
    pub fn check_edges(&self) -> ExportResult<()> {
        for node_id in self.eval_order()? {
            let node = &self.nodes[node_id];
            for (ix, input) in node.inputs.iter().enumerate() {
                let prec = &self.nodes[input.node];
                if !prec.outputs[input.slot].successors.contains(&InletId::new(node.id, ix)) {
                    bail!(
                        "Mismatched oncoming edge, node:{} input:{} to {:?} not reciprocated",
                        node.id,
                        ix,
                        prec
                    )
                }
            }
            for (ix, output) in node.outputs.iter().enumerate() {
                for succ in &output.successors {
                    if self.nodes[succ.node].inputs[succ.slot] != OutletId::new(node.id, ix) {
                        bail!(
                            "Mismatched outgoing edge, node:{} output:{} to {:?} not reciprocated",
                            node.id,
                            ix,
                            succ
                        )
                    }
                }
            }
        }
        Ok(())
    }

    /// Recompute every fact from the inputs facts and compare with what is
    /// recorded on the outlets.
    pub fn check_facts(&self) -> ExportResult<()> {
        for node_id in self.eval_order()? {
            let node = &self.nodes[node_id];
            if self.inputs.contains(&OutletId::new(node_id, 0)) {
                continue;
            }
            let inputs = self.node_input_facts(node_id)?;
            let computed = node.op.output_facts(&inputs).with_context(|| format!("Node {node}"))?;
            ensure!(
                computed.len() == node.outputs.len(),
                "Node {} has {} outputs, its operator produces {}",
                node,
                node.outputs.len(),
                computed.len()
            );
            for (ix, (c, o)) in computed.iter().zip(node.outputs.iter()).enumerate() {
                ensure!(
                    c.compatible_with(&o.fact),
                    "Node {} output #{}: recorded {:?}, computed {:?}",
                    node,
                    ix,
                    o.fact,
                    c
                );
            }
        }
        Ok(())
    }

    pub fn single_prec(&self, id: usize) -> ExportResult<Option<&Node>> {
        let node = &self.nodes()[id];
        if node.inputs.len() != 1 {
            return Ok(None);
        }
        let prec = &self.nodes()[node.inputs[0].node];
        if prec.outputs.iter().map(|of| of.successors.len()).sum::<usize>() != 1 {
            return Ok(None);
        }
        Ok(Some(prec))
    }

    /// single_succ is only intended for optimisation of simple operators
    /// with 1 output, and only 1 output successors
    pub fn single_succ(&self, id: usize) -> ExportResult<Option<&Node>> {
        let node = &self.nodes()[id];
        if node.outputs.len() != 1 || node.outputs[0].successors.len() != 1 {
            return Ok(None);
        }
        let succ = node.outputs[0].successors[0];
        Ok(Some(&self.nodes()[succ.node]))
    }

    /// generates a name for a new node in the model that will not conflict (by suffixing with a
    /// underscore and number)
    pub fn unique_name<'n>(&self, prefix: impl Into<Cow<'n, str>>) -> Cow<'n, str> {
        let prefix = prefix.into();
        if self.nodes.iter().all(|n| n.name != *prefix) {
            return prefix;
        }
        (1..)
            .map(|i| format!("{prefix}_{i}"))
            .find(|s| self.nodes.iter().all(|n| n.name != *s))
            .map(Cow::Owned)
            .unwrap_or(prefix)
    }

    /// Count nodes reachable from the outputs, per operator name.
    pub fn op_histogram(&self) -> ExportResult<Vec<(String, usize)>> {
        let order = self.eval_order()?;
        Ok(order
            .iter()
            .map(|&n| self.nodes[n].op.name().to_string())
            .sorted()
            .dedup_with_count()
            .map(|(count, name)| (name, count))
            .collect())
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        for node in &self.nodes {
            let inputs = node.inputs.iter().map(|o| format!("{o:?}")).join(" ");
            let facts =
                node.outputs.iter().map(|o| format!("{:?}", o.fact.without_value())).join(" ; ");
            writeln!(
                fmt,
                "{:5} | {:20} | {:25} {:50} => {}",
                node.id,
                inputs,
                node.op.name(),
                node.name,
                facts
            )?;
        }
        writeln!(fmt, "outputs: {}", self.outputs.iter().map(|o| format!("{o:?}")).join(", "))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::binary::{Add, Mul};
    use crate::ops::element_wise::Sigmoid;

    fn simple() -> Graph {
        let mut model = Graph::default();
        let x = model.add_source("x", Fact::f32([2, 3])).unwrap();
        let s = model.wire_node("s", Sigmoid, &[x]).unwrap();
        let m = model.wire_node("m", Mul, &[x, s[0]]).unwrap();
        model.set_output_outlets(&m).unwrap();
        model
    }

    #[test]
    fn wire_node_computes_facts() {
        let model = simple();
        assert!(model.output_fact(0).unwrap().same_as(&Fact::f32([2, 3])));
        assert_eq!(model.outlet_successors(OutletId::new(0, 0)).len(), 2);
        model.check_edges().unwrap();
        model.check_facts().unwrap();
    }

    #[test]
    fn wire_node_rejects_bad_shapes() {
        let mut model = Graph::default();
        let x = model.add_source("x", Fact::f32([2, 3])).unwrap();
        let y = model.add_source("y", Fact::f32([4])).unwrap();
        assert!(model.wire_node("add", Add, &[x, y]).is_err());
    }

    #[test]
    fn unique_names() {
        let model = simple();
        assert_eq!(model.unique_name("z"), "z");
        assert_eq!(model.unique_name("m"), "m_1");
    }

    #[test]
    fn histogram() {
        let model = simple();
        let h = model.op_histogram().unwrap();
        assert_eq!(
            h,
            vec![("Mul".to_string(), 1), ("Sigmoid".to_string(), 1), ("Source".to_string(), 1)]
        );
    }
}
