use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use anyhow::bail;

use super::*;
use crate::TVec;
use crate::errors::ExportResult;
use crate::ops::Op;
use crate::ops::source::Source;

/// A change to apply to a graph.
///
/// Actually structured around a graph that represent the new nodes to be
/// inserted, plus information about how to connect these new nodes to the
/// pre-existing graph.
#[derive(Clone, Debug, Default)]
pub struct GraphPatch {
    /// patch label for auditing and debugging
    pub context: Vec<String>,
    /// the graph-like 'patch' of nodes to add to the graph
    pub model: Graph,
    /// map of patch inputs to graph wires
    pub incoming: HashMap<OutletId, OutletId>,
    /// map of old wires to be replaced by new wires
    pub shunt_outlet_by: HashMap<OutletId, OutletId>,
}

impl Deref for GraphPatch {
    type Target = Graph;
    fn deref(&self) -> &Graph {
        &self.model
    }
}

impl DerefMut for GraphPatch {
    fn deref_mut(&mut self) -> &mut Graph {
        &mut self.model
    }
}

impl GraphPatch {
    pub fn new(s: impl Into<String>) -> Self {
        Self::default().with_context(s)
    }

    pub fn push_context(&mut self, s: impl Into<String>) {
        self.context.push(s.into());
    }

    pub fn with_context(mut self, s: impl Into<String>) -> Self {
        self.context.push(s.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.model.nodes.is_empty() && self.shunt_outlet_by.is_empty()
    }

    /// Draw a tap from a preexisting node.
    ///
    /// returns an OutletId usable in the little "patch" graph
    pub fn tap_model(&mut self, model: &Graph, outlet: OutletId) -> ExportResult<OutletId> {
        let fact = model.outlet_fact(outlet)?.clone();
        let id = self.add_source(format!("incoming-{}/{}", outlet.node, outlet.slot), fact)?;
        self.incoming.insert(id, outlet);
        Ok(id)
    }

    /// Replace an Outlet in the target graph by one from the patch.
    pub fn shunt_outside(
        &mut self,
        model: &Graph,
        outlet: OutletId,
        by: OutletId,
    ) -> ExportResult<()> {
        let original_fact = model.outlet_fact(outlet)?;
        let new_fact = self.model.outlet_fact(by)?;
        if !original_fact.compatible_with(new_fact) {
            bail!("Trying to substitute a {:?} by {:?}.\n{:?}", original_fact, new_fact, self);
        }
        self.shunt_outlet_by.insert(outlet, by);
        Ok(())
    }

    /// Convenience method creating a patch that replace a single operation.
    pub fn replace_single_op(
        patched_model: &Graph,
        node: &Node,
        inputs: &[OutletId],
        new_op: impl Into<Box<dyn Op>>,
    ) -> ExportResult<GraphPatch> {
        let mut patch = GraphPatch::default();
        let taps = inputs
            .iter()
            .map(|i| patch.tap_model(patched_model, *i))
            .collect::<ExportResult<TVec<_>>>()?;
        let by = patch.wire_node(&*node.name, new_op, &taps)?;
        for (ix, by) in by.iter().enumerate() {
            patch.shunt_outside(patched_model, OutletId::new(node.id, ix), *by)?;
        }
        Ok(patch)
    }

    /// Convenience method creating a patch that shunt the given node.
    pub fn shunt_one_op(patched_model: &Graph, node: &Node) -> ExportResult<GraphPatch> {
        let mut patch = GraphPatch::default();
        let tap = patch.tap_model(patched_model, node.inputs[0])?;
        patch.shunt_outside(patched_model, OutletId::new(node.id, 0), tap)?;
        Ok(patch)
    }

    /// Apply all changes in the patch to the target graph.
    ///
    /// Replaced nodes are left disconnected in the target. They disappear at
    /// the next compaction.
    pub fn apply(self, target: &mut Graph) -> ExportResult<()> {
        let GraphPatch { model: patch, incoming: mut mapping, shunt_outlet_by, .. } = self;
        let mut all_inputs = HashMap::new(); // new_node_id_in_model -> [ patch_outlet_id ]
        for node in patch.nodes {
            if node.op_is::<Source>() && mapping.contains_key(&OutletId::new(node.id, 0)) {
                // this is a tap
                continue;
            }
            let Node { id, name, inputs, op, outputs } = node;
            let n_outputs = outputs.len();
            let facts = outputs.into_iter().map(|of| of.fact).collect();
            let added_node_id = target.add_node(name, op, facts)?;
            for ix in 0..n_outputs {
                mapping.insert(OutletId::new(id, ix), OutletId::new(added_node_id, ix));
            }
            all_inputs.insert(added_node_id, inputs);
        }
        for (outlet, by) in shunt_outlet_by {
            let fixed_by = mapping[&by];
            let succs = target.nodes()[outlet.node].outputs[outlet.slot].successors.clone();
            for succ in succs {
                target.add_edge(fixed_by, succ)?;
            }
            for o in target.outputs.iter_mut() {
                if *o == outlet {
                    *o = fixed_by;
                }
            }
            if let Some(label) = target.outlet_label(outlet).map(|s| s.to_string()) {
                target.set_outlet_label(fixed_by, label)?;
            }
        }
        for (node, inputs) in all_inputs {
            for (ix, input) in inputs.into_iter().enumerate() {
                target.add_edge(mapping[&input], InletId::new(node, ix))?;
            }
        }
        Ok(())
    }
}
