use crate::internal::*;

use super::{EquivalenceCheck, Optimizer};

/// Constant folding and declutter rules, followed by a numerical check
/// against the input graph.
#[derive(Debug, Clone, Default)]
pub struct Simplifier {
    pub check: EquivalenceCheck,
}

impl Simplifier {
    pub fn new(check: EquivalenceCheck) -> Simplifier {
        Simplifier { check }
    }

    /// Returns the simplified graph and whether it still computes the same
    /// outputs.
    pub fn simplify(&self, model: &Graph) -> ExportResult<(Graph, bool)> {
        let mut simplified = model.clone();
        Optimizer::declutter().optimize(&mut simplified)?;
        simplified.check_facts().context("Checking facts after simplification")?;
        let before = model.nodes.len();
        let after = simplified.nodes.len();
        debug!("Simplification: {before} nodes -> {after} nodes");
        let ok = self.check.check(model, &simplified)?;
        Ok((simplified, ok))
    }
}
