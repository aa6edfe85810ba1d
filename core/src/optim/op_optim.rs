use crate::internal::*;

/// Apply an op-local rewrite rule to every node, in evaluation order.
#[derive(Clone)]
pub struct OpOptim(
    pub &'static str,
    pub fn(op: &dyn Op, model: &Graph, node: &Node) -> ExportResult<Option<GraphPatch>>,
    pub usize,
);

impl OpOptim {
    fn full_pass(&mut self, new: &Graph) -> ExportResult<Option<GraphPatch>> {
        for (ix, &id) in new.eval_order()?.iter().enumerate().skip(self.2) {
            let node = &new.nodes()[id];
            let patch = (self.1)(node.op.as_ref(), new, node)
                .with_context(|| format!("{self:?} node {node}"))?;
            if let Some(mut p) = patch {
                p.push_context(format!("{self:?} {node}"));
                self.2 = ix;
                return Ok(Some(p));
            }
        }
        Ok(None)
    }
}

impl std::fmt::Debug for OpOptim {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

impl super::GraphPass for OpOptim {
    fn reset(&mut self) -> ExportResult<()> {
        self.2 = 0;
        Ok(())
    }

    fn next(&mut self, model: &Graph) -> ExportResult<Option<GraphPatch>> {
        self.full_pass(model)
    }
}
