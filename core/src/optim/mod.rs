//! Graph rewriting passes.
use std::fmt::Debug;

use crate::internal::*;

mod equivalence;
mod op_optim;
mod prop_const;
mod simplify;

pub use self::equivalence::{EquivalenceCheck, check_equivalence};
pub use self::op_optim::OpOptim;
pub use self::prop_const::PropConst;
pub use self::simplify::Simplifier;

pub trait GraphPass: Debug + Send + Sync + dyn_clone::DynClone {
    fn reset(&mut self) -> ExportResult<()>;
    fn next(&mut self, model: &Graph) -> ExportResult<Option<GraphPatch>>;
}

dyn_clone::clone_trait_object!(GraphPass);

#[derive(Debug, Clone)]
pub struct Optimizer {
    passes: Vec<Box<dyn GraphPass>>,
}

impl Optimizer {
    fn passes(passes: Vec<Box<dyn GraphPass>>) -> Optimizer {
        Optimizer { passes }
    }

    /// Constant folding and op-local simplifications.
    pub fn declutter() -> Optimizer {
        Optimizer::passes(vec![
            Box::new(PropConst),
            Box::new(OpOptim("declutter", |op, model, node| op.declutter(model, node), 0)),
        ])
    }

    /// Operator fusions: batch norm into convolution, transposes, identities.
    pub fn fuse() -> Optimizer {
        Optimizer::passes(vec![Box::new(OpOptim(
            "fuse",
            |op, model, node| op.fuse(model, node),
            0,
        ))])
    }

    /// Run passes to a fixpoint. Nodes the outputs do not depend on,
    /// including unused constants, are dropped.
    pub fn optimize(&self, model: &mut Graph) -> ExportResult<()> {
        model.check_edges()?;
        model.compact()?;
        self.session().optimize(model)
    }

    pub fn session(&self) -> OptimizerSession<'_> {
        OptimizerSession { optimizer: self, counter: 0 }
    }
}

#[derive(Debug)]
pub struct OptimizerSession<'o> {
    optimizer: &'o Optimizer,
    counter: usize,
}

impl OptimizerSession<'_> {
    pub fn optimize(&mut self, model: &mut Graph) -> ExportResult<()> {
        for i in 0.. {
            let old = self.counter;
            self.run_all_passes(i, model)?;
            if old == self.counter {
                return Ok(());
            }
            model.compact()?;
        }
        unreachable!()
    }

    pub fn run_all_passes(&mut self, i: usize, model: &mut Graph) -> ExportResult<()> {
        let mut passes = self.optimizer.passes.clone();
        for p in passes.iter_mut() {
            self.run_one_pass_outer(i, p.as_mut(), model)?;
            model.compact()?;
        }
        Ok(())
    }

    pub fn run_one_pass_outer(
        &mut self,
        i: usize,
        p: &mut dyn GraphPass,
        model: &mut Graph,
    ) -> ExportResult<()> {
        loop {
            let old_counter = self.counter;
            self.run_one_pass_inner(i, p, model)?;
            if self.counter == old_counter {
                return Ok(());
            }
            model.compact().with_context(|| format!("after pass {p:?}"))?;
        }
    }

    pub fn run_one_pass_inner(
        &mut self,
        i: usize,
        p: &mut dyn GraphPass,
        model: &mut Graph,
    ) -> ExportResult<()> {
        p.reset()?;
        while let Some(mut patch) = p.next(model)? {
            patch.push_context(format!("{p:?}/{i}"));
            debug!("applying patch #{}: {}", self.counter, patch.context.iter().rev().join(" >> "));
            patch.apply(model)?;
            self.counter += 1;
        }
        model.check_edges().with_context(|| format!("after pass {p:?}"))?;
        Ok(())
    }
}
