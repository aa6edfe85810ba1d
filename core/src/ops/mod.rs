//! Ops
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use downcast_rs::Downcast;

use crate::TVec;
use crate::errors::ExportResult;
use crate::model::{Fact, Graph, GraphPatch, Node};
use crate::tensor::Tensor;

#[macro_use]
pub mod macros;

pub mod array;
pub mod binary;
pub mod cnn;
pub mod element_wise;
pub mod identity;
pub mod konst;
pub mod nn;
pub mod source;

/// A graph operator.
///
/// The name is the ONNX operator type the op serializes to.
pub trait Op: fmt::Debug + dyn_clone::DynClone + Send + Sync + 'static + Downcast {
    fn name(&self) -> Cow<'_, str>;

    /// Short (one-line) strings giving hints on important configuration
    /// details to be displayed in dumps.
    fn info(&self) -> ExportResult<Vec<String>> {
        Ok(vec![])
    }

    /// Whether the op output only depends on its inputs. Stateless ops with
    /// constant inputs are folded by constant propagation.
    fn is_stateless(&self) -> bool {
        true
    }

    /// Evaluates the operation given the input tensors.
    fn eval(&self, inputs: TVec<Arc<Tensor>>) -> ExportResult<TVec<Tensor>>;

    /// Deduce output facts from input facts.
    fn output_facts(&self, inputs: &[&Fact]) -> ExportResult<TVec<Fact>>;

    /// Rewrite the op into a simpler, equivalent form.
    fn declutter(&self, _model: &Graph, _node: &Node) -> ExportResult<Option<GraphPatch>> {
        Ok(None)
    }

    /// Merge the op with its neighbours.
    fn fuse(&self, _model: &Graph, _node: &Node) -> ExportResult<Option<GraphPatch>> {
        Ok(None)
    }
}

dyn_clone::clone_trait_object!(Op);
downcast_rs::impl_downcast!(Op);

impl<O: Op> From<O> for Box<dyn Op> {
    fn from(it: O) -> Box<dyn Op> {
        Box::new(it)
    }
}

impl fmt::Display for dyn Op {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.name())
    }
}

/// Resolve a possibly negative axis against a rank.
pub fn resolve_axis(axis: i64, rank: usize) -> ExportResult<usize> {
    let rank = rank as i64;
    if 0 <= axis && axis < rank {
        Ok(axis as usize)
    } else if -rank <= axis && axis < 0 {
        Ok((axis + rank) as usize)
    } else {
        anyhow::bail!("Illegal combination of values for rank and axis: {} and {}", rank, axis)
    }
}

/// Take ownership of a shared tensor, cloning only if it is still shared.
pub(crate) fn into_tensor(t: Arc<Tensor>) -> Tensor {
    Arc::try_unwrap(t).unwrap_or_else(|t| (*t).clone())
}
