use crate::internal::*;

#[derive(Debug, Clone, Default)]
pub struct Identity;

impl Op for Identity {
    fn name(&self) -> Cow<'_, str> {
        "Identity".into()
    }

    fn eval(&self, inputs: TVec<Arc<Tensor>>) -> ExportResult<TVec<Tensor>> {
        Ok(inputs.into_iter().map(crate::ops::into_tensor).collect())
    }

    fn output_facts(&self, inputs: &[&Fact]) -> ExportResult<TVec<Fact>> {
        ensure!(inputs.len() == 1, "Identity expects one input");
        Ok(tvec!(inputs[0].clone()))
    }

    fn declutter(&self, model: &Graph, node: &Node) -> ExportResult<Option<GraphPatch>> {
        Ok(Some(GraphPatch::shunt_one_op(model, node)?))
    }

    fn fuse(&self, model: &Graph, node: &Node) -> ExportResult<Option<GraphPatch>> {
        Ok(Some(GraphPatch::shunt_one_op(model, node)?))
    }
}
