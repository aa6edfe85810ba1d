use crate::internal::*;

#[derive(Debug, Clone, new, PartialEq)]
pub struct Const(pub Arc<Tensor>);

impl Op for Const {
    fn name(&self) -> Cow<'_, str> {
        "Const".into()
    }

    fn eval(&self, _inputs: TVec<Arc<Tensor>>) -> ExportResult<TVec<Tensor>> {
        Ok(tvec![(*self.0).clone()])
    }

    fn output_facts(&self, _inputs: &[&Fact]) -> ExportResult<TVec<Fact>> {
        Ok(tvec!(Arc::clone(&self.0).into()))
    }
}
