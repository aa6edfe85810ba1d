use crate::internal::*;

/// A graph input. Its value is fed by the caller at run time.
#[derive(Debug, Clone, new)]
pub struct Source {
    pub fact: Fact,
}

impl Op for Source {
    fn name(&self) -> Cow<'_, str> {
        "Source".into()
    }

    fn is_stateless(&self) -> bool {
        false
    }

    fn eval(&self, _inputs: TVec<Arc<Tensor>>) -> ExportResult<TVec<Tensor>> {
        bail!("Source should be fed, not evaluated")
    }

    fn output_facts(&self, _inputs: &[&Fact]) -> ExportResult<TVec<Fact>> {
        Ok(tvec!(self.fact.clone()))
    }
}
