//! Error kinds of the export pipeline.
//!
//! Errors travel as `anyhow::Error` (see [`ExportResult`]). The pipeline stage
//! that detects a problem attaches one of the [`ExportError`] kinds, so the
//! top-level boundary (or the repair fallback) can tell them apart.

pub type ExportResult<T> = anyhow::Result<T>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExportError {
    /// Unresolvable input shape, missing checkpoint path, bad experiment
    /// description or override.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Checkpoint parameter names or shapes do not match the model.
    #[error("checkpoint does not match model: {0}")]
    CheckpointMismatch(String),

    /// The forward pass failed while being recorded.
    #[error("trace failed: {0}")]
    Trace(String),

    /// The exported graph failed structural conformance.
    #[error("invalid graph: {0}")]
    Validation(String),

    /// Simplification or optimization failed, or its equivalence check did.
    #[error("repair failed: {0}")]
    Repair(String),
}

impl ExportError {
    /// Find the error kind attached somewhere in an error chain.
    pub fn of(error: &anyhow::Error) -> Option<&ExportError> {
        error
            .downcast_ref::<ExportError>()
            .or_else(|| error.chain().find_map(|e| e.downcast_ref::<ExportError>()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn kind_survives_context() {
        let e: ExportResult<()> = Err(ExportError::Trace("boom".into()).into());
        let e = e.context("while tracing").unwrap_err();
        assert_eq!(ExportError::of(&e), Some(&ExportError::Trace("boom".into())));
    }

    #[test]
    fn kind_as_context() {
        let e: ExportResult<()> = Err(anyhow::anyhow!("bad shape"));
        let e = e.context(ExportError::Trace("forward pass".into())).unwrap_err();
        let e = e.context("exporting");
        assert_eq!(ExportError::of(&e), Some(&ExportError::Trace("forward pass".into())));
    }

    #[test]
    fn plain_errors_have_no_kind() {
        let e = anyhow::anyhow!("something else");
        assert!(ExportError::of(&e).is_none());
    }
}
