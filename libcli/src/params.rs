use std::path::{Path, PathBuf};

use serde::Serialize;

use onnxport_core::internal::*;
use onnxport_core::shape::ShapeSpec;

/// Where artifacts go when no output directory is given.
pub const DEFAULT_OUTPUT_DIR: &str = "./weights/onnx";

/// Everything an export needs, as given on the command line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportParams {
    /// Experiment description (JSON).
    pub exp_file: Option<PathBuf>,
    /// Model type, used when there is no experiment file.
    pub model_type: Option<String>,
    /// Checkpoint archive. Required, but checked by the pipeline so that a
    /// missing path is reported as a configuration error.
    pub weights: Option<PathBuf>,
    /// Explicit input size, `[h, w]` or `[s]`. Empty means the model default.
    pub img_size: Option<Vec<usize>>,
    pub batch_size: usize,
    /// Symbolic batch axis on the graph input and output.
    pub dynamic: bool,
    /// Emit decoded boxes instead of raw predictions.
    pub decode_in_inference: bool,
    /// File name overriding the derived one.
    pub onnx_filename: Option<String>,
    pub output_dir: PathBuf,
    /// `key=value` experiment overrides.
    pub opts: Vec<String>,
}

impl Default for ExportParams {
    fn default() -> ExportParams {
        ExportParams {
            exp_file: None,
            model_type: None,
            weights: None,
            img_size: None,
            batch_size: 1,
            dynamic: false,
            decode_in_inference: false,
            onnx_filename: None,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            opts: vec![],
        }
    }
}

impl ExportParams {
    /// The checkpoint path, which every export needs.
    pub fn weights(&self) -> ExportResult<&Path> {
        self.weights.as_deref().ok_or_else(|| {
            ExportError::Configuration("a checkpoint is required (--weights)".into()).into()
        })
    }

    /// Artifact file name: the override if there is one (`.onnx` is appended
    /// when it has no extension), else `<checkpoint stem>_<shape>.onnx`.
    pub fn onnx_name(&self, shape: &ShapeSpec) -> ExportResult<String> {
        if let Some(name) = &self.onnx_filename {
            if name.is_empty() {
                bail!(ExportError::Configuration("empty onnx file name".into()));
            }
            return Ok(if Path::new(name).extension().is_some() {
                name.clone()
            } else {
                format!("{name}.onnx")
            });
        }
        let weights = self.weights()?;
        let stem = weights.file_stem().and_then(|s| s.to_str()).ok_or_else(|| {
            ExportError::Configuration(format!("no file name in {}", weights.display()))
        })?;
        Ok(format!("{stem}_{shape}.onnx"))
    }

    pub fn output_path(&self, shape: &ShapeSpec) -> ExportResult<PathBuf> {
        Ok(self.output_dir.join(self.onnx_name(shape)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onnxport_core::shape::resolve_shape;

    fn params(weights: &str) -> ExportParams {
        ExportParams { weights: Some(weights.into()), ..ExportParams::default() }
    }

    #[test]
    fn derived_name() {
        let shape = resolve_shape(Some(&[640, 640]), None, 1).unwrap();
        let path = params("model.npz").output_path(&shape).unwrap();
        assert_eq!(path, Path::new("./weights/onnx/model_1x3x640x640.onnx"));
        let shape = resolve_shape(Some(&[416, 320]), None, 4).unwrap();
        let name = params("ckpt/yolox_nano.npz").onnx_name(&shape).unwrap();
        assert_eq!(name, "yolox_nano_4x3x416x320.onnx");
    }

    #[test]
    fn name_override() {
        let shape = resolve_shape(Some(&[640]), None, 1).unwrap();
        let mut p = params("model.npz");
        p.onnx_filename = Some("detector".into());
        assert_eq!(p.onnx_name(&shape).unwrap(), "detector.onnx");
        p.onnx_filename = Some("detector.v2.onnx".into());
        assert_eq!(p.onnx_name(&shape).unwrap(), "detector.v2.onnx");
    }

    #[test]
    fn no_weights() {
        let shape = resolve_shape(Some(&[640]), None, 1).unwrap();
        let err = ExportParams::default().onnx_name(&shape).unwrap_err();
        assert!(matches!(ExportError::of(&err), Some(ExportError::Configuration(_))));
    }
}
