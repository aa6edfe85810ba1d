use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Yolox;
use crate::internal::*;

/// Hyperparameters needed to build a network and export it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Exp {
    pub exp_name: String,
    pub num_classes: usize,
    pub depth: f32,
    pub width: f32,
    /// `silu`, `relu` or `lrelu`
    pub act: String,
    pub depthwise: bool,
    /// Default input (height, width).
    pub test_size: (usize, usize),
    /// Seed of the initial weights, before loading a checkpoint.
    pub seed: u64,
}

impl Default for Exp {
    fn default() -> Exp {
        Exp {
            exp_name: "yolox_l".into(),
            num_classes: 80,
            depth: 1.0,
            width: 1.0,
            act: "silu".into(),
            depthwise: false,
            test_size: (640, 640),
            seed: 0,
        }
    }
}

fn configuration(msg: String) -> anyhow::Error {
    ExportError::Configuration(msg).into()
}

impl Exp {
    /// The experiment of a named model type: `yolox-s`, `yolox-m`, `yolox-l`,
    /// `yolox-x`, `yolox-tiny` or `yolox-nano`. Underscores are accepted too.
    pub fn preset(name: &str) -> ExportResult<Exp> {
        let key = name.to_lowercase().replace('_', "-");
        let (depth, width, test_size, depthwise) = match key.as_str() {
            "yolox-s" => (0.33, 0.50, (640, 640), false),
            "yolox-m" => (0.67, 0.75, (640, 640), false),
            "yolox-l" => (1.0, 1.0, (640, 640), false),
            "yolox-x" => (1.33, 1.25, (640, 640), false),
            "yolox-tiny" => (0.33, 0.375, (416, 416), false),
            "yolox-nano" => (0.33, 0.25, (416, 416), true),
            _ => return Err(configuration(format!("unknown model type {name}"))),
        };
        Ok(Exp {
            exp_name: key.replace('-', "_"),
            depth,
            width,
            test_size,
            depthwise,
            ..Exp::default()
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> ExportResult<Exp> {
        let path = path.as_ref();
        let text = fs_err::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            configuration(format!("invalid experiment file {}: {}", path.display(), e))
        })
    }

    /// Apply `key=value` overrides. Values are parsed according to the type
    /// of the field they replace. Sizes are given as `h,w`.
    pub fn merge<S: AsRef<str>>(&mut self, opts: &[S]) -> ExportResult<()> {
        if opts.is_empty() {
            return Ok(());
        }
        let mut fields = serde_json::to_value(&*self)?;
        for opt in opts {
            let opt = opt.as_ref();
            let (key, value) = opt
                .split_once('=')
                .ok_or_else(|| configuration(format!("override {opt} is not key=value")))?;
            let slot = fields
                .get_mut(key)
                .ok_or_else(|| configuration(format!("unknown experiment option {key}")))?;
            *slot = parse_like(slot, value)
                .ok_or_else(|| configuration(format!("can not parse {value} for {key}")))?;
            debug!("Experiment option {key} set to {slot}");
        }
        *self = serde_json::from_value(fields)
            .map_err(|e| configuration(format!("invalid experiment overrides: {e}")))?;
        Ok(())
    }

    pub fn get_model(&self) -> ExportResult<Yolox> {
        Yolox::new(self)
    }
}

fn parse_like(template: &Value, value: &str) -> Option<Value> {
    match template {
        Value::String(_) => Some(Value::String(value.to_string())),
        Value::Bool(_) => value.parse::<bool>().ok().map(Value::Bool),
        Value::Number(_) => {
            serde_json::from_str::<serde_json::Number>(value).ok().map(Value::Number)
        }
        Value::Array(items) => {
            let parts = value.split(',').map(|s| s.trim()).collect_vec();
            if parts.len() != items.len() {
                return None;
            }
            items
                .iter()
                .zip(parts)
                .map(|(t, v)| parse_like(t, v))
                .collect::<Option<_>>()
                .map(Value::Array)
        }
        _ => None,
    }
}

/// Load an experiment from a file if one is given, else from a model type.
pub fn get_exp(exp_file: Option<&Path>, name: Option<&str>) -> ExportResult<Exp> {
    match (exp_file, name) {
        (Some(file), _) => Exp::from_file(file),
        (None, Some(name)) => Exp::preset(name),
        (None, None) => {
            Err(configuration("an experiment file or a model type is required".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        let s = Exp::preset("yolox-s").unwrap();
        assert_eq!((s.depth, s.width, s.test_size), (0.33, 0.5, (640, 640)));
        let nano = Exp::preset("yolox_nano").unwrap();
        assert!(nano.depthwise);
        assert_eq!(nano.test_size, (416, 416));
        assert_eq!(nano.exp_name, "yolox_nano");
        assert!(Exp::preset("yolov5").is_err());
    }

    #[test]
    fn merge_typed_overrides() {
        let mut exp = Exp::preset("yolox-tiny").unwrap();
        exp.merge(&["num_classes=3", "test_size=320,256", "act=relu", "depthwise=true"]).unwrap();
        assert_eq!(exp.num_classes, 3);
        assert_eq!(exp.test_size, (320, 256));
        assert_eq!(exp.act, "relu");
        assert!(exp.depthwise);
    }

    #[test]
    fn merge_errors() {
        let mut exp = Exp::default();
        for bad in ["num_classes", "nope=1", "num_classes=many", "test_size=1"] {
            let err = exp.merge(&[bad]).unwrap_err();
            assert!(matches!(ExportError::of(&err), Some(ExportError::Configuration(_))), "{bad}");
        }
        assert_eq!(exp, Exp::default());
    }

    #[test]
    fn file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exp.json");
        fs_err::write(&path, r#"{ "exp_name": "custom", "depth": 0.33, "width": 0.25 }"#).unwrap();
        let exp = get_exp(Some(&path), Some("yolox-x")).unwrap();
        assert_eq!(exp.exp_name, "custom");
        assert_eq!(exp.num_classes, 80);
        fs_err::write(&path, r#"{ "depht": 0.33 }"#).unwrap();
        assert!(get_exp(Some(&path), None).is_err());
        assert!(get_exp(None, None).is_err());
    }
}
