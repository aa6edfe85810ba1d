//! Trained weights on disk.
//!
//! A checkpoint is a `.npz` archive of f32 arrays. Entries are namespaced:
//! `model/backbone.stem.conv.weight` is the `backbone.stem.conv.weight`
//! parameter of the `model` entry.
use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{ArrayD, IxDyn, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter};

use crate::internal::*;
use crate::nn::{for_each_parameter_mut, named_parameters};

/// Name of the entry holding the model parameters.
pub const MODEL_ENTRY: &str = "model";

pub type StateDict = BTreeMap<String, Tensor>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Checkpoint {
    pub arrays: BTreeMap<String, Tensor>,
}

impl Checkpoint {
    pub fn load(path: impl AsRef<Path>) -> ExportResult<Checkpoint> {
        let path = path.as_ref();
        let file = fs_err::File::open(path)?;
        let mut npz = NpzReader::new(file)
            .with_context(|| format!("Opening {} as a npz archive", path.display()))?;
        let mut arrays = BTreeMap::new();
        for name in npz.names()? {
            let array: ArrayD<f32> = npz
                .by_name::<OwnedRepr<f32>, IxDyn>(&name)
                .with_context(|| format!("Reading {name} from {}", path.display()))?;
            let name = name.trim_end_matches(".npy").to_string();
            arrays.insert(name, Tensor::from(array));
        }
        debug!("Loaded {} arrays from {}", arrays.len(), path.display());
        Ok(Checkpoint { arrays })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> ExportResult<()> {
        let file = fs_err::File::create(path.as_ref())?;
        let mut npz = NpzWriter::new_compressed(file);
        for (name, tensor) in &self.arrays {
            npz.add_array(name.as_str(), tensor.as_f32()?)?;
        }
        npz.finish()?;
        Ok(())
    }

    /// A checkpoint holding the current parameters of `model`.
    pub fn from_model(model: &dyn Layer) -> Checkpoint {
        let arrays = state_dict(model)
            .into_iter()
            .map(|(name, t)| (format!("{MODEL_ENTRY}/{name}"), t))
            .collect();
        Checkpoint { arrays }
    }

    /// The parameters of an entry, by name inside the entry.
    pub fn entry(&self, entry: &str) -> ExportResult<StateDict> {
        let prefix = format!("{entry}/");
        let state: StateDict = self
            .arrays
            .iter()
            .filter_map(|(name, t)| Some((name.strip_prefix(&prefix)?.to_string(), t.clone())))
            .collect();
        if state.is_empty() {
            bail!(ExportError::CheckpointMismatch(format!("no `{entry}` entry in checkpoint")));
        }
        Ok(state)
    }
}

/// Copy of all the parameters of a module tree.
pub fn state_dict(model: &dyn Layer) -> StateDict {
    named_parameters(model).into_iter().map(|(name, t)| (name, t.clone())).collect()
}

/// Overwrite the parameters of `model`.
///
/// Loading is strict: names and shapes must match exactly. Nothing is
/// written unless everything matches.
pub fn load_state_dict(model: &mut dyn Layer, state: &StateDict) -> ExportResult<()> {
    let expected: BTreeMap<String, TVec<usize>> = named_parameters(model)
        .into_iter()
        .map(|(name, t)| (name, t.shape().into()))
        .collect();
    let missing = expected.keys().filter(|k| !state.contains_key(*k)).collect_vec();
    let unexpected = state.keys().filter(|k| !expected.contains_key(*k)).collect_vec();
    let mismatched = expected
        .iter()
        .filter_map(|(k, shape)| {
            let found = state.get(k)?;
            (found.shape() != shape.as_slice()).then(|| {
                format!("{k}: checkpoint {:?}, model {:?}", found.shape(), shape.as_slice())
            })
        })
        .collect_vec();
    if !missing.is_empty() || !unexpected.is_empty() || !mismatched.is_empty() {
        let mut problems = vec![];
        if !missing.is_empty() {
            problems.push(format!("missing keys: {}", missing.iter().join(", ")));
        }
        if !unexpected.is_empty() {
            problems.push(format!("unexpected keys: {}", unexpected.iter().join(", ")));
        }
        if !mismatched.is_empty() {
            problems.push(format!("shape mismatches: {}", mismatched.join(", ")));
        }
        bail!(ExportError::CheckpointMismatch(problems.join("; ")));
    }
    for_each_parameter_mut(model, &mut |name, t| {
        *t = state[name].clone();
        Ok(())
    })?;
    debug!("Loaded {} parameters", state.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{BatchNorm2d, Conv2d, Sequential};

    fn model(seed: u64) -> Sequential {
        Sequential::new(vec![
            Conv2d::new(3, 4, 3, 1, 1, true, seed).into(),
            BatchNorm2d::new(4).into(),
        ])
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.npz");
        Checkpoint::from_model(&model(1)).save(&path).unwrap();
        let ckpt = Checkpoint::load(&path).unwrap();
        assert!(ckpt.arrays.contains_key("model/0.weight"));
        let mut other = model(2);
        load_state_dict(&mut other, &ckpt.entry(MODEL_ENTRY).unwrap()).unwrap();
        assert_eq!(state_dict(&other), state_dict(&model(1)));
    }

    #[test]
    fn strict_loading() {
        let mut state = state_dict(&model(1));
        state.remove("0.bias");
        state.insert("2.weight".into(), Tensor::zero(&[1]));
        state.insert("1.weight".into(), Tensor::zero(&[5]));
        let mut target = model(2);
        let err = load_state_dict(&mut target, &state).unwrap_err();
        let Some(ExportError::CheckpointMismatch(msg)) = ExportError::of(&err) else {
            panic!("{err:?}")
        };
        assert!(msg.contains("missing keys: 0.bias"));
        assert!(msg.contains("unexpected keys: 2.weight"));
        assert!(msg.contains("1.weight: checkpoint [5], model [4]"));
        assert_eq!(state_dict(&target), state_dict(&model(2)));
    }

    #[test]
    fn missing_entry() {
        let ckpt = Checkpoint::from_model(&model(0));
        let err = ckpt.entry("ema").unwrap_err();
        assert!(matches!(ExportError::of(&err), Some(ExportError::CheckpointMismatch(_))));
    }

    #[test]
    fn load_missing_file() {
        assert!(Checkpoint::load("/nonexistent/model.npz").is_err());
    }
}
