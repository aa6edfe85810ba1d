use std::cell::RefCell;
use std::path::{Path, PathBuf};

use approx::assert_relative_eq;
use onnxport_core::checkpoint::Checkpoint;
use onnxport_core::internal::*;
use onnxport_core::optim::{Optimizer, Simplifier};
use onnxport_core::plan::SimplePlan;
use onnxport_core::zoo::get_exp;
use onnxport_libcli::export::export_with;
use onnxport_libcli::{ExportParams, GraphSimplifier, export};
use onnxport_onnx::pb::{ModelProto, ValueInfoProto};
use onnxport_onnx::tensor::{tensor_type, translate_fact};

const EXP: &str = r#"{
    "exp_name": "tiny_test",
    "num_classes": 2,
    "depth": 0.33,
    "width": 0.125,
    "test_size": [64, 64]
}"#;

fn setup_test_logger() {
    let _ = env_logger::Builder::from_env("ONNXPORT_LOG").is_test(true).try_init();
}

/// An experiment file and a matching checkpoint in `dir`.
fn fixture(dir: &Path) -> ExportParams {
    setup_test_logger();
    let exp_file = dir.join("exp.json");
    fs_err::write(&exp_file, EXP).unwrap();
    let model = get_exp(Some(&exp_file), None).unwrap().get_model().unwrap();
    let weights = dir.join("tiny.npz");
    Checkpoint::from_model(&model).save(&weights).unwrap();
    ExportParams {
        exp_file: Some(exp_file),
        weights: Some(weights),
        output_dir: dir.join("onnx"),
        ..ExportParams::default()
    }
}

fn read(path: &Path) -> ModelProto {
    onnxport_onnx::onnx().proto_model_for_path(path).unwrap()
}

fn interface_facts(proto: &ModelProto) -> (Fact, Fact) {
    let graph = proto.graph.as_ref().unwrap();
    let fact = |info: &ValueInfoProto| translate_fact(tensor_type(info).unwrap()).unwrap();
    (fact(&graph.input[0]), fact(&graph.output[0]))
}

fn op_types(proto: &ModelProto) -> Vec<String> {
    proto.graph.as_ref().unwrap().node.iter().map(|n| n.op_type.clone()).collect()
}

/// Fails every simplification, which keeps the exported graph on disk.
/// Records the artifact as it was when repair started.
#[derive(Default)]
struct Snapshot {
    path: PathBuf,
    bytes: RefCell<Option<Vec<u8>>>,
}

impl GraphSimplifier for Snapshot {
    fn simplify(&self, model: &Graph) -> ExportResult<(Graph, bool)> {
        *self.bytes.borrow_mut() = Some(fs_err::read(&self.path)?);
        Ok((model.clone(), false))
    }
}

fn unrepaired(params: &ExportParams, path: PathBuf) -> (Snapshot, PathBuf) {
    let snapshot = Snapshot { path, ..Snapshot::default() };
    let report = export_with(params, &snapshot, &Optimizer::fuse()).unwrap();
    assert!(matches!(report.repair, Err(ExportError::Repair(_))));
    (snapshot, report.path)
}

#[test]
fn static_export() {
    let dir = tempfile::tempdir().unwrap();
    let params = fixture(dir.path());
    let report = export(&params).unwrap();
    assert_eq!(report.path, dir.path().join("onnx").join("tiny_1x3x64x64.onnx"));
    assert!(report.repair.is_ok());

    let proto = read(&report.path);
    let graph = proto.graph.as_ref().unwrap();
    assert_eq!(graph.input[0].name, "images");
    assert_eq!(graph.output[0].name, "output");
    let (input, output) = interface_facts(&proto);
    assert_eq!(input, Fact::f32([1, 3, 64, 64]));
    // 8x8 + 4x4 + 2x2 anchors, box + objectness + 2 classes
    assert_eq!(output.shape, Fact::f32([1, 84, 7]).shape);
    assert!(op_types(&proto).iter().all(|op| op != "SiLU"));
    let meta = &proto.metadata_props;
    assert!(meta.iter().any(|p| p.key == "exp_name" && p.value == "tiny_test"));
    assert!(!report.path.with_extension("onnx.part").exists());
}

#[test]
fn dynamic_batch() {
    let dir = tempfile::tempdir().unwrap();
    let params = ExportParams { dynamic: true, batch_size: 2, ..fixture(dir.path()) };
    let report = export(&params).unwrap();
    assert!(report.path.ends_with("tiny_2x3x64x64.onnx"));
    assert!(report.repair.is_ok());
    let (input, output) = interface_facts(&read(&report.path));
    let batch = Dim::Sym(onnxport_onnx::ser::BATCH_SYMBOL.into());
    assert_eq!(input.shape[0], batch);
    assert_eq!(output.shape[0], batch);
    assert_eq!(input.shape[1..], [Dim::Val(3), Dim::Val(64), Dim::Val(64)]);
}

#[test]
fn explicit_size_and_name() {
    let dir = tempfile::tempdir().unwrap();
    let params = ExportParams {
        img_size: Some(vec![96, 64]),
        onnx_filename: Some("detector".into()),
        ..fixture(dir.path())
    };
    let report = export(&params).unwrap();
    assert_eq!(report.path, dir.path().join("onnx").join("detector.onnx"));
    let (input, _) = interface_facts(&read(&report.path));
    assert_eq!(input, Fact::f32([1, 3, 96, 64]));
}

#[test]
fn missing_checkpoint_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let params = ExportParams { weights: None, ..fixture(dir.path()) };
    let err = export(&params).unwrap_err();
    assert!(matches!(ExportError::of(&err), Some(ExportError::Configuration(_))));
    assert!(!params.output_dir.exists());
}

#[test]
fn checkpoint_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let params = ExportParams { opts: vec!["num_classes=3".into()], ..fixture(dir.path()) };
    let err = export(&params).unwrap_err();
    assert!(matches!(ExportError::of(&err), Some(ExportError::CheckpointMismatch(_))));
    assert!(!params.output_dir.exists());
}

#[test]
fn failed_repair_keeps_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let params = fixture(dir.path());
    let path = dir.path().join("onnx").join("tiny_1x3x64x64.onnx");
    let (snapshot, written) = unrepaired(&params, path.clone());
    assert_eq!(written, path);
    let before = snapshot.bytes.into_inner().unwrap();
    assert_eq!(fs_err::read(&path).unwrap(), before);
    onnxport_onnx::check_model(&read(&path)).unwrap();
}

#[test]
fn repair_preserves_outputs() {
    let raw_dir = tempfile::tempdir().unwrap();
    let raw_params = fixture(raw_dir.path());
    let raw_path = raw_params.output_dir.join("tiny_1x3x64x64.onnx");
    let (_, raw_path) = unrepaired(&raw_params, raw_path);

    let dir = tempfile::tempdir().unwrap();
    let report = export(&fixture(dir.path())).unwrap();
    let repair = report.repair.unwrap();
    assert!(repair.nodes_optimized < repair.nodes_before);

    let onnx = onnxport_onnx::onnx();
    let input = Tensor::random_normal(&[1, 3, 64, 64], 42);
    let run = |path: &Path| {
        let plan = SimplePlan::new(onnx.model_for_path(path).unwrap()).unwrap();
        plan.run(tvec!(input.clone())).unwrap().remove(0)
    };
    let expected = run(&raw_path);
    let found = run(&report.path);
    assert_eq!(expected.shape(), found.shape());
    for (e, f) in expected.as_f32().unwrap().iter().zip(found.as_f32().unwrap().iter()) {
        assert_relative_eq!(*e, *f, epsilon = 1e-4, max_relative = 1e-3);
    }
}

#[test]
fn decode_in_inference() {
    let dir = tempfile::tempdir().unwrap();
    let params = fixture(dir.path());
    let raw = export(&params).unwrap();
    let decoded_params = ExportParams {
        decode_in_inference: true,
        onnx_filename: Some("decoded.onnx".into()),
        ..params
    };
    let decoded = export(&decoded_params).unwrap();
    let (raw, decoded) = (read(&raw.path), read(&decoded.path));
    assert_eq!(interface_facts(&raw).1, interface_facts(&decoded).1);
    assert!(!op_types(&raw).contains(&"Exp".to_string()));
    assert!(op_types(&decoded).contains(&"Exp".to_string()));
}

#[test]
fn deterministic_export() {
    let ops = |dir: &Path| {
        let params = fixture(dir);
        let path = params.output_dir.join("tiny_1x3x64x64.onnx");
        let (_, path) = unrepaired(&params, path);
        op_types(&read(&path))
    };
    let (a, b) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
    assert_eq!(ops(a.path()), ops(b.path()));
}

#[test]
fn default_simplifier_accepts_export() {
    let dir = tempfile::tempdir().unwrap();
    let params = fixture(dir.path());
    let report = export_with(&params, &Simplifier::default(), &Optimizer::declutter()).unwrap();
    assert!(report.repair.is_ok());
    onnxport_onnx::check_model(&read(&report.path)).unwrap();
}
