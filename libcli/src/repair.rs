//! Graph repair: simplification, then optimization, all or nothing.
//!
//! The artifact on disk is only replaced when both passes succeed, the
//! simplified graph passes its equivalence check, the optimized graph still
//! computes what the exported one did, and the result validates.
use std::path::Path;

use onnxport_core::internal::*;
use onnxport_core::optim::{EquivalenceCheck, Optimizer, Simplifier};
use onnxport_onnx::pb::ModelProto;
use onnxport_onnx::{ExportOptions, Onnx, check_model};

pub trait GraphSimplifier {
    /// The simplified graph, and whether it computes the same outputs.
    fn simplify(&self, model: &Graph) -> ExportResult<(Graph, bool)>;
}

impl GraphSimplifier for Simplifier {
    fn simplify(&self, model: &Graph) -> ExportResult<(Graph, bool)> {
        Simplifier::simplify(self, model)
    }
}

pub trait GraphOptimizer {
    fn optimize(&self, model: &Graph) -> ExportResult<Graph>;
}

impl GraphOptimizer for Optimizer {
    fn optimize(&self, model: &Graph) -> ExportResult<Graph> {
        let mut optimized = model.clone();
        Optimizer::optimize(self, &mut optimized)?;
        Ok(optimized)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReport {
    pub nodes_before: usize,
    pub nodes_simplified: usize,
    pub nodes_optimized: usize,
}

pub struct Repair<'a> {
    pub onnx: &'a Onnx,
    pub simplifier: &'a dyn GraphSimplifier,
    pub optimizer: &'a dyn GraphOptimizer,
    /// Check of the optimized graph against the exported one.
    pub check: EquivalenceCheck,
}

fn options_of(proto: &ModelProto) -> ExportOptions {
    let graph_name = proto.graph.as_ref().map(|g| g.name.clone()).unwrap_or_default();
    let metadata = proto.metadata_props.iter().map(|p| (p.key.clone(), p.value.clone()));
    // symbolic dimensions already live in the facts of the parsed graph
    ExportOptions { dynamic_batch: false, graph_name, metadata: metadata.collect() }
}

impl Repair<'_> {
    fn repaired(&self, proto: &ModelProto) -> ExportResult<(ModelProto, RepairReport)> {
        let model = self.onnx.model_for_proto_model(proto)?;
        info!("Simplifying graph ({} nodes)", model.nodes.len());
        let (simplified, ok) = self.simplifier.simplify(&model).context("Simplification")?;
        if !ok {
            bail!(ExportError::Repair("simplified graph failed its check".into()));
        }
        let optimized = self.optimizer.optimize(&simplified).context("Optimization")?;
        if !self.check.check(&model, &optimized).context("Checking optimized graph")? {
            bail!(ExportError::Repair("optimized graph does not match the exported one".into()));
        }
        let repaired = self.onnx.to_proto(&optimized, &options_of(proto))?;
        check_model(&repaired)?;
        let report = RepairReport {
            nodes_before: model.nodes.len(),
            nodes_simplified: simplified.nodes.len(),
            nodes_optimized: optimized.nodes.len(),
        };
        Ok((repaired, report))
    }

    /// Repair the artifact at `path`, which holds `proto`.
    ///
    /// On failure the file is left untouched.
    pub fn run(&self, proto: &ModelProto, path: &Path) -> Result<RepairReport, ExportError> {
        let result = self.repaired(proto).and_then(|(repaired, report)| {
            let tmp = path.with_extension("onnx.part");
            self.onnx.write_proto_model(&repaired, &tmp)?;
            fs_err::rename(&tmp, path)?;
            Ok(report)
        });
        result.map_err(|e| match ExportError::of(&e) {
            Some(ExportError::Repair(msg)) => ExportError::Repair(msg.clone()),
            _ => ExportError::Repair(format!("{e:#}")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onnxport_core::ops::array::Transpose;
    use onnxport_core::ops::binary::Add;
    use onnxport_core::ops::identity::Identity;

    fn exported() -> ModelProto {
        let mut model = Graph::default();
        let x = model.add_source("images", Fact::f32([1, 2, 3])).unwrap();
        model.set_outlet_label(x, "images".into()).unwrap();
        let a = model.wire_node("/a/Transpose", Transpose::new(tvec!(0, 2, 1)), &[x]).unwrap();
        let b = model.wire_node("/b/Transpose", Transpose::new(tvec!(0, 2, 1)), &a).unwrap();
        let i = model.wire_node("/i/Identity", Identity, &b).unwrap();
        let y = model.wire_node("/y/Add", Add, &[i[0], x]).unwrap();
        model.set_output_outlets(&y).unwrap();
        model.set_outlet_label(y[0], "output".into()).unwrap();
        onnxport_onnx::to_onnx(&model, &ExportOptions::default()).unwrap()
    }

    struct Broken;

    impl GraphOptimizer for Broken {
        fn optimize(&self, model: &Graph) -> ExportResult<Graph> {
            let mut model = model.clone();
            let out = model.outputs[0];
            let doubled = model.wire_node("/double/Add", Add, &[out, out])?;
            model.set_output_outlets(&doubled)?;
            Ok(model)
        }
    }

    #[test]
    fn repair_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.onnx");
        let onnx = onnxport_onnx::onnx();
        let proto = exported();
        onnx.write_proto_model(&proto, &path).unwrap();
        let simplifier = Simplifier::default();
        let optimizer = Optimizer::fuse();
        let repair = Repair {
            onnx: &onnx,
            simplifier: &simplifier,
            optimizer: &optimizer,
            check: EquivalenceCheck::default(),
        };
        let report = repair.run(&proto, &path).unwrap();
        assert_eq!(report.nodes_before, 5);
        assert_eq!(report.nodes_optimized, 2);
        let repaired = onnx.proto_model_for_path(&path).unwrap();
        let graph = repaired.graph.unwrap();
        assert_eq!(graph.node.len(), 1);
        assert_eq!(graph.output[0].name, "output");
        assert!(!path.with_extension("onnx.part").exists());
    }

    #[test]
    fn mismatch_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.onnx");
        let onnx = onnxport_onnx::onnx();
        let proto = exported();
        onnx.write_proto_model(&proto, &path).unwrap();
        let before = fs_err::read(&path).unwrap();
        let simplifier = Simplifier::default();
        let repair = Repair {
            onnx: &onnx,
            simplifier: &simplifier,
            optimizer: &Broken,
            check: EquivalenceCheck::default(),
        };
        let err = repair.run(&proto, &path).unwrap_err();
        assert!(matches!(err, ExportError::Repair(ref msg) if msg.contains("does not match")));
        assert_eq!(fs_err::read(&path).unwrap(), before);
    }
}
