use std::path::PathBuf;

use onnxport_core::checkpoint::{Checkpoint, MODEL_ENTRY, load_state_dict};
use onnxport_core::internal::*;
use onnxport_core::nn::{ExportSiLU, SiLU, replace_module, set_eval};
use onnxport_core::optim::{EquivalenceCheck, Optimizer, Simplifier};
use onnxport_core::shape::{ShapeSpec, resolve_shape};
use onnxport_core::trace::trace;
use onnxport_core::zoo::get_exp;
use onnxport_onnx::{ExportOptions, check_model, to_onnx};

use crate::params::ExportParams;
use crate::repair::{GraphOptimizer, GraphSimplifier, Repair, RepairReport};

pub const INPUT_NAME: &str = "images";
pub const OUTPUT_NAME: &str = "output";

/// Seed of the tracing input. Values do not change the traced graph.
const TRACE_SEED: u64 = 0;

#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    pub path: PathBuf,
    pub shape: ShapeSpec,
    /// What repair did, or why the exported graph was kept.
    pub repair: Result<RepairReport, ExportError>,
}

/// Export with the default simplifier and optimizer.
pub fn export(params: &ExportParams) -> ExportResult<ExportReport> {
    export_with(params, &Simplifier::default(), &Optimizer::fuse())
}

pub fn export_with(
    params: &ExportParams,
    simplifier: &dyn GraphSimplifier,
    optimizer: &dyn GraphOptimizer,
) -> ExportResult<ExportReport> {
    info!("args: {}", serde_json::to_string(params)?);
    let weights = params.weights()?;

    let mut exp = get_exp(params.exp_file.as_deref(), params.model_type.as_deref())?;
    exp.merge(&params.opts)?;
    let mut model = exp.get_model()?;
    set_eval(&mut model);

    info!("loading checkpoint from {}", weights.display());
    let checkpoint = Checkpoint::load(weights)?;
    load_state_dict(&mut model, &checkpoint.entry(MODEL_ENTRY)?)?;
    info!("loading checkpoint done.");

    replace_module::<SiLU, _>(&mut model, || ExportSiLU.into());
    model.set_decode_in_inference(params.decode_in_inference)?;

    let shape =
        resolve_shape(params.img_size.as_deref(), Some(exp.test_size), params.batch_size)?;
    debug!("Input shape {shape}");
    let traced = trace(&model, shape.random_input(TRACE_SEED), INPUT_NAME, OUTPUT_NAME)?;
    let options = ExportOptions {
        dynamic_batch: params.dynamic,
        metadata: vec![
            ("exp_name".into(), exp.exp_name.clone()),
            ("input_shape".into(), shape.to_string()),
        ],
        ..ExportOptions::default()
    };
    let proto = to_onnx(&traced.model, &options)?;

    let path = params.output_path(&shape)?;
    if let Some(dir) = path.parent() {
        fs_err::create_dir_all(dir)?;
    }
    let onnx = onnxport_onnx::onnx();
    onnx.write_proto_model(&proto, &path)?;
    info!("generated onnx model named {}", path.display());

    let written = onnx.proto_model_for_path(&path)?;
    check_model(&written)?;

    let repair = Repair { onnx: &onnx, simplifier, optimizer, check: EquivalenceCheck::default() };
    let repair = match repair.run(&written, &path) {
        Ok(report) => {
            info!(
                "generated simplified onnx model named {} ({} -> {} nodes)",
                path.display(),
                report.nodes_before,
                report.nodes_optimized
            );
            Ok(report)
        }
        Err(e) => {
            warn!("Keeping the exported graph, repair failed: {e}");
            Err(e)
        }
    };
    Ok(ExportReport { path, shape, repair })
}
