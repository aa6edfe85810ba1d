use std::io::Read;
use std::path::Path;

use prost::Message;

use onnxport_core::internal::*;

use crate::ops::OnnxOpRegister;
use crate::pb;
use crate::tensor::{tensor_type, translate_fact};

#[derive(Clone, Debug)]
pub struct ParseResult {
    pub model: Graph,
    pub outlets_by_name: HashMap<String, OutletId>,
}

#[derive(Clone, Default)]
pub struct Onnx {
    pub op_register: OnnxOpRegister,
}

/// An ONNX framework with every supported operator registered.
pub fn onnx() -> Onnx {
    let mut op_register = OnnxOpRegister::default();
    crate::ops::register_all_ops(&mut op_register);
    Onnx { op_register }
}

impl Onnx {
    pub fn proto_model_for_path(&self, path: impl AsRef<Path>) -> ExportResult<pb::ModelProto> {
        let path = path.as_ref();
        let bytes = fs_err::read(path)?;
        pb::ModelProto::decode(&*bytes)
            .with_context(|| format!("Decoding {} as an ONNX model", path.display()))
    }

    pub fn proto_model_for_read(&self, r: &mut dyn Read) -> ExportResult<pb::ModelProto> {
        let mut bytes = vec![];
        r.read_to_end(&mut bytes)?;
        Ok(pb::ModelProto::decode(&*bytes)?)
    }

    /// Write a protobuf model, replacing whatever is at `path`.
    pub fn write_proto_model(
        &self,
        proto: &pb::ModelProto,
        path: impl AsRef<Path>,
    ) -> ExportResult<()> {
        fs_err::write(path.as_ref(), proto.encode_to_vec())?;
        Ok(())
    }

    pub fn parse(&self, proto: &pb::ModelProto) -> ExportResult<ParseResult> {
        let graph = proto.graph.as_ref().context("Model has no graph")?;
        self.parse_graph(graph)
    }

    pub fn parse_graph(&self, graph: &pb::GraphProto) -> ExportResult<ParseResult> {
        let mut model = Graph::default();
        let mut outlets_by_name = HashMap::<String, OutletId>::new();
        for init in &graph.initializer {
            let t = Tensor::try_from(init)?;
            trace!("Initializer: {} {:?}", init.name, t);
            let id = model.add_const(init.name.clone(), t)?;
            outlets_by_name.insert(init.name.clone(), id);
        }
        for input in &graph.input {
            if outlets_by_name.contains_key(&input.name) {
                continue;
            }
            let fact = translate_fact(tensor_type(input)?)?;
            trace!("Input: {} is a source ({:?})", input.name, fact);
            let id = model.add_source(input.name.clone(), fact)?;
            model.set_outlet_label(id, input.name.clone())?;
            outlets_by_name.insert(input.name.clone(), id);
        }
        for (ix, pbnode) in graph.node.iter().enumerate() {
            let name = if !pbnode.name.is_empty() {
                pbnode.name.clone()
            } else if pbnode.output.first().is_some_and(|o| !o.is_empty()) {
                pbnode.output[0].clone()
            } else {
                format!("{}-{}", ix, pbnode.op_type)
            };
            trace!("Creating node {}", name);
            let op = self.op_register.build(pbnode)?;
            let mut inputs: &[String] = &pbnode.input;
            while inputs.last().is_some_and(|i| i.is_empty()) {
                inputs = &inputs[..inputs.len() - 1];
            }
            let inputs = inputs
                .iter()
                .map(|i| {
                    outlets_by_name.get(i).copied().with_context(|| {
                        format!("Node {name} ({}): input {i} is not defined", pbnode.op_type)
                    })
                })
                .collect::<ExportResult<TVec<OutletId>>>()?;
            let outputs = model.wire_node(&*name, op, &inputs)?;
            if outputs.len() != pbnode.output.len() {
                return pbnode.bail(&format!(
                    "declares {} outputs, its operator produces {}",
                    pbnode.output.len(),
                    outputs.len()
                ));
            }
            for (output, outlet) in pbnode.output.iter().zip(outputs.iter()) {
                if !output.is_empty() {
                    outlets_by_name.insert(output.clone(), *outlet);
                }
            }
        }
        let mut outputs = vec![];
        for output in &graph.output {
            let outlet = *outlets_by_name
                .get(&output.name)
                .with_context(|| format!("Graph output {} is not produced", output.name))?;
            model.set_outlet_label(outlet, output.name.clone())?;
            outputs.push(outlet);
        }
        model.set_output_outlets(&outputs)?;
        Ok(ParseResult { model, outlets_by_name })
    }

    pub fn model_for_proto_model(&self, proto: &pb::ModelProto) -> ExportResult<Graph> {
        Ok(self.parse(proto)?.model)
    }

    pub fn model_for_path(&self, path: impl AsRef<Path>) -> ExportResult<Graph> {
        let proto = self.proto_model_for_path(path)?;
        self.model_for_proto_model(&proto)
    }
}
