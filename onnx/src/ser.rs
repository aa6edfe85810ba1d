//! Graph to protobuf.
use onnxport_core::internal::*;
use onnxport_core::ops::konst::Const;
use onnxport_core::ops::source::Source;

use crate::model::Onnx;
use crate::pb::*;
use crate::tensor::{tensor_proto, value_info};
use crate::{IR_VERSION, OPSET_VERSION};

/// Name of the symbolic batch dimension in dynamic exports.
pub const BATCH_SYMBOL: &str = "batch";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    /// Declare the first axis of inputs and outputs as [`BATCH_SYMBOL`].
    pub dynamic_batch: bool,
    pub graph_name: String,
    pub metadata: Vec<(String, String)>,
}

impl Default for ExportOptions {
    fn default() -> ExportOptions {
        ExportOptions { dynamic_batch: false, graph_name: "main_graph".into(), metadata: vec![] }
    }
}

impl ExportOptions {
    fn interface_fact(&self, fact: &Fact) -> Fact {
        let mut fact = fact.without_value();
        if self.dynamic_batch && !fact.shape.is_empty() {
            fact.shape[0] = Dim::Sym(BATCH_SYMBOL.to_string());
        }
        fact
    }
}

impl Onnx {
    /// Name of the value an outlet carries in the protobuf graph.
    fn value_name(graph: &Graph, outlet: OutletId) -> String {
        if let Some(label) = graph.outlet_label(outlet) {
            return label.to_string();
        }
        let node = graph.node(outlet.node);
        if node.op_is::<Source>() || node.op_is::<Const>() {
            node.name.clone()
        } else {
            format!("{}_output_{}", node.name, outlet.slot)
        }
    }

    pub fn to_proto(&self, graph: &Graph, options: &ExportOptions) -> ExportResult<ModelProto> {
        let mut names: HashMap<String, OutletId> = HashMap::new();
        let mut pbgraph = GraphProto { name: options.graph_name.clone(), ..GraphProto::default() };
        for id in graph.eval_order()? {
            let node = graph.node(id);
            let mut outputs = vec![];
            for slot in 0..node.outputs.len() {
                let outlet = OutletId::new(id, slot);
                let name = Self::value_name(graph, outlet);
                if let Some(other) = names.insert(name.clone(), outlet) {
                    bail!("Value name {} used by both {:?} and {:?}", name, other, outlet);
                }
                outputs.push(name);
            }
            if let Some(konst) = node.op_as::<Const>() {
                pbgraph.initializer.push(tensor_proto(&outputs[0], &konst.0));
            } else if node.op_is::<Source>() {
                let fact = options.interface_fact(&node.outputs[0].fact);
                pbgraph.input.push(value_info(&outputs[0], &fact));
            } else {
                let input = node
                    .inputs
                    .iter()
                    .map(|i| Self::value_name(graph, *i))
                    .collect();
                let attribute = self
                    .op_register
                    .dump(&*node.op)
                    .with_context(|| format!("Serializing node {node}"))?;
                pbgraph.node.push(NodeProto {
                    name: node.name.clone(),
                    op_type: node.op.name().into_owned(),
                    input,
                    output: outputs,
                    attribute,
                    ..NodeProto::default()
                });
            }
        }
        for (ix, outlet) in graph.outputs.iter().enumerate() {
            let fact = options.interface_fact(graph.output_fact(ix)?);
            pbgraph.output.push(value_info(&Self::value_name(graph, *outlet), &fact));
        }
        debug!(
            "Serialized {} nodes, {} initializers",
            pbgraph.node.len(),
            pbgraph.initializer.len()
        );
        Ok(ModelProto {
            ir_version: IR_VERSION,
            opset_import: vec![OperatorSetIdProto {
                domain: String::new(),
                version: OPSET_VERSION,
            }],
            producer_name: "onnxport".into(),
            producer_version: env!("CARGO_PKG_VERSION").into(),
            metadata_props: options
                .metadata
                .iter()
                .map(|(key, value)| StringStringEntryProto {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
            graph: Some(pbgraph),
            ..ModelProto::default()
        })
    }
}

/// Serialize a graph with the default operator set.
pub fn to_onnx(graph: &Graph, options: &ExportOptions) -> ExportResult<ModelProto> {
    crate::onnx().to_proto(graph, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{tensor_type, translate_fact};
    use onnxport_core::ops::binary::Mul;
    use onnxport_core::ops::element_wise::Sigmoid;

    fn silu() -> Graph {
        let mut model = Graph::default();
        let x = model.add_source("images", Fact::f32([2, 4])).unwrap();
        model.set_outlet_label(x, "images".into()).unwrap();
        let s = model.wire_node("/act/Sigmoid", Sigmoid, &[x]).unwrap();
        let y = model.wire_node("/act/Mul", Mul, &[x, s[0]]).unwrap();
        model.set_output_outlets(&y).unwrap();
        model.set_outlet_label(y[0], "output".into()).unwrap();
        model
    }

    #[test]
    fn header_and_names() {
        let options = ExportOptions {
            metadata: vec![("exp".into(), "yolox_s".into())],
            ..ExportOptions::default()
        };
        let proto = to_onnx(&silu(), &options).unwrap();
        assert_eq!(proto.ir_version, 7);
        assert_eq!(proto.opset_import[0].version, 13);
        assert_eq!(proto.metadata_props[0].key, "exp");
        let graph = proto.graph.unwrap();
        assert_eq!(graph.name, "main_graph");
        assert_eq!(graph.node[0].op_type, "Sigmoid");
        assert_eq!(graph.node[0].output, vec!["/act/Sigmoid_output_0".to_string()]);
        assert_eq!(graph.node[1].input, vec!["images", "/act/Sigmoid_output_0"]);
        assert_eq!(graph.node[1].output, vec!["output".to_string()]);
        assert_eq!(graph.input[0].name, "images");
        assert_eq!(graph.output[0].name, "output");
    }

    #[test]
    fn static_and_dynamic_batch() {
        let first_dim = |options: &ExportOptions| {
            let graph = to_onnx(&silu(), options).unwrap().graph.unwrap();
            [&graph.input[0], &graph.output[0]]
                .map(|info| translate_fact(tensor_type(info).unwrap()).unwrap().shape[0].clone())
        };
        assert_eq!(first_dim(&ExportOptions::default()), [Dim::Val(2), Dim::Val(2)]);
        let dynamic = ExportOptions { dynamic_batch: true, ..ExportOptions::default() };
        let batch = Dim::Sym(BATCH_SYMBOL.into());
        assert_eq!(first_dim(&dynamic), [batch.clone(), batch]);
    }

    #[test]
    fn constants_become_initializers() {
        let mut model = Graph::default();
        let x = model.add_source("x", Fact::f32([3])).unwrap();
        let w = model.add_const("head.weight", Tensor::random_normal(&[3], 0)).unwrap();
        let y = model.wire_node("mul", Mul, &[x, w]).unwrap();
        model.set_output_outlets(&y).unwrap();
        let graph = to_onnx(&model, &ExportOptions::default()).unwrap().graph.unwrap();
        assert_eq!(graph.initializer[0].name, "head.weight");
        assert_eq!(graph.node[0].input, vec!["x", "head.weight"]);
        assert_eq!(graph.output[0].name, "mul_output_0");
    }

    #[test]
    fn duplicate_names() {
        let mut model = silu();
        let x = model.inputs[0];
        model.set_outlet_label(OutletId::new(1, 0), "images".into()).unwrap();
        assert_eq!(model.outlet_label(x), Some("images"));
        assert!(to_onnx(&model, &ExportOptions::default()).is_err());
    }
}
