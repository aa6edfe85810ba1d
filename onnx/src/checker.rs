//! Structural conformance of a protobuf model.
//!
//! Only what a runtime needs to load the model is checked: header, operator
//! schemas of the default domain, naming and ordering of values, and the
//! consistency of declared output types with the types propagated from the
//! declared inputs.
use std::collections::HashSet;
use std::ops::RangeInclusive;

use lazy_static::lazy_static;
use maplit::hashmap;

use onnxport_core::internal::*;

use crate::pb::attribute_proto::AttributeType;
use crate::pb::*;
use crate::tensor::{tensor_type, translate_fact};

/// What the default domain declares about an operator.
#[derive(Debug, Clone)]
pub struct OpSchema {
    /// opset version the current definition appeared in
    pub since: i64,
    pub inputs: RangeInclusive<usize>,
    pub outputs: RangeInclusive<usize>,
    pub attributes: &'static [(&'static str, AttributeType)],
    pub required: &'static [&'static str],
}

use AttributeType as A;

const CONV_ATTRIBUTES: &[(&str, AttributeType)] = &[
    ("auto_pad", A::String),
    ("dilations", A::Ints),
    ("group", A::Int),
    ("kernel_shape", A::Ints),
    ("pads", A::Ints),
    ("strides", A::Ints),
];

const MAX_POOL_ATTRIBUTES: &[(&str, AttributeType)] = &[
    ("auto_pad", A::String),
    ("ceil_mode", A::Int),
    ("dilations", A::Ints),
    ("kernel_shape", A::Ints),
    ("pads", A::Ints),
    ("storage_order", A::Int),
    ("strides", A::Ints),
];

const RESIZE_ATTRIBUTES: &[(&str, AttributeType)] = &[
    ("coordinate_transformation_mode", A::String),
    ("cubic_coeff_a", A::Float),
    ("exclude_outside", A::Int),
    ("extrapolation_value", A::Float),
    ("mode", A::String),
    ("nearest_mode", A::String),
];

const CONSTANT_ATTRIBUTES: &[(&str, AttributeType)] = &[
    ("value", A::Tensor),
    ("value_float", A::Float),
    ("value_floats", A::Floats),
    ("value_int", A::Int),
    ("value_ints", A::Ints),
    ("value_string", A::String),
    ("value_strings", A::Strings),
];

fn schema(
    since: i64,
    inputs: RangeInclusive<usize>,
    outputs: RangeInclusive<usize>,
    attributes: &'static [(&'static str, AttributeType)],
    required: &'static [&'static str],
) -> OpSchema {
    OpSchema { since, inputs, outputs, attributes, required }
}

fn unary(since: i64) -> OpSchema {
    schema(since, 1..=1, 1..=1, &[], &[])
}

lazy_static! {
    /// Operators of the default domain, as of opset 13.
    pub static ref SCHEMAS: HashMap<&'static str, OpSchema> = hashmap! {
        "Add" => schema(13, 2..=2, 1..=1, &[], &[]),
        "BatchNormalization" => schema(
            9,
            5..=5,
            1..=5,
            &[("epsilon", A::Float), ("momentum", A::Float)],
            &[],
        ),
        "Concat" => schema(13, 1..=usize::MAX, 1..=1, &[("axis", A::Int)], &["axis"]),
        "Constant" => schema(13, 0..=0, 1..=1, CONSTANT_ATTRIBUTES, &[]),
        "Conv" => schema(11, 2..=3, 1..=1, CONV_ATTRIBUTES, &[]),
        "Exp" => unary(13),
        "Identity" => unary(13),
        "LeakyRelu" => schema(6, 1..=1, 1..=1, &[("alpha", A::Float)], &[]),
        "MaxPool" => schema(12, 1..=1, 1..=2, MAX_POOL_ATTRIBUTES, &["kernel_shape"]),
        "Mul" => schema(13, 2..=2, 1..=1, &[], &[]),
        "Relu" => unary(13),
        "Reshape" => schema(13, 2..=2, 1..=1, &[], &[]),
        "Resize" => schema(13, 1..=4, 1..=1, RESIZE_ATTRIBUTES, &[]),
        "Sigmoid" => unary(13),
        "Slice" => schema(13, 3..=5, 1..=1, &[], &[]),
        "Transpose" => schema(13, 1..=1, 1..=1, &[("perm", A::Ints)], &[]),
    };
}

fn check_node(node: &NodeProto, opset: i64) -> ExportResult<()> {
    if !node.domain.is_empty() && node.domain != "ai.onnx" {
        return node.bail(&format!("unknown domain {}", node.domain));
    }
    let Some(schema) = SCHEMAS.get(node.op_type.as_str()) else {
        return node.bail(&format!("no operator {} in opset {}", node.op_type, opset));
    };
    if schema.since > opset {
        let msg = format!("operator needs opset {}, model imports {}", schema.since, opset);
        return node.bail(&msg);
    }
    if !schema.inputs.contains(&node.input.len()) {
        return node.bail(&format!("{} inputs, expected {:?}", node.input.len(), schema.inputs));
    }
    if !schema.outputs.contains(&node.output.len()) {
        return node.bail(&format!("{} outputs, expected {:?}", node.output.len(), schema.outputs));
    }
    let mut seen = HashSet::new();
    for attr in &node.attribute {
        if attr.name.is_empty() {
            return node.bail("unnamed attribute");
        }
        if !seen.insert(attr.name.as_str()) {
            return node.bail_attr(&attr.name, "duplicate attribute");
        }
        let Some((_, expected)) = schema.attributes.iter().find(|(name, _)| *name == attr.name)
        else {
            return node.bail_attr(&attr.name, "not an attribute of this operator");
        };
        if attr.r#type != *expected as i32 {
            let found = attr.attr_type().map(|t| t.to_string()).unwrap_or("<invalid>".into());
            return node.bail_attr(&attr.name, &format!("expected {expected}, got {found}"));
        }
    }
    for required in schema.required {
        if !seen.contains(required) {
            return node.bail_attr(required, "required attribute is missing");
        }
    }
    Ok(())
}

fn default_opset(model: &ModelProto) -> ExportResult<i64> {
    let opset = model
        .opset_import
        .iter()
        .find(|o| o.domain.is_empty() || o.domain == "ai.onnx")
        .context("No opset imported for the default domain")?;
    ensure!(
        opset.version <= crate::OPSET_VERSION,
        "Opset {} is not supported (up to {})",
        opset.version,
        crate::OPSET_VERSION
    );
    Ok(opset.version)
}

fn define<'g>(defined: &mut HashSet<&'g str>, name: &'g str, what: &str) -> ExportResult<()> {
    ensure!(!name.is_empty(), "Unnamed {}", what);
    ensure!(defined.insert(name), "{} {} is assigned more than once", what, name);
    Ok(())
}

fn check_graph(graph: &GraphProto, opset: i64) -> ExportResult<()> {
    ensure!(!graph.name.is_empty(), "Graph has no name");
    let mut defined: HashSet<&str> = HashSet::new();
    for init in &graph.initializer {
        define(&mut defined, &init.name, "initializer")?;
        Tensor::try_from(init).with_context(|| format!("Initializer {}", init.name))?;
    }
    for input in &graph.input {
        tensor_type(input)?;
        if !graph.initializer.iter().any(|i| i.name == input.name) {
            define(&mut defined, &input.name, "input")?;
        }
    }
    for output in &graph.output {
        tensor_type(output)?;
    }
    for node in &graph.node {
        check_node(node, opset)?;
        for input in node.input.iter().filter(|i| !i.is_empty()) {
            if !defined.contains(input.as_str()) {
                return node.bail(&format!("input {input} is used before being defined"));
            }
        }
        for output in node.output.iter().filter(|o| !o.is_empty()) {
            define(&mut defined, output, "value")?;
        }
    }
    for output in &graph.output {
        ensure!(defined.contains(output.name.as_str()), "Output {} is not produced", output.name);
    }
    Ok(())
}

/// Output types declared by the model against those computed from its inputs.
fn check_types(model: &ModelProto) -> ExportResult<()> {
    let graph = crate::onnx().model_for_proto_model(model)?;
    let declared = &model.graph.as_ref().context("Model has no graph")?.output;
    for (ix, output) in declared.iter().enumerate() {
        let declared = translate_fact(tensor_type(output)?)?;
        let computed = graph.output_fact(ix)?;
        ensure!(
            computed.same_as(&declared),
            "Output {} is declared as {:?}, computed as {:?}",
            output.name,
            declared,
            computed
        );
    }
    Ok(())
}

fn check(model: &ModelProto) -> ExportResult<()> {
    ensure!(model.ir_version >= 3, "IR version {} is not supported", model.ir_version);
    let opset = default_opset(model)?;
    let graph = model.graph.as_ref().context("Model has no graph")?;
    check_graph(graph, opset)?;
    check_types(model)
}

/// Check a model, failing with [`ExportError::Validation`].
pub fn check_model(model: &ModelProto) -> ExportResult<()> {
    check(model).map_err(|e| ExportError::Validation(format!("{e:#}")))?;
    debug!("Model is valid");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ser::{ExportOptions, to_onnx};
    use onnxport_core::ops::binary::Mul;
    use onnxport_core::ops::cnn::Conv;
    use onnxport_core::ops::element_wise::{SiLU, Sigmoid};

    fn graph(dynamic_batch: bool) -> ModelProto {
        let mut model = Graph::default();
        let x = model.add_source("images", Fact::f32([1, 3, 8, 8])).unwrap();
        model.set_outlet_label(x, "images".into()).unwrap();
        let w = model.add_const("conv.weight", Tensor::random_normal(&[4, 3, 3, 3], 0)).unwrap();
        let c = model.wire_node("/conv/Conv", Conv::default(), &[x, w]).unwrap();
        let s = model.wire_node("/act/Sigmoid", Sigmoid, &c).unwrap();
        let y = model.wire_node("/act/Mul", Mul, &[c[0], s[0]]).unwrap();
        model.set_output_outlets(&y).unwrap();
        model.set_outlet_label(y[0], "output".into()).unwrap();
        to_onnx(&model, &ExportOptions { dynamic_batch, ..ExportOptions::default() }).unwrap()
    }

    fn violation(model: &ModelProto) -> String {
        match check_model(model) {
            Err(e) => match ExportError::of(&e) {
                Some(ExportError::Validation(msg)) => msg.clone(),
                other => panic!("unexpected error kind {other:?}"),
            },
            Ok(()) => panic!("model should not be valid"),
        }
    }

    fn nodes(model: &mut ModelProto) -> &mut Vec<NodeProto> {
        &mut model.graph.as_mut().unwrap().node
    }

    #[test]
    fn exported_models_are_valid() {
        check_model(&graph(false)).unwrap();
        check_model(&graph(true)).unwrap();
    }

    #[test]
    fn fused_silu_is_not_an_operator() {
        let mut model = Graph::default();
        let x = model.add_source("images", Fact::f32([4])).unwrap();
        let y = model.wire_node("/act/SiLU", SiLU, &[x]).unwrap();
        model.set_output_outlets(&y).unwrap();
        let proto = to_onnx(&model, &ExportOptions::default()).unwrap();
        assert!(violation(&proto).contains("no operator SiLU"));
    }

    #[test]
    fn header() {
        let mut model = graph(false);
        model.opset_import[0].version = 17;
        assert!(violation(&model).contains("Opset 17"));
        model.opset_import.clear();
        violation(&model);
        let mut model = graph(false);
        model.graph.as_mut().unwrap().name.clear();
        assert!(violation(&model).contains("no name"));
    }

    #[test]
    fn ordering_and_assignment() {
        let mut model = graph(false);
        nodes(&mut model).swap(1, 2);
        assert!(violation(&model).contains("used before being defined"));
        let mut model = graph(false);
        let output = nodes(&mut model)[0].output[0].clone();
        nodes(&mut model)[1].output[0] = output;
        assert!(violation(&model).contains("more than once"));
    }

    #[test]
    fn attributes() {
        let mut model = graph(false);
        nodes(&mut model)[0].attribute.push(AttributeProto::float("alpha", 0.1));
        assert!(violation(&model).contains("not an attribute"));
        let mut model = graph(false);
        nodes(&mut model)[0].attribute[1] = AttributeProto::float("group", 1.0);
        assert!(violation(&model).contains("expected int, got float"));
    }

    #[test]
    fn arity() {
        let mut model = graph(false);
        nodes(&mut model)[2].input.push("images".into());
        assert!(violation(&model).contains("3 inputs"));
    }

    #[test]
    fn declared_types() {
        let mut model = graph(false);
        let output = &mut model.graph.as_mut().unwrap().output[0];
        *output = crate::tensor::value_info("output", &Fact::f32([1, 4, 6, 7]));
        assert!(violation(&model).contains("declared as"));
        let mut model = graph(false);
        model.graph.as_mut().unwrap().initializer[0].raw_data.pop();
        assert!(violation(&model).contains("raw data does not match"));
    }
}
