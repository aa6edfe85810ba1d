//! Operator registry: how each ONNX operator type is read into a graph op,
//! and how each graph op writes its attributes back.
use std::any::TypeId;

use onnxport_core::internal::*;
use onnxport_core::ops as cops;

use crate::pb::{AttributeProto, NodeProto};

mod array;
mod nn;

pub type OpBuilder = fn(&NodeProto) -> ExportResult<Box<dyn Op>>;
pub type OpDumper = fn(&dyn Op) -> ExportResult<Vec<AttributeProto>>;

#[derive(Clone, Default)]
pub struct OnnxOpRegister {
    pub builders: HashMap<String, OpBuilder>,
    pub dumpers: HashMap<TypeId, OpDumper>,
}

impl OnnxOpRegister {
    pub fn insert(&mut self, op_type: &'static str, builder: OpBuilder) {
        self.builders.insert(op_type.to_string(), builder);
    }

    pub fn dumper<O: Op>(&mut self, dumper: OpDumper) {
        self.dumpers.insert(TypeId::of::<O>(), dumper);
    }

    pub fn build(&self, node: &NodeProto) -> ExportResult<Box<dyn Op>> {
        match self.builders.get(&node.op_type) {
            Some(builder) => builder(node),
            None => node.bail("unsupported operator"),
        }
    }

    /// Attributes of an op, in protobuf form.
    pub fn dump(&self, op: &dyn Op) -> ExportResult<Vec<AttributeProto>> {
        match self.dumpers.get(&op.as_any().type_id()) {
            Some(dumper) => dumper(op),
            None => bail!("No ONNX serialization for {}", op.name()),
        }
    }
}

/// Downcast in a dumper, to the type it was registered for.
pub(crate) fn op_as<O: Op>(op: &dyn Op) -> ExportResult<&O> {
    op.downcast_ref::<O>()
        .with_context(|| format!("{} is not a {}", op.name(), std::any::type_name::<O>()))
}

fn no_attributes(_op: &dyn Op) -> ExportResult<Vec<AttributeProto>> {
    Ok(vec![])
}

macro_rules! unit_op {
    ($reg:expr, $onnx:expr, $Op:ty) => {
        $reg.insert($onnx, |_| Ok(Box::new(<$Op>::default())));
        $reg.dumper::<$Op>(no_attributes);
    };
}

pub fn register_all_ops(reg: &mut OnnxOpRegister) {
    unit_op!(reg, "Add", cops::binary::Add);
    unit_op!(reg, "Mul", cops::binary::Mul);
    unit_op!(reg, "Identity", cops::identity::Identity);
    unit_op!(reg, "Sigmoid", cops::element_wise::Sigmoid);
    unit_op!(reg, "Relu", cops::element_wise::Relu);
    unit_op!(reg, "Exp", cops::element_wise::Exp);
    unit_op!(reg, "SiLU", cops::element_wise::SiLU);
    array::register_all_ops(reg);
    nn::register_all_ops(reg);
}
