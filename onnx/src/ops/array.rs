use onnxport_core::internal::*;
use onnxport_core::ops::array::{Concat, Reshape, Resize, Slice, Transpose};
use onnxport_core::ops::konst::Const;

use super::{OnnxOpRegister, no_attributes, op_as};
use crate::pb::{AttributeProto, NodeProto};

pub fn register_all_ops(reg: &mut OnnxOpRegister) {
    reg.insert("Concat", |node| Ok(Box::new(Concat::new(node.get_attr("axis")?))));
    reg.dumper::<Concat>(|op| Ok(vec![AttributeProto::int("axis", op_as::<Concat>(op)?.axis)]));
    reg.insert("Constant", konst);
    reg.insert("Reshape", reshape);
    reg.dumper::<Reshape>(no_attributes);
    reg.insert("Resize", resize);
    reg.dumper::<Resize>(dump_resize);
    reg.insert("Slice", |_| Ok(Box::new(Slice)));
    reg.dumper::<Slice>(no_attributes);
    reg.insert("Transpose", transpose);
    reg.dumper::<Transpose>(dump_transpose);
}

fn konst(node: &NodeProto) -> ExportResult<Box<dyn Op>> {
    let value: Tensor = node.get_attr("value")?;
    Ok(Box::new(Const::new(Arc::new(value))))
}

fn reshape(node: &NodeProto) -> ExportResult<Box<dyn Op>> {
    if let Some(allow_zero) = node.get_attr_opt::<i64>("allowzero")? {
        node.expect_attr("allowzero", allow_zero == 0, "0")?;
    }
    Ok(Box::new(Reshape))
}

/// The only resize flavour: nearest, with `in = floor(out / scale)`.
const RESIZE_ATTRIBUTES: [(&str, &str); 3] = [
    ("mode", "nearest"),
    ("coordinate_transformation_mode", "asymmetric"),
    ("nearest_mode", "floor"),
];

fn resize(node: &NodeProto) -> ExportResult<Box<dyn Op>> {
    for (name, expected) in RESIZE_ATTRIBUTES {
        let value = node.get_attr_opt::<&str>(name)?;
        node.expect_attr(name, value == Some(expected), expected)?;
    }
    Ok(Box::new(Resize))
}

fn dump_resize(_op: &dyn Op) -> ExportResult<Vec<AttributeProto>> {
    Ok(RESIZE_ATTRIBUTES.iter().map(|(name, value)| AttributeProto::string(name, value)).collect())
}

fn transpose(node: &NodeProto) -> ExportResult<Box<dyn Op>> {
    Ok(Box::new(Transpose::new(node.get_attr_tvec("perm")?)))
}

fn dump_transpose(op: &dyn Op) -> ExportResult<Vec<AttributeProto>> {
    let perm = op_as::<Transpose>(op)?.perm.iter().map(|&p| p as i64);
    Ok(vec![AttributeProto::ints("perm", perm)])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(op_type: &str, attribute: Vec<AttributeProto>) -> NodeProto {
        NodeProto { name: "n".into(), op_type: op_type.into(), attribute, ..NodeProto::default() }
    }

    #[test]
    fn resize_flavour() {
        let reg = crate::onnx().op_register;
        let attributes = reg.dump(&Resize).unwrap();
        assert!(reg.build(&node("Resize", attributes)).is_ok());
        let linear = node("Resize", vec![AttributeProto::string("mode", "linear")]);
        assert!(reg.build(&linear).is_err());
        assert!(reg.build(&node("Resize", vec![])).is_err());
    }

    #[test]
    fn transpose_perm() {
        let reg = crate::onnx().op_register;
        let original = Transpose::new(tvec!(0, 2, 1));
        let op = reg.build(&node("Transpose", reg.dump(&original).unwrap())).unwrap();
        assert_eq!(op.downcast_ref::<Transpose>(), Some(&original));
    }

    #[test]
    fn constant_node() {
        let t = Tensor::from_i64s(&[1, 2]);
        let value = AttributeProto {
            name: "value".into(),
            r#type: crate::pb::attribute_proto::AttributeType::Tensor as i32,
            t: Some(crate::tensor::tensor_proto("", &t)),
            ..AttributeProto::default()
        };
        let op = konst(&node("Constant", vec![value])).unwrap();
        assert_eq!(*op.downcast_ref::<Const>().unwrap().0, t);
    }
}
