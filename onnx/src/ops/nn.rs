use onnxport_core::internal::*;
use onnxport_core::ops::cnn::{Conv, MaxPool};
use onnxport_core::ops::element_wise::LeakyRelu;
use onnxport_core::ops::nn::BatchNorm;

use super::{OnnxOpRegister, op_as};
use crate::pb::{AttributeProto, NodeProto};

pub fn register_all_ops(reg: &mut OnnxOpRegister) {
    reg.insert("BatchNormalization", batch_normalization);
    reg.dumper::<BatchNorm>(dump_batch_normalization);
    reg.insert("Conv", conv);
    reg.dumper::<Conv>(dump_conv);
    reg.insert("LeakyRelu", leaky_relu);
    reg.dumper::<LeakyRelu>(dump_leaky_relu);
    reg.insert("MaxPool", max_pool);
    reg.dumper::<MaxPool>(dump_max_pool);
}

/// Explicit pads, as top, left, bottom, right.
fn pads(node: &NodeProto) -> ExportResult<[usize; 4]> {
    if let Some(auto_pad) = node.get_attr_opt::<&str>("auto_pad")? {
        node.expect_attr("auto_pad", auto_pad == "NOTSET", "NOTSET")?;
    }
    match node.get_attr_opt_tvec::<usize>("pads")? {
        None => Ok([0; 4]),
        Some(p) if p.len() == 4 => Ok([p[0], p[1], p[2], p[3]]),
        Some(p) => node.bail_attr("pads", &format!("expected four values, got {p:?}")),
    }
}

fn ints(values: &[usize]) -> Vec<i64> {
    values.iter().map(|&v| v as i64).collect()
}

fn conv(node: &NodeProto) -> ExportResult<Box<dyn Op>> {
    let conv = Conv {
        strides: node.get_attr_pair("strides", 1)?,
        pads: pads(node)?,
        dilations: node.get_attr_pair("dilations", 1)?,
        group: node.get_attr_opt("group")?.unwrap_or(1),
    };
    Ok(Box::new(conv))
}

fn dump_conv(op: &dyn Op) -> ExportResult<Vec<AttributeProto>> {
    let conv = op_as::<Conv>(op)?;
    Ok(vec![
        AttributeProto::ints("dilations", ints(&conv.dilations)),
        AttributeProto::int("group", conv.group as i64),
        AttributeProto::ints("pads", ints(&conv.pads)),
        AttributeProto::ints("strides", ints(&conv.strides)),
    ])
}

fn max_pool(node: &NodeProto) -> ExportResult<Box<dyn Op>> {
    let kernel = node.get_attr_tvec::<usize>("kernel_shape")?;
    if kernel.len() != 2 {
        return node.bail_attr("kernel_shape", "only 2D pooling is supported");
    }
    if let Some(ceil_mode) = node.get_attr_opt::<i64>("ceil_mode")? {
        node.expect_attr("ceil_mode", ceil_mode == 0, "0")?;
    }
    let dilations = node.get_attr_pair("dilations", 1)?;
    node.expect_attr("dilations", dilations == [1, 1], "no dilation")?;
    let strides = node.get_attr_pair("strides", 1)?;
    Ok(Box::new(MaxPool::new([kernel[0], kernel[1]], strides, pads(node)?)))
}

fn dump_max_pool(op: &dyn Op) -> ExportResult<Vec<AttributeProto>> {
    let pool = op_as::<MaxPool>(op)?;
    Ok(vec![
        AttributeProto::ints("kernel_shape", ints(&pool.kernel)),
        AttributeProto::ints("pads", ints(&pool.pads)),
        AttributeProto::ints("strides", ints(&pool.strides)),
    ])
}

fn batch_normalization(node: &NodeProto) -> ExportResult<Box<dyn Op>> {
    if node.output.len() > 1 {
        return node.bail("only inference mode (one output) is supported");
    }
    let epsilon = node.get_attr_opt("epsilon")?.unwrap_or(1e-5);
    Ok(Box::new(BatchNorm::new(epsilon)))
}

fn dump_batch_normalization(op: &dyn Op) -> ExportResult<Vec<AttributeProto>> {
    let bn = op_as::<BatchNorm>(op)?;
    Ok(vec![AttributeProto::float("epsilon", bn.epsilon)])
}

fn leaky_relu(node: &NodeProto) -> ExportResult<Box<dyn Op>> {
    let alpha = node.get_attr_opt("alpha")?.unwrap_or(0.01);
    Ok(Box::new(LeakyRelu { alpha }))
}

fn dump_leaky_relu(op: &dyn Op) -> ExportResult<Vec<AttributeProto>> {
    Ok(vec![AttributeProto::float("alpha", op_as::<LeakyRelu>(op)?.alpha)])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(op_type: &str, attribute: Vec<AttributeProto>) -> NodeProto {
        NodeProto { name: "n".into(), op_type: op_type.into(), attribute, ..NodeProto::default() }
    }

    #[test]
    fn conv_attributes() {
        let reg = crate::onnx().op_register;
        let original = Conv { strides: [2, 2], pads: [1, 1, 1, 1], group: 4, ..Conv::default() };
        let attributes = reg.dump(&original).unwrap();
        let op = reg.build(&node("Conv", attributes)).unwrap();
        assert_eq!(op.downcast_ref::<Conv>(), Some(&original));
    }

    #[test]
    fn conv_defaults() {
        let op = conv(&node("Conv", vec![])).unwrap();
        assert_eq!(op.downcast_ref::<Conv>(), Some(&Conv::default()));
    }

    #[test]
    fn auto_pad_is_refused() {
        let n = node("Conv", vec![AttributeProto::string("auto_pad", "SAME_UPPER")]);
        assert!(conv(&n).is_err());
    }

    #[test]
    fn max_pool_needs_kernel() {
        assert!(max_pool(&node("MaxPool", vec![])).is_err());
        let kernel = AttributeProto::ints("kernel_shape", [5, 5]);
        let n = node("MaxPool", vec![kernel, AttributeProto::ints("pads", [2; 4])]);
        let op = max_pool(&n).unwrap();
        assert_eq!(op.downcast_ref::<MaxPool>(), Some(&MaxPool::new([5, 5], [1, 1], [2; 4])));
    }
}
