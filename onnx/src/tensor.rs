//! Tensors and types, between the protobuf and the graph representation.
use ndarray::{ArrayD, IxDyn};
use onnxport_core::internal::*;

use crate::pb::tensor_proto::DataType;
use crate::pb::tensor_shape_proto::{Dimension, dimension};
use crate::pb::*;

impl TryFrom<DataType> for DatumType {
    type Error = anyhow::Error;
    fn try_from(t: DataType) -> ExportResult<DatumType> {
        match t {
            DataType::Float => Ok(DatumType::F32),
            DataType::Int64 => Ok(DatumType::I64),
            _ => bail!("Unsupported DataType {:?}", t),
        }
    }
}

impl From<DatumType> for DataType {
    fn from(dt: DatumType) -> DataType {
        match dt {
            DatumType::F32 => DataType::Float,
            DatumType::I64 => DataType::Int64,
        }
    }
}

pub fn datum_type(elem_type: i32) -> ExportResult<DatumType> {
    DataType::from_i32(elem_type)
        .with_context(|| format!("Invalid element type {elem_type}"))?
        .try_into()
}

fn from_le_bytes<T: Copy, const N: usize>(data: &[u8], f: fn([u8; N]) -> T) -> Vec<T> {
    data.chunks_exact(N).map(|c| f(c.try_into().unwrap_or([0; N]))).collect()
}

/// Values from either the raw data or the typed field.
fn values<T: Copy, const N: usize>(
    t: &TensorProto,
    typed: &[T],
    f: fn([u8; N]) -> T,
) -> ExportResult<ArrayD<T>> {
    let shape = t
        .dims
        .iter()
        .map(|&d| usize::try_from(d).with_context(|| format!("Invalid dimension {d}")))
        .collect::<ExportResult<Vec<usize>>>()?;
    let data = if !t.raw_data.is_empty() {
        let len = shape.iter().product::<usize>() * N;
        ensure!(t.raw_data.len() == len, "Tensor {}: raw data does not match dims", t.name);
        from_le_bytes(&t.raw_data, f)
    } else {
        typed.to_vec()
    };
    ArrayD::from_shape_vec(IxDyn(&shape), data)
        .with_context(|| format!("Tensor {}: data does not match dims", t.name))
}

impl TryFrom<&TensorProto> for Tensor {
    type Error = anyhow::Error;
    fn try_from(t: &TensorProto) -> ExportResult<Tensor> {
        Ok(match datum_type(t.data_type)? {
            DatumType::F32 => values(t, &t.float_data, f32::from_le_bytes)?.into(),
            DatumType::I64 => values(t, &t.int64_data, i64::from_le_bytes)?.into(),
        })
    }
}

/// A named initializer. Values are stored as little-endian raw data.
pub fn tensor_proto(name: &str, t: &Tensor) -> TensorProto {
    let raw_data = match t {
        Tensor::F32(a) => a.iter().flat_map(|x| x.to_le_bytes()).collect(),
        Tensor::I64(a) => a.iter().flat_map(|x| x.to_le_bytes()).collect(),
    };
    TensorProto {
        name: name.to_string(),
        dims: t.shape().iter().map(|&d| d as i64).collect(),
        data_type: DataType::from(t.datum_type()) as i32,
        raw_data,
        ..TensorProto::default()
    }
}

/// Fact for a declared graph input or output. `dim_param` becomes a named
/// dimension.
pub fn translate_fact(t: &type_proto::Tensor) -> ExportResult<Fact> {
    let dt = datum_type(t.elem_type)?;
    let shape = t.shape.as_ref().context("Value has no shape")?;
    let dims = shape
        .dim
        .iter()
        .map(|d| match &d.value {
            Some(dimension::Value::DimValue(v)) if *v >= 0 => Ok(Dim::Val(*v as usize)),
            Some(dimension::Value::DimParam(p)) if !p.is_empty() => Ok(Dim::Sym(p.clone())),
            other => bail!("Unsupported dimension {:?}", other),
        })
        .collect::<ExportResult<TVec<Dim>>>()?;
    Ok(Fact::dt_shape(dt, dims))
}

pub fn value_info(name: &str, fact: &Fact) -> ValueInfoProto {
    let dim = fact
        .shape
        .iter()
        .map(|d| Dimension {
            value: Some(match d {
                Dim::Val(v) => dimension::Value::DimValue(*v as i64),
                Dim::Sym(s) => dimension::Value::DimParam(s.clone()),
            }),
            ..Dimension::default()
        })
        .collect();
    let tensor = type_proto::Tensor {
        elem_type: DataType::from(fact.datum_type) as i32,
        shape: Some(TensorShapeProto { dim }),
    };
    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            value: Some(type_proto::Value::TensorType(tensor)),
            ..TypeProto::default()
        }),
        ..ValueInfoProto::default()
    }
}

/// The tensor type of a value, the only kind of type used here.
pub fn tensor_type(info: &ValueInfoProto) -> ExportResult<&type_proto::Tensor> {
    match info.r#type.as_ref().and_then(|t| t.value.as_ref()) {
        Some(type_proto::Value::TensorType(t)) => Ok(t),
        None => bail!("Value {} is not typed", info.name),
    }
}
