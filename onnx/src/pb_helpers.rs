//! Attribute access on protobuf nodes, and attribute construction.
use std::fmt::{self, Display};
use std::str;

use onnxport_core::internal::*;

use crate::pb::attribute_proto::AttributeType;
use crate::pb::*;

impl Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            AttributeType::Int => "int",
            AttributeType::Float => "float",
            AttributeType::Tensor => "tensor",
            AttributeType::String => "string",
            AttributeType::Ints => "list of ints",
            AttributeType::Floats => "list of floats",
            AttributeType::Tensors => "list of tensors",
            AttributeType::Strings => "list of strings",
            AttributeType::Graph => "graph",
            AttributeType::Graphs => "graphs",
            _ => "<undefined>",
        })
    }
}

impl AttributeProto {
    pub fn attr_type(&self) -> Option<AttributeType> {
        AttributeType::from_i32(self.r#type)
    }

    pub fn int(name: &str, i: i64) -> AttributeProto {
        AttributeProto {
            name: name.to_string(),
            r#type: AttributeType::Int as i32,
            i,
            ..AttributeProto::default()
        }
    }

    pub fn ints(name: &str, ints: impl IntoIterator<Item = i64>) -> AttributeProto {
        AttributeProto {
            name: name.to_string(),
            r#type: AttributeType::Ints as i32,
            ints: ints.into_iter().collect(),
            ..AttributeProto::default()
        }
    }

    pub fn float(name: &str, f: f32) -> AttributeProto {
        AttributeProto {
            name: name.to_string(),
            r#type: AttributeType::Float as i32,
            f,
            ..AttributeProto::default()
        }
    }

    pub fn string(name: &str, s: &str) -> AttributeProto {
        AttributeProto {
            name: name.to_string(),
            r#type: AttributeType::String as i32,
            s: s.as_bytes().to_vec(),
            ..AttributeProto::default()
        }
    }
}

pub trait AttrScalarType<'a>: 'a + Sized {
    fn get_attr_opt_scalar(node: &'a NodeProto, name: &str) -> ExportResult<Option<Self>>;
}

impl<'a> AttrScalarType<'a> for Tensor {
    fn get_attr_opt_scalar(node: &'a NodeProto, name: &str) -> ExportResult<Option<Self>> {
        let Some(attr) = node.get_attr_opt_with_type(name, AttributeType::Tensor)? else {
            return Ok(None);
        };
        let t = attr.t.as_ref().with_context(|| format!("attribute '{name}' has no tensor"))?;
        Ok(Some(t.try_into()?))
    }
}

impl<'a> AttrScalarType<'a> for &'a str {
    fn get_attr_opt_scalar(node: &'a NodeProto, name: &str) -> ExportResult<Option<Self>> {
        node.get_attr_opt_with_type(name, AttributeType::String)?
            .map(|attr| str::from_utf8(&attr.s).map_err(Into::into))
            .transpose()
    }
}

impl<'a> AttrScalarType<'a> for i64 {
    fn get_attr_opt_scalar(node: &'a NodeProto, name: &str) -> ExportResult<Option<Self>> {
        Ok(node.get_attr_opt_with_type(name, AttributeType::Int)?.map(|attr| attr.i))
    }
}

impl<'a> AttrScalarType<'a> for usize {
    fn get_attr_opt_scalar(node: &'a NodeProto, name: &str) -> ExportResult<Option<Self>> {
        let int: Option<i64> = AttrScalarType::get_attr_opt_scalar(node, name)?;
        int.map(|int| {
            node.expect_attr(name, int >= 0, "non-negative int")?;
            Ok(int as usize)
        })
        .transpose()
    }
}

impl<'a> AttrScalarType<'a> for f32 {
    fn get_attr_opt_scalar(node: &'a NodeProto, name: &str) -> ExportResult<Option<Self>> {
        Ok(node.get_attr_opt_with_type(name, AttributeType::Float)?.map(|attr| attr.f))
    }
}

pub trait AttrTVecType<'a>: 'a + Sized {
    fn get_attr_opt_tvec(node: &'a NodeProto, name: &str) -> ExportResult<Option<TVec<Self>>>;
}

impl<'a> AttrTVecType<'a> for i64 {
    fn get_attr_opt_tvec(node: &'a NodeProto, name: &str) -> ExportResult<Option<TVec<Self>>> {
        let attr = node.get_attr_opt_with_type(name, AttributeType::Ints)?;
        Ok(attr.map(|a| a.ints.iter().copied().collect()))
    }
}

impl<'a> AttrTVecType<'a> for usize {
    fn get_attr_opt_tvec(node: &'a NodeProto, name: &str) -> ExportResult<Option<TVec<Self>>> {
        let ints: Option<TVec<i64>> = AttrTVecType::get_attr_opt_tvec(node, name)?;
        ints.map(|ints| {
            for int in ints.iter() {
                node.expect_attr(name, *int >= 0, "list of non-negative ints")?;
            }
            Ok(ints.iter().map(|&x| x as usize).collect())
        })
        .transpose()
    }
}

impl NodeProto {
    pub fn bail<T>(&self, msg: &str) -> ExportResult<T> {
        bail!("Node {} ({}): {}", self.name, self.op_type, msg)
    }

    pub fn bail_attr<T>(&self, attr: &str, msg: &str) -> ExportResult<T> {
        bail!("Node {} ({}), attribute '{}': {}", self.name, self.op_type, attr, msg)
    }

    pub fn expect_attr(&self, attr: &str, cond: bool, what: &str) -> ExportResult<()> {
        if !cond { self.bail_attr(attr, &format!("expected {what}")) } else { Ok(()) }
    }

    pub fn get_attr_opt_with_type(
        &self,
        name: &str,
        ty: AttributeType,
    ) -> ExportResult<Option<&AttributeProto>> {
        let Some(attr) = self.attribute.iter().find(|a| a.name == name) else {
            return Ok(None);
        };
        if attr.r#type != ty as i32 {
            let found = attr.attr_type().map(|t| t.to_string()).unwrap_or("<invalid>".into());
            return self.bail_attr(name, &format!("expected {ty}, got {found}"));
        }
        Ok(Some(attr))
    }

    pub fn get_attr_opt<'a, T>(&'a self, name: &str) -> ExportResult<Option<T>>
    where
        T: AttrScalarType<'a>,
    {
        T::get_attr_opt_scalar(self, name)
    }

    pub fn get_attr<'a, T>(&'a self, name: &str) -> ExportResult<T>
    where
        T: AttrScalarType<'a>,
    {
        match self.get_attr_opt(name)? {
            Some(v) => Ok(v),
            None => self.bail(&format!("expected attribute '{name}'")),
        }
    }

    pub fn get_attr_opt_tvec<'a, T>(&'a self, name: &str) -> ExportResult<Option<TVec<T>>>
    where
        T: AttrTVecType<'a>,
    {
        T::get_attr_opt_tvec(self, name)
    }

    pub fn get_attr_tvec<'a, T>(&'a self, name: &str) -> ExportResult<TVec<T>>
    where
        T: AttrTVecType<'a>,
    {
        match self.get_attr_opt_tvec(name)? {
            Some(v) => Ok(v),
            None => self.bail(&format!("expected attribute '{name}'")),
        }
    }

    /// A pair of ints attribute, as the spatial parameters of 2D ops.
    pub fn get_attr_pair(&self, name: &str, default: usize) -> ExportResult<[usize; 2]> {
        match self.get_attr_opt_tvec::<usize>(name)? {
            None => Ok([default; 2]),
            Some(v) if v.len() == 2 => Ok([v[0], v[1]]),
            Some(v) => self.bail_attr(name, &format!("expected two values, got {v:?}")),
        }
    }
}
