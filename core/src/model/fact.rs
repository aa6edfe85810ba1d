use std::fmt;
use std::sync::Arc;

use crate::TVec;
use crate::errors::ExportResult;
use crate::tensor::{DatumType, Tensor};

/// A tensor dimension, either known or named.
///
/// Named dimensions only appear on graphs re-read from an artifact exported
/// with a dynamic batch.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dim {
    Val(usize),
    Sym(String),
}

impl Dim {
    pub fn as_val(&self) -> Option<usize> {
        match self {
            Dim::Val(v) => Some(*v),
            Dim::Sym(_) => None,
        }
    }

    pub fn to_usize(&self) -> ExportResult<usize> {
        self.as_val().ok_or_else(|| anyhow::format_err!("Dimension {} is not known", self))
    }

    pub fn is_sym(&self) -> bool {
        matches!(self, Dim::Sym(_))
    }
}

impl From<usize> for Dim {
    fn from(v: usize) -> Dim {
        Dim::Val(v)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Dim::Val(v) => write!(f, "{v}"),
            Dim::Sym(s) => write!(f, "{s}"),
        }
    }
}

/// Type information about a wire.
#[derive(Clone, PartialEq)]
pub struct Fact {
    pub datum_type: DatumType,
    pub shape: TVec<Dim>,
    pub konst: Option<Arc<Tensor>>,
}

impl Fact {
    pub fn dt_shape<D: Into<Dim>>(
        datum_type: DatumType,
        shape: impl IntoIterator<Item = D>,
    ) -> Fact {
        Fact { datum_type, shape: shape.into_iter().map(|d| d.into()).collect(), konst: None }
    }

    pub fn f32<D: Into<Dim>>(shape: impl IntoIterator<Item = D>) -> Fact {
        Fact::dt_shape(DatumType::F32, shape)
    }

    /// Fact describing a tensor, without retaining its value.
    pub fn for_tensor(t: &Tensor) -> Fact {
        Fact::dt_shape(t.datum_type(), t.shape().iter().copied())
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn concrete_shape(&self) -> Option<TVec<usize>> {
        self.shape.iter().map(|d| d.as_val()).collect()
    }

    /// Same datum type and shape, regardless of the constant value.
    pub fn same_as(&self, other: &Fact) -> bool {
        self.datum_type == other.datum_type && self.shape == other.shape
    }

    /// Same datum type and rank, dimensions equal wherever both are known.
    pub fn compatible_with(&self, other: &Fact) -> bool {
        self.datum_type == other.datum_type
            && self.rank() == other.rank()
            && self.shape.iter().zip(other.shape.iter()).all(|(a, b)| match (a, b) {
                (Dim::Val(a), Dim::Val(b)) => a == b,
                _ => true,
            })
    }

    pub fn without_value(&self) -> Fact {
        Fact { konst: None, ..self.clone() }
    }
}

impl From<Arc<Tensor>> for Fact {
    fn from(t: Arc<Tensor>) -> Fact {
        Fact { konst: Some(t.clone()), ..Fact::for_tensor(&t) }
    }
}

impl fmt::Debug for Fact {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for d in &self.shape {
            write!(f, "{d},")?;
        }
        write!(f, "{}", self.datum_type)?;
        if let Some(k) = &self.konst {
            write!(f, " 🟰 {k:?}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatible_ignores_symbols() {
        let a = Fact::dt_shape(DatumType::F32, [Dim::Sym("batch".into()), Dim::Val(3)]);
        let b = Fact::f32([4, 3]);
        let c = Fact::f32([4, 2]);
        assert!(a.compatible_with(&b));
        assert!(!a.compatible_with(&c));
        assert!(!a.same_as(&b));
    }

    #[test]
    fn const_fact() {
        let t = Arc::new(Tensor::from_i64s(&[1, 2]));
        let fact = Fact::from(t.clone());
        assert_eq!(fact.datum_type, DatumType::I64);
        assert_eq!(fact.concrete_shape().unwrap().as_slice(), &[2]);
        assert!(fact.same_as(&fact.without_value()));
    }
}
