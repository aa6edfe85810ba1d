//! Tensors flowing through traced graphs.
use std::fmt;

use ndarray::{ArrayD, ArrayViewD, IxDyn};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand_distr::{Distribution, StandardNormal};

use crate::errors::ExportResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DatumType {
    F32,
    I64,
}

impl fmt::Display for DatumType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DatumType::F32 => write!(f, "F32"),
            DatumType::I64 => write!(f, "I64"),
        }
    }
}

/// A dense, owned tensor.
///
/// Activations and parameters are f32. i64 tensors only appear as operator
/// arguments (reshape targets, slice bounds).
#[derive(Clone, PartialEq)]
pub enum Tensor {
    F32(ArrayD<f32>),
    I64(ArrayD<i64>),
}

impl Tensor {
    pub fn zero(shape: &[usize]) -> Tensor {
        Tensor::F32(ArrayD::zeros(IxDyn(shape)))
    }

    /// Standard normal samples, reproducible for a given seed.
    pub fn random_normal(shape: &[usize], seed: u64) -> Tensor {
        let mut rng = SmallRng::seed_from_u64(seed);
        let len = shape.iter().product();
        let data: Vec<f32> =
            Distribution::<f32>::sample_iter(StandardNormal, &mut rng).take(len).collect();
        Tensor::F32(ArrayD::from_shape_vec(IxDyn(shape), data).unwrap_or_default())
    }

    /// A rank 1 i64 tensor.
    pub fn from_i64s(values: &[i64]) -> Tensor {
        let shape = IxDyn(&[values.len()]);
        Tensor::I64(ArrayD::from_shape_vec(shape, values.to_vec()).unwrap_or_default())
    }

    pub fn datum_type(&self) -> DatumType {
        match self {
            Tensor::F32(_) => DatumType::F32,
            Tensor::I64(_) => DatumType::I64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Tensor::F32(a) => a.shape(),
            Tensor::I64(a) => a.shape(),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_f32(&self) -> ExportResult<&ArrayD<f32>> {
        match self {
            Tensor::F32(a) => Ok(a),
            _ => anyhow::bail!("Expected a F32 tensor, got {:?}", self),
        }
    }

    pub fn as_i64(&self) -> ExportResult<&ArrayD<i64>> {
        match self {
            Tensor::I64(a) => Ok(a),
            _ => anyhow::bail!("Expected a I64 tensor, got {:?}", self),
        }
    }

    pub fn to_array_view_f32(&self) -> ExportResult<ArrayViewD<'_, f32>> {
        Ok(self.as_f32()?.view())
    }

    pub fn into_f32(self) -> ExportResult<ArrayD<f32>> {
        match self {
            Tensor::F32(a) => Ok(a),
            _ => anyhow::bail!("Expected a F32 tensor, got {:?}", self),
        }
    }

    /// Values of an i64 tensor, in logical order.
    pub fn to_i64s(&self) -> ExportResult<Vec<i64>> {
        Ok(self.as_i64()?.iter().copied().collect())
    }

    /// Element-wise comparison with a relative and absolute tolerance.
    pub fn close_enough(&self, other: &Tensor, rtol: f32, atol: f32) -> ExportResult<()> {
        if self.shape() != other.shape() {
            anyhow::bail!("Shape mismatch {:?} != {:?}", self.shape(), other.shape())
        }
        match (self, other) {
            (Tensor::F32(a), Tensor::F32(b)) => {
                for (ix, (x, y)) in a.iter().zip(b.iter()).enumerate() {
                    if x.is_nan() && y.is_nan() {
                        continue;
                    }
                    if (x - y).abs() > atol + rtol * y.abs() {
                        anyhow::bail!("Mismatch at position {}: {} != {}", ix, x, y)
                    }
                }
                Ok(())
            }
            (Tensor::I64(a), Tensor::I64(b)) if a == b => Ok(()),
            _ => anyhow::bail!("Mismatch between {:?} and {:?}", self, other),
        }
    }
}

impl From<ArrayD<f32>> for Tensor {
    fn from(a: ArrayD<f32>) -> Tensor {
        Tensor::F32(a)
    }
}

impl From<ArrayD<i64>> for Tensor {
    fn from(a: ArrayD<i64>) -> Tensor {
        Tensor::I64(a)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.shape().iter().map(|d| d.to_string()).collect::<Vec<_>>().join(","))?;
        write!(f, ",{}", self.datum_type())?;
        if self.len() <= 8 {
            match self {
                Tensor::F32(a) => write!(f, " {:?}", a.iter().collect::<Vec<_>>())?,
                Tensor::I64(a) => write!(f, " {:?}", a.iter().collect::<Vec<_>>())?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_normal_is_reproducible() {
        let a = Tensor::random_normal(&[2, 3, 4], 42);
        let b = Tensor::random_normal(&[2, 3, 4], 42);
        let c = Tensor::random_normal(&[2, 3, 4], 43);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.shape(), &[2, 3, 4]);
    }

    #[test]
    fn close_enough_tolerates_rounding() {
        let a = Tensor::from(ndarray::arr1(&[1.0f32, 2.0]).into_dyn());
        let b = Tensor::from(ndarray::arr1(&[1.0f32 + 1e-6, 2.0]).into_dyn());
        let c = Tensor::from(ndarray::arr1(&[1.1f32, 2.0]).into_dyn());
        assert!(a.close_enough(&b, 1e-4, 1e-5).is_ok());
        assert!(a.close_enough(&c, 1e-4, 1e-5).is_err());
    }

    #[test]
    fn close_enough_checks_shapes() {
        let a = Tensor::zero(&[2, 2]);
        let b = Tensor::zero(&[4]);
        assert!(a.close_enough(&b, 1e-4, 1e-5).is_err());
    }

    #[test]
    fn i64_helpers() {
        let t = Tensor::from_i64s(&[0, -1, 3]);
        assert_eq!(t.datum_type(), DatumType::I64);
        assert_eq!(t.to_i64s().unwrap(), vec![0, -1, 3]);
        assert!(t.as_f32().is_err());
    }
}
