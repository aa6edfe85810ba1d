//! Parameter-free activation modules.
use crate::internal::*;
use crate::ops::binary::Mul;
use crate::ops::element_wise as ew;
use crate::trace::Tracer;

/// `x * sigmoid(x)`, recorded as the fused `SiLU` operator, which the
/// standard opsets do not define.
#[derive(Debug, Clone, Default)]
pub struct SiLU;

impl Layer for SiLU {
    fn name(&self) -> &'static str {
        "SiLU"
    }

    fn forward(&self, tracer: &mut Tracer, inputs: &[OutletId]) -> ExportResult<TVec<OutletId>> {
        tracer.op(ew::SiLU, &inputs[..1])
    }
}

/// Same function as [`SiLU`], recorded as `Sigmoid` followed by `Mul`.
#[derive(Debug, Clone, Default)]
pub struct ExportSiLU;

impl Layer for ExportSiLU {
    fn name(&self) -> &'static str {
        "ExportSiLU"
    }

    fn forward(&self, tracer: &mut Tracer, inputs: &[OutletId]) -> ExportResult<TVec<OutletId>> {
        let s = tracer.op1(ew::Sigmoid, &inputs[..1])?;
        tracer.op(Mul, &[inputs[0], s])
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReLU;

impl Layer for ReLU {
    fn name(&self) -> &'static str {
        "ReLU"
    }

    fn forward(&self, tracer: &mut Tracer, inputs: &[OutletId]) -> ExportResult<TVec<OutletId>> {
        tracer.op(ew::Relu, &inputs[..1])
    }
}

#[derive(Debug, Clone)]
pub struct LeakyReLU {
    pub negative_slope: f32,
}

impl Layer for LeakyReLU {
    fn name(&self) -> &'static str {
        "LeakyReLU"
    }

    fn forward(&self, tracer: &mut Tracer, inputs: &[OutletId]) -> ExportResult<TVec<OutletId>> {
        tracer.op(ew::LeakyRelu { alpha: self.negative_slope }, &inputs[..1])
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sigmoid;

impl Layer for Sigmoid {
    fn name(&self) -> &'static str {
        "Sigmoid"
    }

    fn forward(&self, tracer: &mut Tracer, inputs: &[OutletId]) -> ExportResult<TVec<OutletId>> {
        tracer.op(ew::Sigmoid, &inputs[..1])
    }
}
