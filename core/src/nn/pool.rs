use ndarray::{ArrayD, IxDyn};

use crate::internal::*;
use crate::ops::array::Resize;
use crate::ops::cnn::MaxPool;
use crate::trace::Tracer;

/// Square max pooling with symmetric padding.
#[derive(Debug, Clone, new)]
pub struct MaxPool2d {
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
}

impl Layer for MaxPool2d {
    fn name(&self) -> &'static str {
        "MaxPool2d"
    }

    fn forward(&self, tracer: &mut Tracer, inputs: &[OutletId]) -> ExportResult<TVec<OutletId>> {
        let op = MaxPool::new([self.kernel_size; 2], [self.stride; 2], [self.padding; 4]);
        tracer.op(op, &inputs[..1])
    }
}

/// Nearest neighbour upsampling of NCHW data by an integer factor.
#[derive(Debug, Clone, new)]
pub struct Upsample {
    pub scale_factor: usize,
}

impl Layer for Upsample {
    fn name(&self) -> &'static str {
        "Upsample"
    }

    fn forward(&self, tracer: &mut Tracer, inputs: &[OutletId]) -> ExportResult<TVec<OutletId>> {
        let roi = tracer.konst(Tensor::from(ArrayD::<f32>::zeros(IxDyn(&[0]))))?;
        let s = self.scale_factor as f32;
        let scales = tracer.konst(Tensor::from(ndarray::arr1(&[1.0, 1.0, s, s]).into_dyn()))?;
        tracer.op(Resize, &[inputs[0], roi, scales])
    }
}
