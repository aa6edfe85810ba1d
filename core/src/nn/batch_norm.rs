use crate::internal::*;
use crate::ops::nn::BatchNorm;
use crate::trace::Tracer;

/// Batch normalization over the channel axis of NCHW data.
///
/// Only the inference form can be recorded: tracing a layer in training mode
/// fails.
#[derive(Debug, Clone)]
pub struct BatchNorm2d {
    pub eps: f32,
    pub momentum: f32,
    pub weight: Tensor,
    pub bias: Tensor,
    pub running_mean: Tensor,
    pub running_var: Tensor,
    pub training: bool,
}

impl BatchNorm2d {
    /// Identity statistics, `eps` 1e-3 and `momentum` 0.03. Created in eval
    /// mode.
    pub fn new(channels: usize) -> BatchNorm2d {
        let ones = Tensor::from(ndarray::ArrayD::from_elem(vec![channels], 1f32));
        BatchNorm2d {
            eps: 1e-3,
            momentum: 0.03,
            weight: ones.clone(),
            bias: Tensor::zero(&[channels]),
            running_mean: Tensor::zero(&[channels]),
            running_var: ones,
            training: false,
        }
    }
}

impl Layer for BatchNorm2d {
    fn name(&self) -> &'static str {
        "BatchNorm2d"
    }

    fn forward(&self, tracer: &mut Tracer, inputs: &[OutletId]) -> ExportResult<TVec<OutletId>> {
        if self.training {
            bail!(ExportError::Trace(format!(
                "{}/BatchNorm2d is in training mode",
                tracer.scope()
            )));
        }
        let wires = [
            inputs[0],
            tracer.param("weight", &self.weight)?,
            tracer.param("bias", &self.bias)?,
            tracer.param("running_mean", &self.running_mean)?,
            tracer.param("running_var", &self.running_var)?,
        ];
        tracer.op(BatchNorm::new(self.eps), &wires)
    }

    fn parameters(&self) -> Vec<(&'static str, &Tensor)> {
        vec![
            ("weight", &self.weight),
            ("bias", &self.bias),
            ("running_mean", &self.running_mean),
            ("running_var", &self.running_var),
        ]
    }

    fn parameters_mut(&mut self) -> Vec<(&'static str, &mut Tensor)> {
        vec![
            ("weight", &mut self.weight),
            ("bias", &mut self.bias),
            ("running_mean", &mut self.running_mean),
            ("running_var", &mut self.running_var),
        ]
    }

    fn set_training(&mut self, training: bool) {
        self.training = training
    }

    fn is_training(&self) -> bool {
        self.training
    }
}
