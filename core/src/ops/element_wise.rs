//! Activations.

element_wise!(Sigmoid, "Sigmoid", |_, x| 1.0 / (1.0 + (-x).exp()));
element_wise!(Relu, "Relu", |_, x| x.max(0.0));
element_wise!(Exp, "Exp", |_, x| x.exp());
element_wise!(LeakyRelu { alpha: f32 }, "LeakyRelu", |op, x| x.max(0.0) + op.alpha * x.min(0.0));

// A single fused op, with no counterpart in the standard ONNX operator set.
element_wise!(SiLU, "SiLU", |_, x| x / (1.0 + (-x).exp()));

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::*;
    use approx::assert_abs_diff_eq;

    fn run(op: impl Op, values: &[f32]) -> Vec<f32> {
        let t = Arc::new(Tensor::from(ndarray::arr1(values).into_dyn()));
        let out = op.eval(tvec!(t)).unwrap().remove(0);
        out.as_f32().unwrap().iter().copied().collect()
    }

    #[test]
    fn silu_matches_sigmoid_mul() {
        let xs = [-3.0f32, -0.5, 0.0, 0.5, 3.0];
        let s = run(Sigmoid, &xs);
        let silu = run(SiLU, &xs);
        for ((x, s), y) in xs.iter().zip(s.iter()).zip(silu.iter()) {
            assert_abs_diff_eq!(x * s, *y, epsilon = 1e-6);
        }
    }

    #[test]
    fn leaky_relu() {
        assert_eq!(run(LeakyRelu { alpha: 0.1 }, &[-2.0, 3.0]), vec![-0.2, 3.0]);
    }

    #[test]
    fn names() {
        assert_eq!(SiLU.name(), "SiLU");
        assert_eq!(Relu.name(), "Relu");
        assert_eq!(LeakyRelu { alpha: 0.1 }.info().unwrap(), vec!["alpha: 0.1".to_string()]);
    }
}
