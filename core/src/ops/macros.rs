/// Declare a unary f32 element-wise operator.
///
/// The closure receives the op (for its parameters) and one value.
#[macro_export]
macro_rules! element_wise {
    (@impl $Op:ident, $onnx:expr, $f:expr, {$($extra:tt)*}) => {
        impl $crate::ops::Op for $Op {
            fn name(&self) -> std::borrow::Cow<'_, str> {
                $onnx.into()
            }

            $($extra)*

            fn eval(
                &self,
                inputs: $crate::TVec<std::sync::Arc<$crate::tensor::Tensor>>,
            ) -> $crate::errors::ExportResult<$crate::TVec<$crate::tensor::Tensor>> {
                let input = $crate::args_1!(inputs);
                let mut a = $crate::ops::into_tensor(input).into_f32()?;
                let f: fn(&Self, f32) -> f32 = $f;
                a.mapv_inplace(|x| f(self, x));
                Ok($crate::tvec!(a.into()))
            }

            fn output_facts(
                &self,
                inputs: &[&$crate::model::Fact],
            ) -> $crate::errors::ExportResult<$crate::TVec<$crate::model::Fact>> {
                $crate::anyhow::ensure!(inputs.len() == 1, "{} expects one input", $onnx);
                $crate::anyhow::ensure!(
                    inputs[0].datum_type == $crate::tensor::DatumType::F32,
                    "{} expects a F32 input",
                    $onnx
                );
                Ok($crate::tvec!(inputs[0].without_value()))
            }
        }
    };
    ($Op:ident, $onnx:expr, $f:expr) => {
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $Op;

        $crate::element_wise!(@impl $Op, $onnx, $f, {});
    };
    ($Op:ident {$( $var: ident : $var_typ: ty),*}, $onnx:expr, $f:expr) => {
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $Op { $(pub $var: $var_typ),* }

        $crate::element_wise!(@impl $Op, $onnx, $f, {
            fn info(&self) -> $crate::errors::ExportResult<Vec<String>> {
                Ok(vec![$(format!("{}: {:?}", stringify!($var), self.$var)),*])
            }
        });
    };
}
