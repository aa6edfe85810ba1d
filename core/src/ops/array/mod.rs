/// # Operators on array and shapes
mod concat;
mod reshape;
mod resize;
mod slice;
mod transpose;

pub use self::concat::Concat;
pub use self::reshape::Reshape;
pub use self::resize::Resize;
pub use self::slice::Slice;
pub use self::transpose::Transpose;

use crate::internal::*;

/// Values of a constant i64 operand, as recorded in its fact.
pub(crate) fn const_i64s(fact: &Fact, what: &str) -> ExportResult<Vec<i64>> {
    let konst = fact.konst.as_ref().with_context(|| format!("{what} must be a constant"))?;
    konst.to_i64s().with_context(|| format!("{what} must be a i64 tensor"))
}
