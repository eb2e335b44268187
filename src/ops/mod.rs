//! Inference rules for the builtin operator set.
//!
//! Many operators share inference behavior, so there is an M:1 mapping
//! between operator names and rule types. [`register_builtin_ops`] builds
//! the full table.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::registry::{InferenceError, OpRegistry};

pub mod binary;
pub mod layout;
pub mod matmul;
pub mod reduce;
pub mod shape;
pub mod slice;
pub mod unary;

pub use binary::{BinaryOp, VariadicOp, Where};
pub use layout::{Expand, Flatten, Reshape, Squeeze, Transpose, Unsqueeze};
pub use matmul::MatMul;
pub use reduce::ReductionOp;
pub use shape::{Concat, ConstantOfShape, ConstantOp, Range, ShapeOp, Size};
pub use slice::{Gather, Slice};
pub use unary::{Cast, UnaryOp};

/// Resolve an index given as a value in `[-len, len-1]` to a positive index
/// in `[0, len)`, or return None if the index is out of bounds.
pub(crate) fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let len = len.min(i64::MAX as usize) as i64;
    if index < -len || index >= len {
        return None;
    }

    if index >= 0 {
        Some(index as usize)
    } else {
        Some((len + index) as usize)
    }
}

/// Resolve an axis given as a value in `[-ndim, ndim-1]` to the zero-based
/// dimension of a tensor with `ndim` dimensions.
///
/// Negative axis values count backwards from the last dimension.
pub(crate) fn resolve_axis(ndim: usize, axis: i64) -> Result<usize, InferenceError> {
    resolve_index(ndim, axis).ok_or(InferenceError::InvalidValue("axis is out of range"))
}

/// Resolve a sequence of axes values in `[-ndim, ndim-1]` to zero-based
/// dimension indexes in a tensor with `ndim` dimensions.
pub(crate) fn resolve_axes(ndim: usize, axes: &[i64]) -> Result<SmallVec<[usize; 4]>, InferenceError> {
    axes.iter().map(|&axis| resolve_axis(ndim, axis)).collect()
}

/// Register inference rules for the builtin operator set with `reg`.
pub fn register_builtin_ops(reg: &mut OpRegistry) {
    // Elementwise unary operators which preserve the input type.
    let unary = Arc::new(UnaryOp { out_dtype: None });
    for op in [
        "Abs",
        "Acos",
        "Acosh",
        "Asin",
        "Asinh",
        "Atan",
        "Atanh",
        "BitwiseNot",
        "Ceil",
        "Clip",
        "Cos",
        "Cosh",
        "Elu",
        "Erf",
        "Exp",
        "Floor",
        "Gelu",
        "HardSigmoid",
        "HardSwish",
        "Identity",
        "LeakyRelu",
        "Log",
        "Neg",
        "Not",
        "Reciprocal",
        "Relu",
        "Round",
        "Sigmoid",
        "Sign",
        "Sin",
        "Sinh",
        "Softmax",
        "Softplus",
        "Sqrt",
        "Tan",
        "Tanh",
    ] {
        reg.register("", op, 1, unary.clone());
    }

    // Elementwise binary operators with broadcasting.
    let binary = Arc::new(BinaryOp::elementwise());
    for op in ["Add", "Sub", "Mul", "Div", "Mod"] {
        reg.register("", op, 1, binary.clone());
    }
    // Pow allows the exponent to have a different type to the base.
    reg.register("", "Pow", 1, Arc::new(BinaryOp::mixed()));

    // Comparison and logical operators yield booleans.
    let comparison = Arc::new(BinaryOp::comparison());
    for op in [
        "And",
        "Equal",
        "Greater",
        "GreaterOrEqual",
        "Less",
        "LessOrEqual",
        "Or",
        "Xor",
    ] {
        reg.register("", op, 1, comparison.clone());
    }

    let variadic = Arc::new(VariadicOp);
    for op in ["Max", "Mean", "Min", "Sum"] {
        reg.register("", op, 1, variadic.clone());
    }
    reg.register("", "Where", 1, Arc::new(Where));

    let reduction = Arc::new(ReductionOp);
    for op in [
        "ReduceL1",
        "ReduceL2",
        "ReduceLogSum",
        "ReduceLogSumExp",
        "ReduceMax",
        "ReduceMean",
        "ReduceMin",
        "ReduceProd",
        "ReduceSum",
        "ReduceSumSquare",
    ] {
        reg.register("", op, 1, reduction.clone());
    }

    reg.register("", "Cast", 1, Arc::new(Cast));
    reg.register("", "Concat", 1, Arc::new(Concat));
    reg.register("", "Constant", 1, Arc::new(ConstantOp));
    reg.register("", "ConstantOfShape", 9, Arc::new(ConstantOfShape));
    reg.register("", "Expand", 8, Arc::new(Expand));
    reg.register("", "Flatten", 1, Arc::new(Flatten));
    reg.register("", "Gather", 1, Arc::new(Gather));
    reg.register("", "MatMul", 1, Arc::new(MatMul));
    reg.register("", "Range", 11, Arc::new(Range));
    // Reshape takes the target shape as an input from opset 5 onwards.
    // The earlier attribute form is not supported.
    reg.register("", "Reshape", 5, Arc::new(Reshape));
    reg.register("", "Shape", 1, Arc::new(ShapeOp));
    reg.register("", "Size", 1, Arc::new(Size));
    reg.register("", "Slice", 1, Arc::new(Slice));
    reg.register("", "Squeeze", 1, Arc::new(Squeeze));
    reg.register("", "Transpose", 1, Arc::new(Transpose));
    reg.register("", "Unsqueeze", 1, Arc::new(Unsqueeze));
}

#[cfg(test)]
mod tests {
    use super::{resolve_axis, resolve_index};

    #[test]
    fn test_resolve_index() {
        assert_eq!(resolve_index(4, 0), Some(0));
        assert_eq!(resolve_index(4, 3), Some(3));
        assert_eq!(resolve_index(4, -1), Some(3));
        assert_eq!(resolve_index(4, -4), Some(0));
        assert_eq!(resolve_index(4, 4), None);
        assert_eq!(resolve_index(4, -5), None);
        assert_eq!(resolve_index(0, 0), None);
    }

    #[test]
    fn test_resolve_axis() {
        assert_eq!(resolve_axis(3, -1).unwrap(), 2);
        assert!(resolve_axis(3, 3).is_err());
    }
}
