//! Shape inference for elementwise binary and variadic operators.

use crate::dim::Shape;
use crate::registry::{InferenceContext, InferenceError, InferenceRule};
use crate::value::{DataType, TypeInfo};

/// Return a tensor input's shape, treating a fully unknown type as a tensor
/// of unknown rank.
fn tensor_shape(type_info: &TypeInfo) -> Result<Shape, InferenceError> {
    match type_info {
        TypeInfo::Tensor { shape, .. } => Ok(shape.clone()),
        TypeInfo::Unknown => Ok(Shape::Unranked),
        _ => Err(InferenceError::InvalidValue("expected tensor input")),
    }
}

/// Check that two inputs declare the same element type, where both are
/// known.
fn check_dtypes_match(a: &TypeInfo, b: &TypeInfo) -> Result<(), InferenceError> {
    match (a.dtype(), b.dtype()) {
        (Some(a), Some(b)) if a != b => Err(InferenceError::TypeMismatch {
            expected: a,
            actual: b,
        }),
        _ => Ok(()),
    }
}

/// Shared inference rule for elementwise binary operators.
///
/// These operators take two inputs and return an output whose shape is the
/// result of broadcasting the two input shapes together following NumPy
/// rules.
pub struct BinaryOp {
    /// Output element type, if it differs from the inputs'.
    pub out_dtype: Option<DataType>,

    /// True if the two inputs may declare different element types, as with
    /// `Pow`'s base and exponent.
    pub allow_mixed_types: bool,
}

impl BinaryOp {
    /// Rule for operators like `Add` whose output type matches the inputs.
    pub fn elementwise() -> BinaryOp {
        BinaryOp {
            out_dtype: None,
            allow_mixed_types: false,
        }
    }

    /// Rule for comparison and logical operators, which yield booleans.
    pub fn comparison() -> BinaryOp {
        BinaryOp {
            out_dtype: Some(DataType::Bool),
            allow_mixed_types: false,
        }
    }

    /// Rule for operators which permit inputs of different element types.
    pub fn mixed() -> BinaryOp {
        BinaryOp {
            out_dtype: None,
            allow_mixed_types: true,
        }
    }
}

impl InferenceRule for BinaryOp {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError> {
        let a = ctx.require_input(0, "2")?;
        let b = ctx.require_input(1, "2")?;

        if !self.allow_mixed_types {
            check_dtypes_match(a.type_info, b.type_info)?;
        }

        let shape = tensor_shape(a.type_info)?.broadcast(&tensor_shape(b.type_info)?)?;

        let dtype = self
            .out_dtype
            .or(a.type_info.dtype())
            .or(b.type_info.dtype());
        let out = match dtype {
            Some(dtype) => TypeInfo::tensor(dtype, shape),
            None => TypeInfo::Unknown,
        };

        Ok(vec![out])
    }
}

/// Shared inference rule for variadic operators such as `Max` and `Sum`,
/// which broadcast all of their inputs together.
pub struct VariadicOp;

impl InferenceRule for VariadicOp {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError> {
        let first = ctx.require_input(0, "at least 1")?;

        let mut shape = tensor_shape(first.type_info)?;
        let mut dtype = first.type_info.dtype();

        for index in 1..ctx.num_inputs() {
            let input = ctx.require_input(index, "at least 1")?;
            check_dtypes_match(first.type_info, input.type_info)?;
            shape = shape.broadcast(&tensor_shape(input.type_info)?)?;
            dtype = dtype.or(input.type_info.dtype());
        }

        let out = match dtype {
            Some(dtype) => TypeInfo::tensor(dtype, shape),
            None => TypeInfo::Unknown,
        };
        Ok(vec![out])
    }
}

/// Where operator.
///
/// Selects elements from two inputs based on a boolean condition, with all
/// three inputs broadcast together.
pub struct Where;

impl InferenceRule for Where {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError> {
        let cond = ctx.require_input(0, "3")?;
        let x = ctx.require_input(1, "3")?;
        let y = ctx.require_input(2, "3")?;

        if let Some(cond_dtype) = cond.type_info.dtype() {
            if cond_dtype != DataType::Bool {
                return Err(InferenceError::TypeMismatch {
                    expected: DataType::Bool,
                    actual: cond_dtype,
                });
            }
        }
        check_dtypes_match(x.type_info, y.type_info)?;

        let shape = tensor_shape(cond.type_info)?
            .broadcast(&tensor_shape(x.type_info)?)?
            .broadcast(&tensor_shape(y.type_info)?)?;

        let out = match x.type_info.dtype().or(y.type_info.dtype()) {
            Some(dtype) => TypeInfo::tensor(dtype, shape),
            None => TypeInfo::Unknown,
        };
        Ok(vec![out])
    }
}
