//! Shape inference for matrix multiplication.

use crate::dim::{ConflictError, Dimension, Shape};
use crate::registry::{InferenceContext, InferenceError, InferenceRule};
use crate::value::TypeInfo;

/// MatMul operator.
///
/// The output shape is `(broadcast(lhs_batch_dims, rhs_batch_dims), M, N)`.
/// A rank-1 LHS is treated as a 1xK matrix and a rank-1 RHS as a Kx1
/// matrix, with the padding dimension removed from the output.
pub struct MatMul;

impl InferenceRule for MatMul {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError> {
        let lhs = ctx.require_input(0, "2")?;
        let rhs = ctx.require_input(1, "2")?;

        let dtype = match (lhs.type_info.dtype(), rhs.type_info.dtype()) {
            (Some(a), Some(b)) if a != b => {
                return Err(InferenceError::TypeMismatch {
                    expected: a,
                    actual: b,
                });
            }
            (a, b) => a.or(b),
        };
        let Some(dtype) = dtype else {
            return Ok(vec![TypeInfo::Unknown]);
        };

        let (Some(lhs_dims), Some(rhs_dims)) = (
            lhs.type_info.shape().and_then(Shape::dims),
            rhs.type_info.shape().and_then(Shape::dims),
        ) else {
            return Ok(vec![TypeInfo::unranked(dtype)]);
        };

        if lhs_dims.is_empty() || rhs_dims.is_empty() {
            return Err(InferenceError::RankMismatch(
                "matmul inputs must have rank >= 1",
            ));
        }

        // Pad rank-1 inputs to matrices. The padding dims are stripped from
        // the output at the end.
        let strip_m = lhs_dims.len() == 1;
        let strip_n = rhs_dims.len() == 1;
        let mut lhs_dims = lhs_dims.to_vec();
        let mut rhs_dims = rhs_dims.to_vec();
        if strip_m {
            lhs_dims.insert(0, Dimension::Fixed(1));
        }
        if strip_n {
            rhs_dims.push(Dimension::Fixed(1));
        }

        let (lhs_batch, lhs_mat) = lhs_dims.split_at(lhs_dims.len() - 2);
        let (rhs_batch, rhs_mat) = rhs_dims.split_at(rhs_dims.len() - 2);

        // The K dims must be compatible.
        lhs_mat[1]
            .merge(&rhs_mat[0])
            .ok_or(InferenceError::Conflict(ConflictError::DimensionMismatch {
                axis: lhs_dims.len() - 1,
                expected: lhs_mat[1].clone(),
                actual: rhs_mat[0].clone(),
            }))?;

        let batch = Shape::Ranked(lhs_batch.to_vec()).broadcast(&Shape::Ranked(rhs_batch.to_vec()))?;
        let mut out_dims = match batch {
            Shape::Ranked(dims) => dims,
            Shape::Unranked => return Ok(vec![TypeInfo::unranked(dtype)]),
        };
        if !strip_m {
            out_dims.push(lhs_mat[0].clone());
        }
        if !strip_n {
            out_dims.push(rhs_mat[1].clone());
        }

        Ok(vec![TypeInfo::tensor(dtype, Shape::Ranked(out_dims))])
    }
}
