//! Shape inference for operators which rearrange tensor layouts.

use crate::dim::{Dimension, Shape};
use crate::ops::{resolve_axis, resolve_axes};
use crate::registry::{InferenceContext, InferenceError, InferenceRule, InputInfo};
use crate::value::{DataType, TypeInfo};

/// Unpack a tensor input into its element type and shape.
///
/// Returns `None` for a fully unknown input; the caller should produce an
/// unknown output in that case.
fn tensor_parts<'a>(
    input: &InputInfo<'a>,
) -> Result<Option<(DataType, &'a Shape)>, InferenceError> {
    match input.type_info {
        TypeInfo::Tensor { dtype, shape } => Ok(Some((*dtype, shape))),
        TypeInfo::Unknown => Ok(None),
        _ => Err(InferenceError::InvalidValue("expected tensor input")),
    }
}

/// Reshape operator.
///
/// The output shape is the *value* of the second input. A `0` entry copies
/// the corresponding input dimension and a single `-1` entry is resolved by
/// dividing the input element count by the product of the other entries.
pub struct Reshape;

impl InferenceRule for Reshape {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError> {
        let data = ctx.require_input(0, "2")?;
        let shape_input = ctx.require_input(1, "2")?;

        let Some((dtype, data_shape)) = tensor_parts(&data)? else {
            return Ok(vec![TypeInfo::Unknown]);
        };

        let Some(value) = shape_input.value else {
            // Fall back to rank-only inference from the shape input's
            // length.
            let out = match shape_input.type_info.shape().and_then(Shape::dims) {
                Some([Dimension::Fixed(len)]) => {
                    TypeInfo::tensor(dtype, Shape::Ranked(vec![Dimension::Unknown; *len]))
                }
                _ => TypeInfo::unranked(dtype),
            };
            return Ok(vec![out]);
        };
        if value.ndim() != 1 {
            return Err(InferenceError::InvalidValue("shape input must be a vector"));
        }

        let allow_zero = ctx.attr_int("allowzero").unwrap_or(0) != 0;
        let data_dims = data_shape.dims();

        let mut out_dims = Vec::with_capacity(value.values().len());
        let mut wildcard = None;
        for (i, &entry) in value.values().iter().enumerate() {
            let dim = match entry {
                -1 => {
                    if wildcard.is_some() {
                        return Err(InferenceError::ShapeArithmetic(
                            "shape has more than one -1 entry",
                        ));
                    }
                    wildcard = Some(i);
                    Dimension::Unknown
                }
                0 if !allow_zero => match data_dims.and_then(|dims| dims.get(i)) {
                    Some(dim) => dim.clone(),
                    None => {
                        return Err(InferenceError::ShapeArithmetic(
                            "no input dimension to copy for 0 entry",
                        ));
                    }
                },
                entry if entry >= 0 => Dimension::Fixed(entry as usize),
                _ => {
                    return Err(InferenceError::ShapeArithmetic(
                        "shape entry is negative",
                    ));
                }
            };
            out_dims.push(dim);
        }

        if let Some(wildcard) = wildcard {
            let known: Option<usize> = out_dims
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != wildcard)
                .map(|(_, dim)| dim.as_fixed())
                .product::<Option<usize>>();
            if let (Some(total), Some(known)) = (data_shape.num_elements(), known) {
                if known == 0 || total % known != 0 {
                    return Err(InferenceError::ShapeArithmetic(
                        "input element count does not divide the specified shape",
                    ));
                }
                out_dims[wildcard] = Dimension::Fixed(total / known);
            }
        }

        Ok(vec![TypeInfo::tensor(dtype, Shape::Ranked(out_dims))])
    }
}

/// Expand operator.
///
/// Broadcasts the input against the shape given by the *value* of the
/// second input.
pub struct Expand;

impl InferenceRule for Expand {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError> {
        let data = ctx.require_input(0, "2")?;
        let shape_input = ctx.require_input(1, "2")?;

        let Some((dtype, data_shape)) = tensor_parts(&data)? else {
            return Ok(vec![TypeInfo::Unknown]);
        };

        if let Some(value) = shape_input.value {
            if value.ndim() != 1 {
                return Err(InferenceError::InvalidValue("shape input must be a vector"));
            }
            let mut target = Vec::with_capacity(value.values().len());
            for &size in value.values() {
                if size < 0 {
                    return Err(InferenceError::ShapeArithmetic(
                        "shape input has a negative entry",
                    ));
                }
                target.push(Dimension::Fixed(size as usize));
            }
            let out_shape = data_shape.broadcast(&Shape::Ranked(target))?;
            return Ok(vec![TypeInfo::tensor(dtype, out_shape)]);
        }

        let shape_len = match shape_input.type_info.shape().and_then(Shape::dims) {
            Some([Dimension::Fixed(len)]) => Some(*len),
            _ => None,
        };

        // If we know the length of the shape but not the values, we can
        // still infer the output rank. Any input dims of size > 1 must be
        // unchanged in the output; size-1, symbolic and unknown dims may
        // broadcast.
        let out = match (data_shape.dims(), shape_len) {
            (Some(dims), Some(len)) => {
                let out_rank = dims.len().max(len);
                let lead_data = out_rank - len;
                let pad_data = out_rank - dims.len();
                let out_dims = (0..out_rank)
                    .map(|i| {
                        if i < lead_data {
                            dims[i].clone()
                        } else if i < pad_data {
                            Dimension::Unknown
                        } else {
                            match dims[i - pad_data] {
                                Dimension::Fixed(size) if size > 1 => Dimension::Fixed(size),
                                _ => Dimension::Unknown,
                            }
                        }
                    })
                    .collect();
                TypeInfo::tensor(dtype, Shape::Ranked(out_dims))
            }
            _ => TypeInfo::unranked(dtype),
        };
        Ok(vec![out])
    }
}

/// Multiply a run of dimensions into a single dimension.
///
/// The product is only known when at most one factor is non-fixed and the
/// fixed factors multiply to 1.
fn dim_product(dims: &[Dimension]) -> Dimension {
    let mut product: usize = 1;
    let mut non_fixed = None;
    let mut non_fixed_count = 0;
    for dim in dims {
        match dim {
            Dimension::Fixed(size) => product *= size,
            other => {
                non_fixed = Some(other);
                non_fixed_count += 1;
            }
        }
    }
    match (non_fixed, non_fixed_count) {
        (None, _) => Dimension::Fixed(product),
        (Some(dim), 1) if product == 1 => dim.clone(),
        _ => Dimension::Unknown,
    }
}

/// Flatten operator.
///
/// Collapses the input into a matrix, partitioned at the `axis` attribute.
/// Note the attribute is an exclusive count rather than an inclusive index.
pub struct Flatten;

impl InferenceRule for Flatten {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError> {
        let input = ctx.require_input(0, "1")?;
        let axis = ctx.attr_int("axis").unwrap_or(1);

        let Some((dtype, shape)) = tensor_parts(&input)? else {
            return Ok(vec![TypeInfo::Unknown]);
        };
        let Some(dims) = shape.dims() else {
            return Ok(vec![TypeInfo::tensor(
                dtype,
                Shape::Ranked(vec![Dimension::Unknown, Dimension::Unknown]),
            )]);
        };

        let ndim = dims.len();
        let n_outer = if axis == ndim as i64 {
            ndim
        } else {
            resolve_axis(ndim, axis)?
        };

        let out_dims = vec![dim_product(&dims[..n_outer]), dim_product(&dims[n_outer..])];
        Ok(vec![TypeInfo::tensor(dtype, Shape::Ranked(out_dims))])
    }
}

/// Squeeze operator.
///
/// Removes size-1 dimensions, either those listed in the axes (input or
/// attribute) or all of them.
pub struct Squeeze;

impl InferenceRule for Squeeze {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError> {
        let data = ctx.require_input(0, "1 or 2")?;

        let Some((dtype, shape)) = tensor_parts(&data)? else {
            return Ok(vec![TypeInfo::Unknown]);
        };
        let Some(dims) = shape.dims() else {
            return Ok(vec![TypeInfo::unranked(dtype)]);
        };

        let axes = ctx.axes_from_input_or_attr(1, "axes");

        // An axes input with no propagated value means we can't tell which
        // dims are removed, or even the output rank.
        if axes.is_none() && ctx.input(1).is_some() {
            return Ok(vec![TypeInfo::unranked(dtype)]);
        }

        let out_dims = match axes.as_deref() {
            Some(axes) if !axes.is_empty() => {
                let mut resolved = resolve_axes(dims.len(), axes)?;
                resolved.sort();
                resolved.dedup();
                for &axis in &resolved {
                    if let Dimension::Fixed(size) = dims[axis] {
                        if size != 1 {
                            return Err(InferenceError::InvalidValue(
                                "squeezed dimension does not have size 1",
                            ));
                        }
                    }
                }
                dims.iter()
                    .enumerate()
                    .filter(|(i, _)| !resolved.contains(i))
                    .map(|(_, dim)| dim.clone())
                    .collect()
            }
            _ => {
                // Without explicit axes, every size-1 dim is removed. That
                // is only decidable when all dims are fixed.
                if dims.iter().any(|dim| dim.as_fixed().is_none()) {
                    return Ok(vec![TypeInfo::unranked(dtype)]);
                }
                dims.iter()
                    .filter(|dim| dim.as_fixed() != Some(1))
                    .cloned()
                    .collect()
            }
        };

        Ok(vec![TypeInfo::tensor(dtype, Shape::Ranked(out_dims))])
    }
}

/// Unsqueeze operator.
///
/// Inserts size-1 dimensions at the positions listed in the axes (input or
/// attribute), which refer to positions in the output shape.
pub struct Unsqueeze;

impl InferenceRule for Unsqueeze {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError> {
        let data = ctx.require_input(0, "1 or 2")?;

        let Some((dtype, shape)) = tensor_parts(&data)? else {
            return Ok(vec![TypeInfo::Unknown]);
        };

        let (Some(dims), Some(axes)) = (shape.dims(), ctx.axes_from_input_or_attr(1, "axes"))
        else {
            return Ok(vec![TypeInfo::unranked(dtype)]);
        };

        let out_ndim = dims.len() + axes.len();
        let mut resolved = resolve_axes(out_ndim, &axes)?;
        resolved.sort();
        let unique = resolved.len();
        resolved.dedup();
        if resolved.len() != unique {
            return Err(InferenceError::InvalidValue("repeated axis"));
        }

        let mut out_dims: Vec<Dimension> = dims.to_vec();
        for &axis in &resolved {
            out_dims.insert(axis, Dimension::Fixed(1));
        }

        Ok(vec![TypeInfo::tensor(dtype, Shape::Ranked(out_dims))])
    }
}

/// Transpose operator.
///
/// Permutes the input dims by the `perm` attribute, or reverses them if the
/// attribute is absent.
pub struct Transpose;

impl InferenceRule for Transpose {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError> {
        let input = ctx.require_input(0, "1")?;
        let perm = ctx.attr_ints("perm");

        let Some((dtype, shape)) = tensor_parts(&input)? else {
            return Ok(vec![TypeInfo::Unknown]);
        };

        let out_shape = match (shape.dims(), perm) {
            (Some(dims), Some(perm)) => {
                if perm.len() != dims.len() {
                    return Err(InferenceError::InvalidValue(
                        "permutation length does not match input rank",
                    ));
                }
                let resolved = resolve_axes(dims.len(), perm)?;
                let mut seen = vec![false; dims.len()];
                let mut permuted = Vec::with_capacity(dims.len());
                for &axis in &resolved {
                    if seen[axis] {
                        return Err(InferenceError::InvalidValue("repeated axis in permutation"));
                    }
                    seen[axis] = true;
                    permuted.push(dims[axis].clone());
                }
                Shape::Ranked(permuted)
            }
            (Some(dims), None) => {
                let mut reversed = dims.to_vec();
                reversed.reverse();
                Shape::Ranked(reversed)
            }
            // If the input shape is unknown but we have a permutation then
            // the output rank matches the permutation.
            (None, Some(perm)) => Shape::Ranked(vec![Dimension::Unknown; perm.len()]),
            (None, None) => Shape::Unranked,
        };

        Ok(vec![TypeInfo::tensor(dtype, out_shape)])
    }
}

#[cfg(test)]
mod tests {
    use shapetrace_testing::TestCases;

    use super::{Expand, Flatten, Reshape, Squeeze, Transpose, Unsqueeze};
    use crate::dim::{dims, Dimension, Shape};
    use crate::graph::{AttrValue, Node};
    use crate::registry::{InferenceContext, InferenceError, InferenceRule, InputInfo};
    use crate::value::{Constant, DataType, TypeInfo};

    fn run_rule(
        rule: &dyn InferenceRule,
        node: &Node,
        inputs: &[(TypeInfo, Option<Constant>)],
    ) -> Result<Vec<TypeInfo>, InferenceError> {
        let inputs = inputs
            .iter()
            .map(|(type_info, value)| {
                Some(InputInfo {
                    type_info,
                    value: value.as_ref(),
                })
            })
            .collect();
        let ctx = InferenceContext::new(node, inputs);
        rule.infer(&ctx)
    }

    fn f32_tensor(shape: Vec<Dimension>) -> TypeInfo {
        TypeInfo::tensor(DataType::Float, Shape::Ranked(shape))
    }

    fn shape_vec(len: usize) -> TypeInfo {
        TypeInfo::tensor(DataType::Int64, Shape::fixed(&[len]))
    }

    #[test]
    fn test_reshape() {
        #[derive(Debug)]
        struct Case {
            data: Vec<Dimension>,
            shape: Vec<i64>,
            expected: Result<Vec<Dimension>, InferenceError>,
        }

        let cases = [
            Case {
                data: dims!(2, 3, 4),
                shape: vec![4, 6],
                expected: Ok(dims!(4, 6)),
            },
            // -1 resolved by element count division.
            Case {
                data: dims!(2, 3, 4),
                shape: vec![4, -1],
                expected: Ok(dims!(4, 6)),
            },
            // 0 copies the input dim at the same position.
            Case {
                data: dims!("batch", 3, 4),
                shape: vec![0, 12],
                expected: Ok(dims!("batch", 12)),
            },
            // -1 with a symbolic input stays unknown.
            Case {
                data: dims!("batch", 3, 4),
                shape: vec![-1, 12],
                expected: Ok(dims!(Dimension::Unknown, 12)),
            },
            Case {
                data: dims!(2, 3, 4),
                shape: vec![-1, -1],
                expected: Err(InferenceError::ShapeArithmetic(
                    "shape has more than one -1 entry",
                )),
            },
            Case {
                data: dims!(2, 3, 4),
                shape: vec![5, -1],
                expected: Err(InferenceError::ShapeArithmetic(
                    "input element count does not divide the specified shape",
                )),
            },
        ];

        cases.test_each(|case| {
            let node = Node::new("Reshape", &["data", "shape"], &["out"]);
            let result = run_rule(
                &Reshape,
                &node,
                &[
                    (f32_tensor(case.data.clone()), None),
                    (
                        shape_vec(case.shape.len()),
                        Some(Constant::Vector(case.shape.clone())),
                    ),
                ],
            );
            assert_eq!(
                result,
                case.expected
                    .clone()
                    .map(|dims| vec![f32_tensor(dims)])
            );
        });
    }

    #[test]
    fn test_reshape_without_value() {
        let node = Node::new("Reshape", &["data", "shape"], &["out"]);

        // Shape value unknown, but its length gives the output rank.
        let out = run_rule(
            &Reshape,
            &node,
            &[(f32_tensor(dims!(2, 3, 4)), None), (shape_vec(2), None)],
        )
        .unwrap();
        assert_eq!(
            out,
            [f32_tensor(dims!(Dimension::Unknown, Dimension::Unknown))]
        );

        // Shape length unknown too.
        let out = run_rule(
            &Reshape,
            &node,
            &[
                (f32_tensor(dims!(2, 3, 4)), None),
                (TypeInfo::unranked(DataType::Int64), None),
            ],
        )
        .unwrap();
        assert_eq!(out, [TypeInfo::unranked(DataType::Float)]);
    }

    #[test]
    fn test_expand() {
        let node = Node::new("Expand", &["data", "shape"], &["out"]);

        // Broadcast with a propagated shape value.
        let out = run_rule(
            &Expand,
            &node,
            &[
                (f32_tensor(dims!(3, 1, 2)), None),
                (shape_vec(3), Some(Constant::Vector(vec![1, 4, 2]))),
            ],
        )
        .unwrap();
        assert_eq!(out, [f32_tensor(dims!(3, 4, 2))]);

        // Shape longer than the input.
        let out = run_rule(
            &Expand,
            &node,
            &[
                (f32_tensor(dims!("batch", 1, 16)), None),
                (shape_vec(4), Some(Constant::Vector(vec![4, 1, 8, 16]))),
            ],
        )
        .unwrap();
        assert_eq!(out, [f32_tensor(dims!(4, "batch", 8, 16))]);

        // Value unknown but length fixed: rank and >1 dims survive.
        let out = run_rule(
            &Expand,
            &node,
            &[(f32_tensor(dims!("batch", 1, 16)), None), (shape_vec(3), None)],
        )
        .unwrap();
        assert_eq!(
            out,
            [f32_tensor(dims!(
                Dimension::Unknown,
                Dimension::Unknown,
                16
            ))]
        );
    }

    #[test]
    fn test_flatten() {
        #[derive(Debug)]
        struct Case {
            data: Vec<Dimension>,
            axis: i64,
            expected: Vec<Dimension>,
        }

        let cases = [
            Case {
                data: dims!(2, 3, 4),
                axis: 1,
                expected: dims!(2, 12),
            },
            Case {
                data: dims!(2, 3, 4),
                axis: 3,
                expected: dims!(24, 1),
            },
            Case {
                data: dims!("batch", 3, 4),
                axis: 1,
                expected: dims!("batch", 12),
            },
            // A symbolic factor makes the product unknown.
            Case {
                data: dims!("batch", 3, 4),
                axis: 2,
                expected: dims!(Dimension::Unknown, 4),
            },
            Case {
                data: dims!(),
                axis: 0,
                expected: dims!(1, 1),
            },
        ];

        cases.test_each(|case| {
            let node = Node::new("Flatten", &["data"], &["out"])
                .with_attr("axis", AttrValue::Int(case.axis));
            let out = run_rule(&Flatten, &node, &[(f32_tensor(case.data.clone()), None)]).unwrap();
            assert_eq!(out, [f32_tensor(case.expected.clone())]);
        });
    }

    #[test]
    fn test_squeeze() {
        let node = Node::new("Squeeze", &["data", "axes"], &["out"]);

        // Explicit axes.
        let out = run_rule(
            &Squeeze,
            &node,
            &[
                (f32_tensor(dims!("batch", 1, 16)), None),
                (shape_vec(1), Some(Constant::Vector(vec![1]))),
            ],
        )
        .unwrap();
        assert_eq!(out, [f32_tensor(dims!("batch", 16))]);

        // No axes: all fixed size-1 dims are removed.
        let node_no_axes = Node::new("Squeeze", &["data"], &["out"]);
        let out = run_rule(&Squeeze, &node_no_axes, &[(f32_tensor(dims!(1, 4, 1, 2)), None)])
            .unwrap();
        assert_eq!(out, [f32_tensor(dims!(4, 2))]);

        // No axes with a symbolic dim: the output rank is unknown.
        let out = run_rule(
            &Squeeze,
            &node_no_axes,
            &[(f32_tensor(dims!("batch", 1, 16)), None)],
        )
        .unwrap();
        assert_eq!(out, [TypeInfo::unranked(DataType::Float)]);

        // Squeezing a dim that is not 1 is an error.
        let err = run_rule(
            &Squeeze,
            &node,
            &[
                (f32_tensor(dims!(4, 2)), None),
                (shape_vec(1), Some(Constant::Vector(vec![0]))),
            ],
        )
        .err()
        .unwrap();
        assert_eq!(
            err,
            InferenceError::InvalidValue("squeezed dimension does not have size 1")
        );
    }

    #[test]
    fn test_unsqueeze() {
        let node = Node::new("Unsqueeze", &["data", "axes"], &["out"]);

        let out = run_rule(
            &Unsqueeze,
            &node,
            &[
                (f32_tensor(dims!("batch", 16, 64)), None),
                (shape_vec(1), Some(Constant::Vector(vec![1]))),
            ],
        )
        .unwrap();
        assert_eq!(out, [f32_tensor(dims!("batch", 1, 16, 64))]);

        // Axes refer to output positions, so -1 is the new last dim.
        let out = run_rule(
            &Unsqueeze,
            &node,
            &[
                (f32_tensor(dims!(3)), None),
                (shape_vec(1), Some(Constant::Vector(vec![-1]))),
            ],
        )
        .unwrap();
        assert_eq!(out, [f32_tensor(dims!(3, 1))]);

        // Unsqueeze a scalar into a vector.
        let out = run_rule(
            &Unsqueeze,
            &node,
            &[
                (f32_tensor(dims!()), None),
                (shape_vec(1), Some(Constant::Vector(vec![0]))),
            ],
        )
        .unwrap();
        assert_eq!(out, [f32_tensor(dims!(1))]);
    }

    #[test]
    fn test_transpose() {
        // Explicit permutation.
        let node = Node::new("Transpose", &["data"], &["out"])
            .with_attr("perm", AttrValue::Ints(vec![0, 2, 1]));
        let out = run_rule(
            &Transpose,
            &node,
            &[(f32_tensor(dims!("batch", "rows", "cols")), None)],
        )
        .unwrap();
        assert_eq!(out, [f32_tensor(dims!("batch", "cols", "rows"))]);

        // Implicit permutation reverses the dims.
        let node = Node::new("Transpose", &["data"], &["out"]);
        let out = run_rule(
            &Transpose,
            &node,
            &[(f32_tensor(dims!("rows", "cols")), None)],
        )
        .unwrap();
        assert_eq!(out, [f32_tensor(dims!("cols", "rows"))]);

        // Unknown input shape with a permutation: the rank is known.
        let node = Node::new("Transpose", &["data"], &["out"])
            .with_attr("perm", AttrValue::Ints(vec![0, 2, 1]));
        let out = run_rule(
            &Transpose,
            &node,
            &[(TypeInfo::unranked(DataType::Float), None)],
        )
        .unwrap();
        assert_eq!(
            out,
            [f32_tensor(dims!(
                Dimension::Unknown,
                Dimension::Unknown,
                Dimension::Unknown
            ))]
        );
    }
}
