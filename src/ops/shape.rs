//! Shape inference for operators which produce or combine shape vectors.

use crate::dim::{Dimension, Shape};
use crate::ops::resolve_axis;
use crate::registry::{InferenceContext, InferenceError, InferenceRule};
use crate::value::{DataType, TypeInfo};

/// Shape operator.
///
/// Returns the shape of its input as a 1-D Int64 tensor, optionally sliced
/// by the `start` and `end` attributes. The output length is the input rank
/// even when individual dimensions are not fixed; the dimension values
/// themselves are supplied by data propagation when the input shape is
/// fully fixed.
pub struct ShapeOp;

/// Clamp the `start`/`end` attributes of `Shape` to a dimension range.
pub(crate) fn shape_slice_range(ndim: usize, start: Option<i64>, end: Option<i64>) -> (usize, usize) {
    let ndim_i = ndim as i64;
    let clamp = |index: i64| -> usize {
        let index = if index < 0 {
            index.saturating_add(ndim_i)
        } else {
            index
        };
        index.clamp(0, ndim_i) as usize
    };
    let start = clamp(start.unwrap_or(0));
    let end = clamp(end.unwrap_or(ndim_i));
    (start, end.max(start))
}

impl InferenceRule for ShapeOp {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError> {
        let input = ctx.require_input(0, "1")?;

        let unranked = Shape::Unranked;
        let shape = match input.type_info {
            TypeInfo::Tensor { shape, .. } => shape,
            TypeInfo::Unknown => &unranked,
            _ => return Err(InferenceError::InvalidValue("expected tensor input")),
        };

        let out_len = match shape.rank() {
            Some(ndim) => {
                let (start, end) = shape_slice_range(ndim, ctx.attr_int("start"), ctx.attr_int("end"));
                Dimension::Fixed(end - start)
            }
            None => Dimension::Unknown,
        };

        Ok(vec![TypeInfo::tensor(
            DataType::Int64,
            Shape::Ranked(vec![out_len]),
        )])
    }
}

/// Size operator.
///
/// Returns the element count of its input as an Int64 scalar.
pub struct Size;

impl InferenceRule for Size {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError> {
        ctx.require_input(0, "1")?;
        Ok(vec![TypeInfo::tensor(DataType::Int64, Shape::scalar())])
    }
}

/// Concat operator.
///
/// Joins inputs along the axis given by the `axis` attribute. All inputs
/// must share a rank, and their dimensions must agree everywhere except the
/// concatenation axis.
pub struct Concat;

impl InferenceRule for Concat {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError> {
        ctx.require_input(0, "at least 1")?;
        let axis = ctx
            .attr_int("axis")
            .ok_or(InferenceError::InvalidValue("missing `axis` attribute"))?;

        let unranked = Shape::Unranked;
        let mut dtype = None;
        let mut shapes = Vec::with_capacity(ctx.num_inputs());
        for index in 0..ctx.num_inputs() {
            let input = ctx.require_input(index, "at least 1")?;
            match input.type_info {
                TypeInfo::Tensor {
                    dtype: input_dtype,
                    shape,
                } => {
                    match dtype {
                        Some(dtype) if dtype != *input_dtype => {
                            return Err(InferenceError::TypeMismatch {
                                expected: dtype,
                                actual: *input_dtype,
                            });
                        }
                        _ => dtype = Some(*input_dtype),
                    }
                    shapes.push(shape);
                }
                TypeInfo::Unknown => shapes.push(&unranked),
                _ => return Err(InferenceError::InvalidValue("expected tensor inputs")),
            }
        }

        let out_unranked = || match dtype {
            Some(dtype) => TypeInfo::unranked(dtype),
            None => TypeInfo::Unknown,
        };

        let Some(first_dims) = shapes[0].dims() else {
            return Ok(vec![out_unranked()]);
        };
        let ndim = first_dims.len();
        if ndim == 0 {
            return Err(InferenceError::InvalidValue(
                "concat inputs must have rank >= 1",
            ));
        }

        // Negative axes are normalized before ranks and dims are compared.
        let axis = resolve_axis(ndim, axis)?;

        let mut out_dims = first_dims.to_vec();
        let mut axis_total: usize = 0;
        let mut axis_symbols = Vec::new();
        let mut axis_unknown = false;

        for shape in &shapes {
            let Some(dims) = shape.dims() else {
                return Ok(vec![out_unranked()]);
            };
            if dims.len() != ndim {
                return Err(InferenceError::RankMismatch(
                    "concat inputs must share a rank",
                ));
            }

            for (i, dim) in dims.iter().enumerate() {
                if i == axis {
                    match dim {
                        Dimension::Fixed(size) => axis_total += size,
                        Dimension::Symbolic(name) => axis_symbols.push(name.clone()),
                        Dimension::Unknown => axis_unknown = true,
                    }
                } else {
                    let merged = out_dims[i].merge(dim).ok_or_else(|| {
                        InferenceError::Conflict(crate::dim::ConflictError::DimensionMismatch {
                            axis: i,
                            expected: out_dims[i].clone(),
                            actual: dim.clone(),
                        })
                    })?;
                    out_dims[i] = merged;
                }
            }
        }

        // Empty operands contribute nothing to the concatenated axis. In
        // particular a single symbolic operand concatenated with empty
        // tensors keeps its symbol.
        out_dims[axis] = if axis_unknown {
            Dimension::Unknown
        } else if axis_symbols.is_empty() {
            Dimension::Fixed(axis_total)
        } else if axis_total == 0 && axis_symbols.len() == 1 {
            Dimension::Symbolic(axis_symbols.remove(0))
        } else {
            Dimension::Unknown
        };

        Ok(vec![TypeInfo::tensor(
            dtype.expect("checked above"),
            Shape::Ranked(out_dims),
        )])
    }
}

/// Constant operator.
///
/// Produces a tensor from one of the node's value attributes. The value
/// itself is attached by data propagation.
pub struct ConstantOp;

impl InferenceRule for ConstantOp {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError> {
        let out = if let Some(tensor) = ctx.attr_tensor("value") {
            tensor.type_info()
        } else if ctx.attr_int("value_int").is_some() {
            TypeInfo::tensor(DataType::Int64, Shape::scalar())
        } else if let Some(ints) = ctx.attr_ints("value_ints") {
            TypeInfo::tensor(DataType::Int64, Shape::fixed(&[ints.len()]))
        } else if ctx.attr_float("value_float").is_some() {
            TypeInfo::tensor(DataType::Float, Shape::scalar())
        } else if let Some(floats) = ctx.attr_floats("value_floats") {
            TypeInfo::tensor(DataType::Float, Shape::fixed(&[floats.len()]))
        } else {
            return Err(InferenceError::InvalidValue("missing value attribute"));
        };
        Ok(vec![out])
    }
}

/// ConstantOfShape operator.
///
/// Produces a tensor whose shape is the *value* of the input, read through
/// data propagation, and whose element type comes from the `value`
/// attribute (default f32).
pub struct ConstantOfShape;

impl InferenceRule for ConstantOfShape {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError> {
        let input = ctx.require_input(0, "1")?;

        let dtype = match ctx.attr_tensor("value") {
            Some(tensor) => tensor.dtype,
            None => DataType::Float,
        };

        if let Some(value) = input.value {
            if value.ndim() != 1 {
                return Err(InferenceError::InvalidValue("shape input must be a vector"));
            }
            let mut dims = Vec::with_capacity(value.values().len());
            for &size in value.values() {
                if size < 0 {
                    return Err(InferenceError::ShapeArithmetic(
                        "shape input has a negative entry",
                    ));
                }
                dims.push(Dimension::Fixed(size as usize));
            }
            return Ok(vec![TypeInfo::tensor(dtype, Shape::Ranked(dims))]);
        }

        // Without a propagated value, the output rank is the shape input's
        // length, when that is fixed.
        let out = match input.type_info.shape().and_then(Shape::dims) {
            Some([Dimension::Fixed(len)]) => {
                TypeInfo::tensor(dtype, Shape::Ranked(vec![Dimension::Unknown; *len]))
            }
            Some([_]) => TypeInfo::unranked(dtype),
            Some(_) => {
                return Err(InferenceError::InvalidValue("shape input must be a vector"));
            }
            None => TypeInfo::unranked(dtype),
        };
        Ok(vec![out])
    }
}

/// Range operator.
///
/// Produces a 1-D tensor. The length is computed when the start, limit and
/// delta inputs all have propagated values.
pub struct Range;

impl InferenceRule for Range {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError> {
        let start = ctx.require_input(0, "3")?;
        let limit = ctx.require_input(1, "3")?;
        let delta = ctx.require_input(2, "3")?;

        let dtype = start
            .type_info
            .dtype()
            .or(limit.type_info.dtype())
            .or(delta.type_info.dtype());

        let scalar = |input: Option<&crate::value::Constant>| -> Option<i64> {
            input.and_then(|value| match value.values() {
                [single] => Some(*single),
                _ => None,
            })
        };

        let len = match (scalar(start.value), scalar(limit.value), scalar(delta.value)) {
            (Some(start), Some(limit), Some(delta)) => {
                if delta == 0 {
                    return Err(InferenceError::InvalidValue("delta must be non-zero"));
                }
                // ceil((limit - start) / delta), computed in i128 to avoid
                // overflow for extreme bounds.
                let span = limit as i128 - start as i128;
                let delta_i = delta as i128;
                let len = (span + delta_i + if delta > 0 { -1 } else { 1 }) / delta_i;
                Dimension::Fixed(len.max(0) as usize)
            }
            _ => Dimension::Unknown,
        };

        let out = match dtype {
            Some(dtype) => TypeInfo::tensor(dtype, Shape::Ranked(vec![len])),
            None => TypeInfo::Unknown,
        };
        Ok(vec![out])
    }
}

#[cfg(test)]
mod tests {
    use shapetrace_testing::TestCases;

    use super::{Concat, ConstantOfShape, ConstantOp, Range, ShapeOp, Size};
    use crate::dim::{dims, Dimension, Shape};
    use crate::graph::{AttrValue, Node};
    use crate::registry::{InferenceContext, InferenceError, InferenceRule, InputInfo};
    use crate::value::{Constant, DataType, TensorData, TypeInfo};

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

    #[test]
    fn test_shape_op() {
        #[derive(Debug)]
        struct Case {
            input: TypeInfo,
            start: Option<i64>,
            end: Option<i64>,
            expected: Dimension,
        }

        let cases = [
            Case {
                input: f32_tensor(dims!("batch", 3, "height", "width")),
                start: None,
                end: None,
                expected: Dimension::Fixed(4),
            },
            Case {
                input: f32_tensor(dims!("batch", 3, "height", "width")),
                start: Some(1),
                end: None,
                expected: Dimension::Fixed(3),
            },
            Case {
                input: f32_tensor(dims!("batch", 3, "height", "width")),
                start: Some(-2),
                end: Some(4),
                expected: Dimension::Fixed(2),
            },
            // Rank unknown: the output is 1-D with unknown length.
            Case {
                input: TypeInfo::unranked(DataType::Float),
                start: None,
                end: None,
                expected: Dimension::Unknown,
            },
        ];

        cases.test_each(|case| {
            let mut node = Node::new("Shape", &["x"], &["shape"]);
            if let Some(start) = case.start {
                node = node.with_attr("start", AttrValue::Int(start));
            }
            if let Some(end) = case.end {
                node = node.with_attr("end", AttrValue::Int(end));
            }
            let out = run_rule(&ShapeOp, &node, &[(case.input.clone(), None)]).unwrap();
            assert_eq!(
                out,
                [TypeInfo::tensor(
                    DataType::Int64,
                    Shape::Ranked(vec![case.expected.clone()])
                )]
            );
        });
    }

    #[test]
    fn test_size() {
        let node = Node::new("Size", &["x"], &["size"]);
        let out = run_rule(&Size, &node, &[(f32_tensor(dims!(2, 3)), None)]).unwrap();
        assert_eq!(out, [TypeInfo::tensor(DataType::Int64, Shape::scalar())]);
    }

    #[test]
    fn test_concat() {
        #[derive(Debug)]
        struct Case {
            inputs: Vec<Vec<Dimension>>,
            axis: i64,
            expected: Vec<Dimension>,
        }

        let cases = [
            // Fixed dims sum along the axis.
            Case {
                inputs: vec![dims!("batch", 16, 64), dims!("batch", 16, 64)],
                axis: 1,
                expected: dims!("batch", 32, 64),
            },
            // Symbolic axis dims produce an unknown total.
            Case {
                inputs: vec![dims!("batch", "foo", 64), dims!("batch", "bar", 64)],
                axis: 1,
                expected: dims!("batch", Dimension::Unknown, 64),
            },
            // An empty operand is an identity element: it contributes zero
            // and does not force the result unknown.
            Case {
                inputs: vec![dims!(0), dims!(256)],
                axis: 0,
                expected: dims!(256),
            },
            // Same, with the equivalent negative axis.
            Case {
                inputs: vec![dims!(0), dims!(256)],
                axis: -1,
                expected: dims!(256),
            },
            // A single symbolic operand among empty operands survives.
            Case {
                inputs: vec![dims!(0), dims!("n")],
                axis: 0,
                expected: dims!("n"),
            },
            // Two symbolic operands do not.
            Case {
                inputs: vec![dims!("m"), dims!("n")],
                axis: 0,
                expected: dims!(Dimension::Unknown),
            },
        ];

        cases.test_each(|case| {
            let input_names: Vec<String> = (0..case.inputs.len()).map(|i| format!("x{}", i)).collect();
            let input_refs: Vec<&str> = input_names.iter().map(|s| s.as_str()).collect();
            let node = Node::new("Concat", &input_refs, &["out"])
                .with_attr("axis", AttrValue::Int(case.axis));
            let inputs: Vec<(TypeInfo, Option<Constant>)> = case
                .inputs
                .iter()
                .map(|shape| (f32_tensor(shape.clone()), None))
                .collect();
            let out = run_rule(&Concat, &node, &inputs).unwrap();
            assert_eq!(out, [f32_tensor(case.expected.clone())]);
        });
    }

    #[test]
    fn test_concat_rank_mismatch() {
        let node =
            Node::new("Concat", &["a", "b"], &["out"]).with_attr("axis", AttrValue::Int(0));
        let err = run_rule(
            &Concat,
            &node,
            &[
                (f32_tensor(dims!(2, 3)), None),
                (f32_tensor(dims!(2)), None),
            ],
        )
        .err()
        .unwrap();
        assert_eq!(
            err,
            InferenceError::RankMismatch("concat inputs must share a rank")
        );
    }

    #[test]
    fn test_constant_op() {
        let node = Node::new("Constant", &[], &["out"]).with_attr(
            "value",
            AttrValue::Tensor(TensorData::from_ints(DataType::Int64, &[3], &[4, 5, 6])),
        );
        let out = run_rule(&ConstantOp, &node, &[]).unwrap();
        assert_eq!(out, [TypeInfo::tensor(DataType::Int64, Shape::fixed(&[3]))]);

        let node = Node::new("Constant", &[], &["out"])
            .with_attr("value_ints", AttrValue::Ints(vec![7, 8]));
        let out = run_rule(&ConstantOp, &node, &[]).unwrap();
        assert_eq!(out, [TypeInfo::tensor(DataType::Int64, Shape::fixed(&[2]))]);

        let node = Node::new("Constant", &[], &["out"]);
        let err = run_rule(&ConstantOp, &node, &[]).err().unwrap();
        assert_eq!(err, InferenceError::InvalidValue("missing value attribute"));
    }

    #[test]
    fn test_constant_of_shape() {
        #[derive(Debug)]
        struct Case {
            input: (TypeInfo, Option<Constant>),
            value_dtype: Option<DataType>,
            expected: Result<TypeInfo, InferenceError>,
        }

        let shape_vec = TypeInfo::tensor(DataType::Int64, Shape::fixed(&[3]));

        let cases = [
            // Fully propagated shape value.
            Case {
                input: (shape_vec.clone(), Some(Constant::Vector(vec![3, 4, 5]))),
                value_dtype: Some(DataType::Int32),
                expected: Ok(TypeInfo::tensor(DataType::Int32, Shape::fixed(&[3, 4, 5]))),
            },
            // Empty shape value produces a scalar.
            Case {
                input: (
                    TypeInfo::tensor(DataType::Int64, Shape::fixed(&[0])),
                    Some(Constant::Vector(Vec::new())),
                ),
                value_dtype: Some(DataType::Int32),
                expected: Ok(TypeInfo::tensor(DataType::Int32, Shape::scalar())),
            },
            // Value unknown, but the length of the shape vector is fixed:
            // the rank is known.
            Case {
                input: (shape_vec.clone(), None),
                value_dtype: None,
                expected: Ok(TypeInfo::tensor(
                    DataType::Float,
                    Shape::Ranked(dims!(
                        Dimension::Unknown,
                        Dimension::Unknown,
                        Dimension::Unknown
                    )),
                )),
            },
            // Negative entry.
            Case {
                input: (shape_vec.clone(), Some(Constant::Vector(vec![2, -1]))),
                value_dtype: None,
                expected: Err(InferenceError::ShapeArithmetic(
                    "shape input has a negative entry",
                )),
            },
        ];

        cases.test_each(|case| {
            let mut node = Node::new("ConstantOfShape", &["shape"], &["out"]);
            if let Some(dtype) = case.value_dtype {
                node = node.with_attr(
                    "value",
                    AttrValue::Tensor(TensorData::from_ints(dtype, &[1], &[0])),
                );
            }
            let result = run_rule(&ConstantOfShape, &node, &[case.input.clone()]);
            assert_eq!(result, case.expected.clone().map(|ty| vec![ty]));
        });
    }

    #[test]
    fn test_range() {
        let node = Node::new("Range", &["start", "limit", "delta"], &["out"]);
        let scalar_i64 = TypeInfo::tensor(DataType::Int64, Shape::scalar());

        // Length computed from propagated values.
        let out = run_rule(
            &Range,
            &node,
            &[
                (scalar_i64.clone(), Some(Constant::Scalar(0))),
                (scalar_i64.clone(), Some(Constant::Scalar(5))),
                (scalar_i64.clone(), Some(Constant::Scalar(2))),
            ],
        )
        .unwrap();
        assert_eq!(out, [TypeInfo::tensor(DataType::Int64, Shape::fixed(&[3]))]);

        // Unknown length without values.
        let out = run_rule(
            &Range,
            &node,
            &[
                (scalar_i64.clone(), None),
                (scalar_i64.clone(), None),
                (scalar_i64.clone(), None),
            ],
        )
        .unwrap();
        assert_eq!(
            out,
            [TypeInfo::tensor(
                DataType::Int64,
                Shape::Ranked(dims!(Dimension::Unknown))
            )]
        );
    }
}
