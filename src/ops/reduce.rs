//! Shape inference for reduction operators.

use smallvec::SmallVec;

use crate::dim::{Dimension, Shape};
use crate::ops::resolve_axes;
use crate::registry::{InferenceContext, InferenceError, InferenceRule};
use crate::value::TypeInfo;

/// Shared inference rule for `Reduce*` operators.
///
/// Reduction ops take the axes as an attribute in opset <= 13 and as an
/// input in opset 18+. Both forms are handled here.
pub struct ReductionOp;

impl InferenceRule for ReductionOp {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError> {
        if ctx.num_inputs() > 2 {
            return Err(InferenceError::Arity {
                expected: "1 or 2",
                actual: ctx.num_inputs(),
            });
        }
        let data = ctx.require_input(0, "1 or 2")?;

        let dtype = match data.type_info {
            TypeInfo::Tensor { dtype, .. } => *dtype,
            TypeInfo::Unknown => return Ok(vec![TypeInfo::Unknown]),
            _ => return Err(InferenceError::InvalidValue("expected tensor input")),
        };

        let keep_dims = ctx.attr_int("keepdims").unwrap_or(1) != 0;
        let noop_with_empty_axes = ctx.attr_int("noop_with_empty_axes").unwrap_or(0) != 0;

        let dims = match data.type_info.shape().and_then(Shape::dims) {
            Some(dims) => dims,
            None => return Ok(vec![TypeInfo::unranked(dtype)]),
        };
        let ndim = dims.len();

        let axes = ctx.axes_from_input_or_attr(1, "axes");

        // An axes input whose value could not be propagated means we don't
        // know which dims are reduced.
        if axes.is_none() && ctx.input(1).is_some() {
            let out = if keep_dims {
                TypeInfo::tensor(dtype, Shape::Ranked(vec![Dimension::Unknown; ndim]))
            } else {
                TypeInfo::unranked(dtype)
            };
            return Ok(vec![out]);
        }

        let mut axes: SmallVec<[usize; 4]> = match axes.as_deref() {
            Some([]) | None if noop_with_empty_axes => {
                return Ok(vec![data.type_info.clone()]);
            }
            Some([]) | None => (0..ndim).collect(),
            Some(axes) => resolve_axes(ndim, axes)?,
        };
        axes.sort();
        axes.dedup();

        let mut out_dims = Vec::with_capacity(if keep_dims { ndim } else { ndim - axes.len() });
        for (i, dim) in dims.iter().enumerate() {
            if !axes.contains(&i) {
                out_dims.push(dim.clone());
            } else if keep_dims {
                out_dims.push(Dimension::Fixed(1));
            }
        }

        Ok(vec![TypeInfo::tensor(dtype, Shape::Ranked(out_dims))])
    }
}

#[cfg(test)]
mod tests {
    use shapetrace_testing::TestCases;

    use super::ReductionOp;
    use crate::dim::{dims, Dimension, Shape};
    use crate::graph::{AttrValue, Node};
    use crate::registry::{InferenceContext, InferenceRule, InputInfo};
    use crate::value::{Constant, DataType, TypeInfo};

    #[test]
    fn test_reduction_op() {
        #[derive(Debug)]
        struct Case {
            input: Vec<Dimension>,
            axes: Option<Vec<i64>>,
            axes_as_input: bool,
            keep_dims: bool,
            expected: Vec<Dimension>,
        }

        let cases = [
            // Reduce a single axis given as an input value.
            Case {
                input: dims!("batch", 4, 5),
                axes: Some(vec![1]),
                axes_as_input: true,
                keep_dims: false,
                expected: dims!("batch", 5),
            },
            // Reduce a single axis given as an attribute.
            Case {
                input: dims!("batch", 4, 5),
                axes: Some(vec![1]),
                axes_as_input: false,
                keep_dims: false,
                expected: dims!("batch", 5),
            },
            // Reduce with `keepdims=1`.
            Case {
                input: dims!("batch", 4, 5),
                axes: Some(vec![1]),
                axes_as_input: true,
                keep_dims: true,
                expected: dims!("batch", 1, 5),
            },
            // Negative axis.
            Case {
                input: dims!("batch", 4, 5),
                axes: Some(vec![-1]),
                axes_as_input: false,
                keep_dims: false,
                expected: dims!("batch", 4),
            },
            // Reduce all axes.
            Case {
                input: dims!(3, 4, 5),
                axes: None,
                axes_as_input: false,
                keep_dims: false,
                expected: dims!(),
            },
        ];

        cases.test_each(|case| {
            let mut node = Node::new("ReduceMean", &["data"], &["out"]);
            if !case.keep_dims {
                node = node.with_attr("keepdims", AttrValue::Int(0));
            }

            let data = TypeInfo::tensor(DataType::Float, Shape::Ranked(case.input.clone()));
            let axes_value = case.axes.clone().map(Constant::Vector);
            let axes_type = TypeInfo::unranked(DataType::Int64);

            let mut inputs = vec![Some(InputInfo {
                type_info: &data,
                value: None,
            })];
            if case.axes_as_input {
                node.inputs.push("axes".to_string());
                inputs.push(Some(InputInfo {
                    type_info: &axes_type,
                    value: axes_value.as_ref(),
                }));
            } else if let Some(axes) = case.axes.clone() {
                node = node.with_attr("axes", AttrValue::Ints(axes));
            }

            let ctx = InferenceContext::new(&node, inputs);
            let out = ReductionOp.infer(&ctx).unwrap();
            assert_eq!(
                out,
                [TypeInfo::tensor(
                    DataType::Float,
                    Shape::Ranked(case.expected.clone())
                )]
            );
        });
    }

    #[test]
    fn test_reduction_op_unknown_axes_value() {
        // An axes input with no propagated value leaves the reduced dims
        // unknown.
        let node = Node::new("ReduceSum", &["data", "axes"], &["out"]);
        let data = TypeInfo::tensor(DataType::Float, Shape::Ranked(dims!(3, 4)));
        let axes_type = TypeInfo::unranked(DataType::Int64);
        let inputs = vec![
            Some(InputInfo {
                type_info: &data,
                value: None,
            }),
            Some(InputInfo {
                type_info: &axes_type,
                value: None,
            }),
        ];
        let ctx = InferenceContext::new(&node, inputs);
        let out = ReductionOp.infer(&ctx).unwrap();
        assert_eq!(
            out,
            [TypeInfo::tensor(
                DataType::Float,
                Shape::Ranked(dims!(Dimension::Unknown, Dimension::Unknown))
            )]
        );
    }
}
