//! Shape inference for elementwise unary operators.

use crate::registry::{InferenceContext, InferenceError, InferenceRule};
use crate::value::{DataType, TypeInfo};

/// Shared inference rule for elementwise unary operators.
///
/// These operators take at least one input and return a single output with
/// the same shape as the first input. Unary operators may take additional
/// inputs (eg. min/max parameters for the Clip operator) that don't affect
/// the output.
pub struct UnaryOp {
    /// Output element type, if it differs from the input's.
    pub out_dtype: Option<DataType>,
}

impl InferenceRule for UnaryOp {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError> {
        let input = ctx.require_input(0, "at least 1")?;

        let out = match input.type_info {
            TypeInfo::Tensor { dtype, shape } => TypeInfo::Tensor {
                dtype: self.out_dtype.unwrap_or(*dtype),
                shape: shape.clone(),
            },
            TypeInfo::Unknown => match self.out_dtype {
                Some(dtype) => TypeInfo::unranked(dtype),
                None => TypeInfo::Unknown,
            },
            // Identity in particular passes sequences and other non-tensor
            // values through unchanged.
            other => other.clone(),
        };

        Ok(vec![out])
    }
}

/// Cast operator.
///
/// Preserves the input shape and sets the element type from the `to`
/// attribute.
pub struct Cast;

impl InferenceRule for Cast {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError> {
        let input = ctx.require_input(0, "1")?;

        let dtype = ctx
            .attr_int("to")
            .and_then(DataType::from_code)
            .ok_or(InferenceError::InvalidValue(
                "missing or unsupported `to` attribute",
            ))?;

        let out = match input.type_info {
            TypeInfo::Tensor { shape, .. } => TypeInfo::tensor(dtype, shape.clone()),
            TypeInfo::Unknown => TypeInfo::unranked(dtype),
            _ => {
                return Err(InferenceError::InvalidValue("expected tensor input"));
            }
        };

        Ok(vec![out])
    }
}

#[cfg(test)]
mod tests {
    use shapetrace_testing::TestCases;

    use super::{Cast, UnaryOp};
    use crate::dim::{dims, Shape};
    use crate::graph::{AttrValue, Node};
    use crate::registry::{InferenceContext, InferenceError, InferenceRule, InputInfo};
    use crate::value::{DataType, TypeInfo};

    fn run_rule(
        rule: &dyn InferenceRule,
        node: &Node,
        inputs: &[TypeInfo],
    ) -> Result<Vec<TypeInfo>, InferenceError> {
        let inputs = inputs
            .iter()
            .map(|type_info| {
                Some(InputInfo {
                    type_info,
                    value: None,
                })
            })
            .collect();
        let ctx = InferenceContext::new(node, inputs);
        rule.infer(&ctx)
    }

    #[test]
    fn test_unary_op() {
        let input = TypeInfo::tensor(DataType::Float, Shape::Ranked(dims!("batch", 16, "seq")));
        let node = Node::new("Relu", &["x"], &["y"]);

        let rule = UnaryOp { out_dtype: None };
        let out = run_rule(&rule, &node, &[input.clone()]).unwrap();
        assert_eq!(out, [input.clone()]);

        let err = run_rule(&rule, &node, &[]).err().unwrap();
        assert_eq!(
            err,
            InferenceError::Arity {
                expected: "at least 1",
                actual: 0
            }
        );
    }

    #[test]
    fn test_unary_op_dtype_override() {
        let input = TypeInfo::tensor(DataType::Bool, Shape::Ranked(dims!(4)));
        let node = Node::new("Not", &["x"], &["y"]);
        let rule = UnaryOp {
            out_dtype: Some(DataType::Bool),
        };
        let out = run_rule(&rule, &node, &[input]).unwrap();
        assert_eq!(
            out,
            [TypeInfo::tensor(DataType::Bool, Shape::Ranked(dims!(4)))]
        );
    }

    #[test]
    fn test_cast() {
        #[derive(Debug)]
        struct Case {
            input: TypeInfo,
            to: i64,
            expected: Result<TypeInfo, InferenceError>,
        }

        let cases = [
            Case {
                input: TypeInfo::tensor(DataType::Float, Shape::Ranked(dims!("batch", 8))),
                to: 7, // i64
                expected: Ok(TypeInfo::tensor(
                    DataType::Int64,
                    Shape::Ranked(dims!("batch", 8)),
                )),
            },
            Case {
                input: TypeInfo::Unknown,
                to: 1, // f32
                expected: Ok(TypeInfo::unranked(DataType::Float)),
            },
            Case {
                input: TypeInfo::unranked(DataType::Float),
                to: 0,
                expected: Err(InferenceError::InvalidValue(
                    "missing or unsupported `to` attribute",
                )),
            },
        ];

        cases.test_each(|case| {
            let node =
                Node::new("Cast", &["x"], &["y"]).with_attr("to", AttrValue::Int(case.to));
            let result = run_rule(&Cast, &node, &[case.input.clone()]);
            assert_eq!(result, case.expected.clone().map(|ty| vec![ty]));
        });
    }
}
