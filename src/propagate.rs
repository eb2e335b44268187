//! Best-effort evaluation of shape-carrying integer values.
//!
//! Some operators compute values which later feed shape-determining inputs,
//! such as `Shape` followed by `Expand`. For a small allow-list of
//! operators this module interprets the exact integer-vector semantics over
//! scalars and short vectors, so that dependent shape expressions resolve
//! to concrete dimensions at analysis time.
//!
//! Evaluation is never required for the correctness of inferred types, only
//! for their precision: anything outside the allow-list, a missing input
//! value, or an out-of-bounds computation simply produces no value.

use crate::dim::Shape;
use crate::ops::resolve_index;
use crate::ops::shape::shape_slice_range;
use crate::ops::slice::slice_len;
use crate::registry::InferenceContext;
use crate::value::Constant;

/// Longest vector the evaluator will produce or consume.
///
/// Propagated values represent shapes, so their length is bounded by model
/// rank rather than data sizes.
pub(crate) const MAX_PROPAGATE_LEN: usize = 64;

/// Try to compute the concrete output value of a node from the known values
/// of its inputs.
///
/// Returns `None` if the operator is outside the interpretable allow-list,
/// a required input has no known value, or the result would exceed the
/// evaluator's size bounds.
pub fn try_evaluate(ctx: &InferenceContext) -> Option<Constant> {
    if !ctx.node().domain.is_empty() {
        return None;
    }
    match ctx.node().op_type.as_str() {
        "Shape" => eval_shape(ctx),
        "Constant" => eval_constant(ctx),
        "Add" => eval_binary(ctx, |a, b| a.checked_add(b)),
        "Sub" => eval_binary(ctx, |a, b| a.checked_sub(b)),
        "Mul" => eval_binary(ctx, |a, b| a.checked_mul(b)),
        "Div" => eval_binary(ctx, |a, b| if b != 0 { Some(a / b) } else { None }),
        "Concat" => eval_concat(ctx),
        "Gather" => eval_gather(ctx),
        "Slice" => eval_slice(ctx),
        "ConstantOfShape" => eval_constant_of_shape(ctx),
        _ => None,
    }
}

/// Evaluate `Shape`: the value is the input's dimension vector, which is
/// known when the input shape is fully fixed.
fn eval_shape(ctx: &InferenceContext) -> Option<Constant> {
    let shape = ctx.input_type(0)?.shape()?;
    let dims = shape.fixed_dims()?;
    let (start, end) = shape_slice_range(dims.len(), ctx.attr_int("start"), ctx.attr_int("end"));
    Some(Constant::Vector(
        dims[start..end].iter().map(|&size| size as i64).collect(),
    ))
}

fn eval_constant(ctx: &InferenceContext) -> Option<Constant> {
    if let Some(tensor) = ctx.attr_tensor("value") {
        let value = tensor.to_constant()?;
        (value.values().len() <= MAX_PROPAGATE_LEN).then_some(value)
    } else if let Some(value) = ctx.attr_int("value_int") {
        Some(Constant::Scalar(value))
    } else if let Some(values) = ctx.attr_ints("value_ints") {
        (values.len() <= MAX_PROPAGATE_LEN).then(|| Constant::Vector(values.to_vec()))
    } else {
        None
    }
}

/// Evaluate an elementwise binary operator over scalars and vectors.
///
/// Broadcasting covers the scalar, length-1 and equal-length cases. In
/// particular a length-0 vector broadcast with a length-1 vector produces a
/// length-0 vector.
fn eval_binary(
    ctx: &InferenceContext,
    op: impl Fn(i64, i64) -> Option<i64>,
) -> Option<Constant> {
    let a = ctx.input_value(0)?;
    let b = ctx.input_value(1)?;

    let zip = |xs: &[i64], ys: &[i64]| -> Option<Vec<i64>> {
        xs.iter().zip(ys).map(|(&x, &y)| op(x, y)).collect()
    };

    match (a, b) {
        (Constant::Scalar(a), Constant::Scalar(b)) => op(*a, *b).map(Constant::Scalar),
        (Constant::Scalar(a), Constant::Vector(b)) => {
            let out: Option<Vec<i64>> = b.iter().map(|&y| op(*a, y)).collect();
            out.map(Constant::Vector)
        }
        (Constant::Vector(a), Constant::Scalar(b)) => {
            let out: Option<Vec<i64>> = a.iter().map(|&x| op(x, *b)).collect();
            out.map(Constant::Vector)
        }
        (Constant::Vector(a), Constant::Vector(b)) => {
            let out = if a.len() == b.len() {
                zip(a, b)?
            } else if a.len() == 1 {
                zip(&vec![a[0]; b.len()], b)?
            } else if b.len() == 1 {
                zip(a, &vec![b[0]; a.len()])?
            } else {
                return None;
            };
            Some(Constant::Vector(out))
        }
    }
}

/// Evaluate `Concat` over vector values along axis 0.
fn eval_concat(ctx: &InferenceContext) -> Option<Constant> {
    match ctx.attr_int("axis")? {
        0 | -1 => {}
        _ => return None,
    }

    let mut out = Vec::new();
    for index in 0..ctx.num_inputs() {
        let value = ctx.input_value(index)?;
        match value {
            Constant::Vector(values) => out.extend_from_slice(values),
            Constant::Scalar(_) => return None,
        }
        if out.len() > MAX_PROPAGATE_LEN {
            return None;
        }
    }
    Some(Constant::Vector(out))
}

/// Evaluate `Gather` of scalar or vector indices from a vector, along axis
/// 0.
fn eval_gather(ctx: &InferenceContext) -> Option<Constant> {
    match ctx.attr_int("axis").unwrap_or(0) {
        0 | -1 => {}
        _ => return None,
    }

    let data = match ctx.input_value(0)? {
        Constant::Vector(values) => values,
        Constant::Scalar(_) => return None,
    };
    let get = |index: i64| -> Option<i64> {
        resolve_index(data.len(), index).map(|index| data[index])
    };

    match ctx.input_value(1)? {
        Constant::Scalar(index) => get(*index).map(Constant::Scalar),
        Constant::Vector(indices) => {
            let out: Option<Vec<i64>> = indices.iter().map(|&index| get(index)).collect();
            out.map(Constant::Vector)
        }
    }
}

/// Evaluate `Slice` of a vector along axis 0.
fn eval_slice(ctx: &InferenceContext) -> Option<Constant> {
    let data = match ctx.input_value(0)? {
        Constant::Vector(values) => values,
        Constant::Scalar(_) => return None,
    };

    let single = |index: usize, attr: &str| -> Option<i64> {
        let values = match ctx.input_value(index) {
            Some(value) => value.values().to_vec(),
            None => ctx.attr_ints(attr)?.to_vec(),
        };
        match values.as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    };

    let start = single(1, "starts")?;
    let end = single(2, "ends")?;
    if let Some(axis) = single(3, "axes") {
        if resolve_index(1, axis) != Some(0) {
            return None;
        }
    }
    let step = if ctx.input(4).is_some() || ctx.attr_ints("steps").is_some() {
        single(4, "steps")?
    } else {
        1
    };

    let len = data.len();
    let count = slice_len(len, start, end, step).ok()?;
    if count == 0 {
        return Some(Constant::Vector(Vec::new()));
    }

    let len_i = len as i64;
    let norm = |index: i64| {
        if index < 0 {
            index.saturating_add(len_i)
        } else {
            index
        }
    };
    let begin = if step > 0 {
        norm(start).clamp(0, len_i)
    } else {
        norm(start).clamp(0, len_i - 1)
    };

    let mut out = Vec::with_capacity(count);
    let mut index = begin;
    for i in 0..count {
        out.push(data[index as usize]);
        if i + 1 < count {
            index = index.saturating_add(step);
        }
    }
    Some(Constant::Vector(out))
}

/// Evaluate `ConstantOfShape`: a fill whose extent is the input value.
///
/// Only scalar and vector outputs with an integer fill can be represented.
fn eval_constant_of_shape(ctx: &InferenceContext) -> Option<Constant> {
    let fill = match ctx.attr_tensor("value") {
        Some(tensor) => match tensor.to_constant()? {
            Constant::Scalar(fill) => fill,
            Constant::Vector(values) => *values.first()?,
        },
        // The default fill is a f32 zero, which is not an integer value.
        None => return None,
    };

    let dims = match ctx.input_value(0)? {
        Constant::Vector(values) => values,
        Constant::Scalar(_) => return None,
    };
    match dims.as_slice() {
        [] => Some(Constant::Scalar(fill)),
        [len] if *len >= 0 && (*len as usize) <= MAX_PROPAGATE_LEN => {
            Some(Constant::Vector(vec![fill; *len as usize]))
        }
        _ => None,
    }
}

/// Helper used by tests and the driver to check a value is representable.
pub(crate) fn value_matches_type(value: &Constant, shape: Option<&Shape>) -> bool {
    match shape.and_then(Shape::fixed_dims) {
        Some(dims) => match (value, dims.as_slice()) {
            (Constant::Scalar(_), []) => true,
            (Constant::Vector(values), [len]) => values.len() == *len,
            _ => false,
        },
        None => true,
    }
}
