//! Shape inference for slicing and gathering operators.

use smallvec::SmallVec;

use crate::dim::{Dimension, Shape};
use crate::ops::{resolve_axes, resolve_index};
use crate::registry::{InferenceContext, InferenceError, InferenceRule};
use crate::value::TypeInfo;

/// Number of elements selected when slicing a dimension of size `dim`.
///
/// Start and end indices are normalized and clamped following the Slice
/// operator's rules for positive and negative steps.
pub(crate) fn slice_len(
    dim: usize,
    start: i64,
    end: i64,
    step: i64,
) -> Result<usize, InferenceError> {
    if step == 0 {
        return Err(InferenceError::InvalidValue("step must be non-zero"));
    }
    if dim == 0 {
        return Ok(0);
    }

    let dim = dim as i64;
    let norm = |index: i64| if index < 0 { index.saturating_add(dim) } else { index };

    // Intermediate sums can exceed i64 for sentinel start/end/step values,
    // so count in i128.
    let step_abs = step.unsigned_abs() as i128;
    let span = if step > 0 {
        let start = norm(start).clamp(0, dim);
        let end = norm(end).clamp(0, dim);
        (end - start).max(0) as i128
    } else {
        let start = norm(start).clamp(0, dim - 1);
        let end = norm(end).clamp(-1, dim - 1);
        (start - end).max(0) as i128
    };
    Ok(((span + step_abs - 1) / step_abs) as usize)
}

/// Slice operator.
///
/// The start/end/axes/steps specification is read from the propagated
/// values of inputs 1-4, falling back to the attribute form used by older
/// opsets. Sliced axes with no usable specification become unknown.
pub struct Slice;

impl InferenceRule for Slice {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError> {
        let data = ctx.require_input(0, "1 to 5")?;

        let (dtype, shape) = match data.type_info {
            TypeInfo::Tensor { dtype, shape } => (*dtype, shape),
            TypeInfo::Unknown => return Ok(vec![TypeInfo::Unknown]),
            _ => return Err(InferenceError::InvalidValue("expected tensor input")),
        };
        let Some(dims) = shape.dims() else {
            return Ok(vec![TypeInfo::unranked(dtype)]);
        };
        let ndim = dims.len();

        let from_input_or_attr = |index: usize, attr: &str| -> Option<Vec<i64>> {
            ctx.input_value(index)
                .map(|value| value.values().to_vec())
                .or_else(|| ctx.attr_ints(attr).map(|vals| vals.to_vec()))
        };

        let starts = from_input_or_attr(1, "starts");
        let ends = from_input_or_attr(2, "ends");
        let axes = from_input_or_attr(3, "axes");
        let steps = from_input_or_attr(4, "steps");

        let (Some(starts), Some(ends)) = (starts, ends) else {
            // The slice specification is unknown. If the axes are known,
            // only those dims become unknown, otherwise all do.
            let out_dims = match &axes {
                Some(axes) => {
                    let resolved = resolve_axes(ndim, axes)?;
                    dims.iter()
                        .enumerate()
                        .map(|(i, dim)| {
                            if resolved.contains(&i) {
                                Dimension::Unknown
                            } else {
                                dim.clone()
                            }
                        })
                        .collect()
                }
                None => vec![Dimension::Unknown; ndim],
            };
            return Ok(vec![TypeInfo::tensor(dtype, Shape::Ranked(out_dims))]);
        };

        if starts.len() != ends.len() {
            return Err(InferenceError::InvalidValue(
                "starts and ends must have the same length",
            ));
        }
        let axes: SmallVec<[usize; 4]> = match &axes {
            Some(axes) => {
                if axes.len() != starts.len() {
                    return Err(InferenceError::InvalidValue(
                        "axes must match the length of starts",
                    ));
                }
                resolve_axes(ndim, axes)?
            }
            None => {
                if starts.len() > ndim {
                    return Err(InferenceError::InvalidValue(
                        "more slice entries than input dimensions",
                    ));
                }
                (0..starts.len()).collect()
            }
        };
        let steps: Vec<i64> = match steps {
            Some(steps) => {
                if steps.len() != starts.len() {
                    return Err(InferenceError::InvalidValue(
                        "steps must match the length of starts",
                    ));
                }
                steps
            }
            None => vec![1; starts.len()],
        };

        let mut out_dims = dims.to_vec();
        for (i, &axis) in axes.iter().enumerate() {
            let (start, end, step) = (starts[i], ends[i], steps[i]);
            let sliced = match &out_dims[axis] {
                Dimension::Fixed(size) => Dimension::Fixed(slice_len(*size, start, end, step)?),
                // A full-range slice of a non-fixed dim keeps it. The end
                // sentinel is i64::MAX.
                dim if start == 0 && end == i64::MAX && step == 1 => dim.clone(),
                _ => Dimension::Unknown,
            };
            out_dims[axis] = sliced;
        }

        Ok(vec![TypeInfo::tensor(dtype, Shape::Ranked(out_dims))])
    }
}

/// Gather operator.
///
/// Splices the indices shape into the data shape in place of the gathered
/// axis. Value-level gathering from shape vectors is handled by data
/// propagation.
pub struct Gather;

impl InferenceRule for Gather {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError> {
        let data = ctx.require_input(0, "2")?;
        let indices = ctx.require_input(1, "2")?;

        let (dtype, shape) = match data.type_info {
            TypeInfo::Tensor { dtype, shape } => (*dtype, shape),
            TypeInfo::Unknown => return Ok(vec![TypeInfo::Unknown]),
            _ => return Err(InferenceError::InvalidValue("expected tensor input")),
        };
        let Some(dims) = shape.dims() else {
            return Ok(vec![TypeInfo::unranked(dtype)]);
        };

        let axis = ctx.attr_int("axis").unwrap_or(0);
        let axis = resolve_index(dims.len(), axis)
            .ok_or(InferenceError::InvalidValue("axis is out of range"))?;

        let indices_dims = match indices.type_info {
            TypeInfo::Tensor { shape, .. } => shape.dims(),
            TypeInfo::Unknown => None,
            _ => return Err(InferenceError::InvalidValue("expected tensor indices")),
        };
        let Some(indices_dims) = indices_dims else {
            return Ok(vec![TypeInfo::unranked(dtype)]);
        };

        let mut out_dims = Vec::with_capacity(dims.len() + indices_dims.len() - 1);
        out_dims.extend_from_slice(&dims[..axis]);
        out_dims.extend_from_slice(indices_dims);
        out_dims.extend_from_slice(&dims[axis + 1..]);

        Ok(vec![TypeInfo::tensor(dtype, Shape::Ranked(out_dims))])
    }
}
