//! Dimensions and shapes with symbolic and unknown sizes.

use std::error::Error;
use std::fmt;

use crate::value::DataType;

/// Size of one dimension of a tensor value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dimension {
    /// A dimension whose size is fixed and specified as part of the model.
    Fixed(usize),

    /// A dimension whose size is determined at runtime. The symbol provides
    /// a name to identify when different values share a size.
    ///
    /// Two symbolic dimensions are equal only if they have the same name.
    /// Dimensions with different names may still have the same size at
    /// runtime, so inference never treats them as provably unequal either.
    Symbolic(String),

    /// A dimension about which nothing is known.
    Unknown,
}

impl Dimension {
    /// Return the fixed size of this dimension, if known.
    pub fn as_fixed(&self) -> Option<usize> {
        match self {
            Dimension::Fixed(size) => Some(*size),
            _ => None,
        }
    }

    /// Combine two sources of information about the same dimension.
    ///
    /// `Unknown` yields to anything. A fixed size combined with a symbolic
    /// name keeps the fixed size. Two different symbols yield `Unknown`
    /// since they are not provably equal. Two different fixed sizes are a
    /// conflict, reported as `None`.
    pub fn merge(&self, other: &Dimension) -> Option<Dimension> {
        use Dimension::*;
        match (self, other) {
            (Unknown, other) => Some(other.clone()),
            (this, Unknown) => Some(this.clone()),
            (Fixed(a), Fixed(b)) => (a == b).then(|| Fixed(*a)),
            (Fixed(a), Symbolic(_)) | (Symbolic(_), Fixed(a)) => Some(Fixed(*a)),
            (Symbolic(a), Symbolic(b)) => {
                if a == b {
                    Some(Symbolic(a.clone()))
                } else {
                    Some(Unknown)
                }
            }
        }
    }

    /// Broadcast this dimension against `other`.
    ///
    /// Returns `None` if the two sizes are known to be incompatible.
    fn broadcast(&self, other: &Dimension) -> Option<Dimension> {
        use Dimension::*;
        match (self, other) {
            (a, b) if a == b => Some(a.clone()),

            // If either size is 1, it will be broadcast against the other
            // size.
            (Fixed(1), b) => Some(b.clone()),
            (a, Fixed(1)) => Some(a.clone()),

            // If both sizes are fixed and different, we know execution will
            // fail. This includes a zero-sized dimension against a fixed
            // size other than 1.
            (Fixed(_), Fixed(_)) => None,

            // If one dim is a fixed value other than 1 and the other dim is
            // symbolic or unknown, execution can only succeed if that dim
            // is either 1 or the fixed size. Both cases produce the fixed
            // size.
            (Symbolic(_) | Unknown, Fixed(b)) => Some(Fixed(*b)),
            (Fixed(a), Symbolic(_) | Unknown) => Some(Fixed(*a)),

            // In the remaining cases the result can be either of the
            // dimensions, so nothing is known about it.
            _ => Some(Unknown),
        }
    }
}

impl From<usize> for Dimension {
    fn from(size: usize) -> Self {
        Dimension::Fixed(size)
    }
}

impl From<&str> for Dimension {
    fn from(name: &str) -> Self {
        Dimension::Symbolic(name.to_string())
    }
}

impl From<String> for Dimension {
    fn from(name: String) -> Self {
        Dimension::Symbolic(name)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Fixed(size) => write!(f, "{}", size),
            Dimension::Symbolic(name) => write!(f, "{}", name),
            Dimension::Unknown => write!(f, "?"),
        }
    }
}

/// Shape of a tensor value.
///
/// The rank may itself be unknown. Once the rank of a value is established
/// within an inference pass it never changes; [`Shape::merge`] only narrows
/// individual dimensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Shape {
    /// Shape with a known number of dimensions.
    Ranked(Vec<Dimension>),

    /// Shape whose rank is unknown.
    Unranked,
}

impl Shape {
    /// Create a shape with the given fixed dimension sizes.
    pub fn fixed(dims: &[usize]) -> Shape {
        Shape::Ranked(dims.iter().copied().map(Dimension::Fixed).collect())
    }

    /// Create a rank-0 shape.
    pub fn scalar() -> Shape {
        Shape::Ranked(Vec::new())
    }

    /// Return the number of dimensions, if known.
    pub fn rank(&self) -> Option<usize> {
        match self {
            Shape::Ranked(dims) => Some(dims.len()),
            Shape::Unranked => None,
        }
    }

    /// Return the dimensions of this shape, if the rank is known.
    pub fn dims(&self) -> Option<&[Dimension]> {
        match self {
            Shape::Ranked(dims) => Some(dims),
            Shape::Unranked => None,
        }
    }

    /// Return the dimension sizes if every dimension is fixed.
    pub fn fixed_dims(&self) -> Option<Vec<usize>> {
        self.dims()?.iter().map(Dimension::as_fixed).collect()
    }

    /// Return the number of elements in a tensor of this shape, if every
    /// dimension is fixed.
    pub fn num_elements(&self) -> Option<usize> {
        self.fixed_dims()
            .map(|dims| dims.iter().product::<usize>())
    }

    /// Combine two sources of information about the same shape.
    ///
    /// Returns the pointwise more specific combination of the two shapes.
    /// An unranked shape yields to a ranked one. Two ranked shapes must
    /// have the same rank and compatible dimensions at every position.
    pub fn merge(&self, other: &Shape) -> Result<Shape, ConflictError> {
        let (a_dims, b_dims) = match (self, other) {
            (Shape::Unranked, other) => return Ok(other.clone()),
            (this, Shape::Unranked) => return Ok(this.clone()),
            (Shape::Ranked(a), Shape::Ranked(b)) => (a, b),
        };

        if a_dims.len() != b_dims.len() {
            return Err(ConflictError::RankMismatch {
                expected: a_dims.len(),
                actual: b_dims.len(),
            });
        }

        let mut merged = Vec::with_capacity(a_dims.len());
        for (axis, (a, b)) in a_dims.iter().zip(b_dims).enumerate() {
            let dim = a.merge(b).ok_or_else(|| ConflictError::DimensionMismatch {
                axis,
                expected: a.clone(),
                actual: b.clone(),
            })?;
            merged.push(dim);
        }
        Ok(Shape::Ranked(merged))
    }

    /// Broadcast two shapes together following NumPy rules.
    ///
    /// The ranks are aligned from the trailing dimension and missing leading
    /// dimensions are treated as size 1. A zero-sized dimension broadcast
    /// against a fixed size other than 1 is a conflict.
    pub fn broadcast(&self, other: &Shape) -> Result<Shape, ConflictError> {
        let (a_dims, b_dims) = match (self.dims(), other.dims()) {
            (Some(a), Some(b)) => (a, b),
            _ => return Ok(Shape::Unranked),
        };

        let a_pad = b_dims.len().saturating_sub(a_dims.len());
        let b_pad = a_dims.len().saturating_sub(b_dims.len());

        let one = Dimension::Fixed(1);
        let a_iter = std::iter::repeat(&one).take(a_pad).chain(a_dims);
        let b_iter = std::iter::repeat(&one).take(b_pad).chain(b_dims);

        let mut out_dims = Vec::with_capacity(a_dims.len().max(b_dims.len()));
        for (axis, (a, b)) in a_iter.zip(b_iter).enumerate() {
            let dim = a
                .broadcast(b)
                .ok_or_else(|| ConflictError::DimensionMismatch {
                    axis,
                    expected: a.clone(),
                    actual: b.clone(),
                })?;
            out_dims.push(dim);
        }
        Ok(Shape::Ranked(out_dims))
    }
}

impl From<Vec<Dimension>> for Shape {
    fn from(dims: Vec<Dimension>) -> Self {
        Shape::Ranked(dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Ranked(dims) => {
                write!(f, "[")?;
                for (i, dim) in dims.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", dim)?;
                }
                write!(f, "]")
            }
            Shape::Unranked => write!(f, "[?]"),
        }
    }
}

/// Error combining two incompatible sources of type or shape information.
///
/// A conflict means two annotations of the same value disagree in a way
/// that cannot be explained by one of them being less specific.
#[derive(Clone, Debug, PartialEq)]
pub enum ConflictError {
    /// Two ranked shapes have different numbers of dimensions.
    RankMismatch { expected: usize, actual: usize },

    /// Two known dimensions at the same position have different sizes.
    DimensionMismatch {
        axis: usize,
        expected: Dimension,
        actual: Dimension,
    },

    /// Two tensor types have different element types.
    ElementTypeMismatch { expected: DataType, actual: DataType },

    /// The two types have different kinds (eg. tensor vs sequence).
    KindMismatch,
}

impl fmt::Display for ConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictError::RankMismatch { expected, actual } => {
                write!(f, "rank mismatch: {} vs {}", expected, actual)
            }
            ConflictError::DimensionMismatch {
                axis,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "dimension mismatch at axis {}: {} vs {}",
                    axis, expected, actual
                )
            }
            ConflictError::ElementTypeMismatch { expected, actual } => {
                write!(f, "element type mismatch: {} vs {}", expected, actual)
            }
            ConflictError::KindMismatch => write!(f, "type kind mismatch"),
        }
    }
}

impl Error for ConflictError {}

#[cfg(test)]
pub(crate) use tests::dims;
