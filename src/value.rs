//! Element types, value types and known constant values.

use std::fmt;

use crate::dim::{ConflictError, Shape};

/// Enum specifying the element type of a tensor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum DataType {
    Float,
    Double,
    Int8,
    UInt8,
    Int32,
    Int64,
    Bool,
    String,
}

impl DataType {
    /// Return true if this is an integer type.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DataType::Int8 | DataType::UInt8 | DataType::Int32 | DataType::Int64
        )
    }

    /// Map a serialized element type code to a `DataType`.
    ///
    /// The codes are the ones used in model files, and by the `to`
    /// attribute of the `Cast` operator.
    pub fn from_code(code: i64) -> Option<DataType> {
        match code {
            1 => Some(DataType::Float),
            2 => Some(DataType::UInt8),
            3 => Some(DataType::Int8),
            6 => Some(DataType::Int32),
            7 => Some(DataType::Int64),
            8 => Some(DataType::String),
            9 => Some(DataType::Bool),
            11 => Some(DataType::Double),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    /// Format this enum value in the style of the corresponding Rust type
    /// (eg. "i32" for `DataType::Int32`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                DataType::Float => "f32",
                DataType::Double => "f64",
                DataType::Int8 => "i8",
                DataType::UInt8 => "u8",
                DataType::Int32 => "i32",
                DataType::Int64 => "i64",
                DataType::Bool => "bool",
                DataType::String => "string",
            }
        )
    }
}

/// Type of a named value in a graph.
///
/// Most values are tensors with an element type and a [`Shape`]. Values can
/// also be sequences, optionals or maps, which nest other types.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeInfo {
    /// Tensor with an element type and shape.
    Tensor { dtype: DataType, shape: Shape },

    /// Sequence of values which share a type.
    Sequence(Box<TypeInfo>),

    /// Value which may be absent at runtime.
    Optional(Box<TypeInfo>),

    /// Map from keys of an integral or string type to values.
    Map { key: DataType, value: Box<TypeInfo> },

    /// Nothing is known about this value.
    Unknown,
}

impl TypeInfo {
    /// Create a tensor type.
    pub fn tensor(dtype: DataType, shape: Shape) -> TypeInfo {
        TypeInfo::Tensor { dtype, shape }
    }

    /// Create a tensor type with unknown rank.
    pub fn unranked(dtype: DataType) -> TypeInfo {
        TypeInfo::Tensor {
            dtype,
            shape: Shape::Unranked,
        }
    }

    /// Return the element type, if this is a tensor.
    pub fn dtype(&self) -> Option<DataType> {
        match self {
            TypeInfo::Tensor { dtype, .. } => Some(*dtype),
            _ => None,
        }
    }

    /// Return the shape, if this is a tensor.
    pub fn shape(&self) -> Option<&Shape> {
        match self {
            TypeInfo::Tensor { shape, .. } => Some(shape),
            _ => None,
        }
    }

    /// Combine two sources of information about the same value's type.
    ///
    /// Returns the pointwise more specific combination. `Unknown` yields to
    /// anything. Two tensor types must have the same element type and
    /// mergeable shapes. Nested types are merged structurally.
    pub fn merge(&self, other: &TypeInfo) -> Result<TypeInfo, ConflictError> {
        match (self, other) {
            (TypeInfo::Unknown, other) => Ok(other.clone()),
            (this, TypeInfo::Unknown) => Ok(this.clone()),
            (
                TypeInfo::Tensor { dtype, shape },
                TypeInfo::Tensor {
                    dtype: other_dtype,
                    shape: other_shape,
                },
            ) => {
                if dtype != other_dtype {
                    return Err(ConflictError::ElementTypeMismatch {
                        expected: *dtype,
                        actual: *other_dtype,
                    });
                }
                Ok(TypeInfo::Tensor {
                    dtype: *dtype,
                    shape: shape.merge(other_shape)?,
                })
            }
            (TypeInfo::Sequence(a), TypeInfo::Sequence(b)) => {
                Ok(TypeInfo::Sequence(a.merge(b)?.into()))
            }
            (TypeInfo::Optional(a), TypeInfo::Optional(b)) => {
                Ok(TypeInfo::Optional(a.merge(b)?.into()))
            }
            (
                TypeInfo::Map { key, value },
                TypeInfo::Map {
                    key: other_key,
                    value: other_value,
                },
            ) => {
                if key != other_key {
                    return Err(ConflictError::ElementTypeMismatch {
                        expected: *key,
                        actual: *other_key,
                    });
                }
                Ok(TypeInfo::Map {
                    key: *key,
                    value: value.merge(other_value)?.into(),
                })
            }
            _ => Err(ConflictError::KindMismatch),
        }
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Produces strings such as "f32 [1, 16, 256]".
        match self {
            TypeInfo::Tensor { dtype, shape } => write!(f, "{} {}", dtype, shape),
            TypeInfo::Sequence(item) => write!(f, "seq({})", item),
            TypeInfo::Optional(item) => write!(f, "optional({})", item),
            TypeInfo::Map { key, value } => write!(f, "map({}, {})", key, value),
            TypeInfo::Unknown => write!(f, "unknown"),
        }
    }
}

/// Known integer value of a scalar or vector.
///
/// Known values are produced by data propagation for shape-carrying values,
/// such as the output of a `Shape` operator. They are distinct from
/// [`TypeInfo`]: a value can have a fully known type while its value remains
/// unknown.
#[derive(Clone, Eq, Hash, PartialEq)]
pub enum Constant {
    Scalar(i64),
    Vector(Vec<i64>),
}

impl Constant {
    /// Return the number of dimensions of this value.
    pub fn ndim(&self) -> usize {
        match self {
            Constant::Scalar(_) => 0,
            Constant::Vector(_) => 1,
        }
    }

    /// Return the elements of this value.
    pub fn values(&self) -> &[i64] {
        match self {
            Constant::Scalar(elem) => std::slice::from_ref(elem),
            Constant::Vector(vec) => vec.as_slice(),
        }
    }

    /// Convert this value into a vector of elements.
    pub fn into_vec(self) -> Vec<i64> {
        match self {
            Constant::Scalar(x) => vec![x],
            Constant::Vector(vec) => vec,
        }
    }
}

impl fmt::Debug for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Scalar(val) => write!(f, "{}", val),
            Constant::Vector(vec) => write!(f, "{:?}", vec),
        }
    }
}

/// Contents of a tensor stored in the model, such as an initializer or the
/// payload of a `value` attribute.
///
/// Element data is only retained for integer tensors, since inference only
/// interprets shape-vector-sized integer values.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorData {
    pub dtype: DataType,
    pub shape: Vec<usize>,
    pub ints: Option<Vec<i64>>,
}

impl TensorData {
    /// Create tensor contents with integer element data.
    pub fn from_ints(dtype: DataType, shape: &[usize], ints: &[i64]) -> TensorData {
        TensorData {
            dtype,
            shape: shape.to_vec(),
            ints: Some(ints.to_vec()),
        }
    }

    /// Create tensor contents where only the type and shape are retained.
    pub fn with_shape(dtype: DataType, shape: &[usize]) -> TensorData {
        TensorData {
            dtype,
            shape: shape.to_vec(),
            ints: None,
        }
    }

    /// Return the type of this tensor.
    pub fn type_info(&self) -> TypeInfo {
        TypeInfo::tensor(self.dtype, Shape::fixed(&self.shape))
    }

    /// Return the value of this tensor, if it is an integer scalar or
    /// vector with element data.
    pub fn to_constant(&self) -> Option<Constant> {
        if !self.dtype.is_integer() {
            return None;
        }
        let ints = self.ints.as_ref()?;
        match self.shape.as_slice() {
            [] => ints.first().copied().map(Constant::Scalar),
            [len] => (*len == ints.len()).then(|| Constant::Vector(ints.clone())),
            _ => None,
        }
    }
}
