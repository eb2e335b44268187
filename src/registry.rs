//! Operator inference rules and the rule registry.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::dim::ConflictError;
use crate::graph::Node;
use crate::value::{Constant, DataType, TensorData, TypeInfo};

/// Errors produced by an individual operator's inference rule.
///
/// These errors are node-local: the driver converts them into diagnostics
/// attached to the failing node and continues with the rest of the graph.
#[derive(Clone, Debug, PartialEq)]
pub enum InferenceError {
    /// Two sources of information about a value are incompatible.
    Conflict(ConflictError),

    /// Input ranks do not match each other or the operator's requirements.
    RankMismatch(&'static str),

    /// Input element types do not match.
    TypeMismatch { expected: DataType, actual: DataType },

    /// Shape arithmetic failed, eg. an invalid `Reshape` specification.
    ShapeArithmetic(&'static str),

    /// Too many or too few inputs were provided.
    Arity { expected: &'static str, actual: usize },

    /// An input or attribute has an invalid value.
    InvalidValue(&'static str),
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceError::Conflict(err) => write!(f, "conflict: {}", err),
            InferenceError::RankMismatch(msg) => write!(f, "rank mismatch: {}", msg),
            InferenceError::TypeMismatch { expected, actual } => {
                write!(f, "type mismatch: expected {}, got {}", expected, actual)
            }
            InferenceError::ShapeArithmetic(msg) => write!(f, "shape arithmetic error: {}", msg),
            InferenceError::Arity { expected, actual } => {
                write!(
                    f,
                    "incorrect number of inputs: expected {}, got {}",
                    expected, actual
                )
            }
            InferenceError::InvalidValue(msg) => write!(f, "invalid value: {}", msg),
        }
    }
}

impl Error for InferenceError {}

impl From<ConflictError> for InferenceError {
    fn from(err: ConflictError) -> InferenceError {
        InferenceError::Conflict(err)
    }
}

/// What inference knows about one operator input.
#[derive(Clone, Copy, Debug)]
pub struct InputInfo<'a> {
    /// The input's type, as established by earlier inference.
    pub type_info: &'a TypeInfo,

    /// The input's value, if data propagation was able to compute it.
    pub value: Option<&'a Constant>,
}

/// Everything an inference rule may inspect about the node it is applied
/// to: per-input types and known values, attributes and output count.
pub struct InferenceContext<'a> {
    node: &'a Node,
    inputs: Vec<Option<InputInfo<'a>>>,
}

impl<'a> InferenceContext<'a> {
    /// Create a context for a node.
    ///
    /// `inputs` has one entry per input slot; `None` marks an optional
    /// input which was omitted.
    pub fn new(node: &'a Node, inputs: Vec<Option<InputInfo<'a>>>) -> InferenceContext<'a> {
        InferenceContext { node, inputs }
    }

    pub fn node(&self) -> &'a Node {
        self.node
    }

    /// Return the number of input slots, including omitted ones.
    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.node.outputs.len()
    }

    /// Return the state of the index'th input, or `None` if the slot is out
    /// of range or the input was omitted.
    pub fn input(&self, index: usize) -> Option<InputInfo<'a>> {
        self.inputs.get(index).copied().flatten()
    }

    /// Return the state of the index'th input, or an arity error naming the
    /// expected count.
    pub fn require_input(
        &self,
        index: usize,
        expected: &'static str,
    ) -> Result<InputInfo<'a>, InferenceError> {
        self.input(index).ok_or(InferenceError::Arity {
            expected,
            actual: self.inputs.iter().filter(|inp| inp.is_some()).count(),
        })
    }

    /// Return the type of the index'th input, if present.
    pub fn input_type(&self, index: usize) -> Option<&'a TypeInfo> {
        self.input(index).map(|info| info.type_info)
    }

    /// Return the known value of the index'th input, if present.
    pub fn input_value(&self, index: usize) -> Option<&'a Constant> {
        self.input(index).and_then(|info| info.value)
    }

    pub fn attr_int(&self, name: &str) -> Option<i64> {
        self.node.attr_int(name)
    }

    pub fn attr_ints(&self, name: &str) -> Option<&'a [i64]> {
        self.node.attr_ints(name)
    }

    pub fn attr_float(&self, name: &str) -> Option<f32> {
        self.node.attr_float(name)
    }

    pub fn attr_floats(&self, name: &str) -> Option<&'a [f32]> {
        self.node.attr_floats(name)
    }

    pub fn attr_tensor(&self, name: &str) -> Option<&'a TensorData> {
        self.node.attr_tensor(name)
    }

    /// Return a list of axes taken from an input's known value if the slot
    /// is present, falling back to an attribute.
    ///
    /// Several operators moved their axes from an attribute to an input
    /// between operator-set versions; rules handle both forms this way.
    pub fn axes_from_input_or_attr(&self, input_index: usize, attr: &str) -> Option<Vec<i64>> {
        if let Some(value) = self.input_value(input_index) {
            return Some(value.values().to_vec());
        }
        self.attr_ints(attr).map(|axes| axes.to_vec())
    }
}

/// Infer the types of an operator's outputs given its inputs.
///
/// Rules are pure functions of the context: they must not depend on state
/// from unrelated nodes, since evaluation order across independent branches
/// of a graph is unspecified.
pub trait InferenceRule {
    /// Return one `TypeInfo` per output slot of the node.
    ///
    /// Rules may return fewer entries than the node has outputs; the driver
    /// treats missing entries as unknown.
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<TypeInfo>, InferenceError>;
}

/// A rule shared between registry entries.
pub type SharedRule = Arc<dyn InferenceRule + Send + Sync>;

struct RegistryEntry {
    since_version: i64,
    rule: SharedRule,
}

/// Registry of inference rules keyed by operator domain, name and version.
///
/// New registries have no rules registered. Use
/// [`OpRegistry::with_builtin_ops`] for a registry covering the builtin
/// operator set, or register rules individually with
/// [`OpRegistry::register`] to keep the table small.
#[derive(Default)]
pub struct OpRegistry {
    // Entries are kept sorted by ascending `since_version`.
    rules: FxHashMap<(String, String), Vec<RegistryEntry>>,
}

impl OpRegistry {
    /// Create a new empty registry.
    pub fn new() -> OpRegistry {
        OpRegistry::default()
    }

    /// Create a new registry with rules for the builtin operator set.
    pub fn with_builtin_ops() -> OpRegistry {
        let mut reg = OpRegistry::new();
        crate::ops::register_builtin_ops(&mut reg);
        reg
    }

    /// Register a rule for an operator, effective from `since_version` of
    /// the operator's domain.
    ///
    /// Registering a second rule for the same operator and version replaces
    /// the first.
    pub fn register(&mut self, domain: &str, op_type: &str, since_version: i64, rule: SharedRule) {
        let entries = self
            .rules
            .entry((domain.to_string(), op_type.to_string()))
            .or_default();
        match entries.binary_search_by_key(&since_version, |e| e.since_version) {
            Ok(pos) => entries[pos].rule = rule,
            Err(pos) => entries.insert(
                pos,
                RegistryEntry {
                    since_version,
                    rule,
                },
            ),
        }
    }

    /// Look up the rule for an operator under a given opset version.
    ///
    /// Returns the rule with the highest `since_version` that does not
    /// exceed `opset_version`.
    pub fn lookup(
        &self,
        domain: &str,
        op_type: &str,
        opset_version: i64,
    ) -> Option<&(dyn InferenceRule + Send + Sync)> {
        let entries = self.rules.get(&(domain.to_string(), op_type.to_string()))?;
        entries
            .iter()
            .rev()
            .find(|e| e.since_version <= opset_version)
            .map(|e| e.rule.as_ref())
    }
}
