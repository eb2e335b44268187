//! In-memory model of computation graphs, nodes and functions.
//!
//! The types in this module are a read-only view of an already-deserialized
//! model. The inference engine consumes them but never mutates them;
//! deserializing from a wire format is the job of a separate loader.

use rustc_hash::FxHashMap;

use crate::value::{TensorData, TypeInfo};

/// Set of operator-set versions in effect for a model or function, keyed by
/// operator domain.
///
/// The default domain is the empty string.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OpsetImports {
    versions: FxHashMap<String, i64>,
}

impl OpsetImports {
    pub fn new() -> OpsetImports {
        OpsetImports::default()
    }

    /// Set the version in effect for a domain.
    pub fn set(&mut self, domain: &str, version: i64) {
        self.versions.insert(domain.to_string(), version);
    }

    /// Return the version in effect for a domain, if the domain is imported.
    pub fn version(&self, domain: &str) -> Option<i64> {
        self.versions.get(domain).copied()
    }
}

/// Value of a node attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Ints(Vec<i64>),
    Float(f32),
    Floats(Vec<f32>),
    Str(String),
    Tensor(TensorData),
}

/// Named attribute of an operator node.
///
/// Attribute references inside function bodies are expected to have been
/// substituted with concrete values before inference runs.
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: AttrValue,
}

/// A single operator application in a graph.
///
/// Inputs and outputs refer to values by name. An empty input name marks an
/// optional input which was omitted at this position.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    /// Optional name for this node, used in diagnostics.
    pub name: Option<String>,

    /// Operator domain. The builtin operator set uses the empty string.
    pub domain: String,

    /// Name of the operator or function this node applies.
    pub op_type: String,

    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attrs: Vec<Attribute>,
}

impl Node {
    pub fn new(op_type: &str, inputs: &[&str], outputs: &[&str]) -> Node {
        Node {
            name: None,
            domain: String::new(),
            op_type: op_type.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            attrs: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: &str) -> Node {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_domain(mut self, domain: &str) -> Node {
        self.domain = domain.to_string();
        self
    }

    pub fn with_attr(mut self, name: &str, value: AttrValue) -> Node {
        self.attrs.push(Attribute {
            name: name.to_string(),
            value,
        });
        self
    }

    /// Return the debug name of this node.
    ///
    /// Falls back to the operator name if the node is unnamed.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.op_type)
    }

    /// Look up an attribute by name.
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| &attr.value)
    }

    pub fn attr_int(&self, name: &str) -> Option<i64> {
        match self.attr(name) {
            Some(AttrValue::Int(val)) => Some(*val),
            _ => None,
        }
    }

    pub fn attr_ints(&self, name: &str) -> Option<&[i64]> {
        match self.attr(name) {
            Some(AttrValue::Ints(vals)) => Some(vals.as_slice()),
            _ => None,
        }
    }

    pub fn attr_float(&self, name: &str) -> Option<f32> {
        match self.attr(name) {
            Some(AttrValue::Float(val)) => Some(*val),
            _ => None,
        }
    }

    pub fn attr_floats(&self, name: &str) -> Option<&[f32]> {
        match self.attr(name) {
            Some(AttrValue::Floats(vals)) => Some(vals.as_slice()),
            _ => None,
        }
    }

    pub fn attr_str(&self, name: &str) -> Option<&str> {
        match self.attr(name) {
            Some(AttrValue::Str(val)) => Some(val.as_str()),
            _ => None,
        }
    }

    pub fn attr_tensor(&self, name: &str) -> Option<&TensorData> {
        match self.attr(name) {
            Some(AttrValue::Tensor(val)) => Some(val),
            _ => None,
        }
    }
}

/// Name and declared type of a graph input, output or intermediate value.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueInfo {
    pub name: String,
    pub type_info: TypeInfo,
}

/// Named constant tensor stored in a graph.
#[derive(Clone, Debug, PartialEq)]
pub struct Initializer {
    pub name: String,
    pub data: TensorData,
}

/// A computation graph: a list of nodes in def-before-use order plus the
/// declared inputs, outputs and constants.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Graph {
    pub inputs: Vec<ValueInfo>,
    pub outputs: Vec<ValueInfo>,

    /// Declared type annotations for intermediate values. These are
    /// optional; inference checks its results against them where present.
    pub value_infos: Vec<ValueInfo>,

    pub initializers: Vec<Initializer>,
    pub nodes: Vec<Node>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    pub fn with_input(mut self, name: &str, type_info: TypeInfo) -> Graph {
        self.inputs.push(ValueInfo {
            name: name.to_string(),
            type_info,
        });
        self
    }

    pub fn with_output(mut self, name: &str, type_info: TypeInfo) -> Graph {
        self.outputs.push(ValueInfo {
            name: name.to_string(),
            type_info,
        });
        self
    }

    pub fn with_value_info(mut self, name: &str, type_info: TypeInfo) -> Graph {
        self.value_infos.push(ValueInfo {
            name: name.to_string(),
            type_info,
        });
        self
    }

    pub fn with_initializer(mut self, name: &str, data: TensorData) -> Graph {
        self.initializers.push(Initializer {
            name: name.to_string(),
            data,
        });
        self
    }

    pub fn with_node(mut self, node: Node) -> Graph {
        self.nodes.push(node);
        self
    }
}

/// A user-defined function: a named, versioned subgraph which can be
/// invoked as a single node.
///
/// Function bodies declare their inputs and outputs by name only; their
/// types are established per call site from the caller's arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub domain: String,
    pub name: String,

    /// Version of the containing domain at which this function became
    /// available.
    pub since_version: i64,

    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub nodes: Vec<Node>,

    /// Operator sets in effect inside the function body.
    pub opset_imports: OpsetImports,
}

impl Function {
    pub fn new(domain: &str, name: &str, inputs: &[&str], outputs: &[&str]) -> Function {
        Function {
            domain: domain.to_string(),
            name: name.to_string(),
            since_version: 1,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            nodes: Vec::new(),
            opset_imports: OpsetImports::new(),
        }
    }

    pub fn with_since_version(mut self, version: i64) -> Function {
        self.since_version = version;
        self
    }

    pub fn with_node(mut self, node: Node) -> Function {
        self.nodes.push(node);
        self
    }

    pub fn with_opset(mut self, domain: &str, version: i64) -> Function {
        self.opset_imports.set(domain, version);
        self
    }
}

/// A model: the main graph plus the functions it may call and the operator
/// sets in effect.
#[derive(Clone, Debug, PartialEq)]
pub struct Model {
    pub graph: Graph,
    pub functions: Vec<Function>,
    pub opset_imports: OpsetImports,
}

impl Model {
    pub fn new(graph: Graph) -> Model {
        Model {
            graph,
            functions: Vec::new(),
            opset_imports: OpsetImports::new(),
        }
    }

    pub fn with_function(mut self, function: Function) -> Model {
        self.functions.push(function);
        self
    }

    pub fn with_opset(mut self, domain: &str, version: i64) -> Model {
        self.opset_imports.set(domain, version);
        self
    }

    /// Return the functions declared with a given domain and name.
    ///
    /// A model may contain several overloads which differ in
    /// `since_version`; version selection is the caller's job.
    pub fn functions_named<'a>(
        &'a self,
        domain: &'a str,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Function> {
        self.functions
            .iter()
            .filter(move |f| f.domain == domain && f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::{AttrValue, Node, OpsetImports};

    #[test]
    fn test_node_attrs() {
        let node = Node::new("Concat", &["x", "y"], &["z"])
            .with_attr("axis", AttrValue::Int(-1))
            .with_attr("label", AttrValue::Str("join".to_string()));

        assert_eq!(node.attr_int("axis"), Some(-1));
        assert_eq!(node.attr_str("label"), Some("join"));
        assert_eq!(node.attr_int("label"), None);
        assert_eq!(node.attr("missing"), None);
    }

    #[test]
    fn test_display_name() {
        let node = Node::new("Add", &["a", "b"], &["c"]);
        assert_eq!(node.display_name(), "Add");
        let node = node.with_name("sum_1");
        assert_eq!(node.display_name(), "sum_1");
    }

    #[test]
    fn test_opset_imports() {
        let mut opsets = OpsetImports::new();
        opsets.set("", 18);
        opsets.set("local", 1);
        assert_eq!(opsets.version(""), Some(18));
        assert_eq!(opsets.version("local"), Some(1));
        assert_eq!(opsets.version("other"), None);
    }
}
