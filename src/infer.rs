//! The inference driver: walks a graph and annotates every value.

use std::error::Error;
use std::fmt;

// The std HashMap provides DOS resistance. Scope and annotation keys are
// value names from a model the caller already chose to analyze, so we want
// faster hashing instead.
use rustc_hash::FxHashMap;

use crate::functions::{self, CallError};
use crate::graph::{Model, Node, OpsetImports};
use crate::propagate;
use crate::registry::{InferenceContext, InputInfo, OpRegistry};
use crate::value::{Constant, TypeInfo};

/// How serious a diagnostic is.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
    /// Inference of the value may be incomplete, but nothing is wrong.
    Warning,

    /// Part of the result is untrustworthy, eg. because a rule failed or
    /// two annotations conflict.
    Error,
}

/// Reference to the node a diagnostic is attached to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeRef {
    /// Position of the node in its graph.
    pub index: usize,

    /// Node name, falling back to the operator name.
    pub name: String,
}

/// A problem found while inferring types for a graph.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Diagnostic {
    /// The node the problem occurred at, if it is node-specific.
    pub node: Option<NodeRef>,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    fn error(node: NodeRef, message: String) -> Diagnostic {
        Diagnostic {
            node: Some(node),
            severity: Severity::Error,
            message,
        }
    }

    fn warning(node: NodeRef, message: String) -> Diagnostic {
        Diagnostic {
            node: Some(node),
            severity: Severity::Warning,
            message,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match &self.node {
            Some(node) => write!(
                f,
                "{} in node #{} ({}): {}",
                severity, node.index, node.name, self.message
            ),
            None => write!(f, "{}: {}", severity, self.message),
        }
    }
}

/// Errors which abort an inference pass.
///
/// These are conditions under which no sound partial result exists, such as
/// a malformed graph, plus strict-mode promotions of ordinary diagnostics.
#[derive(Clone, Debug, PartialEq)]
pub enum FatalError {
    /// A node references a value which is not defined at that point.
    Order { value: String, node: String },

    /// A value name is defined more than once in the same scope.
    DuplicateDefinition { value: String, node: String },

    /// A call node references a function with no compatible definition.
    UnresolvedFunction { domain: String, name: String },

    /// Function calls are nested deeper than the configured limit.
    RecursionLimit { limit: usize },

    /// A diagnostic was promoted to an error by strict mode.
    Strict(Diagnostic),
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::Order { value, node } => {
                write!(f, "node \"{}\" uses undefined value \"{}\"", node, value)
            }
            FatalError::DuplicateDefinition { value, node } => {
                write!(f, "value \"{}\" is redefined by \"{}\"", value, node)
            }
            FatalError::UnresolvedFunction { domain, name } => {
                write!(f, "no compatible definition for function \"{}.{}\"", domain, name)
            }
            FatalError::RecursionLimit { limit } => {
                write!(f, "function calls nested deeper than the limit of {}", limit)
            }
            FatalError::Strict(diagnostic) => write!(f, "{}", diagnostic),
        }
    }
}

impl Error for FatalError {}

/// Structural-validity collaborator, invoked per node before inference.
///
/// If the validator rejects a node, inference of that node's outputs is
/// skipped in favor of recording the validity error.
pub trait NodeValidator {
    fn validate(&self, node: &Node) -> Result<(), String>;
}

/// Options controlling an inference pass.
#[derive(Clone, Debug)]
pub struct InferenceOptions {
    /// Enable computing concrete values for shape-carrying outputs. On by
    /// default; turning this off leaves value-dependent shapes unknown.
    pub data_propagation: bool,

    /// Abort on the first diagnostic, including warnings, instead of
    /// accumulating best-effort results.
    pub strict: bool,

    /// Maximum nesting of function calls before
    /// [`FatalError::RecursionLimit`] is raised.
    pub max_call_depth: usize,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        InferenceOptions {
            data_propagation: true,
            strict: false,
            max_call_depth: 16,
        }
    }
}

/// What inference established about one value in a scope.
#[derive(Clone, Debug)]
pub(crate) struct ValueState {
    pub type_info: TypeInfo,
    pub value: Option<Constant>,
}

/// Mapping from value name to inference state.
///
/// A scope is created fresh per graph and per function call frame; sibling
/// calls to the same function never share one.
pub(crate) type Scope = FxHashMap<String, ValueState>;

pub(crate) type Annotations<'a> = FxHashMap<&'a str, &'a TypeInfo>;

/// Result of inferring types for a graph.
#[derive(Clone, Debug)]
pub struct InferenceOutput {
    /// Type of every named value in the graph, including inputs and
    /// constants.
    pub values: FxHashMap<String, TypeInfo>,

    /// Types of the declared graph outputs, in declaration order.
    pub outputs: Vec<(String, TypeInfo)>,

    /// Problems found during the pass. If any has [`Severity::Error`], the
    /// result is a best-effort partial annotation.
    pub diagnostics: Vec<Diagnostic>,
}

impl InferenceOutput {
    /// Return true if the pass produced no error diagnostics.
    pub fn ok(&self) -> bool {
        self.diagnostics
            .iter()
            .all(|d| d.severity != Severity::Error)
    }

    /// Return the inferred type of a value.
    pub fn get(&self, name: &str) -> Option<&TypeInfo> {
        self.values.get(name)
    }
}

/// Static type and shape inference over a model.
///
/// The engine has no mutable state of its own: all mutation happens in
/// per-call scopes, so one engine can be shared freely across threads and
/// graphs.
pub struct InferenceEngine<'a> {
    registry: &'a OpRegistry,
    options: InferenceOptions,
    validator: Option<&'a dyn NodeValidator>,
}

impl<'a> InferenceEngine<'a> {
    pub fn new(registry: &'a OpRegistry) -> InferenceEngine<'a> {
        Self::with_options(registry, InferenceOptions::default())
    }

    pub fn with_options(registry: &'a OpRegistry, options: InferenceOptions) -> InferenceEngine<'a> {
        InferenceEngine {
            registry,
            options,
            validator: None,
        }
    }

    /// Set a structural-validity collaborator consulted before each node.
    pub fn set_validator(&mut self, validator: &'a dyn NodeValidator) {
        self.validator = Some(validator);
    }

    pub(crate) fn options(&self) -> &InferenceOptions {
        &self.options
    }

    /// Infer types for every value in the model's graph, using the graph's
    /// declared input types.
    pub fn infer(&self, model: &Model) -> Result<InferenceOutput, FatalError> {
        self.infer_with_inputs(model, &[])
    }

    /// Infer types for every value in the model's graph.
    ///
    /// `input_types` overrides the declared type of graph inputs by name;
    /// inputs without an override use their declaration.
    pub fn infer_with_inputs(
        &self,
        model: &Model,
        input_types: &[(&str, TypeInfo)],
    ) -> Result<InferenceOutput, FatalError> {
        let graph = &model.graph;
        let mut scope = Scope::default();
        let mut diagnostics = Vec::new();

        let init_data: FxHashMap<&str, &crate::value::TensorData> = graph
            .initializers
            .iter()
            .map(|init| (init.name.as_str(), &init.data))
            .collect();

        // Seed the scope with graph inputs, then with standalone
        // initializers. An input which is also an initializer gets its
        // value from the constant data.
        for input in &graph.inputs {
            let type_info = input_types
                .iter()
                .find(|(name, _)| *name == input.name)
                .map(|(_, type_info)| type_info.clone())
                .unwrap_or_else(|| input.type_info.clone());
            let value = init_data
                .get(input.name.as_str())
                .and_then(|data| data.to_constant());
            define(&mut scope, &input.name, type_info, value, "graph inputs")?;
        }
        for init in &graph.initializers {
            if scope.contains_key(&init.name) {
                continue;
            }
            define(
                &mut scope,
                &init.name,
                init.data.type_info(),
                init.data.to_constant(),
                "graph initializers",
            )?;
        }

        let mut annotations = Annotations::default();
        for value_info in graph.value_infos.iter().chain(&graph.outputs) {
            annotations.insert(value_info.name.as_str(), &value_info.type_info);
        }

        self.infer_nodes(
            model,
            &graph.nodes,
            &model.opset_imports,
            &annotations,
            &mut scope,
            &mut diagnostics,
            0,
        )?;

        let mut outputs = Vec::with_capacity(graph.outputs.len());
        for output in &graph.outputs {
            match scope.get(&output.name) {
                Some(state) => outputs.push((output.name.clone(), state.type_info.clone())),
                None => {
                    self.report(
                        &mut diagnostics,
                        Diagnostic {
                            node: None,
                            severity: Severity::Error,
                            message: format!(
                                "graph output \"{}\" is not produced by any node",
                                output.name
                            ),
                        },
                    )?;
                    outputs.push((output.name.clone(), output.type_info.clone()));
                }
            }
        }

        let values = scope
            .into_iter()
            .map(|(name, state)| (name, state.type_info))
            .collect();

        Ok(InferenceOutput {
            values,
            outputs,
            diagnostics,
        })
    }

    /// Walk `nodes` in order, inferring each node's outputs into `scope`.
    ///
    /// This is shared between the top-level graph and function bodies;
    /// `depth` counts the function call nesting.
    pub(crate) fn infer_nodes(
        &self,
        model: &Model,
        nodes: &[Node],
        opsets: &OpsetImports,
        annotations: &Annotations,
        scope: &mut Scope,
        diagnostics: &mut Vec<Diagnostic>,
        depth: usize,
    ) -> Result<(), FatalError> {
        for (index, node) in nodes.iter().enumerate() {
            let node_ref = NodeRef {
                index,
                name: node.display_name().to_string(),
            };

            if let Some(validator) = self.validator {
                if let Err(message) = validator.validate(node) {
                    self.report(diagnostics, Diagnostic::error(node_ref.clone(), message))?;
                    self.define_outputs(scope, node, &node_ref, annotations, Vec::new(), Vec::new(), diagnostics)?;
                    continue;
                }
            }

            // Build the per-input view of the scope. A missing name is a
            // use-before-def, which makes the rest of the pass unsound.
            let mut inputs = Vec::with_capacity(node.inputs.len());
            for input_name in &node.inputs {
                if input_name.is_empty() {
                    inputs.push(None);
                } else if let Some(state) = scope.get(input_name) {
                    inputs.push(Some(InputInfo {
                        type_info: &state.type_info,
                        value: state.value.as_ref(),
                    }));
                } else {
                    return Err(FatalError::Order {
                        value: input_name.clone(),
                        node: node_ref.name.clone(),
                    });
                }
            }

            let version = opsets.version(&node.domain).unwrap_or(i64::MAX);
            let rule = self.registry.lookup(&node.domain, &node.op_type, version);

            let (types, values) = if let Some(rule) = rule {
                let ctx = InferenceContext::new(node, inputs);
                match rule.infer(&ctx) {
                    Ok(types) => {
                        let value = if self.options.data_propagation && node.outputs.len() == 1 {
                            propagate::try_evaluate(&ctx).filter(|value| {
                                propagate::value_matches_type(
                                    value,
                                    types.first().and_then(TypeInfo::shape),
                                )
                            })
                        } else {
                            None
                        };
                        (types, vec![value])
                    }
                    Err(err) => {
                        self.report(diagnostics, Diagnostic::error(node_ref.clone(), err.to_string()))?;
                        (Vec::new(), Vec::new())
                    }
                }
            } else if model
                .functions_named(&node.domain, &node.op_type)
                .next()
                .is_some()
            {
                let ctx = InferenceContext::new(node, inputs);
                match functions::infer_call(self, model, &ctx, opsets, &node_ref, diagnostics, depth)
                {
                    Ok(call) => (call.types, call.values),
                    Err(CallError::Fatal(err)) => return Err(err),
                    Err(CallError::Node(err)) => {
                        self.report(diagnostics, Diagnostic::error(node_ref.clone(), err.to_string()))?;
                        (Vec::new(), Vec::new())
                    }
                }
            } else {
                let op = if node.domain.is_empty() {
                    node.op_type.clone()
                } else {
                    format!("{}.{}", node.domain, node.op_type)
                };
                self.report(
                    diagnostics,
                    Diagnostic::warning(
                        node_ref.clone(),
                        format!("no inference rule registered for operator \"{}\"", op),
                    ),
                )?;
                (Vec::new(), Vec::new())
            };

            self.define_outputs(scope, node, &node_ref, annotations, types, values, diagnostics)?;
        }
        Ok(())
    }

    /// Merge a node's proposed output types into the scope, checking them
    /// against declared annotations.
    fn define_outputs(
        &self,
        scope: &mut Scope,
        node: &Node,
        node_ref: &NodeRef,
        annotations: &Annotations,
        types: Vec<TypeInfo>,
        values: Vec<Option<Constant>>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<(), FatalError> {
        for (i, output_name) in node.outputs.iter().enumerate() {
            if output_name.is_empty() {
                continue;
            }
            let proposed = types.get(i).cloned().unwrap_or(TypeInfo::Unknown);
            let type_info = match annotations.get(output_name.as_str()) {
                Some(declared) => match declared.merge(&proposed) {
                    Ok(merged) => merged,
                    Err(conflict) => {
                        self.report(
                            diagnostics,
                            Diagnostic::error(
                                node_ref.clone(),
                                format!(
                                    "inferred type for \"{}\" conflicts with its declared type: {}",
                                    output_name, conflict
                                ),
                            ),
                        )?;
                        // The declared annotation is the contract callers
                        // see, so it wins.
                        (*declared).clone()
                    }
                },
                None => proposed,
            };
            let value = values.get(i).cloned().flatten();
            define(scope, output_name, type_info, value, &node_ref.name)?;
        }
        Ok(())
    }

    /// Record a diagnostic, or convert it into a fatal error in strict
    /// mode.
    pub(crate) fn report(
        &self,
        diagnostics: &mut Vec<Diagnostic>,
        diagnostic: Diagnostic,
    ) -> Result<(), FatalError> {
        if self.options.strict {
            return Err(FatalError::Strict(diagnostic));
        }
        diagnostics.push(diagnostic);
        Ok(())
    }
}

/// Add a value to a scope, enforcing single definition.
pub(crate) fn define(
    scope: &mut Scope,
    name: &str,
    type_info: TypeInfo,
    value: Option<Constant>,
    node: &str,
) -> Result<(), FatalError> {
    if scope.contains_key(name) {
        return Err(FatalError::DuplicateDefinition {
            value: name.to_string(),
            node: node.to_string(),
        });
    }
    scope.insert(name.to_string(), ValueState { type_info, value });
    Ok(())
}
