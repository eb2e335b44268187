//! Resolution and inference of user-defined function calls.
//!
//! A call node is inferred by binding the call-site argument types to the
//! function's formal inputs in a fresh scope, running the driver over the
//! function body, and mapping the body's outputs back to the call node's
//! output slots. Every call site gets its own scope and its own pass over
//! the body, so two calls with different argument shapes yield
//! independently specialized results.

use crate::graph::{Function, Model, OpsetImports};
use crate::infer::{
    Annotations, Diagnostic, FatalError, InferenceEngine, NodeRef, Scope, ValueState,
};
use crate::registry::{InferenceContext, InferenceError};
use crate::value::{Constant, TypeInfo};

/// Outcome of inferring a call node.
pub(crate) struct CallResult {
    /// One type per function output, positionally mapped to the call
    /// node's output slots.
    pub types: Vec<TypeInfo>,

    /// Known values propagated out of the function body.
    pub values: Vec<Option<Constant>>,
}

/// Failure to infer a call node.
pub(crate) enum CallError {
    /// Node-local failure: the call node gets an error diagnostic and
    /// unknown outputs, and the pass continues.
    Node(InferenceError),

    /// The whole pass is aborted.
    Fatal(FatalError),
}

impl From<FatalError> for CallError {
    fn from(err: FatalError) -> CallError {
        CallError::Fatal(err)
    }
}

/// Resolve the function a call node refers to.
///
/// The match is by domain and name, picking the definition with the
/// highest `since_version` at or below the version of the domain imported
/// by the caller. No import of the domain, or no version-compatible
/// definition, is fatal: the node cannot be interpreted any other way.
pub(crate) fn resolve<'m>(
    model: &'m Model,
    domain: &'m str,
    name: &'m str,
    opsets: &OpsetImports,
) -> Result<&'m Function, FatalError> {
    let unresolved = || FatalError::UnresolvedFunction {
        domain: domain.to_string(),
        name: name.to_string(),
    };
    let version = opsets.version(domain).ok_or_else(unresolved)?;
    model
        .functions_named(domain, name)
        .filter(|function| function.since_version <= version)
        .max_by_key(|function| function.since_version)
        .ok_or_else(unresolved)
}

/// Infer the outputs of a call node.
pub(crate) fn infer_call(
    engine: &InferenceEngine,
    model: &Model,
    ctx: &InferenceContext,
    opsets: &OpsetImports,
    node_ref: &NodeRef,
    diagnostics: &mut Vec<Diagnostic>,
    depth: usize,
) -> Result<CallResult, CallError> {
    let node = ctx.node();
    let function = resolve(model, &node.domain, &node.op_type, opsets)?;

    let limit = engine.options().max_call_depth;
    if depth >= limit {
        return Err(CallError::Fatal(FatalError::RecursionLimit { limit }));
    }

    if ctx.num_inputs() > function.inputs.len() {
        return Err(CallError::Node(InferenceError::Arity {
            expected: "the function's declared inputs",
            actual: ctx.num_inputs(),
        }));
    }

    // Bind arguments positionally into a scope owned by this call frame.
    // Trailing arguments which were omitted bind as unknown.
    let mut scope = Scope::default();
    for (i, formal) in function.inputs.iter().enumerate() {
        let state = match ctx.input(i) {
            Some(arg) => ValueState {
                type_info: arg.type_info.clone(),
                value: arg.value.cloned(),
            },
            None => ValueState {
                type_info: TypeInfo::Unknown,
                value: None,
            },
        };
        if scope.contains_key(formal.as_str()) {
            return Err(CallError::Fatal(FatalError::DuplicateDefinition {
                value: formal.clone(),
                node: node_ref.name.clone(),
            }));
        }
        scope.insert(formal.clone(), state);
    }

    // Function bodies carry no declared value annotations; every type
    // comes from this pass.
    let annotations = Annotations::default();
    let mut body_diagnostics = Vec::new();
    engine.infer_nodes(
        model,
        &function.nodes,
        &function.opset_imports,
        &annotations,
        &mut scope,
        &mut body_diagnostics,
        depth + 1,
    )?;

    // Problems inside the body are reported against the call node.
    for diagnostic in body_diagnostics {
        engine.report(
            diagnostics,
            Diagnostic {
                node: Some(node_ref.clone()),
                severity: diagnostic.severity,
                message: format!(
                    "in function \"{}.{}\": {}",
                    function.domain, function.name, diagnostic.message
                ),
            },
        )?;
    }

    let mut types = Vec::with_capacity(function.outputs.len());
    let mut values = Vec::with_capacity(function.outputs.len());
    for output in &function.outputs {
        let Some(state) = scope.get(output.as_str()) else {
            return Err(CallError::Node(InferenceError::InvalidValue(
                "function body does not produce a declared output",
            )));
        };
        types.push(state.type_info.clone());
        values.push(state.value.clone());
    }

    Ok(CallResult { types, values })
}
