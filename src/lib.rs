//! Static shape and type inference for tensor computation graphs.
//!
//! # About shape inference
//!
//! Models are directed acyclic graphs of operator nodes whose values may
//! have dynamic sizes that depend on model inputs. In a typical language
//! model for example, the input has dynamic dimensions for the batch size
//! and sequence length.
//!
//! The goal of shape inference is to take the information embedded in the
//! model about the shapes and types of its inputs, trace how operators
//! transform, extract and otherwise process tensor shapes, and produce
//! metadata about the type and shape of every value in the graph, without
//! executing the model.
//!
//! Dimensions can be fixed integers, named symbols (`"batch"`) or unknown.
//! For a subset of operators inference also tracks the *values* of
//! shape-carrying tensors, so that graphs which extract and transform
//! shapes still resolve to concrete dimensions. For example:
//!
//! ```text
//! S = Shape(Y)               // values [1, 4, 2]
//! Z = Expand(X, S)           // shape (3, 4, 2) for X of shape (3, 1, 2)
//! ```
//!
//! Here the shape of `Z` depends on the runtime value of `S`, but because
//! `S` is computed only from shapes declared in the model, data propagation
//! can supply it during analysis.
//!
//! # Crate overview
//!
//! An [`InferenceEngine`] walks a [`Model`](graph::Model) in def-before-use
//! order. For each node it looks up an [`InferenceRule`] in an
//! [`OpRegistry`] keyed by operator domain, name and version, applies it,
//! and merges the result into a per-graph scope. Calls to user-defined
//! functions are inferred per call site with an isolated scope, so calls
//! with different argument shapes yield independently specialized results.
//!
//! Inference is best-effort: node-local failures become [`Diagnostic`]s and
//! downstream nodes still run with unknown inputs. Only malformed-graph
//! conditions (use before definition, unresolvable function calls, runaway
//! recursion) abort the pass with a [`FatalError`].
//!
//! ```
//! use shapetrace::graph::{Graph, Model, Node};
//! use shapetrace::{DataType, InferenceEngine, OpRegistry, Shape, TypeInfo};
//!
//! let graph = Graph::new()
//!     .with_input("x", TypeInfo::tensor(DataType::Int32, Shape::fixed(&[3, 1, 2])))
//!     .with_input("y", TypeInfo::tensor(DataType::Int32, Shape::fixed(&[1, 4, 2])))
//!     .with_node(Node::new("Shape", &["y"], &["shape"]))
//!     .with_node(Node::new("Expand", &["x", "shape"], &["z"]));
//! let model = Model::new(graph).with_opset("", 18);
//!
//! let registry = OpRegistry::with_builtin_ops();
//! let output = InferenceEngine::new(&registry).infer(&model).unwrap();
//! assert_eq!(
//!     output.get("z"),
//!     Some(&TypeInfo::tensor(DataType::Int32, Shape::fixed(&[3, 4, 2])))
//! );
//! ```

mod dim;
mod functions;
mod infer;
pub mod graph;
pub mod ops;
mod propagate;
mod registry;
mod value;

pub use dim::{ConflictError, Dimension, Shape};
pub use infer::{
    Diagnostic, FatalError, InferenceEngine, InferenceOptions, InferenceOutput, NodeRef,
    NodeValidator, Severity,
};
pub use propagate::try_evaluate;
pub use registry::{
    InferenceContext, InferenceError, InferenceRule, InputInfo, OpRegistry, SharedRule,
};
pub use value::{Constant, DataType, TensorData, TypeInfo};
