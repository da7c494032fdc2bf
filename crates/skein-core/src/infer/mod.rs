//! Whole-program type inference
//!
//! This module implements the constraint-graph engine:
//! - Node registry keyed by (expression, context), variables, returns and
//!   container slots
//! - Constraint builder lowering each context's body into edges, seeds,
//!   operator transfers and structural constraints
//! - Variant generation with the cartesian product algorithm and a per
//!   function variant cap
//! - Worklist-based fixpoint propagator, monotone and bounded
//! - Type merger producing one type set per program entity

mod builder;
pub mod builtins;
pub mod constraint;
pub mod context;
mod engine;
pub mod lattice;
mod merge;
pub mod node;
mod propagate;
mod resolve;
mod variants;

pub use constraint::{CallState, CallTarget, Callee, ConstraintTable};
pub use context::{Component, Context, ContextId, ContextOwner, ContextState, ContextTable, Signature};
pub use engine::{InferenceEngine, InferenceResult, InferenceStats};
pub use merge::{MergeKey, MergedTypeMap, TypeMerger};
pub use node::{AnalysisNode, EdgeFilter, NodeId, NodeKey, NodeRegistry};
pub use variants::{Route, VariantGenerator};
