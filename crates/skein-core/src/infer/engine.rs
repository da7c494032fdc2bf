//! Inference driver
//!
//! Builds every module context, then alternates two phases until nothing
//! changes:
//! 1. propagate: drain the worklist (operators are evaluated eagerly)
//! 2. resolve: walk the structural constraints in creation order and add
//!    the edges, variants and seeds the current type sets call for
//!
//! Calls whose signature still contains an empty argument are routed only
//! when a resolve pass finds nothing else to do. Both rules make the result
//! independent of worklist order.

use super::builder::ConstraintBuilder;
use super::constraint::{Callee, ConstraintTable, TransferKind};
use super::context::{ContextId, ContextOwner, ContextState, ContextTable};
use super::lattice::{self, BinaryOutcome};
use super::merge::{MergedTypeMap, TypeMerger};
use super::node::{NodeId, NodeKey, NodeRegistry};
use super::propagate::Propagator;
use super::variants::VariantGenerator;
use crate::config::InferenceConfig;
use crate::diagnostics::{DiagnosticKind, DiagnosticSink};
use crate::error::{Result, SkeinError};
use crate::hir::{BinOp, ExprId};
use crate::program::{ClassId, FuncId, ModuleId, Program};
use crate::typestr::shallow_name;
use crate::types::{Slot, TypeId, TypeKind, TypeSet};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Mutable state of one analysis run, passed explicitly to every phase.
pub(crate) struct Analysis<'p> {
    pub(crate) program: &'p Program,
    pub(crate) nodes: NodeRegistry,
    pub(crate) contexts: ContextTable,
    pub(crate) constraints: ConstraintTable,
    pub(crate) worklist: Propagator,
    pub(crate) variants: VariantGenerator,
    pub(crate) diagnostics: DiagnosticSink,
    /// Tuple identities whose positions are tracked slot by slot.
    pub(crate) positional: HashSet<TypeId>,
    pub(crate) class_by_def: HashMap<ExprId, ClassId>,
    /// Helper constraints already derived by builtin effects, keyed by
    /// (source, destination).
    pub(crate) derived: HashSet<(NodeId, NodeId)>,
}

impl<'p> Analysis<'p> {
    pub(crate) fn new(program: &'p Program, config: &InferenceConfig) -> Self {
        let class_by_def = program.classes.iter().map(|c| (c.def.id, c.id)).collect();
        Self {
            program,
            nodes: NodeRegistry::new(),
            contexts: ContextTable::new(),
            constraints: ConstraintTable::default(),
            worklist: Propagator::new(config.worklist_order, program.universe.len()),
            variants: VariantGenerator::new(config.max_variants),
            diagnostics: DiagnosticSink::new(),
            positional: HashSet::new(),
            class_by_def,
            derived: HashSet::new(),
        }
    }

    pub(crate) fn warn(&mut self, module: ModuleId, line: usize, kind: DiagnosticKind, message: impl Into<String>) {
        let m = self.program.module(module);
        self.diagnostics.warn(&m.name, &m.path, line, kind, message);
    }

    /// Build a pending context in place.
    pub(crate) fn build_context(&mut self, ctx: ContextId) -> Result<()> {
        self.contexts.set_state(ctx, ContextState::Building);
        let owner = self.contexts.get(ctx).owner;
        debug!("building context {} for {:?}", ctx, owner);
        let mut builder = ConstraintBuilder::new(self, ctx);
        match owner {
            ContextOwner::Module(m) => builder.build_module(m)?,
            ContextOwner::Class(c) => builder.build_class(c)?,
            ContextOwner::Function(f) => builder.build_function(f)?,
        }
        self.contexts.set_state(ctx, ContextState::Propagating);
        Ok(())
    }

    /// Record the quiescence point: every context is stable and every node
    /// remembers its size so later shrinking is caught.
    pub(crate) fn settle(&mut self) -> Result<()> {
        for idx in 0..self.nodes.len() {
            let node = self.nodes.node_mut(NodeId(idx as u32));
            if node.types.len() < node.stable_len {
                return Err(SkeinError::InternalInvariant(format!(
                    "type set of node {:?} shrank from {} to {}",
                    node.key,
                    node.stable_len,
                    node.types.len()
                )));
            }
            node.stable_len = node.types.len();
        }
        self.contexts.mark_all_stable();
        Ok(())
    }

    pub(crate) fn progress_marker(&self) -> (usize, usize, usize) {
        (self.contexts.len(), self.nodes.len(), self.nodes.edge_count())
    }

    /// Types that iterating a value of type `ty` yields: a unit node for
    /// containers, a direct type for strings.
    pub(crate) fn element_source(&mut self, ty: TypeId) -> Option<Element> {
        match self.program.universe.kind(ty) {
            TypeKind::Container { .. } => Some(Element::Node(self.unit(ty, Slot::Elem))),
            TypeKind::Builtin(crate::types::BuiltinType::Str) => Some(Element::Type(ty)),
            _ => None,
        }
    }

    pub(crate) fn unit(&mut self, ty: TypeId, slot: Slot) -> NodeId {
        self.nodes.register(NodeKey::Unit(ty, slot), None, 0).0
    }
}

/// What an iteration produces.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Element {
    Node(NodeId),
    Type(TypeId),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InferenceStats {
    pub rounds: usize,
    pub contexts: usize,
    pub nodes: usize,
    pub edges: usize,
    pub propagation_steps: usize,
    pub interrupted: bool,
}

/// Everything the engine produces. The graph is at a fixpoint (or at the
/// quiescence point where an interrupt stopped it) and never changes
/// again.
#[derive(Debug)]
pub struct InferenceResult {
    pub nodes: NodeRegistry,
    pub contexts: ContextTable,
    pub constraints: ConstraintTable,
    pub diagnostics: DiagnosticSink,
    pub stats: InferenceStats,
    /// Inheritance-aware merge of the whole program.
    pub merged: MergedTypeMap,
}

impl InferenceResult {
    pub fn merge(&self, program: &Program, inheritance: bool) -> Result<MergedTypeMap> {
        TypeMerger::new(program, &self.nodes, &self.contexts).merge(inheritance)
    }

    /// Every context of `func`, fallback last.
    pub fn variants(&self, func: FuncId) -> Vec<ContextId> {
        self.contexts.all_variants(func)
    }

    pub fn node_types(&self, key: NodeKey) -> TypeSet {
        self.nodes
            .lookup(&key)
            .map(|n| self.nodes.types(n).clone())
            .unwrap_or_default()
    }

    /// Types of parameter `index` of `func` inside variant `ctx`.
    pub fn param_types(&self, program: &Program, func: FuncId, ctx: ContextId, index: usize) -> TypeSet {
        program
            .function(func)
            .formal_var(index)
            .map(|v| self.node_types(NodeKey::Var(v, ctx)))
            .unwrap_or_default()
    }

    pub fn return_types(&self, ctx: ContextId) -> TypeSet {
        self.node_types(NodeKey::Return(ctx))
    }

    /// Variants a call expression was routed to, over all contexts.
    pub fn call_targets(&self, call: ExprId) -> Vec<ContextId> {
        let mut targets: Vec<ContextId> = self
            .constraints
            .calls()
            .filter(|(_, c)| c.expr == call)
            .flat_map(|(_, c)| c.state.variants())
            .collect();
        targets.sort();
        targets.dedup();
        targets
    }
}

pub struct InferenceEngine;

impl InferenceEngine {
    /// Run whole-program inference to a fixpoint.
    pub fn analyze(program: &Program, config: &InferenceConfig) -> Result<InferenceResult> {
        if !program.universe.is_frozen() {
            return Err(SkeinError::InternalInvariant(
                "type universe must be frozen before propagation".into(),
            ));
        }
        let started = Instant::now();
        let mut an = Analysis::new(program, config);

        for module in &program.modules {
            let (ctx, _) = an.contexts.module_context(module.id);
            an.build_context(ctx)?;
        }
        info!("built {} module contexts", program.modules.len());

        let mut rounds = 0usize;
        let mut interrupted = None;
        loop {
            an.propagate()?;
            an.settle()?;

            if let Some(limit) = config.round_limit {
                if rounds >= limit {
                    interrupted = Some(format!("round limit of {limit} reached"));
                    break;
                }
            }
            if let Some(deadline) = config.deadline {
                if started.elapsed() >= deadline {
                    interrupted = Some(format!("deadline of {:?} reached", deadline));
                    break;
                }
            }
            rounds += 1;

            let before = an.progress_marker();
            an.resolve_structural(false)?;
            if an.worklist.is_empty() && an.progress_marker() == before {
                an.resolve_structural(true)?;
                if an.worklist.is_empty() && an.progress_marker() == before {
                    break;
                }
            }
        }

        if let Some(reason) = &interrupted {
            warn!("analysis interrupted: {}", reason);
            let main = program.main.unwrap_or(ModuleId(0));
            let m = program.module(main);
            an.diagnostics
                .note(&m.name, &m.path, 0, DiagnosticKind::Interrupted, format!("{reason}; results are partial"));
        }
        an.report();

        let merged = TypeMerger::new(program, &an.nodes, &an.contexts).merge(true)?;
        let stats = InferenceStats {
            rounds,
            contexts: an.contexts.len(),
            nodes: an.nodes.len(),
            edges: an.nodes.edge_count(),
            propagation_steps: an.worklist.steps(),
            interrupted: interrupted.is_some(),
        };
        info!(
            "inference finished: {} rounds, {} contexts, {} nodes, {} edges in {:.2?}",
            stats.rounds,
            stats.contexts,
            stats.nodes,
            stats.edges,
            started.elapsed()
        );
        Ok(InferenceResult {
            nodes: an.nodes,
            contexts: an.contexts,
            constraints: an.constraints,
            diagnostics: an.diagnostics,
            stats,
            merged,
        })
    }
}

impl<'p> Analysis<'p> {
    /// Warnings that can only be judged on the final graph.
    fn report(&mut self) {
        self.report_calls();
        self.report_parameters();
        self.report_operators();
    }

    fn report_calls(&mut self) {
        let mut pending = Vec::new();
        for (s, call) in self.constraints.calls() {
            if let Some(reason) = &call.mismatch {
                pending.push((s.module, s.line, DiagnosticKind::ArgumentMismatch, reason.clone()));
                continue;
            }
            if call.state.is_resolved() {
                continue;
            }
            let message = match &call.callee {
                Callee::Method { receiver, name } if self.nodes.types(*receiver).is_empty() => {
                    format!("cannot resolve method call '.{name}()': receiver has no inferred type")
                }
                Callee::Method { .. } if !call.missing_method.is_empty() => continue,
                _ => format!("cannot resolve call to '{}'", call.name),
            };
            pending.push((s.module, s.line, DiagnosticKind::UnresolvedCall, message));
        }
        for (module, line, kind, message) in pending {
            self.warn(module, line, kind, message);
        }
    }

    /// A parameter is reported once, when no context of its function gave
    /// it a type.
    fn report_parameters(&mut self) {
        let program = self.program;
        let mut typed: HashSet<(FuncId, usize)> = HashSet::new();
        let mut seen: Vec<(FuncId, usize)> = Vec::new();
        for ctx in self.contexts.iter() {
            let ContextOwner::Function(func) = ctx.owner else {
                continue;
            };
            let f = program.function(func);
            for index in usize::from(f.is_method())..f.formals.len() {
                let Some(var) = f.formal_var(index) else {
                    continue;
                };
                if !seen.contains(&(func, index)) {
                    seen.push((func, index));
                }
                let has_types = self
                    .nodes
                    .lookup(&NodeKey::Var(var, ctx.id))
                    .is_some_and(|n| !self.nodes.types(n).is_empty());
                if has_types {
                    typed.insert((func, index));
                }
            }
        }
        for (func, index) in seen {
            if typed.contains(&(func, index)) {
                continue;
            }
            let f = program.function(func);
            let message = format!(
                "parameter '{}' of '{}' has no inferred type",
                f.formals[index],
                program.function_name(func)
            );
            self.warn(f.module, f.def.line, DiagnosticKind::UnresolvedParameterType, message);
        }
    }

    fn report_operators(&mut self) {
        let program = self.program;
        let universe = &program.universe;
        let mut pending = Vec::new();
        for transfer in &self.constraints.transfers {
            match &transfer.kind {
                TransferKind::Binary { op, left, right, .. } => {
                    let (ls, rs) = (self.nodes.types(*left), self.nodes.types(*right));
                    if ls.is_empty() || rs.is_empty() {
                        continue;
                    }
                    if self.nodes.types(transfer.out).is_empty() {
                        pending.push((
                            transfer.module,
                            transfer.line,
                            DiagnosticKind::UnsupportedOperands,
                            format!(
                                "unsupported operand types for {}: {} and {}",
                                op.symbol(),
                                names(program, ls),
                                names(program, rs)
                            ),
                        ));
                    }
                    if *op != BinOp::Add {
                        continue;
                    }
                    for l in ls.iter() {
                        for r in rs.iter() {
                            if !matches!(lattice::binary(universe, *op, l, r), BinaryOutcome::Concat(_)) {
                                continue;
                            }
                            let le = self.existing_unit_types(l, Slot::Elem);
                            let re = self.existing_unit_types(r, Slot::Elem);
                            if !lattice::elements_compatible(universe, &le, &re) {
                                pending.push((
                                    transfer.module,
                                    transfer.line,
                                    DiagnosticKind::AmbiguousConcatenation,
                                    format!(
                                        "concatenating sequences of {} and {}",
                                        names(program, &le),
                                        names(program, &re)
                                    ),
                                ));
                            }
                        }
                    }
                }
                TransferKind::Unary { op, operand } => {
                    let operand_types = self.nodes.types(*operand);
                    if !operand_types.is_empty() && self.nodes.types(transfer.out).is_empty() {
                        pending.push((
                            transfer.module,
                            transfer.line,
                            DiagnosticKind::UnsupportedOperands,
                            format!("unsupported operand type for unary {:?}: {}", op, names(program, operand_types)),
                        ));
                    }
                }
            }
        }
        for (module, line, kind, message) in pending {
            self.warn(module, line, kind, message);
        }
    }

    fn existing_unit_types(&self, ty: TypeId, slot: Slot) -> TypeSet {
        self.nodes
            .lookup(&NodeKey::Unit(ty, slot))
            .map(|n| self.nodes.types(n).clone())
            .unwrap_or_default()
    }
}

fn names(program: &Program, types: &TypeSet) -> String {
    let parts: Vec<String> = types.iter().map(|t| shallow_name(program, t)).collect();
    parts.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerOptions;
    use crate::loader::Loader;
    use crate::program::VarId;
    use std::time::Duration;

    #[test]
    fn test_settle_detects_shrinking_type_sets() {
        let program = Program::default();
        let mut an = Analysis::new(&program, &InferenceConfig::default());
        let (ctx, _) = an.contexts.module_context(ModuleId(0));
        let (node, _) = an.nodes.register(NodeKey::Var(VarId(0), ctx), None, 1);
        an.nodes.node_mut(node).types.insert(TypeId(1));
        an.nodes.node_mut(node).types.insert(TypeId(2));

        an.settle().unwrap();
        assert_eq!(an.nodes.node(node).stable_len, 2);
        assert_eq!(an.contexts.get(ctx).state, ContextState::Stable);

        an.nodes.node_mut(node).types = TypeSet::single(TypeId(1));
        let err = an.settle().unwrap_err();
        assert!(matches!(err, SkeinError::InternalInvariant(ref m) if m.contains("shrank from 2 to 1")));
        assert!(err.is_defect());
    }

    #[test]
    fn test_deadline_interrupts_with_partial_results() {
        let loaded = Loader::new(&CompilerOptions::default())
            .load_source("demo", "def f(v):\n    return v\n\nx = f(1)\n")
            .unwrap();
        let config = InferenceConfig::default().with_deadline(Duration::ZERO);
        let result = InferenceEngine::analyze(&loaded.program, &config).unwrap();

        assert!(result.stats.interrupted);
        assert_eq!(result.stats.rounds, 0);
        let notes = result.diagnostics.of_kind(DiagnosticKind::Interrupted);
        assert_eq!(notes.len(), 1);
        assert!(notes[0].message.contains("deadline"));
        // the call was never resolved, so no variant exists yet
        let f = loaded.program.functions.iter().find(|f| f.name == "f").unwrap();
        assert!(result.variants(f.id).is_empty());
    }

    #[test]
    fn test_without_limits_the_run_completes() {
        let loaded = Loader::new(&CompilerOptions::default())
            .load_source("demo", "def f(v):\n    return v\n\nx = f(1)\n")
            .unwrap();
        let config = InferenceConfig::default().with_deadline(Duration::from_secs(600));
        let result = InferenceEngine::analyze(&loaded.program, &config).unwrap();
        assert!(!result.stats.interrupted);
        assert!(result.diagnostics.of_kind(DiagnosticKind::Interrupted).is_empty());
    }
}
