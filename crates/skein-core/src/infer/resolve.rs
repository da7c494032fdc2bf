//! Structural constraint resolution
//!
//! Runs at quiescence points only. Each constraint is revisited when one
//! of its inputs grew since the last visit, and every rule only ever adds
//! edges, seeds or variants, so revisiting is idempotent.

use super::builtins::{Effect, Source};
use super::context::ContextId;
use super::constraint::{CallSite, Structural, StructuralKind, Transfer, TransferKind};
use super::engine::{Analysis, Element};
use super::node::{EdgeFilter, NodeId, NodeKey};
use crate::diagnostics::DiagnosticKind;
use crate::error::{Result, SkeinError};
use crate::hir::UnaryOp;
use crate::program::{ClassId, ModuleId, Scope, VarId};
use crate::types::{BuiltinType, ContainerKind, Slot, TypeId, TypeKind, TypeSet};
use tracing::trace;

/// Where an effect's types come from once resolved against the call.
enum Flow {
    Node(NodeId),
    Types(TypeSet),
}

impl<'p> Analysis<'p> {
    /// One pass over the structural constraints in creation order,
    /// including the ones appended while the pass runs.
    ///
    /// With `deferred` set, calls holding back empty-argument signatures
    /// are released one at a time: the pass stops after the first release
    /// that changes the graph, so its types propagate before the next
    /// waiting call is judged.
    pub(crate) fn resolve_structural(&mut self, deferred: bool) -> Result<()> {
        let mut idx = 0;
        while idx < self.constraints.structural.len() {
            let current = &self.constraints.structural[idx];
            let stamp: Vec<usize> = current.inputs().iter().map(|n| self.nodes.types(*n).len()).collect();
            let waiting = deferred && current.as_call().is_some_and(|c| c.deferred);
            if current.stamp.as_ref() == Some(&stamp) && !waiting {
                idx += 1;
                continue;
            }
            let before = self.progress_marker();
            let mut s = current.clone();
            s.stamp = Some(stamp);
            if let StructuralKind::Call(call) = &mut s.kind {
                call.deferred = false;
            }
            trace!("resolve {:?} at line {}", s.kind, s.line);
            self.resolve_one(&mut s, waiting)?;
            self.constraints.structural[idx] = s;
            idx += 1;
            if waiting && (!self.worklist.is_empty() || self.progress_marker() != before) {
                break;
            }
        }
        Ok(())
    }

    fn resolve_one(&mut self, s: &mut Structural, deferred: bool) -> Result<()> {
        if matches!(s.kind, StructuralKind::Call(_)) {
            return self.resolve_call(s, deferred);
        }
        let (module, line) = (s.module, s.line);
        match s.kind.clone() {
            StructuralKind::Call(_) => {}
            StructuralKind::GetAttr { receiver, attr, out } => {
                for ty in self.nodes.types(receiver).clone().iter() {
                    self.get_attr(module, line, ty, &attr, out)?;
                }
            }
            StructuralKind::SetAttr { receiver, attr, value } => {
                for ty in self.nodes.types(receiver).clone().iter() {
                    self.set_attr(module, line, ty, &attr, value)?;
                }
            }
            StructuralKind::Subscript {
                base,
                literal,
                slice,
                out,
                ..
            } => {
                for ty in self.nodes.types(base).clone().iter() {
                    self.subscript(ty, literal, slice, out);
                }
            }
            StructuralKind::StoreSubscript { base, index, value } => {
                for ty in self.nodes.types(base).clone().iter() {
                    match self.program.universe.as_container(ty) {
                        Some(ContainerKind::List) => {
                            let elem = self.unit(ty, Slot::Elem);
                            self.link(value, elem, EdgeFilter::All);
                        }
                        Some(ContainerKind::Dict) => {
                            let (keys, values) = (self.unit(ty, Slot::Elem), self.unit(ty, Slot::Value));
                            self.link(index, keys, EdgeFilter::All);
                            self.link(value, values, EdgeFilter::All);
                        }
                        _ => {}
                    }
                }
            }
            StructuralKind::Iterate { iterable, out } => {
                for ty in self.nodes.types(iterable).clone().iter() {
                    match self.element_source(ty) {
                        Some(Element::Node(n)) => self.link(n, out, EdgeFilter::All),
                        Some(Element::Type(t)) => {
                            self.add_type(out, t);
                        }
                        None => {}
                    }
                }
            }
            StructuralKind::Unpack { source, targets } => {
                for ty in self.nodes.types(source).clone().iter() {
                    self.unpack(ty, &targets);
                }
            }
        }
        Ok(())
    }

    /// Node of a class-scope variable inside its class context.
    fn class_var_node(&mut self, var: VarId) -> Result<NodeId> {
        let program = self.program;
        let v = program.variable(var);
        let Scope::Class(owner) = v.scope else {
            return Err(SkeinError::InternalInvariant(format!(
                "attribute '{}' is not a class-scope variable",
                v.name
            )));
        };
        let class_module = program.class(owner).module;
        let (ctx, created) = self.contexts.class_context(owner, class_module);
        if created {
            self.build_context(ctx)?;
        }
        Ok(self.nodes.register(NodeKey::Var(var, ctx), Some(class_module), v.line).0)
    }

    fn class_name(&self, class: ClassId) -> &str {
        &self.program.class(class).name
    }

    fn get_attr(&mut self, module: ModuleId, line: usize, ty: TypeId, attr: &str, out: NodeId) -> Result<()> {
        let program = self.program;
        match program.universe.kind(ty) {
            TypeKind::Class(class) => {
                if let Some(var) = program.lookup_var(class, attr) {
                    let node = self.class_var_node(var)?;
                    self.link(node, out, EdgeFilter::All);
                } else if program.lookup_method(class, attr).is_none() {
                    let name = self.class_name(class).to_string();
                    self.warn(
                        module,
                        line,
                        DiagnosticKind::UnresolvedAttribute,
                        format!("'{name}' object has no attribute '{attr}'"),
                    );
                }
            }
            TypeKind::Builtin(BuiltinType::None) => {}
            _ => {
                let owner = crate::typestr::shallow_name(program, ty);
                self.warn(
                    module,
                    line,
                    DiagnosticKind::UnresolvedAttribute,
                    format!("'{owner}' object has no attribute '{attr}'"),
                );
            }
        }
        Ok(())
    }

    fn set_attr(&mut self, module: ModuleId, line: usize, ty: TypeId, attr: &str, value: NodeId) -> Result<()> {
        let program = self.program;
        match program.universe.kind(ty) {
            TypeKind::Class(class) => match program.lookup_var(class, attr) {
                Some(var) => {
                    let node = self.class_var_node(var)?;
                    self.link(value, node, EdgeFilter::All);
                }
                None => {
                    let name = self.class_name(class).to_string();
                    self.warn(
                        module,
                        line,
                        DiagnosticKind::DynamicAttribute,
                        format!("attribute '{attr}' is not declared by class '{name}'"),
                    );
                }
            },
            TypeKind::Builtin(BuiltinType::None) => {}
            _ => {
                let owner = crate::typestr::shallow_name(program, ty);
                self.warn(
                    module,
                    line,
                    DiagnosticKind::DynamicAttribute,
                    format!("cannot set attribute '{attr}' on '{owner}'"),
                );
            }
        }
        Ok(())
    }

    fn subscript(&mut self, ty: TypeId, literal: Option<i64>, slice: bool, out: NodeId) {
        let kind = self.program.universe.kind(ty);
        if slice {
            let sliceable = matches!(
                kind,
                TypeKind::Builtin(BuiltinType::Str) | TypeKind::Container { kind: ContainerKind::List | ContainerKind::Tuple, .. }
            );
            if sliceable {
                self.add_type(out, ty);
            }
            return;
        }
        let source = match kind {
            TypeKind::Builtin(BuiltinType::Str) => {
                self.add_type(out, ty);
                return;
            }
            TypeKind::Container { kind: ContainerKind::List, .. } => self.unit(ty, Slot::Elem),
            TypeKind::Container { kind: ContainerKind::Tuple, .. } => self.tuple_slot(ty, literal),
            TypeKind::Container { kind: ContainerKind::Dict, .. } => self.unit(ty, Slot::Value),
            _ => return,
        };
        self.link(source, out, EdgeFilter::All);
    }

    fn unpack(&mut self, ty: TypeId, targets: &[NodeId]) {
        match self.program.universe.kind(ty) {
            TypeKind::Container { kind: ContainerKind::Tuple, .. } if self.positional.contains(&ty) => {
                for (i, target) in targets.iter().enumerate() {
                    let slot = self.tuple_slot(ty, Some(i as i64));
                    self.link(slot, *target, EdgeFilter::All);
                }
            }
            TypeKind::Container { .. } => {
                let elem = self.unit(ty, Slot::Elem);
                for target in targets {
                    self.link(elem, *target, EdgeFilter::All);
                }
            }
            TypeKind::Builtin(BuiltinType::Str) => {
                for target in targets {
                    self.add_type(*target, ty);
                }
            }
            _ => {}
        }
    }

    /// Apply builtin effects for one call, with `receiver` the receiver
    /// type for methods.
    pub(crate) fn apply_effects(
        &mut self,
        context: ContextId,
        call: &CallSite,
        receiver: Option<TypeId>,
        effects: &[Effect],
    ) -> Result<()> {
        let program = self.program;
        for effect in effects {
            match effect {
                Effect::Returns(source) => {
                    for flow in self.flows(call, receiver, *source) {
                        self.pour(flow, call.out);
                    }
                }
                Effect::ReturnsNumeric(source) => {
                    for flow in self.flows(call, receiver, *source) {
                        match flow {
                            Flow::Types(types) => {
                                let numeric = super::lattice::promote_bools(&program.universe, &types);
                                self.add_types(call.out, &numeric);
                            }
                            Flow::Node(node) => self.promote(call, node)?,
                        }
                    }
                }
                Effect::Store(slot, source) => {
                    let Some(recv) = receiver.filter(|r| program.universe.as_container(*r).is_some()) else {
                        continue;
                    };
                    let destination = self.unit(recv, *slot);
                    for flow in self.flows(call, receiver, *source) {
                        self.pour(flow, destination);
                    }
                }
                Effect::MergeUnits(i) => {
                    let (Some(recv), Some(arg)) = (receiver, call.args.get(*i)) else {
                        continue;
                    };
                    for t in self.nodes.types(*arg).clone().iter() {
                        if program.universe.as_container(t) == program.universe.as_container(recv) {
                            self.link_units(t, recv);
                        }
                    }
                }
                Effect::Produce { kind, fill } => {
                    let ty = self.site_container(*kind, call, 0)?;
                    self.add_type(call.out, ty);
                    for (slot, source) in fill {
                        let destination = self.unit(ty, *slot);
                        for flow in self.flows(call, receiver, *source) {
                            self.pour(flow, destination);
                        }
                    }
                }
                Effect::ProducePairs(sources) => {
                    let list = self.site_container(ContainerKind::List, call, 0)?;
                    let pair = self.site_container(ContainerKind::Tuple, call, 1)?;
                    self.positional.insert(pair);
                    self.add_type(call.out, list);
                    let elems = self.unit(list, Slot::Elem);
                    self.add_type(elems, pair);
                    let pair_elem = self.unit(pair, Slot::Elem);
                    for (i, source) in sources.iter().enumerate() {
                        let position = self.unit(pair, Slot::Index(i as u8));
                        for flow in self.flows(call, receiver, *source) {
                            match flow {
                                Flow::Node(n) => {
                                    self.link(n, position, EdgeFilter::All);
                                    self.link(n, pair_elem, EdgeFilter::All);
                                }
                                Flow::Types(types) => {
                                    self.add_types(position, &types);
                                    self.add_types(pair_elem, &types);
                                }
                            }
                        }
                    }
                }
                Effect::DictFrom(i) => {
                    let dict = self.site_container(ContainerKind::Dict, call, 0)?;
                    self.add_type(call.out, dict);
                    let Some(arg) = call.args.get(*i) else {
                        continue;
                    };
                    for t in self.nodes.types(*arg).clone().iter() {
                        match program.universe.as_container(t) {
                            Some(ContainerKind::Dict) => self.link_units(t, dict),
                            Some(_) => {
                                let pairs = self.unit(t, Slot::Elem);
                                let keys = self.unit(dict, Slot::Elem);
                                let values = self.unit(dict, Slot::Value);
                                if self.derived.insert((pairs, keys)) {
                                    self.constraints.add_structural(Structural::new(
                                        StructuralKind::Unpack {
                                            source: pairs,
                                            targets: vec![keys, values],
                                        },
                                        context,
                                        call_module(program, call),
                                        self.nodes.node(call.out).line,
                                    ));
                                }
                            }
                            None => {}
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn site_container(&self, kind: ContainerKind, call: &CallSite, depth: u8) -> Result<TypeId> {
        self.program.universe.container(kind, call.expr, depth).ok_or_else(|| {
            SkeinError::InternalInvariant(format!(
                "no {} identity enumerated for call '{}' at {}",
                kind.name(),
                call.name,
                call.expr
            ))
        })
    }

    fn flows(&mut self, call: &CallSite, receiver: Option<TypeId>, source: Source) -> Vec<Flow> {
        let program = self.program;
        let universe = &program.universe;
        match source {
            Source::Builtin(b) => vec![Flow::Types(TypeSet::single(universe.builtin(b)))],
            Source::Arg(i) => call.args.get(i).map(|n| vec![Flow::Node(*n)]).unwrap_or_default(),
            Source::Elements(i) => {
                let Some(arg) = call.args.get(i) else {
                    return Vec::new();
                };
                let types = self.nodes.types(*arg).clone();
                types.iter().filter_map(|t| self.element_source(t)).map(Flow::from).collect()
            }
            Source::Receiver => receiver.map(|r| vec![Flow::Types(TypeSet::single(r))]).unwrap_or_default(),
            Source::ReceiverUnit(slot) => receiver
                .filter(|r| universe.as_container(*r).is_some())
                .map(|r| vec![Flow::Node(self.unit(r, slot))])
                .unwrap_or_default(),
            Source::ReceiverElements => receiver
                .and_then(|r| self.element_source(r))
                .map(|e| vec![Flow::from(e)])
                .unwrap_or_default(),
        }
    }

    fn pour(&mut self, flow: Flow, destination: NodeId) {
        match flow {
            Flow::Node(n) => self.link(n, destination, EdgeFilter::All),
            Flow::Types(types) => {
                self.add_types(destination, &types);
            }
        }
    }

    /// Numeric flow from a node: a unary `+` transfer, which keeps int and
    /// float and turns bool into int.
    fn promote(&mut self, call: &CallSite, node: NodeId) -> Result<()> {
        if !self.derived.insert((node, call.out)) {
            return Ok(());
        }
        let module = call_module(self.program, call);
        let id = self.constraints.add_transfer(Transfer {
            kind: TransferKind::Unary {
                op: UnaryOp::Pos,
                operand: node,
            },
            out: call.out,
            module,
            line: self.nodes.node(call.out).line,
        });
        self.evaluate_transfer(id)
    }
}

impl From<Element> for Flow {
    fn from(element: Element) -> Self {
        match element {
            Element::Node(n) => Flow::Node(n),
            Element::Type(t) => Flow::Types(TypeSet::single(t)),
        }
    }
}

fn call_module(program: &crate::program::Program, call: &CallSite) -> ModuleId {
    program.module_of_expr(call.expr).unwrap_or(ModuleId(0))
}
