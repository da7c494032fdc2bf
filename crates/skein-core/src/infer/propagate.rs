//! Fixpoint propagator
//!
//! A node sits on the worklist at most once and is only put there when its
//! type set grew, so the number of visits per node is bounded by the size
//! of the type universe. Going past that bound means some rule is not
//! monotone and is reported as an internal invariant violation.

use super::constraint::{TransferId, TransferKind};
use super::context::ContextState;
use super::engine::Analysis;
use super::lattice::{self, BinaryOutcome};
use super::node::{EdgeFilter, NodeId};
use crate::config::WorklistOrder;
use crate::error::{Result, SkeinError};
use crate::types::{ContainerKind, Slot, TypeId, TypeKind, TypeSet, MAX_TUPLE_SLOTS};
use std::collections::{HashSet, VecDeque};
use tracing::trace;

#[derive(Debug)]
pub struct Propagator {
    queue: VecDeque<NodeId>,
    queued: HashSet<NodeId>,
    order: WorklistOrder,
    visit_bound: usize,
    steps: usize,
}

impl Propagator {
    pub fn new(order: WorklistOrder, universe_len: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            queued: HashSet::new(),
            order,
            visit_bound: universe_len + 2,
            steps: 0,
        }
    }

    pub fn push(&mut self, node: NodeId) {
        if self.queued.insert(node) {
            self.queue.push_back(node);
        }
    }

    fn pop(&mut self) -> Option<NodeId> {
        let node = match self.order {
            WorklistOrder::Fifo => self.queue.pop_front(),
            WorklistOrder::Lifo => self.queue.pop_back(),
        }?;
        self.queued.remove(&node);
        self.steps += 1;
        Some(node)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn steps(&self) -> usize {
        self.steps
    }
}

impl<'p> Analysis<'p> {
    /// Join `types` into `node`, scheduling it if it grew.
    pub(crate) fn add_types(&mut self, node: NodeId, types: &TypeSet) -> bool {
        let n = self.nodes.node_mut(node);
        if !n.types.union_with(types) {
            return false;
        }
        if let Some(ctx) = n.context() {
            if self.contexts.get(ctx).state == ContextState::Stable {
                self.contexts.set_state(ctx, ContextState::Propagating);
            }
        }
        self.worklist.push(node);
        true
    }

    pub(crate) fn add_type(&mut self, node: NodeId, ty: TypeId) -> bool {
        self.add_types(node, &TypeSet::single(ty))
    }

    /// Add an edge and push the source's current types across it right
    /// away, so a new edge never needs the source to be revisited.
    pub(crate) fn link(&mut self, source: NodeId, destination: NodeId, filter: EdgeFilter) {
        if source == destination || !self.nodes.connect(source, destination, filter) {
            return;
        }
        let flowing = self
            .nodes
            .edges_from(source)
            .iter()
            .find(|(d, _)| *d == destination)
            .map(|(_, f)| f.apply(self.nodes.types(source)))
            .unwrap_or_default();
        self.add_types(destination, &flowing);
    }

    /// Drain the worklist.
    pub(crate) fn propagate(&mut self) -> Result<()> {
        while let Some(node) = self.worklist.pop() {
            let visits = {
                let n = self.nodes.node_mut(node);
                n.visits += 1;
                n.visits
            };
            if visits > self.worklist.visit_bound {
                return Err(SkeinError::InternalInvariant(format!(
                    "node {:?} visited {} times, bound is {}",
                    self.nodes.node(node).key,
                    visits,
                    self.worklist.visit_bound
                )));
            }
            let types = self.nodes.types(node).clone();
            trace!("visit {:?} {}", self.nodes.node(node).key, types);

            let edges = self.nodes.edges_from(node).to_vec();
            for (destination, filter) in edges {
                self.add_types(destination, &filter.apply(&types));
            }
            for transfer in self.constraints.dependents_of(node).to_vec() {
                self.evaluate_transfer(transfer)?;
            }
        }
        Ok(())
    }

    pub(crate) fn evaluate_transfer(&mut self, id: TransferId) -> Result<()> {
        let transfer = self.constraints.transfer(id).clone();
        let program = self.program;
        let universe = &program.universe;
        let mut result = TypeSet::new();
        match transfer.kind {
            TransferKind::Binary { op, left, right, site } => {
                let ls = self.nodes.types(left).clone();
                let rs = self.nodes.types(right).clone();
                for l in ls.iter() {
                    for r in rs.iter() {
                        match lattice::binary(universe, op, l, r) {
                            BinaryOutcome::Type(t) => {
                                result.insert(t);
                            }
                            BinaryOutcome::Concat(kind) => {
                                let joined = universe.container(kind, site, 0).ok_or_else(|| {
                                    SkeinError::InternalInvariant(format!(
                                        "no {} identity enumerated for concatenation site {}",
                                        kind.name(),
                                        site
                                    ))
                                })?;
                                result.insert(joined);
                                self.link_units(l, joined);
                                self.link_units(r, joined);
                            }
                            BinaryOutcome::Unsupported => {}
                        }
                    }
                }
            }
            TransferKind::Unary { op, operand } => {
                for t in self.nodes.types(operand).iter() {
                    if let Some(r) = lattice::unary(universe, op, t) {
                        result.insert(r);
                    }
                }
            }
        }
        self.add_types(transfer.out, &result);
        Ok(())
    }

    /// Flow every slot of container `from` into the same slot of `to`.
    /// Tuple positions are not carried over: a concatenated tuple only
    /// tracks its elements as a whole.
    pub(crate) fn link_units(&mut self, from: TypeId, to: TypeId) {
        if from == to {
            return;
        }
        let TypeKind::Container { kind, .. } = self.program.universe.kind(from) else {
            return;
        };
        let mut slots = vec![Slot::Elem];
        if kind == ContainerKind::Dict {
            slots.push(Slot::Value);
        }
        for slot in slots {
            let (src, dst) = (self.unit(from, slot), self.unit(to, slot));
            self.link(src, dst, EdgeFilter::All);
        }
    }

    /// Node holding what subscript position `index` of tuple `ty` yields.
    pub(crate) fn tuple_slot(&mut self, ty: TypeId, index: Option<i64>) -> NodeId {
        match index {
            Some(i) if i >= 0 && (i as usize) < MAX_TUPLE_SLOTS && self.positional.contains(&ty) => {
                self.unit(ty, Slot::Index(i as u8))
            }
            _ => self.unit(ty, Slot::Elem),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InferenceConfig;
    use crate::infer::node::NodeKey;
    use crate::program::{ModuleId, Program, VarId};

    #[test]
    fn test_worklist_deduplicates() {
        let mut w = Propagator::new(WorklistOrder::Fifo, 5);
        w.push(NodeId(1));
        w.push(NodeId(1));
        w.push(NodeId(2));
        assert_eq!(w.pop(), Some(NodeId(1)));
        assert_eq!(w.pop(), Some(NodeId(2)));
        assert_eq!(w.pop(), None);
        assert_eq!(w.steps(), 2);
    }

    #[test]
    fn test_lifo_order() {
        let mut w = Propagator::new(WorklistOrder::Lifo, 5);
        w.push(NodeId(1));
        w.push(NodeId(2));
        assert_eq!(w.pop(), Some(NodeId(2)));
        w.push(NodeId(2));
        assert_eq!(w.pop(), Some(NodeId(2)));
        assert_eq!(w.pop(), Some(NodeId(1)));
        assert!(w.is_empty());
    }

    #[test]
    fn test_visit_bound_violation_is_an_internal_error() {
        let program = Program::default();
        let mut an = Analysis::new(&program, &InferenceConfig::default());
        let (node, _) = an.nodes.register(NodeKey::Unit(TypeId(0), Slot::Elem), None, 0);
        let bound = an.worklist.visit_bound;
        an.nodes.node_mut(node).visits = bound;
        an.worklist.push(node);

        let err = an.propagate().unwrap_err();
        assert!(matches!(err, SkeinError::InternalInvariant(ref m) if m.contains("visited")));
        assert_eq!(an.nodes.node(node).visits, bound + 1);
    }

    #[test]
    fn test_visits_stay_within_bound_on_a_cycle() {
        let program = Program::default();
        let mut an = Analysis::new(&program, &InferenceConfig::default());
        let (a, _) = an.nodes.register(NodeKey::Unit(TypeId(0), Slot::Elem), None, 0);
        let (b, _) = an.nodes.register(NodeKey::Unit(TypeId(0), Slot::Value), None, 0);
        an.link(a, b, EdgeFilter::All);
        an.link(b, a, EdgeFilter::All);
        an.add_type(a, TypeId(1));
        an.add_type(b, TypeId(2));

        an.propagate().unwrap();
        assert_eq!(an.nodes.types(a), an.nodes.types(b));
        assert!(an.nodes.node(a).visits <= an.worklist.visit_bound);
    }

    #[test]
    fn test_new_types_reopen_a_stable_context() {
        let program = Program::default();
        let mut an = Analysis::new(&program, &InferenceConfig::default());
        let (ctx, _) = an.contexts.module_context(ModuleId(0));
        let (node, _) = an.nodes.register(NodeKey::Var(VarId(0), ctx), None, 1);
        an.contexts.mark_all_stable();

        assert!(an.add_type(node, TypeId(2)));
        assert_eq!(an.contexts.get(ctx).state, ContextState::Propagating);
        an.propagate().unwrap();

        an.contexts.mark_all_stable();
        // joining a type the node already holds is not growth
        assert!(!an.add_type(node, TypeId(2)));
        assert_eq!(an.contexts.get(ctx).state, ContextState::Stable);
    }
}
