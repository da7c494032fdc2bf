//! Node registry
//!
//! Analysis nodes live in an arena indexed by [`NodeId`]; edges are stored
//! as id pairs, so recursive and mutually recursive programs produce cyclic
//! graphs without any ownership trouble.
//!
//! Every node belongs to one module and one context, with one exception:
//! [`NodeKey::Unit`] nodes describe a container allocation site, which all
//! contexts share, so they carry neither.

use super::context::ContextId;
use crate::hir::ExprId;
use crate::program::{ModuleId, VarId};
use crate::types::{Slot, TypeId, TypeSet};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// What a node stands for. Identical keys always map to the same node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKey {
    /// One source expression inside one context.
    Expr(ExprId, ContextId),
    /// A variable as seen from one context (locals per variant, globals in
    /// their module context, attributes in their class context).
    Var(VarId, ContextId),
    /// Return value of a function variant.
    Return(ContextId),
    /// Element, key, value or tuple position of a container identity.
    /// Containers are allocation-site abstractions shared by all contexts.
    Unit(TypeId, Slot),
}

impl NodeKey {
    pub fn context(&self) -> Option<ContextId> {
        match self {
            NodeKey::Expr(_, c) | NodeKey::Var(_, c) | NodeKey::Return(c) => Some(*c),
            NodeKey::Unit(..) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisNode {
    pub id: NodeId,
    pub key: NodeKey,
    pub module: Option<ModuleId>,
    pub line: usize,
    pub types: TypeSet,
    /// Times the propagator has taken this node off the worklist.
    pub visits: usize,
    /// Size of `types` at the last quiescence point.
    pub stable_len: usize,
}

impl AnalysisNode {
    pub fn context(&self) -> Option<ContextId> {
        self.key.context()
    }
}

/// Which types an edge lets through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeFilter {
    All,
    Only(TypeSet),
}

impl EdgeFilter {
    pub fn apply(&self, types: &TypeSet) -> TypeSet {
        match self {
            EdgeFilter::All => types.clone(),
            EdgeFilter::Only(allowed) => types.intersection(allowed),
        }
    }

    /// Widen in place; returns true if the filter now admits more.
    fn widen(&mut self, other: &EdgeFilter) -> bool {
        match (&mut *self, other) {
            (EdgeFilter::All, _) => false,
            (this, EdgeFilter::All) => {
                *this = EdgeFilter::All;
                true
            }
            (EdgeFilter::Only(mine), EdgeFilter::Only(theirs)) => mine.union_with(theirs),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct NodeRegistry {
    nodes: Vec<AnalysisNode>,
    index: HashMap<NodeKey, NodeId>,
    out_edges: Vec<Vec<(NodeId, EdgeFilter)>>,
    by_expr: HashMap<ExprId, Vec<NodeId>>,
    edge_count: usize,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node for `key`, created on first use. Returns the id and whether it
    /// was created by this call.
    pub fn register(&mut self, key: NodeKey, module: Option<ModuleId>, line: usize) -> (NodeId, bool) {
        if let Some(&id) = self.index.get(&key) {
            return (id, false);
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(AnalysisNode {
            id,
            key,
            module,
            line,
            types: TypeSet::new(),
            visits: 0,
            stable_len: 0,
        });
        self.out_edges.push(Vec::new());
        self.index.insert(key, id);
        if let NodeKey::Expr(expr, _) = key {
            self.by_expr.entry(expr).or_default().push(id);
        }
        (id, true)
    }

    pub fn lookup(&self, key: &NodeKey) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    /// Record `source -> destination`. A repeated edge widens its filter.
    /// Returns true when the edge is new or admits more than before.
    pub fn connect(&mut self, source: NodeId, destination: NodeId, filter: EdgeFilter) -> bool {
        let edges = &mut self.out_edges[source.0 as usize];
        if let Some((_, existing)) = edges.iter_mut().find(|(d, _)| *d == destination) {
            return existing.widen(&filter);
        }
        edges.push((destination, filter));
        self.edge_count += 1;
        true
    }

    pub fn edges_from(&self, source: NodeId) -> &[(NodeId, EdgeFilter)] {
        &self.out_edges[source.0 as usize]
    }

    pub fn node(&self, id: NodeId) -> &AnalysisNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut AnalysisNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn types(&self, id: NodeId) -> &TypeSet {
        &self.nodes[id.0 as usize].types
    }

    /// Every node registered for a source expression, across contexts.
    pub fn nodes_of_expr(&self, expr: ExprId) -> &[NodeId] {
        self.by_expr.get(&expr).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnalysisNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let mut reg = NodeRegistry::new();
        let key = NodeKey::Expr(ExprId(7), ContextId(0));
        let (a, created) = reg.register(key, None, 1);
        let (b, again) = reg.register(key, None, 1);
        assert_eq!(a, b);
        assert!(created);
        assert!(!again);
        assert_eq!(reg.nodes_of_expr(ExprId(7)), &[a]);
    }

    #[test]
    fn test_connect_widens_filter() {
        let mut reg = NodeRegistry::new();
        let (a, _) = reg.register(NodeKey::Return(ContextId(0)), None, 1);
        let (b, _) = reg.register(NodeKey::Return(ContextId(1)), None, 1);
        assert!(reg.connect(a, b, EdgeFilter::Only(TypeSet::single(TypeId(2)))));
        assert!(!reg.connect(a, b, EdgeFilter::Only(TypeSet::single(TypeId(2)))));
        assert!(reg.connect(a, b, EdgeFilter::Only(TypeSet::single(TypeId(3)))));
        assert!(reg.connect(a, b, EdgeFilter::All));
        assert!(!reg.connect(a, b, EdgeFilter::Only(TypeSet::single(TypeId(4)))));
        assert_eq!(reg.edges_from(a).len(), 1);
        assert_eq!(reg.edge_count(), 1);
    }

    #[test]
    fn test_filter_apply() {
        let types: TypeSet = [TypeId(1), TypeId(2), TypeId(3)].into_iter().collect();
        let filter = EdgeFilter::Only(TypeSet::single(TypeId(2)));
        assert_eq!(filter.apply(&types), TypeSet::single(TypeId(2)));
        assert_eq!(EdgeFilter::All.apply(&types), types);
    }
}
