//! Type merging
//!
//! Collapses the per-context graph into one type set per program entity:
//! per expression, per variable, per function return and per container
//! slot, each the union over every context. With inheritance enabled,
//! attributes and inherited method copies are also unified along the class
//! hierarchy.

use super::context::ContextTable;
use super::node::{NodeKey, NodeRegistry};
use crate::error::{Result, SkeinError};
use crate::hir::ExprId;
use crate::program::{ClassId, FuncId, Program, VarId};
use crate::types::{Slot, TypeId, TypeKind, TypeSet};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum MergeKey {
    Expr(ExprId),
    Var(VarId),
    Return(FuncId),
    Unit(TypeId, Slot),
}

/// Context-insensitive view of the inference result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedTypeMap {
    entries: BTreeMap<MergeKey, TypeSet>,
}

impl MergedTypeMap {
    pub fn get(&self, key: &MergeKey) -> Option<&TypeSet> {
        self.entries.get(key)
    }

    /// `None` when no context registered a node for `id`; callers treat it
    /// as the empty set, see [`MergedTypeMap::expr_types`].
    pub fn expr(&self, id: ExprId) -> Option<&TypeSet> {
        self.get(&MergeKey::Expr(id))
    }

    /// Merged types of an expression, empty when it was never registered.
    pub fn expr_types(&self, id: ExprId) -> TypeSet {
        self.expr(id).cloned().unwrap_or_default()
    }

    pub fn var(&self, id: VarId) -> Option<&TypeSet> {
        self.get(&MergeKey::Var(id))
    }

    pub fn ret(&self, id: FuncId) -> Option<&TypeSet> {
        self.get(&MergeKey::Return(id))
    }

    pub fn unit(&self, ty: TypeId, slot: Slot) -> Option<&TypeSet> {
        self.get(&MergeKey::Unit(ty, slot))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MergeKey, &TypeSet)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn join(&mut self, key: MergeKey, types: &TypeSet) {
        self.entries.entry(key).or_default().union_with(types);
    }

    /// Join into an entry only if it is already there.
    fn join_existing(&mut self, key: MergeKey, types: &TypeSet) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.union_with(types);
        }
    }
}

pub struct TypeMerger<'a> {
    program: &'a Program,
    nodes: &'a NodeRegistry,
    contexts: &'a ContextTable,
}

impl<'a> TypeMerger<'a> {
    pub fn new(program: &'a Program, nodes: &'a NodeRegistry, contexts: &'a ContextTable) -> Self {
        Self {
            program,
            nodes,
            contexts,
        }
    }

    /// Merge the graph. Fails if some context has not reached a quiescence
    /// point, since its sets could still grow.
    pub fn merge(&self, inheritance: bool) -> Result<MergedTypeMap> {
        if !self.contexts.all_stable() {
            return Err(SkeinError::InternalInvariant(
                "type merge requested while some context is still propagating".into(),
            ));
        }
        let mut merged = MergedTypeMap::default();
        for node in self.nodes.iter() {
            let key = match node.key {
                NodeKey::Expr(e, _) => MergeKey::Expr(e),
                NodeKey::Var(v, _) => MergeKey::Var(v),
                NodeKey::Return(ctx) => match self.contexts.get(ctx).function() {
                    Some(f) => MergeKey::Return(f),
                    None => continue,
                },
                NodeKey::Unit(t, s) => MergeKey::Unit(t, s),
            };
            merged.join(key, &node.types);
        }
        if inheritance {
            self.unify_hierarchy(&mut merged);
        }
        Ok(merged)
    }

    fn unify_hierarchy(&self, merged: &mut MergedTypeMap) {
        let program = self.program;
        let snapshot = merged.clone();
        let empty = TypeSet::new();
        let lookup = |key: MergeKey| snapshot.get(&key).unwrap_or(&empty);

        // attribute accesses see the same-named variable of every related class
        for (expr, access) in &program.attr_exprs {
            let receivers = lookup(MergeKey::Expr(access.receiver));
            for class in receivers.iter().filter_map(|t| class_of(program, t)) {
                for related in program.hierarchy.related(class) {
                    if let Some(&var) = program.class(related).vars.get(&access.attr) {
                        merged.join_existing(MergeKey::Expr(*expr), lookup(MergeKey::Var(var)));
                    }
                }
            }
        }

        for class in &program.classes {
            for (name, &var) in &class.vars {
                for related in program.hierarchy.related(class.id) {
                    if related == class.id {
                        continue;
                    }
                    if let Some(&other) = program.class(related).vars.get(name) {
                        merged.join_existing(MergeKey::Var(var), lookup(MergeKey::Var(other)));
                    }
                }
            }
        }

        // inherited copies report into the method they were copied from
        for copy in program.functions.iter().filter(|f| f.inherited) {
            let Some(original) = program
                .functions
                .iter()
                .find(|f| !f.inherited && Arc::ptr_eq(&f.def, &copy.def))
            else {
                continue;
            };
            merged.join_existing(MergeKey::Return(original.id), lookup(MergeKey::Return(copy.id)));
            for (name, &var) in &copy.vars {
                if let Some(&target) = original.vars.get(name) {
                    merged.join_existing(MergeKey::Var(target), lookup(MergeKey::Var(var)));
                }
            }
        }
    }
}

fn class_of(program: &Program, ty: TypeId) -> Option<ClassId> {
    match program.universe.kind(ty) {
        TypeKind::Class(c) => Some(c),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::context::ContextState;
    use crate::program::ModuleId;

    #[test]
    fn test_merge_requires_stable_contexts() {
        let program = Program::default();
        let nodes = NodeRegistry::new();
        let mut contexts = ContextTable::new();
        let (ctx, _) = contexts.module_context(ModuleId(0));
        contexts.set_state(ctx, ContextState::Propagating);
        assert!(TypeMerger::new(&program, &nodes, &contexts).merge(false).is_err());
        contexts.mark_all_stable();
        assert!(TypeMerger::new(&program, &nodes, &contexts).merge(false).is_ok());
    }

    #[test]
    fn test_merge_unions_contexts() {
        let program = Program::default();
        let mut nodes = NodeRegistry::new();
        let mut contexts = ContextTable::new();
        let (a, _) = contexts.module_context(ModuleId(0));
        let (b, _) = contexts.module_context(ModuleId(1));
        let e = ExprId(4);
        let (na, _) = nodes.register(NodeKey::Expr(e, a), None, 1);
        let (nb, _) = nodes.register(NodeKey::Expr(e, b), None, 1);
        nodes.node_mut(na).types.insert(TypeId(2));
        nodes.node_mut(nb).types.insert(TypeId(3));
        contexts.mark_all_stable();

        let merged = TypeMerger::new(&program, &nodes, &contexts).merge(true).unwrap();
        let expected: TypeSet = [TypeId(2), TypeId(3)].into_iter().collect();
        assert_eq!(merged.expr(e), Some(&expected));
        assert_eq!(merged.expr_types(e), expected);
        assert_eq!(merged.len(), 1);

        let unseen = ExprId(99);
        assert_eq!(merged.expr(unseen), None);
        assert!(merged.expr_types(unseen).is_empty());
    }
}
