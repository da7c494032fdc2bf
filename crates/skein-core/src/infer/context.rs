//! Analysis contexts
//!
//! A context is one specialization unit: a module body, a class body, or
//! one variant of a function keyed by its argument signature.

use crate::program::{ClassId, FuncId, ModuleId};
use crate::types::{TypeId, TypeSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(pub u32);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextOwner {
    Module(ModuleId),
    Class(ClassId),
    Function(FuncId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextState {
    Pending,
    Building,
    Propagating,
    Stable,
}

/// One position of a call signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Component {
    /// The argument contributes exactly this type.
    Type(TypeId),
    /// The argument has no type yet.
    Empty,
    /// No argument was passed; the parameter default applies.
    Default,
}

impl Component {
    /// Filter for the argument-to-parameter edge of this component.
    pub fn filter_set(&self) -> Option<TypeSet> {
        match self {
            Component::Type(t) => Some(TypeSet::single(*t)),
            Component::Empty | Component::Default => None,
        }
    }

    fn covers(&self, other: &Component) -> bool {
        match (self, other) {
            (a, b) if a == b => true,
            (Component::Type(_), Component::Empty) => true,
            _ => false,
        }
    }
}

/// Ordered per-parameter signature of a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature(pub Vec<Component>);

impl Signature {
    /// True when every call with signature `other` may be routed to a
    /// variant built for `self`.
    pub fn subsumes(&self, other: &Signature) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a.covers(b))
    }

    pub fn has_empty(&self) -> bool {
        self.0.contains(&Component::Empty)
    }
}

#[derive(Debug, Clone)]
pub struct Context {
    pub id: ContextId,
    pub owner: ContextOwner,
    pub module: ModuleId,
    /// `None` for module and class contexts and for the fallback variant.
    pub signature: Option<Signature>,
    /// Generic variant that absorbs signatures past the variant cap.
    pub fallback: bool,
    pub state: ContextState,
}

impl Context {
    pub fn function(&self) -> Option<FuncId> {
        match self.owner {
            ContextOwner::Function(f) => Some(f),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ContextTable {
    contexts: Vec<Context>,
    modules: HashMap<ModuleId, ContextId>,
    classes: HashMap<ClassId, ContextId>,
    variants: HashMap<FuncId, Vec<ContextId>>,
    fallbacks: HashMap<FuncId, ContextId>,
}

impl ContextTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, owner: ContextOwner, module: ModuleId, signature: Option<Signature>, fallback: bool) -> ContextId {
        let id = ContextId(self.contexts.len() as u32);
        self.contexts.push(Context {
            id,
            owner,
            module,
            signature,
            fallback,
            state: ContextState::Pending,
        });
        id
    }

    /// Module context, created on first request.
    pub fn module_context(&mut self, module: ModuleId) -> (ContextId, bool) {
        if let Some(&id) = self.modules.get(&module) {
            return (id, false);
        }
        let id = self.push(ContextOwner::Module(module), module, None, false);
        self.modules.insert(module, id);
        (id, true)
    }

    /// Class context, created on first request.
    pub fn class_context(&mut self, class: ClassId, module: ModuleId) -> (ContextId, bool) {
        if let Some(&id) = self.classes.get(&class) {
            return (id, false);
        }
        let id = self.push(ContextOwner::Class(class), module, None, false);
        self.classes.insert(class, id);
        (id, true)
    }

    pub fn add_variant(&mut self, func: FuncId, module: ModuleId, signature: Signature) -> ContextId {
        let id = self.push(ContextOwner::Function(func), module, Some(signature), false);
        self.variants.entry(func).or_default().push(id);
        id
    }

    pub fn fallback(&self, func: FuncId) -> Option<ContextId> {
        self.fallbacks.get(&func).copied()
    }

    pub fn add_fallback(&mut self, func: FuncId, module: ModuleId) -> ContextId {
        if let Some(id) = self.fallback(func) {
            return id;
        }
        let id = self.push(ContextOwner::Function(func), module, None, true);
        self.fallbacks.insert(func, id);
        id
    }

    pub fn module_ctx(&self, module: ModuleId) -> Option<ContextId> {
        self.modules.get(&module).copied()
    }

    pub fn class_ctx(&self, class: ClassId) -> Option<ContextId> {
        self.classes.get(&class).copied()
    }

    /// Signature-keyed variants of `func`, in creation order. The fallback
    /// is not included.
    pub fn variants(&self, func: FuncId) -> &[ContextId] {
        self.variants.get(&func).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every context of `func`, fallback last.
    pub fn all_variants(&self, func: FuncId) -> Vec<ContextId> {
        let mut all = self.variants(func).to_vec();
        all.extend(self.fallback(func));
        all
    }

    pub fn get(&self, id: ContextId) -> &Context {
        &self.contexts[id.0 as usize]
    }

    pub fn set_state(&mut self, id: ContextId, state: ContextState) {
        self.contexts[id.0 as usize].state = state;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Context> {
        self.contexts.iter()
    }

    pub fn all_stable(&self) -> bool {
        self.contexts.iter().all(|c| c.state == ContextState::Stable)
    }

    pub fn mark_all_stable(&mut self) {
        for c in &mut self.contexts {
            c.state = ContextState::Stable;
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(components: &[Component]) -> Signature {
        Signature(components.to_vec())
    }

    #[test]
    fn test_subsumption() {
        let int = Component::Type(TypeId(2));
        let float = Component::Type(TypeId(3));
        assert!(sig(&[int]).subsumes(&sig(&[int])));
        assert!(sig(&[int]).subsumes(&sig(&[Component::Empty])));
        assert!(!sig(&[Component::Empty]).subsumes(&sig(&[int])));
        assert!(!sig(&[int]).subsumes(&sig(&[float])));
        assert!(!sig(&[int]).subsumes(&sig(&[int, int])));
        assert!(!sig(&[int]).subsumes(&sig(&[Component::Default])));
        assert!(sig(&[int, Component::Default]).subsumes(&sig(&[Component::Empty, Component::Default])));
    }

    #[test]
    fn test_module_context_reused() {
        let mut table = ContextTable::new();
        let (a, created) = table.module_context(ModuleId(0));
        let (b, again) = table.module_context(ModuleId(0));
        assert_eq!(a, b);
        assert!(created && !again);
        assert_eq!(table.get(a).state, ContextState::Pending);
    }

    #[test]
    fn test_fallback_listed_last() {
        let mut table = ContextTable::new();
        let f = FuncId(0);
        let v = table.add_variant(f, ModuleId(0), sig(&[Component::Empty]));
        let fb = table.add_fallback(f, ModuleId(0));
        assert_eq!(table.add_fallback(f, ModuleId(0)), fb);
        assert_eq!(table.all_variants(f), vec![v, fb]);
        assert!(table.get(fb).fallback);
    }
}
